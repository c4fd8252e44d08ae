// blegate Source Code File
//
// Copyright 2025 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! An in-memory [`Transport`] for tests.
//!
//! [`MockTransport`] hands out one [`MockLink`] per address. Both are cheap handles onto shared
//! state, so a test keeps its own clone to script failures, inject advertisements, notifications
//! and link loss, and inspect which platform calls were made.
//!
//! Reads return the last value written to the characteristic (or its seeded value), so a
//! write followed by a read echoes the payload.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::trace;
use static_assertions::assert_impl_all;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::api::bleuuid::uuid_from_u16;
use crate::api::{
    Advertisement, AdvertisementStream, BDAddr, CharPropFlags, Characteristic, ConnectOptions,
    Link, LinkEvent, LinkEventStream, ScanFilter, Service, Transport, ValueNotification, WriteType,
};
use crate::config::ScanMode;
use crate::{Error, Result};

/// Heart rate service.
pub const HEART_RATE_SERVICE: Uuid = uuid_from_u16(0x180D);
/// Heart rate measurement, notify only.
pub const HEART_RATE_MEASUREMENT: Uuid = uuid_from_u16(0x2A37);
/// Heart rate control point, read and write.
pub const HEART_RATE_CONTROL_POINT: Uuid = uuid_from_u16(0x2A39);

/// A platform call made on a [`MockLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    DiscoverServices,
    Read(Uuid),
    Write(Uuid, Vec<u8>, WriteType),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    RequestMtu(u16),
    ReadRssi,
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct MockTransport {
    shared: Arc<TransportShared>,
}

#[derive(Debug)]
struct TransportShared {
    state: Mutex<TransportState>,
    ready: watch::Sender<bool>,
    scan_stops_held: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct TransportState {
    scan: Option<mpsc::UnboundedSender<Result<Advertisement>>>,
    scan_filters: Vec<(ScanFilter, ScanMode)>,
    scan_starts: usize,
    scan_stops: usize,
    links: HashMap<BDAddr, MockLink>,
    connect_failures: HashMap<BDAddr, Error>,
    stalled_connects: HashSet<BDAddr>,
    connect_options: Vec<ConnectOptions>,
    pair_requests: Vec<BDAddr>,
    pair_failure: Option<Error>,
    shutdowns: usize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(TransportShared {
                state: Mutex::default(),
                ready: watch::Sender::new(true),
                scan_stops_held: watch::Sender::new(false),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.shared.state.lock().unwrap()
    }

    /// The link `connect` will hand out for `address`, created with the heart rate profile on
    /// first use.
    pub fn link(&self, address: BDAddr) -> MockLink {
        self.state()
            .links
            .entry(address)
            .or_insert_with(|| MockLink::new(address))
            .clone()
    }

    /// Delivers an advertising report to the running scan, if any.
    pub fn advertise(&self, advertisement: Advertisement) {
        if let Some(scan) = &self.state().scan {
            let _ = scan.send(Ok(advertisement));
        }
    }

    /// Fails the running scan.
    pub fn fail_scan(&self, error: Error) {
        if let Some(scan) = &self.state().scan {
            let _ = scan.send(Err(error));
        }
    }

    pub fn fail_connect(&self, address: BDAddr, error: Error) {
        self.state().connect_failures.insert(address, error);
    }

    /// Connection attempts to `address` never complete.
    pub fn stall_connect(&self, address: BDAddr) {
        self.state().stalled_connects.insert(address);
    }

    pub fn fail_pair(&self, error: Error) {
        self.state().pair_failure = Some(error);
    }

    /// While not ready, `wait_ready` blocks.
    pub fn set_ready(&self, ready: bool) {
        self.shared.ready.send_replace(ready);
    }

    /// While held, `stop_scan` blocks before releasing the scan.
    pub fn hold_scan_stops(&self, held: bool) {
        self.shared.scan_stops_held.send_replace(held);
    }

    pub fn scan_starts(&self) -> usize {
        self.state().scan_starts
    }

    pub fn scan_stops(&self) -> usize {
        self.state().scan_stops
    }

    /// Filters and modes of every `start_scan` call, in order.
    pub fn scan_requests(&self) -> Vec<(ScanFilter, ScanMode)> {
        self.state().scan_filters.clone()
    }

    pub fn connect_options(&self) -> Vec<ConnectOptions> {
        self.state().connect_options.clone()
    }

    pub fn pair_requests(&self) -> Vec<BDAddr> {
        self.state().pair_requests.clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.state().shutdowns
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start_scan(&self, filter: &ScanFilter, mode: ScanMode) -> Result<AdvertisementStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state();
        state.scan = Some(sender);
        state.scan_starts += 1;
        state.scan_filters.push((filter.clone(), mode));
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut held = self.shared.scan_stops_held.subscribe();
        let _ = held.wait_for(|held| !*held).await;
        let mut state = self.state();
        state.scan = None;
        state.scan_stops += 1;
        Ok(())
    }

    async fn connect(&self, address: BDAddr, options: &ConnectOptions) -> Result<Box<dyn Link>> {
        let (link, stalled) = {
            let mut state = self.state();
            state.connect_options.push(*options);
            if let Some(error) = state.connect_failures.get(&address) {
                return Err(error.clone());
            }
            let link = state
                .links
                .entry(address)
                .or_insert_with(|| MockLink::new(address))
                .clone();
            (link, state.stalled_connects.contains(&address))
        };
        if stalled {
            trace!("Mock connect to {} stalled", address);
            futures::future::pending::<()>().await;
        }
        link.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(link))
    }

    async fn wait_ready(&self) -> Result<()> {
        let mut ready = self.shared.ready.subscribe();
        ready
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|e| Error::TransportError(e.to_string()))
    }

    async fn pair(&self, address: BDAddr) -> Result<()> {
        let mut state = self.state();
        state.pair_requests.push(address);
        match &state.pair_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.state().shutdowns += 1;
        Ok(())
    }
}

/// One scripted peripheral connection.
#[derive(Debug, Clone)]
pub struct MockLink {
    address: BDAddr,
    shared: Arc<LinkShared>,
}

#[derive(Debug, Default)]
struct LinkShared {
    state: Mutex<LinkState>,
    connects: AtomicUsize,
    event_streams: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Debug, Default)]
struct LinkState {
    services: Vec<Service>,
    values: HashMap<Uuid, Vec<u8>>,
    failures: HashMap<Uuid, Error>,
    stalled: HashSet<Uuid>,
    discovery_failure: Option<Error>,
    stall_discovery: bool,
    stall_events: bool,
    mtu_limit: u16,
    rssi: i16,
    calls: Vec<MockCall>,
    events: Option<mpsc::UnboundedSender<LinkEvent>>,
}

impl MockLink {
    fn new(address: BDAddr) -> Self {
        let characteristic = |uuid, properties| Characteristic {
            uuid,
            service_uuid: HEART_RATE_SERVICE,
            properties,
        };
        let link = Self {
            address,
            shared: Arc::default(),
        };
        {
            let mut state = link.state();
            state.services = vec![Service {
                uuid: HEART_RATE_SERVICE,
                primary: true,
                characteristics: vec![
                    characteristic(HEART_RATE_MEASUREMENT, CharPropFlags::NOTIFY),
                    characteristic(
                        HEART_RATE_CONTROL_POINT,
                        CharPropFlags::READ | CharPropFlags::WRITE,
                    ),
                ],
            }];
            state.mtu_limit = 247;
            state.rssi = -55;
        }
        link
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.shared.state.lock().unwrap()
    }

    pub fn set_services(&self, services: Vec<Service>) {
        self.state().services = services;
    }

    pub fn set_value(&self, characteristic: Uuid, value: Vec<u8>) {
        self.state().values.insert(characteristic, value);
    }

    pub fn set_rssi(&self, rssi: i16) {
        self.state().rssi = rssi;
    }

    /// Largest MTU the peer agrees to.
    pub fn set_mtu_limit(&self, mtu: u16) {
        self.state().mtu_limit = mtu;
    }

    /// Every operation on `characteristic` fails with `error`.
    pub fn fail(&self, characteristic: Uuid, error: Error) {
        self.state().failures.insert(characteristic, error);
    }

    /// Every operation on `characteristic` hangs until cancelled.
    pub fn stall(&self, characteristic: Uuid) {
        self.state().stalled.insert(characteristic);
    }

    pub fn fail_discovery(&self, error: Error) {
        self.state().discovery_failure = Some(error);
    }

    /// Service discovery hangs until cancelled.
    pub fn stall_discovery(&self) {
        self.state().stall_discovery = true;
    }

    /// Subscribing to the link's event stream hangs until cancelled.
    pub fn stall_events(&self) {
        self.state().stall_events = true;
    }

    /// Sends a notification over the link, as the peer would.
    pub fn notify(&self, characteristic: Uuid, value: Vec<u8>) {
        if let Some(events) = &self.state().events {
            let _ = events.send(LinkEvent::Notification(ValueNotification {
                uuid: characteristic,
                value,
            }));
        }
    }

    /// Drops the link from the peer side.
    pub fn drop_link(&self) {
        if let Some(events) = self.state().events.take() {
            let _ = events.send(LinkEvent::Disconnected);
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// How many times the event stream was asked for.
    pub fn event_streams(&self) -> usize {
        self.shared.event_streams.load(Ordering::SeqCst)
    }

    /// Highest number of GATT calls that were ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    /// Records the call and resolves its scripted behaviour for `characteristic`.
    async fn begin(&self, call: MockCall, characteristic: Option<Uuid>) -> Result<InFlight> {
        let (failure, stalled) = {
            let mut state = self.state();
            state.calls.push(call);
            match characteristic {
                Some(uuid) => (
                    state.failures.get(&uuid).cloned(),
                    state.stalled.contains(&uuid),
                ),
                None => (None, false),
            }
        };
        let guard = InFlight::enter(self.shared.clone());
        // Gives a concurrent caller the chance to overlap, which max_in_flight would catch.
        tokio::task::yield_now().await;
        if stalled {
            futures::future::pending::<()>().await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(guard),
        }
    }
}

/// Counts a running GATT call for as long as it lives.
struct InFlight(Arc<LinkShared>);

impl InFlight {
    fn enter(shared: Arc<LinkShared>) -> Self {
        let now = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Link for MockLink {
    fn address(&self) -> BDAddr {
        self.address
    }

    async fn discover_services(&self) -> Result<Vec<Service>> {
        let (services, failure, stalled) = {
            let mut state = self.state();
            state.calls.push(MockCall::DiscoverServices);
            (
                state.services.clone(),
                state.discovery_failure.clone(),
                state.stall_discovery,
            )
        };
        tokio::task::yield_now().await;
        if stalled {
            futures::future::pending::<()>().await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(services),
        }
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let _guard = self
            .begin(MockCall::Read(characteristic), Some(characteristic))
            .await?;
        Ok(self
            .state()
            .values
            .get(&characteristic)
            .cloned()
            .unwrap_or_default())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8], write_type: WriteType) -> Result<()> {
        let _guard = self
            .begin(
                MockCall::Write(characteristic, data.to_vec(), write_type),
                Some(characteristic),
            )
            .await?;
        self.state().values.insert(characteristic, data.to_vec());
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let _guard = self
            .begin(MockCall::Subscribe(characteristic), Some(characteristic))
            .await?;
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        let _guard = self
            .begin(MockCall::Unsubscribe(characteristic), Some(characteristic))
            .await?;
        Ok(())
    }

    async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        let _guard = self.begin(MockCall::RequestMtu(mtu), None).await?;
        Ok(mtu.min(self.state().mtu_limit))
    }

    async fn read_rssi(&self) -> Result<i16> {
        let _guard = self.begin(MockCall::ReadRssi, None).await?;
        Ok(self.state().rssi)
    }

    async fn events(&self) -> Result<LinkEventStream> {
        self.shared.event_streams.fetch_add(1, Ordering::SeqCst);
        if self.state().stall_events {
            trace!("Mock event stream for {} stalled", self.address);
            futures::future::pending::<()>().await;
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state().events = Some(sender);
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state();
        state.calls.push(MockCall::Disconnect);
        state.events = None;
        Ok(())
    }
}

assert_impl_all!(MockTransport: Transport, Clone, Send, Sync);
assert_impl_all!(MockLink: Link, Clone, Send, Sync);
