// blegate Source Code File
//
// Copyright 2025 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The scan coordinator: at most one discovery session at a time.

use std::sync::{Arc, Mutex};

use futures::stream::StreamExt;
use log::{debug, info, trace, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::api::{AdvertisementStream, Event, ScanFilter, Transport};
use crate::common::event_bus::EventBus;
use crate::common::registry::DeviceRegistry;
use crate::config::ScanMode;
use crate::{Error, Result};

#[derive(Debug, Default)]
enum ScanState {
    #[default]
    Idle,
    /// The platform call is in progress. `stop` only flags it; `start` cleans up.
    Starting { stop_requested: bool },
    Active {
        generation: u64,
        filter: ScanFilter,
        task: JoinHandle<()>,
    },
    /// `stop` is releasing the platform scan. `start` waits for `Idle`.
    Stopping,
}

#[derive(Debug, Default)]
struct ScanInner {
    state: ScanState,
    generation: u64,
}

pub(crate) struct ScanCoordinator {
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    registry: Arc<DeviceRegistry>,
    mode: ScanMode,
    inner: Arc<Mutex<ScanInner>>,
    released: Notify,
}

/// Returns the coordinator to `Idle` when a stop finishes, or when the stopping caller is
/// dropped halfway.
struct Releasing<'a>(&'a ScanCoordinator);

impl Drop for Releasing<'_> {
    fn drop(&mut self) {
        self.0.inner.lock().unwrap().state = ScanState::Idle;
        self.0.released.notify_waiters();
    }
}

impl ScanCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        bus: Arc<EventBus>,
        registry: Arc<DeviceRegistry>,
        mode: ScanMode,
    ) -> Self {
        Self {
            transport,
            bus,
            registry,
            mode,
            inner: Arc::default(),
            released: Notify::new(),
        }
    }

    /// Starts a discovery session. Fails with `AlreadyScanning`, without touching the transport,
    /// while another session is starting or active. Waits for a stop in progress to release the
    /// platform scan first.
    pub async fn start(&self, filter: ScanFilter) -> Result<()> {
        loop {
            let released = self.released.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                match inner.state {
                    ScanState::Idle => {
                        inner.state = ScanState::Starting {
                            stop_requested: false,
                        };
                        break;
                    }
                    ScanState::Stopping => {}
                    _ => return Err(Error::AlreadyScanning),
                }
            }
            trace!("Waiting for the previous scan to be released");
            released.await;
        }

        self.registry.mark_all_stale();
        let started = self.transport.start_scan(&filter, self.mode).await;

        let mut inner = self.inner.lock().unwrap();
        let stop_requested = matches!(
            inner.state,
            ScanState::Starting {
                stop_requested: true
            }
        );
        let advertisements = match started {
            Ok(advertisements) if !stop_requested => advertisements,
            Ok(_) => {
                inner.state = ScanState::Idle;
                drop(inner);
                debug!("Scan stopped while starting");
                self.release_platform_scan();
                return Err(Error::Cancelled);
            }
            Err(e) => {
                inner.state = ScanState::Idle;
                drop(inner);
                warn!("Failed to start scan: {}", e);
                return Err(e);
            }
        };

        inner.generation += 1;
        let generation = inner.generation;
        info!("Scan started with {:?}", filter);
        self.bus.publish(Event::ScanStarted);
        let task = tokio::spawn(consume_advertisements(
            advertisements,
            filter.clone(),
            generation,
            self.inner.clone(),
            self.transport.clone(),
            self.bus.clone(),
            self.registry.clone(),
        ));
        inner.state = ScanState::Active {
            generation,
            filter,
            task,
        };
        Ok(())
    }

    /// Stops the running discovery session. Returns once the platform scan handle is released.
    /// A no-op when nothing is scanning.
    pub async fn stop(&self) -> Result<()> {
        let task = loop {
            let released = self.released.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                match std::mem::replace(&mut inner.state, ScanState::Stopping) {
                    ScanState::Active { task, .. } => break task,
                    ScanState::Starting { .. } => {
                        inner.state = ScanState::Starting {
                            stop_requested: true,
                        };
                        return Ok(());
                    }
                    ScanState::Idle => {
                        inner.state = ScanState::Idle;
                        return Ok(());
                    }
                    ScanState::Stopping => {}
                }
            }
            released.await;
        };
        let _releasing = Releasing(self);

        task.abort();
        let _ = task.await;
        let stopped = self.transport.stop_scan().await;
        info!("Scan stopped");
        self.bus.publish(Event::ScanStopped);
        stopped
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, ScanState::Active { .. })
    }

    /// The filter of the active session.
    pub fn filter(&self) -> Option<ScanFilter> {
        match &self.inner.lock().unwrap().state {
            ScanState::Active { filter, .. } => Some(filter.clone()),
            _ => None,
        }
    }

    fn release_platform_scan(&self) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.stop_scan().await {
                debug!("Error releasing scan: {}", e);
            }
        });
    }
}

async fn consume_advertisements(
    mut advertisements: AdvertisementStream,
    filter: ScanFilter,
    generation: u64,
    inner: Arc<Mutex<ScanInner>>,
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    registry: Arc<DeviceRegistry>,
) {
    let failure = loop {
        match advertisements.next().await {
            Some(Ok(advertisement)) => {
                if !filter.matches(&advertisement) {
                    trace!("Filtered out {}", advertisement.address);
                    continue;
                }
                let device = registry.register_or_update(
                    advertisement.address,
                    advertisement.name,
                    advertisement.rssi,
                );
                bus.publish(Event::DeviceFound {
                    address: device.address,
                    name: device.name,
                    rssi: advertisement.rssi,
                });
            }
            Some(Err(error)) => break Some(error),
            None => break None,
        }
    };

    if let Err(e) = transport.stop_scan().await {
        debug!("Error releasing scan: {}", e);
    }
    let mut inner = inner.lock().unwrap();
    if !matches!(inner.state, ScanState::Active { generation: g, .. } if g == generation) {
        return;
    }
    inner.state = ScanState::Idle;
    match failure {
        Some(error) => {
            warn!("Scan failed: {}", error);
            bus.publish(Event::ScanError { error });
        }
        None => {
            info!("Scan ended by the platform");
            bus.publish(Event::ScanStopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::bleuuid::uuid_from_u16;
    use crate::api::{Advertisement, BDAddr};
    use crate::mock::MockTransport;

    fn coordinator(transport: &MockTransport, bus: &Arc<EventBus>) -> ScanCoordinator {
        ScanCoordinator::new(
            Arc::new(transport.clone()),
            bus.clone(),
            Arc::default(),
            ScanMode::default(),
        )
    }

    fn sighting(n: u8, name: &str) -> Advertisement {
        Advertisement {
            address: BDAddr::from([0xAA, 0, 0, 0, 0, n]),
            name: Some(name.into()),
            rssi: Some(-60),
            services: vec![uuid_from_u16(0x180d)],
        }
    }

    #[tokio::test]
    async fn second_start_is_rejected_without_platform_call() {
        let transport = MockTransport::new();
        let bus = Arc::new(EventBus::new(16));
        let scan = coordinator(&transport, &bus);

        scan.start(ScanFilter::default()).await.unwrap();
        assert_eq!(
            scan.start(ScanFilter::default()).await,
            Err(Error::AlreadyScanning)
        );
        assert_eq!(transport.scan_starts(), 1);
        assert!(scan.is_scanning());

        scan.stop().await.unwrap();
        assert!(!scan.is_scanning());
        scan.start(ScanFilter::default()).await.unwrap();
        assert_eq!(transport.scan_starts(), 2);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let transport = MockTransport::new();
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let scan = coordinator(&transport, &bus);

        scan.stop().await.unwrap();
        assert_eq!(events.try_recv(), None);

        scan.start(ScanFilter::default()).await.unwrap();
        scan.stop().await.unwrap();
        scan.stop().await.unwrap();
        assert_eq!(events.try_recv(), Some(Event::ScanStarted));
        assert_eq!(events.try_recv(), Some(Event::ScanStopped));
        assert_eq!(events.try_recv(), None);
        assert_eq!(transport.scan_stops(), 1);
    }

    #[tokio::test]
    async fn forwards_every_matching_sighting() {
        let transport = MockTransport::new();
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let scan = coordinator(&transport, &bus);

        scan.start(ScanFilter::default().with_name("HRM"))
            .await
            .unwrap();
        transport.advertise(sighting(1, "HRM"));
        transport.advertise(sighting(2, "Other"));
        transport.advertise(sighting(1, "HRM"));

        assert_eq!(events.recv().await, Some(Event::ScanStarted));
        for _ in 0..2 {
            assert_eq!(
                events.recv().await,
                Some(Event::DeviceFound {
                    address: BDAddr::from([0xAA, 0, 0, 0, 0, 1]),
                    name: Some("HRM".into()),
                    rssi: Some(-60),
                })
            );
        }
        scan.stop().await.unwrap();
        assert_eq!(events.recv().await, Some(Event::ScanStopped));
        assert_eq!(scan.registry.len(), 1);
    }

    #[tokio::test]
    async fn start_waits_for_stop_to_release_the_platform_scan() {
        let transport = MockTransport::new();
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let scan = coordinator(&transport, &bus);

        scan.start(ScanFilter::default()).await.unwrap();
        transport.hold_scan_stops(true);
        let (stopped, started, ()) = tokio::join!(
            scan.stop(),
            scan.start(ScanFilter::default()),
            async {
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                }
                assert_eq!(transport.scan_starts(), 1);
                assert!(!scan.is_scanning());
                transport.hold_scan_stops(false);
            }
        );
        stopped.unwrap();
        started.unwrap();
        assert!(scan.is_scanning());
        assert_eq!(transport.scan_starts(), 2);
        assert_eq!(transport.scan_stops(), 1);

        transport.advertise(sighting(1, "HRM"));
        let mut seen = vec![];
        for _ in 0..4 {
            seen.push(events.recv().await.unwrap().name());
        }
        assert_eq!(
            seen,
            ["scan_started", "scan_stopped", "scan_started", "device_found"]
        );
    }

    #[tokio::test]
    async fn platform_error_ends_the_session() {
        let transport = MockTransport::new();
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let scan = coordinator(&transport, &bus);

        scan.start(ScanFilter::default()).await.unwrap();
        transport.fail_scan(Error::TransportError("scan throttled".into()));
        assert_eq!(events.recv().await, Some(Event::ScanStarted));
        assert_eq!(
            events.recv().await,
            Some(Event::ScanError {
                error: Error::TransportError("scan throttled".into())
            })
        );
        assert!(!scan.is_scanning());
        scan.start(ScanFilter::default()).await.unwrap();
    }
}
