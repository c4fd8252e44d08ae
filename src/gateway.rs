// blegate Source Code File
//
// Copyright 2025 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The caller-facing command surface.
//!
//! Every command returns as soon as its preconditions are checked. A precondition failure is
//! returned as `Err` and published as the matching error event; everything that happens later
//! (platform results, notifications, link loss) is only published.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use log::{debug, info, warn};
use static_assertions::assert_impl_all;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::api::{
    AllowAll, BDAddr, Device, Event, Permission, PermissionCheck, ScanFilter, Service,
    SessionState, Transport, WriteType,
};
use crate::command::Command;
use crate::common::event_bus::{EventBus, EventSubscription};
use crate::common::registry::DeviceRegistry;
use crate::config::GatewayConfig;
use crate::scan::ScanCoordinator;
use crate::session::queue::OperationKind;
use crate::session::{Session, SessionConfig, SessionMap};
use crate::{hex, Error, Result};

/// Smallest ATT MTU allowed by the Bluetooth core specification.
pub const MIN_MTU: u16 = 23;
/// Largest ATT MTU allowed by the Bluetooth core specification.
pub const MAX_MTU: u16 = 517;

/// A running BLE gateway over one [`Transport`].
///
/// Must be started from within a tokio runtime; every task it spawns runs there.
pub struct Gateway {
    transport: Arc<dyn Transport>,
    permissions: Box<dyn PermissionCheck>,
    config: GatewayConfig,
    bus: Arc<EventBus>,
    registry: Arc<DeviceRegistry>,
    scan: ScanCoordinator,
    sessions: Arc<SessionMap>,
    pairing: Mutex<Vec<AbortHandle>>,
    stopped: AtomicBool,
}

assert_impl_all!(Gateway: Send, Sync);
assert_impl_all!(EventSubscription: Send);

impl Gateway {
    /// Starts a gateway that is allowed to scan and connect.
    pub fn start(transport: impl Transport, config: GatewayConfig) -> Self {
        Self::with_permissions(transport, config, AllowAll)
    }

    /// Starts a gateway that asks `permissions` before every scan, connect and pair.
    pub fn with_permissions(
        transport: impl Transport,
        config: GatewayConfig,
        permissions: impl PermissionCheck + 'static,
    ) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let bus = Arc::new(EventBus::new(config.event_capacity()));
        let registry = Arc::new(DeviceRegistry::default());
        let scan = ScanCoordinator::new(
            transport.clone(),
            bus.clone(),
            registry.clone(),
            config.scan_mode,
        );
        info!("Gateway started");
        Self {
            transport,
            permissions: Box::new(permissions),
            config,
            bus,
            registry,
            scan,
            sessions: Arc::default(),
            pairing: Mutex::default(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Subscribes to every event published from now on.
    pub fn subscribe_events(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    /// Every device sighted or connected so far, ordered by address.
    pub fn devices(&self) -> Vec<Device> {
        self.registry.devices()
    }

    pub fn device(&self, address: BDAddr) -> Result<Device> {
        self.registry.get(&address)
    }

    /// State of the device's live session, `Disconnected` if there is none.
    pub fn session_state(&self, address: BDAddr) -> SessionState {
        self.sessions
            .get(&address)
            .map(|session| session.state())
            .unwrap_or_default()
    }

    /// Services discovered on the device's live session.
    pub fn services(&self, address: BDAddr) -> Result<Vec<Service>> {
        Ok(self.session(address)?.services())
    }

    /// Characteristics with notifications requested on the device's live session.
    pub fn subscriptions(&self, address: BDAddr) -> Result<Vec<Uuid>> {
        Ok(self.session(address)?.subscriptions())
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_scanning()
    }

    pub fn scan_filter(&self) -> Option<ScanFilter> {
        self.scan.filter()
    }

    fn check_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            Err(Error::GatewayStopped)
        } else {
            Ok(())
        }
    }

    /// Publishes the error event for a failed precondition and returns the error.
    fn reject(&self, error: Error, event: impl FnOnce(Error) -> Event) -> Result<()> {
        debug!("Rejected: {}", error);
        self.bus.publish(event(error.clone()));
        Err(error)
    }

    fn session(&self, address: BDAddr) -> Result<Arc<Session>> {
        self.sessions
            .get(&address)
            .map(|session| session.value().clone())
            .ok_or(Error::NotFound(address))
    }

    pub async fn start_scan(&self, filter: ScanFilter) -> Result<()> {
        self.check_running()?;
        if !self.permissions.check(Permission::Scan) {
            return self.reject(Error::PermissionDenied, |error| Event::ScanError { error });
        }
        match self.scan.start(filter).await {
            Ok(()) => Ok(()),
            Err(error) => self.reject(error, |error| Event::ScanError { error }),
        }
    }

    /// Stops the running scan. A no-op when nothing is scanning.
    pub async fn stop_scan(&self) -> Result<()> {
        self.check_running()?;
        match self.scan.stop().await {
            Ok(()) => Ok(()),
            Err(error) => self.reject(error, |error| Event::ScanError { error }),
        }
    }

    /// Opens a connection session. Progress is reported as `ConnectStarted`, `Connected`, the
    /// discovery events, and either readiness for GATT operations or `ConnectError`.
    pub async fn connect(&self, address: BDAddr) -> Result<()> {
        self.check_running()?;
        if !self.permissions.check(Permission::Connect) {
            return self.reject(Error::PermissionDenied, |error| Event::ConnectError {
                address,
                error,
            });
        }
        self.registry.register_or_update(address, None, None);

        let session = match self.sessions.entry(address) {
            Entry::Occupied(mut entry) => {
                let state = entry.get().state();
                if !state.is_terminal() {
                    drop(entry);
                    let error = if state == SessionState::Connecting {
                        Error::AlreadyConnecting(address)
                    } else {
                        Error::AlreadyConnected(address)
                    };
                    return self.reject(error, |error| Event::ConnectError { address, error });
                }
                let session = self.new_session(address);
                entry.insert(session.clone());
                session
            }
            Entry::Vacant(entry) => {
                let session = self.new_session(address);
                entry.insert(session.clone());
                session
            }
        };
        // A shutdown that started after the first check may have missed this session.
        if self.stopped.load(Ordering::SeqCst) {
            debug!("{}: gateway stopped while connecting", address);
            session.disconnect().await;
            return Err(Error::GatewayStopped);
        }
        info!("Connecting to {}", address);
        session.open_link(self.transport.clone());
        Ok(())
    }

    fn new_session(&self, address: BDAddr) -> Arc<Session> {
        Session::connect(
            address,
            SessionConfig {
                connect_options: self.config.connect_options(),
                connect_timeout: self.config.connect_timeout,
                operation_timeout: self.config.operation_timeout,
            },
            self.bus.clone(),
            self.registry.clone(),
            Arc::downgrade(&self.sessions),
        )
    }

    /// Tears down the device's session. Pending operations complete with `Cancelled` before the
    /// final `Disconnected` event. A no-op if the device has no live session.
    pub async fn disconnect(&self, address: BDAddr) -> Result<()> {
        self.check_running()?;
        match self.session(address) {
            Ok(session) => {
                session.disconnect().await;
                Ok(())
            }
            Err(_) => {
                debug!("Disconnect of {}: no live session", address);
                Ok(())
            }
        }
    }

    async fn enqueue(&self, address: BDAddr, kind: OperationKind) -> Result<()> {
        self.check_running()?;
        let queued = self
            .session(address)
            .and_then(|session| session.enqueue(kind.clone()));
        match queued {
            Ok(()) => Ok(()),
            Err(error) => self.reject(error, |error| kind.failure_event(address, error)),
        }
    }

    pub async fn read_characteristic(&self, address: BDAddr, characteristic: Uuid) -> Result<()> {
        self.enqueue(address, OperationKind::Read { characteristic })
            .await
    }

    /// Writes a hex-encoded payload with the configured default write type.
    pub async fn write_characteristic(
        &self,
        address: BDAddr,
        characteristic: Uuid,
        value: &str,
    ) -> Result<()> {
        self.check_running()?;
        let data = match hex::decode(value) {
            Ok(data) => data,
            Err(error) => {
                return self.reject(error, |error| Event::WriteError {
                    address,
                    characteristic,
                    error,
                })
            }
        };
        self.write_characteristic_bytes(address, characteristic, data, self.config.default_write_type)
            .await
    }

    pub async fn write_characteristic_bytes(
        &self,
        address: BDAddr,
        characteristic: Uuid,
        data: Vec<u8>,
        write_type: WriteType,
    ) -> Result<()> {
        self.enqueue(
            address,
            OperationKind::Write {
                characteristic,
                data,
                write_type,
            },
        )
        .await
    }

    /// Requests notifications. Once this returns, notifications for the characteristic are
    /// delivered as `NotificationReceived` until unsubscribed or disconnected.
    pub async fn subscribe_notifications(
        &self,
        address: BDAddr,
        characteristic: Uuid,
    ) -> Result<()> {
        self.enqueue(address, OperationKind::Subscribe { characteristic })
            .await
    }

    /// Stops notifications. No `NotificationReceived` for the characteristic is published after
    /// this returns.
    pub async fn unsubscribe_notifications(
        &self,
        address: BDAddr,
        characteristic: Uuid,
    ) -> Result<()> {
        self.enqueue(address, OperationKind::Unsubscribe { characteristic })
            .await
    }

    /// Asks the platform to bond with the device, once the platform stack is ready. Reports
    /// `PairingInitiated` or `PairingError`; bonding completion is not tracked.
    pub async fn pair(&self, address: BDAddr) -> Result<()> {
        self.check_running()?;
        if !self.permissions.check(Permission::Connect) {
            return self.reject(Error::PermissionDenied, |error| Event::PairingError {
                address,
                error,
            });
        }
        let transport = self.transport.clone();
        let bus = self.bus.clone();
        let task = tokio::spawn(async move {
            let requested = match transport.wait_ready().await {
                Ok(()) => transport.pair(address).await,
                Err(e) => Err(e),
            };
            match requested {
                Ok(()) => {
                    info!("Pairing with {} initiated", address);
                    bus.publish(Event::PairingInitiated { address });
                }
                Err(error) => {
                    warn!("Pairing with {} failed: {}", address, error);
                    bus.publish(Event::PairingError { address, error });
                }
            }
        });
        let mut pairing = self.pairing.lock().unwrap();
        pairing.retain(|task| !task.is_finished());
        pairing.push(task.abort_handle());
        Ok(())
    }

    pub async fn request_mtu(&self, address: BDAddr, mtu: u16) -> Result<()> {
        self.check_running()?;
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            let error = Error::InvalidArgument(format!(
                "MTU {} outside {}..={}",
                mtu, MIN_MTU, MAX_MTU
            ));
            return self.reject(error, |error| Event::MtuError { address, error });
        }
        self.enqueue(address, OperationKind::RequestMtu { mtu })
            .await
    }

    pub async fn read_rssi(&self, address: BDAddr) -> Result<()> {
        self.enqueue(address, OperationKind::ReadRssi).await
    }

    /// Runs a command parsed from the text surface.
    pub async fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::StartScan(filter) => self.start_scan(filter).await,
            Command::StopScan => self.stop_scan().await,
            Command::Connect(address) => self.connect(address).await,
            Command::Disconnect(address) => self.disconnect(address).await,
            Command::Read {
                address,
                characteristic,
            } => self.read_characteristic(address, characteristic).await,
            Command::Write {
                address,
                characteristic,
                value,
            } => {
                self.write_characteristic_bytes(
                    address,
                    characteristic,
                    value.into_bytes(),
                    self.config.default_write_type,
                )
                .await
            }
            Command::Subscribe {
                address,
                characteristic,
            } => self.subscribe_notifications(address, characteristic).await,
            Command::Unsubscribe {
                address,
                characteristic,
            } => self.unsubscribe_notifications(address, characteristic).await,
            Command::Pair(address) => self.pair(address).await,
            Command::RequestMtu { address, mtu } => self.request_mtu(address, mtu).await,
            Command::ReadRssi(address) => self.read_rssi(address).await,
        }
    }

    /// Stops the scan, tears down every session, cancels pairing requests and releases the
    /// transport, in that order. Subscriptions end once they have received what was published
    /// before. Every command fails with `GatewayStopped` afterwards.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down gateway");
        if let Err(e) = self.scan.stop().await {
            warn!("Error stopping scan during shutdown: {}", e);
        }

        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|session| session.value().clone())
            .collect();
        debug!("Tearing down {} sessions", sessions.len());
        join_all(sessions.iter().map(|session| session.disconnect())).await;
        self.sessions.clear();

        for task in self.pairing.lock().unwrap().drain(..) {
            task.abort();
        }

        if let Err(e) = self.transport.shutdown().await {
            warn!("Error releasing transport: {}", e);
        }
        self.bus.close();
    }
}
