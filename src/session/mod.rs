// blegate Source Code File
//
// Copyright 2025 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! One connection session per device.
//!
//! A session owns the platform link, the GATT queue, the notification subscriptions and a
//! cancellation scope holding every task it spawned (connect, link event pump, GATT worker).
//! All bookkeeping sits behind one mutex, and every event about the device is published while
//! that mutex is held and after the state has been checked. Teardown cancels pending operations
//! and publishes `Disconnected` under the same lock, so nothing about the device can be
//! published after it.

pub(crate) mod queue;
pub(crate) mod state;

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::StreamExt;
use log::{debug, info, trace, warn};
use tokio::sync::{watch, Notify};
use tokio::task::AbortHandle;
use uuid::Uuid;

use self::queue::{OperationKind, OperationQueue};
use self::state::{transition, Effect, Input, SessionState};
use crate::api::{
    BDAddr, ConnectOptions, Event, Link, LinkEvent, LinkEventStream, Service, Transport,
};
use crate::common::event_bus::EventBus;
use crate::common::registry::DeviceRegistry;
use crate::{Error, Result};

pub(crate) type SessionMap = DashMap<BDAddr, Arc<Session>>;

#[derive(Debug, Clone, Default)]
pub(crate) struct SessionConfig {
    pub connect_options: ConnectOptions,
    pub connect_timeout: Option<Duration>,
    pub operation_timeout: Option<Duration>,
}

/// Tasks started on behalf of one session. Cancelling aborts all of them, and anything spawned
/// afterwards is aborted immediately.
#[derive(Debug, Default)]
struct CancelScope {
    tasks: Vec<AbortHandle>,
    cancelled: bool,
}

impl CancelScope {
    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task).abort_handle();
        if self.cancelled {
            handle.abort();
        } else {
            self.tasks.retain(|task| !task.is_finished());
            self.tasks.push(handle);
        }
    }

    fn cancel(&mut self) {
        self.cancelled = true;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[derive(Debug, Default)]
struct SessionInner {
    state: SessionState,
    queue: OperationQueue,
    subscriptions: HashSet<Uuid>,
    services: Vec<Service>,
    link: Option<Arc<dyn Link>>,
    scope: CancelScope,
}

#[derive(Debug)]
pub(crate) struct Session {
    address: BDAddr,
    inner: Mutex<SessionInner>,
    /// Wakes the GATT worker.
    wake: Notify,
    state_changes: watch::Sender<SessionState>,
    config: SessionConfig,
    bus: Arc<EventBus>,
    registry: Arc<DeviceRegistry>,
    sessions: Weak<SessionMap>,
}

impl Session {
    /// Creates a session in `Connecting` and publishes `ConnectStarted`. The link is opened by
    /// [`Session::open_link`], once the session is visible in the session map.
    pub fn connect(
        address: BDAddr,
        config: SessionConfig,
        bus: Arc<EventBus>,
        registry: Arc<DeviceRegistry>,
        sessions: Weak<SessionMap>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            address,
            inner: Mutex::new(SessionInner::default()),
            wake: Notify::new(),
            state_changes: watch::Sender::new(SessionState::Disconnected),
            config,
            bus,
            registry,
            sessions,
        });
        {
            let mut inner = session.lock();
            if let Err(e) = session.apply(&mut inner, Input::ConnectRequested) {
                warn!("{}: cannot start connecting: {}", address, e);
            }
        }
        session
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn services(&self) -> Vec<Service> {
        self.lock().services.clone()
    }

    pub fn subscriptions(&self) -> Vec<Uuid> {
        let mut subscriptions: Vec<Uuid> = self.lock().subscriptions.iter().copied().collect();
        subscriptions.sort();
        subscriptions
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap()
    }

    /// Runs one transition and applies the effects that need no I/O. The I/O effects
    /// (`OpenLink`, `DiscoverServices`, `ReleaseLink`) are returned for the caller to carry out
    /// after releasing the lock.
    fn apply(&self, inner: &mut SessionInner, input: Input) -> Result<Vec<Effect>> {
        let from = inner.state;
        let next = transition(from, input)?;
        if next.state != from {
            debug!("{}: {:?} -> {:?}", self.address, from, next.state);
        }
        inner.state = next.state;
        self.state_changes.send_replace(next.state);

        let address = self.address;
        let mut deferred = vec![];
        for effect in next.effects {
            match effect {
                Effect::EmitConnectStarted => self.bus.publish(Event::ConnectStarted { address }),
                Effect::EmitConnected => self.bus.publish(Event::Connected { address }),
                Effect::EmitConnectError(error) => {
                    self.bus.publish(Event::ConnectError { address, error })
                }
                Effect::EmitDisconnected => self.bus.publish(Event::Disconnected { address }),
                Effect::StartOperations => self.wake.notify_one(),
                Effect::CancelPending => {
                    for operation in inner.queue.cancel_all() {
                        trace!("{}: cancelling {:?}", address, operation.kind);
                        self.bus
                            .publish(operation.kind.failure_event(address, Error::Cancelled));
                    }
                    inner.subscriptions.clear();
                }
                Effect::OpenLink | Effect::DiscoverServices | Effect::ReleaseLink => {
                    deferred.push(effect)
                }
            }
        }
        Ok(deferred)
    }

    /// Starts the platform connection. A no-op if the session was torn down in the meantime.
    pub fn open_link(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        let mut inner = self.lock();
        if inner.state != SessionState::Connecting {
            return;
        }
        let session = self.clone();
        inner.scope.spawn(session.establish(transport));
    }

    async fn establish(self: Arc<Self>, transport: Arc<dyn Transport>) {
        let address = self.address;
        let connected = bounded(
            self.config.connect_timeout,
            transport.connect(address, &self.config.connect_options),
        )
        .await;
        let link: Arc<dyn Link> = match connected {
            Ok(link) => Arc::from(link),
            Err(error) => return self.fail(Input::LinkFailed(error)),
        };
        {
            // Owned by the session from here on, so a teardown can release it.
            let mut inner = self.lock();
            if inner.state != SessionState::Connecting {
                debug!("{}: dropping link opened after teardown", address);
                drop(inner);
                release_detached(address, link);
                return;
            }
            inner.link = Some(link.clone());
        }
        let events = match link.events().await {
            Ok(events) => events,
            Err(error) => {
                if let Some(link) = self.lock().link.take() {
                    release_detached(address, link);
                }
                return self.fail(Input::LinkFailed(error));
            }
        };

        {
            let mut inner = self.lock();
            if let Err(e) = self.apply(&mut inner, Input::LinkEstablished) {
                debug!("{}: dropping link established late ({})", address, e);
                if let Some(link) = inner.link.take() {
                    drop(inner);
                    release_detached(address, link);
                }
                return;
            }
            info!("{}: connected", address);
            inner.scope.spawn(self.clone().pump_link_events(events));
            if let Err(e) = self.apply(&mut inner, Input::DiscoveryStarted) {
                warn!("{}: {}", address, e);
                return;
            }
        }

        let discovered = bounded(self.config.connect_timeout, link.discover_services()).await;
        let mut inner = self.lock();
        match discovered {
            Ok(services) => {
                if inner.state != SessionState::Discovering {
                    return;
                }
                for service in &services {
                    self.bus.publish(Event::ServiceDiscovered {
                        address,
                        service: service.uuid,
                    });
                    for characteristic in &service.characteristics {
                        self.bus.publish(Event::CharacteristicDiscovered {
                            address,
                            service: service.uuid,
                            characteristic: characteristic.uuid,
                            properties: characteristic.properties,
                        });
                    }
                }
                debug!("{}: discovered {} services", address, services.len());
                inner.services = services;
                if self.apply(&mut inner, Input::DiscoveryCompleted).is_ok() {
                    inner.scope.spawn(self.clone().run_operations());
                }
            }
            Err(error) => {
                warn!("{}: service discovery failed: {}", address, error);
                if let Ok(deferred) = self.apply(&mut inner, Input::DiscoveryFailed(error)) {
                    if deferred.contains(&Effect::ReleaseLink) {
                        if let Some(link) = inner.link.take() {
                            release_detached(address, link);
                        }
                    }
                    // This task is part of the scope, so nothing may be awaited after this.
                    inner.scope.cancel();
                    drop(inner);
                    self.terminated();
                }
            }
        }
    }

    fn fail(&self, input: Input) {
        let mut inner = self.lock();
        if let Err(e) = self.apply(&mut inner, input) {
            debug!("{}: ignoring connect failure: {}", self.address, e);
            return;
        }
        info!("{}: connection failed", self.address);
        inner.scope.cancel();
        drop(inner);
        self.terminated();
    }

    async fn pump_link_events(self: Arc<Self>, mut events: LinkEventStream) {
        while let Some(event) = events.next().await {
            match event {
                LinkEvent::Notification(notification) => {
                    let inner = self.lock();
                    if inner.state.is_linked() && inner.subscriptions.contains(&notification.uuid)
                    {
                        self.bus.publish(Event::NotificationReceived {
                            address: self.address,
                            characteristic: notification.uuid,
                            value: notification.value.into(),
                        });
                    } else {
                        trace!(
                            "{}: dropping notification for {}",
                            self.address,
                            notification.uuid
                        );
                    }
                }
                LinkEvent::Disconnected => break,
            }
        }
        self.link_lost();
    }

    /// The platform dropped the link on its own.
    fn link_lost(&self) {
        let mut inner = self.lock();
        if let Err(e) = self.apply(&mut inner, Input::LinkLost) {
            debug!("{}: ignoring link loss: {}", self.address, e);
            return;
        }
        info!("{}: link lost", self.address);
        if let Some(link) = inner.link.take() {
            release_detached(self.address, link);
        }
        // Aborts the calling pump as well; it awaits nothing after this.
        inner.scope.cancel();
        drop(inner);
        self.terminated();
    }

    /// Tears the session down: cancels every pending operation, stops the session's tasks,
    /// releases the link and publishes `Disconnected`. Calls made while a teardown is already
    /// running wait for it to finish.
    pub async fn disconnect(&self) {
        let mut state_changes = self.state_changes.subscribe();
        let released = {
            let mut inner = self.lock();
            let release = matches!(
                self.apply(&mut inner, Input::DisconnectRequested),
                Ok(deferred) if deferred.contains(&Effect::ReleaseLink)
            );
            if release {
                inner.scope.cancel();
                Some(inner.link.take())
            } else {
                None
            }
        };
        let Some(link) = released else {
            let _ = state_changes.wait_for(|state| state.is_terminal()).await;
            return;
        };

        if let Some(link) = link {
            if let Err(e) = link.disconnect().await {
                warn!("{}: error releasing link: {}", self.address, e);
            }
        }

        {
            let mut inner = self.lock();
            if let Err(e) = self.apply(&mut inner, Input::LinkReleased) {
                debug!("{}: {}", self.address, e);
            }
        }
        info!("{}: disconnected", self.address);
        self.terminated();
    }

    /// Queues a GATT operation. Only accepted while the session is ready.
    pub fn enqueue(&self, kind: OperationKind) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SessionState::Ready {
            return Err(Error::NotReady(self.address));
        }
        match &kind {
            OperationKind::Subscribe { characteristic } => {
                inner.subscriptions.insert(*characteristic);
            }
            OperationKind::Unsubscribe { characteristic } => {
                inner.subscriptions.remove(characteristic);
            }
            _ => {}
        }
        let id = inner.queue.push(kind);
        trace!("{}: queued operation {} ({} pending)", self.address, id, inner.queue.len());
        drop(inner);
        self.wake.notify_one();
        Ok(())
    }

    /// The GATT worker. Runs queued operations one at a time for as long as the session lives.
    async fn run_operations(self: Arc<Self>) {
        loop {
            let next = {
                let mut inner = self.lock();
                let link = match (inner.state, &inner.link) {
                    (SessionState::Ready, Some(link)) => Some(link.clone()),
                    _ => None,
                };
                link.and_then(|link| inner.queue.start_next().map(|operation| (operation, link)))
            };
            let Some((operation, link)) = next else {
                self.wake.notified().await;
                continue;
            };

            let result = bounded(
                self.config.operation_timeout,
                operation.kind.execute(link.as_ref()),
            )
            .await;

            self.complete(operation, result);
        }
    }

    fn complete(&self, operation: queue::Operation, result: Result<queue::Outcome>) {
        let mut inner = self.lock();
        if inner.state != SessionState::Ready || !inner.queue.finish(operation.id) {
            trace!("{}: discarding result of cancelled operation", self.address);
            return;
        }
        match (&operation.kind, &result) {
            (OperationKind::Subscribe { characteristic }, Err(_)) => {
                inner.subscriptions.remove(characteristic);
            }
            (OperationKind::ReadRssi, Ok(queue::Outcome::Rssi(rssi))) => {
                self.registry.update_rssi(&self.address, *rssi);
            }
            _ => {}
        }
        self.bus
            .publish(operation.kind.completion_event(self.address, result));
    }

    fn terminated(&self) {
        if let Some(sessions) = self.sessions.upgrade() {
            sessions.remove_if(&self.address, |_, session| {
                std::ptr::eq(Arc::as_ptr(session), self)
            });
        }
    }
}

fn release_detached(address: BDAddr, link: Arc<dyn Link>) {
    tokio::spawn(async move {
        if let Err(e) = link.disconnect().await {
            debug!("{}: error releasing link: {}", address, e);
        }
    });
}

async fn bounded<T>(limit: Option<Duration>, task: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .unwrap_or(Err(Error::TimedOut(limit))),
        None => task.await,
    }
}
