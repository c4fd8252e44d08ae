use std::fmt::Debug;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;
use uuid::Uuid;

use super::{Advertisement, BDAddr, ScanFilter, Service, ValueNotification, WriteType};
use crate::config::ScanMode;
use crate::Result;

/// Advertising reports for the running scan. An `Err` item ends the scan.
pub type AdvertisementStream = Pin<Box<dyn Stream<Item = Result<Advertisement>> + Send>>;

/// Unsolicited traffic on a connected link.
pub type LinkEventStream = Pin<Box<dyn Stream<Item = LinkEvent> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Notification(ValueNotification),
    /// The peer or the platform dropped the link.
    Disconnected,
}

/// Options passed through to the platform connect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectOptions {
    /// Let the platform connect in the background whenever the peer becomes available, instead
    /// of a direct connection attempt.
    pub auto_connect: bool,
}

/// The platform BLE stack, seen from the central role: discovery, connection establishment and
/// bonding. This is the "adapter" half of the transport seam; [`Link`] is the per-connection half.
///
/// Implementations run their own I/O scheduling. The gateway never calls `start_scan` twice
/// without a `stop_scan` in between, and releases every link it opened before `shutdown`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Starts platform discovery. The services of `filter` should be pushed down to the
    /// platform when it supports it; the gateway applies the whole filter again anyway.
    async fn start_scan(&self, filter: &ScanFilter, mode: ScanMode) -> Result<AdvertisementStream>;

    /// Stops discovery and releases the platform scan handle.
    async fn stop_scan(&self) -> Result<()>;

    /// Establishes a connection. The returned link is owned by exactly one session.
    async fn connect(&self, address: BDAddr, options: &ConnectOptions) -> Result<Box<dyn Link>>;

    /// Resolves once the platform stack is ready to accept a bonding request.
    async fn wait_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Issues the bonding request. Returns once the request is accepted, not once bonded.
    async fn pair(&self, address: BDAddr) -> Result<()>;

    /// Releases the platform handle. Called once, last, by gateway shutdown.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// One established connection. GATT calls on a link are never issued concurrently by the
/// gateway: each completes (or is dropped by cancellation) before the next one starts.
#[async_trait]
pub trait Link: Send + Sync + Debug {
    fn address(&self) -> BDAddr;

    /// Discovers all services and their characteristics.
    async fn discover_services(&self) -> Result<Vec<Service>>;

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    async fn write(&self, characteristic: Uuid, data: &[u8], write_type: WriteType) -> Result<()>;

    /// Enables notify or indicate (depending on support) for the characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Negotiates the ATT MTU and returns the value agreed with the peer.
    async fn request_mtu(&self, mtu: u16) -> Result<u16>;

    async fn read_rssi(&self) -> Result<i16>;

    /// Notifications for every subscribed characteristic, and the link's own disconnection.
    /// The gateway takes this stream once, right after the link is established.
    async fn events(&self) -> Result<LinkEventStream>;

    /// Terminates the connection.
    async fn disconnect(&self) -> Result<()>;
}
