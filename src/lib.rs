// blegate Source Code File
//
// Copyright 2025 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! blegate is a Bluetooth Low Energy (BLE) central gateway core.
//!
//! It sits between an embedding caller (a game loop, a scripting host, a daemon) and a platform
//! BLE stack. The caller issues fire-and-forget commands on a [`Gateway`](gateway::Gateway) and
//! observes every outcome as an [`Event`](api::Event) on a single ordered event stream.
//!
//! The gateway owns:
//!
//! - a device registry, keyed by [`BDAddr`](api::BDAddr);
//! - a scan coordinator, which allows one discovery session at a time;
//! - one connection session per connected device, which serializes GATT operations and owns the
//!   cancellation scope for everything it started;
//! - an event bus with bounded per-subscriber buffering.
//!
//! The platform stack is consumed through the [`Transport`](api::Transport) and
//! [`Link`](api::Link) traits. With the `platform` feature, [`platform::BtleplugTransport`]
//! implements them on top of btleplug.
//!
//! ```no_run
//! # async fn run(transport: impl blegate::api::Transport) -> blegate::Result<()> {
//! use blegate::api::{Event, ScanFilter};
//! use blegate::gateway::Gateway;
//!
//! let gateway = Gateway::start(transport, Default::default());
//! let mut events = gateway.subscribe_events();
//! gateway.start_scan(ScanFilter::default()).await?;
//! while let Some(event) = events.recv().await {
//!     if let Event::DeviceFound { address, .. } = event {
//!         gateway.connect(address).await?;
//!         break;
//!     }
//! }
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::result;
use std::time::Duration;

use crate::api::{BDAddr, SessionState};

pub mod api;
pub mod command;
mod common;
pub mod config;
pub mod gateway;
pub mod hex;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(feature = "platform")]
pub mod platform;
mod scan;
mod session;

pub use common::event_bus::{EventBus, EventSubscription};

/// The main error type returned by most methods in blegate, and carried by error events.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum Error {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("A scan is already running")]
    AlreadyScanning,

    #[error("Device {0} is already connected")]
    AlreadyConnected(BDAddr),

    #[error("Device {0} is already connecting")]
    AlreadyConnecting(BDAddr),

    #[error("Device {0} not found")]
    NotFound(BDAddr),

    #[error("Device {0} is not ready for GATT operations")]
    NotReady(BDAddr),

    #[error("{0}")]
    TransportError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Event subscriber overflowed, {0} events dropped")]
    Overflow(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid session transition: {input} while {state:?}")]
    InvalidTransition {
        state: SessionState,
        input: &'static str,
    },

    #[error("The gateway has been shut down")]
    GatewayStopped,
}

/// Convenience type for a result using the blegate [`Error`] type.
pub type Result<T> = result::Result<T, Error>;

impl From<api::ParseBDAddrError> for Error {
    fn from(e: api::ParseBDAddrError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(e: uuid::Error) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}
