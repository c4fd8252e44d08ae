// blegate Source Code File
//
// Copyright 2025 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The `api` module contains the types shared between the gateway, its callers and its transports.

mod bdaddr;
pub mod bleuuid;
mod event;
mod permission;
mod transport;

use std::time::SystemTime;

use bitflags::bitflags;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;
use uuid::Uuid;

pub use self::bdaddr::{BDAddr, ParseBDAddrError};
pub use self::event::Event;
pub use self::permission::{AllowAll, Permission, PermissionCheck};
pub use self::transport::{
    AdvertisementStream, ConnectOptions, Link, LinkEvent, LinkEventStream, Transport,
};
pub use crate::hex::HexValue;
pub use crate::session::state::SessionState;

bitflags! {
    /// A set of properties that indicate what operations are supported by a Characteristic.
    #[cfg_attr(
        feature = "serde",
        derive(Serialize, Deserialize),
        serde(crate = "serde_cr")
    )]
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct CharPropFlags: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// A GATT characteristic as reported by service discovery.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub properties: CharPropFlags,
}

/// A GATT service and its characteristics.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Service {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<Characteristic>,
}

/// A notification or indication received from a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueNotification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

/// The type of write operation to use.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    /// A write operation where the device is expected to respond with a confirmation or error.
    #[default]
    WithResponse,
    /// A write-without-response, also known as a command.
    WithoutResponse,
}

/// One advertising report, as delivered by [`Transport::start_scan`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Advertisement {
    pub address: BDAddr,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

/// Filters applied to a scan. An empty filter matches every advertisement.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr", default)
)]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanFilter {
    /// Exact advertised local name.
    pub name: Option<String>,
    pub address: Option<BDAddr>,
    /// Matches if the advertisement carries any of these services.
    pub services: Vec<Uuid>,
}

impl ScanFilter {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_address(mut self, address: BDAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_service(mut self, service: Uuid) -> Self {
        self.services.push(service);
        self
    }

    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        if let Some(name) = &self.name {
            if advertisement.name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(address) = self.address {
            if advertisement.address != address {
                return false;
            }
        }
        self.services.is_empty()
            || self
                .services
                .iter()
                .any(|service| advertisement.services.contains(service))
    }
}

/// A peer known to the gateway's device registry.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub address: BDAddr,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub discovered_at: SystemTime,
    pub last_seen: SystemTime,
    /// Not sighted since the latest scan started.
    pub stale: bool,
}

#[cfg(test)]
mod tests {
    use super::bleuuid::uuid_from_u16;
    use super::*;

    fn advertisement() -> Advertisement {
        Advertisement {
            address: "AA:BB:CC:DD:EE:01".parse().unwrap(),
            name: Some("Pawtronics-RD1".into()),
            rssi: Some(-60),
            services: vec![uuid_from_u16(0x1802)],
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(ScanFilter::default().matches(&advertisement()));
        assert!(ScanFilter::default().matches(&Advertisement::default()));
    }

    #[test]
    fn name_filter_is_exact() {
        assert!(ScanFilter::default()
            .with_name("Pawtronics-RD1")
            .matches(&advertisement()));
        assert!(!ScanFilter::default()
            .with_name("Pawtronics")
            .matches(&advertisement()));
        assert!(!ScanFilter::default()
            .with_name("Pawtronics-RD1")
            .matches(&Advertisement::default()));
    }

    #[test]
    fn all_filters_must_match() {
        let filter = ScanFilter::default()
            .with_address("aa:bb:cc:dd:ee:01".parse().unwrap())
            .with_service(uuid_from_u16(0x180d))
            .with_service(uuid_from_u16(0x1802));
        assert!(filter.matches(&advertisement()));

        let filter = filter.with_address("AA:BB:CC:DD:EE:02".parse().unwrap());
        assert!(!filter.matches(&advertisement()));

        let filter = ScanFilter::default().with_service(uuid_from_u16(0x180d));
        assert!(!filter.matches(&advertisement()));
    }
}
