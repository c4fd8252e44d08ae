// blegate Source Code File
//
// Copyright 2025 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use std::time::SystemTime;

use dashmap::DashMap;
use log::trace;

use crate::api::{BDAddr, Device};
use crate::{Error, Result};

/// Metadata for every peer the gateway has sighted or tried to connect to.
///
/// Scan callbacks and connection callbacks write concurrently; each upsert is atomic per
/// address. Devices are never removed.
#[derive(Debug, Default)]
pub(crate) struct DeviceRegistry {
    devices: DashMap<BDAddr, Device>,
}

impl DeviceRegistry {
    /// Inserts the device or refreshes it. `None` fields keep their previous value.
    pub fn register_or_update(
        &self,
        address: BDAddr,
        name: Option<String>,
        rssi: Option<i16>,
    ) -> Device {
        let now = SystemTime::now();
        let mut device = self.devices.entry(address).or_insert_with(|| {
            trace!("Registering device {}", address);
            Device {
                address,
                name: None,
                rssi: None,
                discovered_at: now,
                last_seen: now,
                stale: false,
            }
        });
        if name.is_some() {
            device.name = name;
        }
        if rssi.is_some() {
            device.rssi = rssi;
        }
        device.last_seen = now;
        device.stale = false;
        device.value().clone()
    }

    /// Records a fresh RSSI reading for a known device. Unknown devices are ignored.
    pub fn update_rssi(&self, address: &BDAddr, rssi: i16) {
        if let Some(mut device) = self.devices.get_mut(address) {
            device.rssi = Some(rssi);
            device.last_seen = SystemTime::now();
        }
    }

    pub fn get(&self, address: &BDAddr) -> Result<Device> {
        self.devices
            .get(address)
            .map(|device| device.value().clone())
            .ok_or(Error::NotFound(*address))
    }

    /// All known devices, ordered by address.
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .map(|device| device.value().clone())
            .collect();
        devices.sort_by_key(|device| device.address);
        devices
    }

    /// Called when a scan starts: a device stays stale until it is sighted again.
    pub fn mark_all_stale(&self) {
        self.devices
            .iter_mut()
            .for_each(|mut device| device.stale = true);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> BDAddr {
        BDAddr::from([0xAA, 0, 0, 0, 0, n])
    }

    #[test]
    fn upsert_is_idempotent_and_keeps_known_fields() {
        let registry = DeviceRegistry::default();
        let first = registry.register_or_update(addr(1), Some("Sensor".into()), Some(-70));
        let second = registry.register_or_update(addr(1), None, None);
        assert_eq!(registry.len(), 1);
        assert_eq!(second.name.as_deref(), Some("Sensor"));
        assert_eq!(second.rssi, Some(-70));
        assert_eq!(second.discovered_at, first.discovered_at);
        assert!(second.last_seen >= first.last_seen);

        let third = registry.register_or_update(addr(1), Some("Renamed".into()), Some(-40));
        assert_eq!(third.name.as_deref(), Some("Renamed"));
        assert_eq!(third.rssi, Some(-40));
    }

    #[test]
    fn unknown_devices_are_not_found() {
        let registry = DeviceRegistry::default();
        assert_eq!(registry.get(&addr(9)), Err(Error::NotFound(addr(9))));
        registry.update_rssi(&addr(9), -10);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn stale_until_sighted_again() {
        let registry = DeviceRegistry::default();
        registry.register_or_update(addr(2), None, None);
        registry.register_or_update(addr(1), None, None);
        registry.mark_all_stale();
        assert!(registry.devices().iter().all(|d| d.stale));

        registry.register_or_update(addr(2), None, Some(-50));
        let devices = registry.devices();
        assert_eq!(devices[0].address, addr(1));
        assert!(devices[0].stale);
        assert!(!devices[1].stale);
        assert_eq!(registry.get(&addr(2)).unwrap().rssi, Some(-50));
    }
}
