//! Utilities for dealing with BLE UUIDs, converting to and from their short formats.

use uuid::Uuid;

use crate::{Error, Result};

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;
const BLUETOOTH_BASE_MASK: u128 = 0x00000000_ffff_ffff_ffff_ffffffffffff;
const BLUETOOTH_BASE_MASK_16: u128 = 0xffff0000_ffff_ffff_ffff_ffffffffffff;

/// Convert a 32-bit BLE short UUID to a full 128-bit UUID by filling in the standard Bluetooth Base
/// UUID.
pub const fn uuid_from_u32(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Convert a 16-bit BLE short UUID to a full 128-bit UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    uuid_from_u32(short as u32)
}

/// Parses a characteristic or service UUID as accepted on the text command surface.
///
/// Full 128-bit UUIDs are accepted in any form `uuid` understands. Short forms of 4 or 8 hex
/// digits, optionally prefixed with `0x`, are expanded with the Bluetooth Base UUID.
pub fn parse_uuid(s: &str) -> Result<Uuid> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let is_hex = !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit());
    match digits.len() {
        4 if is_hex => u16::from_str_radix(digits, 16)
            .map(uuid_from_u16)
            .map_err(|e| Error::InvalidArgument(format!("{}: {}", s, e))),
        8 if is_hex => u32::from_str_radix(digits, 16)
            .map(uuid_from_u32)
            .map_err(|e| Error::InvalidArgument(format!("{}: {}", s, e))),
        _ => Uuid::parse_str(s).map_err(|e| Error::InvalidArgument(format!("{}: {}", s, e))),
    }
}

/// An extension trait for `Uuid` which provides BLE-specific methods.
pub trait BleUuid {
    /// If the UUID is a valid 16-bit BLE short UUID then return its short form.
    fn to_ble_u16(&self) -> Option<u16>;

    /// If the UUID is a valid BLE short UUID then return its short form.
    fn to_ble_u32(&self) -> Option<u32>;

    /// Convert the UUID to a string, using short format if applicable. Used in log output.
    fn to_short_string(&self) -> String;
}

impl BleUuid for Uuid {
    fn to_ble_u16(&self) -> Option<u16> {
        let value = self.as_u128();
        (value & BLUETOOTH_BASE_MASK_16 == BLUETOOTH_BASE_UUID).then(|| (value >> 96) as u16)
    }

    fn to_ble_u32(&self) -> Option<u32> {
        let value = self.as_u128();
        (value & BLUETOOTH_BASE_MASK == BLUETOOTH_BASE_UUID).then(|| (value >> 96) as u32)
    }

    fn to_short_string(&self) -> String {
        match (self.to_ble_u16(), self.to_ble_u32()) {
            (Some(short), _) => format!("{:#06x}", short),
            (None, Some(short)) => format!("{:#010x}", short),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_forms() {
        let alert = Uuid::parse_str("00002a06-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(parse_uuid("2a06"), Ok(alert));
        assert_eq!(parse_uuid("0x2A06"), Ok(alert));
        assert_eq!(parse_uuid("00002a06"), Ok(alert));
        assert_eq!(parse_uuid("00002a06-0000-1000-8000-00805f9b34fb"), Ok(alert));
        assert_eq!(
            parse_uuid("12345678"),
            Ok(Uuid::parse_str("12345678-0000-1000-8000-00805f9b34fb").unwrap())
        );
    }

    #[test]
    fn parses_vendor_uuids_unchanged() {
        let uuid = "6e400002-b534-f393-67a9-e50e24dcca9e";
        assert_eq!(parse_uuid(uuid), Ok(Uuid::parse_str(uuid).unwrap()));
    }

    #[test]
    fn rejects_malformed_uuids() {
        for bad in ["", "0x", "2a0", "2a06x", "zzzz", "00002a06-0000-1000-8000"] {
            assert!(
                matches!(parse_uuid(bad), Err(Error::InvalidArgument(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn short_strings() {
        assert_eq!(uuid_from_u16(0x1122).to_short_string(), "0x1122");
        assert_eq!(uuid_from_u32(0x11223344).to_short_string(), "0x11223344");
        let long = "12345678-9000-1000-8000-00805f9b34fb";
        assert_eq!(Uuid::parse_str(long).unwrap().to_short_string(), long);
        assert_eq!(Uuid::nil().to_ble_u16(), None);
    }
}
