//! Hardware address of a BLE peer.

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};
#[cfg(feature = "serde")]
use serde_cr as serde;

/// The 6 byte address used to identify a Bluetooth device.
///
/// Displayed the way Android and BlueZ print addresses: colon separated, uppercase,
/// most significant byte first.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct BDAddr {
    address: [u8; 6],
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ParseBDAddrError {
    #[error("Bluetooth address has to be 6 bytes long")]
    IncorrectByteCount,
    #[error("Invalid digit in address: {0}")]
    InvalidDigit(String),
}

impl BDAddr {
    pub const fn new(address: [u8; 6]) -> Self {
        Self { address }
    }

    /// Destruct the address into the underlying array.
    pub fn into_inner(self) -> [u8; 6] {
        self.address
    }

    /// Lowercase form without delimiters, e.g. `1f2a00cc22f1`.
    pub fn to_string_no_delim(&self) -> String {
        hex::encode(self.address)
    }

    fn from_parts<'a>(parts: impl Iterator<Item = &'a str>) -> Result<Self, ParseBDAddrError> {
        let mut address = [0; 6];
        let mut count = 0;
        for part in parts {
            if count == address.len() {
                return Err(ParseBDAddrError::IncorrectByteCount);
            }
            if part.len() != 2 {
                return Err(ParseBDAddrError::InvalidDigit(part.to_string()));
            }
            address[count] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseBDAddrError::InvalidDigit(part.to_string()))?;
            count += 1;
        }
        if count != address.len() {
            return Err(ParseBDAddrError::IncorrectByteCount);
        }
        Ok(Self { address })
    }
}

impl Display for BDAddr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let a = &self.address;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

impl Debug for BDAddr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        <Self as Display>::fmt(self, f)
    }
}

impl From<[u8; 6]> for BDAddr {
    /// `address[0]` is the most significant byte.
    fn from(address: [u8; 6]) -> Self {
        Self { address }
    }
}

impl FromStr for BDAddr {
    type Err = ParseBDAddrError;

    /// Parses `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` or `aabbccddeeff`, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(':') {
            Self::from_parts(s.split(':'))
        } else if s.contains('-') {
            Self::from_parts(s.split('-'))
        } else {
            if s.len() != 12 {
                return Err(ParseBDAddrError::IncorrectByteCount);
            }
            let mut address = [0; 6];
            hex::decode_to_slice(s, &mut address)
                .map_err(|_| ParseBDAddrError::InvalidDigit(s.to_string()))?;
            Ok(Self { address })
        }
    }
}

#[cfg(feature = "serde")]
impl Serialize for BDAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for BDAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
