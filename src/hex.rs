//! Byte payloads as they cross the caller boundary.
//!
//! Values are hex strings: even length, case-insensitive when parsed, uppercase when printed.

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use crate::{Error, Result};

/// Encodes bytes as uppercase hex.
pub fn encode(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Decodes a hex string. Odd lengths and non-hex digits fail with [`Error::InvalidArgument`].
pub fn decode(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.trim()).map_err(|e| Error::InvalidArgument(format!("hex payload {:?}: {}", s, e)))
}

/// A byte payload carried by an [`Event`](crate::api::Event).
///
/// Holds the raw bytes and formats them as uppercase hex.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct HexValue(Vec<u8>);

impl HexValue {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for HexValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for HexValue {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl FromStr for HexValue {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode(s).map(Self)
    }
}

impl Display for HexValue {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&encode(&self.0))
    }
}

impl Debug for HexValue {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "HexValue({})", self)
    }
}

impl PartialEq<&str> for HexValue {
    fn eq(&self, other: &&str) -> bool {
        decode(other).map(|bytes| bytes == self.0).unwrap_or(false)
    }
}
