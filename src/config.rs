//! Gateway configuration.
//!
//! Everything has a default, so `GatewayConfig::default()` is a working setup. With the `serde`
//! feature the config deserializes from any serde format, with missing fields defaulted:
//!
//! ```toml
//! event_buffer = 64
//! scan_mode = "Balanced"
//! operation_timeout = { secs = 5, nanos = 0 }
//! ```

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;

use crate::api::{ConnectOptions, WriteType};

/// Radio duty cycle requested from the platform while scanning.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanMode {
    LowPower,
    Balanced,
    #[default]
    LowLatency,
}

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr", default)
)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Events buffered per subscriber before the oldest are dropped. At least 1, rounded up to a
    /// power of two.
    pub event_buffer: usize,
    pub scan_mode: ScanMode,
    /// Passed to the platform connect call.
    pub auto_connect: bool,
    /// Write type used by [`Gateway::write_characteristic`](crate::gateway::Gateway::write_characteristic).
    pub default_write_type: WriteType,
    /// Upper bound for a single GATT operation. `None` leaves it to the platform.
    pub operation_timeout: Option<Duration>,
    /// Upper bound for link establishment, and separately for service discovery.
    pub connect_timeout: Option<Duration>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            scan_mode: ScanMode::default(),
            auto_connect: false,
            default_write_type: WriteType::WithResponse,
            operation_timeout: None,
            connect_timeout: None,
        }
    }
}

impl GatewayConfig {
    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    pub fn with_scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.scan_mode = scan_mode;
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn with_default_write_type(mut self, write_type: WriteType) -> Self {
        self.default_write_type = write_type;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub(crate) fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            auto_connect: self.auto_connect,
        }
    }

    pub(crate) fn event_capacity(&self) -> usize {
        self.event_buffer.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_a_direct_low_latency_setup() {
        let config = GatewayConfig::default();
        assert_eq!(config.event_buffer, 256);
        assert_eq!(config.scan_mode, ScanMode::LowLatency);
        assert!(!config.connect_options().auto_connect);
        assert_eq!(config.default_write_type, WriteType::WithResponse);
        assert_eq!(config.operation_timeout, None);
    }

    #[test]
    fn event_capacity_is_never_zero() {
        assert_eq!(GatewayConfig::default().with_event_buffer(0).event_capacity(), 1);
        assert_eq!(GatewayConfig::default().with_event_buffer(8).event_capacity(), 8);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn loads_partial_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            event_buffer = 64
            scan_mode = "Balanced"
            auto_connect = true
            operation_timeout = { secs = 5, nanos = 0 }
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            GatewayConfig::default()
                .with_event_buffer(64)
                .with_scan_mode(ScanMode::Balanced)
                .with_auto_connect(true)
                .with_operation_timeout(Duration::from_secs(5))
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn round_trips_through_json() {
        let config = GatewayConfig::default().with_default_write_type(WriteType::WithoutResponse);
        let json = serde_json::to_string(&config).unwrap();
        let back: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
