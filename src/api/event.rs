use uuid::Uuid;

use super::{BDAddr, CharPropFlags, HexValue};
use crate::Error;

/// Everything the gateway reports to its caller.
///
/// Command methods on [`Gateway`](crate::gateway::Gateway) only return synchronous precondition
/// failures. Every outcome, including those failures, is also delivered as one of these events,
/// in a single order shared by all subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ScanStarted,
    ScanStopped,
    ScanError {
        error: Error,
    },
    /// Forwarded for every sighting that passes the scan filter, duplicates included.
    DeviceFound {
        address: BDAddr,
        name: Option<String>,
        rssi: Option<i16>,
    },
    ConnectStarted {
        address: BDAddr,
    },
    Connected {
        address: BDAddr,
    },
    /// The connection attempt or its service discovery failed. No `Disconnected` follows.
    ConnectError {
        address: BDAddr,
        error: Error,
    },
    ServiceDiscovered {
        address: BDAddr,
        service: Uuid,
    },
    CharacteristicDiscovered {
        address: BDAddr,
        service: Uuid,
        characteristic: Uuid,
        properties: CharPropFlags,
    },
    /// The last event for a device's session.
    Disconnected {
        address: BDAddr,
    },
    ReadSuccess {
        address: BDAddr,
        characteristic: Uuid,
        value: HexValue,
    },
    ReadError {
        address: BDAddr,
        characteristic: Uuid,
        error: Error,
    },
    /// Echoes the written payload.
    WriteSuccess {
        address: BDAddr,
        characteristic: Uuid,
        value: HexValue,
    },
    WriteError {
        address: BDAddr,
        characteristic: Uuid,
        error: Error,
    },
    NotificationReceived {
        address: BDAddr,
        characteristic: Uuid,
        value: HexValue,
    },
    /// A subscribe or unsubscribe request failed.
    NotificationError {
        address: BDAddr,
        characteristic: Uuid,
        error: Error,
    },
    Subscribed {
        address: BDAddr,
        characteristic: Uuid,
    },
    Unsubscribed {
        address: BDAddr,
        characteristic: Uuid,
    },
    /// The bonding request was accepted by the platform. Bonding itself may still fail later.
    PairingInitiated {
        address: BDAddr,
    },
    PairingError {
        address: BDAddr,
        error: Error,
    },
    MtuSuccess {
        address: BDAddr,
        mtu: u16,
    },
    MtuError {
        address: BDAddr,
        error: Error,
    },
    RssiSuccess {
        address: BDAddr,
        rssi: i16,
    },
    RssiError {
        address: BDAddr,
        error: Error,
    },
    /// Events were dropped because this subscriber fell behind. Sent once per overflow episode,
    /// ahead of the events that survived.
    Overflow {
        dropped: u64,
    },
}

impl Event {
    /// The snake_case name of the event, as used by scripting callers.
    pub fn name(&self) -> &'static str {
        match self {
            Event::ScanStarted => "scan_started",
            Event::ScanStopped => "scan_stopped",
            Event::ScanError { .. } => "scan_error",
            Event::DeviceFound { .. } => "device_found",
            Event::ConnectStarted { .. } => "connect_started",
            Event::Connected { .. } => "connected",
            Event::ConnectError { .. } => "connect_error",
            Event::ServiceDiscovered { .. } => "service_discovered",
            Event::CharacteristicDiscovered { .. } => "characteristic_discovered",
            Event::Disconnected { .. } => "disconnected",
            Event::ReadSuccess { .. } => "read_success",
            Event::ReadError { .. } => "read_error",
            Event::WriteSuccess { .. } => "write_success",
            Event::WriteError { .. } => "write_error",
            Event::NotificationReceived { .. } => "notification_received",
            Event::NotificationError { .. } => "notification_error",
            Event::Subscribed { .. } => "subscribed",
            Event::Unsubscribed { .. } => "unsubscribed",
            Event::PairingInitiated { .. } => "pairing_initiated",
            Event::PairingError { .. } => "pairing_error",
            Event::MtuSuccess { .. } => "mtu_success",
            Event::MtuError { .. } => "mtu_error",
            Event::RssiSuccess { .. } => "rssi_success",
            Event::RssiError { .. } => "rssi_error",
            Event::Overflow { .. } => "overflow",
        }
    }

    /// The device this event is about, if any.
    pub fn address(&self) -> Option<BDAddr> {
        match self {
            Event::ScanStarted
            | Event::ScanStopped
            | Event::ScanError { .. }
            | Event::Overflow { .. } => None,
            Event::DeviceFound { address, .. }
            | Event::ConnectStarted { address }
            | Event::Connected { address }
            | Event::ConnectError { address, .. }
            | Event::ServiceDiscovered { address, .. }
            | Event::CharacteristicDiscovered { address, .. }
            | Event::Disconnected { address }
            | Event::ReadSuccess { address, .. }
            | Event::ReadError { address, .. }
            | Event::WriteSuccess { address, .. }
            | Event::WriteError { address, .. }
            | Event::NotificationReceived { address, .. }
            | Event::NotificationError { address, .. }
            | Event::Subscribed { address, .. }
            | Event::Unsubscribed { address, .. }
            | Event::PairingInitiated { address }
            | Event::PairingError { address, .. }
            | Event::MtuSuccess { address, .. }
            | Event::MtuError { address, .. }
            | Event::RssiSuccess { address, .. }
            | Event::RssiError { address, .. } => Some(*address),
        }
    }

    /// The error carried by an error event.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Event::ScanError { error }
            | Event::ConnectError { error, .. }
            | Event::ReadError { error, .. }
            | Event::WriteError { error, .. }
            | Event::NotificationError { error, .. }
            | Event::PairingError { error, .. }
            | Event::MtuError { error, .. }
            | Event::RssiError { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_addresses() {
        let address: BDAddr = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let event = Event::ReadError {
            address,
            characteristic: Uuid::nil(),
            error: Error::Cancelled,
        };
        assert_eq!(event.name(), "read_error");
        assert_eq!(event.address(), Some(address));
        assert_eq!(event.error(), Some(&Error::Cancelled));

        let event = Event::Overflow { dropped: 3 };
        assert_eq!(event.name(), "overflow");
        assert_eq!(event.address(), None);
        assert_eq!(event.error(), None);
    }
}
