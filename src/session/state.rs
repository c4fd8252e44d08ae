//! The connection lifecycle as a pure transition table.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Discovering -> Ready -> Disconnecting -> Disconnected
//!                     |                          |
//!                     +--------> Failed <--------+
//! ```
//!
//! [`transition`] maps a state and an input to the next state and the effects the session
//! runtime has to apply, in order. It performs no I/O.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;

use crate::{Error, Result};

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Discovering,
    Ready,
    Disconnecting,
    /// Connection or discovery failed. Terminal.
    Failed,
}

impl SessionState {
    /// Disconnected and Failed end a session; every other state keeps it alive.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed)
    }

    /// States in which the platform link is (being) established and may carry traffic.
    pub fn is_linked(self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Discovering | SessionState::Ready
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Input {
    ConnectRequested,
    LinkEstablished,
    LinkFailed(Error),
    DiscoveryStarted,
    DiscoveryCompleted,
    DiscoveryFailed(Error),
    DisconnectRequested,
    /// The platform reported the link gone without being asked.
    LinkLost,
    /// The platform link has been released after a requested disconnect.
    LinkReleased,
}

impl Input {
    pub fn name(&self) -> &'static str {
        match self {
            Input::ConnectRequested => "ConnectRequested",
            Input::LinkEstablished => "LinkEstablished",
            Input::LinkFailed(_) => "LinkFailed",
            Input::DiscoveryStarted => "DiscoveryStarted",
            Input::DiscoveryCompleted => "DiscoveryCompleted",
            Input::DiscoveryFailed(_) => "DiscoveryFailed",
            Input::DisconnectRequested => "DisconnectRequested",
            Input::LinkLost => "LinkLost",
            Input::LinkReleased => "LinkReleased",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    EmitConnectStarted,
    OpenLink,
    EmitConnected,
    DiscoverServices,
    EmitConnectError(Error),
    /// The GATT queue may start running operations.
    StartOperations,
    /// Every queued and in-flight operation completes with `Cancelled`.
    CancelPending,
    ReleaseLink,
    EmitDisconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Transition {
    pub state: SessionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(state: SessionState, effects: Vec<Effect>) -> Result<Self> {
        Ok(Self { state, effects })
    }
}

pub(crate) fn transition(state: SessionState, input: Input) -> Result<Transition> {
    use Effect::*;
    use SessionState::*;

    match (state, input) {
        (Disconnected | Failed, Input::ConnectRequested) => {
            Transition::to(Connecting, vec![EmitConnectStarted, OpenLink])
        }
        (Connecting, Input::LinkEstablished) => {
            Transition::to(Connected, vec![EmitConnected, DiscoverServices])
        }
        (Connected, Input::DiscoveryStarted) => Transition::to(Discovering, vec![]),
        (Connecting, Input::LinkFailed(error)) => {
            Transition::to(Failed, vec![EmitConnectError(error)])
        }
        (Connected | Discovering, Input::DiscoveryCompleted) => {
            Transition::to(Ready, vec![StartOperations])
        }
        (Connected | Discovering, Input::DiscoveryFailed(error)) => {
            Transition::to(Failed, vec![ReleaseLink, EmitConnectError(error)])
        }
        (Connecting | Connected | Discovering | Ready, Input::DisconnectRequested) => {
            Transition::to(Disconnecting, vec![CancelPending, ReleaseLink])
        }
        (Connected | Discovering | Ready, Input::LinkLost) => {
            Transition::to(Disconnected, vec![CancelPending, EmitDisconnected])
        }
        (Disconnecting, Input::LinkLost | Input::LinkReleased) => {
            Transition::to(Disconnected, vec![EmitDisconnected])
        }
        // Repeated disconnects are no-ops.
        (Disconnecting | Disconnected | Failed, Input::DisconnectRequested) => {
            Transition::to(state, vec![])
        }
        (state, input) => Err(Error::InvalidTransition {
            state,
            input: input.name(),
        }),
    }
}
