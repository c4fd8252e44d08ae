//! Per-device GATT operations and the FIFO they wait in.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::api::{BDAddr, Event, Link, WriteType};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OperationKind {
    Read {
        characteristic: Uuid,
    },
    Write {
        characteristic: Uuid,
        data: Vec<u8>,
        write_type: WriteType,
    },
    Subscribe {
        characteristic: Uuid,
    },
    Unsubscribe {
        characteristic: Uuid,
    },
    RequestMtu {
        mtu: u16,
    },
    ReadRssi,
}

/// Successful completion of an operation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Read(Vec<u8>),
    Written,
    Subscribed,
    Unsubscribed,
    Mtu(u16),
    Rssi(i16),
}

impl OperationKind {
    pub async fn execute(&self, link: &dyn Link) -> Result<Outcome> {
        match self {
            OperationKind::Read { characteristic } => link.read(*characteristic).await.map(Outcome::Read),
            OperationKind::Write {
                characteristic,
                data,
                write_type,
            } => link
                .write(*characteristic, data, *write_type)
                .await
                .map(|_| Outcome::Written),
            OperationKind::Subscribe { characteristic } => link
                .subscribe(*characteristic)
                .await
                .map(|_| Outcome::Subscribed),
            OperationKind::Unsubscribe { characteristic } => link
                .unsubscribe(*characteristic)
                .await
                .map(|_| Outcome::Unsubscribed),
            OperationKind::RequestMtu { mtu } => link.request_mtu(*mtu).await.map(Outcome::Mtu),
            OperationKind::ReadRssi => link.read_rssi().await.map(Outcome::Rssi),
        }
    }

    /// The event reporting this operation's result.
    pub fn completion_event(&self, address: BDAddr, result: Result<Outcome>) -> Event {
        match (self, result) {
            (OperationKind::Read { characteristic }, Ok(Outcome::Read(value))) => {
                Event::ReadSuccess {
                    address,
                    characteristic: *characteristic,
                    value: value.into(),
                }
            }
            (
                OperationKind::Write {
                    characteristic,
                    data,
                    ..
                },
                Ok(_),
            ) => Event::WriteSuccess {
                address,
                characteristic: *characteristic,
                value: data.as_slice().into(),
            },
            (OperationKind::Subscribe { characteristic }, Ok(_)) => Event::Subscribed {
                address,
                characteristic: *characteristic,
            },
            (OperationKind::Unsubscribe { characteristic }, Ok(_)) => Event::Unsubscribed {
                address,
                characteristic: *characteristic,
            },
            (OperationKind::RequestMtu { .. }, Ok(Outcome::Mtu(mtu))) => {
                Event::MtuSuccess { address, mtu }
            }
            (OperationKind::ReadRssi, Ok(Outcome::Rssi(rssi))) => {
                Event::RssiSuccess { address, rssi }
            }
            (kind, Ok(outcome)) => kind.failure_event(
                address,
                Error::TransportError(format!("unexpected outcome {:?}", outcome)),
            ),
            (kind, Err(error)) => kind.failure_event(address, error),
        }
    }

    pub fn failure_event(&self, address: BDAddr, error: Error) -> Event {
        match self {
            OperationKind::Read { characteristic } => Event::ReadError {
                address,
                characteristic: *characteristic,
                error,
            },
            OperationKind::Write { characteristic, .. } => Event::WriteError {
                address,
                characteristic: *characteristic,
                error,
            },
            OperationKind::Subscribe { characteristic }
            | OperationKind::Unsubscribe { characteristic } => Event::NotificationError {
                address,
                characteristic: *characteristic,
                error,
            },
            OperationKind::RequestMtu { .. } => Event::MtuError { address, error },
            OperationKind::ReadRssi => Event::RssiError { address, error },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Operation {
    pub id: u64,
    pub kind: OperationKind,
}

/// Pending operations of one session plus the one currently running on the link.
#[derive(Debug, Default)]
pub(crate) struct OperationQueue {
    pending: VecDeque<Operation>,
    in_flight: Option<Operation>,
    next_id: u64,
}

impl OperationQueue {
    pub fn push(&mut self, kind: OperationKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.push_back(Operation { id, kind });
        id
    }

    /// Moves the oldest pending operation in flight. Returns `None` while another operation is
    /// still in flight, so the link never sees two concurrent calls.
    pub fn start_next(&mut self) -> Option<Operation> {
        if self.in_flight.is_some() {
            return None;
        }
        let operation = self.pending.pop_front()?;
        self.in_flight = Some(operation.clone());
        Some(operation)
    }

    /// Clears the in-flight slot. Returns false if `id` is not in flight anymore, i.e. the
    /// operation was cancelled while running and its result must be discarded.
    pub fn finish(&mut self, id: u64) -> bool {
        match &self.in_flight {
            Some(operation) if operation.id == id => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Empties the queue: the in-flight operation first, then the pending ones in order.
    pub fn cancel_all(&mut self) -> Vec<Operation> {
        self.in_flight
            .take()
            .into_iter()
            .chain(self.pending.drain(..))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some())
    }
}
