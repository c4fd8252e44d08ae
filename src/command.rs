// blegate Source Code File
//
// Copyright 2025 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Text form of the gateway commands, for scripting hosts and consoles.
//!
//! One command per line, whitespace separated:
//!
//! ```text
//! scan [name=<name>] [address=<addr>] [service=<uuid>]...
//! stop-scan
//! connect <addr>
//! disconnect <addr>
//! read <addr> <uuid>
//! write <addr> <uuid> <hex>
//! subscribe <addr> <uuid>
//! unsubscribe <addr> <uuid>
//! pair <addr>
//! mtu <addr> <size>
//! rssi <addr>
//! ```
//!
//! UUIDs may be given in full or as 16/32-bit short forms (`2a37`, `0x2A37`).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use uuid::Uuid;

use crate::api::bleuuid::{parse_uuid, BleUuid};
use crate::api::{BDAddr, HexValue, ScanFilter};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartScan(ScanFilter),
    StopScan,
    Connect(BDAddr),
    Disconnect(BDAddr),
    Read {
        address: BDAddr,
        characteristic: Uuid,
    },
    Write {
        address: BDAddr,
        characteristic: Uuid,
        value: HexValue,
    },
    Subscribe {
        address: BDAddr,
        characteristic: Uuid,
    },
    Unsubscribe {
        address: BDAddr,
        characteristic: Uuid,
    },
    Pair(BDAddr),
    RequestMtu {
        address: BDAddr,
        mtu: u16,
    },
    ReadRssi(BDAddr),
}

struct Args<'a> {
    command: &'a str,
    words: std::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn next(&mut self, what: &str) -> Result<&'a str> {
        self.words.next().ok_or_else(|| {
            Error::InvalidArgument(format!("{}: missing {}", self.command, what))
        })
    }

    fn address(&mut self) -> Result<BDAddr> {
        Ok(self.next("address")?.parse()?)
    }

    fn uuid(&mut self) -> Result<Uuid> {
        parse_uuid(self.next("characteristic UUID")?)
    }

    fn finish<T>(mut self, command: T) -> Result<T> {
        match self.words.next() {
            Some(extra) => Err(Error::InvalidArgument(format!(
                "{}: unexpected argument {:?}",
                self.command, extra
            ))),
            None => Ok(command),
        }
    }
}

fn parse_filter<'a>(words: impl Iterator<Item = &'a str>) -> Result<ScanFilter> {
    let mut filter = ScanFilter::default();
    for word in words {
        let (key, value) = word.split_once('=').ok_or_else(|| {
            Error::InvalidArgument(format!("scan: expected key=value, got {:?}", word))
        })?;
        filter = match key {
            "name" => filter.with_name(value),
            "address" => filter.with_address(value.parse()?),
            "service" => filter.with_service(parse_uuid(value)?),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "scan: unknown filter {:?}",
                    key
                )))
            }
        };
    }
    Ok(filter)
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = words
            .next()
            .ok_or_else(|| Error::InvalidArgument("empty command".into()))?;
        if command == "scan" {
            return Ok(Command::StartScan(parse_filter(words)?));
        }

        let mut args = Args { command, words };
        let parsed = match command {
            "stop-scan" => Command::StopScan,
            "connect" => Command::Connect(args.address()?),
            "disconnect" => Command::Disconnect(args.address()?),
            "read" => Command::Read {
                address: args.address()?,
                characteristic: args.uuid()?,
            },
            "write" => Command::Write {
                address: args.address()?,
                characteristic: args.uuid()?,
                value: args.next("value")?.parse()?,
            },
            "subscribe" => Command::Subscribe {
                address: args.address()?,
                characteristic: args.uuid()?,
            },
            "unsubscribe" => Command::Unsubscribe {
                address: args.address()?,
                characteristic: args.uuid()?,
            },
            "pair" => Command::Pair(args.address()?),
            "mtu" => {
                let address = args.address()?;
                let size = args.next("size")?;
                let mtu = size.parse().map_err(|_| {
                    Error::InvalidArgument(format!("mtu: invalid size {:?}", size))
                })?;
                Command::RequestMtu { address, mtu }
            }
            "rssi" => Command::ReadRssi(args.address()?),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "unknown command {:?}",
                    command
                )))
            }
        };
        args.finish(parsed)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Command::StartScan(filter) => {
                write!(f, "scan")?;
                if let Some(name) = &filter.name {
                    write!(f, " name={}", name)?;
                }
                if let Some(address) = filter.address {
                    write!(f, " address={}", address)?;
                }
                for service in &filter.services {
                    write!(f, " service={}", service.to_short_string())?;
                }
                Ok(())
            }
            Command::StopScan => write!(f, "stop-scan"),
            Command::Connect(address) => write!(f, "connect {}", address),
            Command::Disconnect(address) => write!(f, "disconnect {}", address),
            Command::Read {
                address,
                characteristic,
            } => write!(f, "read {} {}", address, characteristic.to_short_string()),
            Command::Write {
                address,
                characteristic,
                value,
            } => write!(
                f,
                "write {} {} {}",
                address,
                characteristic.to_short_string(),
                value
            ),
            Command::Subscribe {
                address,
                characteristic,
            } => write!(f, "subscribe {} {}", address, characteristic.to_short_string()),
            Command::Unsubscribe {
                address,
                characteristic,
            } => write!(
                f,
                "unsubscribe {} {}",
                address,
                characteristic.to_short_string()
            ),
            Command::Pair(address) => write!(f, "pair {}", address),
            Command::RequestMtu { address, mtu } => write!(f, "mtu {} {}", address, mtu),
            Command::ReadRssi(address) => write!(f, "rssi {}", address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::bleuuid::uuid_from_u16;

    const ADDRESS: BDAddr = BDAddr::new([0x1F, 0x2A, 0x00, 0xCC, 0x22, 0xF1]);

    #[test]
    fn parses_every_command() {
        let cases = [
            ("stop-scan", Command::StopScan),
            ("connect 1f:2a:00:cc:22:f1", Command::Connect(ADDRESS)),
            ("disconnect 1F-2A-00-CC-22-F1", Command::Disconnect(ADDRESS)),
            (
                "read 1F:2A:00:CC:22:F1 2a37",
                Command::Read {
                    address: ADDRESS,
                    characteristic: uuid_from_u16(0x2A37),
                },
            ),
            (
                "  write 1F:2A:00:CC:22:F1 0x2A39   0a1b2c ",
                Command::Write {
                    address: ADDRESS,
                    characteristic: uuid_from_u16(0x2A39),
                    value: vec![0x0A, 0x1B, 0x2C].into(),
                },
            ),
            (
                "subscribe 1F2A00CC22F1 00002a37-0000-1000-8000-00805f9b34fb",
                Command::Subscribe {
                    address: ADDRESS,
                    characteristic: uuid_from_u16(0x2A37),
                },
            ),
            ("pair 1F:2A:00:CC:22:F1", Command::Pair(ADDRESS)),
            (
                "mtu 1F:2A:00:CC:22:F1 247",
                Command::RequestMtu {
                    address: ADDRESS,
                    mtu: 247,
                },
            ),
            ("rssi 1F:2A:00:CC:22:F1", Command::ReadRssi(ADDRESS)),
        ];
        for (line, expected) in cases {
            assert_eq!(line.parse::<Command>(), Ok(expected), "{}", line);
        }
    }

    #[test]
    fn parses_scan_filters() {
        assert_eq!(
            "scan".parse::<Command>(),
            Ok(Command::StartScan(ScanFilter::default()))
        );
        assert_eq!(
            "scan name=HRM service=180d service=0x180f address=1F:2A:00:CC:22:F1"
                .parse::<Command>(),
            Ok(Command::StartScan(
                ScanFilter::default()
                    .with_name("HRM")
                    .with_service(uuid_from_u16(0x180D))
                    .with_service(uuid_from_u16(0x180F))
                    .with_address(ADDRESS)
            ))
        );
    }

    #[test]
    fn malformed_commands_are_invalid_arguments() {
        for line in [
            "",
            "explode",
            "connect",
            "connect 1F:2A:00",
            "read 1F:2A:00:CC:22:F1",
            "read 1F:2A:00:CC:22:F1 not-a-uuid",
            "write 1F:2A:00:CC:22:F1 2a39 ABC",
            "mtu 1F:2A:00:CC:22:F1 huge",
            "rssi 1F:2A:00:CC:22:F1 extra",
            "scan colour=blue",
            "scan HRM",
        ] {
            assert!(
                matches!(line.parse::<Command>(), Err(Error::InvalidArgument(_))),
                "{:?}",
                line
            );
        }
    }

    #[test]
    fn display_parses_back() {
        for line in [
            "scan name=HRM service=0x180d",
            "read 1F:2A:00:CC:22:F1 0x2a37",
            "write 1F:2A:00:CC:22:F1 0x2a39 0A1B2C",
            "mtu 1F:2A:00:CC:22:F1 185",
        ] {
            let command: Command = line.parse().unwrap();
            assert_eq!(command.to_string(), line);
        }
    }
}
