// blegate Source Code File
//
// Copyright 2025 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! [`Transport`] over the host's BLE stack, through btleplug (BlueZ, WinRT, CoreBluetooth or
//! Android, whichever the target uses).
//!
//! btleplug has no API for bonding, MTU negotiation or scan duty cycles: `pair` and
//! `request_mtu` fail with a transport error, and the scan mode is ignored. RSSI is the last
//! value the platform saw in an advertisement.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter as PlatformScanFilter,
    WriteType as PlatformWriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{self, StreamExt};
use log::{debug, trace};
use static_assertions::assert_impl_all;
use uuid::Uuid;

use crate::api::{
    Advertisement, AdvertisementStream, BDAddr, CharPropFlags, Characteristic, ConnectOptions,
    Link, LinkEvent, LinkEventStream, ScanFilter, Service, Transport, ValueNotification, WriteType,
};
use crate::config::ScanMode;
use crate::{Error, Result};

impl From<btleplug::Error> for Error {
    fn from(e: btleplug::Error) -> Self {
        Error::TransportError(e.to_string())
    }
}

fn to_platform_address(address: BDAddr) -> btleplug::api::BDAddr {
    address.into_inner().into()
}

fn from_platform_address(address: btleplug::api::BDAddr) -> BDAddr {
    address.into_inner().into()
}

#[derive(Debug, Clone)]
pub struct BtleplugTransport {
    adapter: Adapter,
}

assert_impl_all!(BtleplugTransport: Transport, Clone, Send, Sync);

impl BtleplugTransport {
    /// Uses the first adapter the platform reports.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::TransportError("No Bluetooth adapter found".into()))?;
        debug!("Using adapter {}", adapter.adapter_info().await?);
        Ok(Self::from_adapter(adapter))
    }

    pub fn from_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    async fn peripheral(&self, address: BDAddr) -> Result<Peripheral> {
        let wanted = to_platform_address(address);
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|peripheral| peripheral.address() == wanted)
            .ok_or(Error::NotFound(address))
    }
}

async fn advertisement(adapter: &Adapter, id: &PeripheralId) -> Result<Advertisement> {
    let peripheral = adapter.peripheral(id).await?;
    let properties = peripheral.properties().await?.unwrap_or_default();
    Ok(Advertisement {
        address: from_platform_address(peripheral.address()),
        name: properties.local_name,
        rssi: properties.rssi,
        services: properties.services,
    })
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn start_scan(&self, filter: &ScanFilter, mode: ScanMode) -> Result<AdvertisementStream> {
        trace!("Scan mode {:?} is left to the platform", mode);
        let events = self.adapter.events().await?;
        self.adapter
            .start_scan(PlatformScanFilter {
                services: filter.services.clone(),
            })
            .await?;
        let adapter = self.adapter.clone();
        let advertisements = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };
                match advertisement(&adapter, &id).await {
                    Ok(advertisement) => Some(Ok(advertisement)),
                    Err(e) => {
                        debug!("Skipping advertisement from {:?}: {}", id, e);
                        None
                    }
                }
            }
        });
        Ok(Box::pin(advertisements))
    }

    async fn stop_scan(&self) -> Result<()> {
        Ok(self.adapter.stop_scan().await?)
    }

    async fn connect(&self, address: BDAddr, options: &ConnectOptions) -> Result<Box<dyn Link>> {
        let peripheral = self.peripheral(address).await?;
        if options.auto_connect {
            debug!("Background connections are not available, connecting directly");
        }
        peripheral.connect().await?;
        Ok(Box::new(BtleplugLink {
            address,
            adapter: self.adapter.clone(),
            peripheral,
        }))
    }

    async fn wait_ready(&self) -> Result<()> {
        self.adapter.adapter_info().await?;
        Ok(())
    }

    async fn pair(&self, _address: BDAddr) -> Result<()> {
        Err(Error::TransportError(
            "Pairing is not supported on this platform".into(),
        ))
    }
}

#[derive(Debug)]
pub struct BtleplugLink {
    address: BDAddr,
    adapter: Adapter,
    peripheral: Peripheral,
}

impl BtleplugLink {
    fn characteristic(&self, uuid: Uuid) -> Result<btleplug::api::Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown characteristic {}", uuid)))
    }
}

#[async_trait]
impl Link for BtleplugLink {
    fn address(&self) -> BDAddr {
        self.address
    }

    async fn discover_services(&self) -> Result<Vec<Service>> {
        self.peripheral.discover_services().await?;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|service| Service {
                uuid: service.uuid,
                primary: service.primary,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|characteristic| Characteristic {
                        uuid: characteristic.uuid,
                        service_uuid: characteristic.service_uuid,
                        properties: CharPropFlags::from_bits_truncate(
                            characteristic.properties.bits(),
                        ),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&self, characteristic: Uuid, data: &[u8], write_type: WriteType) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        let write_type = match write_type {
            WriteType::WithResponse => PlatformWriteType::WithResponse,
            WriteType::WithoutResponse => PlatformWriteType::WithoutResponse,
        };
        Ok(self
            .peripheral
            .write(&characteristic, data, write_type)
            .await?)
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        Ok(self.peripheral.subscribe(&characteristic).await?)
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        Ok(self.peripheral.unsubscribe(&characteristic).await?)
    }

    async fn request_mtu(&self, _mtu: u16) -> Result<u16> {
        Err(Error::TransportError(
            "MTU negotiation is not supported on this platform".into(),
        ))
    }

    async fn read_rssi(&self) -> Result<i16> {
        self.peripheral
            .properties()
            .await?
            .and_then(|properties| properties.rssi)
            .ok_or_else(|| Error::TransportError("No RSSI reported".into()))
    }

    async fn events(&self) -> Result<LinkEventStream> {
        let notifications = self.peripheral.notifications().await?.map(|notification| {
            LinkEvent::Notification(ValueNotification {
                uuid: notification.uuid,
                value: notification.value,
            })
        });
        let id = self.peripheral.id();
        let disconnects = self.adapter.events().await?.filter_map(move |event| {
            let disconnected = matches!(&event, CentralEvent::DeviceDisconnected(other) if *other == id);
            async move { disconnected.then_some(LinkEvent::Disconnected) }
        });
        Ok(Box::pin(stream::select(notifications, disconnects)))
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(self.peripheral.disconnect().await?)
    }
}
