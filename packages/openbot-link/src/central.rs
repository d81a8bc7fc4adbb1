//! Bluetooth LE central client for the link.
//!
//! This is the phone's side of the connection: it scans for devices
//! advertising [`OPENBOT_SERVICE`], writes target lines to them, and listens
//! for the command tokens they notify back. Useful for bench testing a robot
//! from a desktop.

use std::{
    pin::Pin,
    time::{Duration, Instant},
};

use btleplug::{
    api::{
        Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    },
    platform::{Manager, Peripheral},
};
use futures::{Stream, StreamExt};
use log::{debug, info, trace, warn};
use openbot_proto::{CommandToken, Encode, TargetReport};
use thiserror::Error;

use crate::bluetooth::{CHARACTERISTIC_NOTIFY, CHARACTERISTIC_WRITE, OPENBOT_SERVICE};

/// Default ATT payload size, used to split writes.
pub const WRITE_CHUNK_LEN: usize = 20;

#[derive(Error, Debug)]
pub enum CentralError {
    #[error("No Bluetooth adapter found")]
    NoBluetoothAdapter,

    #[error("Device does not expose the expected characteristics")]
    MissingCharacteristic,

    #[error("Bluetooth Error: {0}")]
    Bluetooth(#[from] btleplug::Error),
}

/// A device found while scanning.
#[derive(Debug, Clone)]
pub struct BluetoothDevice {
    pub peripheral: Peripheral,
    pub name: Option<String>,
}

/// Scans for devices advertising the OpenBot service.
///
/// Returns after `scan_time`, or as soon as `max_device_count` devices were
/// found.
pub async fn find_devices(
    scan_time: Duration,
    max_device_count: Option<usize>,
) -> Result<Vec<BluetoothDevice>, CentralError> {
    let manager = Manager::new().await?;

    let Some(adapter) = manager.adapters().await?.into_iter().next() else {
        return Err(CentralError::NoBluetoothAdapter);
    };

    let mut events = adapter.events().await?;
    let mut devices = Vec::<BluetoothDevice>::new();

    let scan_start_time = Instant::now();
    adapter
        .start_scan(ScanFilter {
            services: vec![OPENBOT_SERVICE],
        })
        .await?;

    loop {
        let remaining = scan_time.saturating_sub(scan_start_time.elapsed());
        let event = match tokio::time::timeout(remaining, events.next()).await {
            Ok(Some(event)) => event,
            Ok(None) | Err(_) => break,
        };

        let (CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) = event else {
            continue;
        };

        let peripheral = adapter.peripheral(&id).await?;
        let Some(properties) = peripheral.properties().await? else {
            continue;
        };
        if !properties.services.contains(&OPENBOT_SERVICE)
            || devices.iter().any(|d| d.peripheral.id() == peripheral.id())
        {
            continue;
        }

        debug!(
            "Found OpenBot device {:?} at {}",
            properties.local_name,
            peripheral.address()
        );
        devices.push(BluetoothDevice {
            peripheral,
            name: properties.local_name,
        });

        if max_device_count.is_some_and(|count| devices.len() >= count) {
            break;
        }
    }

    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop scanning: {}", e);
    }

    info!(
        "Found {} devices in {:?}",
        devices.len(),
        scan_start_time.elapsed()
    );

    Ok(devices)
}

/// An open connection to one device.
pub struct PeerConnection {
    peripheral: Peripheral,
    write: Characteristic,
    notify: Characteristic,
}

impl PeerConnection {
    pub async fn open(device: BluetoothDevice) -> Result<Self, CentralError> {
        let peripheral = device.peripheral;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        } else {
            warn!("Peripheral already connected?");
        }

        peripheral.discover_services().await?;

        let mut write = None;
        let mut notify = None;
        for characteristic in peripheral.characteristics() {
            match characteristic.uuid {
                CHARACTERISTIC_WRITE => write = Some(characteristic),
                CHARACTERISTIC_NOTIFY => notify = Some(characteristic),
                _ => {}
            }
        }

        let connection = Self {
            peripheral,
            write: write.ok_or(CentralError::MissingCharacteristic)?,
            notify: notify.ok_or(CentralError::MissingCharacteristic)?,
        };
        connection.peripheral.subscribe(&connection.notify).await?;

        Ok(connection)
    }

    /// Writes a target line, split into ATT-sized chunks.
    pub async fn send_report(&self, report: &TargetReport) -> Result<(), CentralError> {
        let line = report.to_bytes();
        trace!("Sending target line: {:?}", report);
        self.send_line(&line).await
    }

    /// Writes raw bytes to the write characteristic.
    pub async fn send_line(&self, bytes: &[u8]) -> Result<(), CentralError> {
        for chunk in bytes.chunks(WRITE_CHUNK_LEN) {
            self.peripheral
                .write(&self.write, chunk, WriteType::WithoutResponse)
                .await?;
        }
        Ok(())
    }

    /// Command tokens notified by the device. Notifications that are not
    /// valid tokens are skipped.
    pub async fn commands(
        &self,
    ) -> Result<Pin<Box<dyn Stream<Item = CommandToken> + Send>>, CentralError> {
        let notifications = self.peripheral.notifications().await?;
        Ok(Box::pin(notifications.filter_map(|notification| async move {
            if notification.uuid != CHARACTERISTIC_NOTIFY {
                return None;
            }
            match CommandToken::from_bytes(&notification.value) {
                Ok(token) => Some(token),
                Err(e) => {
                    debug!("Skipping malformed command notification: {}", e);
                    None
                }
            }
        })))
    }

    pub async fn disconnect(&self) -> Result<(), CentralError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
