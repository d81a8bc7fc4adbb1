//! Bluetooth LE peripheral transport.
//!
//! The device exposes one GATT service with two characteristics: the phone
//! writes target lines to [`CHARACTERISTIC_WRITE`] and receives command tokens
//! as notifications on [`CHARACTERISTIC_NOTIFY`]. The radio stack itself is
//! abstracted behind [`RadioStack`]; its connection and write callbacks are
//! turned into [`BleEvent`]s and handed to [`BluetoothTransport::handle_event`],
//! either directly or through [`BluetoothTransport::run`].

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use futures::{Stream, StreamExt};
use log::{debug, info, trace, warn};
use openbot_proto::CommandToken;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::{
    clock::Clock,
    pipeline::{FeedOutcome, SharedPipeline},
    state::lock,
};

/// The GATT service the device advertises.
pub const OPENBOT_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Peer to device. Target lines are written here.
pub const CHARACTERISTIC_WRITE: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e); // WRITE | WRITE_WITHOUT_RESPONSE

/// Device to peer. Command tokens are notified here.
pub const CHARACTERISTIC_NOTIFY: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e); // NOTIFY

/// Name advertised when none is configured.
pub const DEFAULT_DEVICE_NAME: &str = "OpenBot";

/// Size limit of a legacy advertising payload.
pub const MAX_ADVERTISING_LEN: usize = 31;

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_SHORT_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
const AD_TYPE_UUID128_COMPLETE: u8 = 0x07;
/// LE General Discoverable, BR/EDR not supported.
const AD_FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;

/// Radio-assigned handle of a connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnHandle(pub u16);

/// GATT attribute value handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeHandle(pub u16);

/// Value handles of the two characteristics, as registered with the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattHandles {
    pub notify: AttributeHandle,
    pub write: AttributeHandle,
}

/// Something the radio stack reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    Connected(ConnHandle),
    Disconnected(ConnHandle),
    /// A peer wrote `data` to the characteristic at `attribute`.
    Write {
        conn: ConnHandle,
        attribute: AttributeHandle,
        data: Vec<u8>,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BluetoothError {
    #[error("Radio stack error: {0}")]
    Radio(String),

    #[error("Peer {0:?} is not connected")]
    NotConnected(ConnHandle),

    #[error("Advertising failed: {0}")]
    Advertise(String),
}

/// The parts of a BLE radio stack this transport drives.
pub trait RadioStack: Send {
    /// Starts (or restarts) connectable advertising with `payload`.
    fn advertise(&mut self, payload: &[u8]) -> Result<(), BluetoothError>;

    /// Sends `data` as a notification of `attribute` to one peer.
    fn notify(
        &mut self,
        conn: ConnHandle,
        attribute: AttributeHandle,
        data: &[u8],
    ) -> Result<(), BluetoothError>;
}

/// Builds the advertising payload: flags, device name, and the 128-bit
/// service UUID.
///
/// The service UUID always fits. The name is shortened (and marked as a
/// shortened name) when the full name would overflow
/// [`MAX_ADVERTISING_LEN`].
pub fn advertising_payload(name: &str, service: Uuid) -> Vec<u8> {
    let mut payload = Vec::with_capacity(MAX_ADVERTISING_LEN);
    payload.extend([2, AD_TYPE_FLAGS, AD_FLAGS_GENERAL_DISCOVERABLE]);

    let service_len = 2 + 16;
    let name_room = MAX_ADVERTISING_LEN - payload.len() - service_len - 2;
    let name = name.as_bytes();
    let (name, name_type) = if name.len() > name_room {
        (&name[..name_room], AD_TYPE_SHORT_NAME)
    } else {
        (name, AD_TYPE_COMPLETE_NAME)
    };
    if !name.is_empty() {
        payload.push(name.len() as u8 + 1);
        payload.push(name_type);
        payload.extend_from_slice(name);
    }

    // UUIDs go over the air little-endian.
    payload.push(17);
    payload.push(AD_TYPE_UUID128_COMPLETE);
    payload.extend(service.as_u128().to_le_bytes());

    payload
}

/// Static description of the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralConfig {
    pub device_name: String,
    pub handles: GattHandles,
}

impl PeripheralConfig {
    pub fn new(handles: GattHandles) -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            handles,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }
}

/// Connected peers and the GATT layout they talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    connected: BTreeSet<ConnHandle>,
    advertisement: Vec<u8>,
    handles: GattHandles,
}

impl ConnectionState {
    pub fn connected(&self) -> impl Iterator<Item = ConnHandle> + '_ {
        self.connected.iter().copied()
    }

    pub fn is_connected(&self, conn: ConnHandle) -> bool {
        self.connected.contains(&conn)
    }

    pub fn peer_count(&self) -> usize {
        self.connected.len()
    }

    pub fn advertisement(&self) -> &[u8] {
        &self.advertisement
    }

    pub fn handles(&self) -> GattHandles {
        self.handles
    }
}

/// Per-peer result of a notification fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: Vec<ConnHandle>,
    pub failed: Vec<(ConnHandle, BluetoothError)>,
}

impl NotifyReport {
    /// `true` when there was nobody to notify.
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }
}

/// Sender half handed to radio callbacks.
pub type EventSender = mpsc::UnboundedSender<BleEvent>;

/// Bluetooth side of the link.
///
/// Radio callbacks may run on another thread than the accessors; all state is
/// behind short-lived locks, and targets reach readers through the shared
/// pipeline's [`SharedTarget`](crate::SharedTarget).
pub struct BluetoothTransport {
    radio: Mutex<Box<dyn RadioStack>>,
    state: Mutex<ConnectionState>,
    pipeline: SharedPipeline,
    clock: Arc<dyn Clock>,
    active: AtomicBool,
}

impl BluetoothTransport {
    /// Starts advertising and returns the transport.
    ///
    /// # Errors
    ///
    /// Fails if the radio refuses to advertise. This is a setup failure and is
    /// not retried.
    pub fn start(
        mut radio: Box<dyn RadioStack>,
        config: PeripheralConfig,
        pipeline: SharedPipeline,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BluetoothError> {
        let advertisement = advertising_payload(&config.device_name, OPENBOT_SERVICE);
        radio.advertise(&advertisement)?;
        info!("Advertising as {:?}", config.device_name);

        Ok(Self {
            radio: Mutex::new(radio),
            state: Mutex::new(ConnectionState {
                connected: BTreeSet::new(),
                advertisement,
                handles: config.handles,
            }),
            pipeline,
            clock,
            active: AtomicBool::new(true),
        })
    }

    /// Applies one radio event. Returns the outcome of every line completed
    /// by a write.
    pub fn handle_event(&self, event: BleEvent) -> Vec<FeedOutcome> {
        match event {
            BleEvent::Connected(conn) => {
                info!("Peer {:?} connected", conn);
                lock(&self.state).connected.insert(conn);
                Vec::new()
            }
            BleEvent::Disconnected(conn) => {
                info!("Peer {:?} disconnected", conn);
                let advertisement = {
                    let mut state = lock(&self.state);
                    state.connected.remove(&conn);
                    state.advertisement.clone()
                };
                if let Err(e) = lock(&self.radio).advertise(&advertisement) {
                    warn!("Failed to resume advertising: {}", e);
                }
                Vec::new()
            }
            BleEvent::Write {
                conn,
                attribute,
                data,
            } => {
                if attribute != lock(&self.state).handles.write {
                    trace!("Ignoring write from {:?} to {:?}", conn, attribute);
                    return Vec::new();
                }
                if !self.is_active() {
                    trace!("Dropping {} bytes from {:?}, bluetooth inactive", data.len(), conn);
                    return Vec::new();
                }

                trace!("received {} bytes from {:?}", data.len(), conn);
                let now = self.clock.now_ms();
                lock(&self.pipeline).feed_all(&data, now)
            }
        }
    }

    /// Notifies every connected peer with `token`.
    ///
    /// A failing peer is logged and recorded; the others are still notified.
    pub fn send(&self, token: &CommandToken) -> NotifyReport {
        let (peers, notify) = {
            let state = lock(&self.state);
            (state.connected().collect::<Vec<_>>(), state.handles.notify)
        };

        let mut report = NotifyReport::default();
        if peers.is_empty() {
            debug!("No peers connected, dropping command {}", token);
            return report;
        }

        let mut radio = lock(&self.radio);
        for conn in peers {
            match radio.notify(conn, notify, token.as_bytes()) {
                Ok(()) => report.delivered.push(conn),
                Err(e) => {
                    warn!("Failed to notify {:?} of {}: {}", conn, token, e);
                    report.failed.push((conn, e));
                }
            }
        }

        report
    }

    /// Snapshot of the connection state.
    pub fn state(&self) -> ConnectionState {
        lock(&self.state).clone()
    }

    /// Whether inbound writes are fed to the pipeline.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Creates the channel radio callbacks push events into. Drive the
    /// receiving half with [`Self::run`].
    pub fn event_channel() -> (EventSender, UnboundedReceiverStream<BleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, UnboundedReceiverStream::new(rx))
    }

    /// Applies events until the stream ends.
    pub async fn run(self: Arc<Self>, mut events: impl Stream<Item = BleEvent> + Unpin) {
        while let Some(event) = events.next().await {
            self.handle_event(event);
        }
        debug!("Bluetooth event stream closed");
    }
}
