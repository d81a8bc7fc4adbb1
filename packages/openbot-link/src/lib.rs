//! Receiver for OpenBot target reports over serial or Bluetooth LE.
//!
//! A phone running a vision pipeline streams bounding boxes of the tracked
//! object as short ASCII lines (see [`protocol`]). This crate feeds those
//! bytes through a framer and decoder and keeps only the latest target, which
//! callers read through [`OpenBotParser`].
//!
//! On serial, reads happen inside the accessor calls and are rate limited by
//! a [`ReadThrottle`](throttle::ReadThrottle). On Bluetooth, the radio stack
//! pushes [`BleEvent`](bluetooth::BleEvent)s into a
//! [`BluetoothTransport`](bluetooth::BluetoothTransport) and the accessors
//! only read.

pub use openbot_proto as protocol;

use std::{fmt, str::FromStr};

pub mod clock;
pub mod config;
pub mod parser;
pub mod pipeline;
pub mod serial;
pub mod state;
pub mod throttle;

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
#[cfg(feature = "central")]
pub mod central;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, ParserConfig};
pub use parser::{Delivery, OpenBotParser, OpenBotParserBuilder, SendError};
pub use pipeline::{FeedOutcome, Pipeline, SharedPipeline};
pub use serial::{PollOutcome, SerialError, SerialTransport};
pub use state::{LatestTarget, SharedTarget};

/// Which transport the parser reads from and sends through.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum ConnectionMode {
    /// USB serial, polled from the accessor calls.
    #[default]
    Serial,
    /// Bluetooth LE peripheral, fed by radio events.
    Bluetooth,
}

impl ConnectionMode {
    /// Numeric code used by block-based front ends: `0` serial, `1` Bluetooth.
    pub const fn code(self) -> u8 {
        match self {
            ConnectionMode::Serial => 0,
            ConnectionMode::Bluetooth => 1,
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, ConnectionMode::Serial)
    }

    pub fn is_bluetooth(&self) -> bool {
        matches!(self, ConnectionMode::Bluetooth)
    }
}

impl TryFrom<u8> for ConnectionMode {
    type Error = ConfigError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ConnectionMode::Serial),
            1 => Ok(ConnectionMode::Bluetooth),
            other => Err(ConfigError::InvalidConnectionMode(other.to_string())),
        }
    }
}

impl FromStr for ConnectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "serial" | "usb" => Ok(ConnectionMode::Serial),
            "1" | "bluetooth" | "ble" => Ok(ConnectionMode::Bluetooth),
            _ => Err(ConfigError::InvalidConnectionMode(s.to_string())),
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionMode::Serial => "serial",
            ConnectionMode::Bluetooth => "bluetooth",
        })
    }
}
