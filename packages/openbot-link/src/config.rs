//! Parser configuration and configuration errors.
//!
//! With the `config` feature, a [`ParserConfig`] can be read from INI text:
//!
//! ```ini
//! [connection]
//! mode = bluetooth
//! stale_after_ms = 100
//!
//! [smoothing]
//! window = 3
//!
//! [throttle]
//! fresh_window_ms = 30
//! burst_reset_ms = 50
//!
//! [serial]
//! port = /dev/ttyACM0
//! baud_rate = 115200
//!
//! [bluetooth]
//! device_name = OpenBot
//! ```
//!
//! Every key is optional and falls back to the defaults below.

use std::num::NonZeroUsize;

use log::error;
#[cfg(feature = "config")]
use serde::Deserialize;
use thiserror::Error;

use crate::{throttle::ThrottleConfig, ConnectionMode};

/// Errors raised while building or reconfiguring a parser. These are never
/// retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid connection mode {0:?}, expected serial (0) or bluetooth (1)")]
    InvalidConnectionMode(String),

    #[error("Serial mode selected but no serial port is attached")]
    SerialUnavailable,

    #[error("Bluetooth mode selected but no radio stack is attached")]
    RadioUnavailable,

    #[error("Invalid throttle configuration: {0}")]
    InvalidThrottle(&'static str),

    #[cfg(feature = "bluetooth")]
    #[error("Bluetooth Error: {0}")]
    Bluetooth(#[from] crate::bluetooth::BluetoothError),

    #[error("Serial Error: {0}")]
    Serial(#[from] crate::serial::SerialError),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "config")]
    #[error("Malformed configuration: {0}")]
    Ini(#[from] serde_ini::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Deserialize), serde(default))]
pub struct ConnectionConfig {
    /// `serial`/`usb`/`0` or `bluetooth`/`ble`/`1`.
    pub mode: String,
    /// Age after which a target counts as stale.
    pub stale_after_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Serial.to_string(),
            stale_after_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Deserialize), serde(default))]
pub struct SmoothingConfig {
    /// Moving-average window size. `0` disables smoothing.
    pub window: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Deserialize), serde(default))]
pub struct SerialConfig {
    /// Port to open. When unset, the port is attached programmatically.
    pub port: Option<String>,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Deserialize), serde(default))]
pub struct BluetoothConfig {
    /// Name placed in the advertising payload.
    pub device_name: String,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_name: "OpenBot".to_string(),
        }
    }
}

/// Everything an [`OpenBotParser`](crate::OpenBotParser) can be configured
/// with, short of the transports themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Deserialize), serde(default))]
pub struct ParserConfig {
    pub connection: ConnectionConfig,
    pub smoothing: SmoothingConfig,
    pub throttle: ThrottleConfig,
    pub serial: SerialConfig,
    pub bluetooth: BluetoothConfig,
}

impl ParserConfig {
    /// Parses INI text. Missing sections and keys keep their defaults.
    #[cfg(feature = "config")]
    pub fn from_ini_str(ini: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_ini::from_str(ini)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses an INI file.
    #[cfg(feature = "config")]
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_ini_str(&text)
    }

    pub fn connection_mode(&self) -> Result<ConnectionMode, ConfigError> {
        self.connection.mode.parse()
    }

    pub fn smoothing_window(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.smoothing.window)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let result = self
            .connection_mode()
            .and_then(|_| self.throttle.validate());

        if let Err(err) = &result {
            error!("Rejecting parser configuration: {}", err);
        }
        result
    }
}
