//! Polled serial transport.
//!
//! There is no reader thread. Each call to [`SerialTransport::poll`] asks the
//! [`ReadThrottle`] whether to read, then pulls bytes from a non-blocking
//! [`ByteSource`] into the shared [`Pipeline`](crate::Pipeline) until a target
//! is decoded, the source runs dry, or the per-poll budget is spent.

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use log::{debug, trace};
use openbot_proto::{CommandToken, DecodeError, Encode, TargetReport, LINE_TERMINATOR};
use thiserror::Error;

use crate::{
    clock::Clock,
    pipeline::{FeedOutcome, SharedPipeline},
    state::lock,
    throttle::{ReadPlan, ReadThrottle, ThrottleConfig},
};

/// Default baud rate of the phone link.
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// A byte stream that can be read without blocking.
pub trait ByteSource {
    /// Returns the next byte, or `Ok(None)` if none is available right now.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;
}

impl<T: ByteSource + ?Sized> ByteSource for Box<T> {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        (**self).read_byte()
    }
}

/// Adapts any [`Read`] into a [`ByteSource`].
///
/// End of stream, `WouldBlock` and `TimedOut` all mean "nothing right now".
#[derive(Debug)]
pub struct StreamSource<R> {
    inner: R,
}

impl<R: Read> StreamSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for StreamSource<R> {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.inner.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(feature = "serial")]
pub use port::{find_ports, SerialPortSource};

#[cfg(feature = "serial")]
mod port {
    use std::{
        io::{self, Read},
        time::Duration,
    };

    use log::{debug, info};
    use serialport::{SerialPort, SerialPortInfo, SerialPortType};

    use super::{ByteSource, SerialError};

    /// Lists the USB serial ports a phone could be attached to.
    pub fn find_ports() -> Result<Vec<SerialPortInfo>, SerialError> {
        let ports = serialport::available_ports()?;
        debug!("Found {} serial ports", ports.len());

        Ok(ports
            .into_iter()
            .filter(|port| matches!(port.port_type, SerialPortType::UsbPort(_)))
            .collect())
    }

    /// A hardware serial port read one byte at a time.
    pub struct SerialPortSource {
        port: Box<dyn SerialPort>,
    }

    impl SerialPortSource {
        /// Opens `path` at `baud_rate`, 8N1.
        pub fn open(path: &str, baud_rate: u32) -> Result<Self, SerialError> {
            let port = serialport::new(path, baud_rate)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .timeout(Duration::from_millis(1))
                .open()?;
            info!("Opened serial port {} at {} baud", path, baud_rate);

            Ok(Self { port })
        }

        /// A second handle to the same port, for writing command tokens.
        pub fn writer(&self) -> Result<Box<dyn SerialPort>, SerialError> {
            Ok(self.port.try_clone()?)
        }
    }

    impl ByteSource for SerialPortSource {
        fn read_byte(&mut self) -> io::Result<Option<u8>> {
            if self.port.bytes_to_read()? == 0 {
                return Ok(None);
            }

            let mut byte = [0u8; 1];
            match self.port.read(&mut byte) {
                Ok(0) => Ok(None),
                Ok(_) => Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
                Err(e) => Err(e),
            }
        }
    }
}

/// Result of one [`SerialTransport::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The throttle skipped this poll; the transport was not touched.
    Skipped,
    /// The transport had nothing to read.
    Empty,
    /// Bytes were consumed but no line completed with a decode result.
    Partial { consumed: usize },
    /// A target was decoded; reading stopped right after it.
    Decoded(TargetReport),
    /// At least one malformed target line was read and no good one followed.
    Rejected(DecodeError),
    /// The transport reported an error. Nothing was changed by it.
    TransportFailed,
}

#[derive(Error, Debug)]
pub enum SerialError {
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "serial")]
    #[error("Serialport Error: {0}")]
    SerialportError(#[from] serialport::Error),
}

/// Serial side of the link: a polled reader and a line writer.
pub struct SerialTransport {
    source: Box<dyn ByteSource + Send>,
    sink: Option<Box<dyn Write + Send>>,
    throttle: ReadThrottle,
    pipeline: SharedPipeline,
    clock: Arc<dyn Clock>,
}

impl SerialTransport {
    pub fn new(
        source: Box<dyn ByteSource + Send>,
        sink: Option<Box<dyn Write + Send>>,
        throttle: ThrottleConfig,
        pipeline: SharedPipeline,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            sink,
            throttle: ReadThrottle::new(throttle),
            pipeline,
            clock,
        }
    }

    /// Reads whatever the throttle allows and feeds it to the pipeline.
    pub fn poll(&mut self) -> PollOutcome {
        let now = self.clock.now_ms();
        let mut pipeline = lock(&self.pipeline);
        let age = now.saturating_sub(pipeline.target().snapshot().last_update_ms);

        let max_chars = match self.throttle.plan(age) {
            ReadPlan::Skip => {
                trace!("Skipping serial poll, target is {}ms old", age);
                return PollOutcome::Skipped;
            }
            ReadPlan::Read { max_chars } => max_chars,
        };

        let mut consumed = 0;
        let mut rejected = None;

        while consumed < max_chars {
            let byte = match self.source.read_byte() {
                Ok(Some(byte)) => byte,
                Ok(None) => {
                    if consumed == 0 {
                        self.throttle.mark_idle();
                        return PollOutcome::Empty;
                    }
                    break;
                }
                Err(e) => {
                    debug!("Serial read failed after {} bytes: {}", consumed, e);
                    return PollOutcome::TransportFailed;
                }
            };
            consumed += 1;

            match pipeline.feed(byte, now) {
                FeedOutcome::Decoded(report) => return PollOutcome::Decoded(report),
                FeedOutcome::Rejected(err) => rejected = Some(err),
                FeedOutcome::Pending | FeedOutcome::Ignored { .. } => {}
            }
        }

        match rejected {
            Some(err) => PollOutcome::Rejected(err),
            None => PollOutcome::Partial { consumed },
        }
    }

    /// Writes `token` and a line terminator, then flushes.
    ///
    /// Returns `Ok(false)` without writing when no writer is attached.
    pub fn send(&mut self, token: &CommandToken) -> Result<bool, SerialError> {
        let Some(sink) = self.sink.as_mut() else {
            debug!("No serial writer attached, dropping command {}", token);
            return Ok(false);
        };

        let mut line = token.to_bytes();
        line.push(LINE_TERMINATOR);

        trace!("sent command: {:?}", token);
        sink.write_all(&line)?;
        sink.flush()?;

        Ok(true)
    }

    pub fn throttle(&self) -> &ReadThrottle {
        &self.throttle
    }

    pub fn has_writer(&self) -> bool {
        self.sink.is_some()
    }

    /// Forgets the current burst; the next poll reads with the first-burst cap.
    pub fn reset_throttle(&mut self) {
        self.throttle.reset();
    }
}
