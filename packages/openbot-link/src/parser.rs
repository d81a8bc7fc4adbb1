//! The [`OpenBotParser`] facade.

use std::{io::Write, num::NonZeroUsize, sync::Arc, time::Duration};

use log::{debug, error, info};
use openbot_proto::{CommandToken, EncodeError, TargetBox, TargetDecoder, TargetField};
use thiserror::Error;

#[cfg(feature = "bluetooth")]
use crate::bluetooth::{BluetoothTransport, NotifyReport, PeripheralConfig, RadioStack};
use crate::{
    clock::{Clock, MonotonicClock},
    config::{ConfigError, ParserConfig},
    pipeline::{Pipeline, SharedPipeline},
    serial::{ByteSource, PollOutcome, SerialError, SerialTransport},
    state::{lock, LatestTarget, SharedTarget},
    throttle::ThrottleConfig,
    ConnectionMode,
};

/// Default age after which [`OpenBotParser::is_stale`] reports stale data.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_millis(100);

/// Where a sent command went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Nobody to send to: no serial writer, or no BLE peers. Not an error.
    NotConnected,
    /// Written and flushed to the serial port.
    Serial,
    /// Notified to BLE peers. Per-peer failures are listed in the report.
    #[cfg(feature = "bluetooth")]
    Bluetooth(NotifyReport),
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Invalid command token: {0}")]
    Encode(#[from] EncodeError),

    #[error("Serial Error: {0}")]
    Serial(#[from] SerialError),
}

/// Latest-target accessors over a serial or Bluetooth link.
///
/// On serial, [`get_x`](Self::get_x) and [`get_box`](Self::get_box) poll the
/// port before answering, and [`get_y`](Self::get_y) polls only while the
/// throttle's burst counter is below two. The other accessors never touch the
/// transport. Polls are debounced by the [`ReadThrottle`], so a caller reading
/// `x, y, w, h` in a tight loop does not hit the port on every call. On
/// Bluetooth every accessor is a pure read; bytes arrive through
/// [`bluetooth`](Self::bluetooth).
///
/// [`ReadThrottle`]: crate::throttle::ReadThrottle
pub struct OpenBotParser {
    mode: ConnectionMode,
    clock: Arc<dyn Clock>,
    target: SharedTarget,
    pipeline: SharedPipeline,
    serial: Option<SerialTransport>,
    #[cfg(feature = "bluetooth")]
    bluetooth: Option<Arc<BluetoothTransport>>,
    stale_after: Duration,
}

impl OpenBotParser {
    pub fn builder() -> OpenBotParserBuilder {
        OpenBotParserBuilder::default()
    }

    /// Polls the serial transport once, if it is the active one.
    ///
    /// Returns `None` in Bluetooth mode, where there is nothing to poll.
    pub fn refresh(&mut self) -> Option<PollOutcome> {
        if !self.mode.is_serial() {
            return None;
        }
        self.serial.as_mut().map(SerialTransport::poll)
    }

    fn refresh_if_burst_start(&mut self) {
        let burst_started = self
            .serial
            .as_ref()
            .is_some_and(|serial| serial.throttle().consecutive() < 2);
        if burst_started {
            self.refresh();
        }
    }

    pub fn get_x(&mut self) -> Option<i32> {
        self.refresh();
        self.latest().target().map(|report| report.x)
    }

    pub fn get_y(&mut self) -> Option<i32> {
        self.refresh_if_burst_start();
        self.latest().target().map(|report| report.y)
    }

    pub fn get_w(&self) -> Option<i32> {
        self.latest().target().map(|report| report.w)
    }

    pub fn get_h(&self) -> Option<i32> {
        self.latest().target().map(|report| report.h)
    }

    /// Polls, then returns the whole bounding box.
    pub fn get_box(&mut self) -> Option<TargetBox> {
        self.refresh();
        self.latest().bounding_box()
    }

    /// Width and height of the frame the target was detected in.
    pub fn get_image_size(&self) -> Option<(i32, i32)> {
        self.latest().target().map(|report| report.image_size())
    }

    /// Reads one field by name, with the same polling rules as the
    /// matching accessor.
    pub fn get_field(&mut self, field: TargetField) -> Option<i32> {
        match field {
            TargetField::X => self.get_x(),
            TargetField::Y => self.get_y(),
            TargetField::W => self.get_w(),
            TargetField::H => self.get_h(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.latest().available
    }

    /// Time since the latest target was decoded, or `None` if there is none.
    pub fn get_data_age(&self) -> Option<Duration> {
        self.latest()
            .age_ms(self.clock.now_ms())
            .map(Duration::from_millis)
    }

    /// Whether the latest target is missing or older than the stale threshold.
    pub fn is_stale(&self) -> bool {
        self.get_data_age()
            .map_or(true, |age| age > self.stale_after)
    }

    pub fn latest(&self) -> LatestTarget {
        self.target.snapshot()
    }

    /// A handle to the latest-target record, for readers on other threads.
    pub fn target(&self) -> SharedTarget {
        self.target.clone()
    }

    /// The Bluetooth transport, for wiring radio events into the parser.
    #[cfg(feature = "bluetooth")]
    pub fn bluetooth(&self) -> Option<Arc<BluetoothTransport>> {
        self.bluetooth.clone()
    }

    pub fn serial(&self) -> Option<&SerialTransport> {
        self.serial.as_ref()
    }

    pub fn connection_mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Switches the active transport.
    ///
    /// Any partially framed line is dropped. The latest target and smoothing
    /// windows carry over.
    ///
    /// # Errors
    ///
    /// Fails without changing anything if the requested transport was never
    /// attached.
    pub fn set_connection_mode(&mut self, mode: ConnectionMode) -> Result<(), ConfigError> {
        self.check_available(mode)?;

        lock(&self.pipeline).reset_framing();
        if let Some(serial) = self.serial.as_mut() {
            serial.reset_throttle();
        }
        #[cfg(feature = "bluetooth")]
        if let Some(bluetooth) = &self.bluetooth {
            bluetooth.set_active(mode.is_bluetooth());
        }

        if mode != self.mode {
            info!("Switching connection mode from {} to {}", self.mode, mode);
        }
        self.mode = mode;
        Ok(())
    }

    fn check_available(&self, mode: ConnectionMode) -> Result<(), ConfigError> {
        let result = match mode {
            ConnectionMode::Serial if self.serial.is_none() => Err(ConfigError::SerialUnavailable),
            ConnectionMode::Bluetooth if !self.has_bluetooth() => {
                Err(ConfigError::RadioUnavailable)
            }
            _ => Ok(()),
        };
        if let Err(err) = &result {
            error!("Cannot use {} mode: {}", mode, err);
        }
        result
    }

    #[cfg(feature = "bluetooth")]
    fn has_bluetooth(&self) -> bool {
        self.bluetooth.is_some()
    }

    #[cfg(not(feature = "bluetooth"))]
    fn has_bluetooth(&self) -> bool {
        false
    }

    /// Sends a command token to the peer over the active transport.
    ///
    /// Having nobody to send to is not an error; it is reported as
    /// [`Delivery::NotConnected`].
    pub fn send(&mut self, token: &str) -> Result<Delivery, SendError> {
        let token = CommandToken::new(token)?;

        match self.mode {
            ConnectionMode::Serial => {
                let sent = match self.serial.as_mut() {
                    Some(serial) => serial.send(&token)?,
                    None => false,
                };
                Ok(if sent {
                    Delivery::Serial
                } else {
                    Delivery::NotConnected
                })
            }
            #[cfg(feature = "bluetooth")]
            ConnectionMode::Bluetooth => match &self.bluetooth {
                Some(bluetooth) => {
                    let report = bluetooth.send(&token);
                    Ok(if report.is_empty() {
                        Delivery::NotConnected
                    } else {
                        Delivery::Bluetooth(report)
                    })
                }
                None => Ok(Delivery::NotConnected),
            },
            #[cfg(not(feature = "bluetooth"))]
            ConnectionMode::Bluetooth => Ok(Delivery::NotConnected),
        }
    }
}

type SerialParts = (Box<dyn ByteSource + Send>, Option<Box<dyn Write + Send>>);

/// Assembles an [`OpenBotParser`] from its transports and settings.
#[derive(Default)]
pub struct OpenBotParserBuilder {
    mode: ConnectionMode,
    smoothing: Option<NonZeroUsize>,
    throttle: ThrottleConfig,
    stale_after: Option<Duration>,
    clock: Option<Arc<dyn Clock>>,
    serial: Option<SerialParts>,
    #[cfg(feature = "bluetooth")]
    radio: Option<(Box<dyn RadioStack>, PeripheralConfig)>,
    /// Advertised name from configuration, applied to the radio in `build`.
    #[cfg(feature = "bluetooth")]
    device_name: Option<String>,
}

impl OpenBotParserBuilder {
    pub fn mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Moving-average window applied to every field. `None` disables
    /// smoothing.
    pub fn smoothing(mut self, window: Option<NonZeroUsize>) -> Self {
        self.smoothing = window;
        self
    }

    pub fn throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Attaches the serial transport. Without `sink`, sends over serial are
    /// no-ops.
    pub fn serial(
        mut self,
        source: impl ByteSource + Send + 'static,
        sink: Option<Box<dyn Write + Send>>,
    ) -> Self {
        self.serial = Some((Box::new(source), sink));
        self
    }

    /// Attaches a BLE radio stack. Advertising starts in [`Self::build`].
    #[cfg(feature = "bluetooth")]
    pub fn bluetooth(
        mut self,
        radio: impl RadioStack + 'static,
        peripheral: PeripheralConfig,
    ) -> Self {
        self.radio = Some((Box::new(radio), peripheral));
        self
    }

    /// Applies the settings in `config`.
    ///
    /// With the `serial` feature, a configured port is opened here. BLE
    /// radios are never created from configuration and must still be attached
    /// with [`Self::bluetooth`], before or after this call; the configured
    /// device name replaces the one in its [`PeripheralConfig`].
    pub fn from_config(mut self, config: &ParserConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        self.mode = config.connection_mode()?;
        self.smoothing = config.smoothing_window();
        self.throttle = config.throttle;
        self.stale_after = Some(Duration::from_millis(config.connection.stale_after_ms));

        #[cfg(feature = "serial")]
        if let Some(path) = &config.serial.port {
            let source = crate::serial::SerialPortSource::open(path, config.serial.baud_rate)?;
            let writer: Box<dyn Write + Send> = Box::new(source.writer()?);
            self.serial = Some((Box::new(source), Some(writer)));
        }

        #[cfg(feature = "bluetooth")]
        {
            self.device_name = Some(config.bluetooth.device_name.clone());
        }

        Ok(self)
    }

    /// Starts the attached transports and returns the parser.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidThrottle`] for unusable throttle thresholds.
    /// - [`ConfigError::SerialUnavailable`] or [`ConfigError::RadioUnavailable`]
    ///   when the selected mode's transport was not attached.
    /// - [`ConfigError::Bluetooth`] when the radio refuses to advertise.
    pub fn build(self) -> Result<OpenBotParser, ConfigError> {
        if let Err(err) = self.throttle.validate() {
            error!("Rejecting parser configuration: {}", err);
            return Err(err);
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let target = SharedTarget::new();
        let pipeline = Pipeline::new(TargetDecoder::new(self.smoothing), target.clone()).into_shared();

        let serial = self.serial.map(|(source, sink)| {
            SerialTransport::new(source, sink, self.throttle, pipeline.clone(), clock.clone())
        });

        #[cfg(feature = "bluetooth")]
        let bluetooth = match self.radio {
            Some((radio, mut peripheral)) => {
                if let Some(name) = self.device_name {
                    peripheral.device_name = name;
                }
                let transport =
                    BluetoothTransport::start(radio, peripheral, pipeline.clone(), clock.clone())?;
                transport.set_active(self.mode.is_bluetooth());
                Some(Arc::new(transport))
            }
            None => None,
        };

        let parser = OpenBotParser {
            mode: self.mode,
            clock,
            target,
            pipeline,
            serial,
            #[cfg(feature = "bluetooth")]
            bluetooth,
            stale_after: self.stale_after.unwrap_or(DEFAULT_STALE_AFTER),
        };
        parser.check_available(parser.mode)?;

        debug!(
            "Parser ready in {} mode, smoothing {:?}",
            parser.mode, self.smoothing
        );
        Ok(parser)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        io,
        num::NonZeroUsize,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use openbot_proto::{TargetBox, TargetField};

    use super::{Delivery, OpenBotParser, SendError};
    use crate::{clock::ManualClock, serial::ByteSource, ConfigError, ConnectionMode};

    #[derive(Clone, Default)]
    struct Feed {
        bytes: Arc<Mutex<VecDeque<u8>>>,
        reads: Arc<AtomicUsize>,
    }

    impl Feed {
        fn push(&self, data: &[u8]) {
            self.bytes.lock().unwrap().extend(data);
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl ByteSource for Feed {
        fn read_byte(&mut self) -> io::Result<Option<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.lock().unwrap().pop_front())
        }
    }

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn serial_parser(feed: &Feed, clock: &Arc<ManualClock>) -> OpenBotParser {
        OpenBotParser::builder()
            .clock(clock.clone())
            .serial(feed.clone(), None)
            .build()
            .unwrap()
    }

    #[test]
    fn get_box_reads_a_fresh_target() {
        let feed = Feed::default();
        let clock = Arc::new(ManualClock::new(1_000));
        let mut parser = serial_parser(&feed, &clock);

        assert_eq!(parser.get_box(), None);

        feed.push(b"t10,20,30,40,640,480\n");
        clock.advance(100);
        assert_eq!(
            parser.get_box(),
            Some(TargetBox {
                x: 10,
                y: 20,
                w: 30,
                h: 40
            })
        );
        assert!(parser.is_available());
        assert_eq!(parser.get_image_size(), Some((640, 480)));
    }

    #[test]
    fn accessor_bursts_are_coalesced() {
        let feed = Feed::default();
        let clock = Arc::new(ManualClock::new(1_000));
        let mut parser = serial_parser(&feed, &clock);
        feed.push(b"t1,2,3,4,5,6\n");

        assert_eq!(parser.get_x(), Some(1));
        assert_eq!(parser.get_y(), Some(2));
        assert_eq!(parser.get_w(), Some(3));
        assert_eq!(parser.get_h(), Some(4));
        let reads = feed.reads();

        clock.advance(5);
        assert_eq!(parser.get_x(), Some(1));
        assert_eq!(feed.reads(), reads, "fresh burst re-read the port");
    }

    #[test]
    fn get_y_polls_at_burst_start() {
        let feed = Feed::default();
        let clock = Arc::new(ManualClock::new(1_000));
        let mut parser = serial_parser(&feed, &clock);
        feed.push(b"t1,2,3,4,5,6\n");

        assert_eq!(parser.get_y(), Some(2));
    }

    #[test]
    fn get_field_dispatches_by_name() {
        let feed = Feed::default();
        let clock = Arc::new(ManualClock::new(0));
        let mut parser = serial_parser(&feed, &clock);
        feed.push(b"t5,6,7,8,9,10\n");

        assert_eq!(parser.get_field(TargetField::X), Some(5));
        assert_eq!(parser.get_field("h".parse().unwrap()), Some(8));
    }

    #[test]
    fn data_age_and_staleness() {
        let feed = Feed::default();
        let clock = Arc::new(ManualClock::new(500));
        let mut parser = serial_parser(&feed, &clock);

        assert_eq!(parser.get_data_age(), None);
        assert!(parser.is_stale());

        feed.push(b"t1,1,1,1,1,1\n");
        parser.get_x();
        clock.advance(40);
        assert_eq!(parser.get_data_age(), Some(Duration::from_millis(40)));
        assert!(!parser.is_stale());

        clock.advance(61);
        assert!(parser.is_stale());
    }

    #[test]
    fn smoothing_window_is_applied() {
        let feed = Feed::default();
        let clock = Arc::new(ManualClock::new(0));
        let mut parser = OpenBotParser::builder()
            .clock(clock.clone())
            .smoothing(NonZeroUsize::new(2))
            .serial(feed.clone(), None)
            .build()
            .unwrap();

        feed.push(b"t1,1,1,1,640,480\n");
        parser.get_x();
        feed.push(b"t3,3,3,3,640,480\n");
        clock.advance(100);

        assert_eq!(parser.get_box().map(<(i32, i32, i32, i32)>::from), Some((2, 2, 2, 2)));
    }

    #[test]
    fn serial_send_writes_line() {
        let sink = Sink::default();
        let mut parser = OpenBotParser::builder()
            .serial(Feed::default(), Some(Box::new(sink.clone())))
            .build()
            .unwrap();

        assert_eq!(parser.send("p1").unwrap(), Delivery::Serial);
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"p1\n");
    }

    #[test]
    fn send_without_writer_is_a_no_op() {
        let mut parser = OpenBotParser::builder()
            .serial(Feed::default(), None)
            .build()
            .unwrap();

        assert_eq!(parser.send("p0").unwrap(), Delivery::NotConnected);
    }

    #[test]
    fn invalid_tokens_are_rejected() {
        let sink = Sink::default();
        let mut parser = OpenBotParser::builder()
            .serial(Feed::default(), Some(Box::new(sink.clone())))
            .build()
            .unwrap();

        assert!(matches!(parser.send("p0\n"), Err(SendError::Encode(_))));
        assert!(matches!(parser.send(""), Err(SendError::Encode(_))));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn build_requires_selected_transport() {
        assert!(matches!(
            OpenBotParser::builder().build(),
            Err(ConfigError::SerialUnavailable)
        ));
        assert!(matches!(
            OpenBotParser::builder()
                .mode(ConnectionMode::Bluetooth)
                .serial(Feed::default(), None)
                .build(),
            Err(ConfigError::RadioUnavailable)
        ));
    }

    #[test]
    fn switching_to_missing_transport_keeps_mode() {
        let mut parser = OpenBotParser::builder()
            .serial(Feed::default(), None)
            .build()
            .unwrap();

        assert!(matches!(
            parser.set_connection_mode(ConnectionMode::Bluetooth),
            Err(ConfigError::RadioUnavailable)
        ));
        assert_eq!(parser.connection_mode(), ConnectionMode::Serial);
    }

    #[test]
    fn mode_switch_drops_partial_line() {
        let feed = Feed::default();
        let clock = Arc::new(ManualClock::new(0));
        let mut parser = serial_parser(&feed, &clock);

        feed.push(b"t1,2,3");
        parser.refresh();
        parser.set_connection_mode(ConnectionMode::Serial).unwrap();
        feed.push(b",4,5,6\n");
        clock.advance(100);
        parser.refresh();

        assert!(!parser.is_available());
    }
}
