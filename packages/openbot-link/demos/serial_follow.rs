use std::{io::Write, thread, time::Duration};

use log::{info, warn};
use openbot_link::{
    serial::{find_ports, SerialPortSource},
    ConfigError, OpenBotParser, ParserConfig,
};

fn main() -> Result<(), ConfigError> {
    simplelog::TermLogger::init(
        log::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Always,
    )
    .unwrap();

    // Optional INI file as the first argument.
    let config = match std::env::args().nth(1) {
        Some(path) => ParserConfig::load(path)?,
        None => ParserConfig::default(),
    };

    let mut builder = OpenBotParser::builder().from_config(&config)?;

    // No port in the config, use the first USB serial port we can find.
    if config.serial.port.is_none() {
        let Some(port) = find_ports()?.into_iter().next() else {
            return Err(ConfigError::SerialUnavailable);
        };
        let source = SerialPortSource::open(&port.port_name, config.serial.baud_rate)?;
        let writer: Box<dyn Write + Send> = Box::new(source.writer()?);
        builder = builder.serial(source, Some(writer));
    }

    let mut parser = builder.build()?;
    let mut following = false;

    loop {
        let target = parser.get_box();

        if target.is_some() != following {
            following = target.is_some();
            if let Err(e) = parser.send(if following { "p1" } else { "p0" }) {
                warn!("Failed to send command: {}", e);
            }
        }

        if let Some(target) = target {
            info!(
                "Target at ({}, {}) size {}x{}, age {:?}",
                target.x,
                target.y,
                target.w,
                target.h,
                parser.get_data_age().unwrap_or_default()
            );
        }

        thread::sleep(Duration::from_millis(20));
    }
}
