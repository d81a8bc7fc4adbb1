use std::time::Duration;

use futures::StreamExt;
use log::info;
use openbot_link::{
    central::{find_devices, CentralError, PeerConnection},
    protocol::TargetReport,
};

/// Plays the phone: sweeps a target across the frame and prints the
/// commands the robot sends back.
#[tokio::main]
async fn main() -> Result<(), CentralError> {
    simplelog::TermLogger::init(
        log::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Always,
    )
    .unwrap();

    // Scan for 10 seconds, or until we find one device.
    let devices = find_devices(Duration::from_secs(10), Some(1)).await?;
    let Some(device) = devices.into_iter().next() else {
        info!("No OpenBot devices found");
        return Ok(());
    };

    let connection = PeerConnection::open(device).await?;
    let mut commands = connection.commands().await?;

    tokio::spawn(async move {
        while let Some(token) = commands.next().await {
            info!("Robot sent {}", token);
        }
    });

    let mut interval = tokio::time::interval(Duration::from_millis(33));
    for step in 0..300 {
        interval.tick().await;

        let x = 40 + (step * 4) % 560;
        connection
            .send_report(&TargetReport::from_fields([x, 240, 80, 120, 640, 480]))
            .await?;
    }

    connection.disconnect().await?;
    Ok(())
}
