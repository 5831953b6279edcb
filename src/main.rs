//! Kinect frame publisher
//!
//! Streams depth and color frames and keeps the latest record of each in a
//! lock-guarded sink file. Prints a heartbeat line per housekeeping pass and
//! exits on interrupt or end of standard input.

use std::time::Duration;

use color_eyre::Result;
use tracing::info;

use kinect_publish::driver::SyntheticDriver;
use kinect_publish::runloop::{run_loop, Shutdown};
use kinect_publish::{Config, Session};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging; stdout carries heartbeats only
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kinect_publish=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(std::io::stderr)
        .init();

    info!("Kinect publisher launching...");

    // Load configuration
    let config = Config::load()?;

    let driver = SyntheticDriver::new(config.driver.synthetic_devices, config.driver.frame_rate);
    let mut session = Session::init(&driver, &config)?;
    session.start()?;

    let shutdown = Shutdown::new();
    shutdown.watch_interrupt();
    shutdown.watch_stdin()?;

    let mut stdout = tokio::io::stdout();
    run_loop(
        &mut session,
        &shutdown,
        Duration::from_millis(config.run.poll_interval_ms),
        &config.run.heartbeat,
        &mut stdout,
    )
    .await?;

    info!("Kinect publisher shut down");
    Ok(())
}
