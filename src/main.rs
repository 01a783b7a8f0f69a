//! # Radio Link
//!
//! Runs one end of the robot radio link over a USB radio dongle.
//!
//! ```bash
//! radio-link [config.toml]
//! ```
//!
//! As the base station it broadcasts a control frame every control period
//! and arbitrates reply slots; as a robot it answers in its assigned slot.
//! Both run until Ctrl+C, or until the serial link fails.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use radio_link::config::{Config, LoggingConfig, Role};
use radio_link::entity::{ProtocolClient, ProtocolEntity, ProtocolServer};
use radio_link::serial::transport::DEFAULT_QUEUE_DEPTH;
use radio_link::serial::{RadioSerial, SerialTransport};

/// Interval between link status log messages
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

const LOG_FILE_PREFIX: &str = "radio-link.log";

type IoTask = JoinHandle<radio_link::Result<()>>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            Config::load(&path).with_context(|| format!("Failed to load config from {}", path))?
        }
        None => Config::default(),
    };

    // Must outlive every log call
    let _log_guard = init_logging(&config.logging);

    info!("Radio link v{} starting as {:?}", env!("CARGO_PKG_VERSION"), config.role);

    let serial = RadioSerial::open_with_paths(&[config.serial.port.as_str()], config.serial.baud_rate)?;
    info!("Radio dongle opened at: {}", serial.device_path());

    let (transport, io_task) = SerialTransport::spawn(serial.into_stream(), DEFAULT_QUEUE_DEPTH);

    match config.role {
        Role::BaseStation => run_base_station(&config, transport, io_task).await,
        Role::Robot => run_robot(&config, transport, io_task).await,
    }
}

fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match &logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn run_base_station(config: &Config, transport: Arc<SerialTransport>, mut io_task: IoTask) -> Result<()> {
    let server = ProtocolServer::new(config.server_config(), transport);
    server.start()?;

    let period = config.control_period();
    let mut control = interval(period);
    control.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status = interval(STATUS_INTERVAL);

    info!("Transmitting control frames every {:?}", period);
    info!("Press Ctrl+C to exit");

    let mut frames_sent: u64 = 0;
    let outcome = loop {
        tokio::select! {
            _ = control.tick() => {
                match server.transmit_control_frame() {
                    Ok(_) => frames_sent += 1,
                    Err(e) => warn!("Failed to transmit control frame: {}", e),
                }
            }

            _ = status.tick() => {
                let slots = server.slot_assignments();
                let assigned = slots.iter().flatten().count();
                info!(frames_sent, assigned, "Slot assignments: {:?}", slots);
            }

            result = &mut io_task => break io_outcome(result),

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break Ok(());
            }
        }
    };

    server.stop();
    info!("Total control frames sent: {}", frames_sent);
    outcome
}

async fn run_robot(config: &Config, transport: Arc<SerialTransport>, mut io_task: IoTask) -> Result<()> {
    let client = ProtocolClient::new(config.client_config(), transport)?;
    client.start()?;

    let mut status = interval(STATUS_INTERVAL);
    info!("Robot {} listening for control frames", client.robot_id());
    info!("Press Ctrl+C to exit");

    let outcome = loop {
        tokio::select! {
            _ = status.tick() => {
                info!(
                    state = ?client.connection_state(),
                    slot = ?client.pending_reply_slot(),
                    "Current command: {:?}",
                    client.current_command()
                );
            }

            result = &mut io_task => break io_outcome(result),

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break Ok(());
            }
        }
    };

    client.stop();
    outcome
}

/// Turn the end of the serial I/O task into the process result
fn io_outcome(result: std::result::Result<radio_link::Result<()>, tokio::task::JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow!(e).context("Serial link failed")),
        Err(e) => Err(anyhow!("Serial I/O task aborted: {}", e)),
    }
}
