//! # Serial Communication Module
//!
//! Handles serial communication with the USB radio dongle.
//!
//! This module handles:
//! - Opening the dongle's serial port (8N1, no flow control)
//! - Framing the byte stream with a `tokio_util` codec
//! - A [`Transport`](crate::transport::Transport) implementation that
//!   dispatches inbound frames by port and queues outbound ones
//! - Estimating how long frames spend on the serial line

pub mod codec;
pub mod transport;

pub use codec::RadioCodec;
pub use transport::SerialTransport;

use std::time::Duration;

use crate::error::{RadioLinkError, Result};
use crate::messages::{CONTROL_FRAME_SIZE, REPLY_SIZE};
use crate::rtp::protocol::{HEADER_SIZE, LENGTH_PREFIX_SIZE};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Default dongle baud rate
pub const DEFAULT_BAUD_RATE: u32 = 921_600;

/// Start, 8 data and stop bits per byte (8N1)
const BITS_PER_BYTE: u64 = 10;

/// Default dongle device paths to try (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // USB CDC devices
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// Radio dongle serial port
pub struct RadioSerial {
    port: tokio_serial::SerialStream,
    device_path: String,
}

impl std::fmt::Debug for RadioSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl RadioSerial {
    /// Open the dongle by trying the default device paths
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` if none of the paths could be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use radio_link::serial::{RadioSerial, DEFAULT_BAUD_RATE};
    ///
    /// fn main() -> anyhow::Result<()> {
    ///     let serial = RadioSerial::open(DEFAULT_BAUD_RATE)?;
    ///     println!("Connected to: {}", serial.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(baud_rate: u32) -> Result<Self> {
        Self::open_with_paths(DEFAULT_DEVICE_PATHS, baud_rate)
    }

    /// Open the dongle, trying `paths` in order
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened radio dongle at {} ({} baud)", path, baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                }
            }
        }

        Err(RadioLinkError::SerialPortNotFound(paths.join(", ")))
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| RadioLinkError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Path of the device that was opened
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Hand the port over for use with [`SerialTransport::spawn`]
    pub fn into_stream(self) -> tokio_serial::SerialStream {
        self.port
    }
}

/// Serial-line time for one control frame out and one reply back
///
/// This is the part of the round trip the base station sees between building
/// a control frame and timestamping a reply, on top of the reply slot delay.
pub fn link_latency(baud_rate: u32) -> Duration {
    let frame_overhead = LENGTH_PREFIX_SIZE + HEADER_SIZE;
    let bytes = (CONTROL_FRAME_SIZE + frame_overhead + REPLY_SIZE + frame_overhead) as u64;
    Duration::from_micros(bytes * BITS_PER_BYTE * 1_000_000 / u64::from(baud_rate.max(1)))
}
