//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::entity::{ClientConfig, ServerConfig};
use crate::error::{RadioLinkError, Result};
use crate::rtp::protocol::{CLIENT_TIMEOUT_MS, SLOT_COUNT};
use crate::serial;

/// Which end of the link this process runs
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    BaseStation,
    Robot,
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub role: Role,

    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub robot: RobotConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// TDMA timing
#[derive(Debug, Deserialize, Clone)]
pub struct ProtocolConfig {
    /// Base station: silence before a robot's slot is reclaimed
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,

    #[serde(default = "default_slot_duration_us")]
    pub slot_duration_us: u64,

    /// Base station: control frames per second
    #[serde(default = "default_control_rate_hz")]
    pub control_rate_hz: u32,

    /// Robot: silence before dropping to disconnected
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,

    /// Robot: claim an open slot while unassigned
    #[serde(default = "default_claim_open_slots")]
    pub claim_open_slots: bool,

    /// Base station: reply transit time not covered by the slot delay.
    /// Estimated from the baud rate when unset.
    #[serde(default)]
    pub reply_latency_us: Option<u64>,
}

/// Robot identity
#[derive(Debug, Deserialize, Clone)]
pub struct RobotConfig {
    #[serde(default = "default_robot_id")]
    pub id: u8,

    #[serde(default)]
    pub hardware_revision: u8,
}

/// Log output
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write daily-rolling log files here
    #[serde(default)]
    pub dir: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { serial::DEFAULT_BAUD_RATE }

fn default_client_timeout_ms() -> u64 { CLIENT_TIMEOUT_MS }
fn default_slot_duration_us() -> u64 { 2000 }
fn default_control_rate_hz() -> u32 { 60 }
fn default_silence_timeout_ms() -> u64 { 500 }
fn default_claim_open_slots() -> bool { true }

fn default_robot_id() -> u8 { 1 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            client_timeout_ms: default_client_timeout_ms(),
            slot_duration_us: default_slot_duration_us(),
            control_rate_hz: default_control_rate_hz(),
            silence_timeout_ms: default_silence_timeout_ms(),
            claim_open_slots: default_claim_open_slots(),
            reply_latency_us: None,
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            id: default_robot_id(),
            hardware_revision: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> RadioLinkError {
    RadioLinkError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use radio_link::config::Config;
    ///
    /// let config = Config::load("config/base_station.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if ![9600, 57_600, 115_200, 230_400, 460_800, 921_600].contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 9600, 57600, 115200, 230400, 460800, 921600",
            ));
        }

        let protocol = &self.protocol;
        if protocol.client_timeout_ms == 0 || protocol.client_timeout_ms > 10_000 {
            return Err(invalid("client_timeout_ms must be between 1 and 10000"));
        }

        if protocol.slot_duration_us < 100 || protocol.slot_duration_us > 100_000 {
            return Err(invalid("slot_duration_us must be between 100 and 100000"));
        }

        if protocol.control_rate_hz == 0 || protocol.control_rate_hz > 1000 {
            return Err(invalid("control_rate_hz must be between 1 and 1000"));
        }

        if protocol.silence_timeout_ms == 0 || protocol.silence_timeout_ms > 60_000 {
            return Err(invalid("silence_timeout_ms must be between 1 and 60000"));
        }

        if matches!(protocol.reply_latency_us, Some(us) if us > 100_000) {
            return Err(invalid("reply_latency_us must be at most 100000"));
        }

        // Every reply slot must be heard before the next control frame
        let cycle = self.slot_duration() * SLOT_COUNT as u32 + self.reply_latency();
        if cycle > self.control_period() {
            return Err(invalid(format!(
                "{} slots of {} us plus {} us reply latency do not fit in one control period at {} Hz",
                SLOT_COUNT,
                protocol.slot_duration_us,
                self.reply_latency().as_micros(),
                protocol.control_rate_hz
            )));
        }

        if self.robot.id == 0 {
            return Err(invalid("robot id 0 is reserved for open slots"));
        }

        if self.robot.hardware_revision > 0x0F {
            return Err(invalid("hardware_revision must fit in 4 bits (0-15)"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        if matches!(&self.logging.dir, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging dir cannot be empty when set"));
        }

        Ok(())
    }

    /// Interval between control frames
    pub fn control_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.protocol.control_rate_hz.max(1)))
    }

    pub fn slot_duration(&self) -> Duration {
        Duration::from_micros(self.protocol.slot_duration_us)
    }

    /// Configured reply latency, or the serial-line estimate for the baud rate
    pub fn reply_latency(&self) -> Duration {
        match self.protocol.reply_latency_us {
            Some(us) => Duration::from_micros(us),
            None => serial::link_latency(self.serial.baud_rate),
        }
    }

    /// Settings for a robot client
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            robot_id: self.robot.id,
            hardware_revision: self.robot.hardware_revision,
            slot_duration: self.slot_duration(),
            silence_timeout: Duration::from_millis(self.protocol.silence_timeout_ms),
            claim_open_slots: self.protocol.claim_open_slots,
        }
    }

    /// Settings for the base station
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            client_timeout: Duration::from_millis(self.protocol.client_timeout_ms),
            slot_duration: self.slot_duration(),
            reply_latency: self.reply_latency(),
        }
    }
}
