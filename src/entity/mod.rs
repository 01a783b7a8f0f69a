//! # Protocol Entities
//!
//! The two roles on the control port.
//!
//! This module handles:
//! - The shared start/stop/receive lifecycle
//! - Robot-side slot matching and timed replies (`client`)
//! - Base-station liveness tracking and slot arbitration (`server`)
//! - Cancellable deferred tasks and watchdogs for TDMA timing (`timer`)
//!
//! An entity is exactly one role, chosen when it is constructed.

pub mod client;
pub mod server;
pub mod timer;

pub use client::{ClientConfig, ConnectionState, ProtocolClient};
pub use server::{ClientInfo, ProtocolServer, ServerConfig};
pub use timer::{ScheduledTask, Watchdog};

use crate::error::Result;
use crate::rtp::Packet;

/// Lifecycle shared by the robot client and the base station
pub trait ProtocolEntity {
    /// Register on the control port
    ///
    /// Idempotent: calling it on a started entity does nothing.
    fn start(&self) -> Result<()>;

    /// Deregister from the control port, cancel pending timers and reset
    /// connection state
    ///
    /// Frames arriving after `stop` returns are never processed.
    fn stop(&self);

    /// Handle a frame that arrived on the control port
    fn on_receive(&self, packet: &Packet);

    fn is_started(&self) -> bool;
}
