//! # Robot Radio Link Library
//!
//! TDMA radio protocol between one base station and up to six robots.
//!
//! The base station broadcasts a control frame holding one command per slot;
//! each robot finds its slot, acts on the command and replies after a delay
//! proportional to the slot index. Robots without a slot claim an open one
//! by replying in it, and the base station reclaims the slots of robots that
//! go silent.

pub mod config;
pub mod entity;
pub mod error;
pub mod messages;
pub mod rtp;
pub mod serial;
pub mod transport;

pub use entity::{ProtocolClient, ProtocolEntity, ProtocolServer};
pub use error::{FrameError, RadioLinkError, Result};
pub use rtp::protocol::{BASE_STATION_ADDR, CLIENT_TIMEOUT_MS, MAX_FRAME_BYTES, SLOT_COUNT};
