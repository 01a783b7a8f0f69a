//! # Wire Constants and Types
//!
//! Core definitions for the length-prefixed radio frame:
//!
//! ```text
//! byte 0:    length L (= 2 + payload_len, excludes itself)
//! byte 1:    address
//! byte 2:    port (high nibble) | type (low nibble)
//! bytes 3..: payload
//! ```

use crate::error::{FrameError, FrameResult};

/// Maximum radio transmission, length byte included (transceiver FIFO limit)
pub const MAX_FRAME_BYTES: usize = 120;

/// Encoded header size (address + port/type)
pub const HEADER_SIZE: usize = 2;

/// Length prefix size
pub const LENGTH_PREFIX_SIZE: usize = 1;

/// Largest payload that still fits in one transmission (117 bytes)
pub const MAX_PAYLOAD_BYTES: usize = MAX_FRAME_BYTES - LENGTH_PREFIX_SIZE - HEADER_SIZE;

/// Control slots per frame; slot index doubles as reply timeslot
pub const SLOT_COUNT: usize = 6;

/// Default silence (ms) after which the base station treats a robot as gone
pub const CLIENT_TIMEOUT_MS: u64 = 200;

/// Address of the radio base station
pub const BASE_STATION_ADDR: u8 = 1;

/// Loopback address
pub const LOOPBACK_ADDR: u8 = 127;

/// Logical channel carried in the high nibble of header byte 2
///
/// Only `Control` is produced or consumed by the protocol entities. Every
/// other value, including unnamed nibbles, belongs to collaborator
/// subsystems and must survive a decode/encode cycle unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Sink,
    Link,
    Control,
    Discover,
    Logger,
    Tcp,
    Legacy,
    Ping,
    /// Unassigned port number (8-15)
    Reserved(u8),
}

impl Port {
    /// Build a port from the low 4 bits of `nibble`
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            0 => Port::Sink,
            1 => Port::Link,
            2 => Port::Control,
            3 => Port::Discover,
            4 => Port::Logger,
            5 => Port::Tcp,
            6 => Port::Legacy,
            7 => Port::Ping,
            n => Port::Reserved(n),
        }
    }

    /// 4-bit wire value
    pub fn as_nibble(self) -> u8 {
        match self {
            Port::Sink => 0,
            Port::Link => 1,
            Port::Control => 2,
            Port::Discover => 3,
            Port::Logger => 4,
            Port::Tcp => 5,
            Port::Legacy => 6,
            Port::Ping => 7,
            Port::Reserved(n) => n & 0x0F,
        }
    }
}

/// Payload kind carried in the low nibble of header byte 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Control,
    Tuning,
    FirmwareUpdate,
    Misc,
    /// Unassigned type number (4-15)
    Reserved(u8),
}

impl PayloadType {
    /// Build a payload type from the low 4 bits of `nibble`
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            0 => PayloadType::Control,
            1 => PayloadType::Tuning,
            2 => PayloadType::FirmwareUpdate,
            3 => PayloadType::Misc,
            n => PayloadType::Reserved(n),
        }
    }

    /// 4-bit wire value
    pub fn as_nibble(self) -> u8 {
        match self {
            PayloadType::Control => 0,
            PayloadType::Tuning => 1,
            PayloadType::FirmwareUpdate => 2,
            PayloadType::Misc => 3,
            PayloadType::Reserved(n) => n & 0x0F,
        }
    }
}

/// Common preamble of every frame (always 2 bytes on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Destination or source address
    pub address: u8,

    /// Logical channel
    pub port: Port,

    /// Payload kind
    pub payload_type: PayloadType,
}

impl FrameHeader {
    /// Create a header
    pub fn new(address: u8, port: Port, payload_type: PayloadType) -> Self {
        Self {
            address,
            port,
            payload_type,
        }
    }

    /// Header for control-port traffic to or from the base station
    pub fn control() -> Self {
        Self::new(BASE_STATION_ADDR, Port::Control, PayloadType::Control)
    }

    /// Pack into the two header bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        [
            self.address,
            (self.port.as_nibble() << 4) | self.payload_type.as_nibble(),
        ]
    }

    /// Unpack from the two header bytes
    pub fn from_bytes(bytes: [u8; HEADER_SIZE]) -> Self {
        Self {
            address: bytes[0],
            port: Port::from_nibble(bytes[1] >> 4),
            payload_type: PayloadType::from_nibble(bytes[1]),
        }
    }
}

/// A decoded frame: header plus owned payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Frame header
    pub header: FrameHeader,

    /// Payload data (max 117 bytes)
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` if the payload cannot fit in one transmission
    pub fn new(header: FrameHeader, payload: Vec<u8>) -> FrameResult<Self> {
        let len = LENGTH_PREFIX_SIZE + HEADER_SIZE + payload.len();
        if len > MAX_FRAME_BYTES {
            return Err(FrameError::FrameTooLarge {
                len,
                max: MAX_FRAME_BYTES,
            });
        }

        Ok(Self { header, payload })
    }

    /// Value of the length byte (header + payload)
    ///
    /// Cannot overflow: payload is validated to be at most 117 bytes.
    pub fn length(&self) -> u8 {
        (HEADER_SIZE + self.payload.len()) as u8
    }

    pub fn port(&self) -> Port {
        self.header.port
    }
}
