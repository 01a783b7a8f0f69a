//! # Real-Time Packet Module
//!
//! Wire framing shared by every radio transmission.
//!
//! This module handles:
//! - Length-prefixed frame layout (length, address, port/type, payload)
//! - Port and payload-type nibbles
//! - Encoding with the 120-byte radio ceiling enforced up front
//! - Bounds-checked decoding that never trusts the length byte

pub mod protocol;
pub mod encoder;
pub mod decoder;

pub use decoder::decode;
pub use encoder::encode;
pub use protocol::{FrameHeader, Packet, PayloadType, Port};
