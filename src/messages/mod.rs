//! # Message Model
//!
//! Bit-exact layouts carried inside control-port frames.
//!
//! This module handles:
//! - Per-robot control commands and the six-slot control frame
//! - Per-robot status replies
//! - Explicit LSB-first bit packing (no platform bit-field layout)

pub mod bits;
pub mod control;
pub mod reply;

pub use control::{
    decode_control_frame, encode_control_frame, ControlFrame, ControlMessage, KickTrigger,
    CONTROL_FRAME_SIZE, ROBOT_ID_NONE,
};
pub use reply::{decode_reply, encode_reply, ReplyMessage, REPLY_SIZE};
