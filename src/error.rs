//! # Error Types
//!
//! Custom error types for the radio link using `thiserror`.

use thiserror::Error;

/// Wire-level framing errors
///
/// Every variant describes a single bad frame. Receivers drop the frame and
/// carry on; none of these ever changes protocol state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Encoding would exceed the radio payload ceiling
    #[error("frame of {len} bytes exceeds the {max}-byte radio limit")]
    FrameTooLarge { len: usize, max: usize },

    /// Fewer bytes than the minimum header/frame size
    #[error("frame too short: need {needed} bytes, got {got}")]
    FrameTooShort { needed: usize, got: usize },

    /// Two slots of one control frame address the same robot
    #[error("robot {0} is addressed by more than one slot")]
    DuplicateRecipient(u8),

    /// More messages than a control frame has slots
    #[error("control frame has room for 6 messages, got {0}")]
    TooManySlots(usize),

    /// Kick trigger bits hold an undefined value
    #[error("invalid kick trigger mode {0}")]
    InvalidKickTrigger(u8),
}

/// Main error type for the radio link
#[derive(Debug, Error)]
pub enum RadioLinkError {
    /// Frame encode/decode errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Two robots replied into the same open slot during one cycle
    #[error("Slot {slot} claimed by robots {first} and {second} in the same cycle")]
    SlotCollision { slot: usize, first: u8, second: u8 },

    /// A tracked robot has been silent for longer than the client timeout
    #[error("Robot {robot_id} silent for {silent_ms} ms")]
    Timeout { robot_id: u8, silent_ms: u64 },

    /// Robot id 0 is the open-slot sentinel and cannot be addressed
    #[error("Invalid robot id: {0}")]
    InvalidRobotId(u8),

    /// Operation needs a started protocol entity
    #[error("Protocol entity is not started")]
    NotStarted,

    /// Scheduling a deferred task failed
    #[error("Timer error: {0}")]
    Timer(String),

    /// Transport collaborator errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No radio found at: {0}")]
    SerialPortNotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the radio link
pub type Result<T> = std::result::Result<T, RadioLinkError>;

/// Result type alias for frame codec operations
pub type FrameResult<T> = std::result::Result<T, FrameError>;
