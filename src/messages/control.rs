//! # Control Messages
//!
//! Per-robot commands and the six-slot control frame broadcast by the base
//! station.
//!
//! Bit layout of one `ControlMessage` (75 bits, LSB-first):
//!
//! | Field          | Bits |
//! |----------------|------|
//! | recipient_id   | 8    |
//! | velocity_x     | 16   |
//! | velocity_y     | 16   |
//! | velocity_w     | 16   |
//! | kick_power     | 16   |
//! | chip           | 1    |
//! | kick_trigger   | 2    |
//!
//! A control frame is the 4-bit frame type followed by the six messages in
//! slot order: 454 bits, padded to 57 bytes.

use super::bits::{bytes_for_bits, BitReader, BitWriter};
use crate::error::{FrameError, FrameResult};
use crate::rtp::protocol::SLOT_COUNT;
use crate::rtp::PayloadType;

/// Robot id of an open (unassigned) slot
pub const ROBOT_ID_NONE: u8 = 0;

/// Packed size of one control message in bits
pub const CONTROL_MESSAGE_BITS: usize = 8 + 16 * 4 + 1 + 2;

/// Packed size of the frame type discriminant in bits
pub const FRAME_TYPE_BITS: usize = 4;

/// Packed size of a control frame in bits
pub const CONTROL_FRAME_BITS: usize = FRAME_TYPE_BITS + SLOT_COUNT * CONTROL_MESSAGE_BITS;

/// Packed size of a control frame in bytes (57)
pub const CONTROL_FRAME_SIZE: usize = bytes_for_bits(CONTROL_FRAME_BITS);

/// When the kicker fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KickTrigger {
    /// Do not kick
    #[default]
    None,
    /// Kick once the ball sensor trips
    OnBallSense,
    /// Kick right away
    Immediate,
}

impl KickTrigger {
    pub fn as_bits(self) -> u8 {
        match self {
            KickTrigger::None => 0,
            KickTrigger::OnBallSense => 1,
            KickTrigger::Immediate => 2,
        }
    }
}

impl TryFrom<u8> for KickTrigger {
    type Error = FrameError;

    fn try_from(value: u8) -> FrameResult<Self> {
        match value {
            0 => Ok(KickTrigger::None),
            1 => Ok(KickTrigger::OnBallSense),
            2 => Ok(KickTrigger::Immediate),
            other => Err(FrameError::InvalidKickTrigger(other)),
        }
    }
}

/// One robot's command for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlMessage {
    /// Robot being addressed (`ROBOT_ID_NONE` marks an open slot)
    pub recipient_id: u8,

    /// Linear velocity along x
    pub velocity_x: i16,

    /// Linear velocity along y
    pub velocity_y: i16,

    /// Angular velocity
    pub velocity_w: i16,

    /// Kick strength
    pub kick_power: u16,

    /// `true` to chip, `false` to kick flat
    pub chip: bool,

    /// Kicker trigger mode
    pub kick_trigger: KickTrigger,
}

impl ControlMessage {
    /// An open slot
    pub const fn open() -> Self {
        Self {
            recipient_id: ROBOT_ID_NONE,
            velocity_x: 0,
            velocity_y: 0,
            velocity_w: 0,
            kick_power: 0,
            chip: false,
            kick_trigger: KickTrigger::None,
        }
    }

    /// Stand-still command for `recipient_id`
    pub const fn hold(recipient_id: u8) -> Self {
        Self {
            recipient_id,
            ..Self::open()
        }
    }

    /// Whether this slot is unassigned
    pub fn is_open(&self) -> bool {
        self.recipient_id == ROBOT_ID_NONE
    }

    fn pack(&self, writer: &mut BitWriter<'_>) {
        writer.write(self.recipient_id as u32, 8);
        writer.write(self.velocity_x as u16 as u32, 16);
        writer.write(self.velocity_y as u16 as u32, 16);
        writer.write(self.velocity_w as u16 as u32, 16);
        writer.write(self.kick_power as u32, 16);
        writer.write(self.chip as u32, 1);
        writer.write(self.kick_trigger.as_bits() as u32, 2);
    }

    fn unpack(reader: &mut BitReader<'_>) -> FrameResult<Self> {
        let recipient_id = reader.read(8) as u8;
        let velocity_x = reader.read(16) as u16 as i16;
        let velocity_y = reader.read(16) as u16 as i16;
        let velocity_w = reader.read(16) as u16 as i16;
        let kick_power = reader.read(16) as u16;
        let chip = reader.read(1) == 1;
        let kick_trigger = KickTrigger::try_from(reader.read(2) as u8)?;

        Ok(Self {
            recipient_id,
            velocity_x,
            velocity_y,
            velocity_w,
            kick_power,
            chip,
            kick_trigger,
        })
    }
}

/// The unit broadcast by the base station each cycle
///
/// Slot index is positional and doubles as the reply timeslot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFrame {
    /// 4-bit frame discriminant
    pub frame_type: PayloadType,

    /// Exactly six slots, open ones carry `ROBOT_ID_NONE`
    pub slots: [ControlMessage; SLOT_COUNT],
}

impl Default for ControlFrame {
    fn default() -> Self {
        Self::empty()
    }
}

impl ControlFrame {
    /// A control frame with every slot open
    pub const fn empty() -> Self {
        Self {
            frame_type: PayloadType::Control,
            slots: [ControlMessage::open(); SLOT_COUNT],
        }
    }

    /// Build a frame from up to six messages, padding with open slots
    ///
    /// # Errors
    ///
    /// - `TooManySlots` if more than six messages are given
    /// - `DuplicateRecipient` if a robot appears twice
    pub fn from_messages(messages: &[ControlMessage]) -> FrameResult<Self> {
        if messages.len() > SLOT_COUNT {
            return Err(FrameError::TooManySlots(messages.len()));
        }

        let mut frame = Self::empty();
        frame.slots[..messages.len()].copy_from_slice(messages);
        frame.validate()?;
        Ok(frame)
    }

    /// Check that no non-zero robot id occupies two slots
    pub fn validate(&self) -> FrameResult<()> {
        for (i, msg) in self.slots.iter().enumerate() {
            if msg.is_open() {
                continue;
            }
            if self.slots[i + 1..]
                .iter()
                .any(|other| other.recipient_id == msg.recipient_id)
            {
                return Err(FrameError::DuplicateRecipient(msg.recipient_id));
            }
        }
        Ok(())
    }

    /// First slot addressed to `robot_id`
    pub fn find_recipient(&self, robot_id: u8) -> Option<(usize, &ControlMessage)> {
        self.slots
            .iter()
            .enumerate()
            .find(|(_, msg)| !msg.is_open() && msg.recipient_id == robot_id)
    }

    /// Indices of open slots, in slot order
    pub fn open_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, msg)| msg.is_open())
            .map(|(i, _)| i)
    }
}

/// Pack a control frame into its fixed 57-byte wire layout
pub fn encode_control_frame(frame: &ControlFrame) -> [u8; CONTROL_FRAME_SIZE] {
    let mut buf = [0u8; CONTROL_FRAME_SIZE];
    let mut writer = BitWriter::new(&mut buf);

    writer.write(frame.frame_type.as_nibble() as u32, FRAME_TYPE_BITS);
    for msg in frame.slots.iter() {
        msg.pack(&mut writer);
    }
    debug_assert_eq!(writer.position(), CONTROL_FRAME_BITS);

    buf
}

/// Unpack a control frame
///
/// Bytes beyond `CONTROL_FRAME_SIZE` are ignored.
///
/// # Errors
///
/// - `FrameTooShort` if fewer than 57 bytes are given
/// - `InvalidKickTrigger` if a slot carries kick trigger value 3
/// - `DuplicateRecipient` if a robot appears in two slots
pub fn decode_control_frame(bytes: &[u8]) -> FrameResult<ControlFrame> {
    if bytes.len() < CONTROL_FRAME_SIZE {
        return Err(FrameError::FrameTooShort {
            needed: CONTROL_FRAME_SIZE,
            got: bytes.len(),
        });
    }

    let mut reader = BitReader::new(&bytes[..CONTROL_FRAME_SIZE]);
    let frame_type = PayloadType::from_nibble(reader.read(FRAME_TYPE_BITS) as u8);

    let mut slots = [ControlMessage::open(); SLOT_COUNT];
    for slot in slots.iter_mut() {
        *slot = ControlMessage::unpack(&mut reader)?;
    }

    let frame = ControlFrame { frame_type, slots };
    frame.validate()?;
    Ok(frame)
}
