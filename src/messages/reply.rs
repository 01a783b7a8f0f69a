//! # Reply Messages
//!
//! Status a robot sends back in its timeslot.
//!
//! Layout (12 bits, LSB-first, padded to 2 bytes): `sender_id` (8),
//! `hardware_revision` (4). Decoders ignore anything past the first two
//! bytes so telemetry can be appended later without breaking older
//! base stations.

use super::bits::{bytes_for_bits, BitReader, BitWriter};
use crate::error::{FrameError, FrameResult};

/// Packed size of a reply in bits
pub const REPLY_BITS: usize = 8 + 4;

/// Packed size of a reply in bytes
pub const REPLY_SIZE: usize = bytes_for_bits(REPLY_BITS);

/// One robot's status reply
///
/// Fields are only set through [`ReplyMessage::new`], which keeps the
/// revision within its 4-bit wire field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplyMessage {
    sender_id: u8,
    hardware_revision: u8,
}

impl ReplyMessage {
    pub fn new(sender_id: u8, hardware_revision: u8) -> Self {
        Self {
            sender_id,
            hardware_revision: hardware_revision & 0x0F,
        }
    }

    /// Robot sending the reply
    pub fn sender_id(&self) -> u8 {
        self.sender_id
    }

    /// Hardware (shell) revision, 4 bits
    pub fn hardware_revision(&self) -> u8 {
        self.hardware_revision
    }
}

/// Pack a reply
pub fn encode_reply(reply: &ReplyMessage) -> [u8; REPLY_SIZE] {
    let mut buf = [0u8; REPLY_SIZE];
    let mut writer = BitWriter::new(&mut buf);
    writer.write(reply.sender_id as u32, 8);
    writer.write(reply.hardware_revision as u32, 4);
    buf
}

/// Unpack a reply
///
/// # Errors
///
/// Returns `FrameTooShort` if fewer than 2 bytes are given
pub fn decode_reply(bytes: &[u8]) -> FrameResult<ReplyMessage> {
    if bytes.len() < REPLY_SIZE {
        return Err(FrameError::FrameTooShort {
            needed: REPLY_SIZE,
            got: bytes.len(),
        });
    }

    let mut reader = BitReader::new(bytes);
    let sender_id = reader.read(8) as u8;
    let hardware_revision = reader.read(4) as u8;

    Ok(ReplyMessage::new(sender_id, hardware_revision))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_size() {
        assert_eq!(REPLY_SIZE, 2);
    }

    #[test]
    fn test_encode_layout() {
        let buf = encode_reply(&ReplyMessage::new(0x3C, 0x9));
        assert_eq!(buf, [0x3C, 0x09]);
    }

    #[test]
    fn test_revision_masked_to_four_bits() {
        let reply = ReplyMessage::new(1, 0xF7);
        assert_eq!(reply.hardware_revision(), 0x07);

        // The high nibble must not leak into the bits after the field
        assert_eq!(encode_reply(&reply), [0x01, 0x07]);
    }

    #[test]
    fn test_round_trip() {
        let reply = ReplyMessage::new(200, 15);
        assert_eq!(decode_reply(&encode_reply(&reply)), Ok(reply));
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            decode_reply(&[5]),
            Err(FrameError::FrameTooShort { needed: 2, got: 1 })
        );
    }

    #[test]
    fn test_decode_tolerates_extension_bytes() {
        let reply = decode_reply(&[5, 0x32, 0x10, 0x0E]).unwrap();
        assert_eq!(reply.sender_id(), 5);
        assert_eq!(reply.hardware_revision(), 2);
    }
}
