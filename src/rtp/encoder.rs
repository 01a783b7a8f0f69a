//! # Frame Encoder
//!
//! Packs a header and payload into a length-prefixed radio frame.

use bytes::{BufMut, Bytes, BytesMut};

use super::protocol::*;
use crate::error::{FrameError, FrameResult};

/// Encode a header and payload into a complete wire frame
///
/// # Arguments
///
/// * `header` - Frame header (address, port, type)
/// * `payload` - Raw payload bytes
///
/// # Returns
///
/// * `FrameResult<Bytes>` - Length byte + 2 header bytes + payload
///
/// # Errors
///
/// Returns `FrameTooLarge` if the frame would exceed `MAX_FRAME_BYTES`.
/// The payload is never truncated.
///
/// # Examples
///
/// ```
/// use radio_link::rtp::{encode, FrameHeader};
///
/// let frame = encode(&FrameHeader::control(), &[0xAB, 0xCD]).unwrap();
/// assert_eq!(&frame[..], &[4, 1, 0x20, 0xAB, 0xCD]);
/// ```
pub fn encode(header: &FrameHeader, payload: &[u8]) -> FrameResult<Bytes> {
    let total = LENGTH_PREFIX_SIZE + HEADER_SIZE + payload.len();
    if total > MAX_FRAME_BYTES {
        return Err(FrameError::FrameTooLarge {
            len: total,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut frame = BytesMut::with_capacity(total);
    frame.put_u8((HEADER_SIZE + payload.len()) as u8); // Length
    frame.put_slice(&header.to_bytes()); // Address + port/type
    frame.put_slice(payload); // Payload

    Ok(frame.freeze())
}

/// Encode a decoded packet back onto the wire
pub fn encode_packet(packet: &Packet) -> FrameResult<Bytes> {
    encode(&packet.header, &packet.payload)
}
