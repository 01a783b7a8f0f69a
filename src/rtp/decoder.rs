//! # Frame Decoder
//!
//! Unpacks length-prefixed radio frames.

use super::protocol::*;
use crate::error::{FrameError, FrameResult};

/// Minimum decodable frame: length byte + 2 header bytes
pub const MIN_FRAME_SIZE: usize = LENGTH_PREFIX_SIZE + HEADER_SIZE;

/// Decode a complete wire frame
///
/// The length byte is treated as an upper bound only. The payload runs to
/// `min(1 + length, frame.len(), MAX_FRAME_BYTES)`, so a lying length byte
/// can shorten the payload but never causes a read past the end of `frame`,
/// and the payload never exceeds `MAX_PAYLOAD_BYTES`.
///
/// # Arguments
///
/// * `frame` - Frame bytes (length, address, port/type, payload)
///
/// # Returns
///
/// * `FrameResult<Packet>` - Decoded header and owned payload
///
/// # Errors
///
/// Returns `FrameTooShort` if:
/// - Fewer than 3 bytes are available
/// - The length byte declares less than a full header
pub fn decode(frame: &[u8]) -> FrameResult<Packet> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(FrameError::FrameTooShort {
            needed: MIN_FRAME_SIZE,
            got: frame.len(),
        });
    }

    let declared = frame[0] as usize;
    if declared < HEADER_SIZE {
        return Err(FrameError::FrameTooShort {
            needed: HEADER_SIZE,
            got: declared,
        });
    }

    let header = FrameHeader::from_bytes([frame[1], frame[2]]);

    let end = (LENGTH_PREFIX_SIZE + declared).min(frame.len()).min(MAX_FRAME_BYTES);
    let payload = frame[MIN_FRAME_SIZE..end].to_vec();

    Ok(Packet { header, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::encoder::encode;

    #[test]
    fn test_decode_empty_buffer() {
        assert_eq!(
            decode(&[]),
            Err(FrameError::FrameTooShort { needed: 3, got: 0 })
        );
    }

    #[test]
    fn test_decode_header_too_short() {
        // Length byte plus one header byte
        let result = decode(&[2, BASE_STATION_ADDR]);
        assert_eq!(result, Err(FrameError::FrameTooShort { needed: 3, got: 2 }));
    }

    #[test]
    fn test_decode_length_below_header() {
        let result = decode(&[1, BASE_STATION_ADDR, 0x20, 0xFF]);
        assert!(matches!(result, Err(FrameError::FrameTooShort { .. })));
    }

    #[test]
    fn test_decode_fields() {
        let packet = decode(&[4, 0x09, 0x42, 0xAA, 0xBB]).unwrap();
        assert_eq!(packet.header.address, 0x09);
        assert_eq!(packet.header.port, Port::Logger);
        assert_eq!(packet.header.payload_type, PayloadType::FirmwareUpdate);
        assert_eq!(packet.payload, vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_decode_length_byte_overstates() {
        // Claims 50 bytes follow, only 3 do
        let packet = decode(&[50, BASE_STATION_ADDR, 0x20, 0x01]).unwrap();
        assert_eq!(packet.payload, vec![0x01]);
    }

    #[test]
    fn test_decode_length_byte_bounds_payload() {
        // Trailing bytes after the declared length are not payload
        let packet = decode(&[3, BASE_STATION_ADDR, 0x20, 0x01, 0xEE, 0xEE]).unwrap();
        assert_eq!(packet.payload, vec![0x01]);
    }

    #[test]
    fn test_decode_max_length_byte() {
        let packet = decode(&[0xFF, 0, 0]).unwrap();
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_decode_oversized_buffer_capped_at_max_payload() {
        let mut frame = vec![0xFF, BASE_STATION_ADDR, 0x20];
        frame.resize(200, 0x5A);

        let packet = decode(&frame).unwrap();
        assert_eq!(packet.payload.len(), MAX_PAYLOAD_BYTES);

        // Whatever decodes must be sendable again
        let reencoded = encode(&packet.header, &packet.payload).unwrap();
        assert_eq!(reencoded.len(), MAX_FRAME_BYTES);
    }

    #[test]
    fn test_round_trip_every_port_and_type() {
        for port in 0..16u8 {
            for kind in 0..16u8 {
                let header = FrameHeader::new(
                    port.wrapping_mul(17),
                    Port::from_nibble(port),
                    PayloadType::from_nibble(kind),
                );
                let payload: Vec<u8> = (0..(port as usize * 7)).map(|i| i as u8).collect();

                let frame = encode(&header, &payload).unwrap();
                let packet = decode(&frame).unwrap();

                assert_eq!(packet.header, header);
                assert_eq!(packet.payload, payload);
            }
        }
    }

    #[test]
    fn test_round_trip_full_frame() {
        let payload = vec![0xC3; MAX_PAYLOAD_BYTES];
        let frame = encode(&FrameHeader::control(), &payload).unwrap();
        let packet = decode(&frame).unwrap();
        assert_eq!(packet.payload, payload);
    }
}
