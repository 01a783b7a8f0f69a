//! Length-prefixed radio frame codec for the dongle byte stream.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::error::RadioLinkError;
use crate::rtp::decode;
use crate::rtp::encoder::encode_packet;
use crate::rtp::protocol::{Packet, HEADER_SIZE, LENGTH_PREFIX_SIZE, MAX_FRAME_BYTES};

/// Splits the dongle byte stream into wire frames and writes frames back
///
/// A length byte that cannot start a frame (below the header size, or
/// announcing more than the radio ceiling) is skipped one byte at a time
/// until the stream lines up again. Frame-level problems never surface as
/// decoder errors, since an error ends a `Framed` stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct RadioCodec;

impl RadioCodec {
    pub fn new() -> Self {
        RadioCodec
    }
}

impl Decoder for RadioCodec {
    type Item = Packet;
    type Error = RadioLinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(&length) = src.first() else {
                return Ok(None);
            };
            let length = length as usize;

            if length < HEADER_SIZE || length + LENGTH_PREFIX_SIZE > MAX_FRAME_BYTES {
                trace!(length, "Skipping impossible length byte");
                src.advance(1);
                continue;
            }

            let total = length + LENGTH_PREFIX_SIZE;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let frame = src.split_to(total);
            match decode(&frame) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) => debug!("Dropping undecodable frame: {}", e),
            }
        }
    }
}

impl Encoder<Packet> for RadioCodec {
    type Error = RadioLinkError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = encode_packet(&item)?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
