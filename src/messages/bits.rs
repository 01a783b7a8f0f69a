//! # Bit Packing
//!
//! Continuous LSB-first bitstream used by the control and reply layouts.
//!
//! Fields are written in order, each least-significant bit first. Stream
//! bit `n` lands in byte `n / 8` at bit position `n % 8`:
//!
//! ```text
//! Byte 0: F1[0:7]
//! Byte 1: F1[8:10] | F2[0:4]
//! ...
//! ```

/// Writes fixed-width fields into a zeroed buffer
#[derive(Debug)]
pub struct BitWriter<'a> {
    buf: &'a mut [u8],
    bit_index: usize,
}

impl<'a> BitWriter<'a> {
    /// Start writing at bit 0 of `buf`
    ///
    /// `buf` must be zeroed; only set bits are written.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, bit_index: 0 }
    }

    /// Append the low `width` bits of `value`
    ///
    /// # Panics
    ///
    /// Panics if the field would run past the end of the buffer. Callers
    /// size their buffers from the fixed layouts, so this is a logic error.
    pub fn write(&mut self, value: u32, width: usize) {
        debug_assert!(width <= 32);
        for bit in 0..width {
            if (value >> bit) & 1 == 1 {
                let byte_index = self.bit_index / 8;
                let bit_offset = self.bit_index % 8;
                self.buf[byte_index] |= 1 << bit_offset;
            }
            self.bit_index += 1;
        }
    }

    /// Number of bits written so far
    pub fn position(&self) -> usize {
        self.bit_index
    }
}

/// Reads fixed-width fields back out of a buffer
#[derive(Debug)]
pub struct BitReader<'a> {
    buf: &'a [u8],
    bit_index: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, bit_index: 0 }
    }

    /// Read the next `width` bits as an unsigned value
    ///
    /// # Panics
    ///
    /// Panics on reads past the end; decoders check buffer length first.
    pub fn read(&mut self, width: usize) -> u32 {
        debug_assert!(width <= 32);
        let mut value = 0u32;
        for bit in 0..width {
            let byte_index = self.bit_index / 8;
            let bit_offset = self.bit_index % 8;
            if (self.buf[byte_index] >> bit_offset) & 1 == 1 {
                value |= 1 << bit;
            }
            self.bit_index += 1;
        }
        value
    }

    pub fn position(&self) -> usize {
        self.bit_index
    }
}

/// Bytes needed to hold `bits` bits
pub const fn bytes_for_bits(bits: usize) -> usize {
    (bits + 7) / 8
}
