//! Bit-level access to slice partition data.
//!
//! Mode and motion syntax in CAVLC slices is plain fixed-length and
//! Exp-Golomb coded, read MSB-first from the unescaped slice payload. The
//! arithmetic decoding engine keeps its own cursor; this reader covers
//! everything byte- and bit-oriented around it, including the raw sample
//! reads of PCM macroblocks.

use crate::error::{BitstreamError, Error, Result};

/// A bitstream reader over an unescaped slice payload.
///
/// Reads are MSB-first. Running past the end of the buffer is a hard error
/// carrying the bit position, never a silent zero fill.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    /// Create a new bit reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    /// Current bit position from the start of the buffer.
    pub fn position(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }

    /// Number of bits left in the buffer.
    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position())
    }

    /// Check if the reader sits on a byte boundary.
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    /// Skip forward to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        if self.bit_pos != 0 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
    }

    /// Read a single bit.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_pos >= self.data.len() {
            return Err(BitstreamError::UnexpectedEnd {
                position: self.position(),
            }
            .into());
        }

        let bit = (self.data[self.byte_pos] >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }

        Ok(bit != 0)
    }

    /// Look at the next bit without consuming it.
    ///
    /// Interlaced streams need this: a skip run can end on a field-pair
    /// boundary where the next coded bit doubles as the pair's field flag
    /// and still belongs to the following macroblock.
    pub fn peek_bit(&self) -> Result<bool> {
        if self.byte_pos >= self.data.len() {
            return Err(BitstreamError::UnexpectedEnd {
                position: self.position(),
            }
            .into());
        }

        Ok((self.data[self.byte_pos] >> (7 - self.bit_pos)) & 1 != 0)
    }

    /// Read up to 32 bits as an unsigned integer.
    pub fn read_bits(&mut self, n: u8) -> Result<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(Error::invalid_param("cannot read more than 32 bits at once"));
        }
        if self.remaining_bits() < n as usize {
            return Err(BitstreamError::UnexpectedEnd {
                position: self.position(),
            }
            .into());
        }

        let mut value: u32 = 0;
        for _ in 0..n {
            value = (value << 1) | (self.read_bit()? as u32);
        }

        Ok(value)
    }

    /// Read a byte-aligned unsigned 8-bit value (PCM samples).
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bits(8).map(|v| v as u8)
    }

    /// Read an unsigned Exp-Golomb coded value, ue(v).
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0u8;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(BitstreamError::ExpGolombOverflow.into());
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let suffix = self.read_bits(leading_zeros)?;
        Ok((1u32 << leading_zeros) - 1 + suffix)
    }

    /// Read a signed Exp-Golomb coded value, se(v).
    ///
    /// Odd codes map to positive values, even codes to negative.
    pub fn read_se(&mut self) -> Result<i32> {
        let ue = self.read_ue()?;
        let magnitude = ue.div_ceil(2) as i32;
        if ue % 2 == 0 {
            Ok(-magnitude)
        } else {
            Ok(magnitude)
        }
    }

    /// Skip a number of bits.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining_bits() < n {
            return Err(BitstreamError::UnexpectedEnd {
                position: self.position(),
            }
            .into());
        }

        let new_pos = self.position() + n;
        self.byte_pos = new_pos / 8;
        self.bit_pos = (new_pos % 8) as u8;

        Ok(())
    }

    /// Check for more payload data before the trailing-bits pattern.
    ///
    /// Detects the end of a CAVLC slice: the last meaningful position is
    /// followed by a single 1 bit and zero padding to the byte boundary.
    pub fn more_rbsp_data(&self) -> bool {
        if self.byte_pos >= self.data.len() {
            return false;
        }

        if self.byte_pos == self.data.len() - 1 {
            let remaining = 8 - self.bit_pos;
            let mask = (1u8 << remaining) - 1;
            let bits = self.data[self.byte_pos] & mask;
            bits != (1 << (remaining - 1))
        } else {
            true
        }
    }
}

/// A bitstream writer, MSB-first.
///
/// The decoder proper never writes bits; this exists so tests can assemble
/// slice payloads with the exact layout the reader expects.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    bit_pos: u8,
}

impl BitWriter {
    /// Create a new bit writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current bit position.
    pub fn position(&self) -> usize {
        self.data.len() * 8 - (8 - self.bit_pos as usize) % 8
    }

    /// Check if the writer sits on a byte boundary.
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    /// Write a single bit.
    pub fn write_bit(&mut self, bit: bool) {
        if self.bit_pos == 0 {
            self.data.push(0);
        }

        if bit {
            let idx = self.data.len() - 1;
            self.data[idx] |= 1 << (7 - self.bit_pos);
        }

        self.bit_pos = (self.bit_pos + 1) % 8;
    }

    /// Write up to 32 bits from an unsigned integer.
    pub fn write_bits(&mut self, value: u32, n: u8) {
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Write an unsigned Exp-Golomb coded value.
    pub fn write_ue(&mut self, value: u32) {
        if value == 0 {
            self.write_bit(true);
            return;
        }

        let value_plus_1 = value + 1;
        let prefix_len = 31 - value_plus_1.leading_zeros();

        for _ in 0..prefix_len {
            self.write_bit(false);
        }
        self.write_bits(value_plus_1, prefix_len as u8 + 1);
    }

    /// Write a signed Exp-Golomb coded value.
    pub fn write_se(&mut self, value: i32) {
        let ue = if value <= 0 {
            (-2 * value) as u32
        } else {
            (2 * value - 1) as u32
        };
        self.write_ue(ue);
    }

    /// Pad with zero bits to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        while self.bit_pos != 0 {
            self.write_bit(false);
        }
    }

    /// Write the trailing-bits pattern: a 1 bit, then zeros to alignment.
    pub fn write_trailing_bits(&mut self) {
        self.write_bit(true);
        self.align_to_byte();
    }

    /// Get the written data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the written data, consuming the writer.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Remove emulation prevention bytes (0x03 after two zeros) from a payload.
///
/// Callers hand the decoder unescaped data; this is the helper that gets
/// them there from a raw NAL payload.
pub fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        if i + 2 < data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 3 {
            result.push(0);
            result.push(0);
            i += 3;
        } else {
            result.push(data[i]);
            i += 1;
        }
    }

    result
}

/// Insert emulation prevention bytes into a payload.
pub fn insert_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len() + data.len() / 100);
    let mut zeros = 0;

    for &byte in data {
        if zeros == 2 && byte <= 3 {
            result.push(3);
            zeros = 0;
        }

        result.push(byte);

        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }

    result
}
