//! Binary arithmetic decoding engine.
//!
//! The engine maintains a 9-bit range and a value register primed from the
//! first bytes of the slice payload. Every coded bin narrows the range; the
//! decoder renormalizes by shifting in one payload bit at a time whenever
//! the range drops below a quarter of the coding interval. Context-coded
//! bins split the range with a state-indexed table and adapt the context;
//! bypass bins split it evenly and touch nothing.
//!
//! A matching encoder lives here as well, used to assemble test payloads
//! bit-exactly.

use slicedec_core::error::{BitstreamError, Result};

/// Adaptive state for a single binary context.
///
/// The probability estimate is a 64-state index plus the identity of the
/// most probable symbol. Coding an MPS walks the state up the transition
/// table; coding an LPS walks it down and flips the MPS at state 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiContext {
    /// State index (0-63).
    state: u8,
    /// Most probable symbol.
    mps: bool,
}

impl BiContext {
    /// Create a context with an explicit state and MPS.
    pub fn new(state: u8, mps: bool) -> Self {
        Self {
            state: state.min(63),
            mps,
        }
    }

    /// Update the state after coding a symbol.
    pub fn update(&mut self, symbol: bool) {
        if symbol == self.mps {
            self.state = NEXT_STATE_MPS[self.state as usize];
        } else {
            if self.state == 0 {
                self.mps = !self.mps;
            }
            self.state = NEXT_STATE_LPS[self.state as usize];
        }
    }

    /// Get the current state.
    pub fn state(&self) -> u8 {
        self.state
    }

    /// Get the MPS value.
    pub fn mps(&self) -> bool {
        self.mps
    }
}

impl Default for BiContext {
    fn default() -> Self {
        Self {
            state: 0,
            mps: false,
        }
    }
}

// State transition tables shared by encoder and decoder.
const NEXT_STATE_MPS: [u8; 64] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
    17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32,
    33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48,
    49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 62, 63,
];

const NEXT_STATE_LPS: [u8; 64] = [
    0, 0, 1, 2, 2, 4, 4, 5, 6, 7, 8, 9, 9, 11, 11, 12,
    13, 13, 15, 15, 16, 16, 18, 18, 19, 19, 21, 21, 22, 22, 23, 24,
    24, 25, 26, 26, 27, 27, 28, 29, 29, 30, 30, 30, 31, 32, 32, 33,
    33, 33, 34, 34, 35, 35, 35, 36, 36, 36, 37, 37, 37, 38, 38, 63,
];

// LPS subrange, indexed by state and the two range quantization bits.
const RANGE_TAB_LPS: [[u8; 4]; 64] = [
    [128, 176, 208, 240], [128, 167, 197, 227], [128, 158, 187, 216], [123, 150, 178, 205],
    [116, 142, 169, 195], [111, 135, 160, 185], [105, 128, 152, 175], [100, 122, 144, 166],
    [95, 116, 137, 158], [90, 110, 130, 150], [85, 104, 123, 142], [81, 99, 117, 135],
    [77, 94, 111, 128], [73, 89, 105, 122], [69, 85, 100, 116], [66, 80, 95, 110],
    [62, 76, 90, 104], [59, 72, 86, 99], [56, 69, 81, 94], [53, 65, 77, 89],
    [51, 62, 73, 85], [48, 59, 69, 80], [46, 56, 66, 76], [43, 53, 63, 72],
    [41, 50, 59, 69], [39, 48, 56, 65], [37, 45, 54, 62], [35, 43, 51, 59],
    [33, 41, 48, 56], [32, 39, 46, 53], [30, 37, 43, 50], [29, 35, 41, 48],
    [27, 33, 39, 45], [26, 31, 37, 43], [24, 30, 35, 41], [23, 28, 33, 39],
    [22, 27, 32, 37], [21, 26, 30, 35], [20, 24, 29, 33], [19, 23, 27, 31],
    [18, 22, 26, 30], [17, 21, 25, 28], [16, 20, 23, 27], [15, 19, 22, 25],
    [14, 18, 21, 24], [14, 17, 20, 23], [13, 16, 19, 22], [12, 15, 18, 21],
    [12, 14, 17, 20], [11, 14, 16, 19], [11, 13, 15, 18], [10, 12, 15, 17],
    [10, 12, 14, 16], [9, 11, 13, 15], [9, 11, 12, 14], [8, 10, 12, 14],
    [8, 9, 11, 13], [7, 9, 11, 12], [7, 9, 10, 12], [7, 8, 10, 11],
    [6, 8, 9, 11], [6, 7, 9, 10], [6, 7, 8, 9], [2, 2, 2, 2],
];

const QUARTER: u32 = 0x100;
const HALF: u32 = 0x200;
const ONE: u32 = 0x400;

/// Saved engine registers for one-symbol lookahead.
///
/// Captures everything the decoder mutates. Restoring puts the engine back
/// exactly where the snapshot was taken, including the read cursor.
#[derive(Debug, Clone, Copy)]
pub struct EngineSnapshot {
    range: u32,
    value: u32,
    byte_pos: usize,
    bits_left: u8,
}

/// Arithmetic decoder over one slice partition.
#[derive(Debug)]
pub struct ArithDecoder<'a> {
    /// Input payload, emulation prevention already stripped.
    data: &'a [u8],
    /// Next byte to consume.
    byte_pos: usize,
    /// Unconsumed bits in the current byte.
    bits_left: u8,
    /// Coding interval width.
    range: u32,
    /// Value register (lookahead window into the payload).
    value: u32,
}

impl<'a> ArithDecoder<'a> {
    /// Create a decoder and prime the value register.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let mut decoder = Self {
            data,
            byte_pos: 0,
            bits_left: 0,
            range: HALF - 2,
            value: 0,
        };
        decoder.prime()?;
        Ok(decoder)
    }

    fn prime(&mut self) -> Result<()> {
        self.range = HALF - 2;
        self.value = 0;
        for _ in 0..9 {
            self.value = (self.value << 1) | (self.read_bit()? as u32);
        }
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool> {
        if self.bits_left == 0 {
            if self.byte_pos >= self.data.len() {
                return Err(BitstreamError::UnexpectedEnd {
                    position: self.byte_pos * 8,
                }
                .into());
            }
            self.bits_left = 8;
        }
        self.bits_left -= 1;
        let bit = (self.data[self.byte_pos] >> self.bits_left) & 1;
        if self.bits_left == 0 {
            self.byte_pos += 1;
        }
        Ok(bit != 0)
    }

    fn renormalize(&mut self) -> Result<()> {
        while self.range < QUARTER {
            self.range <<= 1;
            self.value = (self.value << 1) | (self.read_bit()? as u32);
        }
        Ok(())
    }

    /// Decode one context-coded bin and adapt the context.
    pub fn decode_decision(&mut self, ctx: &mut BiContext) -> Result<bool> {
        let q_range_idx = ((self.range >> 6) & 3) as usize;
        let lps_range = RANGE_TAB_LPS[ctx.state() as usize][q_range_idx] as u32;

        self.range -= lps_range;

        let symbol = if self.value >= self.range {
            self.value -= self.range;
            self.range = lps_range;
            !ctx.mps()
        } else {
            ctx.mps()
        };

        ctx.update(symbol);
        self.renormalize()?;

        Ok(symbol)
    }

    /// Decode one equiprobable bin.
    pub fn decode_bypass(&mut self) -> Result<bool> {
        self.value = (self.value << 1) | (self.read_bit()? as u32);

        if self.value >= self.range {
            self.value -= self.range;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Decode the end-of-slice bin.
    ///
    /// A set bin terminates the slice; the engine does not renormalize on
    /// that branch, leaving the cursor on the last meaningful bit.
    pub fn decode_terminate(&mut self) -> Result<bool> {
        self.range -= 2;

        if self.value >= self.range {
            Ok(true)
        } else {
            self.renormalize()?;
            Ok(false)
        }
    }

    /// Read raw byte-aligned samples, then restart the engine.
    ///
    /// PCM macroblocks carry their samples uncoded. Any partially consumed
    /// byte is discarded, `count` bytes are copied out, and the engine
    /// re-primes from the following byte.
    pub fn pcm_samples(&mut self, count: usize) -> Result<Vec<u8>> {
        if self.bits_left != 0 {
            self.bits_left = 0;
            self.byte_pos += 1;
        }
        if self.byte_pos + count > self.data.len() {
            return Err(BitstreamError::UnexpectedEnd {
                position: self.byte_pos * 8,
            }
            .into());
        }

        let samples = self.data[self.byte_pos..self.byte_pos + count].to_vec();
        self.byte_pos += count;
        self.prime()?;
        Ok(samples)
    }

    /// Byte offset where raw reads would resume.
    ///
    /// Counts every byte the engine has pulled into its registers. A
    /// partially consumed byte counts as pulled; its remaining bits are
    /// lost to any byte-aligned read.
    pub fn byte_offset(&self) -> usize {
        self.byte_pos + (self.bits_left > 0) as usize
    }

    /// Capture the engine registers.
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            range: self.range,
            value: self.value,
            byte_pos: self.byte_pos,
            bits_left: self.bits_left,
        }
    }

    /// Restore previously captured registers.
    pub fn restore(&mut self, snapshot: EngineSnapshot) {
        self.range = snapshot.range;
        self.value = snapshot.value;
        self.byte_pos = snapshot.byte_pos;
        self.bits_left = snapshot.bits_left;
    }
}

/// Arithmetic encoder, the bit-exact inverse of [`ArithDecoder`].
#[derive(Debug, Default)]
pub struct ArithEncoder {
    low: u32,
    range: u32,
    bits_outstanding: u32,
    buffer: u8,
    bits_in_buffer: u8,
    output: Vec<u8>,
}

impl ArithEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self {
            low: 0,
            range: HALF - 2,
            bits_outstanding: 0,
            buffer: 0,
            bits_in_buffer: 0,
            output: Vec::new(),
        }
    }

    fn put_bit(&mut self, bit: bool) {
        self.buffer = (self.buffer << 1) | (bit as u8);
        self.bits_in_buffer += 1;
        if self.bits_in_buffer == 8 {
            self.output.push(self.buffer);
            self.buffer = 0;
            self.bits_in_buffer = 0;
        }
    }

    fn put_bit_plus_outstanding(&mut self, bit: bool) {
        self.put_bit(bit);
        while self.bits_outstanding > 0 {
            self.put_bit(!bit);
            self.bits_outstanding -= 1;
        }
    }

    fn renormalize(&mut self) {
        while self.range < QUARTER {
            if self.low >= HALF {
                self.put_bit_plus_outstanding(true);
                self.low -= HALF;
            } else if self.low < QUARTER {
                self.put_bit_plus_outstanding(false);
            } else {
                self.bits_outstanding += 1;
                self.low -= QUARTER;
            }
            self.low <<= 1;
            self.range <<= 1;
        }
    }

    /// Encode one context-coded bin and adapt the context.
    pub fn encode_decision(&mut self, ctx: &mut BiContext, symbol: bool) {
        let q_range_idx = ((self.range >> 6) & 3) as usize;
        let lps_range = RANGE_TAB_LPS[ctx.state() as usize][q_range_idx] as u32;

        self.range -= lps_range;

        if symbol != ctx.mps() {
            self.low += self.range;
            self.range = lps_range;
        }

        ctx.update(symbol);
        self.renormalize();
    }

    /// Encode one equiprobable bin.
    pub fn encode_bypass(&mut self, symbol: bool) {
        self.low <<= 1;
        if symbol {
            self.low += self.range;
        }

        if self.low >= ONE {
            self.put_bit_plus_outstanding(true);
            self.low -= ONE;
        } else if self.low < HALF {
            self.put_bit_plus_outstanding(false);
        } else {
            self.bits_outstanding += 1;
            self.low -= HALF;
        }
    }

    /// Encode the end-of-slice bin.
    pub fn encode_terminate(&mut self, symbol: bool) {
        self.range -= 2;
        if symbol {
            self.low += self.range;
            self.range = 2;
        }
        self.renormalize();
    }

    /// Flush the remaining interval state and return the payload.
    pub fn finish(mut self) -> Vec<u8> {
        let bit9 = (self.low >> 9) & 1 != 0;
        let bit8 = (self.low >> 8) & 1 != 0;
        self.put_bit_plus_outstanding(bit9);
        self.put_bit(bit8);
        self.put_bit(true);
        while self.bits_in_buffer != 0 {
            self.put_bit(false);
        }
        self.output
    }
}
