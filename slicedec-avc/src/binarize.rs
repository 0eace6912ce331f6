//! Binarization readers built on the arithmetic engine.
//!
//! Syntax elements map to bin strings through a small set of schemes:
//! plain and truncated unary, unary with an Exp-Golomb escape (order 0 for
//! coefficient levels, order 3 for motion vector differences), and
//! bypass-coded Exp-Golomb. The magnitude decoders never return zero;
//! zero is a separate leading bin owned by the caller, as is the sign.
//!
//! Each reader has an encode counterpart so tests can assemble payloads
//! with the exact bin layout the readers expect.

use crate::engine::{ArithDecoder, ArithEncoder, BiContext};
use slicedec_core::error::{BitstreamError, Result};

/// Prefix length at which motion vector magnitudes escape to Exp-Golomb.
const MV_EXP_START: u32 = 8;
/// Prefix length at which coefficient levels escape to Exp-Golomb.
const LEVEL_EXP_START: u32 = 13;

/// Decode a unary bin string: a distinguished first bin, then continuation
/// bins at `ctx_offset` until the first zero.
pub fn unary(
    engine: &mut ArithDecoder<'_>,
    ctx: &mut [BiContext],
    ctx_offset: usize,
) -> Result<u32> {
    if !engine.decode_decision(&mut ctx[0])? {
        return Ok(0);
    }

    let mut symbol = 0;
    loop {
        let l = engine.decode_decision(&mut ctx[ctx_offset])?;
        symbol += 1;
        if !l {
            return Ok(symbol);
        }
    }
}

/// Decode a truncated unary bin string; `max_symbol` carries no
/// terminating zero.
pub fn unary_max(
    engine: &mut ArithDecoder<'_>,
    ctx: &mut [BiContext],
    ctx_offset: usize,
    max_symbol: u32,
) -> Result<u32> {
    if !engine.decode_decision(&mut ctx[0])? {
        return Ok(0);
    }
    if max_symbol == 1 {
        return Ok(1);
    }

    let mut symbol = 0;
    loop {
        let l = engine.decode_decision(&mut ctx[ctx_offset])?;
        symbol += 1;
        if !l {
            return Ok(symbol);
        }
        if symbol == max_symbol - 1 {
            return Ok(symbol + 1);
        }
    }
}

/// Decode a bypass-coded order-`k` Exp-Golomb value.
pub fn exp_golomb_bypass(engine: &mut ArithDecoder<'_>, k: u32) -> Result<u32> {
    let mut k = k;
    let mut symbol = 0u32;

    while engine.decode_bypass()? {
        symbol += 1 << k;
        k += 1;
        if k > 31 {
            return Err(BitstreamError::ExpGolombOverflow.into());
        }
    }

    let mut suffix = 0u32;
    for shift in (0..k).rev() {
        if engine.decode_bypass()? {
            suffix |= 1 << shift;
        }
    }

    Ok(symbol + suffix)
}

/// Decode a coefficient level magnitude tail.
///
/// All prefix bins share one context; a prefix of thirteen ones escapes to
/// an order-0 Exp-Golomb suffix.
pub fn unary_exp_golomb_level(engine: &mut ArithDecoder<'_>, ctx: &mut BiContext) -> Result<u32> {
    if !engine.decode_decision(ctx)? {
        return Ok(0);
    }

    let mut symbol = 0;
    let mut k = 1;
    let mut l = true;
    while l && k != LEVEL_EXP_START {
        l = engine.decode_decision(ctx)?;
        symbol += 1;
        k += 1;
    }
    if l {
        symbol += exp_golomb_bypass(engine, 0)? + 1;
    }
    Ok(symbol)
}

/// Decode a motion vector difference magnitude tail.
///
/// Continuation bins step through `ctx[1..=3]`, holding at `ctx[3]` once
/// `max_bin` is reached; a prefix of eight ones escapes to an order-3
/// Exp-Golomb suffix.
pub fn unary_exp_golomb_mv(
    engine: &mut ArithDecoder<'_>,
    ctx: &mut [BiContext],
    max_bin: u32,
) -> Result<u32> {
    if !engine.decode_decision(&mut ctx[0])? {
        return Ok(0);
    }

    let mut symbol = 0;
    let mut k = 1;
    let mut bin = 1;
    let mut ictx = 1;
    let mut l = true;
    while l && k != MV_EXP_START {
        l = engine.decode_decision(&mut ctx[ictx])?;
        bin += 1;
        if bin == 2 {
            ictx += 1;
        }
        if bin == max_bin {
            ictx += 1;
        }
        symbol += 1;
        k += 1;
    }
    if l {
        symbol += exp_golomb_bypass(engine, 3)? + 1;
    }
    Ok(symbol)
}

/// Encode a unary bin string, the inverse of [`unary`].
pub fn encode_unary(
    engine: &mut ArithEncoder,
    ctx: &mut [BiContext],
    ctx_offset: usize,
    value: u32,
) {
    if value == 0 {
        engine.encode_decision(&mut ctx[0], false);
        return;
    }
    engine.encode_decision(&mut ctx[0], true);
    for _ in 0..value - 1 {
        engine.encode_decision(&mut ctx[ctx_offset], true);
    }
    engine.encode_decision(&mut ctx[ctx_offset], false);
}

/// Encode a truncated unary bin string, the inverse of [`unary_max`].
pub fn encode_unary_max(
    engine: &mut ArithEncoder,
    ctx: &mut [BiContext],
    ctx_offset: usize,
    max_symbol: u32,
    value: u32,
) {
    if value == 0 {
        engine.encode_decision(&mut ctx[0], false);
        return;
    }
    engine.encode_decision(&mut ctx[0], true);
    if max_symbol == 1 {
        return;
    }
    for _ in 0..value - 1 {
        engine.encode_decision(&mut ctx[ctx_offset], true);
    }
    if value < max_symbol {
        engine.encode_decision(&mut ctx[ctx_offset], false);
    }
}

/// Encode a bypass-coded order-`k` Exp-Golomb value.
pub fn encode_exp_golomb_bypass(engine: &mut ArithEncoder, k: u32, value: u32) {
    let mut k = k;
    let mut value = value;

    while value >= (1 << k) {
        engine.encode_bypass(true);
        value -= 1 << k;
        k += 1;
    }
    engine.encode_bypass(false);

    for shift in (0..k).rev() {
        engine.encode_bypass(value & (1 << shift) != 0);
    }
}

/// Encode a coefficient level magnitude tail.
pub fn encode_unary_exp_golomb_level(engine: &mut ArithEncoder, ctx: &mut BiContext, value: u32) {
    if value == 0 {
        engine.encode_decision(ctx, false);
        return;
    }
    engine.encode_decision(ctx, true);

    if value < LEVEL_EXP_START {
        for _ in 0..value - 1 {
            engine.encode_decision(ctx, true);
        }
        engine.encode_decision(ctx, false);
    } else {
        for _ in 0..LEVEL_EXP_START - 1 {
            engine.encode_decision(ctx, true);
        }
        encode_exp_golomb_bypass(engine, 0, value - LEVEL_EXP_START);
    }
}

/// Encode a motion vector difference magnitude tail.
pub fn encode_unary_exp_golomb_mv(
    engine: &mut ArithEncoder,
    ctx: &mut [BiContext],
    max_bin: u32,
    value: u32,
) {
    if value == 0 {
        engine.encode_decision(&mut ctx[0], false);
        return;
    }
    engine.encode_decision(&mut ctx[0], true);

    let escaped = value >= MV_EXP_START;
    let tail = value.min(MV_EXP_START - 1);
    let mut bin = 1;
    let mut ictx = 1;
    for i in 0..tail {
        engine.encode_decision(&mut ctx[ictx], escaped || i + 1 < tail);
        bin += 1;
        if bin == 2 {
            ictx += 1;
        }
        if bin == max_bin {
            ictx += 1;
        }
    }
    if escaped {
        encode_exp_golomb_bypass(engine, 3, value - MV_EXP_START);
    }
}
