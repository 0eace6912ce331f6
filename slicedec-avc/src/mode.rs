//! Macroblock mode and prediction syntax.
//!
//! Everything between the slice loop and the residual layer lives here:
//! skip and field flags, the per-slice-type mode trees, sub-partition
//! modes, intra prediction modes, the QP delta and raw-sample blocks.
//! Arithmetic readers adapt contexts picked by neighbor state; their
//! bit-serial counterparts sit next to them in the same function so the
//! two encodings cannot drift apart.

use slicedec_core::error::{BitstreamError, DecodeError, Result};

use crate::binarize;
use crate::context::{MotionContexts, B8_TYPE_CTX, MB_TYPE_CTX};
use crate::engine::{ArithDecoder, BiContext};
use crate::macroblock::{self, MbMode, B8_INTRA};
use crate::neighbor::{self, NeighborScope};
use crate::picture::Picture;
use crate::slice::{EntropyCoder, SliceContext, SliceType};

/// DC intra prediction, the most-probable-mode fallback.
pub const DC_PRED: i8 = 2;

/// Read the skip flag of an arithmetic P or B macroblock.
///
/// The context follows how many decoded neighbors carry coded syntax; B
/// slices use their own context row. A skipped macroblock resets the QP
/// delta chain.
pub fn read_skip_flag(pic: &mut Picture, ctx: &mut SliceContext<'_>, addr: usize) -> Result<bool> {
    let left = neighbor::left_mb(pic, addr, NeighborScope::SameSlice);
    let up = neighbor::up_mb(pic, addr, NeighborScope::SameSlice);
    let a = left.map_or(false, |m| !pic.mbs[m].skipped) as usize;
    let b = up.map_or(false, |m| !pic.mbs[m].skipped) as usize;

    let EntropyCoder::Cabac(decoder) = &mut ctx.coder else {
        return Err(BitstreamError::Other(
            "arithmetic skip flag on a bit-serial slice".into(),
        )
        .into());
    };
    let skipped = if ctx.params.slice_type == SliceType::B {
        decoder.decode_decision(&mut ctx.contexts.motion.mb_type[2][7 + a + b])?
    } else {
        decoder.decode_decision(&mut ctx.contexts.motion.mb_type[1][a + b])?
    };

    pic.mbs[addr].skipped = skipped;
    if skipped {
        ctx.last_dquant = 0;
    }
    Ok(skipped)
}

/// Read the field decoding flag of a macroblock pair.
///
/// Arithmetic slices condition on the field flags of the neighboring
/// pairs; bit-serial slices spend a plain bit.
pub fn read_field_flag(pic: &Picture, ctx: &mut SliceContext<'_>, addr: usize) -> Result<bool> {
    match &mut ctx.coder {
        EntropyCoder::Cabac(decoder) => {
            let nb = neighbor::mb_neighbors(pic, addr, NeighborScope::SameSlice);
            let a = nb.a.map_or(false, |m| pic.mbs[m].mb_field) as usize;
            let b = nb.b.map_or(false, |m| pic.mbs[m].mb_field) as usize;
            decoder.decode_decision(&mut ctx.contexts.motion.mb_aff[a + b])
        }
        EntropyCoder::Cavlc(reader) => reader.read_bit(),
    }
}

/// Peek at the bottom half of a pair whose top half was skipped.
///
/// The pair's field flag rides on whichever half transmits syntax first.
/// When the top is skipped the flag can only sit on the bottom, so its
/// skip flag (and, if coded, its field flag) are decoded ahead of turn,
/// the field flag is handed to the top, and the engine and every touched
/// context are put back so the bottom decodes normally later.
pub fn lookahead_bottom_skip(
    pic: &mut Picture,
    ctx: &mut SliceContext<'_>,
    addr: usize,
) -> Result<bool> {
    let saved_engine = match &ctx.coder {
        EntropyCoder::Cabac(decoder) => decoder.snapshot(),
        EntropyCoder::Cavlc(_) => {
            return Err(BitstreamError::Other(
                "pair lookahead on a bit-serial slice".into(),
            )
            .into())
        }
    };
    let saved_mb_type = ctx.contexts.motion.mb_type;
    let saved_mb_aff = ctx.contexts.motion.mb_aff;

    let bottom = addr + 1;
    pic.mbs[bottom].slice_nr = ctx.params.slice_nr;
    pic.mbs[bottom].mb_field = pic.mbs[addr].mb_field;

    ctx.last_dquant = 0;
    let skipped = read_skip_flag(pic, ctx, bottom)?;
    if !skipped {
        let field = read_field_flag(pic, ctx, bottom)?;
        pic.mbs[addr].mb_field = field;
    }

    if let EntropyCoder::Cabac(decoder) = &mut ctx.coder {
        decoder.restore(saved_engine);
    }
    ctx.contexts.motion.mb_type = saved_mb_type;
    ctx.contexts.motion.mb_aff = saved_mb_aff;
    Ok(skipped)
}

/// Read a raw macroblock mode code in the slice's entropy mode.
///
/// Bit-serial slices carry a plain Exp-Golomb code (the P/SP offset for
/// the shared skip-run codeword is applied by the header reader);
/// arithmetic slices walk a per-slice-type tree.
pub fn read_mb_type(pic: &Picture, ctx: &mut SliceContext<'_>, addr: usize) -> Result<u32> {
    let slice_type = ctx.params.slice_type;
    match &mut ctx.coder {
        EntropyCoder::Cavlc(reader) => reader.read_ue(),
        EntropyCoder::Cabac(decoder) => {
            let motion = &mut ctx.contexts.motion;
            match slice_type {
                SliceType::I => read_mb_type_i(pic, decoder, motion, addr),
                SliceType::Si => read_mb_type_si(pic, decoder, motion, addr),
                SliceType::P | SliceType::Sp => read_mb_type_p(decoder, motion),
                SliceType::B => read_mb_type_b(pic, decoder, motion, addr),
            }
        }
    }
}

/// Extra bins of a 16x16 intra code: one for AC coefficients, up to two
/// for the chroma coded block pattern, two for the prediction mode.
///
/// `idx` lists the context of each bin; the I tree gives the chroma bins
/// their own contexts while the P and B trees repeat one.
fn read_i16_offset(
    decoder: &mut ArithDecoder<'_>,
    bank: &mut [BiContext; MB_TYPE_CTX],
    idx: [usize; 5],
) -> Result<u32> {
    let mut offset = 0;
    if decoder.decode_decision(&mut bank[idx[0]])? {
        offset += 12;
    }
    if decoder.decode_decision(&mut bank[idx[1]])? {
        offset += 4;
        if decoder.decode_decision(&mut bank[idx[2]])? {
            offset += 4;
        }
    }
    if decoder.decode_decision(&mut bank[idx[3]])? {
        offset += 2;
    }
    if decoder.decode_decision(&mut bank[idx[4]])? {
        offset += 1;
    }
    Ok(offset)
}

fn read_mb_type_i(
    pic: &Picture,
    decoder: &mut ArithDecoder<'_>,
    motion: &mut MotionContexts,
    addr: usize,
) -> Result<u32> {
    let left = neighbor::left_mb(pic, addr, NeighborScope::SameSlice);
    let up = neighbor::up_mb(pic, addr, NeighborScope::SameSlice);
    let a = left.map_or(false, |m| pic.mbs[m].mode != MbMode::Intra4x4) as usize;
    let b = up.map_or(false, |m| pic.mbs[m].mode != MbMode::Intra4x4) as usize;

    if !decoder.decode_decision(&mut motion.mb_type[0][a + b])? {
        return Ok(0);
    }
    if decoder.decode_terminate()? {
        return Ok(25);
    }
    Ok(1 + read_i16_offset(decoder, &mut motion.mb_type[0], [4, 5, 6, 7, 8])?)
}

fn read_mb_type_si(
    pic: &Picture,
    decoder: &mut ArithDecoder<'_>,
    motion: &mut MotionContexts,
    addr: usize,
) -> Result<u32> {
    let left = neighbor::left_mb(pic, addr, NeighborScope::SameSlice);
    let up = neighbor::up_mb(pic, addr, NeighborScope::SameSlice);

    // The switching-block prefix conditions on switching neighbors. Its
    // context row sits where the mode table runs into the sub-partition
    // table; kept there for bit-exactness with deployed decoders.
    let a = left.map_or(false, |m| pic.mbs[m].mode != MbMode::SIntra4x4) as usize;
    let b = up.map_or(false, |m| pic.mbs[m].mode != MbMode::SIntra4x4) as usize;
    if !decoder.decode_decision(&mut motion.b8_type[0][a + b])? {
        return Ok(0);
    }

    // Past the prefix the I tree applies, shifted up by one.
    let a = left.map_or(false, |m| pic.mbs[m].mode != MbMode::Intra4x4) as usize;
    let b = up.map_or(false, |m| pic.mbs[m].mode != MbMode::Intra4x4) as usize;
    if !decoder.decode_decision(&mut motion.mb_type[0][a + b])? {
        return Ok(1);
    }
    if decoder.decode_terminate()? {
        return Ok(26);
    }
    Ok(2 + read_i16_offset(decoder, &mut motion.mb_type[0], [4, 5, 6, 7, 8])?)
}

fn read_mb_type_p(decoder: &mut ArithDecoder<'_>, motion: &mut MotionContexts) -> Result<u32> {
    let act = if decoder.decode_decision(&mut motion.mb_type[1][4])? {
        if decoder.decode_decision(&mut motion.mb_type[1][7])? {
            7
        } else {
            6
        }
    } else if decoder.decode_decision(&mut motion.mb_type[1][5])? {
        if decoder.decode_decision(&mut motion.mb_type[1][7])? {
            2
        } else {
            3
        }
    } else if decoder.decode_decision(&mut motion.mb_type[1][6])? {
        4
    } else {
        1
    };
    if act <= 6 {
        return Ok(act);
    }

    if decoder.decode_terminate()? {
        return Ok(31);
    }
    Ok(act + read_i16_offset(decoder, &mut motion.mb_type[1], [8, 9, 9, 10, 10])?)
}

fn read_mb_type_b(
    pic: &Picture,
    decoder: &mut ArithDecoder<'_>,
    motion: &mut MotionContexts,
    addr: usize,
) -> Result<u32> {
    let left = neighbor::left_mb(pic, addr, NeighborScope::SameSlice);
    let up = neighbor::up_mb(pic, addr, NeighborScope::SameSlice);
    let a = left.map_or(false, |m| pic.mbs[m].mode != MbMode::Skip) as usize;
    let b = up.map_or(false, |m| pic.mbs[m].mode != MbMode::Skip) as usize;

    if !decoder.decode_decision(&mut motion.mb_type[2][a + b])? {
        return Ok(0);
    }
    if !decoder.decode_decision(&mut motion.mb_type[2][4])? {
        let one = decoder.decode_decision(&mut motion.mb_type[2][6])?;
        return Ok(1 + one as u32);
    }

    let mut act;
    if !decoder.decode_decision(&mut motion.mb_type[2][5])? {
        act = 3;
        for inc in [4, 2, 1] {
            if decoder.decode_decision(&mut motion.mb_type[2][6])? {
                act += inc;
            }
        }
        return Ok(act);
    }

    act = 12;
    for inc in [8, 4, 2] {
        if decoder.decode_decision(&mut motion.mb_type[2][6])? {
            act += inc;
        }
    }
    if act == 24 {
        act = 11;
    } else if act == 26 {
        act = 22;
    } else {
        if act == 22 {
            act = 23;
        }
        if decoder.decode_decision(&mut motion.mb_type[2][6])? {
            act += 1;
        }
    }
    if act <= 23 {
        return Ok(act);
    }

    // 16x16 intra tail, shared with the P tree.
    if decoder.decode_terminate()? {
        return Ok(48);
    }
    Ok(act + read_i16_offset(decoder, &mut motion.mb_type[1], [8, 9, 9, 10, 10])?)
}

/// Read the four sub-partition codes of an 8x8 macroblock and apply them.
pub fn read_sub_mb_types(pic: &mut Picture, ctx: &mut SliceContext<'_>, addr: usize) -> Result<()> {
    let slice_type = ctx.params.slice_type;
    for i in 0..4 {
        let value = match &mut ctx.coder {
            EntropyCoder::Cavlc(reader) => reader.read_ue()?,
            EntropyCoder::Cabac(decoder) => {
                if slice_type == SliceType::B {
                    read_b8_type_b(decoder, &mut ctx.contexts.motion.b8_type[1])?
                } else {
                    read_b8_type_p(decoder, &mut ctx.contexts.motion.b8_type[0])?
                }
            }
        };
        macroblock::set_b8_mode(&mut pic.mbs[addr], slice_type, value, i)?;
    }
    Ok(())
}

fn read_b8_type_p(
    decoder: &mut ArithDecoder<'_>,
    bank: &mut [BiContext; B8_TYPE_CTX],
) -> Result<u32> {
    if decoder.decode_decision(&mut bank[1])? {
        return Ok(0);
    }
    if !decoder.decode_decision(&mut bank[3])? {
        return Ok(1);
    }
    if decoder.decode_decision(&mut bank[4])? {
        Ok(2)
    } else {
        Ok(3)
    }
}

fn read_b8_type_b(
    decoder: &mut ArithDecoder<'_>,
    bank: &mut [BiContext; B8_TYPE_CTX],
) -> Result<u32> {
    if !decoder.decode_decision(&mut bank[0])? {
        return Ok(0);
    }

    let mut act;
    if !decoder.decode_decision(&mut bank[1])? {
        act = decoder.decode_decision(&mut bank[3])? as u32;
    } else if !decoder.decode_decision(&mut bank[2])? {
        act = 2;
        for inc in [2, 1] {
            if decoder.decode_decision(&mut bank[3])? {
                act += inc;
            }
        }
    } else if decoder.decode_decision(&mut bank[3])? {
        act = 10;
        if decoder.decode_decision(&mut bank[3])? {
            act += 1;
        }
    } else {
        act = 6;
        for inc in [2, 1] {
            if decoder.decode_decision(&mut bank[3])? {
                act += inc;
            }
        }
    }
    Ok(act + 1)
}

/// Read the intra prediction modes of a macroblock: one mode per intra
/// 4x4 block, plus the chroma mode when any prediction is intra.
///
/// Each 4x4 mode arrives relative to the most probable mode, the smaller
/// of the left and upper neighbors' modes with a DC fallback. In a
/// switching slice, switching blocks do not predict plain intra blocks.
pub fn read_ipred_modes(pic: &mut Picture, ctx: &mut SliceContext<'_>, addr: usize) -> Result<()> {
    let mut chroma_mode_present = pic.mbs[addr].is_intra();
    let (mx, my) = neighbor::mb_block_pos(pic, addr);
    let (bx0, by0) = (mx * 4, my * 4);

    for b8 in 0..4 {
        if pic.mbs[addr].b8mode[b8] != B8_INTRA {
            continue;
        }
        chroma_mode_present = true;
        for j in 0..2 {
            for i in 0..2 {
                let value = read_intra4x4_mode(ctx)?;

                let bx = ((b8 & 1) << 1) + i;
                let by = (b8 & 2) + j;
                let left = neighbor::luma_4x4_neighbor(
                    pic,
                    addr,
                    bx as i32,
                    by as i32,
                    -1,
                    0,
                    NeighborScope::SameSlice,
                );
                let top = neighbor::luma_4x4_neighbor(
                    pic,
                    addr,
                    bx as i32,
                    by as i32,
                    0,
                    -1,
                    NeighborScope::SameSlice,
                );

                let left_ok = left.available
                    && (!pic.params.constrained_intra_pred || pic.intra_block[left.mb_addr]);
                let top_ok = top.available
                    && (!pic.params.constrained_intra_pred || pic.intra_block[top.mb_addr]);
                let si_shadow = ctx.params.slice_type == SliceType::Si
                    && pic.mbs[addr].mode == MbMode::Intra4x4;
                let left_mode = if left_ok && !(si_shadow && pic.si_block[left.mb_addr]) {
                    pic.ipred_mode(left.pos_x, left.pos_y)
                } else {
                    -1
                };
                let top_mode = if top_ok && !(si_shadow && pic.si_block[top.mb_addr]) {
                    pic.ipred_mode(top.pos_x, top.pos_y)
                } else {
                    -1
                };

                let most_probable = if top_mode < 0 || left_mode < 0 {
                    DC_PRED
                } else {
                    top_mode.min(left_mode)
                };
                let dec = if value < 0 {
                    most_probable
                } else {
                    value + (value >= most_probable) as i8
                };
                pic.set_ipred_mode(bx0 + bx, by0 + by, dec);
            }
        }
    }

    if chroma_mode_present {
        let value = read_chroma_pred_mode(pic, ctx, addr)?;
        if value > 3 {
            return Err(DecodeError::InvalidChromaPredMode(value.min(255) as u8).into());
        }
        pic.mbs[addr].c_ipred_mode = value as u8;
    }
    Ok(())
}

/// One 4x4 intra mode: -1 selects the most probable mode, otherwise the
/// remaining modes counted with the most probable one removed.
fn read_intra4x4_mode(ctx: &mut SliceContext<'_>) -> Result<i8> {
    match &mut ctx.coder {
        EntropyCoder::Cabac(decoder) => {
            if decoder.decode_decision(&mut ctx.contexts.texture.ipr[0])? {
                return Ok(-1);
            }
            let mut value = 0i8;
            for shift in 0..3 {
                if decoder.decode_decision(&mut ctx.contexts.texture.ipr[1])? {
                    value |= 1 << shift;
                }
            }
            Ok(value)
        }
        EntropyCoder::Cavlc(reader) => {
            if reader.read_bit()? {
                return Ok(-1);
            }
            Ok(reader.read_bits(3)? as i8)
        }
    }
}

fn read_chroma_pred_mode(pic: &Picture, ctx: &mut SliceContext<'_>, addr: usize) -> Result<u32> {
    match &mut ctx.coder {
        EntropyCoder::Cavlc(reader) => reader.read_ue(),
        EntropyCoder::Cabac(decoder) => {
            let left = neighbor::left_mb(pic, addr, NeighborScope::SameSlice);
            let up = neighbor::up_mb(pic, addr, NeighborScope::SameSlice);
            let contrib = |m: Option<usize>| {
                m.map_or(0, |mb| {
                    if pic.mbs[mb].mode == MbMode::Pcm {
                        0
                    } else {
                        (pic.mbs[mb].c_ipred_mode != 0) as usize
                    }
                })
            };
            let ctx_idx = contrib(left) + contrib(up);
            if !decoder.decode_decision(&mut ctx.contexts.texture.cipr[ctx_idx])? {
                return Ok(0);
            }
            Ok(1 + binarize::unary_max(decoder, &mut ctx.contexts.texture.cipr[3..], 0, 2)?)
        }
    }
}

/// Read a QP delta and update the delta chain.
pub fn read_delta_qp(ctx: &mut SliceContext<'_>) -> Result<i32> {
    let delta = match &mut ctx.coder {
        EntropyCoder::Cavlc(reader) => reader.read_se()?,
        EntropyCoder::Cabac(decoder) => {
            let ctx_idx = (ctx.last_dquant != 0) as usize;
            let act = if decoder.decode_decision(&mut ctx.contexts.motion.delta_qp[ctx_idx])? {
                1 + binarize::unary(decoder, &mut ctx.contexts.motion.delta_qp[2..], 1)?
            } else {
                0
            };
            // Magnitudes alternate sign, negatives on even codes.
            let dquant = ((act + 1) / 2) as i32;
            if act & 1 == 0 {
                -dquant
            } else {
                dquant
            }
        }
    };
    ctx.last_dquant = delta;
    Ok(delta)
}

/// Read the raw samples of a PCM macroblock and stamp its side state.
///
/// Arithmetic slices discard any partial byte and restart the engine
/// after the samples; bit-serial slices align and read plain bytes. The
/// samples land in both the picture planes and the coefficient arena,
/// and every per-block count reads as fully coded afterwards.
pub fn read_ipcm(pic: &mut Picture, ctx: &mut SliceContext<'_>, addr: usize) -> Result<()> {
    let samples = match &mut ctx.coder {
        EntropyCoder::Cabac(decoder) => decoder.pcm_samples(384)?,
        EntropyCoder::Cavlc(reader) => {
            reader.align_to_byte();
            let mut bytes = Vec::with_capacity(384);
            for _ in 0..384 {
                bytes.push(reader.read_u8()?);
            }
            bytes
        }
    };

    // 256 luma bytes row-major, then each 8x8 chroma plane.
    let cof = &mut pic.coeffs[addr];
    for r in 0..16 {
        for c in 0..16 {
            cof[c / 4][r / 4][c % 4][r % 4] = samples[r * 16 + c] as i32;
        }
    }
    for r in 0..8 {
        for c in 0..8 {
            cof[c / 4][4 + r / 4][c % 4][r % 4] = samples[256 + r * 8 + c] as i32;
            cof[2 + c / 4][4 + r / 4][c % 4][r % 4] = samples[320 + r * 8 + c] as i32;
        }
    }

    let (px, py) = neighbor::mb_pos(pic, addr);
    for r in 0..16 {
        for c in 0..16 {
            pic.set_luma_sample(px + c, py + r, samples[r * 16 + c]);
        }
    }
    let (cx, cy) = (px / 2, py / 2);
    for r in 0..8 {
        for c in 0..8 {
            pic.set_chroma_sample(0, cx + c, cy + r, samples[256 + r * 8 + c]);
            pic.set_chroma_sample(1, cx + c, cy + r, samples[320 + r * 8 + c]);
        }
    }

    // Raw blocks count as fully coded wherever later macroblocks look,
    // except in the skip-flag contexts, which read them as skipped.
    pic.nz_coeff[addr] = [[16; 6]; 4];
    let mb = &mut pic.mbs[addr];
    mb.qp = 0;
    mb.skipped = true;
    mb.cbp_blk = 0xFFFF;
    ctx.last_dquant = 0;
    Ok(())
}
