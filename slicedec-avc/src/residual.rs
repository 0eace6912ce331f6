//! Coded block patterns and transform coefficient levels.
//!
//! After the macroblock header, a slice carries the coded block
//! pattern, an optional QP change, and run/level data for every coded
//! 4x4 block. Levels are dequantized into [`Picture::coeffs`] as they
//! arrive, so reconstruction works from scaled coefficients only. SP
//! and SI switching blocks keep their chroma DC levels raw.

use slicedec_core::error::{DecodeError, Result};

use crate::binarize;
use crate::cavlc::{self, CoeffClass};
use crate::context::{TextureContexts, ABS_CTX, BCBP_CTX, LAST_CTX, MAP_CTX, ONE_CTX};
use crate::engine::{ArithDecoder, BiContext};
use crate::macroblock::MbMode;
use crate::mode;
use crate::neighbor::{self, NeighborScope, PixelPos};
use crate::picture::{Picture, PictureStructure};
use crate::slice::{EntropyCoder, SliceContext, SliceType};
use crate::transform;

// Block categories indexing the texture context tables.
const LUMA_16DC: usize = 0;
const LUMA_16AC: usize = 1;
const LUMA_4X4: usize = 5;
const CHROMA_DC: usize = 6;
const CHROMA_AC: usize = 7;

/// Coefficient capacity of each block category.
const MAX_POS: [usize; 8] = [16, 15, 64, 32, 32, 16, 4, 15];

/// Categories whose significance scan starts at the DC position.
const C1_IS_DC: [bool; 8] = [true, false, true, true, true, true, true, false];

// Category remaps onto the shared context rows.
const TYPE2CTX_BCBP: [usize; 8] = [0, 1, 2, 2, 3, 4, 5, 6];
const TYPE2CTX_ONE: [usize; 8] = [0, 1, 2, 3, 3, 4, 5, 6];
const TYPE2CTX_ABS: [usize; 8] = [0, 1, 2, 3, 3, 4, 5, 6];

/// Clear the coefficient and nonzero-count state of one macroblock.
pub fn reset_coeffs(pic: &mut Picture, mb_addr: usize) {
    pic.coeffs[mb_addr] = [[[[0; 4]; 4]; 6]; 4];
    pic.nz_coeff[mb_addr] = [[0; 6]; 4];
}

/// Read the coded block pattern, the QP change, and all coefficient
/// levels of one macroblock.
pub fn read_cbp_and_coeffs(
    pic: &mut Picture,
    ctx: &mut SliceContext<'_>,
    mb_addr: usize,
) -> Result<()> {
    let mode = pic.mbs[mb_addr].mode;
    let intra16 = mode == MbMode::Intra16x16;
    let switching = (ctx.params.slice_type == SliceType::Sp && !mode.is_intra())
        || (ctx.params.slice_type == SliceType::Si && mode == MbMode::SIntra4x4);

    // Intra 16x16 macroblocks already carry their pattern in the mode.
    let cbp = if intra16 {
        pic.mbs[mb_addr].cbp
    } else {
        let intra_tables = matches!(mode, MbMode::Intra4x4 | MbMode::SIntra4x4);
        let cbp = match &mut ctx.coder {
            EntropyCoder::Cavlc(reader) => cavlc::read_cbp(reader, intra_tables)?,
            EntropyCoder::Cabac(decoder) => {
                read_cbp_cabac(pic, decoder, &mut ctx.contexts.texture, mb_addr)?
            }
        };
        pic.mbs[mb_addr].cbp = cbp;
        if cbp == 0 && ctx.coder.is_cabac() {
            ctx.last_dquant = 0;
        }
        cbp
    };

    if cbp != 0 || intra16 {
        let delta = mode::read_delta_qp(ctx)?;
        ctx.qp = transform::update_qp(ctx.qp, delta);
        pic.mbs[mb_addr].delta_quant = delta;
    }

    let field_coded =
        pic.params.structure != PictureStructure::Frame || pic.mbs[mb_addr].mb_field;
    let scan = transform::scan_order(field_coded);

    if intra16 {
        match &mut ctx.coder {
            EntropyCoder::Cavlc(reader) => {
                let (levels, runs, count) =
                    cavlc::decode_coeffs(reader, pic, mb_addr, CoeffClass::LumaIntra16Dc, 0, 0)?;
                let mut pos: i32 = -1;
                for k in 0..count {
                    pos += runs[k] as i32 + 1;
                    if pos > 15 {
                        return Err(DecodeError::CoefficientOverrun {
                            position: pos as usize,
                            capacity: 16,
                        }
                        .into());
                    }
                    let (x, y) = scan[pos as usize];
                    pic.coeffs[mb_addr][x][y][0][0] = levels[k];
                }
            }
            EntropyCoder::Cabac(decoder) => {
                let mut session = RunLevelSession::open(
                    decoder,
                    &mut ctx.contexts.texture,
                    pic,
                    mb_addr,
                    LUMA_16DC,
                    false,
                    (0, 0),
                    field_coded,
                )?;
                let mut pos: i32 = -1;
                loop {
                    let (level, run) = session.read_run_level();
                    if level == 0 {
                        break;
                    }
                    pos += run as i32 + 1;
                    let (x, y) = scan[pos as usize];
                    pic.coeffs[mb_addr][x][y][0][0] = level;
                }
            }
        }
        transform::intra16x16_dc_transform(&mut pic.coeffs[mb_addr], ctx.qp);
    }

    pic.mbs[mb_addr].qp = ctx.qp;
    let qp_per = (ctx.qp - transform::MIN_QP) / 6;
    let qp_rem = ((ctx.qp - transform::MIN_QP) % 6) as usize;
    let qp_chroma = transform::chroma_qp(ctx.qp, pic.params.chroma_qp_index_offset);
    let per_uv = (qp_chroma - transform::MIN_QP) / 6;
    let rem_uv = ((qp_chroma - transform::MIN_QP) % 6) as usize;

    // Luma 8x8 quadrants in raster order, four 4x4 blocks each.
    for block_y in (0..4).step_by(2) {
        for block_x in (0..4).step_by(2) {
            let b8 = 2 * (block_y / 2) + block_x / 2;
            let coded = cbp & (1 << b8) != 0;
            match &mut ctx.coder {
                EntropyCoder::Cavlc(reader) => {
                    for j in block_y..block_y + 2 {
                        for i in block_x..block_x + 2 {
                            if !coded {
                                pic.nz_coeff[mb_addr][i][j] = 0;
                                continue;
                            }
                            let class = if intra16 {
                                CoeffClass::LumaIntra16Ac
                            } else {
                                CoeffClass::Luma
                            };
                            let (levels, runs, count) =
                                cavlc::decode_coeffs(reader, pic, mb_addr, class, i, j)?;
                            let mut pos: i32 = if intra16 { 0 } else { -1 };
                            for k in 0..count {
                                pos += runs[k] as i32 + 1;
                                if pos > 15 {
                                    return Err(DecodeError::CoefficientOverrun {
                                        position: pos as usize,
                                        capacity: 16,
                                    }
                                    .into());
                                }
                                let (x, y) = scan[pos as usize];
                                pic.mbs[mb_addr].cbp_blk |= 1 << ((j << 2) + i);
                                pic.coeffs[mb_addr][i][j][x][y] =
                                    (levels[k] * transform::DEQUANT_COEF[qp_rem][x][y]) << qp_per;
                            }
                        }
                    }
                }
                EntropyCoder::Cabac(decoder) => {
                    if !coded {
                        continue;
                    }
                    let cat = if intra16 { LUMA_16AC } else { LUMA_4X4 };
                    for j in block_y..block_y + 2 {
                        for i in block_x..block_x + 2 {
                            let mut session = RunLevelSession::open(
                                decoder,
                                &mut ctx.contexts.texture,
                                pic,
                                mb_addr,
                                cat,
                                false,
                                (i, j),
                                field_coded,
                            )?;
                            let mut pos: i32 = if intra16 { 0 } else { -1 };
                            loop {
                                let (level, run) = session.read_run_level();
                                if level == 0 {
                                    break;
                                }
                                pos += run as i32 + 1;
                                let (x, y) = scan[pos as usize];
                                pic.mbs[mb_addr].cbp_blk |= 1 << ((j << 2) + i);
                                pic.coeffs[mb_addr][i][j][x][y] =
                                    (level * transform::DEQUANT_COEF[qp_rem][x][y]) << qp_per;
                            }
                        }
                    }
                }
            }
        }
    }

    // Chroma 2x2 DC planes, U then V.
    if cbp > 15 {
        for ll in (0..3).step_by(2) {
            let mut cofu = [0i32; 4];
            match &mut ctx.coder {
                EntropyCoder::Cavlc(reader) => {
                    let (levels, runs, count) =
                        cavlc::decode_coeffs(reader, pic, mb_addr, CoeffClass::ChromaDc, 0, 0)?;
                    let mut pos: i32 = -1;
                    for k in 0..count {
                        pos += runs[k] as i32 + 1;
                        if pos > 3 {
                            return Err(DecodeError::CoefficientOverrun {
                                position: pos as usize,
                                capacity: 4,
                            }
                            .into());
                        }
                        pic.mbs[mb_addr].cbp_blk |= 0xf0000 << (ll << 1);
                        cofu[pos as usize] = levels[k];
                    }
                }
                EntropyCoder::Cabac(decoder) => {
                    let mut session = RunLevelSession::open(
                        decoder,
                        &mut ctx.contexts.texture,
                        pic,
                        mb_addr,
                        CHROMA_DC,
                        ll != 0,
                        (0, 0),
                        field_coded,
                    )?;
                    let mut pos: i32 = -1;
                    loop {
                        let (level, run) = session.read_run_level();
                        if level == 0 {
                            break;
                        }
                        pos += run as i32 + 1;
                        pic.mbs[mb_addr].cbp_blk |= 0xf0000 << (ll << 1);
                        cofu[pos as usize] = level;
                    }
                }
            }

            if switching {
                pic.coeffs[mb_addr][ll][4][0][0] = cofu[0];
                pic.coeffs[mb_addr][ll + 1][4][0][0] = cofu[1];
                pic.coeffs[mb_addr][ll][5][0][0] = cofu[2];
                pic.coeffs[mb_addr][ll + 1][5][0][0] = cofu[3];
            } else {
                for c in &mut cofu {
                    *c *= transform::DEQUANT_COEF[rem_uv][0][0] << per_uv;
                }
                pic.coeffs[mb_addr][ll][4][0][0] = (cofu[0] + cofu[1] + cofu[2] + cofu[3]) >> 1;
                pic.coeffs[mb_addr][ll + 1][4][0][0] = (cofu[0] - cofu[1] + cofu[2] - cofu[3]) >> 1;
                pic.coeffs[mb_addr][ll][5][0][0] = (cofu[0] + cofu[1] - cofu[2] - cofu[3]) >> 1;
                pic.coeffs[mb_addr][ll + 1][5][0][0] = (cofu[0] - cofu[1] - cofu[2] + cofu[3]) >> 1;
            }
        }
    }

    // Chroma AC, U blocks before V blocks.
    if cbp > 31 {
        for block_x in (0..4).step_by(2) {
            match &mut ctx.coder {
                EntropyCoder::Cavlc(reader) => {
                    for j in 4..6 {
                        let j1 = j - 4;
                        for i in block_x..block_x + 2 {
                            let i1 = i % 2;
                            let (levels, runs, count) = cavlc::decode_coeffs(
                                reader,
                                pic,
                                mb_addr,
                                CoeffClass::ChromaAc,
                                i,
                                j,
                            )?;
                            let mut pos: i32 = 0;
                            for k in 0..count {
                                pos += runs[k] as i32 + 1;
                                if pos > 15 {
                                    return Err(DecodeError::CoefficientOverrun {
                                        position: pos as usize,
                                        capacity: 16,
                                    }
                                    .into());
                                }
                                let (x, y) = scan[pos as usize];
                                pic.mbs[mb_addr].cbp_blk |=
                                    1 << (16 + (j1 << 1) + i1 + (block_x << 1));
                                pic.coeffs[mb_addr][i][j][x][y] =
                                    (levels[k] * transform::DEQUANT_COEF[rem_uv][x][y]) << per_uv;
                            }
                        }
                    }
                }
                EntropyCoder::Cabac(decoder) => {
                    for j in 4..6 {
                        let j1 = j - 4;
                        for i in block_x..block_x + 2 {
                            let i1 = i % 2;
                            let mut session = RunLevelSession::open(
                                decoder,
                                &mut ctx.contexts.texture,
                                pic,
                                mb_addr,
                                CHROMA_AC,
                                i >= 2,
                                (i % 2, j / 5),
                                field_coded,
                            )?;
                            let mut pos: i32 = 0;
                            loop {
                                let (level, run) = session.read_run_level();
                                if level == 0 {
                                    break;
                                }
                                pos += run as i32 + 1;
                                let (x, y) = scan[pos as usize];
                                pic.mbs[mb_addr].cbp_blk |=
                                    1 << (16 + (j1 << 1) + i1 + (block_x << 1));
                                pic.coeffs[mb_addr][i][j][x][y] =
                                    (level * transform::DEQUANT_COEF[rem_uv][x][y]) << per_uv;
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Coded block pattern, binarized as four luma quadrant bins and a
/// two-bin chroma suffix, each conditioned on the already-decoded
/// neighborhood.
fn read_cbp_cabac(
    pic: &Picture,
    decoder: &mut ArithDecoder<'_>,
    texture: &mut TextureContexts,
    mb_addr: usize,
) -> Result<i32> {
    let mut cbp = 0i32;
    for mb_y in (0..4).step_by(2) {
        for mb_x in (0..4).step_by(2) {
            let b = if mb_y == 0 {
                match neighbor::up_mb(pic, mb_addr, NeighborScope::SameSlice) {
                    None => 0,
                    Some(m) if pic.mbs[m].mode == MbMode::Pcm => 0,
                    Some(m) => usize::from((pic.mbs[m].cbp >> (2 + mb_x / 2)) & 1 == 0),
                }
            } else {
                usize::from((cbp >> (mb_x / 2)) & 1 == 0)
            };
            let a = if mb_x == 0 {
                let p = neighbor::luma_4x4_neighbor(
                    pic,
                    mb_addr,
                    mb_x,
                    mb_y,
                    -1,
                    0,
                    NeighborScope::SameSlice,
                );
                if !p.available || pic.mbs[p.mb_addr].mode == MbMode::Pcm {
                    0
                } else {
                    usize::from((pic.mbs[p.mb_addr].cbp >> (2 * (p.y / 2) + 1)) & 1 == 0)
                }
            } else {
                usize::from((cbp >> mb_y) & 1 == 0)
            };
            if decoder.decode_decision(&mut texture.cbp[0][a + 2 * b])? {
                cbp += 1 << (mb_y + mb_x / 2);
            }
        }
    }

    let up = neighbor::up_mb(pic, mb_addr, NeighborScope::SameSlice);
    let left = neighbor::left_mb(pic, mb_addr, NeighborScope::SameSlice);
    let chroma_coded = |m: Option<usize>, both: bool| -> usize {
        match m {
            None => 0,
            Some(m) if pic.mbs[m].mode == MbMode::Pcm => 1,
            Some(m) => {
                let nb = pic.mbs[m].cbp;
                if both {
                    usize::from(nb > 15 && (nb >> 4) == 2)
                } else {
                    usize::from(nb > 15)
                }
            }
        }
    };
    let ctx = chroma_coded(left, false) + 2 * chroma_coded(up, false);
    if decoder.decode_decision(&mut texture.cbp[1][ctx])? {
        let ctx = chroma_coded(left, true) + 2 * chroma_coded(up, true);
        cbp += if decoder.decode_decision(&mut texture.cbp[2][ctx])? {
            32
        } else {
            16
        };
    }
    Ok(cbp)
}

/// Coded bit of a neighboring block, or the default when the neighbor
/// lies outside the slice. PCM neighbors count as fully coded.
fn coded_bit(pic: &Picture, p: &PixelPos, bit: usize, default: usize) -> usize {
    if !p.available {
        default
    } else if pic.mbs[p.mb_addr].mode == MbMode::Pcm {
        1
    } else {
        ((pic.mbs[p.mb_addr].cbp_bits >> bit) & 1) as usize
    }
}

/// Decode the coded block flag for one block category and record it in
/// the macroblock's per-block bit field for later neighbors.
fn read_coded_block_flag(
    decoder: &mut ArithDecoder<'_>,
    bcbp: &mut [BiContext; BCBP_CTX],
    pic: &mut Picture,
    mb_addr: usize,
    cat: usize,
    v_block: bool,
    subblock: (usize, usize),
) -> Result<bool> {
    let y_dc = cat == LUMA_16DC;
    let y_ac = cat == LUMA_16AC || cat == LUMA_4X4;
    let u_dc = cat == CHROMA_DC && !v_block;
    let v_dc = cat == CHROMA_DC && v_block;
    let u_ac = cat == CHROMA_AC && !v_block;
    let v_ac = cat == CHROMA_AC && v_block;
    let ac = y_ac || u_ac || v_ac;
    let (i, j) = if ac { subblock } else { (0, 0) };
    let base = if y_dc {
        0
    } else if y_ac {
        1
    } else if u_dc {
        17
    } else if v_dc {
        18
    } else if u_ac {
        19
    } else {
        23
    };

    let scope = NeighborScope::SameSlice;
    let (block_a, block_b) = if y_dc || y_ac {
        (
            neighbor::luma_4x4_neighbor(pic, mb_addr, i as i32, j as i32, -1, 0, scope),
            neighbor::luma_4x4_neighbor(pic, mb_addr, i as i32, j as i32, 0, -1, scope),
        )
    } else {
        (
            neighbor::chroma_4x4_neighbor(pic, mb_addr, i as i32, j as i32, -1, 0, scope),
            neighbor::chroma_4x4_neighbor(pic, mb_addr, i as i32, j as i32, 0, -1, scope),
        )
    };
    // Luma blocks pack 4x4 bit grids, chroma AC packs 2x2.
    let weight = if y_dc || y_ac { 4 } else { 2 };
    let pos_a = if ac && block_a.available {
        weight * block_a.y + block_a.x
    } else {
        0
    };
    let pos_b = if ac && block_b.available {
        weight * block_b.y + block_b.x
    } else {
        0
    };

    let default = usize::from(pic.mbs[mb_addr].mode.is_intra());
    let upper = coded_bit(pic, &block_b, base + pos_b, default);
    let left = coded_bit(pic, &block_a, base + pos_a, default);
    let coded = decoder.decode_decision(&mut bcbp[2 * upper + left])?;

    if coded {
        let bit = if y_dc {
            0
        } else if y_ac {
            1 + 4 * j + i
        } else if u_dc {
            17
        } else if v_dc {
            18
        } else if u_ac {
            19 + 2 * j + i
        } else {
            23 + 2 * j + i
        };
        pic.mbs[mb_addr].cbp_bits |= 1 << bit;
    }
    Ok(coded)
}

/// Significance map of one block: a significant flag per scan
/// position, each followed by a last flag when set. The final position
/// is implicitly significant when no last flag terminated the scan.
fn read_significance_map(
    decoder: &mut ArithDecoder<'_>,
    map: &mut [BiContext; MAP_CTX],
    last: &mut [BiContext; LAST_CTX],
    cat: usize,
    coeffs: &mut [i32; 16],
) -> Result<usize> {
    let n = MAX_POS[cat];
    let offset = usize::from(!C1_IS_DC[cat]);
    let mut count = 0;
    for k in 0..n - 1 {
        let pos = k + offset;
        if decoder.decode_decision(&mut map[pos])? {
            coeffs[k] = 1;
            count += 1;
            if decoder.decode_decision(&mut last[pos])? {
                return Ok(count);
            }
        }
    }
    coeffs[n - 1] = 1;
    Ok(count + 1)
}

/// Level magnitudes and signs for the significant positions, decoded
/// from the highest scan position downward.
fn read_significant_coefficients(
    decoder: &mut ArithDecoder<'_>,
    one: &mut [BiContext; ONE_CTX],
    abs: &mut [BiContext; ABS_CTX],
    cat: usize,
    coeffs: &mut [i32; 16],
) -> Result<()> {
    let mut c1: usize = 1;
    let mut c2: usize = 0;
    for i in (0..MAX_POS[cat]).rev() {
        if coeffs[i] != 0 {
            coeffs[i] += i32::from(decoder.decode_decision(&mut one[c1.min(4)])?);
            if coeffs[i] == 2 {
                coeffs[i] += binarize::unary_exp_golomb_level(decoder, &mut abs[c2.min(4)])? as i32;
                c1 = 0;
                c2 += 1;
            } else if c1 != 0 {
                c1 += 1;
            }
            if decoder.decode_bypass()? {
                coeffs[i] = -coeffs[i];
            }
        }
    }
    Ok(())
}

/// One block's worth of arithmetic-coded coefficients, decoded up
/// front and served as run/level pairs in scan order.
struct RunLevelSession {
    coeffs: [i32; 16],
    remaining: usize,
    pos: usize,
}

impl RunLevelSession {
    fn open(
        decoder: &mut ArithDecoder<'_>,
        texture: &mut TextureContexts,
        pic: &mut Picture,
        mb_addr: usize,
        cat: usize,
        v_block: bool,
        subblock: (usize, usize),
        field_ctx: bool,
    ) -> Result<Self> {
        let mut coeffs = [0i32; 16];
        let mut remaining = 0;
        let coded = read_coded_block_flag(
            decoder,
            &mut texture.bcbp[TYPE2CTX_BCBP[cat]],
            pic,
            mb_addr,
            cat,
            v_block,
            subblock,
        )?;
        if coded {
            let (map, last) = if field_ctx {
                (&mut texture.fld_map[cat], &mut texture.fld_last[cat])
            } else {
                (&mut texture.map[cat], &mut texture.last[cat])
            };
            remaining = read_significance_map(decoder, map, last, cat, &mut coeffs)?;
            read_significant_coefficients(
                decoder,
                &mut texture.one[TYPE2CTX_ONE[cat]],
                &mut texture.abs[TYPE2CTX_ABS[cat]],
                cat,
                &mut coeffs,
            )?;
        }
        Ok(RunLevelSession {
            coeffs,
            remaining,
            pos: 0,
        })
    }

    /// Next run/level pair; a zero level marks the end of the block.
    fn read_run_level(&mut self) -> (i32, usize) {
        if self.remaining == 0 {
            return (0, 0);
        }
        let mut run = 0;
        while self.coeffs[self.pos] == 0 {
            run += 1;
            self.pos += 1;
        }
        let level = self.coeffs[self.pos];
        self.pos += 1;
        self.remaining -= 1;
        (level, run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextBank;
    use crate::engine::ArithEncoder;
    use crate::picture::PictureParams;
    use crate::slice::{SliceParams, SlicePartition, SliceRefs};
    use slicedec_core::BitWriter;

    fn pic_params(width: usize, height: usize, mbaff: bool, cabac: bool) -> PictureParams {
        PictureParams {
            width_in_mbs: width,
            height_in_mbs: height,
            mbaff,
            structure: PictureStructure::Frame,
            entropy_cabac: cabac,
            constrained_intra_pred: false,
            chroma_qp_index_offset: 0,
            direct_8x8_inference: false,
        }
    }

    fn slice_ctx<'a>(pic: &Picture, data: &'a [u8], slice_type: SliceType) -> SliceContext<'a> {
        SliceContext::new(
            pic,
            SlicePartition::new(data),
            SliceParams {
                slice_type,
                ..SliceParams::default()
            },
            SliceRefs::default(),
        )
        .unwrap()
    }

    fn enc_bank() -> ContextBank {
        ContextBank::new(SliceParams::default().qp)
    }

    fn seal(mut encoder: ArithEncoder) -> Vec<u8> {
        encoder.encode_terminate(true);
        let mut data = encoder.finish();
        data.extend_from_slice(&[0, 0]);
        data
    }

    #[test]
    fn cavlc_luma_block_scales_into_place() {
        let mut pic = Picture::new(pic_params(1, 1, false, false));
        pic.mbs[0].slice_nr = 0;
        pic.mbs[0].mode = MbMode::Intra4x4;

        let mut w = BitWriter::new();
        w.write_ue(29); // coded_block_pattern 1, intra mapping
        w.write_se(2); // mb_qp_delta
        w.write_bits(0b1, 1); // block (0,0): no coefficients
        w.write_bits(0b000101, 6); // block (1,0): one coefficient, no trailing ones
        w.write_bits(0b1, 1); // level +1, bumped to +2
        w.write_bits(0b1, 1); // total_zeros 0
        w.write_bits(0b1, 1); // block (0,1): empty
        w.write_bits(0b1, 1); // block (1,1): empty
        w.write_trailing_bits();
        let data = w.into_data();

        let mut ctx = slice_ctx(&pic, &data, SliceType::I);
        read_cbp_and_coeffs(&mut pic, &mut ctx, 0).unwrap();

        assert_eq!(pic.mbs[0].cbp, 1);
        assert_eq!(pic.mbs[0].delta_quant, 2);
        assert_eq!(ctx.qp, 28);
        assert_eq!(pic.mbs[0].qp, 28);
        // Level 2 at the DC position of block (1,0), scaled for QP 28.
        assert_eq!(pic.coeffs[0][1][0][0][0], 512);
        assert_eq!(pic.coeffs[0][0][0][0][0], 0);
        assert_eq!(pic.mbs[0].cbp_blk, 0b10);
        assert_eq!(pic.nz_coeff[0][1][0], 1);
        assert_eq!(pic.nz_coeff[0][0][0], 0);
        assert_eq!(pic.nz_coeff[0][0][1], 0);
    }

    #[test]
    fn intra16_dc_plane_spreads_to_every_block() {
        let mut pic = Picture::new(pic_params(1, 1, false, false));
        pic.mbs[0].slice_nr = 0;
        pic.mbs[0].mode = MbMode::Intra16x16;
        pic.mbs[0].cbp = 0;

        let mut w = BitWriter::new();
        w.write_se(0); // mb_qp_delta
        w.write_bits(0b01, 2); // DC plane: one trailing one
        w.write_bits(0b0, 1); // positive sign
        w.write_bits(0b1, 1); // total_zeros 0
        w.write_trailing_bits();
        let data = w.into_data();

        let mut ctx = slice_ctx(&pic, &data, SliceType::I);
        read_cbp_and_coeffs(&mut pic, &mut ctx, 0).unwrap();

        // A lone DC impulse spreads evenly over all sixteen blocks.
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(pic.coeffs[0][i][j][0][0], 52, "block ({i},{j})");
                assert_eq!(pic.coeffs[0][i][j][1][1], 0);
            }
        }
        assert_eq!(pic.mbs[0].qp, 26);
        assert_eq!(pic.mbs[0].delta_quant, 0);
        assert_eq!(pic.mbs[0].cbp_blk, 0);
        assert_eq!(pic.nz_coeff[0], [[0; 6]; 4]);
    }

    #[test]
    fn cabac_zero_cbp_resets_delta_chain() {
        let mut pic = Picture::new(pic_params(1, 1, false, true));
        pic.mbs[0].slice_nr = 0;
        pic.mbs[0].mode = MbMode::Inter16x16;

        let mut enc = ArithEncoder::new();
        let mut bank = enc_bank();
        // Four empty luma quadrants, then no chroma.
        enc.encode_decision(&mut bank.texture.cbp[0][0], false);
        enc.encode_decision(&mut bank.texture.cbp[0][1], false);
        enc.encode_decision(&mut bank.texture.cbp[0][2], false);
        enc.encode_decision(&mut bank.texture.cbp[0][3], false);
        enc.encode_decision(&mut bank.texture.cbp[1][0], false);
        let data = seal(enc);

        let mut ctx = slice_ctx(&pic, &data, SliceType::P);
        ctx.last_dquant = 5;
        read_cbp_and_coeffs(&mut pic, &mut ctx, 0).unwrap();

        assert_eq!(pic.mbs[0].cbp, 0);
        assert_eq!(ctx.last_dquant, 0);
        assert_eq!(ctx.qp, 26);
        assert_eq!(pic.mbs[0].qp, 26);
        assert_eq!(pic.coeffs[0], [[[[0; 4]; 4]; 6]; 4]);
    }

    #[test]
    fn cabac_luma_run_level_scatter() {
        let mut pic = Picture::new(pic_params(1, 1, false, true));
        pic.mbs[0].slice_nr = 0;
        pic.mbs[0].mode = MbMode::Inter16x16;

        let mut enc = ArithEncoder::new();
        let mut bank = enc_bank();
        // cbp 1: only the top-left quadrant carries coefficients.
        enc.encode_decision(&mut bank.texture.cbp[0][0], true);
        enc.encode_decision(&mut bank.texture.cbp[0][0], false);
        enc.encode_decision(&mut bank.texture.cbp[0][0], false);
        enc.encode_decision(&mut bank.texture.cbp[0][3], false);
        enc.encode_decision(&mut bank.texture.cbp[1][0], false);
        enc.encode_decision(&mut bank.motion.delta_qp[0], false);
        // Block (0,0): coded, a single +1 at the first scan position.
        enc.encode_decision(&mut bank.texture.bcbp[4][0], true);
        enc.encode_decision(&mut bank.texture.map[5][0], true);
        enc.encode_decision(&mut bank.texture.last[5][0], true);
        enc.encode_decision(&mut bank.texture.one[4][1], false);
        enc.encode_bypass(false);
        // The other three blocks inherit coded neighbors one by one.
        enc.encode_decision(&mut bank.texture.bcbp[4][1], false);
        enc.encode_decision(&mut bank.texture.bcbp[4][2], false);
        enc.encode_decision(&mut bank.texture.bcbp[4][0], false);
        let data = seal(enc);

        let mut ctx = slice_ctx(&pic, &data, SliceType::P);
        read_cbp_and_coeffs(&mut pic, &mut ctx, 0).unwrap();

        assert_eq!(pic.mbs[0].cbp, 1);
        assert_eq!(pic.mbs[0].qp, 26);
        assert_eq!(pic.coeffs[0][0][0][0][0], 208);
        assert_eq!(pic.coeffs[0][1][0][0][0], 0);
        assert_eq!(pic.mbs[0].cbp_blk, 1);
        assert_eq!(pic.mbs[0].cbp_bits, 0b10);
        assert_eq!(pic.nz_coeff[0], [[0; 6]; 4]);
    }

    #[test]
    fn cabac_chroma_dc_and_ac_planes() {
        let mut pic = Picture::new(pic_params(1, 1, false, true));
        pic.mbs[0].slice_nr = 0;
        pic.mbs[0].mode = MbMode::Inter16x16;

        let mut enc = ArithEncoder::new();
        let mut bank = enc_bank();
        // cbp 32: no luma, chroma DC and AC both present.
        enc.encode_decision(&mut bank.texture.cbp[0][0], false);
        enc.encode_decision(&mut bank.texture.cbp[0][1], false);
        enc.encode_decision(&mut bank.texture.cbp[0][2], false);
        enc.encode_decision(&mut bank.texture.cbp[0][3], false);
        enc.encode_decision(&mut bank.texture.cbp[1][0], true);
        enc.encode_decision(&mut bank.texture.cbp[2][0], true);
        enc.encode_decision(&mut bank.motion.delta_qp[0], false);
        // U DC plane: +1 in the first position.
        enc.encode_decision(&mut bank.texture.bcbp[5][0], true);
        enc.encode_decision(&mut bank.texture.map[6][0], true);
        enc.encode_decision(&mut bank.texture.last[6][0], true);
        enc.encode_decision(&mut bank.texture.one[5][1], false);
        enc.encode_bypass(false);
        // V DC plane: empty.
        enc.encode_decision(&mut bank.texture.bcbp[5][0], false);
        // U AC block (0,4): -1 at the first AC position.
        enc.encode_decision(&mut bank.texture.bcbp[6][0], true);
        enc.encode_decision(&mut bank.texture.map[7][1], true);
        enc.encode_decision(&mut bank.texture.last[7][1], true);
        enc.encode_decision(&mut bank.texture.one[6][1], false);
        enc.encode_bypass(true);
        // Remaining U blocks see the coded neighbor, V sees nothing.
        enc.encode_decision(&mut bank.texture.bcbp[6][1], false);
        enc.encode_decision(&mut bank.texture.bcbp[6][2], false);
        enc.encode_decision(&mut bank.texture.bcbp[6][0], false);
        enc.encode_decision(&mut bank.texture.bcbp[6][0], false);
        enc.encode_decision(&mut bank.texture.bcbp[6][0], false);
        enc.encode_decision(&mut bank.texture.bcbp[6][0], false);
        enc.encode_decision(&mut bank.texture.bcbp[6][0], false);
        let data = seal(enc);

        let mut ctx = slice_ctx(&pic, &data, SliceType::P);
        read_cbp_and_coeffs(&mut pic, &mut ctx, 0).unwrap();

        assert_eq!(pic.mbs[0].cbp, 32);
        // The U DC impulse spreads to all four 2x2 positions.
        assert_eq!(pic.coeffs[0][0][4][0][0], 104);
        assert_eq!(pic.coeffs[0][1][4][0][0], 104);
        assert_eq!(pic.coeffs[0][0][5][0][0], 104);
        assert_eq!(pic.coeffs[0][1][5][0][0], 104);
        assert_eq!(pic.coeffs[0][2][4][0][0], 0);
        assert_eq!(pic.coeffs[0][3][5][0][0], 0);
        // The U AC level lands one step into the zigzag scan.
        assert_eq!(pic.coeffs[0][0][4][1][0], -256);
        assert_eq!(pic.mbs[0].cbp_blk, 0xf0000);
        assert_eq!(pic.mbs[0].cbp_bits, (1 << 17) | (1 << 19));
    }

    #[test]
    fn cavlc_chroma_dc_levels_spread_by_hadamard() {
        let mut pic = Picture::new(pic_params(1, 1, false, false));
        pic.mbs[0].slice_nr = 0;
        pic.mbs[0].mode = MbMode::Inter16x16;

        let mut w = BitWriter::new();
        w.write_ue(6); // coded_block_pattern 32, inter mapping
        w.write_se(0); // mb_qp_delta
        w.write_bits(0b000111, 6); // U DC: one coefficient
        w.write_bits(0b1, 1); // level +1, bumped to +2
        w.write_bits(0b1, 1); // total_zeros 0
        w.write_bits(0b01, 2); // V DC: empty
        for _ in 0..8 {
            w.write_bits(0b1, 1); // chroma AC blocks all empty
        }
        w.write_trailing_bits();
        let data = w.into_data();

        let mut ctx = slice_ctx(&pic, &data, SliceType::P);
        read_cbp_and_coeffs(&mut pic, &mut ctx, 0).unwrap();

        assert_eq!(pic.mbs[0].cbp, 32);
        assert_eq!(pic.coeffs[0][0][4][0][0], 208);
        assert_eq!(pic.coeffs[0][1][4][0][0], 208);
        assert_eq!(pic.coeffs[0][0][5][0][0], 208);
        assert_eq!(pic.coeffs[0][1][5][0][0], 208);
        assert_eq!(pic.coeffs[0][2][4][0][0], 0);
        assert_eq!(pic.mbs[0].cbp_blk, 0xf0000);
        for i in 0..4 {
            for j in 4..6 {
                assert_eq!(pic.nz_coeff[0][i][j], 0);
            }
        }
    }

    #[test]
    fn switching_blocks_keep_raw_chroma_dc() {
        let mut pic = Picture::new(pic_params(1, 1, false, false));
        pic.mbs[0].slice_nr = 0;
        pic.mbs[0].mode = MbMode::Inter16x16;

        let mut w = BitWriter::new();
        w.write_ue(1); // coded_block_pattern 16, inter mapping
        w.write_se(0); // mb_qp_delta
        w.write_bits(0b000111, 6); // U DC: one coefficient
        w.write_bits(0b001, 3); // level +2, bumped to +3
        w.write_bits(0b1, 1); // total_zeros 0
        w.write_bits(0b01, 2); // V DC: empty
        w.write_trailing_bits();
        let data = w.into_data();

        let mut ctx = slice_ctx(&pic, &data, SliceType::Sp);
        read_cbp_and_coeffs(&mut pic, &mut ctx, 0).unwrap();

        // SP inter blocks skip both dequantization and the hadamard.
        assert_eq!(pic.mbs[0].cbp, 16);
        assert_eq!(pic.coeffs[0][0][4][0][0], 3);
        assert_eq!(pic.coeffs[0][1][4][0][0], 0);
        assert_eq!(pic.coeffs[0][0][5][0][0], 0);
        assert_eq!(pic.mbs[0].cbp_blk, 0xf0000);
    }

    #[test]
    fn field_macroblock_uses_alternate_scan() {
        let mut pic = Picture::new(pic_params(1, 1, false, false));
        pic.mbs[0].slice_nr = 0;
        pic.mbs[0].mode = MbMode::Intra4x4;
        pic.mbs[0].mb_field = true;

        let mut w = BitWriter::new();
        w.write_ue(29); // coded_block_pattern 1, intra mapping
        w.write_se(0); // mb_qp_delta
        w.write_bits(0b01, 2); // block (0,0): one trailing one
        w.write_bits(0b1, 1); // negative sign
        w.write_bits(0b011, 3); // total_zeros 1
        w.write_bits(0b1, 1); // block (1,0): empty
        w.write_bits(0b1, 1); // block (0,1): empty
        w.write_bits(0b1, 1); // block (1,1): empty
        w.write_trailing_bits();
        let data = w.into_data();

        let mut ctx = slice_ctx(&pic, &data, SliceType::I);
        read_cbp_and_coeffs(&mut pic, &mut ctx, 0).unwrap();

        // Scan position 1 is (0,1) in the field scan, not (1,0).
        assert_eq!(pic.coeffs[0][0][0][0][1], -256);
        assert_eq!(pic.coeffs[0][0][0][1][0], 0);
        assert_eq!(pic.mbs[0].cbp_blk, 1);
        assert_eq!(pic.nz_coeff[0][0][0], 1);
    }
}
