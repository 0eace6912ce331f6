//! Inter prediction syntax and derived motion.
//!
//! Reference indices and motion vector differences are read here, along
//! with everything the bitstream leaves implicit: the median predictor,
//! the zero-motion rule of skipped P macroblocks, and the spatial and
//! temporal derivation of B direct blocks from the co-located picture.
//! All motion lands in the picture's 4x4 grids so later macroblocks and
//! the loop filter read a single representation.

use slicedec_core::error::{DecodeError, Error, Result};

use crate::binarize;
use crate::context::MotionContexts;
use crate::engine::ArithDecoder;
use crate::macroblock::{MbMode, B8_DIRECT, BLOCK_STEP, PDIR_BI, PDIR_L0, PDIR_L1};
use crate::neighbor::{self, NeighborScope, PixelPos};
use crate::picture::{ColocatedData, Mv, Picture, RefPicture, NO_REF_PIC_ID};
use crate::residual;
use crate::slice::{EntropyCoder, SliceContext, SliceParams, SliceRefs, SliceType};

/// Scale marker for reference pairs whose temporal distance collapses;
/// the co-located vector is then taken unscaled.
const MV_SCALE_UNSET: i32 = 9999;

/// Precompute the temporal direct scale factor for every list-0
/// reference, one table per reference list slot.
///
/// The factor maps a co-located vector onto the current picture's
/// position between the anchor (the first list-1 reference) and each
/// list-0 candidate. Distances are clipped to a byte and the factor to
/// eleven bits, matching the arithmetic of the fixed-point blend.
pub fn compute_mv_scale(pic: &Picture, params: &SliceParams, refs: &SliceRefs<'_>) -> [Vec<i32>; 6] {
    let mut scale: [Vec<i32>; 6] = Default::default();
    if params.slice_type != SliceType::B {
        return scale;
    }
    let slots: &[usize] = if pic.params.mbaff { &[0, 2, 4] } else { &[0] };
    for &slot in slots {
        let poc = match slot {
            0 => params.poc,
            2 => params.top_poc,
            _ => params.bottom_poc,
        };
        let anchor = match refs.list(1, slot).first() {
            Some(anchor) => anchor,
            None => continue,
        };
        scale[slot] = refs
            .list(0, slot)
            .iter()
            .map(|r| {
                let trb = (poc - r.poc).clamp(-128, 127);
                let trp = (anchor.poc - r.poc).clamp(-128, 127);
                if trp == 0 {
                    MV_SCALE_UNSET
                } else {
                    let prescale = (16384 + (trp / 2).abs()) / trp;
                    ((trb * prescale + 32) >> 6).clamp(-1024, 1023)
                }
            })
            .collect();
    }
    scale
}

/// Reference list slot of a macroblock: the frame lists, or the top or
/// bottom field lists while a pair decodes as fields.
fn list_offset(pic: &Picture, mb_addr: usize) -> usize {
    if pic.params.mbaff && pic.mbs[mb_addr].mb_field {
        if mb_addr % 2 == 1 {
            4
        } else {
            2
        }
    } else {
        0
    }
}

/// Derive the motion of a skipped P macroblock.
///
/// Zero motion applies when either 4x4 neighbor is missing or itself
/// points at the first reference with a zero vector; otherwise the
/// 16x16 median prediction is copied into every block. Both outcomes
/// reference picture zero of list 0.
pub fn fill_skip_motion(pic: &mut Picture, ctx: &mut SliceContext<'_>, addr: usize) -> Result<()> {
    let refs = ctx.refs;
    let offset = list_offset(pic, addr);
    let scope = NeighborScope::SameSlice;
    let block_a = neighbor::luma_4x4_neighbor(pic, addr, 0, 0, -1, 0, scope);
    let block_b = neighbor::luma_4x4_neighbor(pic, addr, 0, 0, 0, -1, scope);

    let curr_field = pic.mbs[addr].mb_field;
    let zero_motion = |p: &PixelPos| -> bool {
        if !p.available {
            return true;
        }
        let mut mv_y = pic.mv(0, p.pos_x, p.pos_y)[1] as i32;
        let mut ref_idx = pic.ref_idx(0, p.pos_x, p.pos_y) as i32;
        if curr_field && !pic.mbs[p.mb_addr].mb_field {
            mv_y /= 2;
            ref_idx *= 2;
        }
        if !curr_field && pic.mbs[p.mb_addr].mb_field {
            mv_y *= 2;
            ref_idx >>= 1;
        }
        ref_idx == 0 && pic.mv(0, p.pos_x, p.pos_y)[0] == 0 && mv_y == 0
    };
    let zero = zero_motion(&block_a) || zero_motion(&block_b);

    pic.mbs[addr].cbp = 0;
    residual::reset_coeffs(pic, addr);

    let mv = if zero {
        [0, 0]
    } else {
        predict_mv(pic, addr, 0, 0, 0, 0, 16, 16)
    };
    let id = ref_id_in(refs.list(0, offset), 0, 0)?;
    let (mx, my) = neighbor::mb_block_pos(pic, addr);
    let (bx0, by0) = (4 * mx, 4 * my);
    for j in 0..4 {
        for i in 0..4 {
            pic.set_mv(0, bx0 + i, by0 + j, mv);
            pic.set_ref_idx(0, bx0 + i, by0 + j, 0);
            pic.set_ref_pic_id(0, bx0 + i, by0 + j, id);
        }
    }
    Ok(())
}

/// Derive the motion of a whole direct macroblock from the co-located
/// picture, spatially or temporally per the slice header.
pub fn fill_direct_motion(
    pic: &mut Picture,
    ctx: &mut SliceContext<'_>,
    addr: usize,
) -> Result<()> {
    let env = direct_env(pic, ctx, addr)?;
    let (mx, my) = neighbor::mb_block_pos(pic, addr);
    let (bx0, by0) = (4 * mx, 4 * my);
    for j in 0..4 {
        for i in 0..4 {
            fill_direct_block(pic, &env, bx0, by0, i, j)?;
        }
    }
    Ok(())
}

/// Read the inter prediction syntax of one macroblock: reference
/// indices per partition, then motion vector differences per vector
/// block, each resolved against its prediction as it is read.
///
/// B 8x8 macroblocks interleave direct sub-blocks with coded ones. The
/// direct blocks are seeded before any index is read so the in-
/// macroblock predictors see their motion, carried at 8x8 granularity
/// through the difference loop, and settled per 4x4 block once the
/// coded partitions are in place.
pub fn read_motion_info(pic: &mut Picture, ctx: &mut SliceContext<'_>, addr: usize) -> Result<()> {
    let refs = ctx.refs;
    let bframe = ctx.params.slice_type == SliceType::B;
    let spatial = ctx.params.direct_spatial;
    let mode = pic.mbs[addr].mode;
    let p8x8 = mode == MbMode::Inter8x8;
    let (step_h0, step_v0) = BLOCK_STEP[mode.partition_code()];
    let offset = list_offset(pic, addr);
    let (mx, my) = neighbor::mb_block_pos(pic, addr);
    let (bx0, by0) = (4 * mx, 4 * my);
    let has_direct = bframe && p8x8 && pic.mbs[addr].b8mode.contains(&B8_DIRECT);

    if has_direct {
        let env = direct_env(pic, ctx, addr)?;
        for b8 in 0..4 {
            if pic.mbs[addr].b8mode[b8] != B8_DIRECT {
                continue;
            }
            for j in 2 * (b8 / 2)..2 * (b8 / 2) + 2 {
                for i in 2 * (b8 % 2)..2 * (b8 % 2) + 2 {
                    seed_direct_block(pic, &env, bx0, by0, i, j)?;
                }
            }
        }
    }

    // Reference indices, list 0 then list 1, partition corners only.
    for list in 0..2 {
        for j0 in (0..4).step_by(step_v0) {
            for i0 in (0..4).step_by(step_h0) {
                let k = 2 * (j0 / 2) + i0 / 2;
                let (sub, pdir) = {
                    let mb = &pic.mbs[addr];
                    (mb.b8mode[k], mb.b8pdir[k])
                };
                let wanted = if list == 0 {
                    pdir == PDIR_L0 || pdir == PDIR_BI
                } else {
                    pdir == PDIR_L1 || pdir == PDIR_BI
                };
                if !wanted || sub == B8_DIRECT {
                    continue;
                }
                let refframe = if ctx.num_ref_idx_active[list] <= 1 {
                    0
                } else if list == 0 && p8x8 && !bframe && ctx.allrefzero {
                    // The 8x8 mode code already pinned every index.
                    0
                } else {
                    read_ref_idx(pic, ctx, addr, list, i0, j0)?
                };
                for j in j0..j0 + step_v0 {
                    for i in i0..i0 + step_h0 {
                        pic.set_ref_idx(list, bx0 + i, by0 + j, refframe);
                    }
                }
            }
        }
    }

    // Vector differences for list 0. Temporal direct sub-blocks resolve
    // here in partition order, mapped through their 8x8 corner, so the
    // predictors of the following partitions see settled vectors.
    for j0 in (0..4).step_by(step_v0) {
        for i0 in (0..4).step_by(step_h0) {
            let k = 2 * (j0 / 2) + i0 / 2;
            let (sub, pdir) = {
                let mb = &pic.mbs[addr];
                (mb.b8mode[k], mb.b8pdir[k])
            };
            if (pdir == PDIR_L0 || pdir == PDIR_BI) && sub != B8_DIRECT {
                read_partition_mvd(pic, ctx, addr, 0, i0, j0)?;
            } else if sub == B8_DIRECT && !spatial {
                temporal_direct_b8(pic, ctx, addr, i0, j0)?;
            }
        }
    }

    // Vector differences for list 1.
    for j0 in (0..4).step_by(step_v0) {
        for i0 in (0..4).step_by(step_h0) {
            let k = 2 * (j0 / 2) + i0 / 2;
            let (sub, pdir) = {
                let mb = &pic.mbs[addr];
                (mb.b8mode[k], mb.b8pdir[k])
            };
            if (pdir == PDIR_L1 || pdir == PDIR_BI) && sub != B8_DIRECT {
                read_partition_mvd(pic, ctx, addr, 1, i0, j0)?;
            }
        }
    }

    // Record reference picture identities for deblocking decisions.
    let list0 = refs.list(0, offset);
    let list1 = refs.list(1, offset);
    for j in 0..4 {
        for i in 0..4 {
            stamp_ref_pic_id(pic, list0, list1, bx0 + i, by0 + j)?;
        }
    }

    if has_direct {
        let env = direct_env(pic, ctx, addr)?;
        for b8 in 0..4 {
            if pic.mbs[addr].b8mode[b8] != B8_DIRECT {
                continue;
            }
            for j in 2 * (b8 / 2)..2 * (b8 / 2) + 2 {
                for i in 2 * (b8 % 2)..2 * (b8 % 2) + 2 {
                    fill_direct_block(pic, &env, bx0, by0, i, j)?;
                }
            }
        }
    }
    Ok(())
}

/// Whole-macroblock spatial direct seed: one folded reference and one
/// 16x16 prediction per list, shared by every direct 4x4 block.
struct DirectSeed {
    ref_frame: [i32; 2],
    pmv: [Mv; 2],
}

fn spatial_direct_seed(pic: &Picture, addr: usize) -> DirectSeed {
    let scope = NeighborScope::SameSlice;
    let left = neighbor::luma_4x4_neighbor(pic, addr, 0, 0, -1, 0, scope);
    let up = neighbor::luma_4x4_neighbor(pic, addr, 0, 0, 0, -1, scope);
    let up_left = neighbor::luma_4x4_neighbor(pic, addr, 0, 0, -1, -1, scope);
    let up_right = neighbor::luma_4x4_neighbor(pic, addr, 0, 0, 16, -1, scope);

    let curr_field = pic.params.mbaff && pic.mbs[addr].mb_field;
    let scaled_ref = |p: &PixelPos, list: usize, fallback: i32| -> i32 {
        if !p.available {
            return fallback;
        }
        let r = pic.ref_idx(list, p.pos_x, p.pos_y) as i32;
        if !pic.params.mbaff {
            return r;
        }
        let nb_field = pic.mbs[p.mb_addr].mb_field;
        if curr_field {
            if nb_field || r < 0 {
                r
            } else {
                r * 2
            }
        } else if nb_field || r < 0 {
            r >> 1
        } else {
            r
        }
    };
    // The smallest decoded reference wins; only missing neighbors may
    // leave the fold negative.
    let fold = |l: i32, u: i32, ur: i32| -> i32 {
        let f = if l >= 0 && u >= 0 { l.min(u) } else { l.max(u) };
        if f >= 0 && ur >= 0 {
            f.min(ur)
        } else {
            f.max(ur)
        }
    };

    let mut ref_frame = [0i32; 2];
    let mut pmv = [[0i16; 2]; 2];
    for list in 0..2 {
        let l = scaled_ref(&left, list, -1);
        let u = scaled_ref(&up, list, -1);
        let ul = scaled_ref(&up_left, list, -1);
        let ur = scaled_ref(&up_right, list, ul);
        ref_frame[list] = fold(l, u, ur);
        if ref_frame[list] >= 0 {
            pmv[list] = predict_mv(pic, addr, ref_frame[list], list, 0, 0, 16, 16);
        }
    }
    DirectSeed { ref_frame, pmv }
}

/// Inputs of the per-block direct derivation, resolved once per pass.
struct DirectEnv<'a> {
    /// Present for spatial direct; temporal derives from scales instead.
    seed: Option<DirectSeed>,
    colocated: &'a ColocatedData,
    /// Co-located row of the macroblock's first block row.
    col_base_y: usize,
    /// A long-term anchor disables the stationary-block test.
    l1_long_term: bool,
    list0: &'a [RefPicture],
    list1: &'a [RefPicture],
    num_l0_active: usize,
    mv_scale: Vec<i32>,
    inference: bool,
}

impl DirectEnv<'_> {
    /// Co-located grid position of in-macroblock block `(i, j)`.
    fn colocated_pos(&self, bx0: usize, i: usize, j: usize) -> (usize, usize) {
        let (ci, cj) = if self.inference {
            (rsd(i), rsd(j))
        } else {
            (i, j)
        };
        (bx0 + ci, self.col_base_y + cj)
    }
}

/// Round a block coordinate outward to its 8x8 corner.
fn rsd(v: usize) -> usize {
    if v & 2 != 0 {
        v | 1
    } else {
        v & !1
    }
}

fn direct_env<'a>(
    pic: &Picture,
    ctx: &SliceContext<'a>,
    addr: usize,
) -> Result<DirectEnv<'a>> {
    let refs = ctx.refs;
    let offset = list_offset(pic, addr);
    let field = pic.params.mbaff && pic.mbs[addr].mb_field;
    let colocated = refs
        .colocated_for(field, addr % 2 == 1)
        .ok_or_else(|| Error::invalid_param("direct prediction needs co-located motion"))?;

    let (_, my) = neighbor::mb_block_pos(pic, addr);
    let by0 = 4 * my;
    let col_base_y = if field {
        // Field halves of a pair share one co-located field row base.
        if addr % 2 == 1 {
            (by0 - 4) / 2
        } else {
            by0 / 2
        }
    } else {
        by0
    };

    let list1 = refs.list(1, offset);
    Ok(DirectEnv {
        seed: ctx
            .params
            .direct_spatial
            .then(|| spatial_direct_seed(pic, addr)),
        colocated,
        col_base_y,
        l1_long_term: list1.first().map_or(false, |r| r.is_long_term),
        list0: refs.list(0, offset),
        list1,
        num_l0_active: ctx.num_ref_idx_active[0],
        mv_scale: ctx.mv_scale[offset].clone(),
        inference: pic.params.direct_8x8_inference,
    })
}

/// Spatial direct outcome for one 4x4 block: zero motion against the
/// first reference when the block is stationary, the seeded prediction
/// otherwise, and reference zero on both lists when neither list found
/// a neighbor reference.
fn spatial_direct_block(
    pic: &mut Picture,
    seed: &DirectSeed,
    stationary: bool,
    bx: usize,
    by: usize,
) {
    for list in 0..2 {
        let rf = seed.ref_frame[list];
        if rf >= 0 {
            if rf == 0 && stationary {
                pic.set_mv(list, bx, by, [0, 0]);
                pic.set_ref_idx(list, bx, by, 0);
            } else {
                pic.set_mv(list, bx, by, seed.pmv[list]);
                pic.set_ref_idx(list, bx, by, rf as i8);
            }
        } else {
            pic.set_mv(list, bx, by, [0, 0]);
            pic.set_ref_idx(list, bx, by, -1);
        }
    }
    if seed.ref_frame[0] < 0 && seed.ref_frame[1] < 0 {
        pic.set_ref_idx(0, bx, by, 0);
        pic.set_ref_idx(1, bx, by, 0);
    }
}

/// Seed one direct 4x4 block ahead of the coded partitions: the full
/// spatial outcome, or the temporal reference mapping without vectors.
fn seed_direct_block(
    pic: &mut Picture,
    env: &DirectEnv<'_>,
    bx0: usize,
    by0: usize,
    i: usize,
    j: usize,
) -> Result<()> {
    let bx = bx0 + i;
    let by = by0 + j;
    let (cx, cy) = env.colocated_pos(bx0, i, j);
    match &env.seed {
        Some(seed) => {
            let stationary = !env.colocated.is_moving(cx, cy) && !env.l1_long_term;
            spatial_direct_block(pic, seed, stationary, bx, by);
        }
        None => {
            let ref_list = (env.colocated.ref_idx(0, cx, cy) == -1) as usize;
            let col_ref = env.colocated.ref_idx(ref_list, cx, cy);
            if col_ref == -1 {
                pic.set_ref_idx(0, bx, by, 0);
                pic.set_ref_idx(1, bx, by, 0);
            } else {
                let col_id = env.colocated.ref_pic_id(ref_list, cx, cy);
                let (mapped, _) = map_colocated_ref(env.list0, env.num_l0_active, col_id)?;
                pic.set_ref_idx(0, bx, by, mapped as i8);
                pic.set_ref_idx(1, bx, by, 0);
            }
        }
    }
    Ok(())
}

/// Settle one direct 4x4 block: motion on both lists plus its reference
/// identities. Temporal blocks map their own co-located reference here.
fn fill_direct_block(
    pic: &mut Picture,
    env: &DirectEnv<'_>,
    bx0: usize,
    by0: usize,
    i: usize,
    j: usize,
) -> Result<()> {
    let bx = bx0 + i;
    let by = by0 + j;
    let (cx, cy) = env.colocated_pos(bx0, i, j);
    match &env.seed {
        Some(seed) => {
            let stationary = !env.colocated.is_moving(cx, cy) && !env.l1_long_term;
            spatial_direct_block(pic, seed, stationary, bx, by);
        }
        None => {
            let ref_list = (env.colocated.ref_idx(0, cx, cy) == -1) as usize;
            let col_ref = env.colocated.ref_idx(ref_list, cx, cy);
            if col_ref == -1 {
                pic.set_mv(0, bx, by, [0, 0]);
                pic.set_mv(1, bx, by, [0, 0]);
                pic.set_ref_idx(0, bx, by, 0);
                pic.set_ref_idx(1, bx, by, 0);
            } else {
                let col_id = env.colocated.ref_pic_id(ref_list, cx, cy);
                let (mapped, long_term) =
                    map_colocated_ref(env.list0, env.num_l0_active, col_id)?;
                let scale = env.mv_scale.get(mapped).copied().unwrap_or(MV_SCALE_UNSET);
                let col_mv = env.colocated.mv(ref_list, cx, cy);
                let (fwd, bwd) = scale_direct_mv(col_mv, scale, long_term);
                pic.set_mv(0, bx, by, fwd);
                pic.set_mv(1, bx, by, bwd);
                pic.set_ref_idx(0, bx, by, mapped as i8);
                pic.set_ref_idx(1, bx, by, 0);
            }
        }
    }
    stamp_ref_pic_id(pic, env.list0, env.list1, bx, by)
}

/// Temporal direct for one 8x8 block during the difference loop. The
/// reference mapping comes from the block's corner; vectors still scale
/// per 4x4 block.
fn temporal_direct_b8(
    pic: &mut Picture,
    ctx: &SliceContext<'_>,
    addr: usize,
    i0: usize,
    j0: usize,
) -> Result<()> {
    let env = direct_env(pic, ctx, addr)?;
    let (step_h0, step_v0) = BLOCK_STEP[pic.mbs[addr].mode.partition_code()];
    let (mx, my) = neighbor::mb_block_pos(pic, addr);
    let (bx0, by0) = (4 * mx, 4 * my);

    let (ccx, ccy) = env.colocated_pos(bx0, i0, j0);
    let ref_list = (env.colocated.ref_idx(0, ccx, ccy) == -1) as usize;
    let col_ref = env.colocated.ref_idx(ref_list, ccx, ccy);
    if col_ref == -1 {
        for j in j0..j0 + step_v0 {
            for i in i0..i0 + step_h0 {
                pic.set_mv(0, bx0 + i, by0 + j, [0, 0]);
                pic.set_mv(1, bx0 + i, by0 + j, [0, 0]);
                pic.set_ref_idx(0, bx0 + i, by0 + j, 0);
                pic.set_ref_idx(1, bx0 + i, by0 + j, 0);
            }
        }
        return Ok(());
    }

    let col_id = env.colocated.ref_pic_id(ref_list, ccx, ccy);
    let (mapped, long_term) = map_colocated_ref(env.list0, env.num_l0_active, col_id)?;
    let scale = env.mv_scale.get(mapped).copied().unwrap_or(MV_SCALE_UNSET);
    for j in j0..j0 + step_v0 {
        for i in i0..i0 + step_h0 {
            let (cx, cy) = env.colocated_pos(bx0, i, j);
            let (fwd, bwd) = scale_direct_mv(env.colocated.mv(ref_list, cx, cy), scale, long_term);
            pic.set_mv(0, bx0 + i, by0 + j, fwd);
            pic.set_mv(1, bx0 + i, by0 + j, bwd);
            pic.set_ref_idx(0, bx0 + i, by0 + j, mapped as i8);
            pic.set_ref_idx(1, bx0 + i, by0 + j, 0);
        }
    }
    Ok(())
}

/// Split a co-located vector across the lists. Unscalable or long-term
/// references copy it forward whole.
fn scale_direct_mv(col_mv: Mv, scale: i32, long_term: bool) -> (Mv, Mv) {
    let mut fwd = [0i16; 2];
    let mut bwd = [0i16; 2];
    for comp in 0..2 {
        let raw = col_mv[comp] as i32;
        if scale == MV_SCALE_UNSET || long_term {
            fwd[comp] = raw as i16;
        } else {
            let scaled = (scale * raw + 128) >> 8;
            fwd[comp] = scaled as i16;
            bwd[comp] = (scaled - raw) as i16;
        }
    }
    (fwd, bwd)
}

/// Find the list-0 slot holding the co-located block's reference.
fn map_colocated_ref(list0: &[RefPicture], active: usize, col_id: i64) -> Result<(usize, bool)> {
    for (idx, r) in list0.iter().take(active).enumerate() {
        if r.id == col_id {
            return Ok((idx, r.is_long_term));
        }
    }
    Err(DecodeError::ColocatedRefUnmapped { ref_id: col_id }.into())
}

/// Stamp the reference identities of one block from its indices.
fn stamp_ref_pic_id(
    pic: &mut Picture,
    list0: &[RefPicture],
    list1: &[RefPicture],
    bx: usize,
    by: usize,
) -> Result<()> {
    for (list, table) in [list0, list1].into_iter().enumerate() {
        let idx = pic.ref_idx(list, bx, by);
        let id = if idx >= 0 {
            ref_id_in(table, list, idx)?
        } else {
            NO_REF_PIC_ID
        };
        pic.set_ref_pic_id(list, bx, by, id);
    }
    Ok(())
}

fn ref_id_in(list: &[RefPicture], list_nr: usize, idx: i8) -> Result<i64> {
    list.get(idx as usize).map(|r| r.id).ok_or_else(|| {
        DecodeError::RefIndexOutOfRange {
            list: list_nr as u8,
            ref_idx: idx,
            list_size: list.len(),
        }
        .into()
    })
}

/// Which neighbor the vector prediction follows.
enum MvPred {
    Median,
    Left,
    Up,
    UpRight,
}

/// Motion vector prediction for the partition whose top-left 4x4 block
/// is `(block_x, block_y)` inside the macroblock, `shape_x` by
/// `shape_y` samples large.
///
/// The median of the left, up and up-right neighbors applies unless
/// exactly one of them shares the partition's reference, or the
/// partition is a 16x8 or 8x16 half, which prefer the neighbor on
/// their open side.
fn predict_mv(
    pic: &Picture,
    mb_addr: usize,
    ref_frame: i32,
    list: usize,
    block_x: usize,
    block_y: usize,
    shape_x: usize,
    shape_y: usize,
) -> Mv {
    let mb_x = 4 * block_x;
    let mb_y = 4 * block_y;
    let scope = NeighborScope::SameSlice;
    let bx = block_x as i32;
    let by = block_y as i32;

    let block_a = neighbor::luma_4x4_neighbor(pic, mb_addr, bx, by, -1, 0, scope);
    let block_b = neighbor::luma_4x4_neighbor(pic, mb_addr, bx, by, 0, -1, scope);
    let mut block_c = neighbor::luma_4x4_neighbor(pic, mb_addr, bx, by, shape_x as i32, -1, scope);
    let block_d = neighbor::luma_4x4_neighbor(pic, mb_addr, bx, by, -1, -1, scope);

    // The up-right candidate is only valid where the scan has already
    // passed; partitions ending on an 8x8 seam fall back to up-left.
    if mb_y > 0 {
        let crosses = if mb_x < 8 {
            if mb_y == 8 {
                shape_x == 16
            } else {
                mb_x + shape_x == 8
            }
        } else {
            mb_x + shape_x == 16
        };
        if crosses {
            block_c.available = false;
        }
    }
    let block_c = if block_c.available { block_c } else { block_d };

    let curr_field = pic.params.mbaff && pic.mbs[mb_addr].mb_field;
    let neighbor_ref = |p: &PixelPos| -> i32 {
        if !p.available {
            return -1;
        }
        let r = pic.ref_idx(list, p.pos_x, p.pos_y) as i32;
        if !pic.params.mbaff {
            return r;
        }
        if curr_field {
            if pic.mbs[p.mb_addr].mb_field {
                r
            } else {
                r * 2
            }
        } else if pic.mbs[p.mb_addr].mb_field {
            r >> 1
        } else {
            r
        }
    };
    let r_left = neighbor_ref(&block_a);
    let r_up = neighbor_ref(&block_b);
    let r_up_right = neighbor_ref(&block_c);

    let mut pred = MvPred::Median;
    if r_left == ref_frame && r_up != ref_frame && r_up_right != ref_frame {
        pred = MvPred::Left;
    } else if r_left != ref_frame && r_up == ref_frame && r_up_right != ref_frame {
        pred = MvPred::Up;
    } else if r_left != ref_frame && r_up != ref_frame && r_up_right == ref_frame {
        pred = MvPred::UpRight;
    }
    if shape_x == 8 && shape_y == 16 {
        if mb_x == 0 {
            if r_left == ref_frame {
                pred = MvPred::Left;
            }
        } else if r_up_right == ref_frame {
            pred = MvPred::UpRight;
        }
    } else if shape_x == 16 && shape_y == 8 {
        if mb_y == 0 {
            if r_up == ref_frame {
                pred = MvPred::Up;
            }
        } else if r_left == ref_frame {
            pred = MvPred::Left;
        }
    }

    let fetch = |p: &PixelPos, comp: usize| -> i32 {
        if !p.available {
            return 0;
        }
        let v = pic.mv(list, p.pos_x, p.pos_y)[comp] as i32;
        if comp == 0 || !pic.params.mbaff {
            return v;
        }
        if curr_field {
            if pic.mbs[p.mb_addr].mb_field {
                v
            } else {
                v / 2
            }
        } else if pic.mbs[p.mb_addr].mb_field {
            v * 2
        } else {
            v
        }
    };

    let mut pmv = [0i16; 2];
    for comp in 0..2 {
        let mv_a = fetch(&block_a, comp);
        let mv_b = fetch(&block_b, comp);
        let mv_c = fetch(&block_c, comp);
        let value = match pred {
            MvPred::Median => {
                if !(block_b.available || block_c.available) {
                    mv_a
                } else {
                    mv_a + mv_b + mv_c - mv_a.min(mv_b.min(mv_c)) - mv_a.max(mv_b.max(mv_c))
                }
            }
            MvPred::Left => mv_a,
            MvPred::Up => mv_b,
            MvPred::UpRight => mv_c,
        };
        pmv[comp] = value as i16;
    }
    pmv
}

/// Read and fan out the vector differences of one partition, splitting
/// it into its sub-partition vector blocks.
fn read_partition_mvd(
    pic: &mut Picture,
    ctx: &mut SliceContext<'_>,
    addr: usize,
    list: usize,
    i0: usize,
    j0: usize,
) -> Result<()> {
    let k = 2 * (j0 / 2) + i0 / 2;
    let sub = pic.mbs[addr].b8mode[k];
    let (step_h, step_v) = BLOCK_STEP[sub as usize];
    let (step_h0, step_v0) = BLOCK_STEP[pic.mbs[addr].mode.partition_code()];
    let (mx, my) = neighbor::mb_block_pos(pic, addr);
    let (bx0, by0) = (4 * mx, 4 * my);
    let refframe = pic.ref_idx(list, bx0 + i0, by0 + j0);

    for j in (j0..j0 + step_v0).step_by(step_v) {
        for i in (i0..i0 + step_h0).step_by(step_h) {
            let pmv = predict_mv(
                pic,
                addr,
                refframe as i32,
                list,
                i,
                j,
                4 * step_h,
                4 * step_v,
            );
            let mut vec = [0i16; 2];
            let mut mvd = [0i16; 2];
            for comp in 0..2 {
                let d = read_mvd(pic, ctx, addr, list, comp, i, j)?;
                mvd[comp] = d as i16;
                vec[comp] = (d + pmv[comp] as i32) as i16;
            }
            for jj in 0..step_v {
                for ii in 0..step_h {
                    pic.set_mv(list, bx0 + i + ii, by0 + j + jj, vec);
                    pic.mbs[addr].mvd[list][j + jj][i + ii] = mvd;
                }
            }
        }
    }
    Ok(())
}

fn read_ref_idx(
    pic: &Picture,
    ctx: &mut SliceContext<'_>,
    addr: usize,
    list: usize,
    sub_x: usize,
    sub_y: usize,
) -> Result<i8> {
    match &mut ctx.coder {
        EntropyCoder::Cavlc(reader) => {
            if ctx.num_ref_idx_active[list] == 2 {
                // Two references fit a single bit, coded inverted.
                Ok(1 - reader.read_bit()? as i8)
            } else {
                Ok(reader.read_ue()? as i8)
            }
        }
        EntropyCoder::Cabac(decoder) => read_ref_cabac(
            pic,
            decoder,
            &mut ctx.contexts.motion,
            addr,
            list,
            sub_x,
            sub_y,
        ),
    }
}

/// Arithmetic reference index. The context follows whether the decoded
/// left and up blocks referenced past the first picture; direct and raw
/// neighbors do not count.
fn read_ref_cabac(
    pic: &Picture,
    decoder: &mut ArithDecoder<'_>,
    motion: &mut MotionContexts,
    addr: usize,
    list: usize,
    sub_x: usize,
    sub_y: usize,
) -> Result<i8> {
    let scope = NeighborScope::SameSlice;
    let curr_field = pic.mbs[addr].mb_field;
    let contribution = |p: &PixelPos| -> usize {
        if !p.available {
            return 0;
        }
        let mb = &pic.mbs[p.mb_addr];
        let b8 = (p.x / 2) % 2 + 2 * ((p.y / 2) % 2);
        if mb.mode == MbMode::Pcm
            || mb.is_b_direct()
            || (mb.b8mode[b8] == B8_DIRECT && mb.b8pdir[b8] == PDIR_BI)
        {
            return 0;
        }
        let refn = pic.ref_idx(list, p.pos_x, p.pos_y);
        if pic.params.mbaff && !curr_field && mb.mb_field {
            (refn > 1) as usize
        } else {
            (refn > 0) as usize
        }
    };
    let a = contribution(&neighbor::luma_4x4_neighbor(
        pic,
        addr,
        sub_x as i32,
        sub_y as i32,
        -1,
        0,
        scope,
    ));
    let b = contribution(&neighbor::luma_4x4_neighbor(
        pic,
        addr,
        sub_x as i32,
        sub_y as i32,
        0,
        -1,
        scope,
    ));

    let ctx_idx = a + 2 * b;
    let mut value = decoder.decode_decision(&mut motion.ref_no[0][ctx_idx])? as u32;
    if value != 0 {
        value = binarize::unary(decoder, &mut motion.ref_no[0][4..], 1)? + 1;
    }
    Ok(value as i8)
}

fn read_mvd(
    pic: &Picture,
    ctx: &mut SliceContext<'_>,
    addr: usize,
    list: usize,
    comp: usize,
    sub_x: usize,
    sub_y: usize,
) -> Result<i32> {
    match &mut ctx.coder {
        EntropyCoder::Cavlc(reader) => reader.read_se(),
        EntropyCoder::Cabac(decoder) => read_mvd_cabac(
            pic,
            decoder,
            &mut ctx.contexts.motion,
            addr,
            list,
            comp,
            sub_x,
            sub_y,
        ),
    }
}

/// Arithmetic vector difference. The first-bin context grades the sum
/// of the neighbors' difference magnitudes for the same component; the
/// magnitude tail and the sign follow.
fn read_mvd_cabac(
    pic: &Picture,
    decoder: &mut ArithDecoder<'_>,
    motion: &mut MotionContexts,
    addr: usize,
    list: usize,
    comp: usize,
    sub_x: usize,
    sub_y: usize,
) -> Result<i32> {
    let scope = NeighborScope::SameSlice;
    let curr_field = pic.mbs[addr].mb_field;
    let local_err = |p: &PixelPos| -> i32 {
        if !p.available {
            return 0;
        }
        let mb = &pic.mbs[p.mb_addr];
        let mut e = (mb.mvd[list][p.y][p.x][comp] as i32).abs();
        if pic.params.mbaff && comp == 1 {
            if !curr_field && mb.mb_field {
                e *= 2;
            } else if curr_field && !mb.mb_field {
                e /= 2;
            }
        }
        e
    };
    let a = local_err(&neighbor::luma_4x4_neighbor(
        pic,
        addr,
        sub_x as i32,
        sub_y as i32,
        -1,
        0,
        scope,
    ));
    let b = local_err(&neighbor::luma_4x4_neighbor(
        pic,
        addr,
        sub_x as i32,
        sub_y as i32,
        0,
        -1,
        scope,
    ));

    let sum = a + b;
    let ctx_idx = if sum < 3 {
        5 * comp
    } else if sum > 32 {
        5 * comp + 3
    } else {
        5 * comp + 2
    };

    if !decoder.decode_decision(&mut motion.mv_res[0][ctx_idx])? {
        return Ok(0);
    }
    let magnitude = binarize::unary_exp_golomb_mv(decoder, &mut motion.mv_res[1][5 * comp..], 3)? + 1;
    if decoder.decode_bypass()? {
        Ok(-(magnitude as i32))
    } else {
        Ok(magnitude as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextBank;
    use crate::engine::ArithEncoder;
    use crate::macroblock;
    use crate::picture::{PictureParams, PictureStructure};
    use crate::slice::SlicePartition;
    use slicedec_core::BitWriter;

    fn pic_params(width: usize, height: usize, cabac: bool) -> PictureParams {
        PictureParams {
            width_in_mbs: width,
            height_in_mbs: height,
            mbaff: false,
            structure: PictureStructure::Frame,
            entropy_cabac: cabac,
            constrained_intra_pred: false,
            chroma_qp_index_offset: 0,
            direct_8x8_inference: false,
        }
    }

    fn refpic(id: i64, poc: i32) -> RefPicture {
        RefPicture {
            id,
            poc,
            is_long_term: false,
        }
    }

    fn prepare_inter_mb(pic: &mut Picture, addr: usize, slice_type: SliceType, raw: u32) {
        pic.mbs[addr].slice_nr = 0;
        pic.mbs[addr].slice_type = slice_type;
        macroblock::interpret_mb_mode(&mut pic.mbs[addr], slice_type, raw).unwrap();
    }

    /// Encoder bank matching the decoder's slice-start state.
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
    fn test_median_prediction_picks_middle_vector() {
        let mut pic = Picture::new(pic_params(2, 2, false));
        for mb in &mut pic.mbs {
            mb.slice_nr = 0;
        }
        // Left, up and (fallen back to up-left) corner neighbors of the
        // bottom-right macroblock, all pointing at reference zero.
        pic.set_ref_idx(0, 3, 4, 0);
        pic.set_mv(0, 3, 4, [10, 4]);
        pic.set_ref_idx(0, 4, 3, 0);
        pic.set_mv(0, 4, 3, [2, 8]);
        pic.set_ref_idx(0, 3, 3, 0);
        pic.set_mv(0, 3, 3, [6, 0]);

        assert_eq!(predict_mv(&pic, 3, 0, 0, 0, 0, 16, 16), [6, 4]);

        // Only the left neighbor matches reference one, so the median
        // gives way to it.
        pic.set_ref_idx(0, 3, 4, 1);
        assert_eq!(predict_mv(&pic, 3, 1, 0, 0, 0, 16, 16), [10, 4]);
    }

    #[test]
    fn test_prediction_follows_partition_shape() {
        let mut pic = Picture::new(pic_params(2, 2, false));
        for mb in &mut pic.mbs {
            mb.slice_nr = 0;
        }
        pic.set_ref_idx(0, 3, 4, 0);
        pic.set_mv(0, 3, 4, [10, 4]);
        pic.set_ref_idx(0, 4, 3, 0);
        pic.set_mv(0, 4, 3, [2, 8]);
        pic.set_ref_idx(0, 3, 3, 0);
        pic.set_mv(0, 3, 3, [6, 0]);

        // Upper 16x8 half leans on the up neighbor.
        assert_eq!(predict_mv(&pic, 3, 0, 0, 0, 0, 16, 8), [2, 8]);

        // Lower 16x8 half leans on the left neighbor beside it.
        pic.set_ref_idx(0, 3, 6, 0);
        pic.set_mv(0, 3, 6, [9, 9]);
        assert_eq!(predict_mv(&pic, 3, 0, 0, 0, 2, 16, 8), [9, 9]);

        // Right 8x16 half wants up-right, which is outside the picture
        // and falls back to the up-left corner block.
        pic.set_ref_idx(0, 5, 3, 0);
        pic.set_mv(0, 5, 3, [3, 3]);
        assert_eq!(predict_mv(&pic, 3, 0, 0, 2, 0, 8, 16), [3, 3]);
    }

    #[test]
    fn test_skip_fill_zero_motion_rule() {
        let mut pic = Picture::new(pic_params(2, 1, false));
        for mb in &mut pic.mbs {
            mb.slice_nr = 0;
            mb.slice_type = SliceType::P;
        }
        // Left neighbor carries zero motion against reference zero; the
        // missing up neighbor would force zero on its own as well.
        for by in 0..4 {
            pic.set_ref_idx(0, 3, by, 0);
        }

        let list0 = [refpic(11, 0)];
        let list1: [RefPicture; 0] = [];
        let data = [0u8];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::P,
                ..SliceParams::default()
            },
            SliceRefs::new(&list0, &list1),
        )
        .unwrap();

        prepare_inter_mb(&mut pic, 1, SliceType::P, 0);
        fill_skip_motion(&mut pic, &mut ctx, 1).unwrap();
        for by in 0..4 {
            for bx in 4..8 {
                assert_eq!(pic.mv(0, bx, by), [0, 0]);
                assert_eq!(pic.ref_idx(0, bx, by), 0);
                assert_eq!(pic.ref_pic_id(0, bx, by), 11);
            }
        }
        assert_eq!(pic.mbs[1].cbp, 0);
    }

    #[test]
    fn test_skip_fill_copies_prediction() {
        let mut pic = Picture::new(pic_params(2, 2, false));
        for mb in &mut pic.mbs {
            mb.slice_nr = 0;
            mb.slice_type = SliceType::P;
        }
        // Both neighbors of the bottom-right macroblock move, so the
        // skipped block inherits the 16x16 prediction.
        pic.set_ref_idx(0, 3, 4, 0);
        pic.set_mv(0, 3, 4, [4, 2]);
        pic.set_ref_idx(0, 4, 3, 0);
        pic.set_mv(0, 4, 3, [4, 2]);
        pic.set_ref_idx(0, 3, 3, 0);

        let list0 = [refpic(11, 0)];
        let list1: [RefPicture; 0] = [];
        let data = [0u8];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::P,
                ..SliceParams::default()
            },
            SliceRefs::new(&list0, &list1),
        )
        .unwrap();

        prepare_inter_mb(&mut pic, 3, SliceType::P, 0);
        fill_skip_motion(&mut pic, &mut ctx, 3).unwrap();
        for by in 4..8 {
            for bx in 4..8 {
                assert_eq!(pic.mv(0, bx, by), [4, 2]);
                assert_eq!(pic.ref_idx(0, bx, by), 0);
            }
        }
    }

    #[test]
    fn test_ref_idx_two_refs_reads_inverted_bit() {
        let mut pic = Picture::new(pic_params(1, 1, false));
        prepare_inter_mb(&mut pic, 0, SliceType::P, 1);

        let mut w = BitWriter::new();
        w.write_bit(false);
        w.write_se(2);
        w.write_se(-1);
        w.align_to_byte();
        let data = w.into_data();

        let list0 = [refpic(11, 0), refpic(22, 8)];
        let list1: [RefPicture; 0] = [];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::P,
                num_ref_idx_l0_active: 2,
                ..SliceParams::default()
            },
            SliceRefs::new(&list0, &list1),
        )
        .unwrap();

        read_motion_info(&mut pic, &mut ctx, 0).unwrap();
        for by in 0..4 {
            for bx in 0..4 {
                assert_eq!(pic.ref_idx(0, bx, by), 1);
                assert_eq!(pic.mv(0, bx, by), [2, -1]);
                assert_eq!(pic.ref_pic_id(0, bx, by), 22);
                assert_eq!(pic.ref_pic_id(1, bx, by), NO_REF_PIC_ID);
                assert_eq!(pic.mbs[0].mvd[0][by][bx], [2, -1]);
            }
        }
    }

    #[test]
    fn test_cabac_mvd_contexts_follow_neighbor_magnitudes() {
        let mut pic = Picture::new(pic_params(2, 1, true));
        prepare_inter_mb(&mut pic, 0, SliceType::P, 1);
        prepare_inter_mb(&mut pic, 1, SliceType::P, 1);

        let mut enc = ArithEncoder::new();
        let mut bank = enc_bank();
        // First macroblock: no decoded neighbors, both components start
        // on the low-activity context.
        enc.encode_decision(&mut bank.motion.mv_res[0][0], true);
        binarize::encode_unary_exp_golomb_mv(&mut enc, &mut bank.motion.mv_res[1][0..], 3, 1);
        enc.encode_bypass(false);
        enc.encode_decision(&mut bank.motion.mv_res[0][5], true);
        binarize::encode_unary_exp_golomb_mv(&mut enc, &mut bank.motion.mv_res[1][5..], 3, 2);
        enc.encode_bypass(true);
        // Second macroblock: the left neighbor's differences are (2, 3),
        // keeping the horizontal component low but lifting the vertical
        // one onto the mid-activity context.
        enc.encode_decision(&mut bank.motion.mv_res[0][0], true);
        binarize::encode_unary_exp_golomb_mv(&mut enc, &mut bank.motion.mv_res[1][0..], 3, 0);
        enc.encode_bypass(false);
        enc.encode_decision(&mut bank.motion.mv_res[0][7], true);
        binarize::encode_unary_exp_golomb_mv(&mut enc, &mut bank.motion.mv_res[1][5..], 3, 3);
        enc.encode_bypass(true);
        let data = seal(enc);

        let list0 = [refpic(11, 0)];
        let list1: [RefPicture; 0] = [];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::P,
                ..SliceParams::default()
            },
            SliceRefs::new(&list0, &list1),
        )
        .unwrap();

        read_motion_info(&mut pic, &mut ctx, 0).unwrap();
        assert_eq!(pic.mv(0, 0, 0), [2, -3]);
        assert_eq!(pic.mbs[0].mvd[0][0][0], [2, -3]);

        read_motion_info(&mut pic, &mut ctx, 1).unwrap();
        // Predicted from the left macroblock, plus the decoded (1, -4).
        assert_eq!(pic.mv(0, 4, 0), [3, -7]);
        assert_eq!(pic.mbs[1].mvd[0][0][0], [1, -4]);
    }

    #[test]
    fn test_temporal_direct_scales_colocated_motion() {
        let mut pic = Picture::new(pic_params(1, 1, false));
        prepare_inter_mb(&mut pic, 0, SliceType::B, 0);

        let mut col = ColocatedData::new(4, 4);
        for n in 0..16 {
            col.ref_idx[0][n] = 0;
            col.ref_pic_id[0][n] = 7;
            col.mv[0][n] = [8, 4];
        }

        let list0 = [refpic(7, 0)];
        let list1 = [refpic(9, 4)];
        let data = [0u8];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::B,
                direct_spatial: false,
                poc: 2,
                ..SliceParams::default()
            },
            SliceRefs::new(&list0, &list1).with_colocated(&col),
        )
        .unwrap();
        // Distances 2 of 4 give a scale factor of one half.
        assert_eq!(ctx.mv_scale[0], vec![128]);

        fill_direct_motion(&mut pic, &mut ctx, 0).unwrap();
        for by in 0..4 {
            for bx in 0..4 {
                assert_eq!(pic.mv(0, bx, by), [4, 2]);
                assert_eq!(pic.mv(1, bx, by), [-4, -2]);
                assert_eq!(pic.ref_idx(0, bx, by), 0);
                assert_eq!(pic.ref_idx(1, bx, by), 0);
                assert_eq!(pic.ref_pic_id(0, bx, by), 7);
                assert_eq!(pic.ref_pic_id(1, bx, by), 9);
            }
        }
    }

    #[test]
    fn test_temporal_direct_copies_long_term_unscaled() {
        let mut pic = Picture::new(pic_params(1, 1, false));
        prepare_inter_mb(&mut pic, 0, SliceType::B, 0);

        let mut col = ColocatedData::new(4, 4);
        for n in 0..16 {
            col.ref_idx[0][n] = 0;
            col.ref_pic_id[0][n] = 7;
            col.mv[0][n] = [8, 4];
        }

        let list0 = [RefPicture {
            id: 7,
            poc: 0,
            is_long_term: true,
        }];
        let list1 = [refpic(9, 4)];
        let data = [0u8];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::B,
                direct_spatial: false,
                poc: 2,
                ..SliceParams::default()
            },
            SliceRefs::new(&list0, &list1).with_colocated(&col),
        )
        .unwrap();

        fill_direct_motion(&mut pic, &mut ctx, 0).unwrap();
        assert_eq!(pic.mv(0, 0, 0), [8, 4]);
        assert_eq!(pic.mv(1, 0, 0), [0, 0]);
    }

    #[test]
    fn test_spatial_direct_stationary_rule() {
        let mut pic = Picture::new(pic_params(2, 1, false));
        for mb in &mut pic.mbs {
            mb.slice_nr = 0;
            mb.slice_type = SliceType::B;
        }
        // Left neighbor references picture zero with motion; its list-1
        // side never decoded a reference.
        for by in 0..4 {
            pic.set_ref_idx(0, 3, by, 0);
            pic.set_mv(0, 3, by, [6, 2]);
        }
        prepare_inter_mb(&mut pic, 1, SliceType::B, 0);

        let col = ColocatedData::new(8, 4);
        let list0 = [refpic(7, 0)];
        let list1 = [refpic(9, 4)];
        let data = [0u8];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::B,
                poc: 2,
                ..SliceParams::default()
            },
            SliceRefs::new(&list0, &list1).with_colocated(&col),
        )
        .unwrap();

        // Stationary co-located blocks pull the forward side to zero.
        fill_direct_motion(&mut pic, &mut ctx, 1).unwrap();
        assert_eq!(pic.mv(0, 4, 0), [0, 0]);
        assert_eq!(pic.ref_idx(0, 4, 0), 0);
        assert_eq!(pic.ref_idx(1, 4, 0), -1);
        assert_eq!(pic.ref_pic_id(0, 4, 0), 7);
        assert_eq!(pic.ref_pic_id(1, 4, 0), NO_REF_PIC_ID);

        // Moving co-located blocks keep the seeded prediction instead.
        let mut col = ColocatedData::new(8, 4);
        for flag in &mut col.moving_block {
            *flag = true;
        }
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::B,
                poc: 2,
                ..SliceParams::default()
            },
            SliceRefs::new(&list0, &list1).with_colocated(&col),
        )
        .unwrap();
        fill_direct_motion(&mut pic, &mut ctx, 1).unwrap();
        assert_eq!(pic.mv(0, 4, 0), [6, 2]);
        assert_eq!(pic.ref_idx(0, 4, 0), 0);
    }

    #[test]
    fn test_direct_8x8_blocks_remap_per_block_after_reading() {
        let mut pic = Picture::new(pic_params(1, 1, false));
        prepare_inter_mb(&mut pic, 0, SliceType::B, 22);
        pic.mbs[0].b8mode = [B8_DIRECT; 4];
        pic.mbs[0].b8pdir = [PDIR_BI; 4];

        // The corner of the first 8x8 block maps to reference 7, but the
        // block at (1, 1) co-locates with reference 22 and must end on
        // its own mapping.
        let mut col = ColocatedData::new(4, 4);
        col.ref_idx[0][0] = 0;
        col.ref_pic_id[0][0] = 7;
        col.mv[0][0] = [8, 4];
        col.ref_idx[0][5] = 1;
        col.ref_pic_id[0][5] = 22;
        col.mv[0][5] = [8, 4];

        let list0 = [refpic(7, 0), refpic(22, 1)];
        let list1 = [refpic(9, 4)];
        let data = [0u8];
        let mut ctx = SliceContext::new(
            &pic,
            SlicePartition::new(&data),
            SliceParams {
                slice_type: SliceType::B,
                direct_spatial: false,
                num_ref_idx_l0_active: 2,
                poc: 2,
                ..SliceParams::default()
            },
            SliceRefs::new(&list0, &list1).with_colocated(&col),
        )
        .unwrap();
        assert_eq!(ctx.mv_scale[0], vec![128, 85]);

        read_motion_info(&mut pic, &mut ctx, 0).unwrap();
        assert_eq!(pic.ref_idx(0, 0, 0), 0);
        assert_eq!(pic.mv(0, 0, 0), [4, 2]);
        assert_eq!(pic.ref_pic_id(0, 0, 0), 7);
        assert_eq!(pic.ref_idx(0, 1, 1), 1);
        assert_eq!(pic.mv(0, 1, 1), [3, 1]);
        assert_eq!(pic.mv(1, 1, 1), [-5, -3]);
        assert_eq!(pic.ref_pic_id(0, 1, 1), 22);
    }

    #[test]
    fn test_mv_scale_degenerate_and_clamped() {
        let pic = Picture::new(pic_params(1, 1, false));

        // Anchor and reference at the same output position.
        let list0 = [refpic(1, 4)];
        let list1 = [refpic(2, 4)];
        let refs = SliceRefs::new(&list0, &list1);
        let params = SliceParams {
            slice_type: SliceType::B,
            poc: 2,
            ..SliceParams::default()
        };
        assert_eq!(compute_mv_scale(&pic, &params, &refs)[0], vec![9999]);

        // A distant reference clamps both the distance and the factor.
        let list0 = [refpic(1, 200)];
        let list1 = [refpic(2, 201)];
        let refs = SliceRefs::new(&list0, &list1);
        let params = SliceParams {
            slice_type: SliceType::B,
            poc: 0,
            ..SliceParams::default()
        };
        assert_eq!(compute_mv_scale(&pic, &params, &refs)[0], vec![-1024]);

        // Predictive slices never scale.
        let params = SliceParams {
            slice_type: SliceType::P,
            ..SliceParams::default()
        };
        assert!(compute_mv_scale(&pic, &params, &refs)[0].is_empty());
    }
}
