//! In-loop deblocking filter.
//!
//! Runs over a fully decoded picture, macroblock by macroblock in
//! address order. Boundary strengths come from the macroblock arena
//! (modes, coded bits, motion); the filter then rewrites the sample
//! planes in place. Each macroblock filters four vertical stripes, then
//! four horizontal ones, plus one extra horizontal stripe when a frame
//! macroblock sits under a field pair and each parity needs its own
//! boundary.

use crate::neighbor::{self, NeighborScope};
use crate::picture::Picture;
use crate::slice::SliceType;
use crate::transform;

/// Filtering threshold for the gap across the edge, per clipped QP.
const ALPHA_TABLE: [i32; 52] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 4, 5, 6, 7, 8, 9, 10, 12, 13,
    15, 17, 20, 22, 25, 28, 32, 36, 40, 45, 50, 56, 63, 71, 80, 90, 101, 113, 127, 144,
    162, 182, 203, 226, 255, 255,
];

/// Filtering threshold for the gradients beside the edge, per clipped QP.
const BETA_TABLE: [i32; 52] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 6,
    6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16, 17,
    17, 18, 18,
];

/// Clip bound for the filtered delta, per clipped QP and strength.
const CLIP_TAB: [[i32; 5]; 52] = [
    [0, 0, 0, 0, 0], [0, 0, 0, 0, 0], [0, 0, 0, 0, 0], [0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0], [0, 0, 0, 0, 0], [0, 0, 0, 0, 0], [0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0], [0, 0, 0, 0, 0], [0, 0, 0, 0, 0], [0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0], [0, 0, 0, 0, 0], [0, 0, 0, 0, 0], [0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0], [0, 0, 0, 1, 1], [0, 0, 0, 1, 1], [0, 0, 0, 1, 1],
    [0, 0, 0, 1, 1], [0, 0, 1, 1, 1], [0, 0, 1, 1, 1], [0, 1, 1, 1, 1],
    [0, 1, 1, 1, 1], [0, 1, 1, 1, 1], [0, 1, 1, 1, 1], [0, 1, 1, 2, 2],
    [0, 1, 1, 2, 2], [0, 1, 1, 2, 2], [0, 1, 1, 2, 2], [0, 1, 2, 3, 3],
    [0, 1, 2, 3, 3], [0, 2, 2, 3, 3], [0, 2, 2, 4, 4], [0, 2, 3, 4, 4],
    [0, 2, 3, 4, 4], [0, 3, 3, 5, 5], [0, 3, 4, 6, 6], [0, 3, 4, 6, 6],
    [0, 4, 5, 7, 7], [0, 4, 5, 8, 8], [0, 4, 6, 9, 9], [0, 5, 7, 10, 10],
    [0, 6, 8, 11, 11], [0, 6, 8, 13, 13], [0, 7, 10, 14, 14], [0, 8, 11, 16, 16],
    [0, 9, 12, 18, 18], [0, 10, 13, 20, 20], [0, 11, 15, 23, 23], [0, 13, 17, 25, 25],
];

/// Filter every macroblock of the picture in address order.
pub fn deblock_picture(pic: &mut Picture) {
    for mb_addr in 0..pic.size_in_mbs() {
        deblock_macroblock(pic, mb_addr);
    }
}

/// Filter the edges owned by one macroblock.
///
/// A macroblock owns its left and top boundaries and its three internal
/// stripes in each direction. The per-macroblock filter controls from
/// the slice header apply here: idc 1 skips the macroblock entirely,
/// idc 2 drops the boundaries shared with another slice.
pub fn deblock_macroblock(pic: &mut Picture, mb_addr: usize) {
    let (mb_x, mb_y) = neighbor::mb_pos(pic, mb_addr);
    let mb = &pic.mbs[mb_addr];
    if mb.lf_disable_idc == 1 {
        return;
    }
    let mb_field = mb.mb_field;
    let field_mb = pic.params.structure.is_field() || (pic.params.mbaff && mb_field);
    let mvlimit = if field_mb { 2 } else { 4 };
    let alpha_offset = mb.lf_alpha_c0_offset;
    let beta_offset = mb.lf_beta_offset;

    let mut filter_left = mb_x != 0;
    let mut filter_top = mb_y != 0;
    // the bottom field member of the first pair row has no edge above
    if pic.params.mbaff && mb_y == 16 && mb_field {
        filter_top = false;
    }
    if mb.lf_disable_idc == 2 {
        let nb = neighbor::mb_neighbors(pic, mb_addr, NeighborScope::SameSlice);
        filter_left = nb.a.is_some();
        filter_top = nb.b.is_some();
    }

    let mut filter = MbFilter {
        pic,
        mb_addr,
        alpha_offset,
        beta_offset,
    };
    for dir in 0..2 {
        let edge_condition = if dir == 1 { filter_top } else { filter_left };
        for edge in 0..4 {
            if edge == 0 && !edge_condition {
                continue;
            }
            let (strengths, mixed_edge) =
                edge_strengths(filter.pic, mb_addr, dir, edge, mvlimit, NeighborScope::Deblock);
            if strengths.iter().any(|&s| s != 0) {
                filter.filter_edge(None, &strengths, dir, edge, NeighborScope::Deblock);
                if edge & 1 == 0 {
                    filter.filter_edge(Some(0), &strengths, dir, edge / 2, NeighborScope::Deblock);
                    filter.filter_edge(Some(1), &strengths, dir, edge / 2, NeighborScope::Deblock);
                }
            }
            // a mixed boundary splits by parity: the first stripe covered
            // the top field, this one pairs row 1 with the bottom member
            if dir == 1 && edge == 0 && !mb_field && mixed_edge {
                let scope = NeighborScope::DeblockExtraEdge;
                let (strengths, _) = edge_strengths(filter.pic, mb_addr, dir, 4, mvlimit, scope);
                if strengths.iter().any(|&s| s != 0) {
                    filter.filter_edge(None, &strengths, dir, 4, scope);
                    filter.filter_edge(Some(0), &strengths, dir, 4, scope);
                    filter.filter_edge(Some(1), &strengths, dir, 4, scope);
                }
            }
        }
    }
}

/// Boundary strength for each of the 16 sample rows or columns of one
/// stripe, plus whether the two sides differ in field coding.
fn edge_strengths(
    pic: &Picture,
    mb_addr: usize,
    dir: usize,
    edge: usize,
    mvlimit: i32,
    scope: NeighborScope,
) -> ([u8; 16], bool) {
    let mut strengths = [0u8; 16];
    let mut mixed_edge = false;
    let mbq = &pic.mbs[mb_addr];
    let mbaff = pic.params.mbaff;
    let frame = !pic.params.structure.is_field();
    for (idx, strength) in strengths.iter_mut().enumerate() {
        let (xq, yq) = if dir == 1 {
            (idx, if edge < 4 { edge << 2 } else { 1 })
        } else {
            (edge << 2, idx)
        };
        let p = neighbor::get_neighbor(
            pic,
            mb_addr,
            xq as i32 - (1 - dir) as i32,
            yq as i32 - dir as i32,
            true,
            scope,
        );
        let mbp = &pic.mbs[p.mb_addr];
        mixed_edge = mbq.mb_field != mbp.mb_field;
        let blk_q = ((yq >> 2) << 2) + (xq >> 2);
        let blk_p = ((p.y >> 2) << 2) + (p.x >> 2);

        // macroblock boundaries start at 4 when both sides share a frame
        // context or the edge is vertical; everything else starts at 3
        let mb_edge = edge == 0
            && (((!mbaff && frame) || (mbaff && !mbp.mb_field && !mbq.mb_field))
                || ((mbaff || !frame) && dir == 0));
        *strength = if mb_edge { 4 } else { 3 };

        if matches!(mbq.slice_type, SliceType::Sp | SliceType::Si) {
            continue;
        }
        if mbq.is_intra() || mbp.is_intra() {
            continue;
        }
        if (mbq.cbp_blk >> blk_q) & 1 != 0 || (mbp.cbp_blk >> blk_p) & 1 != 0 {
            *strength = 2;
        } else if mixed_edge {
            // one side holds frame references, the other field references
            *strength = 1;
        } else {
            let (mb_x, mb_y) = neighbor::mb_block_pos(pic, mb_addr);
            let cur = ((mb_x << 2) + (blk_q & 3), (mb_y << 2) + (blk_q >> 2));
            let adj = (p.pos_x >> 2, p.pos_y >> 2);
            *strength = motion_strength(pic, mbq.slice_type, cur, adj, mvlimit);
        }
    }
    (strengths, mixed_edge)
}

/// Reference picture id of a block, with a shared sentinel for unused
/// prediction lists.
fn block_ref(pic: &Picture, list: usize, bx: usize, by: usize) -> i64 {
    if pic.ref_idx(list, bx, by) < 0 {
        -1
    } else {
        pic.ref_pic_id(list, bx, by)
    }
}

/// Strength 0 or 1 from the reference pictures and motion vectors of two
/// blocks with no coded coefficients.
fn motion_strength(
    pic: &Picture,
    slice_type: SliceType,
    cur: (usize, usize),
    adj: (usize, usize),
    mvlimit: i32,
) -> u8 {
    let moved = |list_cur: usize, list_adj: usize| -> bool {
        let a = pic.mv(list_cur, cur.0, cur.1);
        let b = pic.mv(list_adj, adj.0, adj.1);
        (i32::from(a[0]) - i32::from(b[0])).abs() >= 4
            || (i32::from(a[1]) - i32::from(b[1])).abs() >= mvlimit
    };
    if slice_type == SliceType::B {
        let cur0 = block_ref(pic, 0, cur.0, cur.1);
        let cur1 = block_ref(pic, 1, cur.0, cur.1);
        let adj0 = block_ref(pic, 0, adj.0, adj.1);
        let adj1 = block_ref(pic, 1, adj.0, adj.1);
        let straight = cur0 == adj0 && cur1 == adj1;
        let crossed = cur0 == adj1 && cur1 == adj0;
        if !straight && !crossed {
            return 1;
        }
        if cur0 != cur1 {
            // each side predicts from two distinct pictures; compare the
            // vectors per picture, lists matched straight or swapped
            if cur0 == adj0 {
                u8::from(moved(0, 0) || moved(1, 1))
            } else {
                u8::from(moved(0, 1) || moved(1, 0))
            }
        } else {
            // both lists use the same picture, so either pairing may prove
            // the vectors close
            u8::from((moved(0, 0) || moved(1, 1)) && (moved(0, 1) || moved(1, 0)))
        }
    } else {
        let cur0 = block_ref(pic, 0, cur.0, cur.1);
        let adj0 = block_ref(pic, 0, adj.0, adj.1);
        u8::from(cur0 != adj0 || moved(0, 0))
    }
}

/// One macroblock's filtering pass over the sample planes.
struct MbFilter<'a> {
    pic: &'a mut Picture,
    mb_addr: usize,
    alpha_offset: i32,
    beta_offset: i32,
}

impl MbFilter<'_> {
    fn sample(&self, plane: Option<usize>, x: i32, y: i32) -> i32 {
        match plane {
            None => i32::from(self.pic.luma_sample(x as usize, y as usize)),
            Some(c) => i32::from(self.pic.chroma_sample(c, x as usize, y as usize)),
        }
    }

    fn store(&mut self, plane: Option<usize>, x: i32, y: i32, value: i32) {
        let value = value.clamp(0, 255) as u8;
        match plane {
            None => self.pic.set_luma_sample(x as usize, y as usize, value),
            Some(c) => self.pic.set_chroma_sample(c, x as usize, y as usize, value),
        }
    }

    /// Filter one stripe of 16 luma or 8 chroma sample pairs.
    fn filter_edge(
        &mut self,
        plane: Option<usize>,
        strengths: &[u8; 16],
        dir: usize,
        edge: usize,
        scope: NeighborScope,
    ) {
        let luma = plane.is_none();
        let pel_count = if luma { 16 } else { 8 };
        let q_field = self.pic.mbs[self.mb_addr].mb_field;
        let qp_q = self.pic.mbs[self.mb_addr].qp;
        let chroma_offset = self.pic.params.chroma_qp_index_offset;

        for pel in 0..pel_count {
            let (xq, yq) = if dir == 1 {
                (pel, if edge < 4 { edge << 2 } else { 1 })
            } else {
                (edge << 2, pel)
            };
            let q = neighbor::get_neighbor(self.pic, self.mb_addr, xq as i32, yq as i32, luma, scope);
            let p = neighbor::get_neighbor(
                self.pic,
                self.mb_addr,
                xq as i32 - (1 - dir) as i32,
                yq as i32 - dir as i32,
                luma,
                scope,
            );
            if !p.available {
                continue;
            }
            let p_field = self.pic.mbs[p.mb_addr].mb_field;
            let qp_p = self.pic.mbs[p.mb_addr].qp;
            let field_filtering = q_field || p_field;
            // chroma strength positions fold back onto the luma grid
            let strength_idx = if luma {
                pel
            } else if q_field && !p_field {
                pel << 1
            } else {
                ((pel >> 1) << 2) + (pel & 1)
            };
            let strength = i32::from(strengths[strength_idx]);
            if strength == 0 {
                continue;
            }

            // across a mixed boundary the frame side visits only its own
            // parity's rows
            let (qdx, qdy) = if dir == 1 {
                (0, if field_filtering && !q_field { 2 } else { 1 })
            } else {
                (1, 0)
            };
            let (pdx, pdy) = if dir == 1 {
                (0, if field_filtering && !p_field { 2 } else { 1 })
            } else {
                (1, 0)
            };

            let qp = if luma {
                (qp_p + qp_q + 1) >> 1
            } else {
                (transform::chroma_qp(qp_p, chroma_offset)
                    + transform::chroma_qp(qp_q, chroma_offset)
                    + 1)
                    >> 1
            };
            let index_a = (qp + self.alpha_offset).clamp(0, transform::MAX_QP) as usize;
            let index_b = (qp + self.beta_offset).clamp(0, transform::MAX_QP) as usize;
            let alpha = ALPHA_TABLE[index_a];
            let beta = BETA_TABLE[index_b];

            let (px, py) = (p.pos_x as i32, p.pos_y as i32);
            let (qx, qy) = (q.pos_x as i32, q.pos_y as i32);
            let l0 = self.sample(plane, px, py);
            let l1 = self.sample(plane, px - pdx, py - pdy);
            let l2 = self.sample(plane, px - 2 * pdx, py - 2 * pdy);
            let l3 = self.sample(plane, px - 3 * pdx, py - 3 * pdy);
            let r0 = self.sample(plane, qx, qy);
            let r1 = self.sample(plane, qx + qdx, qy + qdy);
            let r2 = self.sample(plane, qx + 2 * qdx, qy + 2 * qdy);
            let r3 = self.sample(plane, qx + 3 * qdx, qy + 3 * qdy);

            let delta = r0 - l0;
            if delta.abs() >= alpha {
                continue;
            }
            if (r0 - r1).abs() >= beta || (l0 - l1).abs() >= beta {
                continue;
            }

            let c0_table = CLIP_TAB[index_a][strength as usize];
            let (ap, aq) = if luma {
                ((l0 - l2).abs() < beta, (r0 - r2).abs() < beta)
            } else {
                (false, false)
            };
            let rl0 = l0 + r0;

            if strength == 4 {
                if luma {
                    let small_gap = delta.abs() < (alpha >> 2) + 2;
                    let ap = ap && small_gap;
                    let aq = aq && small_gap;
                    if aq {
                        self.store(plane, qx, qy, (l1 + ((r1 + rl0) << 1) + r2 + 4) >> 3);
                        self.store(plane, qx + qdx, qy + qdy, (r2 + r0 + r1 + l0 + 2) >> 2);
                        self.store(
                            plane,
                            qx + 2 * qdx,
                            qy + 2 * qdy,
                            (((r3 + r2) << 1) + r2 + r1 + rl0 + 4) >> 3,
                        );
                    } else {
                        self.store(plane, qx, qy, ((r1 << 1) + r0 + l1 + 2) >> 2);
                    }
                    if ap {
                        self.store(plane, px, py, (r1 + ((l1 + rl0) << 1) + l2 + 4) >> 3);
                        self.store(plane, px - pdx, py - pdy, (l2 + l1 + l0 + r0 + 2) >> 2);
                        self.store(
                            plane,
                            px - 2 * pdx,
                            py - 2 * pdy,
                            (((l3 + l2) << 1) + l2 + l1 + rl0 + 4) >> 3,
                        );
                    } else {
                        self.store(plane, px, py, ((l1 << 1) + l0 + r1 + 2) >> 2);
                    }
                } else {
                    self.store(plane, qx, qy, ((r1 << 1) + r0 + l1 + 2) >> 2);
                    self.store(plane, px, py, ((l1 << 1) + l0 + r1 + 2) >> 2);
                }
            } else {
                let c0 = if luma {
                    c0_table + i32::from(ap) + i32::from(aq)
                } else {
                    c0_table + 1
                };
                let dif = (((delta << 2) + (l1 - r1) + 4) >> 3).clamp(-c0, c0);
                self.store(plane, px, py, l0 + dif);
                self.store(plane, qx, qy, r0 - dif);
                if ap {
                    let adj = ((l2 + ((rl0 + 1) >> 1) - (l1 << 1)) >> 1).clamp(-c0_table, c0_table);
                    self.store(plane, px - pdx, py - pdy, l1 + adj);
                }
                if aq {
                    let adj = ((r2 + ((rl0 + 1) >> 1) - (r1 << 1)) >> 1).clamp(-c0_table, c0_table);
                    self.store(plane, qx + qdx, qy + qdy, r1 + adj);
                }
            }
        }
    }
}
