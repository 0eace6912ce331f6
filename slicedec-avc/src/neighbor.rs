//! Neighbor derivation.
//!
//! Every lookup is a pure function of the macroblock address, the picture
//! geometry and the arena state; nothing here caches pointers into the
//! arena. Positions come back in sample units and are only meaningful
//! when `available` is set.
//!
//! Pair-adaptive pictures address macroblocks pairwise: the top member of
//! a pair is the even address and occupies the upper 16 rows of the pair
//! block, field or not. The case analysis over (current field flag,
//! top/bottom, neighbor field flag) maps a sample offset onto the member
//! and row actually holding that sample.

use crate::picture::Picture;

/// Who is asking restricts which macroblocks may answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborScope {
    /// Syntax prediction: only macroblocks of the same slice exist.
    SameSlice,
    /// Loop filter: slice boundaries do not hide macroblocks, and a field
    /// pair above a frame macroblock answers with its top member.
    Deblock,
    /// Second filter pass over the extra edge of a mixed pair: row 0
    /// resolves to the bottom member of the pair above.
    DeblockExtraEdge,
}

impl NeighborScope {
    fn crosses_slices(self) -> bool {
        !matches!(self, NeighborScope::SameSlice)
    }
}

/// A resolved neighbor sample position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixelPos {
    pub available: bool,
    /// Arena address of the macroblock holding the sample.
    pub mb_addr: usize,
    /// Sample (or, after [`luma_4x4_neighbor`], 4x4 block) offset inside
    /// that macroblock.
    pub x: usize,
    pub y: usize,
    /// Picture-wide sample (or 4x4 block) position.
    pub pos_x: usize,
    pub pos_y: usize,
}

impl PixelPos {
    fn unavailable() -> Self {
        PixelPos::default()
    }
}

/// Macroblock-level neighbors. In pair-adaptive pictures these are the
/// top members of the neighboring pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MbNeighbors {
    pub a: Option<usize>,
    pub b: Option<usize>,
    pub c: Option<usize>,
    pub d: Option<usize>,
}

/// Position of a macroblock in macroblock units. For pair-adaptive
/// pictures each pair member gets its own row.
pub fn mb_block_pos(pic: &Picture, mb_addr: usize) -> (usize, usize) {
    let w = pic.params.width_in_mbs;
    if pic.params.mbaff {
        let pair = mb_addr / 2;
        (pair % w, 2 * (pair / w) + (mb_addr % 2))
    } else {
        (mb_addr % w, mb_addr / w)
    }
}

/// Position of a macroblock's top-left luma sample.
pub fn mb_pos(pic: &Picture, mb_addr: usize) -> (usize, usize) {
    let (x, y) = mb_block_pos(pic, mb_addr);
    (x * 16, y * 16)
}

/// A macroblock exists for the asker when it is inside the picture and,
/// for syntax prediction, was decoded by the same slice.
pub fn mb_is_available(pic: &Picture, mb_addr: i64, curr: usize, scope: NeighborScope) -> bool {
    if mb_addr < 0 || mb_addr >= pic.size_in_mbs() as i64 {
        return false;
    }
    if scope.crosses_slices() {
        return true;
    }
    pic.mbs[mb_addr as usize].slice_nr == pic.mbs[curr].slice_nr
}

/// Resolve the four macroblock-level neighbors of `mb_addr`.
pub fn mb_neighbors(pic: &Picture, mb_addr: usize, scope: NeighborScope) -> MbNeighbors {
    let w = pic.params.width_in_mbs as i64;
    let check = |addr: i64, extra: bool| -> Option<usize> {
        (extra && mb_is_available(pic, addr, mb_addr, scope)).then_some(addr as usize)
    };
    if pic.params.mbaff {
        let pair = (mb_addr / 2) as i64;
        MbNeighbors {
            a: check(2 * (pair - 1), pair % w != 0),
            b: check(2 * (pair - w), true),
            c: check(2 * (pair - w + 1), (pair + 1) % w != 0),
            d: check(2 * (pair - w - 1), pair % w != 0),
        }
    } else {
        let nr = mb_addr as i64;
        MbNeighbors {
            a: check(nr - 1, nr % w != 0),
            b: check(nr - w, true),
            c: check(nr - w + 1, (nr + 1) % w != 0),
            d: check(nr - w - 1, nr % w != 0),
        }
    }
}

/// Sample-level left neighbor macroblock, used by the entropy contexts.
pub fn left_mb(pic: &Picture, mb_addr: usize, scope: NeighborScope) -> Option<usize> {
    let p = get_neighbor(pic, mb_addr, -1, 0, true, scope);
    p.available.then_some(p.mb_addr)
}

/// Sample-level above neighbor macroblock, used by the entropy contexts.
pub fn up_mb(pic: &Picture, mb_addr: usize, scope: NeighborScope) -> Option<usize> {
    let p = get_neighbor(pic, mb_addr, 0, -1, true, scope);
    p.available.then_some(p.mb_addr)
}

/// Field flag inferred from the left, then above, macroblock pair when a
/// skipped pair never transmitted one.
pub fn inferred_field_flag(pic: &Picture, mb_addr: usize) -> bool {
    let nb = mb_neighbors(pic, mb_addr, NeighborScope::SameSlice);
    if let Some(a) = nb.a {
        pic.mbs[a].mb_field
    } else if let Some(b) = nb.b {
        pic.mbs[b].mb_field
    } else {
        false
    }
}

/// Resolve the macroblock and in-macroblock position of the sample at
/// `(xn, yn)` relative to the top-left sample of `mb_addr`.
pub fn get_neighbor(
    pic: &Picture,
    mb_addr: usize,
    xn: i32,
    yn: i32,
    luma: bool,
    scope: NeighborScope,
) -> PixelPos {
    if pic.params.mbaff {
        aff_neighbor(pic, mb_addr, xn, yn, luma, scope)
    } else {
        plain_neighbor(pic, mb_addr, xn, yn, luma, scope)
    }
}

fn fill_position(pic: &Picture, mb_addr: usize, xn: i32, ym: i32, luma: bool) -> PixelPos {
    let max_wh = if luma { 16 } else { 8 };
    let x = ((xn + max_wh) % max_wh) as usize;
    let y = ((ym + max_wh) % max_wh) as usize;
    let (mx, my) = mb_pos(pic, mb_addr);
    let (pos_x, pos_y) = if luma {
        (mx + x, my + y)
    } else {
        (mx / 2 + x, my / 2 + y)
    };
    PixelPos {
        available: true,
        mb_addr,
        x,
        y,
        pos_x,
        pos_y,
    }
}

fn plain_neighbor(
    pic: &Picture,
    mb_addr: usize,
    xn: i32,
    yn: i32,
    luma: bool,
    scope: NeighborScope,
) -> PixelPos {
    let max_wh = if luma { 16 } else { 8 };
    let nb = mb_neighbors(pic, mb_addr, scope);
    let target = if xn < 0 && yn < 0 {
        nb.d
    } else if xn < 0 && (0..max_wh).contains(&yn) {
        nb.a
    } else if (0..max_wh).contains(&xn) && yn < 0 {
        nb.b
    } else if (0..max_wh).contains(&xn) && (0..max_wh).contains(&yn) {
        Some(mb_addr)
    } else if xn >= max_wh && yn < 0 {
        nb.c
    } else {
        None
    };
    match target {
        Some(addr) => fill_position(pic, addr, xn, yn, luma),
        None => PixelPos::unavailable(),
    }
}

fn aff_neighbor(
    pic: &Picture,
    mb_addr: usize,
    xn: i32,
    yn: i32,
    luma: bool,
    scope: NeighborScope,
) -> PixelPos {
    let max_wh = if luma { 16 } else { 8 };
    if yn > max_wh - 1 || (xn > max_wh - 1 && yn >= 0) {
        return PixelPos::unavailable();
    }

    let curr_field = pic.mbs[mb_addr].mb_field;
    let bottom = mb_addr % 2 == 1;
    let nb = mb_neighbors(pic, mb_addr, scope);
    let field_of = |addr: usize| pic.mbs[addr].mb_field;

    let resolved: Option<(usize, i32)> = if xn < 0 && yn < 0 {
        // above-left sample
        match (curr_field, bottom) {
            (false, false) => nb.d.map(|d| (d + 1, yn)),
            (false, true) => nb.a.map(|a| {
                if field_of(a) {
                    (a + 1, (yn + max_wh) >> 1)
                } else {
                    (a, yn)
                }
            }),
            (true, false) => nb.d.map(|d| {
                if field_of(d) {
                    (d, yn)
                } else {
                    (d + 1, 2 * yn)
                }
            }),
            (true, true) => nb.d.map(|d| (d + 1, yn)),
        }
    } else if xn < 0 {
        // left column
        match (curr_field, bottom) {
            (false, false) => nb.a.map(|a| {
                if field_of(a) {
                    (a + (yn & 1) as usize, yn >> 1)
                } else {
                    (a, yn)
                }
            }),
            (false, true) => nb.a.map(|a| {
                if field_of(a) {
                    (a + (yn & 1) as usize, (yn + max_wh) >> 1)
                } else {
                    (a + 1, yn)
                }
            }),
            (true, false) => nb.a.map(|a| {
                if field_of(a) {
                    (a, yn)
                } else if yn < max_wh / 2 {
                    (a, yn << 1)
                } else {
                    (a + 1, (yn << 1) - max_wh)
                }
            }),
            (true, true) => nb.a.map(|a| {
                if field_of(a) {
                    (a + 1, yn)
                } else if yn < max_wh / 2 {
                    (a, (yn << 1) + 1)
                } else {
                    (a + 1, (yn << 1) + 1 - max_wh)
                }
            }),
        }
    } else if xn < max_wh && yn < 0 {
        // directly above
        match (curr_field, bottom) {
            (false, false) => nb.b.map(|b| {
                // the filter pairs even frame rows with the top field
                // member of a field pair above
                if scope == NeighborScope::Deblock && field_of(b) {
                    (b, yn)
                } else {
                    (b + 1, yn)
                }
            }),
            (false, true) | (true, true) => Some((mb_addr - 1, yn)),
            (true, false) => nb.b.map(|b| {
                if field_of(b) {
                    (b, yn)
                } else {
                    (b + 1, 2 * yn)
                }
            }),
        }
    } else if xn < max_wh {
        // inside this macroblock; the extra-edge pass redirects row 0 to
        // the bottom member of the pair above
        if scope == NeighborScope::DeblockExtraEdge && yn == 0 {
            nb.b.map(|b| (b + 1, max_wh - 1))
        } else {
            Some((mb_addr, yn))
        }
    } else {
        // above-right (yn < 0 here)
        match (curr_field, bottom) {
            (false, false) => nb.c.map(|c| (c + 1, yn)),
            (false, true) => None,
            (true, false) => nb.c.map(|c| {
                if field_of(c) {
                    (c, yn)
                } else {
                    (c + 1, 2 * yn)
                }
            }),
            (true, true) => nb.c.map(|c| (c + 1, yn)),
        }
    };

    match resolved {
        Some((addr, ym)) => fill_position(pic, addr, xn, ym, luma),
        None => PixelPos::unavailable(),
    }
}

/// 4x4 block neighbor in the luma grid. On success the coordinates are in
/// 4x4 block units.
pub fn luma_4x4_neighbor(
    pic: &Picture,
    mb_addr: usize,
    block_x: i32,
    block_y: i32,
    rel_x: i32,
    rel_y: i32,
    scope: NeighborScope,
) -> PixelPos {
    let mut p = get_neighbor(pic, mb_addr, 4 * block_x + rel_x, 4 * block_y + rel_y, true, scope);
    if p.available {
        p.x /= 4;
        p.y /= 4;
        p.pos_x /= 4;
        p.pos_y /= 4;
    }
    p
}

/// 4x4 block neighbor in the chroma grid.
pub fn chroma_4x4_neighbor(
    pic: &Picture,
    mb_addr: usize,
    block_x: i32,
    block_y: i32,
    rel_x: i32,
    rel_y: i32,
    scope: NeighborScope,
) -> PixelPos {
    let mut p = get_neighbor(pic, mb_addr, 4 * block_x + rel_x, 4 * block_y + rel_y, false, scope);
    if p.available {
        p.x /= 4;
        p.y /= 4;
        p.pos_x /= 4;
        p.pos_y /= 4;
    }
    p
}
