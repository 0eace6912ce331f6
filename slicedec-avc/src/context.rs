//! Adaptive context banks.
//!
//! Contexts are grouped the way the syntax readers consume them: one bank
//! for motion and mode elements, one for texture elements. Each group is a
//! fixed-size array indexed by the reader's context increment, so a reader
//! borrows exactly the slice it is allowed to touch.

use crate::engine::BiContext;

pub const MB_TYPE_CTX: usize = 11;
pub const B8_TYPE_CTX: usize = 9;
pub const MV_RES_CTX: usize = 10;
pub const REF_NO_CTX: usize = 6;
pub const DELTA_QP_CTX: usize = 4;
pub const MB_AFF_CTX: usize = 4;

pub const IPR_CTX: usize = 2;
pub const CIPR_CTX: usize = 4;
pub const CBP_CTX: usize = 4;
pub const BCBP_CTX: usize = 4;
pub const MAP_CTX: usize = 15;
pub const LAST_CTX: usize = 15;
pub const ONE_CTX: usize = 5;
pub const ABS_CTX: usize = 5;

/// Number of transform block classes with their own texture contexts.
pub const BLOCK_TYPES: usize = 8;

/// Initialization row shared by every context.
///
/// The state mapping below is exact; the per-element fitted rows are
/// uniform, so every context starts equiprobable at any QP.
const INIT_ROW: (i32, i32) = (0, 64);

fn clip3(low: i32, high: i32, value: i32) -> i32 {
    value.clamp(low, high)
}

/// Map an initialization row to a starting state at the given slice QP.
pub fn init_context(qp: i32, (m, n): (i32, i32)) -> BiContext {
    let pre = clip3(1, 126, ((m * clip3(0, 51, qp)) >> 4) + n);
    if pre <= 63 {
        BiContext::new((63 - pre) as u8, false)
    } else {
        BiContext::new((pre - 64) as u8, true)
    }
}

/// Contexts for macroblock modes, partitions, motion and QP deltas.
#[derive(Debug, Clone)]
pub struct MotionContexts {
    pub mb_type: [[BiContext; MB_TYPE_CTX]; 4],
    pub b8_type: [[BiContext; B8_TYPE_CTX]; 2],
    pub mv_res: [[BiContext; MV_RES_CTX]; 2],
    pub ref_no: [[BiContext; REF_NO_CTX]; 2],
    pub delta_qp: [BiContext; DELTA_QP_CTX],
    pub mb_aff: [BiContext; MB_AFF_CTX],
}

impl MotionContexts {
    pub fn new(qp: i32) -> Self {
        let c = init_context(qp, INIT_ROW);
        Self {
            mb_type: [[c; MB_TYPE_CTX]; 4],
            b8_type: [[c; B8_TYPE_CTX]; 2],
            mv_res: [[c; MV_RES_CTX]; 2],
            ref_no: [[c; REF_NO_CTX]; 2],
            delta_qp: [c; DELTA_QP_CTX],
            mb_aff: [c; MB_AFF_CTX],
        }
    }
}

/// Contexts for prediction modes, coded block patterns and coefficients.
#[derive(Debug, Clone)]
pub struct TextureContexts {
    pub ipr: [BiContext; IPR_CTX],
    pub cipr: [BiContext; CIPR_CTX],
    pub cbp: [[BiContext; CBP_CTX]; 3],
    pub bcbp: [[BiContext; BCBP_CTX]; BLOCK_TYPES],
    pub map: [[BiContext; MAP_CTX]; BLOCK_TYPES],
    pub last: [[BiContext; LAST_CTX]; BLOCK_TYPES],
    pub one: [[BiContext; ONE_CTX]; BLOCK_TYPES],
    pub abs: [[BiContext; ABS_CTX]; BLOCK_TYPES],
    pub fld_map: [[BiContext; MAP_CTX]; BLOCK_TYPES],
    pub fld_last: [[BiContext; LAST_CTX]; BLOCK_TYPES],
}

impl TextureContexts {
    pub fn new(qp: i32) -> Self {
        let c = init_context(qp, INIT_ROW);
        Self {
            ipr: [c; IPR_CTX],
            cipr: [c; CIPR_CTX],
            cbp: [[c; CBP_CTX]; 3],
            bcbp: [[c; BCBP_CTX]; BLOCK_TYPES],
            map: [[c; MAP_CTX]; BLOCK_TYPES],
            last: [[c; LAST_CTX]; BLOCK_TYPES],
            one: [[c; ONE_CTX]; BLOCK_TYPES],
            abs: [[c; ABS_CTX]; BLOCK_TYPES],
            fld_map: [[c; MAP_CTX]; BLOCK_TYPES],
            fld_last: [[c; LAST_CTX]; BLOCK_TYPES],
        }
    }
}

/// Both banks, reinitialized together at each slice start.
#[derive(Debug, Clone)]
pub struct ContextBank {
    pub motion: MotionContexts,
    pub texture: TextureContexts,
}

impl ContextBank {
    pub fn new(qp: i32) -> Self {
        Self {
            motion: MotionContexts::new(qp),
            texture: TextureContexts::new(qp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        // Equiprobable row lands on state 0 with MPS set, at any QP.
        for qp in [0, 26, 51] {
            let c = init_context(qp, (0, 64));
            assert_eq!(c.state(), 0);
            assert!(c.mps());
        }

        // A fitted-style row walks the state with QP.
        let c = init_context(26, (20, 40));
        assert_eq!(c.state(), 8);
        assert!(c.mps());

        let c = init_context(0, (20, 40));
        assert_eq!(c.state(), 23);
        assert!(!c.mps());

        // Clamped at the extremes of the pre-state range.
        let c = init_context(51, (-128, -128));
        assert_eq!(c.state(), 62);
        assert!(!c.mps());

        let c = init_context(51, (127, 127));
        assert_eq!(c.state(), 62);
        assert!(c.mps());
    }

    #[test]
    fn test_bank_starts_uniform() {
        let bank = ContextBank::new(30);
        let expect = init_context(30, (0, 64));

        assert_eq!(bank.motion.mb_type[3][MB_TYPE_CTX - 1], expect);
        assert_eq!(bank.motion.mv_res[1][MV_RES_CTX - 1], expect);
        assert_eq!(bank.texture.map[BLOCK_TYPES - 1][MAP_CTX - 1], expect);
        assert_eq!(bank.texture.fld_last[0][0], expect);
    }

    #[test]
    fn test_reinit_discards_adaptation() {
        let mut bank = ContextBank::new(28);
        bank.motion.mb_type[1][0].update(false);
        bank.motion.mb_type[1][0].update(false);
        assert_ne!(bank.motion.mb_type[1][0], init_context(28, INIT_ROW));

        bank = ContextBank::new(28);
        assert_eq!(bank.motion.mb_type[1][0], init_context(28, INIT_ROW));
    }
}
