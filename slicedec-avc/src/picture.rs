//! Decoded picture state and reference picture inputs.
//!
//! The picture owns everything later macroblocks and the loop filter read
//! back: sample planes, the macroblock arena, and the 4x4-granular motion
//! side tables. Reference pictures come in as read-only snapshots of the
//! same side tables plus identity metadata.

use crate::macroblock::Macroblock;

pub const MB_SIZE: usize = 16;
pub const BLOCK_SIZE: usize = 4;

/// Scan structure of the picture being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureStructure {
    #[default]
    Frame,
    TopField,
    BottomField,
}

impl PictureStructure {
    pub fn is_field(self) -> bool {
        !matches!(self, PictureStructure::Frame)
    }
}

/// Sequence/picture level parameters the slice decoder needs.
#[derive(Debug, Clone, Copy)]
pub struct PictureParams {
    /// Picture width in macroblocks.
    pub width_in_mbs: usize,
    /// Picture height in macroblocks (frame height for MBAFF).
    pub height_in_mbs: usize,
    /// Macroblock-adaptive frame/field coding.
    pub mbaff: bool,
    /// Field or frame picture.
    pub structure: PictureStructure,
    /// CABAC when true, CAVLC otherwise.
    pub entropy_cabac: bool,
    /// Intra prediction may not cross into inter macroblocks.
    pub constrained_intra_pred: bool,
    /// Offset added to the luma QP before the chroma QP table.
    pub chroma_qp_index_offset: i32,
    /// Spatial resolution restriction for direct 8x8 blocks.
    pub direct_8x8_inference: bool,
}

impl PictureParams {
    pub fn size_in_mbs(&self) -> usize {
        self.width_in_mbs * self.height_in_mbs
    }

    pub fn width(&self) -> usize {
        self.width_in_mbs * MB_SIZE
    }

    pub fn height(&self) -> usize {
        self.height_in_mbs * MB_SIZE
    }

    /// Width of the picture in 4x4 blocks.
    pub fn width_in_blocks(&self) -> usize {
        self.width_in_mbs * 4
    }

    pub fn height_in_blocks(&self) -> usize {
        self.height_in_mbs * 4
    }
}

/// Dequantized residual of one macroblock.
///
/// Indexed `[block_x][block_y][x][y]` in 4x4 units; luma occupies block
/// rows 0..4, the two chroma components share rows 4..6 with U in block
/// columns 0..2 and V in 2..4.
pub type CoeffBlock = [[[[i32; 4]; 4]; 6]; 4];

/// Motion vector in quarter-sample units.
pub type Mv = [i16; 2];

/// Identity value stored for unreferenced blocks.
pub const NO_REF_PIC_ID: i64 = i64::MIN;

/// One reference picture as seen by the current slice.
#[derive(Debug, Clone)]
pub struct RefPicture {
    /// Unique id used for deblocking comparisons and co-located mapping.
    pub id: i64,
    /// Display order count of this reference.
    pub poc: i32,
    /// Long-term references opt out of temporal direct scaling.
    pub is_long_term: bool,
}

/// Co-located motion data from the first list-1 reference, sampled at 4x4
/// granularity. The caller supplies the variant matching the current
/// structure; for MBAFF field macroblocks the top/bottom variants are
/// selected per macroblock.
#[derive(Debug, Clone)]
pub struct ColocatedData {
    /// Width of the grid in 4x4 blocks.
    pub width_in_blocks: usize,
    /// Height of the grid in 4x4 blocks.
    pub height_in_blocks: usize,
    /// Co-located motion, `[list]` then row-major blocks.
    pub mv: [Vec<Mv>; 2],
    /// Co-located reference indices, -1 for intra/unused.
    pub ref_idx: [Vec<i8>; 2],
    /// Co-located reference picture ids.
    pub ref_pic_id: [Vec<i64>; 2],
    /// Spatial direct zero-motion test result per block.
    pub moving_block: Vec<bool>,
}

impl ColocatedData {
    pub fn new(width_in_blocks: usize, height_in_blocks: usize) -> Self {
        let n = width_in_blocks * height_in_blocks;
        ColocatedData {
            width_in_blocks,
            height_in_blocks,
            mv: [vec![[0; 2]; n], vec![[0; 2]; n]],
            ref_idx: [vec![-1; n], vec![-1; n]],
            ref_pic_id: [vec![NO_REF_PIC_ID; n], vec![NO_REF_PIC_ID; n]],
            moving_block: vec![false; n],
        }
    }

    fn index(&self, bx: usize, by: usize) -> usize {
        by * self.width_in_blocks + bx
    }

    pub fn mv(&self, list: usize, bx: usize, by: usize) -> Mv {
        self.mv[list][self.index(bx, by)]
    }

    pub fn ref_idx(&self, list: usize, bx: usize, by: usize) -> i8 {
        self.ref_idx[list][self.index(bx, by)]
    }

    pub fn ref_pic_id(&self, list: usize, bx: usize, by: usize) -> i64 {
        self.ref_pic_id[list][self.index(bx, by)]
    }

    pub fn is_moving(&self, bx: usize, by: usize) -> bool {
        self.moving_block[self.index(bx, by)]
    }

    /// Fill `moving_block` from the stored motion. A block counts as
    /// still when it predicts from the first picture of a list and both
    /// vector components stay within one quarter sample; `long_term`
    /// disqualifies the list-0 shortcut for the whole grid.
    pub fn derive_moving_blocks(&mut self, long_term: bool) {
        let small = |mv: Mv| mv[0].abs() >> 1 == 0 && mv[1].abs() >> 1 == 0;
        for i in 0..self.moving_block.len() {
            let still_l0 = !long_term && self.ref_idx[0][i] == 0 && small(self.mv[0][i]);
            let still_l1 =
                self.ref_idx[0][i] == -1 && self.ref_idx[1][i] == 0 && small(self.mv[1][i]);
            self.moving_block[i] = !(still_l0 || still_l1);
        }
    }
}

/// The picture being decoded.
#[derive(Debug, Clone)]
pub struct Picture {
    pub params: PictureParams,
    /// Luma samples, row-major.
    pub luma: Vec<u8>,
    /// Chroma samples, row-major, half resolution.
    pub chroma: [Vec<u8>; 2],
    /// Macroblock arena in decoding address order.
    pub mbs: Vec<Macroblock>,
    /// Dequantized residual per macroblock.
    pub coeffs: Vec<CoeffBlock>,
    /// Motion vectors per list, row-major in 4x4 blocks.
    mv: [Vec<Mv>; 2],
    /// Reference indices per list, -1 when unreferenced.
    ref_idx: [Vec<i8>; 2],
    /// Reference picture ids per list.
    ref_pic_id: [Vec<i64>; 2],
    /// Intra 4x4 prediction modes, picture wide in 4x4 blocks.
    ipredmode: Vec<i8>,
    /// Nonzero-coefficient counts per macroblock, `[x][y]` with luma in
    /// rows 0..4 and chroma in rows 4..6.
    pub nz_coeff: Vec<[[u8; 6]; 4]>,
    /// Cleared for inter macroblocks under constrained intra prediction.
    pub intra_block: Vec<bool>,
    /// SI switching blocks, flagged per macroblock.
    pub si_block: Vec<bool>,
}

impl Picture {
    pub fn new(params: PictureParams) -> Self {
        let mbs = params.size_in_mbs();
        let blocks = params.width_in_blocks() * params.height_in_blocks();
        let chroma_len = params.width() / 2 * (params.height() / 2);
        Picture {
            params,
            luma: vec![0; params.width() * params.height()],
            chroma: [vec![128; chroma_len], vec![128; chroma_len]],
            mbs: vec![Macroblock::default(); mbs],
            coeffs: vec![[[[[0; 4]; 4]; 6]; 4]; mbs],
            mv: [vec![[0; 2]; blocks], vec![[0; 2]; blocks]],
            ref_idx: [vec![-1; blocks], vec![-1; blocks]],
            ref_pic_id: [
                vec![NO_REF_PIC_ID; blocks],
                vec![NO_REF_PIC_ID; blocks],
            ],
            ipredmode: vec![-1; blocks],
            nz_coeff: vec![[[0; 6]; 4]; mbs],
            intra_block: vec![true; mbs],
            si_block: vec![false; mbs],
        }
    }

    pub fn size_in_mbs(&self) -> usize {
        self.mbs.len()
    }

    fn block_index(&self, bx: usize, by: usize) -> usize {
        by * self.params.width_in_blocks() + bx
    }

    pub fn mv(&self, list: usize, bx: usize, by: usize) -> Mv {
        self.mv[list][self.block_index(bx, by)]
    }

    pub fn set_mv(&mut self, list: usize, bx: usize, by: usize, mv: Mv) {
        let idx = self.block_index(bx, by);
        self.mv[list][idx] = mv;
    }

    pub fn ref_idx(&self, list: usize, bx: usize, by: usize) -> i8 {
        self.ref_idx[list][self.block_index(bx, by)]
    }

    pub fn set_ref_idx(&mut self, list: usize, bx: usize, by: usize, value: i8) {
        let idx = self.block_index(bx, by);
        self.ref_idx[list][idx] = value;
    }

    pub fn ref_pic_id(&self, list: usize, bx: usize, by: usize) -> i64 {
        self.ref_pic_id[list][self.block_index(bx, by)]
    }

    pub fn set_ref_pic_id(&mut self, list: usize, bx: usize, by: usize, value: i64) {
        let idx = self.block_index(bx, by);
        self.ref_pic_id[list][idx] = value;
    }

    pub fn ipred_mode(&self, bx: usize, by: usize) -> i8 {
        self.ipredmode[self.block_index(bx, by)]
    }

    pub fn set_ipred_mode(&mut self, bx: usize, by: usize, mode: i8) {
        let idx = self.block_index(bx, by);
        self.ipredmode[idx] = mode;
    }

    pub fn luma_sample(&self, x: usize, y: usize) -> u8 {
        self.luma[y * self.params.width() + x]
    }

    pub fn set_luma_sample(&mut self, x: usize, y: usize, value: u8) {
        let w = self.params.width();
        self.luma[y * w + x] = value;
    }

    pub fn chroma_sample(&self, plane: usize, x: usize, y: usize) -> u8 {
        self.chroma[plane][y * (self.params.width() / 2) + x]
    }

    pub fn set_chroma_sample(&mut self, plane: usize, x: usize, y: usize, value: u8) {
        let w = self.params.width() / 2;
        self.chroma[plane][y * w + x] = value;
    }
}
