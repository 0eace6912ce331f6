//! Per-macroblock decode state.
//!
//! A [`Macroblock`] is one record in the picture's macroblock arena. The
//! syntax readers fill it in as they go and later macroblocks reach back
//! into the arena through the neighbor helpers, so everything a neighbor
//! can ask about lives here rather than in transient reader state.

use slicedec_core::{DecodeError, Result};

use crate::slice::SliceType;

/// Sub-partition mode of one 8x8 block, stored in `b8mode`.
pub const B8_DIRECT: u8 = 0;
/// 8x8 sub-partition.
pub const B8_8X8: u8 = 4;
/// 8x4 sub-partition.
pub const B8_8X4: u8 = 5;
/// 4x8 sub-partition.
pub const B8_4X8: u8 = 6;
/// 4x4 sub-partition.
pub const B8_4X4: u8 = 7;
/// Intra 4x4 coded 8x8 block.
pub const B8_INTRA: u8 = 11;

/// Prediction direction of one 8x8 block, stored in `b8pdir`.
pub const PDIR_L0: i8 = 0;
pub const PDIR_L1: i8 = 1;
pub const PDIR_BI: i8 = 2;
pub const PDIR_INTRA: i8 = -1;

/// Per-partition block counts indexed by partition mode, `(horizontal,
/// vertical)` in 4x4 units.
pub const BLOCK_STEP: [(usize, usize); 8] = [
    (0, 0),
    (4, 4),
    (4, 2),
    (2, 4),
    (2, 2),
    (2, 1),
    (1, 2),
    (1, 1),
];

/// Interpreted macroblock mode.
///
/// The mode trees produce a raw per-slice-type code; interpretation maps
/// it onto this shared space so neighbors can be compared without knowing
/// which slice type produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MbMode {
    /// P/SP skip or B direct. Carries no further syntax except, for B
    /// direct from the mode tree, a coded block pattern.
    #[default]
    Skip,
    /// One 16x16 partition.
    Inter16x16,
    /// Two 16x8 partitions.
    Inter16x8,
    /// Two 8x16 partitions.
    Inter8x16,
    /// Four 8x8 blocks with transmitted sub-partition modes.
    Inter8x8,
    /// Intra with sixteen 4x4 predicted blocks.
    Intra4x4,
    /// Intra with one 16x16 predicted block; prediction mode and coded
    /// block pattern ride along in the mode code.
    Intra16x16,
    /// SI switching intra block.
    SIntra4x4,
    /// Raw samples, no prediction or residual.
    Pcm,
}

impl MbMode {
    /// True for every intra mode, PCM included.
    pub fn is_intra(self) -> bool {
        matches!(
            self,
            MbMode::Intra4x4 | MbMode::Intra16x16 | MbMode::SIntra4x4 | MbMode::Pcm
        )
    }

    /// True when the mode carries motion vector differences.
    pub fn has_motion_syntax(self) -> bool {
        matches!(
            self,
            MbMode::Inter16x16 | MbMode::Inter16x8 | MbMode::Inter8x16 | MbMode::Inter8x8
        )
    }

    /// Partition mode code used to index [`BLOCK_STEP`].
    pub fn partition_code(self) -> usize {
        match self {
            MbMode::Skip => 0,
            MbMode::Inter16x16 => 1,
            MbMode::Inter16x8 => 2,
            MbMode::Inter8x16 => 3,
            MbMode::Inter8x8 => 4,
            _ => 0,
        }
    }
}

/// One macroblock record in the picture arena.
#[derive(Debug, Clone)]
pub struct Macroblock {
    /// Slice number that decoded this macroblock, -1 while undecoded.
    /// Neighbor availability for syntax prediction compares this field.
    pub slice_nr: i32,
    /// Slice type that decoded this macroblock, kept for the loop filter.
    pub slice_type: SliceType,
    /// Luma QP in effect for this macroblock.
    pub qp: i32,
    /// Last decoded QP delta.
    pub delta_quant: i32,
    /// Interpreted mode.
    pub mode: MbMode,
    /// True when the macroblock was skipped (P skip or B skip). B direct
    /// signalled through the mode tree is not a skip.
    pub skipped: bool,
    /// Intra 16x16 prediction mode extracted from the mode code.
    pub i16mode: u8,
    /// Chroma intra prediction mode.
    pub c_ipred_mode: u8,
    /// Sub-partition mode per 8x8 block.
    pub b8mode: [u8; 4],
    /// Prediction direction per 8x8 block.
    pub b8pdir: [i8; 4],
    /// Coded block pattern. -1 marks PCM, where every block is coded.
    pub cbp: i32,
    /// Per-4x4-block coded flags used by the loop filter. Luma occupies
    /// bits 0..16, chroma bits 16..24.
    pub cbp_blk: u32,
    /// Per-block coded flags consumed by the coded-block-flag contexts.
    pub cbp_bits: u32,
    /// Motion vector differences, `[list][block_y][block_x][component]`.
    pub mvd: [[[[i16; 2]; 4]; 4]; 2],
    /// Field decoding flag of this macroblock (pair-adaptive frames).
    pub mb_field: bool,
    /// Deblocking control picked up from the slice header.
    pub lf_disable_idc: u8,
    /// Alpha/C0 offset for the loop filter, in table index units.
    pub lf_alpha_c0_offset: i32,
    /// Beta offset for the loop filter, in table index units.
    pub lf_beta_offset: i32,
}

impl Default for Macroblock {
    fn default() -> Self {
        Macroblock {
            slice_nr: -1,
            slice_type: SliceType::I,
            qp: 0,
            delta_quant: 0,
            mode: MbMode::Skip,
            skipped: false,
            i16mode: 0,
            c_ipred_mode: 0,
            b8mode: [0; 4],
            b8pdir: [0; 4],
            cbp: 0,
            cbp_blk: 0,
            cbp_bits: 0,
            mvd: [[[[0; 2]; 4]; 4]; 2],
            mb_field: false,
            lf_disable_idc: 0,
            lf_alpha_c0_offset: 0,
            lf_beta_offset: 0,
        }
    }
}

impl Macroblock {
    /// Reset the syntax fields at the start of a macroblock. Geometry and
    /// neighbor state live in the picture, so only the per-MB decode
    /// products are cleared here.
    pub fn reset_for_decode(&mut self, slice_nr: i32, slice_type: SliceType, qp: i32) {
        self.slice_nr = slice_nr;
        self.slice_type = slice_type;
        self.qp = qp;
        self.delta_quant = 0;
        self.mode = MbMode::Skip;
        self.skipped = false;
        self.i16mode = 0;
        self.c_ipred_mode = 0;
        self.cbp = 0;
        self.cbp_blk = 0;
        self.cbp_bits = 0;
        self.mvd = [[[[0; 2]; 4]; 4]; 2];
    }

    /// True when the macroblock was decoded by the given slice and may be
    /// used for syntax prediction from it.
    pub fn in_slice(&self, slice_nr: i32) -> bool {
        self.slice_nr == slice_nr
    }

    pub fn is_intra(&self) -> bool {
        self.mode.is_intra()
    }

    /// True for a P/SP skip: mode 0 outside a B slice.
    pub fn is_p_skip(&self) -> bool {
        self.mode == MbMode::Skip
            && matches!(self.slice_type, SliceType::P | SliceType::Sp)
    }

    /// True for B direct: mode 0 inside a B slice.
    pub fn is_b_direct(&self) -> bool {
        self.mode == MbMode::Skip && self.slice_type == SliceType::B
    }
}

/// Coded block pattern attached to the intra 16x16 mode codes. The code
/// is split as `offset = 4 * cbp_index + prediction_mode`.
const I16_CBP: [i32; 6] = [0, 16, 32, 15, 31, 47];

/// Outcome of interpreting a raw mode code.
///
/// `allrefzero` is only meaningful for P/SP 8x8 modes, where one of the
/// two codes pins every reference index to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterpretedMode {
    pub allrefzero: bool,
    pub si_block: bool,
}

fn set_i16(mb: &mut Macroblock, offset: i32, i16mode: u8) {
    mb.mode = MbMode::Intra16x16;
    mb.b8mode = [0; 4];
    mb.b8pdir = [PDIR_INTRA; 4];
    mb.cbp = I16_CBP[(offset >> 2) as usize];
    mb.i16mode = i16mode;
}

fn set_pcm(mb: &mut Macroblock) {
    mb.mode = MbMode::Pcm;
    mb.b8mode = [0; 4];
    mb.b8pdir = [PDIR_INTRA; 4];
    mb.cbp = -1;
    mb.i16mode = 0;
}

fn set_i4(mb: &mut Macroblock) {
    mb.mode = MbMode::Intra4x4;
    mb.b8mode = [B8_INTRA; 4];
    mb.b8pdir = [PDIR_INTRA; 4];
}

/// Interpret a P/SP mode code.
pub fn interpret_mb_mode_p(mb: &mut Macroblock, raw: u32) -> Result<InterpretedMode> {
    let mut out = InterpretedMode::default();
    match raw {
        0..=3 => {
            mb.mode = match raw {
                0 => MbMode::Skip,
                1 => MbMode::Inter16x16,
                2 => MbMode::Inter16x8,
                _ => MbMode::Inter8x16,
            };
            mb.b8mode = [raw as u8; 4];
            mb.b8pdir = [PDIR_L0; 4];
        }
        4 | 5 => {
            mb.mode = MbMode::Inter8x8;
            out.allrefzero = raw == 5;
        }
        6 => set_i4(mb),
        31 => set_pcm(mb),
        7..=30 => set_i16(mb, raw as i32 - 7, ((raw - 7) & 0x03) as u8),
        _ => {
            return Err(DecodeError::InvalidMbType {
                mb_type: raw as i32,
                slice_type: "P",
            }
            .into())
        }
    }
    Ok(out)
}

/// Interpret an I mode code.
pub fn interpret_mb_mode_i(mb: &mut Macroblock, raw: u32) -> Result<InterpretedMode> {
    match raw {
        0 => set_i4(mb),
        25 => set_pcm(mb),
        1..=24 => set_i16(mb, raw as i32 - 1, ((raw - 1) & 0x03) as u8),
        _ => {
            return Err(DecodeError::InvalidMbType {
                mb_type: raw as i32,
                slice_type: "I",
            }
            .into())
        }
    }
    Ok(InterpretedMode::default())
}

/// Interpret an SI mode code. Code 0 is the switching intra block; the
/// rest shift the I codes up by one. The 16x16 coded block pattern keeps
/// the shifted offset while the prediction mode drops it, faithful to
/// deployed decoders.
pub fn interpret_mb_mode_si(mb: &mut Macroblock, raw: u32) -> Result<InterpretedMode> {
    let mut out = InterpretedMode::default();
    match raw {
        0 => {
            mb.mode = MbMode::SIntra4x4;
            mb.b8mode = [B8_INTRA; 4];
            mb.b8pdir = [PDIR_INTRA; 4];
            out.si_block = true;
        }
        1 => set_i4(mb),
        26 => set_pcm(mb),
        2..=25 => {
            set_i16(mb, raw as i32 - 1, ((raw - 2) & 0x03) as u8);
        }
        _ => {
            return Err(DecodeError::InvalidMbType {
                mb_type: raw as i32,
                slice_type: "SI",
            }
            .into())
        }
    }
    Ok(out)
}

/// Prediction directions for the B 16x16 codes.
const B_PDIR_16X16: [i8; 4] = [0, 0, 1, 2];
/// Prediction directions for the B 16x8 codes, `[code][partition]`.
const B_PDIR_16X8: [[i8; 2]; 22] = [
    [0, 0], [0, 0], [0, 0], [0, 0], [0, 0], [0, 0], [1, 1], [0, 0], [0, 1], [0, 0], [1, 0],
    [0, 0], [0, 2], [0, 0], [1, 2], [0, 0], [2, 0], [0, 0], [2, 1], [0, 0], [2, 2], [0, 0],
];
/// Prediction directions for the B 8x16 codes, `[code][partition]`.
const B_PDIR_8X16: [[i8; 2]; 22] = [
    [0, 0], [0, 0], [0, 0], [0, 0], [0, 0], [0, 0], [0, 0], [1, 1], [0, 0], [0, 1], [0, 0],
    [1, 0], [0, 0], [0, 2], [0, 0], [1, 2], [0, 0], [2, 0], [0, 0], [2, 1], [0, 0], [2, 2],
];

/// Interpret a B mode code.
pub fn interpret_mb_mode_b(mb: &mut Macroblock, raw: u32) -> Result<InterpretedMode> {
    match raw {
        0 => {
            mb.mode = MbMode::Skip;
            mb.b8mode = [B8_DIRECT; 4];
            mb.b8pdir = [PDIR_BI; 4];
        }
        23 => set_i4(mb),
        24..=47 => set_i16(mb, raw as i32 - 24, ((raw - 24) & 0x03) as u8),
        22 => {
            // sub-partition modes follow as separate codewords
            mb.mode = MbMode::Inter8x8;
        }
        1..=3 => {
            mb.mode = MbMode::Inter16x16;
            mb.b8mode = [1; 4];
            mb.b8pdir = [B_PDIR_16X16[raw as usize]; 4];
        }
        48 => set_pcm(mb),
        _ if raw % 2 == 0 => {
            if raw > 20 {
                return Err(DecodeError::InvalidMbType {
                    mb_type: raw as i32,
                    slice_type: "B",
                }
                .into());
            }
            mb.mode = MbMode::Inter16x8;
            for i in 0..4 {
                mb.b8mode[i] = 2;
                mb.b8pdir[i] = B_PDIR_16X8[raw as usize][i / 2];
            }
        }
        _ => {
            if raw > 21 {
                return Err(DecodeError::InvalidMbType {
                    mb_type: raw as i32,
                    slice_type: "B",
                }
                .into());
            }
            mb.mode = MbMode::Inter8x16;
            for i in 0..4 {
                mb.b8mode[i] = 3;
                mb.b8pdir[i] = B_PDIR_8X16[raw as usize][i % 2];
            }
        }
    }
    Ok(InterpretedMode::default())
}

/// Interpret a raw mode code for the given slice type.
pub fn interpret_mb_mode(
    mb: &mut Macroblock,
    slice_type: SliceType,
    raw: u32,
) -> Result<InterpretedMode> {
    match slice_type {
        SliceType::P | SliceType::Sp => interpret_mb_mode_p(mb, raw),
        SliceType::I => interpret_mb_mode_i(mb, raw),
        SliceType::B => interpret_mb_mode_b(mb, raw),
        SliceType::Si => interpret_mb_mode_si(mb, raw),
    }
}

/// Sub-partition modes for the P 8x8 codes.
const P_SUB_MODE: [u8; 5] = [B8_8X8, B8_8X4, B8_4X8, B8_4X4, B8_INTRA];
const P_SUB_PDIR: [i8; 5] = [0, 0, 0, 0, PDIR_INTRA];
/// Sub-partition modes for the B 8x8 codes.
const B_SUB_MODE: [u8; 14] = [
    B8_DIRECT, B8_8X8, B8_8X8, B8_8X8, B8_8X4, B8_4X8, B8_8X4, B8_4X8, B8_8X4, B8_4X8,
    B8_4X4, B8_4X4, B8_4X4, B8_INTRA,
];
const B_SUB_PDIR: [i8; 14] = [2, 0, 1, 2, 0, 0, 1, 1, 2, 2, 0, 1, 2, PDIR_INTRA];

/// Apply one transmitted sub-partition code to 8x8 block `i`.
pub fn set_b8_mode(
    mb: &mut Macroblock,
    slice_type: SliceType,
    value: u32,
    i: usize,
) -> Result<()> {
    if slice_type == SliceType::B {
        let value = value as usize;
        if value >= B_SUB_MODE.len() {
            return Err(DecodeError::InvalidSubMbType(value as i32).into());
        }
        mb.b8mode[i] = B_SUB_MODE[value];
        mb.b8pdir[i] = B_SUB_PDIR[value];
    } else {
        let value = value as usize;
        if value >= P_SUB_MODE.len() {
            return Err(DecodeError::InvalidSubMbType(value as i32).into());
        }
        mb.b8mode[i] = P_SUB_MODE[value];
        mb.b8pdir[i] = P_SUB_PDIR[value];
    }
    Ok(())
}
