//! Bit-serial residual syntax.
//!
//! Levels in bit-serial slices ride variable-length codes whose tables
//! switch on context: the coefficient token table follows a nonzero-count
//! prediction from the left and upper blocks, level codes stretch as the
//! decoded magnitudes grow, and total-zeros plus run codes place the
//! levels on the scan. All tables are fixed codebooks; only the table
//! *selection* adapts, so this module needs no per-slice state beyond the
//! nonzero counts kept in the picture.

use slicedec_core::{BitReader, BitstreamError, Result};

use crate::neighbor::{self, NeighborScope};
use crate::picture::Picture;

/// Which residual block a coefficient run belongs to.
///
/// The class picks the token tables, the coefficient capacity and whether
/// the decoded count feeds later nonzero predictions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoeffClass {
    /// Ordinary 4x4 luma transform block.
    Luma,
    /// The 16 luma DC coefficients of a whole-macroblock intra prediction.
    LumaIntra16Dc,
    /// 4x4 luma AC block under a whole-macroblock intra prediction.
    LumaIntra16Ac,
    /// 2x2 chroma DC block.
    ChromaDc,
    /// 4x4 chroma AC block.
    ChromaAc,
}

impl CoeffClass {
    fn max_coeff(self) -> usize {
        match self {
            CoeffClass::Luma | CoeffClass::LumaIntra16Dc => 16,
            CoeffClass::LumaIntra16Ac | CoeffClass::ChromaAc => 15,
            CoeffClass::ChromaDc => 4,
        }
    }
}

/// Coefficient token code lengths, by neighborhood bracket, then trailing
/// ones, then total coefficients. Length zero marks an unused slot.
const COEFF_TOKEN_LEN: [[[u8; 17]; 4]; 3] = [
    [
        [1, 6, 8, 9, 10, 11, 13, 13, 13, 14, 14, 15, 15, 16, 16, 16, 16],
        [0, 2, 6, 8, 9, 10, 11, 13, 13, 14, 14, 15, 15, 15, 16, 16, 16],
        [0, 0, 3, 7, 8, 9, 10, 11, 13, 13, 14, 14, 15, 15, 16, 16, 16],
        [0, 0, 0, 5, 6, 7, 8, 9, 10, 11, 13, 14, 14, 15, 15, 16, 16],
    ],
    [
        [2, 6, 6, 7, 8, 8, 9, 11, 11, 12, 12, 12, 13, 13, 13, 14, 14],
        [0, 2, 5, 6, 6, 7, 8, 9, 11, 11, 12, 12, 13, 13, 14, 14, 14],
        [0, 0, 3, 6, 6, 7, 8, 9, 11, 11, 12, 12, 13, 13, 13, 14, 14],
        [0, 0, 0, 4, 4, 5, 6, 6, 7, 9, 11, 11, 12, 13, 13, 13, 14],
    ],
    [
        [4, 6, 6, 6, 7, 7, 7, 7, 8, 8, 9, 9, 9, 10, 10, 10, 10],
        [0, 4, 5, 5, 5, 5, 6, 6, 7, 8, 8, 9, 9, 9, 10, 10, 10],
        [0, 0, 4, 5, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 10],
        [0, 0, 0, 4, 4, 4, 4, 4, 5, 6, 7, 8, 8, 9, 10, 10, 10],
    ],
];

const COEFF_TOKEN_CODE: [[[u8; 17]; 4]; 3] = [
    [
        [1, 5, 7, 7, 7, 7, 15, 11, 8, 15, 11, 15, 11, 15, 11, 7, 4],
        [0, 1, 4, 6, 6, 6, 6, 14, 10, 14, 10, 14, 10, 1, 14, 10, 6],
        [0, 0, 1, 5, 5, 5, 5, 5, 13, 9, 13, 9, 13, 9, 13, 9, 5],
        [0, 0, 0, 3, 3, 4, 4, 4, 4, 4, 12, 12, 8, 12, 8, 12, 8],
    ],
    [
        [3, 11, 7, 7, 7, 4, 7, 15, 11, 15, 11, 8, 15, 11, 7, 9, 7],
        [0, 2, 7, 10, 6, 6, 6, 6, 14, 10, 14, 10, 14, 10, 11, 8, 6],
        [0, 0, 3, 9, 5, 5, 5, 5, 13, 9, 13, 9, 13, 9, 6, 10, 5],
        [0, 0, 0, 5, 4, 6, 8, 4, 4, 4, 12, 8, 12, 12, 8, 1, 4],
    ],
    [
        [15, 15, 11, 8, 15, 11, 9, 8, 15, 11, 15, 11, 8, 13, 9, 5, 1],
        [0, 14, 15, 12, 10, 8, 14, 10, 14, 14, 10, 14, 10, 7, 12, 8, 4],
        [0, 0, 13, 14, 11, 9, 13, 9, 13, 10, 13, 9, 13, 9, 11, 7, 3],
        [0, 0, 0, 12, 11, 10, 9, 8, 13, 12, 12, 12, 8, 12, 10, 6, 2],
    ],
];

/// Chroma DC blocks hold four coefficients and use their own short token
/// codebook, padded out to the shared row width.
const CHROMA_DC_TOKEN_LEN: [[u8; 17]; 4] = [
    [2, 6, 6, 6, 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 6, 7, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 3, 7, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 6, 7, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];

const CHROMA_DC_TOKEN_CODE: [[u8; 17]; 4] = [
    [1, 7, 4, 3, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 6, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 1, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];

/// Total-zeros code lengths, one row per total coefficient count.
const TOTAL_ZEROS_LEN: [[u8; 16]; 15] = [
    [1, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 9],
    [3, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 6, 6, 6, 6, 0],
    [4, 3, 3, 3, 4, 4, 3, 3, 4, 5, 5, 6, 5, 6, 0, 0],
    [5, 3, 4, 4, 3, 3, 3, 4, 3, 4, 5, 5, 5, 0, 0, 0],
    [4, 4, 4, 3, 3, 3, 3, 3, 4, 5, 4, 5, 0, 0, 0, 0],
    [6, 5, 3, 3, 3, 3, 3, 3, 4, 3, 6, 0, 0, 0, 0, 0],
    [6, 5, 3, 3, 3, 2, 3, 4, 3, 6, 0, 0, 0, 0, 0, 0],
    [6, 4, 5, 3, 2, 2, 3, 3, 6, 0, 0, 0, 0, 0, 0, 0],
    [6, 6, 4, 2, 2, 3, 2, 5, 0, 0, 0, 0, 0, 0, 0, 0],
    [5, 5, 3, 2, 2, 2, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 4, 3, 3, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 4, 2, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 3, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];

const TOTAL_ZEROS_CODE: [[u8; 16]; 15] = [
    [1, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 1],
    [7, 6, 5, 4, 3, 5, 4, 3, 2, 3, 2, 3, 2, 1, 0, 0],
    [5, 7, 6, 5, 4, 3, 4, 3, 2, 3, 2, 1, 1, 0, 0, 0],
    [3, 7, 5, 4, 6, 5, 4, 3, 3, 2, 2, 1, 0, 0, 0, 0],
    [5, 4, 3, 7, 6, 5, 4, 3, 2, 1, 1, 0, 0, 0, 0, 0],
    [1, 1, 7, 6, 5, 4, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0],
    [1, 1, 5, 4, 3, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 1, 3, 3, 2, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 0, 1, 3, 2, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 0, 1, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 2, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];

const CHROMA_DC_ZEROS_LEN: [[u8; 4]; 3] = [[1, 2, 3, 3], [1, 2, 2, 0], [1, 1, 0, 0]];

const CHROMA_DC_ZEROS_CODE: [[u8; 4]; 3] = [[1, 1, 1, 0], [1, 1, 0, 0], [1, 0, 0, 0]];

/// Run-before codes, one row per remaining-zeros count (capped at seven).
const RUN_BEFORE_LEN: [[u8; 16]; 7] = [
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 2, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 3, 3, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 3, 3, 3, 3, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 3, 3, 3, 3, 3, 3, 4, 5, 6, 7, 8, 9, 10, 11, 0],
];

const RUN_BEFORE_CODE: [[u8; 16]; 7] = [
    [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 3, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 0, 1, 3, 2, 5, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [7, 6, 5, 4, 3, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0],
];

/// Magnitude thresholds that lengthen the level suffix one step.
const INC_VLC: [u32; 7] = [0, 3, 6, 12, 24, 48, 32768];

/// Coded block pattern by code number, intra column first.
const NCBP: [[u8; 2]; 48] = [
    [47, 0],
    [31, 16],
    [15, 1],
    [0, 2],
    [23, 4],
    [27, 8],
    [29, 32],
    [30, 3],
    [7, 5],
    [11, 10],
    [13, 12],
    [14, 15],
    [39, 47],
    [43, 7],
    [45, 11],
    [46, 13],
    [16, 14],
    [3, 6],
    [5, 9],
    [10, 31],
    [12, 35],
    [19, 37],
    [21, 42],
    [26, 44],
    [28, 33],
    [35, 34],
    [37, 36],
    [42, 40],
    [44, 39],
    [1, 43],
    [2, 45],
    [4, 46],
    [8, 17],
    [17, 18],
    [18, 20],
    [20, 24],
    [24, 19],
    [6, 21],
    [9, 26],
    [22, 28],
    [25, 23],
    [32, 27],
    [33, 29],
    [34, 30],
    [36, 22],
    [40, 25],
    [38, 38],
    [41, 41],
];

/// Reads the coded block pattern of a macroblock without a whole-block
/// intra prediction. Intra and inter prediction order the patterns
/// differently so the likelier ones get the short codes.
pub fn read_cbp(reader: &mut BitReader<'_>, intra: bool) -> Result<i32> {
    let code = reader.read_ue()? as usize;
    if code >= NCBP.len() {
        return Err(BitstreamError::InvalidSyntax {
            element: "coded_block_pattern",
            value: code as i64,
        }
        .into());
    }
    Ok(i32::from(NCBP[code][usize::from(!intra)]))
}

/// Decodes one block of levels and zero runs.
///
/// `i` and `j` address the block in the macroblock's 4x4 grid (chroma DC
/// passes zeros). Levels come back highest scan position first, each
/// paired with the zero run preceding it, which is the order the scatter
/// into the coefficient array consumes them. The decoded total lands in
/// the picture-wide nonzero table that later blocks predict from; chroma
/// DC blocks take part in neither side of that prediction.
pub fn decode_coeffs(
    reader: &mut BitReader<'_>,
    pic: &mut Picture,
    mb_addr: usize,
    class: CoeffClass,
    i: usize,
    j: usize,
) -> Result<([i32; 16], [usize; 16], usize)> {
    let max_coeff = class.max_coeff();
    let mut levels = [0i32; 16];
    let mut runs = [0usize; 16];

    let (total, trailing) = match class {
        CoeffClass::ChromaDc => read_token(reader, &CHROMA_DC_TOKEN_LEN, &CHROMA_DC_TOKEN_CODE)?,
        _ => {
            let nnz = if class == CoeffClass::ChromaAc {
                predict_nnz_chroma(pic, mb_addr, i, j)
            } else {
                predict_nnz(pic, mb_addr, i, j)
            };
            let pair = if nnz < 8 {
                let bracket = match nnz {
                    0 | 1 => 0,
                    2 | 3 => 1,
                    _ => 2,
                };
                read_token(reader, &COEFF_TOKEN_LEN[bracket], &COEFF_TOKEN_CODE[bracket])?
            } else {
                // dense neighborhoods switch to a fixed six-bit code
                let code = reader.read_bits(6)? as usize;
                match (code >> 2, code & 3) {
                    (0, 3) => (0, 0),
                    (tc, t1) => (tc + 1, t1),
                }
            };
            pic.nz_coeff[mb_addr][i][j] = pair.0 as u8;
            pair
        }
    };
    if total > max_coeff {
        return Err(BitstreamError::InvalidSyntax {
            element: "coeff_token",
            value: total as i64,
        }
        .into());
    }
    if total == 0 {
        return Ok((levels, runs, 0));
    }

    // trailing ones carry only a sign apiece, highest position first
    if trailing > 0 {
        let signs = reader.read_bits(trailing as u8)?;
        let mut bit = trailing;
        for k in (total.saturating_sub(trailing)..total).rev() {
            bit -= 1;
            levels[k] = if signs >> bit & 1 != 0 { -1 } else { 1 };
        }
    }

    // remaining levels, suffix length ratcheting up with the magnitudes
    let regular = total.saturating_sub(trailing);
    let mut vlc = usize::from(total > 10 && trailing < 3);
    let mut bump_first = !(total > 3 && trailing == 3);
    for k in (0..regular).rev() {
        let mut level = if vlc == 0 {
            read_level_vlc0(reader)?
        } else {
            read_level_vlcn(reader, vlc as u32)?
        };
        if bump_first {
            // magnitudes below two are spoken for by the trailing ones
            level += level.signum();
            bump_first = false;
        }
        levels[k] = level;
        if level.unsigned_abs() > INC_VLC[vlc] {
            vlc += 1;
        }
        if k + 1 == regular && level.unsigned_abs() > 3 {
            vlc = 2;
        }
    }

    let mut zerosleft = if total < max_coeff {
        let row = total - 1;
        if class == CoeffClass::ChromaDc {
            read_vlc(
                reader,
                &CHROMA_DC_ZEROS_LEN[row],
                &CHROMA_DC_ZEROS_CODE[row],
                "total_zeros",
            )?
        } else {
            read_vlc(reader, &TOTAL_ZEROS_LEN[row], &TOTAL_ZEROS_CODE[row], "total_zeros")?
        }
    } else {
        0
    };

    let mut idx = total - 1;
    if zerosleft > 0 && idx > 0 {
        loop {
            let row = zerosleft.min(7) - 1;
            let run = read_vlc(reader, &RUN_BEFORE_LEN[row], &RUN_BEFORE_CODE[row], "run_before")?;
            if run > zerosleft {
                return Err(BitstreamError::InvalidSyntax {
                    element: "run_before",
                    value: run as i64,
                }
                .into());
            }
            runs[idx] = run;
            zerosleft -= run;
            idx -= 1;
            if zerosleft == 0 || idx == 0 {
                break;
            }
        }
    }
    runs[idx] = zerosleft;

    Ok((levels, runs, total))
}

/// Nonzero-count prediction for a luma block: mean of the left and upper
/// block counts, rounded up, or whichever one is in reach.
fn predict_nnz(pic: &Picture, mb_addr: usize, i: usize, j: usize) -> usize {
    let mut pred = 0usize;
    let mut cnt = 0usize;
    let left = neighbor::luma_4x4_neighbor(pic, mb_addr, i as i32, j as i32, -1, 0, NeighborScope::SameSlice);
    if left.available {
        pred += usize::from(pic.nz_coeff[left.mb_addr][left.x][left.y]);
        cnt += 1;
    }
    let up = neighbor::luma_4x4_neighbor(pic, mb_addr, i as i32, j as i32, 0, -1, NeighborScope::SameSlice);
    if up.available {
        pred += usize::from(pic.nz_coeff[up.mb_addr][up.x][up.y]);
        cnt += 1;
    }
    if cnt == 2 {
        pred = (pred + 1) >> 1;
    }
    pred
}

/// Chroma AC variant: the neighbor walk runs on the chroma grid and the
/// count table keeps both chroma planes side by side in columns 4 and 5.
fn predict_nnz_chroma(pic: &Picture, mb_addr: usize, i: usize, j: usize) -> usize {
    let mut pred = 0usize;
    let mut cnt = 0usize;
    let bx = (i % 2) as i32;
    let by = (j as i32) - 4;
    let plane = 2 * (i / 2);
    let left = neighbor::chroma_4x4_neighbor(pic, mb_addr, bx, by, -1, 0, NeighborScope::SameSlice);
    if left.available {
        pred += usize::from(pic.nz_coeff[left.mb_addr][plane + left.x][4 + left.y]);
        cnt += 1;
    }
    let up = neighbor::chroma_4x4_neighbor(pic, mb_addr, bx, by, 0, -1, NeighborScope::SameSlice);
    if up.available {
        pred += usize::from(pic.nz_coeff[up.mb_addr][plane + up.x][4 + up.y]);
        cnt += 1;
    }
    if cnt == 2 {
        pred = (pred + 1) >> 1;
    }
    pred
}

/// Matches one token from a length/value table pair laid out by trailing
/// ones row. Returns `(total_coeff, trailing_ones)`.
fn read_token(
    reader: &mut BitReader<'_>,
    len: &[[u8; 17]; 4],
    code: &[[u8; 17]; 4],
) -> Result<(usize, usize)> {
    let mut acc = 0u32;
    for bits in 1..=16u8 {
        acc = acc << 1 | u32::from(reader.read_bit()?);
        for t1 in 0..4 {
            for (tc, (&l, &c)) in len[t1].iter().zip(&code[t1]).enumerate() {
                if l == bits && u32::from(c) == acc {
                    return Ok((tc, t1));
                }
            }
        }
    }
    Err(BitstreamError::InvalidSyntax {
        element: "coeff_token",
        value: i64::from(acc),
    }
    .into())
}

/// Matches one code from a single table row.
fn read_vlc(
    reader: &mut BitReader<'_>,
    len: &[u8],
    code: &[u8],
    element: &'static str,
) -> Result<usize> {
    let mut acc = 0u32;
    for bits in 1..=16u8 {
        acc = acc << 1 | u32::from(reader.read_bit()?);
        for (value, (&l, &c)) in len.iter().zip(code).enumerate() {
            if l == bits && u32::from(c) == acc {
                return Ok(value);
            }
        }
    }
    Err(BitstreamError::InvalidSyntax { element, value: i64::from(acc) }.into())
}

/// First-level code: magnitude and sign fold into one unary prefix, with
/// four and twelve bit escapes past magnitude seven.
fn read_level_vlc0(reader: &mut BitReader<'_>) -> Result<i32> {
    let mut len = 1u32;
    while !reader.read_bit()? {
        len += 1;
    }
    Ok(if len < 15 {
        let magnitude = ((len - 1) >> 1) as i32 + 1;
        if (len - 1) & 1 != 0 {
            -magnitude
        } else {
            magnitude
        }
    } else if len == 15 {
        let suffix = reader.read_bits(4)?;
        let magnitude = ((suffix >> 1) & 0x7) as i32 + 8;
        if suffix & 1 != 0 {
            -magnitude
        } else {
            magnitude
        }
    } else {
        let suffix = reader.read_bits(12)?;
        let magnitude = ((suffix >> 1) & 0x7ff) as i32 + 16;
        if suffix & 1 != 0 {
            -magnitude
        } else {
            magnitude
        }
    })
}

/// Later levels: unary prefix scaled by the suffix length, a fixed
/// eleven-bit escape past prefix fifteen, then a sign bit.
fn read_level_vlcn(reader: &mut BitReader<'_>, vlc: u32) -> Result<i32> {
    let shift = vlc - 1;
    let mut zeros = 0u32;
    while !reader.read_bit()? {
        zeros += 1;
    }
    let magnitude = if zeros < 15 {
        let mut m = (zeros << shift) + 1;
        if shift > 0 {
            m += reader.read_bits(shift as u8)?;
        }
        m as i32
    } else {
        ((15 << shift) + 1 + reader.read_bits(11)?) as i32
    };
    Ok(if reader.read_bit()? { -magnitude } else { magnitude })
}
