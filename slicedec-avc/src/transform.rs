//! Coefficient scan orders, dequantization tables and the DC transforms.
//!
//! Residual decoding places levels straight into dequantized positions,
//! so the tables here are consumed inline by `residual` and `cavlc`; only
//! the intra 16x16 luma DC plane needs a second pass over the assembled
//! block.

use crate::picture::CoeffBlock;

pub const MIN_QP: i32 = 0;
pub const MAX_QP: i32 = 51;

/// Zig-zag scan for frame-coded blocks, `(x, y)` per position.
pub const SINGLE_SCAN: [(usize, usize); 16] = [
    (0, 0), (1, 0), (0, 1), (0, 2), (1, 1), (2, 0), (3, 0), (2, 1),
    (1, 2), (0, 3), (1, 3), (2, 2), (3, 1), (3, 2), (2, 3), (3, 3),
];

/// Alternate scan for field-coded blocks.
pub const FIELD_SCAN: [(usize, usize); 16] = [
    (0, 0), (0, 1), (1, 0), (0, 2), (0, 3), (1, 1), (1, 2), (1, 3),
    (2, 0), (2, 1), (2, 2), (2, 3), (3, 0), (3, 1), (3, 2), (3, 3),
];

/// Pick the scan for the current coding structure.
pub fn scan_order(field_coded: bool) -> &'static [(usize, usize); 16] {
    if field_coded {
        &FIELD_SCAN
    } else {
        &SINGLE_SCAN
    }
}

/// Chroma QP as a function of the offset-adjusted luma QP.
pub const QP_SCALE_CR: [i32; 52] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19,
    20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 29, 30, 31, 32, 32, 33, 34,
    34, 35, 35, 36, 36, 37, 37, 37, 38, 38, 38, 39, 39, 39, 39,
];

/// Chroma QP for a luma QP and picture-level chroma offset.
pub fn chroma_qp(qp: i32, chroma_qp_index_offset: i32) -> i32 {
    QP_SCALE_CR[(qp + chroma_qp_index_offset).clamp(0, 51) as usize]
}

/// Dequantization scale per `qp % 6` and coefficient position.
pub const DEQUANT_COEF: [[[i32; 4]; 4]; 6] = [
    [[10, 13, 10, 13], [13, 16, 13, 16], [10, 13, 10, 13], [13, 16, 13, 16]],
    [[11, 14, 11, 14], [14, 18, 14, 18], [11, 14, 11, 14], [14, 18, 14, 18]],
    [[13, 16, 13, 16], [16, 20, 16, 20], [13, 16, 13, 16], [16, 20, 16, 20]],
    [[14, 18, 14, 18], [18, 23, 18, 23], [14, 18, 14, 18], [18, 23, 18, 23]],
    [[16, 20, 16, 20], [20, 25, 20, 25], [16, 20, 16, 20], [20, 25, 20, 25]],
    [[18, 23, 18, 23], [23, 29, 23, 29], [18, 23, 18, 23], [23, 29, 23, 29]],
];

/// QP advance with wraparound, applied after a decoded QP delta.
pub fn update_qp(qp: i32, delta: i32) -> i32 {
    let span = MAX_QP - MIN_QP + 1;
    (qp - MIN_QP + delta + span) % span + MIN_QP
}

/// Inverse 4x4 hadamard over the luma DC plane of an intra 16x16
/// macroblock, with dequantization folded into the vertical pass.
pub fn intra16x16_dc_transform(cof: &mut CoeffBlock, qp: i32) {
    let qp_per = (qp - MIN_QP) / 6;
    let qp_rem = ((qp - MIN_QP) % 6) as usize;

    let mut m5 = [0i32; 4];
    let mut m6 = [0i32; 4];

    for j in 0..4 {
        for i in 0..4 {
            m5[i] = cof[i][j][0][0];
        }
        m6[0] = m5[0] + m5[2];
        m6[1] = m5[0] - m5[2];
        m6[2] = m5[1] - m5[3];
        m6[3] = m5[1] + m5[3];
        for i in 0..2 {
            let i1 = 3 - i;
            cof[i][j][0][0] = m6[i] + m6[i1];
            cof[i1][j][0][0] = m6[i] - m6[i1];
        }
    }

    for i in 0..4 {
        for j in 0..4 {
            m5[j] = cof[i][j][0][0];
        }
        m6[0] = m5[0] + m5[2];
        m6[1] = m5[0] - m5[2];
        m6[2] = m5[1] - m5[3];
        m6[3] = m5[1] + m5[3];
        for j in 0..2 {
            let j1 = 3 - j;
            cof[i][j][0][0] = ((((m6[j] + m6[j1]) * DEQUANT_COEF[qp_rem][0][0]) << qp_per) + 2) >> 2;
            cof[i][j1][0][0] = ((((m6[j] - m6[j1]) * DEQUANT_COEF[qp_rem][0][0]) << qp_per) + 2) >> 2;
        }
    }
}
