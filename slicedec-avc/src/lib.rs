//! H.264/AVC macroblock-layer decoding for the slicedec decoder.
//!
//! This crate decodes the slice data layer of an H.264/AVC bitstream: everything
//! between the slice header and the end of the slice. The caller parses parameter
//! sets and slice headers, builds the reference lists, and hands over the payload;
//! this crate recovers macroblock modes, motion, residuals, and runs the in-loop
//! deblocking filter.
//!
//! # Features
//!
//! - **CABAC entropy decoding**: context-adaptive binary arithmetic decoding with
//!   slice-QP initialized context models, bypass and terminate modes, and the
//!   macroblock-layer binarizations
//! - **CAVLC entropy decoding**: Exp-Golomb coded macroblock syntax plus the
//!   context-adaptive coefficient token, level, and run tables
//! - **Mode decoding**: macroblock and sub-macroblock types, intra prediction
//!   mode recovery, per-macroblock QP deltas, and PCM passthrough
//! - **Motion derivation**: median motion vector prediction, P-Skip, and
//!   spatial/temporal B Direct motion from co-located reference data
//! - **Residual decoding**: coded block patterns, zig-zag and field scans,
//!   dequantization, and the Intra-16x16 DC transform
//! - **Deblocking**: boundary strength grading and the normal/strong edge
//!   filters over luma and chroma
//! - **Interlace support**: field pictures and macroblock-adaptive frame/field
//!   (MBAFF) pairs throughout the pipeline
//!
//! # Architecture
//!
//! Decoding runs slice-at-a-time into a shared [`Picture`]:
//!
//! - [`SlicePartition`] wraps the encoded payload of one slice
//! - [`SliceContext`] carries the entropy coder, the context models, and the
//!   running QP and skip state across macroblocks
//! - [`decode_slice`] visits macroblocks in decode order, writing modes, motion,
//!   and residuals into the picture's side tables
//! - [`deblock_picture`] filters the reconstructed samples once every slice of
//!   the picture has been decoded
//!
//! # Example
//!
//! ```rust,ignore
//! use slicedec_avc::{
//!     deblock_picture, decode_slice, Picture, PictureParams, PictureStructure,
//!     SliceContext, SliceParams, SlicePartition, SliceRefs,
//! };
//!
//! let params = PictureParams {
//!     width_in_mbs: 22,
//!     height_in_mbs: 18,
//!     mbaff: false,
//!     structure: PictureStructure::Frame,
//!     entropy_cabac: true,
//!     constrained_intra_pred: false,
//!     chroma_qp_index_offset: 0,
//!     direct_8x8_inference: true,
//! };
//! let mut pic = Picture::new(params);
//!
//! // One context per slice of the picture.
//! let refs = SliceRefs::new(&list0, &list1);
//! let mut ctx = SliceContext::new(&pic, SlicePartition::new(payload), slice_params, refs)?;
//! decode_slice(&mut pic, &mut ctx)?;
//!
//! // After the last slice, filter the picture in place.
//! deblock_picture(&mut pic);
//! ```

#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]

pub mod binarize;
pub mod cavlc;
pub mod context;
pub mod deblock;
pub mod engine;
pub mod macroblock;
pub mod mode;
pub mod motion;
pub mod neighbor;
pub mod picture;
pub mod residual;
pub mod slice;
pub mod transform;

// Re-export the shared error types
pub use slicedec_core::{BitstreamError, DecodeError, Error, Result};

// Re-export the entropy coding types
pub use context::ContextBank;
pub use engine::{ArithDecoder, ArithEncoder, BiContext};

// Re-export picture types
pub use picture::{
    CoeffBlock, ColocatedData, Mv, Picture, PictureParams, PictureStructure, RefPicture,
};

// Re-export macroblock types
pub use macroblock::{Macroblock, MbMode};

// Re-export slice types
pub use slice::{
    decode_slice, EntropyCoder, SliceContext, SliceParams, SlicePartition, SliceRefs, SliceType,
};

// Re-export the loop filter entry points
pub use deblock::{deblock_macroblock, deblock_picture};
