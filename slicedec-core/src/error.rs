//! Error types for the slicedec library.
//!
//! This module provides the error hierarchy shared by the entropy decoding,
//! macroblock reconstruction and filtering stages.

use thiserror::Error;

/// Main error type for the slicedec library.
#[derive(Error, Debug)]
pub enum Error {
    /// Bitstream access errors (bit-level reads, Exp-Golomb).
    #[error("Bitstream error: {0}")]
    Bitstream(#[from] BitstreamError),

    /// Decoding errors (syntax interpretation, state consistency).
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unsupported feature or profile.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// End of slice data reached.
    #[error("End of stream")]
    EndOfStream,
}

/// Bitstream access errors.
///
/// These indicate the compressed buffer ran out or carried a value no
/// conforming stream can produce at the bit level. A slice that raises one
/// of these cannot be decoded further.
#[derive(Error, Debug)]
pub enum BitstreamError {
    /// Unexpected end of bitstream.
    #[error("Unexpected end of bitstream at bit {position}")]
    UnexpectedEnd { position: usize },

    /// Exp-Golomb decoding error.
    #[error("Exp-Golomb decoding error: value too large")]
    ExpGolombOverflow,

    /// Invalid syntax element value.
    #[error("Invalid syntax element: {element} = {value}")]
    InvalidSyntax { element: &'static str, value: i64 },

    /// Bit alignment error.
    #[error("Bit alignment error")]
    AlignmentError,

    /// Generic bitstream error message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for BitstreamError {
    fn from(s: String) -> Self {
        BitstreamError::Other(s)
    }
}

impl From<&str> for BitstreamError {
    fn from(s: &str) -> Self {
        BitstreamError::Other(s.to_string())
    }
}

/// Decoding errors.
///
/// Raised when decoded values are internally inconsistent: the symbols were
/// read fine but cannot describe a valid macroblock. Most of these abort
/// the picture; the skip-run variants can be resynchronized at the next
/// macroblock boundary.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Macroblock type outside the range defined for the slice type.
    #[error("Invalid macroblock type {mb_type} for {slice_type} slice")]
    InvalidMbType {
        mb_type: i32,
        slice_type: &'static str,
    },

    /// Sub-macroblock type outside the defined range.
    #[error("Invalid sub-macroblock type {0}")]
    InvalidSubMbType(i32),

    /// Chroma intra prediction mode out of range.
    #[error("Invalid chroma intra prediction mode {0}")]
    InvalidChromaPredMode(u8),

    /// Reference index exceeds the active reference list.
    #[error("Reference index {ref_idx} exceeds list {list} size {list_size}")]
    RefIndexOutOfRange {
        list: u8,
        ref_idx: i8,
        list_size: usize,
    },

    /// Co-located reference picture has no mapping in the current lists.
    #[error("Co-located reference picture {ref_id} not found in active list")]
    ColocatedRefUnmapped { ref_id: i64 },

    /// More coefficients decoded than the block can hold.
    #[error("Coefficient position {position} exceeds block capacity {capacity}")]
    CoefficientOverrun { position: usize, capacity: usize },

    /// Macroblock address outside the picture.
    #[error("Macroblock address {addr} outside picture of {count} macroblocks")]
    MbAddrOutOfRange { addr: usize, count: usize },

    /// CAVLC skip run extends past the end of the picture.
    #[error("Skip run of {run} extends past macroblock {addr}")]
    SkipRunOverrun { addr: usize, run: u32 },

    /// Generic decode error message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for DecodeError {
    fn from(s: String) -> Self {
        DecodeError::Other(s)
    }
}

impl From<&str> for DecodeError {
    fn from(s: &str) -> Self {
        DecodeError::Other(s.to_string())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Check if this is an end-of-stream error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(
            self,
            Error::EndOfStream | Error::Bitstream(BitstreamError::UnexpectedEnd { .. })
        )
    }

    /// Check if this error is recoverable (decoding can resume at the next
    /// macroblock boundary).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Decode(DecodeError::SkipRunOverrun { .. }))
    }
}
