//! # slicedec core
//!
//! Shared plumbing for the slicedec decoder components:
//! - Error handling types
//! - Bit-level reading/writing over slice payloads
//! - Emulation prevention stripping for raw NAL payloads

pub mod bitstream;
pub mod error;

pub use bitstream::{BitReader, BitWriter};
pub use error::{BitstreamError, DecodeError, Error, Result};
