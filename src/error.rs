//! Error taxonomy shared by every container codec.
//!
//! Recoverable conditions (size mismatches, unknown compression names,
//! dropped header lines) are reported through `tracing` and never surface
//! here; a variant of [`ImageError`] is always fatal for the call that
//! returned it, and only for that call.

use std::io;
use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum ImageError {
    /// Header could not be parsed or its terminator was not found within the
    /// configured size guard.
    #[error("Malformed header at byte {offset}: {reason}")]
    MalformedHeader { offset: u64, reason: String },

    /// Neither the magic bytes nor the filename extension identify a format.
    #[error("Unidentifiable format: {0}")]
    UnidentifiableFormat(String),

    /// A format was identified but no codec is registered under that name.
    #[error("No codec registered for format '{0}'")]
    UnregisteredFormat(String),

    /// Declared and computed blob sizes disagree.  Only built for
    /// diagnostics: readers log it and recover by padding or truncating.
    #[error("Size mismatch: declared {declared} bytes, expected {expected} bytes")]
    SizeMismatch { declared: u64, expected: u64 },

    #[error("Index {index} out of range (0..{len})")]
    OutOfRange { index: usize, len: usize },

    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    #[error("Unsupported element type: {0}")]
    UnsupportedElementType(String),

    /// The codec does not implement the requested operation (e.g. `write`).
    #[error("Operation not supported by codec '{codec}': {operation}")]
    Unsupported { codec: String, operation: &'static str },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ImageError {
    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        ImageError::MalformedHeader { offset, reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, ImageError>;
