//! Compression codecs shared by every container format.
//!
//! # Kinds
//! A compressed pixel blob is tagged with a [`CompressionKind`].  Block
//! compressors (gzip, zlib, bzip2) are byte-in/byte-out and sit behind the
//! [`Codec`] trait.  Byte-offset compression is a pixel codec: it needs the
//! element type to re-materialise values, so it is dispatched separately by
//! [`CompressionBlock::decompress`].
//!
//! # Naming
//! Header values are matched loosely, the way detector software writes
//! them: anything starting with `GZ` is gzip, `Z` is zlib, `BZ` is bzip2,
//! anything mentioning `BYTE_OFFSET` (or the older `VALUE_OFFSET`) is
//! byte-offset, and `NONE`/`NO...` is uncompressed.

pub mod byte_offset;

use std::io::{self, Read, Write};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use thiserror::Error;

use crate::pixel::{DataType, PixelData};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── CompressionKind ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionKind {
    None,
    Gzip,
    Bzip2,
    Zlib,
    ByteOffset,
}

impl CompressionKind {
    /// Name written to headers.
    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::None       => "None",
            CompressionKind::Gzip       => "gzip",
            CompressionKind::Bzip2      => "bz2",
            CompressionKind::Zlib       => "zlib",
            CompressionKind::ByteOffset => "BYTE_OFFSET",
        }
    }

    /// Parse a header value.  Returns `None` for names we do not know; the
    /// caller decides whether that is a passthrough or an error.
    pub fn from_name(s: &str) -> Option<Self> {
        let upper = s.trim().to_ascii_uppercase();
        if upper.is_empty() || upper == "NONE" || upper.starts_with("NO") {
            Some(CompressionKind::None)
        } else if upper.contains("BYTE_OFFSET") || upper.contains("VALUE_OFFSET") {
            Some(CompressionKind::ByteOffset)
        } else if upper.starts_with("GZ") {
            Some(CompressionKind::Gzip)
        } else if upper.starts_with("BZ") {
            Some(CompressionKind::Bzip2)
        } else if upper.starts_with('Z') {
            Some(CompressionKind::Zlib)
        } else {
            None
        }
    }

    /// Byte-in/byte-out compressors; false for pixel codecs that need
    /// integer element values.
    pub fn is_block_codec(self) -> bool {
        !matches!(self, CompressionKind::ByteOffset)
    }
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn kind(&self) -> CompressionKind;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::None }
    fn compress(&self, data: &[u8])   -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct GzipCodec;
impl Codec for GzipCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::Gzip }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut w = GzEncoder::new(Vec::new(), Compression::default());
        w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        w.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    /// Falls back to a raw zlib stream when the gzip wrapper is not valid;
    /// some writers label zlib payloads as gzip.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        match GzDecoder::new(data).read_to_end(&mut out) {
            Ok(_) => Ok(out),
            Err(gz_err) => {
                tracing::debug!("gzip decode failed ({gz_err}), retrying as zlib");
                ZlibCodec.decompress(data)
                    .map_err(|_| CodecError::Decompression(gz_err.to_string()))
            }
        }
    }
}

pub struct ZlibCodec;
impl Codec for ZlibCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::Zlib }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut w = ZlibEncoder::new(Vec::new(), Compression::default());
        w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        w.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

pub struct Bzip2Codec;
impl Codec for Bzip2Codec {
    fn kind(&self) -> CompressionKind { CompressionKind::Bzip2 }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut w = BzEncoder::new(Vec::new(), bzip2::Compression::default());
        w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        w.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        BzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a block codec.  Byte-offset is not a block codec and is rejected.
pub fn get_codec(kind: CompressionKind) -> Result<Box<dyn Codec>, CodecError> {
    match kind {
        CompressionKind::None       => Ok(Box::new(NoneCodec)),
        CompressionKind::Gzip       => Ok(Box::new(GzipCodec)),
        CompressionKind::Zlib       => Ok(Box::new(ZlibCodec)),
        CompressionKind::Bzip2      => Ok(Box::new(Bzip2Codec)),
        CompressionKind::ByteOffset => Err(CodecError::Decompression(
            "byte-offset is a pixel codec, not a block codec".to_string(),
        )),
    }
}

// ── CompressionBlock ─────────────────────────────────────────────────────────

/// Bytes recovered from a [`CompressionBlock`].
#[derive(Debug)]
pub struct DecodedBlock {
    pub bytes: Vec<u8>,
    /// True when `bytes` are already host-ordered elements (byte-offset
    /// output); false when they still carry the on-disk byte order.
    pub host_order: bool,
}

/// A compressed pixel blob as read from disk, consumed by one frame decode.
#[derive(Debug, Clone)]
pub struct CompressionBlock {
    pub kind:              CompressionKind,
    pub payload:           Vec<u8>,
    /// Expected decompressed size in bytes (pixel count x element width).
    pub decompressed_size: usize,
}

impl CompressionBlock {
    pub fn new(kind: CompressionKind, payload: Vec<u8>, decompressed_size: usize) -> Self {
        Self { kind, payload, decompressed_size }
    }

    /// Decompress into element bytes of `dtype`.
    ///
    /// The output is not resized to `decompressed_size`; the caller pads or
    /// truncates and reports the mismatch.
    pub fn decompress(self, dtype: DataType) -> Result<DecodedBlock, CodecError> {
        match self.kind {
            CompressionKind::None => Ok(DecodedBlock { bytes: self.payload, host_order: false }),
            CompressionKind::ByteOffset => {
                // Every value takes at least one byte of payload.
                let capacity = (self.decompressed_size / dtype.width()).min(self.payload.len());
                let values = byte_offset::decode_with_capacity(&self.payload, capacity)?;
                let pixels = PixelData::from_i64(dtype, &values);
                Ok(DecodedBlock { bytes: pixels.to_bytes(crate::pixel::ByteOrder::host()), host_order: true })
            }
            kind => {
                let bytes = get_codec(kind)?.decompress(&self.payload)?;
                Ok(DecodedBlock { bytes, host_order: false })
            }
        }
    }
}

/// Compress element bytes for writing.  For byte-offset, `pixels` supplies
/// the integer values.
pub fn compress_pixels(kind: CompressionKind, pixels: &PixelData, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    match kind {
        CompressionKind::ByteOffset => {
            if pixels.dtype().is_float() {
                return Err(CodecError::Compression(
                    "byte-offset compression needs integer pixels".to_string(),
                ));
            }
            Ok(byte_offset::encode_i64(&pixels.to_i64_vec()))
        }
        kind => get_codec(kind)?.compress(raw),
    }
}
