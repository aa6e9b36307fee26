//! Reading and decoding EDF pixel blobs.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

use super::header::FrameLayout;
use crate::codec::{CompressionBlock, CompressionKind};
use crate::error::{ImageError, Result};
use crate::pixel::{ByteOrder, PixelData};

/// Blob bytes as read; `short` means the store ended before `read_len`.
#[derive(Debug)]
pub struct RawBlob {
    pub bytes: Vec<u8>,
    pub short: bool,
}

impl RawBlob {
    pub fn new(bytes: Vec<u8>, wanted: u64) -> Self {
        let short = (bytes.len() as u64) < wanted;
        Self { bytes, short }
    }
}

/// Seek to `offset` and read up to `len` bytes.
pub fn read_at<R: Read + Seek + ?Sized>(reader: &mut R, offset: u64, len: u64) -> io::Result<RawBlob> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut bytes = Vec::with_capacity(len.min(1 << 30) as usize);
    reader.take(len).read_to_end(&mut bytes)?;
    Ok(RawBlob::new(bytes, len))
}

/// Read a blob from an external file.  When `path` does not exist,
/// `path.gz` is tried and decompressed before slicing.
pub fn read_external(path: &Path, offset: u64, len: u64) -> Result<RawBlob> {
    if path.exists() {
        let mut file = BufReader::new(File::open(path)?);
        return Ok(read_at(&mut file, offset, len)?);
    }
    let mut gz = path.as_os_str().to_owned();
    gz.push(".gz");
    let gz = PathBuf::from(gz);
    if !gz.exists() {
        return Err(ImageError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("external blob {} not found", path.display()),
        )));
    }
    tracing::debug!("external blob {} missing, reading {}", path.display(), gz.display());
    let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(&gz)?));
    io::copy(&mut (&mut decoder).take(offset), &mut io::sink())?;
    let mut bytes = Vec::new();
    decoder.take(len).read_to_end(&mut bytes)?;
    Ok(RawBlob::new(bytes, len))
}

/// Decode raw blob bytes into pixels of the frame's element type.
///
/// Output always holds exactly `npixels` elements: short or long
/// decompressed data is zero-padded or truncated with a warning.  A blob cut
/// short by the end of the file decodes to zeros when its compressed stream
/// is unusable.
pub fn decode(raw: RawBlob, layout: &FrameLayout, index: usize) -> Result<PixelData> {
    let expected = layout.expected_len();
    let block = CompressionBlock::new(layout.compression, raw.bytes, expected);
    let decoded = match block.decompress(layout.dtype) {
        Ok(decoded) => decoded,
        Err(e) if raw.short && layout.compression != CompressionKind::None => {
            tracing::warn!("frame {index}: truncated {} blob ({e}); zero-filling", layout.compression.name());
            return Ok(PixelData::zeros(layout.dtype, layout.npixels()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut bytes = decoded.bytes;
    if bytes.len() != expected && !(raw.short && layout.compression == CompressionKind::None) {
        let mismatch = ImageError::SizeMismatch { declared: bytes.len() as u64, expected: expected as u64 };
        tracing::warn!("frame {index}: decoded {mismatch}; padding or truncating");
    }
    bytes.resize(expected, 0);

    let order = if decoded.host_order { ByteOrder::host() } else { layout.byte_order };
    Ok(PixelData::from_bytes(layout.dtype, bytes, order))
}
