//! ESRF Data Format (EDF) codec.
//!
//! # File layout
//!
//! ```text
//! [general block]?  {  EDF_DataFormatVersion = ... ; key = value ; ... }\n
//! frame 0           {  Dim_1 = .. ; DataType = .. ; Size = .. ; ... }\n  <blob>
//! frame 1           {  ... }\n  <blob>
//! ...
//! ```
//!
//! Header blocks are ASCII `key = value ;` statements padded to a multiple of
//! 512 bytes and closed by `}` followed by `\n` (or `\r\n`).  Each blob
//! follows its header immediately unless `EDF_BinaryFileName` moves it to an
//! external file.  Blobs may be compressed (gzip, zlib, bzip2, byte-offset).
//!
//! # Access modes
//!
//! * [`EdfImage`] indexes every header when opened (seeking over blobs) and
//!   reads any frame on demand.  This is what [`FormatRegistry::open`]
//!   returns.
//! * [`EdfFrames`] walks the stream forward only, one frame at a time,
//!   without seeking or building an index.
//!
//! # Damaged files
//!
//! A malformed or truncated first frame fails the open.  Later damage marks
//! the container incomplete and truncates it at the last readable frame; a
//! frame whose blob runs past end of file is zero-filled and flagged with
//! [`Frame::incomplete_data`].
//!
//! [`FormatRegistry::open`]: crate::registry::FormatRegistry::open

pub mod blob;
pub mod header;
pub mod scanner;
pub mod stream;
pub mod writer;

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ImageError, Result};
use crate::frame::{check_index, Container, ContainerInfo, Frame, Frames};
use crate::header::Header;
use crate::registry::{ImageCodec, OpenOptions, ReadSeek, Source};

use self::blob::RawBlob;
use self::header::{BlobLocation, FrameLayout};
use self::scanner::{HeaderScanner, Scan, DEFAULT_MAX_HEADER_SIZE};

pub use self::stream::EdfFrames;
pub use self::writer::{write_edf, write_edf_to, EdfWriteOptions};

pub const CODEC_NAME: &str = "edf";

// ── Options ──────────────────────────────────────────────────────────────────

/// Largest decoded frame accepted by default (1 GiB).
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 1 << 30;

#[derive(Debug, Clone)]
pub struct EdfOptions {
    /// A header block longer than this is malformed.
    pub max_header_size: usize,
    /// A frame whose dimensions decode to more bytes than this is malformed.
    /// Bounds the allocation made for short or zero-filled blobs.
    pub max_frame_size:  u64,
}

impl Default for EdfOptions {
    fn default() -> Self {
        Self { max_header_size: DEFAULT_MAX_HEADER_SIZE, max_frame_size: DEFAULT_MAX_FRAME_SIZE }
    }
}

// ── Codec ────────────────────────────────────────────────────────────────────

pub struct EdfCodec;

impl ImageCodec for EdfCodec {
    fn name(&self) -> &'static str {
        CODEC_NAME
    }

    fn description(&self) -> &'static str {
        "ESRF data format, multi-frame"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["edf", "cor"]
    }

    fn open(&self, source: Source, options: &OpenOptions) -> Result<Box<dyn Container>> {
        Ok(Box::new(EdfImage::from_source(source, &options.edf)?))
    }

    fn write(&self, path: &Path, frames: &[Frame]) -> Result<()> {
        write_edf(path, frames, &EdfWriteOptions::default())
    }
}

// ── Frame assembly shared by both access modes ───────────────────────────────

/// Build a lazily decoded frame from an already read blob.
pub(crate) fn lazy_frame(
    index:  usize,
    header: Header,
    layout: FrameLayout,
    raw:    RawBlob,
    owner:  &Arc<ContainerInfo>,
) -> Frame {
    let incomplete = raw.short;
    if incomplete {
        tracing::warn!(
            "{}: frame {index} blob is short ({} of {} bytes); zero-filling",
            owner.source(), raw.bytes.len(), layout.read_len
        );
        owner.mark_incomplete();
    }
    let shape = layout.shape.clone();
    let dtype = layout.dtype;
    Frame::lazy(index, header, shape, dtype, owner, Box::new(move || blob::decode(raw, &layout, index)))
        .with_incomplete_data(incomplete)
}

/// Outcome of interpreting one header block.
pub(crate) enum Block {
    General,
    Frame(Header, FrameLayout),
}

/// Interprets header blocks in file order, remembering the general block.
pub(crate) struct BlockReader {
    pub general:        Option<Header>,
    pub directory:      Option<PathBuf>,
    pub seen:           usize,
    pub max_frame_size: u64,
}

impl BlockReader {
    pub fn new(directory: Option<PathBuf>, options: &EdfOptions) -> Self {
        Self { general: None, directory, seen: 0, max_frame_size: options.max_frame_size }
    }

    /// Parse a raw header block.  A general block is only honoured first.
    pub fn interpret(&mut self, raw: &scanner::RawHeader) -> Result<Block> {
        let parsed = header::parse_block(&raw.bytes, raw.offset);
        self.seen += 1;
        if header::is_general_block(&parsed) {
            if self.seen == 1 {
                tracing::debug!("general header block with {} keys", parsed.len());
                self.general = Some(parsed);
                return Ok(Block::General);
            }
            tracing::warn!("general header block at byte {} is not first; ignored", raw.offset);
            return Ok(Block::General);
        }
        let merged = header::inherit(parsed, self.general.as_ref());
        let layout = FrameLayout::from_header(&merged, raw.offset, raw.data_offset, self.directory.as_deref())?;
        let size = layout.expected_len() as u64;
        if size > self.max_frame_size {
            return Err(ImageError::malformed(
                raw.offset,
                format!("frame of {size} bytes exceeds the {} byte limit", self.max_frame_size),
            ));
        }
        Ok(Block::Frame(merged, layout))
    }
}

// ── Random-access container ──────────────────────────────────────────────────

struct FrameEntry {
    header: Header,
    layout: FrameLayout,
}

/// Indexed EDF file; frames are read on demand.
pub struct EdfImage {
    info:    Arc<ContainerInfo>,
    reader:  Box<dyn ReadSeek>,
    general: Option<Header>,
    entries: Vec<FrameEntry>,
}

impl EdfImage {
    pub fn open(path: impl AsRef<Path>, options: &EdfOptions) -> Result<Self> {
        Self::from_source(Source::open(path)?, options)
    }

    pub fn from_source(source: Source, options: &EdfOptions) -> Result<Self> {
        let info = ContainerInfo::new(CODEC_NAME, source.name());
        let directory = source.path().and_then(Path::parent).map(Path::to_path_buf);
        let mut reader = source.into_reader();
        let (general, entries) = Self::index(&mut reader, options, directory, &info)?;
        tracing::debug!(
            "{}: {} frames{}",
            info.source(),
            entries.len(),
            if info.is_incomplete() { " (incomplete)" } else { "" }
        );
        Ok(Self { info, reader, general, entries })
    }

    fn index(
        reader:    &mut Box<dyn ReadSeek>,
        options:   &EdfOptions,
        directory: Option<PathBuf>,
        info:      &ContainerInfo,
    ) -> Result<(Option<Header>, Vec<FrameEntry>)> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut blocks = BlockReader::new(directory, options);
        let mut entries = Vec::new();
        let mut scanner = HeaderScanner::new(&mut **reader);

        loop {
            let fail = |e: ImageError, entries: &[FrameEntry]| -> Result<()> {
                if entries.is_empty() {
                    return Err(e);
                }
                tracing::warn!("{}: {e}; keeping {} frames", info.source(), entries.len());
                info.mark_incomplete();
                Ok(())
            };

            let raw = match scanner.next_header(options.max_header_size) {
                Ok(Scan::Header(raw)) => raw,
                Ok(Scan::End) => {
                    if blocks.seen == 0 {
                        return Err(ImageError::malformed(0, "no EDF header block found"));
                    }
                    break;
                }
                Ok(Scan::Truncated { offset }) => {
                    fail(ImageError::malformed(offset, "header block truncated by end of file"), &entries)?;
                    break;
                }
                Err(e) => {
                    fail(e, &entries)?;
                    break;
                }
            };

            let (header, layout) = match blocks.interpret(&raw) {
                Ok(Block::General) => continue,
                Ok(Block::Frame(header, layout)) => (header, layout),
                Err(e) => {
                    fail(e, &entries)?;
                    break;
                }
            };

            let next = raw.data_offset + layout.inline_len();
            entries.push(FrameEntry { header, layout });
            if next > file_len {
                // Blob runs past end of file: keep the frame, zero-filled on read.
                info.mark_incomplete();
                break;
            }
            scanner.seek_to(next)?;
        }
        Ok((blocks.general, entries))
    }

    /// File-scope header block, if the file has one.
    pub fn general_header(&self) -> Option<&Header> {
        self.general.as_ref()
    }

    /// Merged header of frame `index` without reading its blob.
    pub fn frame_header(&self, index: usize) -> Result<&Header> {
        check_index(index, self.entries.len())?;
        Ok(&self.entries[index].header)
    }
}

impl Container for EdfImage {
    fn info(&self) -> &Arc<ContainerInfo> {
        &self.info
    }

    fn nframes(&self) -> usize {
        self.entries.len()
    }

    fn get_frame(&mut self, index: usize) -> Result<Frame> {
        check_index(index, self.entries.len())?;
        let entry = &self.entries[index];
        let raw = match &entry.layout.blob {
            BlobLocation::Inline { offset } => blob::read_at(&mut *self.reader, *offset, entry.layout.read_len)?,
            BlobLocation::External { path, offset } => blob::read_external(path, *offset, entry.layout.read_len)?,
        };
        Ok(lazy_frame(index, entry.header.clone(), entry.layout.clone(), raw, &self.info))
    }

    fn frames(&mut self) -> Frames<'_> {
        Frames::new(self)
    }
}

impl std::fmt::Debug for EdfImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdfImage")
            .field("source", &self.info.source())
            .field("nframes", &self.entries.len())
            .field("general", &self.general.is_some())
            .finish()
    }
}
