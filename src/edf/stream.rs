//! Forward-only EDF reader.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::blob::{self, RawBlob};
use super::header::BlobLocation;
use super::scanner::{HeaderScanner, Scan};
use super::{lazy_frame, Block, BlockReader, EdfOptions, CODEC_NAME};
use crate::error::{ImageError, Result};
use crate::frame::{ContainerInfo, Frame};
use crate::header::Header;
use crate::registry::source;

/// Iterator decoding one frame at a time from a non-seekable stream.
///
/// Each blob is read into memory when its frame is yielded and decoded on
/// first [`Frame::data`] call.  Damage after the first frame ends the
/// iteration and marks [`info`](Self::info) incomplete.
pub struct EdfFrames<R> {
    scanner: HeaderScanner<R>,
    blocks:  BlockReader,
    info:    Arc<ContainerInfo>,
    options: EdfOptions,
    next:    usize,
    done:    bool,
}

impl EdfFrames<Box<dyn Read + Send>> {
    /// Stream a file, decompressing `.gz`/`.bz2` wrappers on the fly.
    pub fn open(path: impl AsRef<Path>, options: &EdfOptions) -> Result<Self> {
        let path = path.as_ref();
        let reader = source::open_stream(path)?;
        let directory = path.parent().map(Path::to_path_buf);
        Ok(Self::with_directory(reader, path.display().to_string(), directory, options))
    }
}

impl<R: Read> EdfFrames<R> {
    pub fn new(reader: R, name: impl Into<String>, options: &EdfOptions) -> Self {
        Self::with_directory(reader, name, None, options)
    }

    /// `directory` resolves relative external blob names.
    pub fn with_directory(reader: R, name: impl Into<String>, directory: Option<PathBuf>, options: &EdfOptions) -> Self {
        Self {
            scanner: HeaderScanner::new(reader),
            blocks:  BlockReader::new(directory, options),
            info:    ContainerInfo::new(CODEC_NAME, name),
            options: options.clone(),
            next:    0,
            done:    false,
        }
    }

    /// Metadata shared by every yielded frame.  Keep it alive to keep the
    /// frames' container back-references valid.
    pub fn info(&self) -> &Arc<ContainerInfo> {
        &self.info
    }

    pub fn general_header(&self) -> Option<&Header> {
        self.blocks.general.as_ref()
    }

    /// Stop iterating.  Fatal on the first frame, otherwise incomplete.
    fn fail(&mut self, e: ImageError) -> Option<Result<Frame>> {
        self.done = true;
        if self.next == 0 {
            return Some(Err(e));
        }
        tracing::warn!("{}: {e}; stopping after {} frames", self.info.source(), self.next);
        self.info.mark_incomplete();
        None
    }

    fn read_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            let raw = match self.scanner.next_header(self.options.max_header_size) {
                Ok(Scan::Header(raw)) => raw,
                Ok(Scan::End) => {
                    self.done = true;
                    if self.blocks.seen == 0 {
                        return Some(Err(ImageError::malformed(0, "no EDF header block found")));
                    }
                    return None;
                }
                Ok(Scan::Truncated { offset }) => {
                    return self.fail(ImageError::malformed(offset, "header block truncated by end of file"))
                }
                Err(e) => return self.fail(e),
            };

            let (header, layout) = match self.blocks.interpret(&raw) {
                Ok(Block::General) => continue,
                Ok(Block::Frame(header, layout)) => (header, layout),
                Err(e) => return self.fail(e),
            };

            let raw_blob = match &layout.blob {
                BlobLocation::Inline { .. } => {
                    let blob = match self.scanner.read_data(layout.read_len) {
                        Ok(bytes) => RawBlob::new(bytes, layout.read_len),
                        Err(e) => return self.fail(e.into()),
                    };
                    let rest = layout.stored_len - layout.read_len;
                    if !blob.short && rest > 0 {
                        if let Err(e) = self.scanner.skip(rest) {
                            return self.fail(e.into());
                        }
                    }
                    blob
                }
                BlobLocation::External { path, offset } => match blob::read_external(path, *offset, layout.read_len) {
                    Ok(blob) => blob,
                    Err(e) => return self.fail(e),
                },
            };

            if raw_blob.short {
                // Nothing can follow a blob cut by end of stream.
                self.done = true;
            }
            let index = self.next;
            self.next += 1;
            return Some(Ok(lazy_frame(index, header, layout, raw_blob, &self.info)));
        }
    }
}

impl<R: Read> Iterator for EdfFrames<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.read_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::PixelData;

    /// Reader without `Seek`.
    struct Pipe(std::io::Cursor<Vec<u8>>);
    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }

    fn block(text: &str) -> Vec<u8> {
        let mut b = text.as_bytes().to_vec();
        b.resize(510, b' ');
        b.extend_from_slice(b"}\n");
        b
    }

    #[test]
    fn streams_frames_without_seek() {
        let mut file = block("{\nDim_1 = 2 ;\nDataType = UnsignedByte ;\nSize = 3 ;\n");
        file.extend_from_slice(&[1, 2, 99]);
        file.extend(block("{\nDim_1 = 2 ;\nDataType = UnsignedByte ;\n"));
        file.extend_from_slice(&[3, 4]);
        let frames = EdfFrames::new(Pipe(std::io::Cursor::new(file)), "pipe", &EdfOptions::default());
        let info = Arc::clone(frames.info());
        let values: Vec<_> = frames.map(|f| f.unwrap().data().unwrap().clone()).collect();
        assert_eq!(values, [PixelData::U8(vec![1, 2]), PixelData::U8(vec![3, 4])]);
        assert!(!info.is_incomplete());
    }

    #[test]
    fn truncated_blob_ends_stream() {
        let mut file = block("{\nDim_1 = 4 ;\nDataType = UnsignedByte ;\n");
        file.extend_from_slice(&[1, 2]);
        let mut frames = EdfFrames::new(Pipe(std::io::Cursor::new(file)), "pipe", &EdfOptions::default());
        let f = frames.next().unwrap().unwrap();
        assert!(f.incomplete_data());
        assert_eq!(f.data().unwrap(), &PixelData::U8(vec![1, 2, 0, 0]));
        assert!(frames.next().is_none());
        assert!(frames.info().is_incomplete());
    }

    #[test]
    fn first_frame_error_is_yielded() {
        let mut frames = EdfFrames::new(Pipe(std::io::Cursor::new(b"junk".to_vec())), "pipe", &EdfOptions::default());
        assert!(matches!(frames.next(), Some(Err(ImageError::MalformedHeader { .. }))));
        assert!(frames.next().is_none());
    }
}
