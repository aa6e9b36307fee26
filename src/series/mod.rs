//! Frames of many numbered files seen as one sequence.
//!
//! # Addressing
//!
//! | strategy            | global index `g` -> `(file, local)`              | probing |
//! |---------------------|--------------------------------------------------|---------|
//! | `SingleFrame`       | `(g, 0)`                                         | none |
//! | `FixedFrameCount`   | `(g / n, g % n)`                                 | first file, unless `n` is given |
//! | `General`           | scan cached descriptors, append new ones on miss | file by file, as needed |
//! | `Infer`             | `SingleFrame` if the first file holds one frame, else `General` | first file |
//!
//! Descriptors are append-only: once a file is scanned its frame range is
//! never recomputed, so files must not change while a series is in use.
//!
//! At most one file is open at a time.  Moving to a frame in another file
//! drops the previous container; frames already handed out keep their
//! pixels but their [`file_container`](Frame::file_container) goes away.
//! Their logical container is the series itself.

pub mod names;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{ImageError, Result};
use crate::frame::{Container, ContainerInfo, Frame};
use crate::registry::{FormatRegistry, OpenOptions};

use self::names::FilenameCache;
pub use self::names::{FilenameSeries, FilenameSource, NumberedFilenames};

pub const SERIES_CODEC: &str = "series";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Addressing {
    #[default]
    Infer,
    General,
    SingleFrame,
    /// `None` scans the first file for the count.
    FixedFrameCount(Option<usize>),
}

#[derive(Debug, Clone, Default)]
pub struct SeriesOptions {
    pub addressing: Addressing,
    pub open:       OpenOptions,
}

/// Frame range of one file inside the series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    pub filename:    PathBuf,
    pub ordinal:     usize,
    pub first_frame: usize,
    pub nframes:     usize,
}

impl FileDescriptor {
    fn end(&self) -> usize {
        self.first_frame + self.nframes
    }
}

pub struct FileSeries {
    registry:    Arc<FormatRegistry>,
    names:       FilenameCache,
    options:     SeriesOptions,
    info:        Arc<ContainerInfo>,
    addressing:  Option<Addressing>,
    per_file:    Option<usize>,
    descriptors: Vec<FileDescriptor>,
    resolved:    bool,
    current:     Option<(usize, Box<dyn Container>)>,
    total:       Option<usize>,
}

impl FileSeries {
    pub fn new(registry: Arc<FormatRegistry>, source: FilenameSource, options: SeriesOptions) -> Self {
        let addressing = match options.addressing {
            Addressing::Infer => None,
            other => Some(other),
        };
        let per_file = match options.addressing {
            Addressing::FixedFrameCount(n) => n,
            _ => None,
        };
        Self {
            registry,
            names: source.into_cache(),
            options,
            info: ContainerInfo::new(SERIES_CODEC, "<series>"),
            addressing,
            per_file,
            descriptors: Vec::new(),
            resolved: false,
            current: None,
            total: None,
        }
    }

    /// Series over `first` and the files numbered after it, up to the
    /// first missing one.
    pub fn from_first(registry: Arc<FormatRegistry>, first: impl AsRef<Path>, options: SeriesOptions) -> Result<Self> {
        let first = first.as_ref();
        let source = match NumberedFilenames::from_first(first) {
            Some(gen) => FilenameSource::Numbered(gen),
            None => FilenameSource::List(vec![first.to_path_buf()]),
        };
        Ok(Self::new(registry, source, options))
    }

    /// Logical container every returned frame points at.
    pub fn info(&self) -> &Arc<ContainerInfo> {
        &self.info
    }

    fn filename(&mut self, ordinal: usize) -> Option<PathBuf> {
        self.names.get(ordinal).map(Path::to_path_buf)
    }

    /// Open file `ordinal`, reusing the open container when it matches.
    fn open_file(&mut self, ordinal: usize) -> Result<&mut dyn Container> {
        if self.current.as_ref().is_some_and(|(open, _)| *open != ordinal) {
            // Close the previous file before opening the next one.
            self.current = None;
        }
        let slot = match self.current.take() {
            Some(open) => open,
            None => {
                let path = self
                    .filename(ordinal)
                    .ok_or_else(|| ImageError::OutOfRange { index: ordinal, len: self.names.count() })?;
                tracing::debug!("series: opening file {ordinal} ({})", path.display());
                let container = self.registry.open(&path, &self.options.open)?;
                if container.is_incomplete() {
                    self.info.mark_incomplete();
                }
                (ordinal, container)
            }
        };
        Ok(self.current.insert(slot).1.as_mut())
    }

    fn addressing(&mut self) -> Result<Addressing> {
        if let Some(a) = self.addressing {
            return Ok(a);
        }
        let inferred = match self.open_file(0) {
            Ok(c) if c.nframes() == 1 => Addressing::SingleFrame,
            Ok(_) => Addressing::General,
            Err(ImageError::OutOfRange { .. }) => Addressing::General,
            Err(e) => return Err(e),
        };
        tracing::debug!("series: inferred {inferred:?} addressing");
        self.addressing = Some(inferred);
        Ok(inferred)
    }

    fn frames_per_file(&mut self) -> Result<usize> {
        if let Some(n) = self.per_file {
            return Ok(n);
        }
        let n = self.open_file(0)?.nframes();
        if n == 0 {
            return Err(ImageError::OutOfRange { index: 0, len: 0 });
        }
        self.per_file = Some(n);
        Ok(n)
    }

    /// Append the descriptor of the next unscanned file.  Returns false when
    /// there are no more files.  A file that cannot be opened contributes no
    /// frames.
    fn scan_next(&mut self) -> bool {
        let ordinal = self.descriptors.len();
        let Some(filename) = self.filename(ordinal) else {
            self.resolved = true;
            return false;
        };
        let nframes = match self.open_file(ordinal) {
            Ok(container) => container.nframes(),
            Err(e) => {
                tracing::warn!("series: skipping {} ({e})", filename.display());
                self.info.mark_incomplete();
                0
            }
        };
        let first_frame = self.descriptors.last().map_or(0, FileDescriptor::end);
        self.descriptors.push(FileDescriptor { filename, ordinal, first_frame, nframes });
        true
    }

    fn out_of_range(&mut self, index: usize) -> ImageError {
        let len = self.nframes().unwrap_or(index);
        ImageError::OutOfRange { index, len }
    }

    /// Map a global frame index to `(file ordinal, local index)`.
    pub fn locate(&mut self, index: usize) -> Result<(usize, usize)> {
        match self.addressing()? {
            Addressing::SingleFrame => {
                if self.filename(index).is_none() {
                    return Err(self.out_of_range(index));
                }
                Ok((index, 0))
            }
            Addressing::FixedFrameCount(_) => {
                let n = self.frames_per_file()?;
                let ordinal = index / n;
                if self.filename(ordinal).is_none() {
                    return Err(self.out_of_range(index));
                }
                Ok((ordinal, index % n))
            }
            Addressing::General | Addressing::Infer => loop {
                let known = self.descriptors.partition_point(|d| d.end() <= index);
                if let Some(d) = self.descriptors.get(known) {
                    return Ok((d.ordinal, index - d.first_frame));
                }
                if self.resolved || !self.scan_next() {
                    return Err(self.out_of_range(index));
                }
            },
        }
    }

    /// Frame at global `index`, bound to this series as logical container.
    pub fn get_frame(&mut self, index: usize) -> Result<Frame> {
        let (ordinal, local) = self.locate(index)?;
        let frame = match self.open_file(ordinal)?.get_frame(local) {
            Ok(frame) => frame,
            Err(ImageError::OutOfRange { .. }) => return Err(self.out_of_range(index)),
            Err(e) => return Err(e),
        };
        Ok(frame.with_container(&self.info, index))
    }

    /// Total frame count.  For general addressing every file is scanned once.
    pub fn nframes(&mut self) -> Result<usize> {
        if let Some(total) = self.total {
            return Ok(total);
        }
        let total = match self.addressing()? {
            Addressing::SingleFrame => self.names.count(),
            Addressing::FixedFrameCount(_) => {
                let files = self.names.count();
                if files == 0 {
                    0
                } else {
                    let n = self.frames_per_file()?;
                    let last = self.open_file(files - 1)?.nframes();
                    n * (files - 1) + last.min(n)
                }
            }
            Addressing::General | Addressing::Infer => {
                while !self.resolved && self.scan_next() {}
                self.descriptors.last().map_or(0, FileDescriptor::end)
            }
        };
        self.total = Some(total);
        Ok(total)
    }

    /// Descriptors of every file, probing the ones not seen yet.
    pub fn file_descriptors(&mut self) -> &[FileDescriptor] {
        while !self.resolved && self.scan_next() {}
        &self.descriptors
    }

    /// Forward iterator over all frames.
    pub fn frames(&mut self) -> SeriesFrames<'_> {
        SeriesFrames { series: self, next: 0, done: false }
    }
}

impl std::fmt::Debug for FileSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSeries")
            .field("addressing", &self.addressing)
            .field("descriptors", &self.descriptors.len())
            .field("open_file", &self.current.as_ref().map(|(o, _)| *o))
            .finish()
    }
}

/// Iterator returned by [`FileSeries::frames`].  Ends at the first
/// out-of-range index; other per-frame errors are yielded and iteration
/// continues.
pub struct SeriesFrames<'a> {
    series: &'a mut FileSeries,
    next:   usize,
    done:   bool,
}

impl Iterator for SeriesFrames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let index = self.next;
        self.next += 1;
        match self.series.get_frame(index) {
            Err(ImageError::OutOfRange { .. }) => {
                self.done = true;
                None
            }
            other => Some(other),
        }
    }
}
