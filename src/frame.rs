//! Frame & container model shared by every codec.
//!
//! # Ownership
//! A container owns its file handle and buffers.  Frames only hold
//! [`Weak`] handles to the container metadata ([`ContainerInfo`]), so a
//! frame that outlives its container keeps neither the file nor the
//! container buffers alive; [`Frame::container`] then returns `None`.
//!
//! # Laziness
//! Codecs may hand out frames whose pixels are not decoded yet.  The first
//! call to [`Frame::data`] runs the codec-supplied unpacker exactly once and
//! caches the result; later calls are pure reads.

use std::cell::{OnceCell, RefCell};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{ImageError, Result};
use crate::header::Header;
use crate::pixel::{DataType, Image, PixelData};

// ── Container metadata ───────────────────────────────────────────────────────

/// File-level metadata a frame can reach through its weak back-reference.
#[derive(Debug)]
pub struct ContainerInfo {
    codec:      String,
    source:     String,
    incomplete: AtomicBool,
}

impl ContainerInfo {
    pub fn new(codec: impl Into<String>, source: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            codec:      codec.into(),
            source:     source.into(),
            incomplete: AtomicBool::new(false),
        })
    }

    /// Name of the codec that produced the container.
    pub fn codec(&self) -> &str {
        &self.codec
    }

    /// Path or label of the backing store.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_incomplete(&self) -> bool {
        self.incomplete.load(Ordering::Relaxed)
    }

    /// Set-only: once a container is incomplete it stays incomplete.
    pub fn mark_incomplete(&self) {
        self.incomplete.store(true, Ordering::Relaxed);
    }
}

// ── Frame ────────────────────────────────────────────────────────────────────

/// Deferred pixel decoder run on first access to [`Frame::data`].
pub type Unpacker = Box<dyn FnOnce() -> Result<PixelData> + Send>;

pub struct Frame {
    index:           usize,
    header:          Header,
    shape:           Vec<usize>,
    dtype:           DataType,
    incomplete_data: bool,
    data:            OnceCell<PixelData>,
    unpack:          RefCell<Option<Unpacker>>,
    container:       Weak<ContainerInfo>,
    file_container:  Weak<ContainerInfo>,
}

impl Frame {
    /// A detached, fully decoded frame (e.g. one built for writing).
    pub fn new(header: Header, image: Image) -> Self {
        let data = OnceCell::new();
        let dtype = image.dtype();
        let _ = data.set(image.data);
        Self {
            index: 0,
            header,
            shape: image.shape,
            dtype,
            incomplete_data: false,
            data,
            unpack: RefCell::new(None),
            container: Weak::new(),
            file_container: Weak::new(),
        }
    }

    /// A frame whose pixels are decoded on first access.
    pub fn lazy(
        index:  usize,
        header: Header,
        shape:  Vec<usize>,
        dtype:  DataType,
        owner:  &Arc<ContainerInfo>,
        unpack: Unpacker,
    ) -> Self {
        Self {
            index,
            header,
            shape,
            dtype,
            incomplete_data: false,
            data: OnceCell::new(),
            unpack: RefCell::new(Some(unpack)),
            container: Arc::downgrade(owner),
            file_container: Arc::downgrade(owner),
        }
    }

    /// Attach a decoded frame to a container at `index`.
    pub fn attached(index: usize, header: Header, image: Image, owner: &Arc<ContainerInfo>) -> Self {
        let mut frame = Self::new(header, image);
        frame.index = index;
        frame.container = Arc::downgrade(owner);
        frame.file_container = Arc::downgrade(owner);
        frame
    }

    /// Flag the pixels as padded because the backing store was short.
    pub fn with_incomplete_data(mut self, incomplete: bool) -> Self {
        self.incomplete_data = incomplete;
        self
    }

    /// Rebind the logical container (e.g. a file series) and the index the
    /// frame has inside it.  The physical file container is kept.
    pub fn with_container(mut self, logical: &Arc<ContainerInfo>, index: usize) -> Self {
        self.container = Arc::downgrade(logical);
        self.index = index;
        self
    }

    /// Position inside the logical container, 0-based.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// True when the pixel blob was shorter than declared and zero-padded.
    pub fn incomplete_data(&self) -> bool {
        self.incomplete_data
    }

    /// Logical container, if still alive.
    pub fn container(&self) -> Option<Arc<ContainerInfo>> {
        self.container.upgrade()
    }

    /// Physical file container, if still alive.
    pub fn file_container(&self) -> Option<Arc<ContainerInfo>> {
        self.file_container.upgrade()
    }

    /// Decoded pixels.  Decodes on first call, cached afterwards.
    pub fn data(&self) -> Result<&PixelData> {
        if let Some(data) = self.data.get() {
            return Ok(data);
        }
        let unpack = self.unpack.borrow_mut().take().ok_or_else(|| {
            ImageError::Io(io::Error::other(format!(
                "frame {} has no pixel data (an earlier decode failed)",
                self.index
            )))
        })?;
        let decoded = unpack()?;
        let _ = self.data.set(decoded);
        self.data.get().ok_or_else(|| ImageError::Io(io::Error::other("frame data cache unavailable")))
    }

    /// Decoded pixels paired with the frame shape.
    pub fn image(&self) -> Result<Image> {
        Ok(Image::new(self.data()?.clone(), self.shape.clone()))
    }

    pub fn is_decoded(&self) -> bool {
        self.data.get().is_some()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("header_keys", &self.header.len())
            .field("decoded", &self.is_decoded())
            .field("incomplete_data", &self.incomplete_data)
            .finish()
    }
}

// ── Container ────────────────────────────────────────────────────────────────

/// One physical file (or in-memory buffer) holding zero or more frames.
///
/// `get_frame(i)` never fails for `i < nframes()` on a well-formed,
/// complete file.
pub trait Container: Send {
    fn info(&self) -> &Arc<ContainerInfo>;

    fn nframes(&self) -> usize;

    fn get_frame(&mut self, index: usize) -> Result<Frame>;

    /// Forward-only iterator over every frame.  Not restartable: call again
    /// for a fresh pass.
    fn frames(&mut self) -> Frames<'_>;

    fn codec_name(&self) -> &str {
        self.info().codec()
    }

    fn is_incomplete(&self) -> bool {
        self.info().is_incomplete()
    }
}

/// Iterator returned by [`Container::frames`].
pub struct Frames<'a> {
    container: &'a mut dyn Container,
    next:      usize,
}

impl<'a> Frames<'a> {
    pub fn new(container: &'a mut dyn Container) -> Self {
        Self { container, next: 0 }
    }
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.container.nframes() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.container.get_frame(index))
    }
}

/// Returns `OutOfRange` unless `index < len`.
pub fn check_index(index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(ImageError::OutOfRange { index, len })
    }
}

// ── In-memory container ──────────────────────────────────────────────────────

/// Container over already-decoded planes, for collaborators without a lazy
/// backend and for assembling frames before writing.
pub struct MemoryContainer {
    info:   Arc<ContainerInfo>,
    frames: Vec<(Header, Image)>,
}

impl MemoryContainer {
    pub fn new(codec: &str, frames: Vec<(Header, Image)>) -> Self {
        Self { info: ContainerInfo::new(codec, "<memory>"), frames }
    }

    pub fn push(&mut self, header: Header, image: Image) {
        self.frames.push((header, image));
    }
}

impl Container for MemoryContainer {
    fn info(&self) -> &Arc<ContainerInfo> {
        &self.info
    }

    fn nframes(&self) -> usize {
        self.frames.len()
    }

    fn get_frame(&mut self, index: usize) -> Result<Frame> {
        check_index(index, self.frames.len())?;
        let (header, image) = self.frames[index].clone();
        Ok(Frame::attached(index, header, image, &self.info))
    }

    fn frames(&mut self) -> Frames<'_> {
        Frames::new(self)
    }
}
