//! Format registry and auto-detection.
//!
//! A [`FormatRegistry`] maps format names to [`ImageCodec`] implementations
//! and picks one for an unknown file:
//!
//! 1. Read the first [`PREFIX_LEN`](magic::PREFIX_LEN) bytes and match them,
//!    in table order, against [`magic::MAGIC_NUMBERS`].
//! 2. Resolve ambiguous tags (HDF5 flavour via an [`AttributeInspector`],
//!    MarCCD vs TIFF via the filename extension).
//! 3. With no magic match, decompose the filename and look its extension up
//!    in the static table, then in the extensions of registered codecs.
//!
//! Detection only reads; the stream position is restored before returning.
//! The registry is an ordinary value: build one with
//! [`FormatRegistry::with_defaults`] and share it behind an `Arc` if needed.

pub mod magic;
pub mod source;

use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::edf::{EdfCodec, EdfOptions};
use crate::error::{ImageError, Result};
use crate::filename::FilenameObject;
use crate::frame::{Container, Frame};

pub use magic::AttributeInspector;
pub use source::{ReadSeek, Source};

// ── Codec contract ───────────────────────────────────────────────────────────

/// Options threaded through [`FormatRegistry::open`] to the chosen codec.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub edf: EdfOptions,
}

/// A container format that can be opened (and optionally written).
pub trait ImageCodec: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    /// Lower-case extensions without the dot.
    fn extensions(&self) -> &'static [&'static str] {
        &[]
    }

    fn open(&self, source: Source, options: &OpenOptions) -> Result<Box<dyn Container>>;

    fn write(&self, _path: &Path, _frames: &[Frame]) -> Result<()> {
        Err(ImageError::Unsupported { codec: self.name().to_string(), operation: "write" })
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FormatRegistry {
    codecs:    BTreeMap<String, Arc<dyn ImageCodec>>,
    /// Extension -> codec name, rebuilt on demand after `register`.
    by_ext:    OnceLock<HashMap<String, String>>,
    inspector: Option<Arc<dyn AttributeInspector>>,
}

impl FormatRegistry {
    /// Empty registry: detection works, opening fails with `UnregisteredFormat`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every codec this crate ships.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EdfCodec));
        registry
    }

    /// Insert or replace a codec under its own name.
    pub fn register(&mut self, codec: Arc<dyn ImageCodec>) -> Option<Arc<dyn ImageCodec>> {
        let name = codec.name().to_string();
        tracing::debug!("registering codec '{name}'");
        self.by_ext = OnceLock::new();
        self.codecs.insert(name, codec)
    }

    /// Install the HDF5 root-attribute reader used for disambiguation.
    pub fn set_attribute_inspector(&mut self, inspector: Arc<dyn AttributeInspector>) {
        self.inspector = Some(inspector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageCodec>> {
        self.codecs.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(String::as_str)
    }

    /// Registered codec claiming `ext` (no dot, any case).
    pub fn codec_for_extension(&self, ext: &str) -> Option<&str> {
        let map = self.by_ext.get_or_init(|| {
            let mut map = HashMap::new();
            for (name, codec) in &self.codecs {
                for ext in codec.extensions() {
                    map.entry(ext.to_ascii_lowercase()).or_insert_with(|| name.clone());
                }
            }
            map
        });
        map.get(&ext.trim_start_matches('.').to_ascii_lowercase()).map(String::as_str)
    }

    // ── Detection ────────────────────────────────────────────────────────────

    /// Detect the format of a file, looking through gzip/bzip2 wrappers.
    pub fn detect_path(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let mut source = Source::open(path)?;
        self.detect_reader(source.reader_mut(), Some(path))
    }

    /// Detect from a stream; `filename` feeds the extension fallback and
    /// TIFF disambiguation.  The stream position is left unchanged.
    pub fn detect_reader(&self, reader: &mut dyn ReadSeek, filename: Option<&Path>) -> Result<String> {
        let start = reader.stream_position()?;
        let mut prefix = [0u8; magic::PREFIX_LEN];
        let read = source::read_prefix(reader, &mut prefix);
        reader.seek(SeekFrom::Start(start))?;
        let n = read?;

        let tag = match magic::match_prefix(&prefix[..n]) {
            Some(magic::AMBIGUOUS_HDF5) => {
                let tag = self.classify_hdf5(reader, filename);
                reader.seek(SeekFrom::Start(start))?;
                Some(tag)
            }
            Some(magic::AMBIGUOUS_TIFF) => Some(magic::classify_tiff(filename)),
            other => other,
        };
        if let Some(tag) = tag {
            tracing::debug!("magic bytes identify '{tag}'");
            return Ok(tag.to_string());
        }

        if let Some(path) = filename {
            let parts = FilenameObject::parse(path);
            if let Some(tag) = parts.format() {
                tracing::debug!("{}: extension fallback identifies '{tag}'", path.display());
                return Ok(tag.to_string());
            }
            if let Some(tag) = parts.extension.get(1..).and_then(|ext| self.codec_for_extension(ext)) {
                return Ok(tag.to_string());
            }
        }
        Err(ImageError::UnidentifiableFormat(
            filename.map_or_else(|| "<stream>".to_string(), |p| p.display().to_string()),
        ))
    }

    /// Detect from an in-memory buffer.
    pub fn detect_bytes(&self, bytes: &[u8], filename: Option<&Path>) -> Result<String> {
        let mut cursor = std::io::Cursor::new(bytes);
        self.detect_reader(&mut cursor, filename)
    }

    fn classify_hdf5(&self, reader: &mut dyn ReadSeek, filename: Option<&Path>) -> &'static str {
        let Some(inspector) = &self.inspector else {
            return "eiger";
        };
        match inspector.root_attributes(filename, reader) {
            Ok(attributes) => magic::classify_hdf5(&attributes),
            Err(e) => {
                tracing::warn!("cannot read HDF5 root attributes ({e}); assuming eiger");
                "eiger"
            }
        }
    }

    // ── Opening ──────────────────────────────────────────────────────────────

    /// Detect and open a file.
    pub fn open(&self, path: impl AsRef<Path>, options: &OpenOptions) -> Result<Box<dyn Container>> {
        let path = path.as_ref();
        let mut source = Source::open(path)?;
        let tag = self.detect_reader(source.reader_mut(), Some(path))?;
        self.open_source(&tag, source, options)
    }

    /// Detect and open an already-open stream.
    pub fn open_reader(&self, mut source: Source, options: &OpenOptions) -> Result<Box<dyn Container>> {
        let filename = source.path().map(Path::to_path_buf);
        let tag = self.detect_reader(source.reader_mut(), filename.as_deref())?;
        self.open_source(&tag, source, options)
    }

    /// Open with a known format name, skipping detection.
    pub fn open_source(&self, format: &str, source: Source, options: &OpenOptions) -> Result<Box<dyn Container>> {
        let codec = self.get(format).ok_or_else(|| ImageError::UnregisteredFormat(format.to_string()))?;
        tracing::debug!("opening {} as {}", source.name(), codec.name());
        codec.open(source, options)
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("codecs", &self.codecs.keys().collect::<Vec<_>>())
            .field("inspector", &self.inspector.is_some())
            .finish()
    }
}
