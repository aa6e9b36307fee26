//! Backing stores handed to codecs.
//!
//! Compressed files (`.gz`, `.bz2`, or gzip/bzip2 magic) cannot be seeked,
//! so [`Source::open`] materializes them into memory before anything sniffs
//! or indexes them.  [`open_stream`] is the sequential alternative that
//! decompresses on the fly.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;

use crate::error::Result;

/// Random-access byte stream.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

const GZIP_MAGIC:  &[u8] = b"\x1f\x8b";
const BZIP2_MAGIC: &[u8] = b"BZh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrapper {
    Plain,
    Gzip,
    Bzip2,
}

impl Wrapper {
    fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".gz") {
            Some(Wrapper::Gzip)
        } else if name.ends_with(".bz2") {
            Some(Wrapper::Bzip2)
        } else {
            None
        }
    }

    fn from_magic(prefix: &[u8]) -> Self {
        if prefix.starts_with(GZIP_MAGIC) {
            Wrapper::Gzip
        } else if prefix.starts_with(BZIP2_MAGIC) {
            Wrapper::Bzip2
        } else {
            Wrapper::Plain
        }
    }

    fn wrap<R: Read + Send + 'static>(self, inner: R) -> Box<dyn Read + Send> {
        match self {
            Wrapper::Plain => Box::new(inner),
            Wrapper::Gzip  => Box::new(MultiGzDecoder::new(inner)),
            Wrapper::Bzip2 => Box::new(BzDecoder::new(inner)),
        }
    }
}

/// Decide the wrapper by suffix, then by the first bytes of `file`.
/// The file is rewound afterwards.
fn sniff_wrapper(path: &Path, file: &mut File) -> io::Result<Wrapper> {
    if let Some(w) = Wrapper::from_path(path) {
        return Ok(w);
    }
    let mut prefix = [0u8; 3];
    let n = read_prefix(file, &mut prefix)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(Wrapper::from_magic(&prefix[..n]))
}

/// Fill as much of `buf` as the stream allows; returns the byte count.
pub(crate) fn read_prefix<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// A named random-access backing store.
pub struct Source {
    name:    String,
    path:    Option<PathBuf>,
    wrapper: Wrapper,
    reader:  Box<dyn ReadSeek>,
}

impl Source {
    /// Open a file, decompressing `.gz`/`.bz2` wrappers into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let wrapper = sniff_wrapper(path, &mut file)?;
        let reader: Box<dyn ReadSeek> = match wrapper {
            Wrapper::Plain => Box::new(BufReader::new(file)),
            w => {
                let mut bytes = Vec::new();
                w.wrap(file).read_to_end(&mut bytes)?;
                tracing::debug!("{}: materialized {} decompressed bytes", path.display(), bytes.len());
                Box::new(Cursor::new(bytes))
            }
        };
        Ok(Self {
            name: path.display().to_string(),
            path: Some(path.to_path_buf()),
            wrapper,
            reader,
        })
    }

    /// In-memory source.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::from_reader(name, Box::new(Cursor::new(bytes)))
    }

    /// Any seekable stream.  The caller is responsible for decompression.
    pub fn from_reader(name: impl Into<String>, reader: Box<dyn ReadSeek>) -> Self {
        Self { name: name.into(), path: None, wrapper: Wrapper::Plain, reader }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// On-disk path, when the source is a file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn wrapper(&self) -> Wrapper {
        self.wrapper
    }

    pub fn reader_mut(&mut self) -> &mut dyn ReadSeek {
        &mut *self.reader
    }

    pub fn into_reader(self) -> Box<dyn ReadSeek> {
        self.reader
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("wrapper", &self.wrapper)
            .finish()
    }
}

/// Forward-only reader over a file, decompressing wrappers on the fly.
pub fn open_stream(path: impl AsRef<Path>) -> Result<Box<dyn Read + Send>> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let wrapper = sniff_wrapper(path, &mut file)?;
    Ok(wrapper.wrap(BufReader::new(file)))
}
