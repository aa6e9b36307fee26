//! EDF header-block scanner.
//!
//! # How it works
//!
//! The scanner reads the stream in 512-byte blocks into a growing buffer.
//! After skipping inter-frame whitespace it expects `{`, then feeds every
//! newly read byte through a three-state terminator machine:
//!
//! | state      | `}`       | `\r`       | `\n`  | other      |
//! |------------|-----------|------------|-------|------------|
//! | `Open`     | `Brace`   | `Open`     | `Open`| `Open`     |
//! | `Brace`    | `Brace`   | `BraceCr`  | done  | `Open`     |
//! | `BraceCr`  | `Brace`   | `Open`     | done  | `Open`     |
//!
//! The state survives across block reads, so a terminator straddling a
//! 512-byte boundary is found without re-scanning consumed bytes.  Bytes
//! read past the terminator stay buffered and are served first to the next
//! data read or header scan; sequential use never needs `Seek`.
//!
//! ## Outcomes
//!
//! | Outcome      | Meaning |
//! |--------------|---------|
//! | `Header`     | a complete `{ ... }\n` block |
//! | `End`        | clean end of stream (only padding left) |
//! | `Truncated`  | `{` found but the stream ended before the terminator |
//!
//! A header growing past the size guard, or junk where `{` is expected, is
//! a [`MalformedHeader`](crate::error::ImageError::MalformedHeader) error.

use std::io::{self, ErrorKind, Read, Seek, SeekFrom};

use crate::error::{ImageError, Result};

/// EDF header block size.
pub const BLOCK_SIZE: usize = 512;
/// Default cap on a single header block, guarding against corrupt files.
pub const DEFAULT_MAX_HEADER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminator {
    Open,
    Brace,
    BraceCr,
}

impl Terminator {
    /// Advance by one byte; returns true when the terminator completes.
    #[inline]
    fn step(&mut self, byte: u8) -> bool {
        *self = match (*self, byte) {
            (_, b'}') => Terminator::Brace,
            (Terminator::Brace, b'\r') => Terminator::BraceCr,
            (Terminator::Brace | Terminator::BraceCr, b'\n') => return true,
            _ => Terminator::Open,
        };
        false
    }
}

/// A complete header block as found on disk.
#[derive(Debug, Clone)]
pub struct RawHeader {
    /// Absolute offset of the opening `{`.
    pub offset:      u64,
    /// Bytes from `{` through the terminating newline.
    pub bytes:       Vec<u8>,
    /// Absolute offset of the first byte after the terminator.
    pub data_offset: u64,
}

#[derive(Debug)]
pub enum Scan {
    Header(RawHeader),
    End,
    Truncated { offset: u64 },
}

/// Block-wise header scanner over any byte stream.
pub struct HeaderScanner<R> {
    inner:    R,
    /// Bytes read from `inner` but not consumed yet.
    pending:  Vec<u8>,
    /// Absolute stream offset of `pending[0]`.
    position: u64,
}

impl<R: Read> HeaderScanner<R> {
    pub fn new(inner: R) -> Self {
        Self::with_offset(inner, 0)
    }

    /// Scanner whose stream is already positioned at absolute `offset`.
    pub fn with_offset(inner: R, offset: u64) -> Self {
        Self { inner, pending: Vec::new(), position: offset }
    }

    /// Absolute offset of the next unconsumed byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Append up to one block to `buf`; returns bytes added (0 at EOF).
    fn read_block(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let start = buf.len();
        buf.resize(start + BLOCK_SIZE, 0);
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.inner.read(&mut buf[start + filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    buf.truncate(start + filled);
                    return Err(e);
                }
            }
        }
        buf.truncate(start + filled);
        Ok(filled)
    }

    /// Scan the next header block.
    pub fn next_header(&mut self, max_header_size: usize) -> Result<Scan> {
        let mut buf = std::mem::take(&mut self.pending);

        // Locate the opening brace, skipping padding between frames.
        loop {
            match buf.iter().position(|&b| !is_padding(b)) {
                Some(i) if buf[i] == b'{' => {
                    self.position += i as u64;
                    buf.drain(..i);
                    break;
                }
                Some(i) => {
                    let offset = self.position + i as u64;
                    self.position += buf.len() as u64;
                    return Err(ImageError::malformed(
                        offset,
                        format!("expected '{{' but found byte 0x{:02x}", buf[i]),
                    ));
                }
                None => {
                    self.position += buf.len() as u64;
                    buf.clear();
                    if self.read_block(&mut buf)? == 0 {
                        return Ok(Scan::End);
                    }
                }
            }
        }

        let offset = self.position;
        let mut state = Terminator::Open;
        let mut scanned = 1; // the '{'
        loop {
            let found = buf[scanned..]
                .iter()
                .position(|&b| state.step(b))
                .map(|i| scanned + i + 1);
            if let Some(end) = found {
                self.pending = buf.split_off(end);
                self.position = offset + end as u64;
                tracing::trace!("header block at {offset}, {end} bytes");
                return Ok(Scan::Header(RawHeader { offset, bytes: buf, data_offset: self.position }));
            }
            scanned = buf.len();
            if buf.len() > max_header_size {
                self.position = offset + buf.len() as u64;
                return Err(ImageError::malformed(
                    offset,
                    format!("no header terminator within {max_header_size} bytes"),
                ));
            }
            if self.read_block(&mut buf)? == 0 {
                self.position = offset + buf.len() as u64;
                return Ok(Scan::Truncated { offset });
            }
        }
    }

    /// Read up to `len` data bytes; a shorter result means end of stream.
    pub fn read_data(&mut self, len: u64) -> io::Result<Vec<u8>> {
        let len = usize::try_from(len).map_err(|_| io::Error::new(ErrorKind::InvalidInput, "blob too large"))?;
        let mut out = if self.pending.len() >= len {
            let rest = self.pending.split_off(len);
            std::mem::replace(&mut self.pending, rest)
        } else {
            std::mem::take(&mut self.pending)
        };
        let want = (len - out.len()) as u64;
        if want > 0 {
            (&mut self.inner).take(want).read_to_end(&mut out)?;
        }
        self.position += out.len() as u64;
        Ok(out)
    }

    /// Discard up to `len` bytes without keeping them; returns bytes skipped.
    pub fn skip(&mut self, len: u64) -> io::Result<u64> {
        let from_pending = (self.pending.len() as u64).min(len);
        self.pending.drain(..from_pending as usize);
        let skipped = from_pending + io::copy(&mut (&mut self.inner).take(len - from_pending), &mut io::sink())?;
        self.position += skipped;
        Ok(skipped)
    }
}

impl<R: Read + Seek> HeaderScanner<R> {
    /// Jump to absolute `offset`, dropping buffered bytes.
    pub fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.pending.clear();
        self.position = offset;
        Ok(())
    }
}

/// Whitespace and NUL padding allowed between a blob and the next header.
#[inline]
fn is_padding(b: u8) -> bool {
    b.is_ascii_whitespace() || b == 0
}
