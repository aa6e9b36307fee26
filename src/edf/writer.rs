//! EDF writer.
//!
//! Every frame gets a header block padded with spaces to a multiple of 512
//! bytes and closed by `}\n`.  Structural keys come first and are always
//! regenerated from the pixels; the frame's own keys follow in their
//! original order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::header::{
    data_type_name, is_block_key, KEY_BINARY_SIZE, KEY_BLOB_FILE, KEY_BLOB_POSITION, KEY_BLOB_SIZE,
    KEY_BLOCK_ID, KEY_BYTE_ORDER, KEY_COMPRESSION, KEY_DATA_TYPE, KEY_HEADER_ID, KEY_IMAGE, KEY_SIZE,
    KEY_VERSION,
};
use super::scanner::BLOCK_SIZE;
use crate::codec::{compress_pixels, CompressionKind};
use crate::error::{ImageError, Result};
use crate::frame::Frame;
use crate::header::Header;
use crate::pixel::ByteOrder;

pub const FORMAT_VERSION: &str = "2.30";

#[derive(Debug, Clone)]
pub struct EdfWriteOptions {
    pub byte_order:     ByteOrder,
    pub compression:    CompressionKind,
    /// Written as a leading general block when set.
    pub general_header: Option<Header>,
}

impl Default for EdfWriteOptions {
    fn default() -> Self {
        Self {
            byte_order:     ByteOrder::LowByteFirst,
            compression:    CompressionKind::None,
            general_header: None,
        }
    }
}

/// Keys the writer generates itself.
fn is_generated_key(key: &str) -> bool {
    is_block_key(key)
        || [KEY_COMPRESSION, KEY_BLOB_FILE, KEY_BLOB_POSITION, KEY_BLOB_SIZE]
            .iter()
            .any(|k| k.eq_ignore_ascii_case(key))
}

/// Close `text` with `}\n`, padding with spaces to a 512-byte multiple.
fn finish_block(mut text: String) -> Vec<u8> {
    const TERMINATOR: &str = "}\n";
    let total = (text.len() + TERMINATOR.len()).div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    let pad = total - text.len() - TERMINATOR.len();
    text.extend(std::iter::repeat(' ').take(pad));
    text.push_str(TERMINATOR);
    text.into_bytes()
}

fn push_key(text: &mut String, key: &str, value: &str) {
    if value.contains(';') || value.contains('}') {
        tracing::warn!("header value for '{key}' contains a delimiter and will not read back intact");
    }
    text.push_str(key);
    text.push_str(" = ");
    text.push_str(value);
    text.push_str(" ;\n");
}

fn general_block(general: &Header) -> Vec<u8> {
    let mut text = String::from("{\n");
    push_key(&mut text, KEY_VERSION, FORMAT_VERSION);
    push_key(&mut text, KEY_BINARY_SIZE, "0");
    for (key, value) in general.iter() {
        if !is_generated_key(key) {
            push_key(&mut text, key, value);
        }
    }
    finish_block(text)
}

/// Header block and blob for frame `index`.
fn frame_block(index: usize, frame: &Frame, options: &EdfWriteOptions) -> Result<(Vec<u8>, Vec<u8>)> {
    let pixels = frame.data()?;
    if !options.compression.is_block_codec() && pixels.dtype().is_float() {
        return Err(ImageError::UnsupportedCompression(format!(
            "{} cannot store {} pixels (frame {index})",
            options.compression.name(),
            data_type_name(pixels.dtype()),
        )));
    }
    let raw = pixels.to_bytes(options.byte_order);
    let blob = match options.compression {
        CompressionKind::None => raw,
        kind => compress_pixels(kind, pixels, &raw)?,
    };

    let mut dims: Vec<usize> = frame.shape().to_vec();
    if dims.is_empty() {
        dims.push(pixels.len());
    }
    dims.reverse();

    let mut text = String::from("{\n");
    push_key(&mut text, KEY_BLOCK_ID, &format!("{index}.Image.Psd"));
    push_key(&mut text, KEY_BINARY_SIZE, &blob.len().to_string());
    push_key(&mut text, KEY_BYTE_ORDER, options.byte_order.name());
    push_key(&mut text, KEY_DATA_TYPE, data_type_name(pixels.dtype()));
    for (axis, dim) in dims.iter().enumerate() {
        push_key(&mut text, &format!("Dim_{}", axis + 1), &dim.to_string());
    }
    push_key(&mut text, KEY_IMAGE, &(index + 1).to_string());
    push_key(&mut text, KEY_HEADER_ID, &format!("EH:{:06}:000000:000000", index + 1));
    push_key(&mut text, KEY_SIZE, &blob.len().to_string());
    if options.compression != CompressionKind::None {
        push_key(&mut text, KEY_COMPRESSION, options.compression.name());
    }
    for (key, value) in frame.header().iter() {
        if !is_generated_key(key) {
            push_key(&mut text, key, value);
        }
    }
    Ok((finish_block(text), blob))
}

/// Serialize `frames` to any writer.
pub fn write_edf_to<W: Write>(mut out: W, frames: &[Frame], options: &EdfWriteOptions) -> Result<()> {
    if let Some(general) = &options.general_header {
        out.write_all(&general_block(general))?;
    }
    for (index, frame) in frames.iter().enumerate() {
        let (header, blob) = frame_block(index, frame, options)?;
        out.write_all(&header)?;
        out.write_all(&blob)?;
    }
    out.flush()?;
    Ok(())
}

/// Write `frames` to a new file at `path`.
pub fn write_edf(path: impl AsRef<Path>, frames: &[Frame], options: &EdfWriteOptions) -> Result<()> {
    let path = path.as_ref();
    let out = BufWriter::new(File::create(path)?);
    write_edf_to(out, frames, options)?;
    tracing::debug!("wrote {} frames to {}", frames.len(), path.display());
    Ok(())
}
