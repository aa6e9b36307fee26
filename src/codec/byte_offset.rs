//! Byte-offset delta compression for integer pixel streams.
//!
//! Each value is stored as the difference from its predecessor (the first
//! from zero).  Differences in `-127..=127` take one byte.  Wider ones are
//! escaped:
//!
//! | prefix                    | payload        |
//! |---------------------------|----------------|
//! | `80`                      | i16 LE         |
//! | `80 00 80`                | i32 LE         |
//! | `80 00 80 00 00 00 80`    | i64 LE         |
//!
//! A payload equal to its own sentinel (`-32768`, `i32::MIN`) is never
//! written, so the decoder can always tell an escape from a value.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::CodecError;

const ESCAPE_8:  u8  = 0x80;
const ESCAPE_16: i16 = i16::MIN;
const ESCAPE_32: i32 = i32::MIN;

/// Encode 32-bit values.
pub fn encode(values: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() + values.len() / 8);
    let mut previous = 0i64;
    for &v in values {
        let v = v as i64;
        push_delta(&mut out, v - previous);
        previous = v;
    }
    out
}

/// Encode 64-bit values.  Differences are computed with wrapping arithmetic,
/// which the decoder's wrapping sum reverses exactly.
pub fn encode_i64(values: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() + values.len() / 8);
    let mut previous = 0i64;
    for &v in values {
        push_delta(&mut out, v.wrapping_sub(previous));
        previous = v;
    }
    out
}

fn push_delta(out: &mut Vec<u8>, delta: i64) {
    if (-127..=127).contains(&delta) {
        out.push(delta as i8 as u8);
        return;
    }
    out.push(ESCAPE_8);
    if (-(i16::MAX as i64)..=i16::MAX as i64).contains(&delta) {
        out.extend_from_slice(&(delta as i16).to_le_bytes());
        return;
    }
    out.extend_from_slice(&ESCAPE_16.to_le_bytes());
    if (-(i32::MAX as i64)..=i32::MAX as i64).contains(&delta) {
        out.extend_from_slice(&(delta as i32).to_le_bytes());
        return;
    }
    out.extend_from_slice(&ESCAPE_32.to_le_bytes());
    out.extend_from_slice(&delta.to_le_bytes());
}

/// Decode a complete stream into 64-bit values.
pub fn decode(data: &[u8]) -> Result<Vec<i64>, CodecError> {
    decode_with_capacity(data, data.len())
}

/// Decode, pre-sizing the output for `expected` values.
pub fn decode_with_capacity(data: &[u8], expected: usize) -> Result<Vec<i64>, CodecError> {
    let mut out = Vec::with_capacity(expected);
    let mut cur = Cursor::new(data);
    let mut acc = 0i64;
    let len = data.len() as u64;
    while cur.position() < len {
        let delta = read_delta(&mut cur).map_err(|_| {
            CodecError::Decompression(format!(
                "byte-offset stream truncated inside an escape at byte {} (after {} values)",
                cur.position(),
                out.len()
            ))
        })?;
        acc = acc.wrapping_add(delta);
        out.push(acc);
    }
    Ok(out)
}

/// Decode into 32-bit values (wrapping on overflow).
pub fn decode_i32(data: &[u8]) -> Result<Vec<i32>, CodecError> {
    Ok(decode(data)?.into_iter().map(|v| v as i32).collect())
}

fn read_delta(cur: &mut Cursor<&[u8]>) -> std::io::Result<i64> {
    let b = cur.read_u8()?;
    if b != ESCAPE_8 {
        return Ok(b as i8 as i64);
    }
    let d16 = cur.read_i16::<LittleEndian>()?;
    if d16 != ESCAPE_16 {
        return Ok(d16 as i64);
    }
    let d32 = cur.read_i32::<LittleEndian>()?;
    if d32 != ESCAPE_32 {
        return Ok(d32 as i64);
    }
    cur.read_i64::<LittleEndian>()
}
