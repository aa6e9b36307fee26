//! Typed pixel planes.
//!
//! Every container decodes to a [`PixelData`] whose element type is decided
//! per format.  Raw bytes are converted with `byteorder`; when the on-disk
//! byte order differs from the host the buffer is swapped in place first,
//! element by element (1-byte types are never swapped).

use byteorder::{ByteOrder as _, NativeEndian, BigEndian, LittleEndian};
use serde::{Deserialize, Serialize};

// ── Element type ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DataType {
    /// Element width in bytes.
    #[inline]
    pub fn width(self) -> usize {
        match self {
            DataType::I8  | DataType::U8  => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::I8  => "int8",
            DataType::U8  => "uint8",
            DataType::I16 => "int16",
            DataType::U16 => "uint16",
            DataType::I32 => "int32",
            DataType::U32 => "uint32",
            DataType::I64 => "int64",
            DataType::U64 => "uint64",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        }
    }

    /// Unsigned integer type of the given width, used when a header names an
    /// element type we do not know and only the byte width can be inferred.
    pub fn unsigned_of_width(width: usize) -> Option<Self> {
        match width {
            1 => Some(DataType::U8),
            2 => Some(DataType::U16),
            4 => Some(DataType::U32),
            8 => Some(DataType::U64),
            _ => None,
        }
    }
}

// ── Byte order ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    LowByteFirst,
    HighByteFirst,
}

impl ByteOrder {
    #[inline]
    pub fn host() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::LowByteFirst
        } else {
            ByteOrder::HighByteFirst
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ByteOrder::LowByteFirst  => "LowByteFirst",
            ByteOrder::HighByteFirst => "HighByteFirst",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("LowByteFirst") {
            Some(ByteOrder::LowByteFirst)
        } else if s.eq_ignore_ascii_case("HighByteFirst") {
            Some(ByteOrder::HighByteFirst)
        } else {
            None
        }
    }
}

/// Reverse every `width`-byte element of `buf` in place.
///
/// Trailing bytes that do not fill a whole element are left untouched.
pub fn swap_in_place(buf: &mut [u8], width: usize) {
    if width <= 1 {
        return;
    }
    for element in buf.chunks_exact_mut(width) {
        element.reverse();
    }
}

// ── Pixel data ───────────────────────────────────────────────────────────────

/// Pixel values of one plane, typed by element type.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! for_each_variant {
    ($value:expr, $v:ident => $body:expr) => {
        match $value {
            PixelData::I8($v)  => $body,
            PixelData::U8($v)  => $body,
            PixelData::I16($v) => $body,
            PixelData::U16($v) => $body,
            PixelData::I32($v) => $body,
            PixelData::U32($v) => $body,
            PixelData::I64($v) => $body,
            PixelData::U64($v) => $body,
            PixelData::F32($v) => $body,
            PixelData::F64($v) => $body,
        }
    };
}

impl PixelData {
    pub fn dtype(&self) -> DataType {
        match self {
            PixelData::I8(_)  => DataType::I8,
            PixelData::U8(_)  => DataType::U8,
            PixelData::I16(_) => DataType::I16,
            PixelData::U16(_) => DataType::U16,
            PixelData::I32(_) => DataType::I32,
            PixelData::U32(_) => DataType::U32,
            PixelData::I64(_) => DataType::I64,
            PixelData::U64(_) => DataType::U64,
            PixelData::F32(_) => DataType::F32,
            PixelData::F64(_) => DataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All-zero plane of `len` elements.
    pub fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::I8  => PixelData::I8(vec![0; len]),
            DataType::U8  => PixelData::U8(vec![0; len]),
            DataType::I16 => PixelData::I16(vec![0; len]),
            DataType::U16 => PixelData::U16(vec![0; len]),
            DataType::I32 => PixelData::I32(vec![0; len]),
            DataType::U32 => PixelData::U32(vec![0; len]),
            DataType::I64 => PixelData::I64(vec![0; len]),
            DataType::U64 => PixelData::U64(vec![0; len]),
            DataType::F32 => PixelData::F32(vec![0.0; len]),
            DataType::F64 => PixelData::F64(vec![0.0; len]),
        }
    }

    /// Interpret `bytes` as elements of `dtype` stored in `order`.
    ///
    /// The buffer is consumed; if `order` is not the host order it is
    /// swapped in place before conversion.  A trailing partial element is
    /// discarded.
    pub fn from_bytes(dtype: DataType, mut bytes: Vec<u8>, order: ByteOrder) -> Self {
        let width = dtype.width();
        bytes.truncate(bytes.len() / width * width);
        if order != ByteOrder::host() {
            swap_in_place(&mut bytes, width);
        }
        let n = bytes.len() / width;
        match dtype {
            DataType::U8 => PixelData::U8(bytes),
            DataType::I8 => PixelData::I8(bytes.into_iter().map(|b| b as i8).collect()),
            DataType::I16 => {
                let mut out = vec![0i16; n];
                NativeEndian::read_i16_into(&bytes, &mut out);
                PixelData::I16(out)
            }
            DataType::U16 => {
                let mut out = vec![0u16; n];
                NativeEndian::read_u16_into(&bytes, &mut out);
                PixelData::U16(out)
            }
            DataType::I32 => {
                let mut out = vec![0i32; n];
                NativeEndian::read_i32_into(&bytes, &mut out);
                PixelData::I32(out)
            }
            DataType::U32 => {
                let mut out = vec![0u32; n];
                NativeEndian::read_u32_into(&bytes, &mut out);
                PixelData::U32(out)
            }
            DataType::I64 => {
                let mut out = vec![0i64; n];
                NativeEndian::read_i64_into(&bytes, &mut out);
                PixelData::I64(out)
            }
            DataType::U64 => {
                let mut out = vec![0u64; n];
                NativeEndian::read_u64_into(&bytes, &mut out);
                PixelData::U64(out)
            }
            DataType::F32 => {
                let mut out = vec![0f32; n];
                NativeEndian::read_f32_into(&bytes, &mut out);
                PixelData::F32(out)
            }
            DataType::F64 => {
                let mut out = vec![0f64; n];
                NativeEndian::read_f64_into(&bytes, &mut out);
                PixelData::F64(out)
            }
        }
    }

    /// Serialize to raw bytes in the requested order.
    pub fn to_bytes(&self, order: ByteOrder) -> Vec<u8> {
        match order {
            ByteOrder::LowByteFirst  => self.write_with::<LittleEndian>(),
            ByteOrder::HighByteFirst => self.write_with::<BigEndian>(),
        }
    }

    fn write_with<E: byteorder::ByteOrder>(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len() * self.dtype().width()];
        match self {
            PixelData::I8(v)  => out.iter_mut().zip(v).for_each(|(o, &x)| *o = x as u8),
            PixelData::U8(v)  => out.copy_from_slice(v),
            PixelData::I16(v) => E::write_i16_into(v, &mut out),
            PixelData::U16(v) => E::write_u16_into(v, &mut out),
            PixelData::I32(v) => E::write_i32_into(v, &mut out),
            PixelData::U32(v) => E::write_u32_into(v, &mut out),
            PixelData::I64(v) => E::write_i64_into(v, &mut out),
            PixelData::U64(v) => E::write_u64_into(v, &mut out),
            PixelData::F32(v) => E::write_f32_into(v, &mut out),
            PixelData::F64(v) => E::write_f64_into(v, &mut out),
        }
        out
    }

    /// Build a plane of `dtype` from integer values, casting with `as`
    /// semantics (wrapping for narrower integer types).
    pub fn from_i64(dtype: DataType, values: &[i64]) -> Self {
        match dtype {
            DataType::I8  => PixelData::I8(values.iter().map(|&x| x as i8).collect()),
            DataType::U8  => PixelData::U8(values.iter().map(|&x| x as u8).collect()),
            DataType::I16 => PixelData::I16(values.iter().map(|&x| x as i16).collect()),
            DataType::U16 => PixelData::U16(values.iter().map(|&x| x as u16).collect()),
            DataType::I32 => PixelData::I32(values.iter().map(|&x| x as i32).collect()),
            DataType::U32 => PixelData::U32(values.iter().map(|&x| x as u32).collect()),
            DataType::I64 => PixelData::I64(values.to_vec()),
            DataType::U64 => PixelData::U64(values.iter().map(|&x| x as u64).collect()),
            DataType::F32 => PixelData::F32(values.iter().map(|&x| x as f32).collect()),
            DataType::F64 => PixelData::F64(values.iter().map(|&x| x as f64).collect()),
        }
    }

    /// Integer view of the plane.  Floats are truncated toward zero.
    pub fn to_i64_vec(&self) -> Vec<i64> {
        match self {
            PixelData::I8(v)  => v.iter().map(|&x| x as i64).collect(),
            PixelData::U8(v)  => v.iter().map(|&x| x as i64).collect(),
            PixelData::I16(v) => v.iter().map(|&x| x as i64).collect(),
            PixelData::U16(v) => v.iter().map(|&x| x as i64).collect(),
            PixelData::I32(v) => v.iter().map(|&x| x as i64).collect(),
            PixelData::U32(v) => v.iter().map(|&x| x as i64).collect(),
            PixelData::I64(v) => v.clone(),
            PixelData::U64(v) => v.iter().map(|&x| x as i64).collect(),
            PixelData::F32(v) => v.iter().map(|&x| x as i64).collect(),
            PixelData::F64(v) => v.iter().map(|&x| x as i64).collect(),
        }
    }
}

// ── Image ────────────────────────────────────────────────────────────────────

/// A pixel plane together with its shape (row-major, slowest axis first).
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub data:  PixelData,
    pub shape: Vec<usize>,
}

impl Image {
    pub fn new(data: PixelData, shape: Vec<usize>) -> Self {
        Self { data, shape }
    }

    pub fn zeros(dtype: DataType, shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Self { data: PixelData::zeros(dtype, n), shape }
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn npixels(&self) -> usize {
        self.shape.iter().product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapped_u16_roundtrip() {
        let data = PixelData::U16(vec![0x0102, 0xA0B0, 7]);
        let be = data.to_bytes(ByteOrder::HighByteFirst);
        assert_eq!(&be[..2], &[0x01, 0x02]);
        assert_eq!(PixelData::from_bytes(DataType::U16, be, ByteOrder::HighByteFirst), data);
    }

    #[test]
    fn serialized_layout_per_order() {
        assert_eq!(PixelData::I8(vec![-1, 2]).to_bytes(ByteOrder::HighByteFirst), [0xFF, 0x02]);
        assert_eq!(PixelData::I32(vec![-2]).to_bytes(ByteOrder::HighByteFirst), [0xFF, 0xFF, 0xFF, 0xFE]);
        assert_eq!(PixelData::I32(vec![-2]).to_bytes(ByteOrder::LowByteFirst), [0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(PixelData::F64(vec![1.0]).to_bytes(ByteOrder::HighByteFirst), 1.0f64.to_be_bytes());
        assert!(PixelData::U64(Vec::new()).to_bytes(ByteOrder::LowByteFirst).is_empty());
    }

    #[test]
    fn single_byte_types_never_swap() {
        let mut buf = vec![1u8, 2, 3];
        swap_in_place(&mut buf, 1);
        assert_eq!(buf, [1, 2, 3]);
        let px = PixelData::from_bytes(DataType::I8, vec![0xFF, 0x01], ByteOrder::HighByteFirst);
        assert_eq!(px, PixelData::I8(vec![-1, 1]));
    }

    #[test]
    fn partial_trailing_element_is_dropped() {
        let px = PixelData::from_bytes(DataType::I32, vec![1, 0, 0, 0, 9, 9], ByteOrder::LowByteFirst);
        assert_eq!(px, PixelData::I32(vec![1]));
    }

    #[test]
    fn float_conversion_little_endian() {
        let px = PixelData::F64(vec![1.5, -2.25]);
        let bytes = px.to_bytes(ByteOrder::LowByteFirst);
        assert_eq!(PixelData::from_bytes(DataType::F64, bytes, ByteOrder::LowByteFirst), px);
    }

    #[test]
    fn from_i64_wraps_like_a_cast() {
        assert_eq!(PixelData::from_i64(DataType::U8, &[256, -1]), PixelData::U8(vec![0, 255]));
    }
}
