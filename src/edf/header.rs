//! EDF header text parsing and per-frame layout.

use std::path::{Path, PathBuf};

use crate::codec::CompressionKind;
use crate::error::{ImageError, Result};
use crate::header::Header;
use crate::pixel::{ByteOrder, DataType};

// ── Key names ────────────────────────────────────────────────────────────────

pub const KEY_VERSION:       &str = "EDF_DataFormatVersion";
pub const KEY_BLOCK_ID:      &str = "EDF_DataBlockID";
pub const KEY_BINARY_SIZE:   &str = "EDF_BinarySize";
pub const KEY_HEADER_SIZE:   &str = "EDF_HeaderSize";
pub const KEY_BLOB_FILE:     &str = "EDF_BinaryFileName";
pub const KEY_BLOB_POSITION: &str = "EDF_BinaryFilePosition";
pub const KEY_BLOB_SIZE:     &str = "EDF_BinaryFileSize";
pub const KEY_SIZE:          &str = "Size";
pub const KEY_BYTE_ORDER:    &str = "ByteOrder";
pub const KEY_DATA_TYPE:     &str = "DataType";
pub const KEY_IMAGE:         &str = "Image";
pub const KEY_HEADER_ID:     &str = "HeaderID";
pub const KEY_COMPRESSION:   &str = "Compression";

/// Keys describing a single block; never inherited from the general header.
const BLOCK_KEYS: &[&str] = &[
    KEY_SIZE, KEY_BINARY_SIZE, KEY_HEADER_SIZE, KEY_BYTE_ORDER, KEY_DATA_TYPE,
    KEY_IMAGE, KEY_HEADER_ID, KEY_BLOCK_ID, KEY_VERSION,
];

pub fn is_dim_key(key: &str) -> bool {
    match (key.get(..4), key.get(4..)) {
        (Some(prefix), Some(n)) => {
            prefix.eq_ignore_ascii_case("Dim_") && !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())
        }
        _ => false,
    }
}

/// True for keys that belong to one block only.
pub fn is_block_key(key: &str) -> bool {
    is_dim_key(key) || BLOCK_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

// ── Data type names ──────────────────────────────────────────────────────────

const DATA_TYPES: &[(&str, DataType)] = &[
    ("SignedByte",           DataType::I8),
    ("UnsignedByte",         DataType::U8),
    ("SignedShort",          DataType::I16),
    ("UnsignedShort",        DataType::U16),
    ("UnsignedShortInteger", DataType::U16),
    ("SignedInteger",        DataType::I32),
    ("UnsignedInteger",      DataType::U32),
    ("SignedLong",           DataType::I32),
    ("UnsignedLong",         DataType::U32),
    ("Signed32",             DataType::I32),
    ("Unsigned32",           DataType::U32),
    ("Signed64",             DataType::I64),
    ("Unsigned64",           DataType::U64),
    ("FloatValue",           DataType::F32),
    ("Float",                DataType::F32),
    ("FloatIEEE32",          DataType::F32),
    ("Real",                 DataType::F32),
    ("DoubleValue",          DataType::F64),
    ("Double",               DataType::F64),
    ("DoubleIEEE64",         DataType::F64),
];

pub fn data_type_from_name(name: &str) -> Option<DataType> {
    DATA_TYPES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name.trim()))
        .map(|(_, t)| *t)
}

/// Canonical name written by the EDF writer.
pub fn data_type_name(dtype: DataType) -> &'static str {
    match dtype {
        DataType::I8  => "SignedByte",
        DataType::U8  => "UnsignedByte",
        DataType::I16 => "SignedShort",
        DataType::U16 => "UnsignedShort",
        DataType::I32 => "SignedInteger",
        DataType::U32 => "UnsignedInteger",
        DataType::I64 => "Signed64",
        DataType::U64 => "Unsigned64",
        DataType::F32 => "FloatValue",
        DataType::F64 => "DoubleValue",
    }
}

// ── Text parsing ─────────────────────────────────────────────────────────────

fn trim_value(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0')
}

/// Parse a raw `{ ... }` block into an ordered header.
///
/// Statements are separated by `;` and split on their first `=`.  Keys and
/// values are trimmed of whitespace and NUL.  Non-ASCII statements are
/// dropped; a repeated key keeps its first position and takes the last value.
pub fn parse_block(bytes: &[u8], offset: u64) -> Header {
    let body = bytes.strip_prefix(b"{").unwrap_or(bytes);
    let body = match body.iter().rposition(|&b| b == b'}') {
        Some(end) => &body[..end],
        None => body,
    };

    let mut header = Header::new();
    for statement in body.split(|&b| b == b';') {
        if !statement.is_ascii() {
            tracing::warn!("header at byte {offset}: dropping non-ASCII line");
            continue;
        }
        // ASCII was checked above.
        let Ok(text) = std::str::from_utf8(statement) else { continue };
        let Some((key, value)) = text.split_once('=') else {
            if !trim_value(text).is_empty() {
                tracing::debug!("header at byte {offset}: ignoring '{}'", trim_value(text));
            }
            continue;
        };
        let key = trim_value(key);
        if key.is_empty() {
            continue;
        }
        if header.insert(key, trim_value(value)).is_some() {
            tracing::warn!("header at byte {offset}: duplicate key '{key}', keeping last value");
        }
    }
    header
}

/// A block carrying the format version is the file-scope general header.
pub fn is_general_block(header: &Header) -> bool {
    header.contains_key_ignore_case(KEY_VERSION)
}

/// Frame header with general-header keys appended where the frame does not
/// define them.  Block-scoped keys are never inherited.
pub fn inherit(mut frame: Header, general: Option<&Header>) -> Header {
    if let Some(general) = general {
        for (key, value) in general.iter() {
            if !is_block_key(key) && !frame.contains_key_ignore_case(key) {
                frame.insert(key, value);
            }
        }
    }
    frame
}

// ── Frame layout ─────────────────────────────────────────────────────────────

/// Where a frame's pixel blob lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobLocation {
    Inline { offset: u64 },
    External { path: PathBuf, offset: u64 },
}

/// Everything needed to locate and decode one frame.
#[derive(Debug, Clone)]
pub struct FrameLayout {
    /// Slowest axis first (`Dim_N, ..., Dim_1`).
    pub shape:       Vec<usize>,
    pub dtype:       DataType,
    pub byte_order:  ByteOrder,
    pub compression: CompressionKind,
    pub blob:        BlobLocation,
    /// Bytes the blob occupies in its file.
    pub stored_len:  u64,
    /// Bytes to read: for raw blobs the shorter of declared and computed.
    pub read_len:    u64,
}

impl FrameLayout {
    /// Pixel count.  Cannot overflow: [`from_header`](Self::from_header)
    /// rejects shapes whose byte size does not fit in `usize`.
    pub fn npixels(&self) -> usize {
        self.shape.iter().product()
    }

    /// Uncompressed size in bytes.
    pub fn expected_len(&self) -> usize {
        self.npixels() * self.dtype.width()
    }

    /// Inline bytes following the header before the next block starts.
    pub fn inline_len(&self) -> u64 {
        match self.blob {
            BlobLocation::Inline { .. } => self.stored_len,
            BlobLocation::External { .. } => 0,
        }
    }

    /// Derive the layout from a merged frame header.
    ///
    /// `data_offset` is the absolute offset right after the header block and
    /// `directory` resolves relative external blob names.
    pub fn from_header(header: &Header, offset: u64, data_offset: u64, directory: Option<&Path>) -> Result<Self> {
        let shape = parse_dims(header, offset)?;
        let npixels = shape
            .iter()
            .try_fold(1usize, |n, &d| n.checked_mul(d))
            .ok_or_else(|| ImageError::malformed(offset, format!("dimensions {shape:?} overflow the pixel count")))?;

        let declared = match header
            .get_ignore_case(KEY_BINARY_SIZE)
            .or_else(|| header.get_ignore_case(KEY_SIZE))
        {
            Some(v) => Some(parse_u64(v, KEY_SIZE, offset)?),
            None => None,
        };

        let compression = match header.get_ignore_case(KEY_COMPRESSION) {
            None => CompressionKind::None,
            Some(name) => CompressionKind::from_name(name).unwrap_or_else(|| {
                tracing::warn!("header at byte {offset}: unknown compression '{name}', reading raw bytes");
                CompressionKind::None
            }),
        };

        let dtype = resolve_dtype(header, npixels, declared, compression, offset)?;

        let byte_order = match header.get_ignore_case(KEY_BYTE_ORDER) {
            Some(v) => ByteOrder::from_name(v).unwrap_or_else(|| {
                tracing::warn!("header at byte {offset}: unknown byte order '{v}', assuming LowByteFirst");
                ByteOrder::LowByteFirst
            }),
            None => ByteOrder::LowByteFirst,
        };

        let expected = npixels
            .checked_mul(dtype.width())
            .ok_or_else(|| ImageError::malformed(offset, format!("dimensions {shape:?} overflow the frame size")))?
            as u64;
        let (stored_len, read_len) = match (compression, declared) {
            (CompressionKind::None, Some(declared)) => {
                if declared != expected {
                    let mismatch = ImageError::SizeMismatch { declared, expected };
                    tracing::warn!("header at byte {offset}: {mismatch}; padding or truncating");
                }
                (declared, declared.min(expected))
            }
            (CompressionKind::None, None) => (expected, expected),
            (_, Some(declared)) => (declared, declared),
            (kind, None) => {
                return Err(ImageError::malformed(
                    offset,
                    format!("{} compressed frame without {KEY_SIZE}", kind.name()),
                ))
            }
        };

        let blob = match header.get_ignore_case(KEY_BLOB_FILE) {
            Some(name) => {
                let position = match header.get_ignore_case(KEY_BLOB_POSITION) {
                    Some(v) => parse_u64(v, KEY_BLOB_POSITION, offset)?,
                    None => 0,
                };
                let path = match directory {
                    Some(dir) => dir.join(name),
                    None => PathBuf::from(name),
                };
                BlobLocation::External { path, offset: position }
            }
            None => BlobLocation::Inline { offset: data_offset },
        };

        // An explicit external size overrides the declared one.
        let (stored_len, read_len) = match (&blob, header.get_ignore_case(KEY_BLOB_SIZE)) {
            (BlobLocation::External { .. }, Some(v)) => {
                let size = parse_u64(v, KEY_BLOB_SIZE, offset)?;
                let read = if compression == CompressionKind::None { size.min(expected) } else { size };
                (size, read)
            }
            _ => (stored_len, read_len),
        };

        Ok(Self { shape, dtype, byte_order, compression, blob, stored_len, read_len })
    }
}

fn parse_u64(value: &str, key: &str, offset: u64) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| ImageError::malformed(offset, format!("{key} is not an integer: '{value}'")))
}

/// `Dim_1..Dim_N`, returned slowest axis first.
fn parse_dims(header: &Header, offset: u64) -> Result<Vec<usize>> {
    let mut dims = Vec::new();
    while let Some(v) = header.get_ignore_case(&format!("Dim_{}", dims.len() + 1)) {
        let dim = parse_u64(v, "Dim", offset)?;
        let dim = usize::try_from(dim)
            .map_err(|_| ImageError::malformed(offset, format!("Dim_{} = {dim} does not fit in memory", dims.len() + 1)))?;
        dims.push(dim);
    }
    if dims.is_empty() {
        return Err(ImageError::malformed(offset, "no Dim_1 in header"));
    }
    dims.reverse();
    Ok(dims)
}

fn resolve_dtype(
    header:      &Header,
    npixels:     usize,
    declared:    Option<u64>,
    compression: CompressionKind,
    offset:      u64,
) -> Result<DataType> {
    let name = header.get_ignore_case(KEY_DATA_TYPE);
    if let Some(dtype) = name.and_then(data_type_from_name) {
        return Ok(dtype);
    }
    // Width can only be inferred from an uncompressed size.
    let inferred = match (compression, declared) {
        (CompressionKind::None, Some(size)) if npixels > 0 && size % npixels as u64 == 0 => {
            DataType::unsigned_of_width((size / npixels as u64) as usize)
        }
        _ => None,
    };
    match (name, inferred) {
        (Some(name), Some(dtype)) => {
            tracing::warn!("header at byte {offset}: unknown DataType '{name}', using {}", dtype.name());
            Ok(dtype)
        }
        (None, Some(dtype)) => {
            tracing::warn!("header at byte {offset}: no DataType, using {}", dtype.name());
            Ok(dtype)
        }
        (None, None) => {
            tracing::warn!("header at byte {offset}: no DataType, assuming UnsignedShort");
            Ok(DataType::U16)
        }
        (Some(name), None) => Err(ImageError::UnsupportedElementType(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(text: &str) -> Header {
        parse_block(text.as_bytes(), 0)
    }

    #[test]
    fn parses_statements_in_order() {
        let h = header("{\nHeaderID = EH:000001:000000:000000 ;\nImage = 1 ;\n key1 = value 1 ;\n}\n");
        let keys: Vec<_> = h.keys().collect();
        assert_eq!(keys, ["HeaderID", "Image", "key1"]);
        assert_eq!(h.get("key1"), Some("value 1"));
    }

    #[test]
    fn value_keeps_embedded_equals() {
        let h = header("{ Title = a=b ; }\n");
        assert_eq!(h.get("Title"), Some("a=b"));
    }

    #[test]
    fn drops_non_ascii_and_nul_padding() {
        let mut raw = b"{\nGood = 1 ;\nBad = \xc3\xa9 ;\nPadded = 2\0\0 ;\n".to_vec();
        raw.extend_from_slice(b"}\n");
        let h = parse_block(&raw, 0);
        assert_eq!(h.get("Good"), Some("1"));
        assert_eq!(h.get("Bad"), None);
        assert_eq!(h.get("Padded"), Some("2"));
    }

    #[test]
    fn duplicate_key_keeps_last_value() {
        let h = header("{ A = 1 ; B = 2 ; A = 3 ; }\n");
        assert_eq!(h.keys().collect::<Vec<_>>(), ["A", "B"]);
        assert_eq!(h.get("A"), Some("3"));
    }

    #[test]
    fn general_keys_are_inherited_except_block_keys() {
        let general = header("{ EDF_DataFormatVersion = 2.30 ; Title = run ; Size = 99 ; Dim_1 = 7 ; }\n");
        assert!(is_general_block(&general));
        let frame = inherit(header("{ Dim_1 = 2 ; title = own ; }\n"), Some(&general));
        assert_eq!(frame.get("Dim_1"), Some("2"));
        assert_eq!(frame.get("Size"), None);
        // Case-insensitive: the frame's own `title` shadows `Title`.
        assert_eq!(frame.get("Title"), None);
    }

    #[test]
    fn layout_shape_is_slowest_first() {
        let h = header("{ Dim_1 = 10 ; Dim_2 = 3 ; DataType = SignedInteger ; ByteOrder = HighByteFirst ; }\n");
        let l = FrameLayout::from_header(&h, 0, 512, None).unwrap();
        assert_eq!(l.shape, [3, 10]);
        assert_eq!(l.dtype, DataType::I32);
        assert_eq!(l.byte_order, ByteOrder::HighByteFirst);
        assert_eq!(l.stored_len, 120);
        assert_eq!(l.blob, BlobLocation::Inline { offset: 512 });
    }

    #[test]
    fn declared_size_governs_storage_and_shorter_governs_reads() {
        let h = header("{ Dim_1 = 4 ; DataType = UnsignedByte ; Size = 6 ; }\n");
        let l = FrameLayout::from_header(&h, 0, 0, None).unwrap();
        assert_eq!((l.stored_len, l.read_len), (6, 4));
        let h = header("{ Dim_1 = 4 ; DataType = UnsignedByte ; Size = 2 ; }\n");
        let l = FrameLayout::from_header(&h, 0, 0, None).unwrap();
        assert_eq!((l.stored_len, l.read_len), (2, 2));
    }

    #[test]
    fn unknown_data_type_infers_width() {
        let h = header("{ Dim_1 = 4 ; DataType = Weird ; Size = 16 ; }\n");
        assert_eq!(FrameLayout::from_header(&h, 0, 0, None).unwrap().dtype, DataType::U32);
        let h = header("{ Dim_1 = 4 ; DataType = Weird ; Size = 15 ; }\n");
        assert!(matches!(
            FrameLayout::from_header(&h, 0, 0, None),
            Err(ImageError::UnsupportedElementType(_))
        ));
    }

    #[test]
    fn compressed_frame_needs_size() {
        let h = header("{ Dim_1 = 4 ; DataType = UnsignedByte ; Compression = gzip ; }\n");
        assert!(matches!(
            FrameLayout::from_header(&h, 0, 0, None),
            Err(ImageError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn external_blob_is_relative_to_directory() {
        let h = header("{ Dim_1 = 4 ; DataType = UnsignedByte ; EDF_BinaryFileName = data.bin ; EDF_BinaryFilePosition = 8 ; }\n");
        let l = FrameLayout::from_header(&h, 0, 0, Some(Path::new("/tmp/run"))).unwrap();
        assert_eq!(l.blob, BlobLocation::External { path: PathBuf::from("/tmp/run/data.bin"), offset: 8 });
        assert_eq!(l.inline_len(), 0);
    }

    #[test]
    fn missing_dims_is_malformed() {
        let h = header("{ DataType = UnsignedByte ; }\n");
        assert!(FrameLayout::from_header(&h, 64, 0, None).is_err());
    }
}
