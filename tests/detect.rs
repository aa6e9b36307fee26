use areadet::registry::{AttributeInspector, ReadSeek};
use areadet::{FormatRegistry, Header, ImageError, OpenOptions, Source};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";

/// Fake HDF5 layout for tests: after the signature, one `creator` line.
struct CreatorLine;

impl AttributeInspector for CreatorLine {
    fn root_attributes(&self, _path: Option<&Path>, reader: &mut dyn ReadSeek) -> std::io::Result<Header> {
        reader.seek(SeekFrom::Start(HDF5_MAGIC.len() as u64))?;
        let mut rest = String::new();
        reader.read_to_string(&mut rest)?;
        let mut header = Header::new();
        if let Some(creator) = rest.strip_prefix("creator=") {
            header.insert("creator", creator.trim());
        }
        Ok(header)
    }
}

fn hdf5(creator: Option<&str>) -> Vec<u8> {
    let mut bytes = HDF5_MAGIC.to_vec();
    if let Some(c) = creator {
        bytes.extend_from_slice(format!("creator={c}\n").as_bytes());
    }
    bytes
}

// ── Magic bytes ──────────────────────────────────────────────────────────────

#[test]
fn edf_prefixes() {
    let registry = FormatRegistry::with_defaults();
    for prefix in [&b"{\r\nEDF_DataBlockID = 0"[..], b"{\nHeaderID", b"\n{\nDim_1", b"{"] {
        assert_eq!(registry.detect_bytes(prefix, None).unwrap(), "edf", "{prefix:?}");
    }
    assert_eq!(registry.detect_bytes(b"{\nHEADER_BYTES=  512;", None).unwrap(), "adsc");
}

#[test]
fn hdf5_flavour_comes_from_creator_attribute() {
    let mut registry = FormatRegistry::with_defaults();
    registry.set_attribute_inspector(Arc::new(CreatorLine));

    assert_eq!(registry.detect_bytes(&hdf5(Some("LIMA-1.9.7")), None).unwrap(), "lima");
    assert_eq!(registry.detect_bytes(&hdf5(Some("pyFAI sparsify 0.21")), None).unwrap(), "sparse");
    assert_eq!(registry.detect_bytes(&hdf5(Some("Dectris")), None).unwrap(), "eiger");
    assert_eq!(registry.detect_bytes(&hdf5(None), None).unwrap(), "eiger");
}

#[test]
fn hdf5_without_inspector_is_eiger() {
    let registry = FormatRegistry::with_defaults();
    assert_eq!(registry.detect_bytes(&hdf5(Some("LIMA-1.9.7")), None).unwrap(), "eiger");
}

#[test]
fn detection_leaves_stream_position_alone() {
    let mut registry = FormatRegistry::with_defaults();
    registry.set_attribute_inspector(Arc::new(CreatorLine));
    let mut cursor = std::io::Cursor::new(hdf5(Some("LIMA")));
    cursor.set_position(0);
    registry.detect_reader(&mut cursor, None).unwrap();
    assert_eq!(cursor.position(), 0);
}

#[test]
fn little_endian_tiff_uses_extension() {
    let registry = FormatRegistry::with_defaults();
    let tiff = b"II\x2a\x00\x08\x00\x00\x00";
    assert_eq!(registry.detect_bytes(tiff, Some(Path::new("frame_0001.mccd"))).unwrap(), "marccd");
    assert_eq!(registry.detect_bytes(tiff, Some(Path::new("frame_0001.tif"))).unwrap(), "tif");
    assert_eq!(registry.detect_bytes(tiff, None).unwrap(), "tif");
    assert_eq!(registry.detect_bytes(b"II\x2a\x00\x82\x00", None).unwrap(), "pilatus");
}

// ── Extension fallback ───────────────────────────────────────────────────────

#[test]
fn unknown_magic_falls_back_to_extension() {
    let registry = FormatRegistry::with_defaults();
    let junk = b"\x01\x02\x03\x04";
    assert_eq!(registry.detect_bytes(junk, Some(Path::new("a/b/scan.edf"))).unwrap(), "edf");
    assert_eq!(registry.detect_bytes(junk, Some(Path::new("scan_0001.edf.gz"))).unwrap(), "edf");
    assert_eq!(registry.detect_bytes(junk, Some(Path::new("frame.001"))).unwrap(), "bruker");
    assert!(matches!(
        registry.detect_bytes(junk, Some(Path::new("notes.txt"))),
        Err(ImageError::UnidentifiableFormat(_))
    ));
    assert!(matches!(registry.detect_bytes(junk, None), Err(ImageError::UnidentifiableFormat(_))));
}

#[test]
fn compressed_files_are_sniffed_through_the_wrapper() {
    use std::io::Write;

    let dir = tempdir().unwrap();
    let gz = dir.path().join("data.bin.gz");
    let mut enc = flate2::write::GzEncoder::new(std::fs::File::create(&gz).unwrap(), flate2::Compression::fast());
    enc.write_all(b"{\nDim_1 = 1 ;\n}\n\x00").unwrap();
    enc.finish().unwrap();

    let bz = dir.path().join("data.bin.bz2");
    let mut enc = bzip2::write::BzEncoder::new(std::fs::File::create(&bz).unwrap(), bzip2::Compression::fast());
    enc.write_all(b"###CBF: VERSION 1.5").unwrap();
    enc.finish().unwrap();

    let registry = FormatRegistry::with_defaults();
    assert_eq!(registry.detect_path(&gz).unwrap(), "edf");
    assert_eq!(registry.detect_path(&bz).unwrap(), "cbf");
}

// ── Opening ──────────────────────────────────────────────────────────────────

#[test]
fn detected_but_unregistered_format_is_reported() {
    let registry = FormatRegistry::with_defaults();
    let source = Source::from_bytes("scan.cbf", b"###CBF: VERSION 1.5\n".to_vec());
    assert!(matches!(
        registry.open_reader(source, &OpenOptions::default()),
        Err(ImageError::UnregisteredFormat(name)) if name == "cbf"
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let registry = FormatRegistry::with_defaults();
    let dir = tempdir().unwrap();
    assert!(matches!(registry.detect_path(dir.path().join("nope.edf")), Err(ImageError::Io(_))));
}
