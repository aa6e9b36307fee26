//! Magic-number table used by format detection.
//!
//! Entries are tried in order; the first prefix that matches wins, so more
//! specific signatures must come before their generic prefixes (`II*\0\x82`
//! before `II*\0`, `{\nHEA` before `{`).  Two tags are ambiguous and are
//! resolved by the registry: [`AMBIGUOUS_TIFF`] by filename extension and
//! [`AMBIGUOUS_HDF5`] by root attributes.

use std::path::Path;

use crate::header::Header;
use crate::registry::source::ReadSeek;

/// Little-endian TIFF that may be a MarCCD frame.
pub const AMBIGUOUS_TIFF: &str = "marccd/tif";
/// HDF5 container written by Eiger, LImA or a sparsifier.
pub const AMBIGUOUS_HDF5: &str = "eiger/lima/sparse";

pub const MAGIC_NUMBERS: &[(&[u8], &str)] = &[
    (b"FORMAT :100",               "bruker100"),
    (b"FORMAT :        86",        "bruker"),
    (b"MM\x00\x2a",                "tif"),
    (b"II\x2a\x00\x08\x00",        AMBIGUOUS_TIFF),
    (b"II\x2a\x00\x82\x00",        "pilatus"),
    (b"II\x2a\x00",                "tif"),
    (b"{\nHEA",                    "adsc"),
    (b"{\n",                       "edf"),
    (b"\n{\r\nHEA",                "adsc"),
    (b"{",                         "edf"),
    (b"\r{",                       "edf"),
    (b"\n{",                       "edf"),
    (b"ADEPT",                     "GE"),
    (b"OD",                        "OXD"),
    (b"IM",                        "HiPiC"),
    (b"\x2d\x04",                  "mar345"),
    (b"\x04\x2d",                  "mar345"),
    (b"\xd2\x04",                  "mar345"),
    (b"\x04\xd2",                  "mar345"),
    (b"M\x00\x00\x00A\x00\x00\x00S\x00\x00\x00K\x00\x00\x00", "fit2dmask"),
    (b"\x00\x00\x00\x03",          "dm3"),
    (b"No",                        "kcd"),
    (b"<",                         "xsd"),
    (b"\n\xb8\x03\x00",            "pixi"),
    (b"\x89HDF\r\n\x1a\n",         AMBIGUOUS_HDF5),
    (b"R-AXIS",                    "raxis"),
    (b"\x93NUMPY",                 "numpy"),
    (b"\\$FFF_START",              "fit2d"),
    (b"\xff\xd8\xff\xdb",          "jpeg"),
    (b"\xff\xd8\xff\xe0\x00\x10JFIF\x00\x01", "jpeg"),
    (b"\xff\xd8\xff\xee",          "jpeg"),
    (b"\xff\xd8\xff\xe1",          "jpeg"),
    (b"\x00\x00\x00\x0cjP  \r\n\x87\n", "jpeg2k"),
    (b"ESPERANTO FORMAT",          "esperanto"),
    (b"###CBF: VERSION",           "cbf"),
];

/// Bytes read for sniffing; long enough for every signature above.
pub const PREFIX_LEN: usize = 18;

/// First table entry whose signature prefixes `prefix`.
pub fn match_prefix(prefix: &[u8]) -> Option<&'static str> {
    MAGIC_NUMBERS
        .iter()
        .find(|(magic, _)| prefix.starts_with(magic))
        .map(|(_, tag)| *tag)
}

/// Reads root-level attributes of a hierarchical (HDF5) container.
///
/// The library does not parse HDF5 itself; callers that can should inject
/// an implementation into the registry.
pub trait AttributeInspector: Send + Sync {
    fn root_attributes(&self, path: Option<&Path>, reader: &mut dyn ReadSeek) -> std::io::Result<Header>;
}

/// Pick the HDF5 flavour from root attributes.
pub fn classify_hdf5(attributes: &Header) -> &'static str {
    let creator = attributes.get_ignore_case("creator").unwrap_or_default();
    if creator.to_ascii_uppercase().starts_with("LIMA") {
        "lima"
    } else if creator.to_ascii_lowercase().contains("sparsify") {
        "sparse"
    } else {
        "eiger"
    }
}

/// Resolve [`AMBIGUOUS_TIFF`] from the filename extension.
pub fn classify_tiff(filename: Option<&Path>) -> &'static str {
    let ext = filename
        .and_then(|p| crate::filename::FilenameObject::parse(p).extension.get(1..).map(str::to_ascii_lowercase));
    match ext.as_deref() {
        Some("mccd") | Some("marccd") => "marccd",
        _ => "tif",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_signatures_win() {
        assert_eq!(match_prefix(b"II\x2a\x00\x82\x00rest"), Some("pilatus"));
        assert_eq!(match_prefix(b"II\x2a\x00\x10\x00"), Some("tif"));
        assert_eq!(match_prefix(b"{\nHEADER_BYTES"), Some("adsc"));
        assert_eq!(match_prefix(b"{\r\nEDF_DataBlockID"), Some("edf"));
        assert_eq!(match_prefix(b"FORMAT :100"), Some("bruker100"));
    }

    #[test]
    fn edf_variants() {
        for prefix in [&b"{\n"[..], b"\r{\n", b"\n{\n", b"{ HeaderID"] {
            assert_eq!(match_prefix(prefix), Some("edf"));
        }
    }

    #[test]
    fn unknown_prefix() {
        assert_eq!(match_prefix(b"\x01\x02\x03"), None);
        assert_eq!(match_prefix(b""), None);
    }

    #[test]
    fn hdf5_classification() {
        let lima: Header = [("creator", "LIMA-1.9")].into_iter().collect();
        let sparse: Header = [("creator", "pyFAI-sparsify")].into_iter().collect();
        assert_eq!(classify_hdf5(&lima), "lima");
        assert_eq!(classify_hdf5(&sparse), "sparse");
        assert_eq!(classify_hdf5(&Header::new()), "eiger");
    }

    #[test]
    fn tiff_classification() {
        assert_eq!(classify_tiff(Some(Path::new("a/frame_001.mccd"))), "marccd");
        assert_eq!(classify_tiff(Some(Path::new("frame.MarCCD.gz"))), "marccd");
        assert_eq!(classify_tiff(Some(Path::new("frame.tif"))), "tif");
        assert_eq!(classify_tiff(None), "tif");
    }
}
