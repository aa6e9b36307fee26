//! Filename decomposition for numbered detector frames.
//!
//! `dir/stem<NUMBER>postnum.ext[.gz|.bz2]` is split into its parts so the
//! frame number can be stepped while preserving zero-padding.  Bruker-style
//! names carry the number in the extension (`frame.0042`) and decompose
//! with an empty extension.

use std::path::{Path, PathBuf};

/// Static extension -> format table, consulted when magic bytes fail.
/// Extensions are lower-case without the leading dot.
pub const EXTENSION_FORMATS: &[(&str, &str)] = &[
    ("edf",       "edf"),
    ("cor",       "edf"),
    ("pnm",       "pnm"),
    ("pgm",       "pnm"),
    ("pbm",       "pnm"),
    ("tif",       "tif"),
    ("tiff",      "tif"),
    ("marccd",    "marccd"),
    ("mccd",      "marccd"),
    ("mar2300",   "mar345"),
    ("mar2000",   "mar345"),
    ("mar1600",   "mar345"),
    ("mar1200",   "mar345"),
    ("mar3450",   "mar345"),
    ("mar3000",   "mar345"),
    ("mar2560",   "mar345"),
    ("mar1800",   "mar345"),
    ("sfrm",      "bruker100"),
    ("gfrm",      "bruker"),
    ("img",       "adsc"),
    ("dm3",       "dm3"),
    ("kccd",      "kcd"),
    ("cbf",       "cbf"),
    ("xml",       "xsd"),
    ("h5",        "eiger"),
    ("hdf5",      "eiger"),
    ("nxs",       "eiger"),
    ("msk",       "fit2dmask"),
    ("f2d",       "fit2d"),
    ("npy",       "numpy"),
    ("spr",       "spr"),
    ("raw",       "raw"),
    ("jpg",       "jpeg"),
    ("jpeg",      "jpeg"),
    ("jp2",       "jpeg2k"),
    ("jpx",       "jpeg2k"),
    ("j2k",       "jpeg2k"),
    ("esperanto", "esperanto"),
    ("eiger",     "eiger"),
    ("mrc",       "mrc"),
];

/// Transparent compression suffixes (lower-case, with dot).
pub const COMPRESSED_SUFFIXES: &[&str] = &[".gz", ".bz2"];

/// Format registered for a bare extension (no dot, any case).
pub fn format_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    if !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_digit()) {
        return Some("bruker");
    }
    EXTENSION_FORMATS.iter().find(|(e, _)| *e == ext).map(|(_, f)| *f)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameObject {
    pub directory:  PathBuf,
    pub stem:       String,
    pub num:        Option<u64>,
    /// Zero-padding width of the number; 0 disables padding.
    pub digits:     usize,
    pub postnum:    String,
    /// Extension including the leading dot, or empty.
    pub extension:  String,
    /// `.gz` / `.bz2` suffix, if any.
    pub compressed: Option<String>,
    /// Number lives in the extension (`frame.0042`).
    pub numbered_extension: bool,
}

impl FilenameObject {
    pub fn parse(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut compressed = None;
        for suffix in COMPRESSED_SUFFIXES {
            if name.len() > suffix.len() && name.to_ascii_lowercase().ends_with(suffix) {
                let cut = name.len() - suffix.len();
                compressed = Some(name[cut..].to_string());
                name.truncate(cut);
                break;
            }
        }

        let (base, extension) = match name.rfind('.') {
            Some(dot) if dot > 0 => (name[..dot].to_string(), name[dot..].to_string()),
            _ => (name.clone(), String::new()),
        };

        let ext_digits = extension.get(1..).unwrap_or_default();
        if !ext_digits.is_empty() && ext_digits.bytes().all(|b| b.is_ascii_digit()) {
            return Self {
                directory,
                stem: base,
                num: ext_digits.parse().ok(),
                digits: ext_digits.len(),
                postnum: String::new(),
                extension: String::new(),
                compressed,
                numbered_extension: true,
            };
        }

        // Last run of ASCII digits in the base name.
        let bytes = base.as_bytes();
        let end = bytes.iter().rposition(|b| b.is_ascii_digit()).map(|i| i + 1);
        let (stem, num, digits, postnum) = match end {
            Some(end) => {
                let start = bytes[..end]
                    .iter()
                    .rposition(|b| !b.is_ascii_digit())
                    .map_or(0, |i| i + 1);
                let run = &base[start..end];
                (base[..start].to_string(), run.parse().ok(), run.len(), base[end..].to_string())
            }
            None => (base.clone(), None, 0, String::new()),
        };

        Self {
            directory,
            stem,
            num,
            digits,
            postnum,
            extension,
            compressed,
            numbered_extension: false,
        }
    }

    /// Format tag implied by the extension, if any.
    pub fn format(&self) -> Option<&'static str> {
        if self.numbered_extension {
            return Some("bruker");
        }
        format_for_extension(&self.extension)
    }

    fn number_text(&self) -> String {
        match self.num {
            Some(n) => format!("{:0width$}", n, width = self.digits),
            None => String::new(),
        }
    }

    pub fn file_name(&self) -> String {
        let mut name = if self.numbered_extension {
            format!("{}.{}", self.stem, self.number_text())
        } else {
            format!("{}{}{}{}", self.stem, self.number_text(), self.postnum, self.extension)
        };
        if let Some(c) = &self.compressed {
            name.push_str(c);
        }
        name
    }

    pub fn to_path(&self) -> PathBuf {
        self.directory.join(self.file_name())
    }

    /// Same name with the number moved by `step`.  `None` when there is no
    /// number or the result would be negative.
    pub fn jump(&self, step: i64) -> Option<Self> {
        let num = self.num?;
        let moved = (num as i64).checked_add(step)?;
        if moved < 0 {
            return None;
        }
        Some(Self { num: Some(moved as u64), ..self.clone() })
    }

    pub fn next(&self) -> Option<Self> {
        self.jump(1)
    }

    pub fn previous(&self) -> Option<Self> {
        self.jump(-1)
    }

    /// Same name at frame number `num`.
    pub fn with_number(&self, num: u64) -> Self {
        Self { num: Some(num), ..self.clone() }
    }

    /// Drop zero-padding for generated names.
    pub fn without_padding(mut self) -> Self {
        self.digits = 0;
        self
    }
}
