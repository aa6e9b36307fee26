//! Opening many independent files at once.
//!
//! [`open_all`] detects and opens each path and summarises what it found.
//! With the `parallel` feature the files are opened concurrently on the
//! Rayon global pool; without it they are opened one after the other.  In
//! both cases the output order matches the input order and a failure only
//! affects its own entry.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::pixel::DataType;
use crate::registry::{FormatRegistry, OpenOptions};

/// What one file holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameSummary {
    pub path:       PathBuf,
    pub codec:      String,
    pub nframes:    usize,
    pub incomplete: bool,
    /// Shape and element type of the first frame, if any.
    pub shape:      Option<Vec<usize>>,
    pub dtype:      Option<DataType>,
}

/// Open `path` and describe it without decoding any pixels.
pub fn summarize(registry: &FormatRegistry, path: &Path, options: &OpenOptions) -> Result<FrameSummary> {
    let mut container = registry.open(path, options)?;
    let first = if container.nframes() > 0 { Some(container.get_frame(0)?) } else { None };
    Ok(FrameSummary {
        path:       path.to_path_buf(),
        codec:      container.codec_name().to_string(),
        nframes:    container.nframes(),
        incomplete: container.is_incomplete(),
        shape:      first.as_ref().map(|f| f.shape().to_vec()),
        dtype:      first.as_ref().map(|f| f.dtype()),
    })
}

/// Summarise every path; one result per input, in input order.
pub fn open_all<P: AsRef<Path> + Sync>(
    registry: &FormatRegistry,
    paths:    &[P],
    options:  &OpenOptions,
) -> Vec<Result<FrameSummary>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        paths
            .par_iter()
            .map(|p| summarize(registry, p.as_ref(), options))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        paths
            .iter()
            .map(|p| summarize(registry, p.as_ref(), options))
            .collect()
    }
}
