//! Filename sources for file series.

use std::path::{Path, PathBuf};

use crate::filename::FilenameObject;

/// Numbered filename generator: `stem<NUMBER>extension` from `first`
/// towards `last` in steps of `step`.
///
/// Without `last` the generator is open-ended and stops at the first name
/// that does not exist on disk.
#[derive(Debug, Clone)]
pub struct NumberedFilenames {
    template: FilenameObject,
    next:     Option<u64>,
    last:     Option<u64>,
    step:     i64,
}

impl NumberedFilenames {
    /// `stem` may include a directory (`/data/run1/img_`); `extension`
    /// includes its dot.  Padding defaults to 4 digits.
    pub fn new(stem: impl AsRef<Path>, first: u64, extension: &str) -> Self {
        let stem = stem.as_ref();
        let template = FilenameObject {
            directory:  stem.parent().map(Path::to_path_buf).unwrap_or_default(),
            stem:       stem.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
            num:        Some(first),
            digits:     4,
            postnum:    String::new(),
            extension:  extension.to_string(),
            compressed: None,
            numbered_extension: false,
        };
        Self { template, next: Some(first), last: None, step: 1 }
    }

    /// Continue the numbering of an existing file name.  `None` when the
    /// name carries no number.
    pub fn from_first(path: impl AsRef<Path>) -> Option<Self> {
        let template = FilenameObject::parse(path);
        let first = template.num?;
        Some(Self { template, next: Some(first), last: None, step: 1 })
    }

    /// Inclusive end of the numbering.
    pub fn last(mut self, last: u64) -> Self {
        self.last = Some(last);
        self
    }

    /// Generate `count` names.
    pub fn count_of(self, count: usize) -> Self {
        let first = self.next.unwrap_or(0) as i64;
        let end = first + self.step * (count as i64 - 1);
        if count == 0 || end < 0 {
            return Self { next: None, ..self };
        }
        self.last(end as u64)
    }

    /// Zero-padding width; 0 disables padding.
    pub fn digits(mut self, digits: usize) -> Self {
        self.template.digits = digits;
        self
    }

    pub fn padding(self, enabled: bool) -> Self {
        if enabled { self } else { self.digits(0) }
    }

    /// Increment between names; negative counts down.  Zero is treated as 1.
    pub fn step(mut self, step: i64) -> Self {
        self.step = if step == 0 { 1 } else { step };
        self
    }

    pub fn path_for(&self, num: u64) -> PathBuf {
        self.template.with_number(num).to_path()
    }
}

impl Iterator for NumberedFilenames {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        let n = self.next?;
        let in_range = match self.last {
            Some(last) if self.step > 0 => n <= last,
            Some(last) => n >= last,
            None => true,
        };
        if !in_range {
            self.next = None;
            return None;
        }
        let path = self.path_for(n);
        if self.last.is_none() && !path.exists() {
            self.next = None;
            return None;
        }
        self.next = n.checked_add_signed(self.step);
        Some(path)
    }
}

/// Ordered filenames feeding a [`FileSeries`](super::FileSeries).
pub enum FilenameSource {
    List(Vec<PathBuf>),
    Iter(Box<dyn Iterator<Item = PathBuf> + Send>),
    Numbered(NumberedFilenames),
}

impl FilenameSource {
    pub(crate) fn into_cache(self) -> FilenameCache {
        match self {
            FilenameSource::List(names) => FilenameCache { names, pending: None },
            FilenameSource::Iter(iter) => FilenameCache { names: Vec::new(), pending: Some(iter) },
            FilenameSource::Numbered(gen) => FilenameCache { names: Vec::new(), pending: Some(Box::new(gen)) },
        }
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for FilenameSource {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        FilenameSource::List(iter.into_iter().map(Into::into).collect())
    }
}

/// Filenames pulled from a source on demand and kept.
pub(crate) struct FilenameCache {
    names:   Vec<PathBuf>,
    pending: Option<Box<dyn Iterator<Item = PathBuf> + Send>>,
}

impl FilenameCache {
    pub fn get(&mut self, ordinal: usize) -> Option<&Path> {
        while self.names.len() <= ordinal {
            let next = self.pending.as_mut()?.next();
            match next {
                Some(name) => self.names.push(name),
                None => {
                    self.pending = None;
                    return None;
                }
            }
        }
        Some(self.names[ordinal].as_path())
    }

    /// Total number of names; drains the source.
    pub fn count(&mut self) -> usize {
        if let Some(rest) = self.pending.take() {
            self.names.extend(rest);
        }
        self.names.len()
    }
}

/// Cursor over an explicit list of filenames.
#[derive(Debug, Clone, Default)]
pub struct FilenameSeries {
    names:   Vec<PathBuf>,
    current: usize,
}

impl FilenameSeries {
    pub fn new(names: Vec<PathBuf>) -> Self {
        Self { names, current: 0 }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[PathBuf] {
        &self.names
    }

    pub fn current(&self) -> Option<&Path> {
        self.names.get(self.current).map(PathBuf::as_path)
    }

    pub fn position(&self) -> usize {
        self.current
    }

    pub fn first(&mut self) -> Option<&Path> {
        self.jump(0)
    }

    pub fn last(&mut self) -> Option<&Path> {
        self.jump(self.names.len().checked_sub(1)?)
    }

    /// Move forward; stays on the last name at the end.
    pub fn next_name(&mut self) -> Option<&Path> {
        self.jump(self.current + 1)
    }

    /// Move back; stays on the first name at the start.
    pub fn previous_name(&mut self) -> Option<&Path> {
        self.jump(self.current.checked_sub(1)?)
    }

    /// Move to `index`; the cursor is unchanged when out of range.
    pub fn jump(&mut self, index: usize) -> Option<&Path> {
        if index >= self.names.len() {
            return None;
        }
        self.current = index;
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_generator_steps_and_pads() {
        let names: Vec<_> = NumberedFilenames::new("/data/img_", 8, ".edf").last(12).step(2).collect();
        assert_eq!(names, [
            PathBuf::from("/data/img_0008.edf"),
            PathBuf::from("/data/img_0010.edf"),
            PathBuf::from("/data/img_0012.edf"),
        ]);
    }

    #[test]
    fn counting_down_without_padding() {
        let names: Vec<_> = NumberedFilenames::new("f", 3, ".cbf").step(-1).count_of(3).padding(false).collect();
        assert_eq!(names, [PathBuf::from("f3.cbf"), PathBuf::from("f2.cbf"), PathBuf::from("f1.cbf")]);
    }

    #[test]
    fn continues_existing_name() {
        let gen = NumberedFilenames::from_first("run/lab6_0099.edf.gz").unwrap().count_of(2);
        let names: Vec<_> = gen.collect();
        assert_eq!(names[1], PathBuf::from("run/lab6_0100.edf.gz"));
        assert!(NumberedFilenames::from_first("mask.msk").is_none());
    }

    #[test]
    fn open_ended_stops_at_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            std::fs::write(dir.path().join(format!("s_{i:04}.edf")), b"").unwrap();
        }
        let gen = NumberedFilenames::new(dir.path().join("s_"), 0, ".edf");
        assert_eq!(gen.count(), 3);
    }

    #[test]
    fn cache_pulls_lazily() {
        let mut cache = FilenameSource::Iter(Box::new((0..5).map(|i| PathBuf::from(format!("{i}"))))).into_cache();
        assert_eq!(cache.get(2), Some(Path::new("2")));
        assert_eq!(cache.names.len(), 3);
        assert_eq!(cache.count(), 5);
        assert_eq!(cache.get(5), None);
    }

    #[test]
    fn list_navigation() {
        let mut s: FilenameSeries = FilenameSeries::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(s.current(), Some(Path::new("a")));
        assert_eq!(s.next_name(), Some(Path::new("b")));
        assert_eq!(s.last(), Some(Path::new("c")));
        assert_eq!(s.next_name(), None);
        assert_eq!(s.position(), 2);
        assert_eq!(s.previous_name(), Some(Path::new("b")));
        assert_eq!(s.first(), Some(Path::new("a")));
        assert_eq!(s.previous_name(), None);
    }
}
