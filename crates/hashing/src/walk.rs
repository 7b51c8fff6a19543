//! Deterministic file enumeration.

use crate::HashError;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Iterator over the regular files beneath a directory.
///
/// Siblings are visited in byte-wise file name order and sub-directories are descended into
/// where they sort, so the sequence only depends on the tree's content, never on the order
/// the filesystem happens to return entries in. Symbolic links are neither followed nor
/// yielded.
pub struct SortedFiles {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

impl SortedFiles {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            inner: WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
        }
    }
}

impl Iterator for SortedFiles {
    type Item = Result<PathBuf, HashError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(entry) if entry.file_type().is_file() => return Some(Ok(entry.into_path())),
                Ok(_) => continue,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    return Some(Err(HashError::Io {
                        path,
                        source: e.into(),
                    }));
                }
            }
        }
    }
}
