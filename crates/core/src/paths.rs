//! Containment checks for paths taken from dataset records.
//!
//! Study paths, series folders and subject names come from stored records and are joined
//! onto the data lake or dataset roots. Before anything is created or read they must resolve
//! to a strict descendant of their root: `..` components are applied lexically and the
//! existing part of the path is canonicalized, so a symlink pointing out of the root is
//! caught as well.

use crate::{DatasetError, DatasetResult};
use std::path::{Component, Path, PathBuf};

/// Resolves `supplied` (relative to `root`, or absolute) and checks that it lies strictly
/// beneath `root`. The root itself is rejected.
pub fn resolve_under(root: &Path, supplied: impl AsRef<Path>) -> DatasetResult<PathBuf> {
    let supplied = supplied.as_ref();
    let traversal = || DatasetError::PathTraversal {
        path: supplied.display().to_string(),
        root: root.to_path_buf(),
    };

    let root = resolve_existing_prefix(&normalize(root));
    let candidate = resolve_existing_prefix(&normalize(&root.join(supplied)));
    if candidate != root && candidate.starts_with(&root) {
        Ok(candidate)
    } else {
        Err(traversal())
    }
}

/// Applies `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Canonicalizes the longest existing ancestor of `path` and appends the rest unchanged.
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    for ancestor in path.ancestors() {
        if let Ok(canonical) = ancestor.canonicalize() {
            return match path.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => canonical.join(rest),
                _ => canonical,
            };
        }
    }
    path.to_path_buf()
}
