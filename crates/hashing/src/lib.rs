//! Lakeset content hashing
//!
//! Computes tamper-evident SHA-256 digests over the image content of a dataset.
//!
//! ## Digest composition
//!
//! ```text
//! series  = sha256(file_1 || file_2 || …)        files in sorted depth-first order
//! study   = sha256(series_1 || series_2 || …)    raw digests, in the study's series order
//! images  = sha256(study_1 || study_2 || …)      raw digests, in the dataset's study order
//! ```
//!
//! Study and dataset digests are sequential accumulations, not Merkle trees: reordering the
//! series or study list changes the digest. Digests that were notarized in the past depend
//! on this, so the ordering must be kept as is.
//!
//! ## Series cache
//!
//! Series digests are cached per `(study, series folder)` through a [`HashCache`] and reused
//! while younger than the configured validity window. A cache hit performs no filesystem
//! access at all. Content that changes without notice is only noticed when an expired entry
//! is recomputed, and is reported as a warning.
//!
//! ## Cancellation
//!
//! Every traversal takes a progress callback. Returning `true` from it stops the traversal
//! and the operation returns `Ok(None)`: no partial digest is ever produced.

mod cache;
mod engine;
mod walk;

pub use cache::{CachedDigest, HashCache};
pub use engine::{
    CachePolicy, DatasetHashes, HashEngine, HashProgress, HashStats, ImagesDigest, StudySource,
};
pub use lakeset_types::Sha256Hash;
pub use walk::SortedFiles;

use std::path::PathBuf;

/// Errors that can occur while hashing
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Reading a file or directory failed; the whole hashing operation is abandoned
    #[error("I/O error on {path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The digest cache could not be read or written
    #[error("hash cache error: {0}")]
    Cache(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type HashResult<T> = std::result::Result<T, HashError>;
