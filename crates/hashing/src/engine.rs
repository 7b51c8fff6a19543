//! Series, study and dataset digests.

use crate::cache::{CachedDigest, HashCache};
use crate::walk::SortedFiles;
use crate::{HashError, HashResult};
use chrono::Utc;
use lakeset_types::Sha256Hash;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Whether a series digest may come from the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CachePolicy {
    /// Reuse a cached digest younger than the validity window.
    UseCache,
    /// Always hash the files again (integrity checks).
    Refresh,
}

/// Progress event passed to the traversal callback.
#[derive(Clone, Copy, Debug)]
pub enum HashProgress<'a> {
    Study {
        position: usize,
        total: usize,
        study_id: &'a str,
    },
    Series {
        study_id: &'a str,
        series_folder: &'a str,
    },
    File {
        path: &'a Path,
    },
}

/// Where a study's series live on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StudySource {
    pub study_id: String,
    pub study_dir: PathBuf,
    pub series_folders: Vec<String>,
}

/// Combined image digest of a dataset plus the digest of each study, in dataset order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImagesDigest {
    pub combined: Sha256Hash,
    pub studies: Vec<(String, Sha256Hash)>,
}

/// The three independently verifiable digests of a dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetHashes {
    pub index: Sha256Hash,
    pub images: Sha256Hash,
    pub eforms: Sha256Hash,
    pub studies: Vec<(String, Sha256Hash)>,
}

/// Counters since the engine was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HashStats {
    pub files_read: u64,
    pub bytes_read: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub struct HashEngine {
    cache: Arc<dyn HashCache>,
    validity: chrono::Duration,
    files_read: AtomicU64,
    bytes_read: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl std::fmt::Debug for HashEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashEngine")
            .field("validity", &self.validity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl HashEngine {
    /// Creates an engine whose cached series digests expire after `validity`.
    pub fn new(cache: Arc<dyn HashCache>, validity: chrono::Duration) -> Self {
        Self {
            cache,
            validity,
            files_read: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> HashStats {
        HashStats {
            files_read: self.files_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// Digest of one series directory (`study_dir/series_folder`).
    ///
    /// A fresh cached digest is returned without touching the filesystem. Otherwise every
    /// file is streamed through one accumulator in [`SortedFiles`] order, the result is
    /// written back to the cache, and a warning is logged if it differs from the previous
    /// cached value.
    ///
    /// Returns `Ok(None)` if `progress` asked to stop.
    pub fn hash_of_series(
        &self,
        study_id: &str,
        study_dir: &Path,
        series_folder: &str,
        policy: CachePolicy,
        progress: &mut dyn FnMut(HashProgress<'_>) -> bool,
    ) -> HashResult<Option<Sha256Hash>> {
        let previous = self.cache.cached_series_hash(study_id, series_folder)?;
        let now = Utc::now();
        if policy == CachePolicy::UseCache {
            if let Some(cached) = previous.filter(|c| c.is_fresh(now, self.validity)) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(cached.hash));
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        if progress(HashProgress::Series {
            study_id,
            series_folder,
        }) {
            return Ok(None);
        }

        let series_dir = study_dir.join(series_folder);
        let mut hasher = Sha256::new();
        for path in SortedFiles::new(&series_dir) {
            let path = path?;
            if progress(HashProgress::File { path: &path }) {
                return Ok(None);
            }
            self.stream_into(&path, &mut hasher)?;
        }
        let hash = Sha256Hash::from_bytes(hasher.finalize().into());

        if let Some(previous) = previous {
            if previous.hash != hash {
                tracing::warn!(
                    "content of series {} in study {} changed since {} (was {}, now {})",
                    series_folder,
                    study_id,
                    previous.computed_at,
                    previous.hash,
                    hash
                );
            }
        }

        self.cache.store_series_hash(
            study_id,
            series_folder,
            &CachedDigest {
                hash,
                computed_at: Utc::now(),
            },
        )?;
        Ok(Some(hash))
    }

    /// Digest of a study: its series digests accumulated in `series_folders` order.
    pub fn hash_of_study(
        &self,
        study: &StudySource,
        policy: CachePolicy,
        progress: &mut dyn FnMut(HashProgress<'_>) -> bool,
    ) -> HashResult<Option<Sha256Hash>> {
        let mut hasher = Sha256::new();
        for folder in &study.series_folders {
            let Some(series_hash) =
                self.hash_of_series(&study.study_id, &study.study_dir, folder, policy, progress)?
            else {
                return Ok(None);
            };
            hasher.update(series_hash.as_bytes());
        }
        Ok(Some(Sha256Hash::from_bytes(hasher.finalize().into())))
    }

    /// Digest of all images of a dataset: study digests accumulated in `studies` order.
    pub fn hash_of_dataset_images(
        &self,
        studies: &[StudySource],
        policy: CachePolicy,
        progress: &mut dyn FnMut(HashProgress<'_>) -> bool,
    ) -> HashResult<Option<ImagesDigest>> {
        let mut hasher = Sha256::new();
        let mut per_study = Vec::with_capacity(studies.len());
        for (position, study) in studies.iter().enumerate() {
            if progress(HashProgress::Study {
                position,
                total: studies.len(),
                study_id: &study.study_id,
            }) {
                return Ok(None);
            }
            let Some(study_hash) = self.hash_of_study(study, policy, progress)? else {
                return Ok(None);
            };
            hasher.update(study_hash.as_bytes());
            per_study.push((study.study_id.clone(), study_hash));
        }
        Ok(Some(ImagesDigest {
            combined: Sha256Hash::from_bytes(hasher.finalize().into()),
            studies: per_study,
        }))
    }

    /// Index, images and e-forms digests of a finished dataset.
    pub fn hashes_of_dataset(
        &self,
        index_file: &Path,
        eforms_file: &Path,
        studies: &[StudySource],
        progress: &mut dyn FnMut(HashProgress<'_>) -> bool,
    ) -> HashResult<Option<DatasetHashes>> {
        let index = self.hash_of_file(index_file)?;
        let Some(images) = self.hash_of_dataset_images(studies, CachePolicy::UseCache, progress)?
        else {
            return Ok(None);
        };
        let eforms = self.hash_of_file(eforms_file)?;
        Ok(Some(DatasetHashes {
            index,
            images: images.combined,
            eforms,
            studies: images.studies,
        }))
    }

    /// Digest of a single file's bytes.
    pub fn hash_of_file(&self, path: &Path) -> HashResult<Sha256Hash> {
        let mut hasher = Sha256::new();
        self.stream_into(path, &mut hasher)?;
        Ok(Sha256Hash::from_bytes(hasher.finalize().into()))
    }

    fn stream_into(&self, path: &Path, hasher: &mut Sha256) -> HashResult<()> {
        let to_error = |source| HashError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(to_error)?;
        let copied = std::io::copy(&mut file, hasher).map_err(to_error)?;
        self.files_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(copied, Ordering::Relaxed);
        Ok(())
    }
}
