use crate::HashResult;
use chrono::{DateTime, Utc};
use lakeset_types::Sha256Hash;

/// A series digest and the time it was computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachedDigest {
    pub hash: Sha256Hash,
    pub computed_at: DateTime<Utc>,
}

impl CachedDigest {
    /// True while `now - computed_at` is strictly below `validity`.
    pub fn is_fresh(&self, now: DateTime<Utc>, validity: chrono::Duration) -> bool {
        now.signed_duration_since(self.computed_at) < validity
    }
}

/// Persistent storage for series digests.
///
/// Reads and writes are not coordinated: two writers racing on the same series only cost a
/// recomputation, since a missing or stale entry always falls back to hashing the files.
pub trait HashCache: Send + Sync {
    fn cached_series_hash(
        &self,
        study_id: &str,
        series_folder: &str,
    ) -> HashResult<Option<CachedDigest>>;

    fn store_series_hash(
        &self,
        study_id: &str,
        series_folder: &str,
        digest: &CachedDigest,
    ) -> HashResult<()>;
}
