//! Integrity verification of created datasets.

use crate::paths::resolve_under;
use crate::{DatasetError, DatasetResult};
use chrono::{DateTime, Utc};
use lakeset_hashing::{CachePolicy, HashEngine, StudySource};
use lakeset_store::SqliteStore;
use lakeset_types::DatasetId;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrityReport {
    pub dataset_id: DatasetId,
    pub checked: usize,
    /// Studies without a stored digest, typically because the dataset was not notarized.
    pub skipped: usize,
    pub mismatched: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl IntegrityReport {
    pub fn is_corrupted(&self) -> bool {
        !self.mismatched.is_empty()
    }
}

/// Re-hashes every study of `id` from its files and compares it with the stored digest.
///
/// The cache is bypassed, so content that changed since notarization is detected. The result
/// is recorded on the dataset.
pub fn verify(
    store: &SqliteStore,
    hashing: &HashEngine,
    datalake_dir: &Path,
    id: &DatasetId,
) -> DatasetResult<IntegrityReport> {
    if store.get_dataset(id)?.is_none() {
        return Err(DatasetError::DatasetNotFound(*id));
    }

    let mut checked = 0;
    let mut skipped = 0;
    let mut mismatched = Vec::new();
    for entry in store.dataset_studies(id)? {
        let Some(expected) = entry.study.hash else {
            skipped += 1;
            continue;
        };
        let source = StudySource {
            study_id: entry.study.id.clone(),
            study_dir: resolve_under(datalake_dir, &entry.study.path_in_datalake)?,
            series_folders: entry
                .series
                .iter()
                .map(|series| series.folder_name.clone())
                .collect(),
        };
        let actual = hashing
            .hash_of_study(&source, CachePolicy::Refresh, &mut |_| false)?
            .ok_or(DatasetError::Cancelled)?;
        checked += 1;
        if actual != expected {
            tracing::warn!(
                "study {} of dataset {} does not match its notarized digest",
                entry.study.id,
                id
            );
            mismatched.push(entry.study.id);
        }
    }

    let checked_at = Utc::now();
    store.record_integrity_check(id, !mismatched.is_empty(), checked_at)?;
    tracing::info!(
        "integrity of dataset {}: {} checked, {} skipped, {} mismatched",
        id,
        checked,
        skipped,
        mismatched.len()
    );
    Ok(IntegrityReport {
        dataset_id: *id,
        checked,
        skipped,
        mismatched,
        checked_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeset_store::{Dataset, DatasetSource, DatasetStudy, SeriesSelection, Study, StudyMetadata};
    use lakeset_types::Sha256Hash;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn entry(id: &str) -> DatasetStudy {
        DatasetStudy {
            study: Study {
                id: id.into(),
                name: id.into(),
                subject_name: "subj".into(),
                path_in_datalake: format!("proj/subj/{id}"),
                url: None,
                metadata: StudyMetadata::default(),
                hash: None,
            },
            series: vec![SeriesSelection::new("ser")],
            subproject: None,
        }
    }

    struct Fixture {
        temp: TempDir,
        store: Arc<SqliteStore>,
        hashing: HashEngine,
        id: DatasetId,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        for study in ["a", "b", "c"] {
            let dir = temp.path().join(format!("proj/subj/{study}/ser"));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("img.dcm"), study.as_bytes()).unwrap();
        }
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let dataset = Dataset::draft(DatasetId::new(), "d", "proj", DatasetSource::Internal);
        store
            .insert_dataset(&dataset, &[entry("a"), entry("b"), entry("c")])
            .unwrap();
        let hashing = HashEngine::new(store.clone(), chrono::Duration::days(7));
        Fixture {
            temp,
            store,
            hashing,
            id: dataset.id,
        }
    }

    fn notarize(f: &Fixture, studies: &[&str]) {
        let hashes: Vec<_> = studies
            .iter()
            .map(|study| {
                let source = StudySource {
                    study_id: study.to_string(),
                    study_dir: f.temp.path().join(format!("proj/subj/{study}")),
                    series_folders: vec!["ser".into()],
                };
                let hash = f
                    .hashing
                    .hash_of_study(&source, CachePolicy::UseCache, &mut |_| false)
                    .unwrap()
                    .unwrap();
                (study.to_string(), hash)
            })
            .collect();
        f.store.set_study_hashes(&hashes).unwrap();
    }

    #[test]
    fn untouched_dataset_verifies() {
        let f = fixture();
        notarize(&f, &["a", "b"]);

        let report = verify(&f.store, &f.hashing, f.temp.path(), &f.id).unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.skipped, 1);
        assert!(!report.is_corrupted());
        let dataset = f.store.get_dataset(&f.id).unwrap().unwrap();
        assert!(!dataset.corrupted);
        assert!(dataset.last_integrity_check.is_some());
    }

    #[test]
    fn changed_file_is_detected_despite_the_cache() {
        let f = fixture();
        notarize(&f, &["a", "b", "c"]);
        fs::write(f.temp.path().join("proj/subj/b/ser/img.dcm"), b"tampered").unwrap();

        let report = verify(&f.store, &f.hashing, f.temp.path(), &f.id).unwrap();

        assert_eq!(report.mismatched, ["b"]);
        assert!(f.store.get_dataset(&f.id).unwrap().unwrap().corrupted);
    }

    #[test]
    fn unknown_dataset_is_not_found() {
        let f = fixture();
        let result = verify(&f.store, &f.hashing, f.temp.path(), &DatasetId::new());
        assert!(matches!(result, Err(DatasetError::DatasetNotFound(_))));
    }

    #[test]
    fn stored_digest_mismatch_from_wrong_hash() {
        let f = fixture();
        f.store
            .set_study_hashes(&[("a".into(), Sha256Hash::from_bytes([0; 32]))])
            .unwrap();

        let report = verify(&f.store, &f.hashing, f.temp.path(), &f.id).unwrap();
        assert_eq!(report.mismatched, ["a"]);
    }
}
