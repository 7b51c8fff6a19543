//! Derived metadata of a dataset and its studies.

use crate::constants::STUDY_METADATA_FILENAME;
use crate::paths::resolve_under;
use crate::{DatasetError, DatasetResult};
use lakeset_store::{Dataset, DatasetMetadata, DatasetSource, DatasetStudy, StudyMetadata};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path};
use walkdir::WalkDir;

/// Metadata collected for one dataset, ready to be persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectedMetadata {
    pub dataset: DatasetMetadata,
    pub size_in_bytes: u64,
    pub studies: Vec<DatasetStudy>,
}

/// Subproject owning a study: the first component of its path in the data lake.
pub fn subproject_of(path_in_datalake: &str) -> Option<String> {
    Path::new(path_in_datalake)
        .components()
        .find_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
}

/// Reads the ingestion sidecar of a study directory. A missing sidecar is not an error.
pub fn read_study_sidecar(study_dir: &Path) -> DatasetResult<Option<StudyMetadata>> {
    let path = study_dir.join(STUDY_METADATA_FILENAME);
    match fs::read_to_string(&path) {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DatasetError::io(path)(e)),
    }
}

/// Total size of the regular files beneath `path`. Symbolic links are not followed.
pub fn directory_size(path: &Path) -> DatasetResult<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| DatasetError::Io {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_file() {
            let metadata = entry
                .metadata()
                .map_err(|e| DatasetError::Io {
                    path: entry.path().to_path_buf(),
                    source: e.into(),
                })?;
            total = total.saturating_add(metadata.len());
        }
    }
    Ok(total)
}

/// Samples the sidecar of every study, derives the dataset-level fields and sums the size of
/// the selected series.
///
/// For internal datasets every study must belong to the dataset's own project.
pub fn collect(
    dataset: &Dataset,
    studies: &[DatasetStudy],
    datalake_dir: &Path,
) -> DatasetResult<CollectedMetadata> {
    let mut size_in_bytes = 0u64;
    let mut ages = Vec::new();
    let mut sex = BTreeSet::new();
    let mut modality = BTreeSet::new();
    let mut body_part = BTreeSet::new();
    let mut manufacturer = BTreeSet::new();
    let mut series_tags = BTreeSet::new();
    let mut subprojects = BTreeSet::new();
    let mut collected = Vec::with_capacity(studies.len());

    for entry in studies {
        let mut entry = entry.clone();
        let study_dir = resolve_under(datalake_dir, &entry.study.path_in_datalake)?;

        let subproject = subproject_of(&entry.study.path_in_datalake);
        if dataset.source == DatasetSource::Internal {
            let found = subproject.clone().unwrap_or_default();
            if found != dataset.project {
                return Err(DatasetError::SubprojectMismatch {
                    study: entry.study.id.clone(),
                    expected: dataset.project.clone(),
                    found,
                });
            }
        }

        if let Some(metadata) = read_study_sidecar(&study_dir)? {
            entry.study.metadata = metadata;
        }
        let metadata = &entry.study.metadata;
        ages.extend(metadata.age_in_days);
        sex.extend(metadata.sex.clone());
        modality.extend(metadata.modality.clone());
        body_part.extend(metadata.body_part.clone());
        manufacturer.extend(metadata.manufacturer.clone());

        for series in &entry.series {
            size_in_bytes =
                size_in_bytes.saturating_add(directory_size(&study_dir.join(&series.folder_name))?);
            series_tags.extend(series.tags.iter().cloned());
        }

        subprojects.extend(subproject.clone());
        entry.subproject = subproject;
        collected.push(entry);
    }

    Ok(CollectedMetadata {
        dataset: DatasetMetadata {
            age_low_in_days: ages.iter().copied().min(),
            age_high_in_days: ages.iter().copied().max(),
            sex: sex.into_iter().collect(),
            modality: modality.into_iter().collect(),
            body_part: body_part.into_iter().collect(),
            manufacturer: manufacturer.into_iter().collect(),
            series_tags: series_tags.into_iter().collect(),
            subprojects: subprojects.into_iter().collect(),
        },
        size_in_bytes,
        studies: collected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeset_store::{SeriesSelection, Study};
    use lakeset_types::DatasetId;
    use tempfile::TempDir;

    fn study(id: &str, path: &str, series: &[&str]) -> DatasetStudy {
        DatasetStudy {
            study: Study {
                id: id.into(),
                name: id.into(),
                subject_name: "subj".into(),
                path_in_datalake: path.into(),
                url: None,
                metadata: StudyMetadata::default(),
                hash: None,
            },
            series: series
                .iter()
                .map(|s| SeriesSelection {
                    folder_name: s.to_string(),
                    tags: vec![format!("tag-{s}")],
                })
                .collect(),
            subproject: None,
        }
    }

    fn write_series(lake: &Path, path: &str, series: &str, bytes: &[u8]) {
        let dir = lake.join(path).join(series);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("image.dcm"), bytes).unwrap();
    }

    #[test]
    fn subproject_is_first_component() {
        assert_eq!(subproject_of("alpha/subj/st").as_deref(), Some("alpha"));
        assert_eq!(subproject_of("./alpha/subj").as_deref(), Some("alpha"));
        assert_eq!(subproject_of(""), None);
    }

    #[test]
    fn sidecars_and_sizes_are_aggregated() {
        let temp = TempDir::new().unwrap();
        let lake = temp.path();
        write_series(lake, "alpha/s1/st1", "ser1", &[0; 10]);
        write_series(lake, "alpha/s2/st2", "ser1", &[0; 5]);
        write_series(lake, "alpha/s2/st2", "unselected", &[0; 100]);
        fs::write(
            lake.join("alpha/s1/st1").join(STUDY_METADATA_FILENAME),
            r#"{"age_in_days": 400, "sex": "F", "modality": "MR"}"#,
        )
        .unwrap();
        fs::write(
            lake.join("alpha/s2/st2").join(STUDY_METADATA_FILENAME),
            r#"{"age_in_days": 90, "sex": "M", "modality": "MR", "body_part": "HEAD"}"#,
        )
        .unwrap();

        let dataset = Dataset::draft(DatasetId::new(), "d", "alpha", DatasetSource::Internal);
        let collected = collect(
            &dataset,
            &[
                study("st1", "alpha/s1/st1", &["ser1"]),
                study("st2", "alpha/s2/st2", &["ser1"]),
            ],
            lake,
        )
        .unwrap();

        assert_eq!(collected.size_in_bytes, 15);
        assert_eq!(collected.dataset.age_low_in_days, Some(90));
        assert_eq!(collected.dataset.age_high_in_days, Some(400));
        assert_eq!(collected.dataset.sex, ["F", "M"]);
        assert_eq!(collected.dataset.modality, ["MR"]);
        assert_eq!(collected.dataset.body_part, ["HEAD"]);
        assert_eq!(collected.dataset.series_tags, ["tag-ser1"]);
        assert_eq!(collected.dataset.subprojects, ["alpha"]);
        assert_eq!(collected.studies[0].study.metadata.sex.as_deref(), Some("F"));
        assert_eq!(collected.studies[1].subproject.as_deref(), Some("alpha"));
    }

    #[test]
    fn internal_dataset_rejects_foreign_subproject() {
        let temp = TempDir::new().unwrap();
        write_series(temp.path(), "beta/s1/st1", "ser1", b"x");
        let dataset = Dataset::draft(DatasetId::new(), "d", "alpha", DatasetSource::Internal);

        let result = collect(&dataset, &[study("st1", "beta/s1/st1", &["ser1"])], temp.path());

        assert!(matches!(
            result,
            Err(DatasetError::SubprojectMismatch { ref found, .. }) if found == "beta"
        ));
    }

    #[test]
    fn external_dataset_accepts_any_subproject() {
        let temp = TempDir::new().unwrap();
        write_series(temp.path(), "beta/s1/st1", "ser1", b"x");
        let dataset = Dataset::draft(DatasetId::new(), "d", "alpha", DatasetSource::External);

        let collected =
            collect(&dataset, &[study("st1", "beta/s1/st1", &["ser1"])], temp.path()).unwrap();
        assert_eq!(collected.dataset.subprojects, ["beta"]);
    }

    #[test]
    fn malformed_sidecar_is_an_error() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(STUDY_METADATA_FILENAME), "{not json").unwrap();
        assert!(matches!(
            read_study_sidecar(temp.path()),
            Err(DatasetError::Json(_))
        ));
    }
}
