//! `index.json` and `eforms.json` of a dataset.

use crate::constants::{DATASET_FILE_MODE, EFORMS_FILENAME, INDEX_FILENAME};
use crate::{DatasetError, DatasetResult};
use lakeset_store::{Dataset, DatasetStudy};
use lakeset_types::DatasetId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Reduced view of the studies in a dataset, as read by users of the dataset tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetIndex {
    pub dataset_id: DatasetId,
    pub name: String,
    pub project: String,
    pub studies: Vec<IndexedStudy>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedStudy {
    pub study_id: String,
    pub name: String,
    /// Path of the study link relative to the dataset directory.
    pub path: String,
    pub url: Option<String>,
    pub series: Vec<IndexedSeries>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSeries {
    pub folder_name: String,
    pub tags: Vec<String>,
}

impl DatasetIndex {
    pub fn new(dataset: &Dataset, studies: &[DatasetStudy]) -> Self {
        Self {
            dataset_id: dataset.id,
            name: dataset.name.clone(),
            project: dataset.project.clone(),
            studies: studies
                .iter()
                .map(|entry| IndexedStudy {
                    study_id: entry.study.id.clone(),
                    name: entry.study.name.clone(),
                    path: format!(
                        "{}/{}",
                        entry.study.subject_name,
                        entry.study.directory_name()
                    ),
                    url: entry.study.url.clone(),
                    series: entry
                        .series
                        .iter()
                        .map(|series| IndexedSeries {
                            folder_name: series.folder_name.clone(),
                            tags: series.tags.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

pub fn index_path(dataset_dir: &Path) -> PathBuf {
    dataset_dir.join(INDEX_FILENAME)
}

pub fn eforms_path(dataset_dir: &Path) -> PathBuf {
    dataset_dir.join(EFORMS_FILENAME)
}

/// Writes `index.json` into the dataset directory.
pub fn write_index(
    dataset_dir: &Path,
    dataset: &Dataset,
    studies: &[DatasetStudy],
) -> DatasetResult<PathBuf> {
    let path = index_path(dataset_dir);
    let contents = serde_json::to_vec_pretty(&DatasetIndex::new(dataset, studies))?;
    write_atomically(&path, &contents)?;
    Ok(path)
}

/// Copies the clinical data of the working file into `eforms.json`.
///
/// The working file must contain valid JSON; it is re-serialized so the digest of
/// `eforms.json` does not depend on how the working file was formatted.
pub fn write_eforms(dataset_dir: &Path, working_file: &Path) -> DatasetResult<PathBuf> {
    let contents = match fs::read(working_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DatasetError::InvalidInput(format!(
                "clinical data file {} is missing",
                working_file.display()
            )))
        }
        Err(e) => return Err(DatasetError::io(working_file)(e)),
    };
    let eforms: serde_json::Value = serde_json::from_slice(&contents)?;

    let path = eforms_path(dataset_dir);
    write_atomically(&path, &serde_json::to_vec_pretty(&eforms)?)?;
    Ok(path)
}

/// Writes `contents` to a temporary file next to `path` and renames it into place, so
/// readers never see a partially written file.
pub fn write_atomically(path: &Path, contents: &[u8]) -> DatasetResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| DatasetError::InvalidInput(format!("{} has no parent", path.display())))?;
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(DatasetError::io(dir))?;
    file.write_all(contents).map_err(DatasetError::io(file.path()))?;
    file.as_file()
        .sync_all()
        .map_err(DatasetError::io(file.path()))?;
    fs::set_permissions(file.path(), fs::Permissions::from_mode(DATASET_FILE_MODE))
        .map_err(DatasetError::io(file.path()))?;
    file.persist(path)
        .map_err(|e| DatasetError::io(path)(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeset_store::{DatasetSource, SeriesSelection, Study, StudyMetadata};
    use tempfile::TempDir;

    fn sample() -> (Dataset, Vec<DatasetStudy>) {
        let dataset = Dataset::draft(DatasetId::new(), "Brains", "proj", DatasetSource::Internal);
        let studies = vec![DatasetStudy {
            study: Study {
                id: "st-1".into(),
                name: "Head CT".into(),
                subject_name: "subj-1".into(),
                path_in_datalake: "proj/subj-1/2020-ct".into(),
                url: Some("https://viewer.example/st-1".into()),
                metadata: StudyMetadata::default(),
                hash: None,
            },
            series: vec![SeriesSelection {
                folder_name: "ser-1".into(),
                tags: vec!["axial".into()],
            }],
            subproject: None,
        }];
        (dataset, studies)
    }

    #[test]
    fn index_lists_relative_paths_and_series() {
        let temp = TempDir::new().unwrap();
        let (dataset, studies) = sample();

        let path = write_index(temp.path(), &dataset, &studies).unwrap();

        let index: DatasetIndex = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(index.dataset_id, dataset.id);
        assert_eq!(index.studies[0].path, "subj-1/2020-ct");
        assert_eq!(index.studies[0].series[0].tags, ["axial"]);
        assert_eq!(
            index.studies[0].url.as_deref(),
            Some("https://viewer.example/st-1")
        );
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn eforms_are_copied_from_the_working_file() {
        let temp = TempDir::new().unwrap();
        let working = temp.path().join("working.json");
        fs::write(&working, r#"{"forms":[{"id":1}]}"#).unwrap();

        let path = write_eforms(temp.path(), &working).unwrap();

        let copied: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(copied["forms"][0]["id"], 1);
    }

    #[test]
    fn missing_working_file_is_recognized() {
        let temp = TempDir::new().unwrap();
        let result = write_eforms(temp.path(), &temp.path().join("absent.json"));
        assert!(matches!(result, Err(DatasetError::InvalidInput(_))));
    }

    #[test]
    fn rewriting_replaces_the_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.json");
        write_atomically(&path, b"one").unwrap();
        write_atomically(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }
}
