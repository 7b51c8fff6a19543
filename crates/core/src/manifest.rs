//! Registration of new datasets.

use crate::config::CoreConfig;
use crate::constants::WORKING_DIR_MODE;
use crate::index::write_atomically;
use crate::{DatasetError, DatasetResult};
use lakeset_store::{
    Dataset, DatasetSource, DatasetStudy, SeriesSelection, SqliteStore, StoreError, Study,
    StudyMetadata,
};
use lakeset_types::{DatasetId, NonEmptyText};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;

/// A dataset as requested by its creator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    #[serde(default)]
    pub id: Option<DatasetId>,
    pub name: String,
    pub project: String,
    #[serde(default = "internal_source")]
    pub source: DatasetSource,
    pub studies: Vec<ManifestStudy>,
    /// Clinical data kept in the working file until creation succeeds.
    #[serde(default)]
    pub eforms: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStudy {
    pub id: String,
    pub name: String,
    pub subject_name: String,
    pub path_in_datalake: String,
    #[serde(default)]
    pub url: Option<String>,
    pub series: Vec<SeriesSelection>,
}

fn internal_source() -> DatasetSource {
    DatasetSource::Internal
}

fn required(field: &str, value: &str) -> DatasetResult<String> {
    NonEmptyText::new(value)
        .map(|text| text.as_str().to_owned())
        .map_err(|e| DatasetError::InvalidInput(format!("{field}: {e}")))
}

/// Stores a draft dataset and its working file. The dataset can then be created with
/// [`crate::pipeline::CreationPipeline::run`].
pub fn register(
    store: &SqliteStore,
    config: &CoreConfig,
    manifest: &DatasetManifest,
) -> DatasetResult<DatasetId> {
    let name = required("name", &manifest.name)?;
    let project = required("project", &manifest.project)?;
    if manifest.studies.is_empty() {
        return Err(DatasetError::InvalidInput(
            "a dataset needs at least one study".into(),
        ));
    }

    let studies = manifest
        .studies
        .iter()
        .map(|study| {
            Ok(DatasetStudy {
                study: Study {
                    id: required("study id", &study.id)?,
                    name: study.name.clone(),
                    subject_name: required("subject name", &study.subject_name)?,
                    path_in_datalake: required("study path", &study.path_in_datalake)?,
                    url: study.url.clone(),
                    metadata: StudyMetadata::default(),
                    hash: None,
                },
                series: study.series.clone(),
                subproject: None,
            })
        })
        .collect::<DatasetResult<Vec<_>>>()?;

    let dataset = Dataset::draft(
        manifest.id.unwrap_or_default(),
        name,
        project,
        manifest.source,
    );
    store
        .insert_dataset(&dataset, &studies)
        .map_err(|e| match e {
            StoreError::Conflict(message) => DatasetError::InvalidInput(message),
            other => other.into(),
        })?;

    let creating_dir = config.creating_dir();
    fs::create_dir_all(&creating_dir).map_err(DatasetError::io(&creating_dir))?;
    fs::set_permissions(&creating_dir, fs::Permissions::from_mode(WORKING_DIR_MODE))
        .map_err(DatasetError::io(&creating_dir))?;
    write_atomically(
        &config.working_file(&dataset.id),
        &serde_json::to_vec(&manifest.eforms)?,
    )?;

    tracing::info!(
        "registered dataset {} with {} studies",
        dataset.id,
        studies.len()
    );
    Ok(dataset.id)
}
