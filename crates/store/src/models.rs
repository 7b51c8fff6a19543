//! Records persisted by the store.

use crate::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use lakeset_types::{AccessId, DatasetId, GroupId, Sha256Hash};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetState {
    Draft,
    Active,
    Invalidated,
}

impl DatasetState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Invalidated => "invalidated",
        }
    }

    pub(crate) fn from_sql(value: &str) -> StoreResult<Self> {
        match value {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "invalidated" => Ok(Self::Invalidated),
            other => Err(StoreError::Corrupt(format!("dataset state '{other}'"))),
        }
    }
}

/// Where a dataset's studies come from. Only internal datasets are bound to one project and
/// notarized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSource {
    Internal,
    External,
}

impl DatasetSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }

    pub(crate) fn from_sql(value: &str) -> StoreResult<Self> {
        match value {
            "internal" => Ok(Self::Internal),
            "external" => Ok(Self::External),
            other => Err(StoreError::Corrupt(format!("dataset source '{other}'"))),
        }
    }
}

/// A series folder selected for a dataset, with the tags attached at selection time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSelection {
    pub folder_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SeriesSelection {
    pub fn new(folder_name: impl Into<String>) -> Self {
        Self {
            folder_name: folder_name.into(),
            tags: Vec::new(),
        }
    }
}

/// Descriptive metadata of a study. Field names match the data lake sidecar file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyMetadata {
    pub age_in_days: Option<u32>,
    pub sex: Option<String>,
    pub diagnosis: Option<String>,
    pub body_part: Option<String>,
    pub modality: Option<String>,
    pub manufacturer: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Study {
    pub id: String,
    pub name: String,
    pub subject_name: String,
    /// Relative to the data lake root; the first component is the owning subproject.
    pub path_in_datalake: String,
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: StudyMetadata,
    #[serde(default)]
    pub hash: Option<Sha256Hash>,
}

impl Study {
    /// Name of the study directory, which is also the name of its link in a dataset.
    pub fn directory_name(&self) -> &str {
        self.path_in_datalake
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

/// A study as it appears in one dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetStudy {
    pub study: Study,
    pub series: Vec<SeriesSelection>,
    pub subproject: Option<String>,
}

/// Dataset-level metadata derived from its studies.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetMetadata {
    pub age_low_in_days: Option<u32>,
    pub age_high_in_days: Option<u32>,
    pub sex: Vec<String>,
    pub modality: Vec<String>,
    pub body_part: Vec<String>,
    pub manufacturer: Vec<String>,
    pub series_tags: Vec<String>,
    pub subprojects: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    pub project: String,
    pub source: DatasetSource,
    pub state: DatasetState,
    pub size_in_bytes: Option<u64>,
    pub corrupted: bool,
    pub last_integrity_check: Option<DateTime<Utc>>,
    pub metadata: Option<DatasetMetadata>,
    pub created_at: DateTime<Utc>,
}

impl Dataset {
    /// A new dataset that has not been through the creation pipeline yet.
    pub fn draft(
        id: DatasetId,
        name: impl Into<String>,
        project: impl Into<String>,
        source: DatasetSource,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            project: project.into(),
            source,
            state: DatasetState::Draft,
            size_in_bytes: None,
            corrupted: false,
            last_integrity_check: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointStatus {
    Running,
    Error,
}

impl CheckpointStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Error => "error",
        }
    }

    pub(crate) fn from_sql(value: &str) -> StoreResult<Self> {
        match value {
            "running" => Ok(Self::Running),
            "error" => Ok(Self::Error),
            other => Err(StoreError::Corrupt(format!("checkpoint status '{other}'"))),
        }
    }
}

/// Creation phases whose completion is recorded so a relaunch can skip them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreationPhase {
    Pruned,
    MetadataCollected,
    Materialized,
    IndexWritten,
    Notarized,
}

impl CreationPhase {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Self::Pruned => "pruned",
            Self::MetadataCollected => "metadata_collected",
            Self::Materialized => "materialized",
            Self::IndexWritten => "index_written",
            Self::Notarized => "notarized",
        }
    }
}

/// Progress record of a dataset that is still being created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub dataset_id: DatasetId,
    pub status: CheckpointStatus,
    pub last_message: String,
    pub stop_requested: bool,
    pub pruned: bool,
    pub metadata_collected: bool,
    pub materialized: bool,
    pub index_written: bool,
    pub notarized: bool,
}

impl Checkpoint {
    pub fn is_done(&self, phase: CreationPhase) -> bool {
        match phase {
            CreationPhase::Pruned => self.pruned,
            CreationPhase::MetadataCollected => self.metadata_collected,
            CreationPhase::Materialized => self.materialized,
            CreationPhase::IndexWritten => self.index_written,
            CreationPhase::Notarized => self.notarized,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessRecord {
    pub id: AccessId,
    pub group: GroupId,
    pub dataset_ids: Vec<DatasetId>,
    pub preauthorized: bool,
    pub closed: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}
