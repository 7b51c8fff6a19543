//! # Lakeset Core
//!
//! Core business logic for curated datasets drawn from a shared data lake.
//!
//! This crate contains the dataset lifecycle:
//! - Registration of draft datasets and their clinical data ([`manifest`])
//! - The resumable creation pipeline ([`pipeline`]) which materializes the dataset tree
//!   ([`materializer`]), writes its index ([`index`]), hashes it and notarizes the digests
//!   ([`notary`])
//! - Group access to datasets through POSIX ACL grants ([`access`])
//! - Integrity verification against the notarized digests ([`integrity`])
//!
//! **No transport concerns**: scheduling of pipeline runs and any user-facing API belong to
//! the binaries.
//!
//! [`DatasetService`] wires everything together from a [`CoreConfig`].

pub mod access;
pub mod cancellation;
pub mod config;
pub mod constants;
mod error;
pub mod index;
pub mod integrity;
pub mod manifest;
pub mod materializer;
pub mod metadata;
pub mod notary;
pub mod paths;
pub mod pipeline;

pub use access::{AccessInUse, AccessManager};
pub use cancellation::{CancellationRegistry, CancellationToken};
pub use config::{CoreConfig, LoadRetry, NotaryConfig};
pub use error::{DatasetError, DatasetResult, ErrorKind};
pub use integrity::IntegrityReport;
pub use manifest::{DatasetManifest, ManifestStudy};
pub use materializer::{MaterializeReport, Materializer};
pub use notary::{HttpNotarizer, NotarizationError, NotarizationRequest, NotarizationSink};
pub use pipeline::{CreationOutcome, CreationPipeline, CreationStatus};

pub use lakeset_store::{AccessRecord, Dataset, DatasetState};
pub use lakeset_types::{AccessId, DatasetId, GroupId};

use lakeset_acl::{AclBackend, FsGateway, MemoryAcl, Setfacl};
use lakeset_hashing::HashEngine;
use lakeset_store::SqliteStore;
use std::sync::Arc;

/// Entry point to every dataset operation.
#[derive(Debug)]
pub struct DatasetService {
    config: Arc<CoreConfig>,
    store: Arc<SqliteStore>,
    hashing: Arc<HashEngine>,
    materializer: Materializer,
    access: AccessManager,
    pipeline: CreationPipeline,
    cancellations: Arc<CancellationRegistry>,
}

impl DatasetService {
    /// Builds the service from explicit collaborators.
    pub fn new(
        config: Arc<CoreConfig>,
        store: Arc<SqliteStore>,
        acl: Arc<dyn AclBackend>,
        notary: Option<Arc<dyn NotarizationSink>>,
    ) -> Self {
        let gateway = FsGateway::new(acl);
        let hashing = Arc::new(HashEngine::new(
            store.clone(),
            config.hash_cache_validity(),
        ));
        let materializer = Materializer::new(
            gateway.clone(),
            config.datalake_dir().to_path_buf(),
            config.datasets_dir().to_path_buf(),
            config.dataset_owner(),
        );
        let access = AccessManager::new(
            store.clone(),
            gateway,
            config.datalake_dir().to_path_buf(),
            config.datasets_dir().to_path_buf(),
        );
        let cancellations = Arc::new(CancellationRegistry::new());
        let pipeline = CreationPipeline::new(
            config.clone(),
            store.clone(),
            materializer.clone(),
            hashing.clone(),
            notary,
            cancellations.clone(),
        );
        Self {
            config,
            store,
            hashing,
            materializer,
            access,
            pipeline,
            cancellations,
        }
    }

    /// Opens the database and picks the ACL backend and notarization client the
    /// configuration asks for.
    pub fn from_config(config: Arc<CoreConfig>) -> DatasetResult<Self> {
        let store = Arc::new(SqliteStore::open(config.database_path())?);
        let acl: Arc<dyn AclBackend> = if config.acl_dry_run() {
            tracing::warn!("ACL dry run: permissions are recorded in memory only");
            Arc::new(MemoryAcl::new())
        } else {
            Arc::new(Setfacl::default())
        };
        let notary: Option<Arc<dyn NotarizationSink>> = match config.notary() {
            Some(notary) => Some(Arc::new(HttpNotarizer::new(notary.clone())?)),
            None => {
                tracing::warn!("no notarization service configured, datasets will not be notarized");
                None
            }
        };
        Ok(Self::new(config, store, acl, notary))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn register(&self, manifest: &DatasetManifest) -> DatasetResult<DatasetId> {
        manifest::register(&self.store, &self.config, manifest)
    }

    pub fn dataset(&self, id: &DatasetId) -> DatasetResult<Dataset> {
        self.store
            .get_dataset(id)?
            .ok_or(DatasetError::DatasetNotFound(*id))
    }

    pub fn datasets(&self) -> DatasetResult<Vec<Dataset>> {
        Ok(self.store.list_datasets()?)
    }

    pub fn run(&self, id: &DatasetId) -> DatasetResult<CreationOutcome> {
        self.pipeline.run(id)
    }

    pub fn request_cancellation(&self, id: &DatasetId) -> DatasetResult<bool> {
        self.pipeline.request_cancellation(id)
    }

    /// Requests a stop of every pipeline running in this process.
    pub fn cancel_all(&self) -> DatasetResult<Vec<DatasetId>> {
        let ids = self.cancellations.cancel_all();
        for id in &ids {
            self.store.request_stop(id)?;
        }
        Ok(ids)
    }

    pub fn relaunch(&self, id: &DatasetId) -> DatasetResult<()> {
        self.pipeline.relaunch(id)
    }

    pub fn status(&self, id: &DatasetId) -> DatasetResult<CreationStatus> {
        self.pipeline.status(id)
    }

    pub fn open_access(
        &self,
        group: GroupId,
        datasets: &[DatasetId],
        preauthorized: bool,
    ) -> DatasetResult<AccessRecord> {
        self.access.open(group, datasets, preauthorized)
    }

    pub fn close_access(&self, id: AccessId) -> DatasetResult<AccessRecord> {
        self.access.close(id)
    }

    /// Withdraws every grant on the dataset directory and marks the dataset invalidated.
    pub fn invalidate(&self, id: &DatasetId) -> DatasetResult<()> {
        self.dataset(id)?;
        self.materializer.invalidate(id)?;
        self.store.set_dataset_state(id, DatasetState::Invalidated)?;
        tracing::info!("dataset {} invalidated", id);
        Ok(())
    }

    pub fn verify(&self, id: &DatasetId) -> DatasetResult<IntegrityReport> {
        integrity::verify(&self.store, &self.hashing, self.config.datalake_dir(), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::manifest;
    use crate::notary::testing::RecordingNotarizer;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        acl: Arc<MemoryAcl>,
        notary: Arc<RecordingNotarizer>,
        service: DatasetService,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let lake = temp.path().join("lake");
        for (study, bytes) in [("st-1", b"one"), ("st-2", b"two")] {
            let dir = lake.join("proj").join(format!("subject-{study}")).join(study).join("ser");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("img.dcm"), bytes).unwrap();
        }
        let datasets = temp.path().join("datasets");
        fs::create_dir_all(&datasets).unwrap();
        let config = Arc::new(CoreConfig::new(lake, datasets).unwrap());
        let acl = Arc::new(MemoryAcl::new());
        let notary = Arc::new(RecordingNotarizer::default());
        let service = DatasetService::new(
            config,
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            acl.clone(),
            Some(notary.clone()),
        );
        Fixture {
            _temp: temp,
            acl,
            notary,
            service,
        }
    }

    fn create(f: &Fixture) -> DatasetId {
        let id = f
            .service
            .register(&manifest(
                "proj",
                &[
                    ("st-1", "proj/subject-st-1/st-1", &["ser"]),
                    ("st-2", "proj/subject-st-2/st-2", &["ser"]),
                ],
            ))
            .unwrap();
        assert_eq!(f.service.run(&id).unwrap(), CreationOutcome::Completed);
        id
    }

    #[test]
    fn created_dataset_can_be_accessed_and_verified() {
        let f = fixture();
        let id = create(&f);
        assert_eq!(f.notary.requests().len(), 1);

        let group = GroupId::new(4242);
        let access = f.service.open_access(group, &[id], false).unwrap();
        let dataset_dir = f.service.config().dataset_dir(&id);
        assert!(f.acl.grant_for(group, &dataset_dir).is_some());

        let report = f.service.verify(&id).unwrap();
        assert_eq!(report.checked, 2);
        assert!(!report.is_corrupted());

        f.service.close_access(access.id).unwrap();
        assert!(f.acl.grant_for(group, &dataset_dir).is_none());
    }

    #[test]
    fn invalidated_dataset_loses_grants_and_cannot_be_opened() {
        let f = fixture();
        let id = create(&f);
        let group = GroupId::new(7);
        f.service.open_access(group, &[id], false).unwrap();

        f.service.invalidate(&id).unwrap();

        let dataset_dir = f.service.config().dataset_dir(&id);
        assert!(f.acl.groups_on(&dataset_dir).is_empty());
        assert_eq!(f.service.dataset(&id).unwrap().state, DatasetState::Invalidated);
        assert!(matches!(
            f.service.open_access(group, &[id], false),
            Err(DatasetError::DatasetInvalidated(_))
        ));
    }

    #[test]
    fn cancel_all_without_running_pipelines_is_empty() {
        let f = fixture();
        assert!(f.service.cancel_all().unwrap().is_empty());
    }

    #[test]
    fn unknown_dataset_operations_are_not_found() {
        let f = fixture();
        let id = DatasetId::new();
        assert!(matches!(
            f.service.invalidate(&id),
            Err(DatasetError::DatasetNotFound(_))
        ));
        assert!(matches!(
            f.service.status(&id),
            Err(DatasetError::DatasetNotFound(_))
        ));
    }
}
