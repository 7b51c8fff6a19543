//! Resumable dataset creation.
//!
//! [`CreationPipeline::run`] drives one dataset through its creation phases:
//!
//! 1. load the dataset row, retrying while it is not visible yet
//! 2. check every study, series and subject path stays inside its root
//! 3. drop missing series and studies left without series
//! 4. collect metadata and size, and check subproject ownership
//! 5. materialize the dataset tree
//! 6. write `index.json` and `eforms.json`
//! 7. hash the dataset and notarize the digests
//! 8. finish: delete the working file and the checkpoint
//!
//! Phases 3 to 7 record their completion on the creation checkpoint and are skipped when the
//! pipeline is relaunched after a failure or a stop. Every phase starts by checking whether a
//! stop was requested, in this process through the [`CancellationRegistry`] or from another
//! one through the persisted stop marker. Hashing also checks between series.
//!
//! A failed run keeps its checkpoint with status `error` and the message users will see, so
//! the failure stays visible until an operator relaunches or discards the creation.

use crate::cancellation::{CancellationRegistry, CancellationToken};
use crate::config::CoreConfig;
use crate::index::{eforms_path, index_path, write_eforms, write_index};
use crate::materializer::Materializer;
use crate::metadata;
use crate::notary::{NotarizationRequest, NotarizationSink};
use crate::paths::resolve_under;
use crate::{DatasetError, DatasetResult, ErrorKind};
use lakeset_hashing::{HashEngine, HashProgress, StudySource};
use lakeset_store::{
    Checkpoint, CheckpointStatus, CreationPhase, Dataset, DatasetSource, DatasetState,
    DatasetStudy, SqliteStore,
};
use lakeset_types::DatasetId;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreationOutcome {
    Completed,
    Cancelled,
    Failed { message: String },
}

/// Where the creation of a dataset stands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreationStatus {
    Running(Checkpoint),
    Failed(Checkpoint),
    /// No checkpoint left: creation finished (or never started) and the dataset is in `state`.
    Settled(DatasetState),
}

#[derive(Debug)]
pub struct CreationPipeline {
    config: Arc<CoreConfig>,
    store: Arc<SqliteStore>,
    materializer: Materializer,
    hashing: Arc<HashEngine>,
    notary: Option<Arc<dyn NotarizationSink>>,
    cancellations: Arc<CancellationRegistry>,
}

impl CreationPipeline {
    pub fn new(
        config: Arc<CoreConfig>,
        store: Arc<SqliteStore>,
        materializer: Materializer,
        hashing: Arc<HashEngine>,
        notary: Option<Arc<dyn NotarizationSink>>,
        cancellations: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            materializer,
            hashing,
            notary,
            cancellations,
        }
    }

    /// Runs (or resumes) the creation of `id`.
    ///
    /// A stop requested while the checkpoint is running cancels this run. A canceled or
    /// failed run can be resumed by calling `run` again.
    ///
    /// Pipeline failures are recorded on the checkpoint and reported through the outcome;
    /// `Err` means the failure could not even be recorded.
    pub fn run(&self, id: &DatasetId) -> DatasetResult<CreationOutcome> {
        let token = self.cancellations.register(*id);
        let result = self
            .store
            .begin_checkpoint(id, "Dataset creation started")
            .map_err(DatasetError::from)
            .and_then(|checkpoint| self.execute(id, &token, &checkpoint));
        self.cancellations.remove(id);

        match result {
            Ok(()) => {
                self.finish(id)?;
                tracing::info!("dataset {} created", id);
                Ok(CreationOutcome::Completed)
            }
            Err(error) => {
                let message = error.user_message();
                match error.kind() {
                    ErrorKind::Cancelled => tracing::info!("creation of dataset {} canceled", id),
                    ErrorKind::Recognized => {
                        tracing::warn!("creation of dataset {} failed: {}", id, error)
                    }
                    ErrorKind::Internal => {
                        tracing::error!("creation of dataset {} failed: {:?}", id, error)
                    }
                }
                self.store.fail_checkpoint(id, &message)?;
                Ok(match error.kind() {
                    ErrorKind::Cancelled => CreationOutcome::Cancelled,
                    _ => CreationOutcome::Failed { message },
                })
            }
        }
    }

    /// Asks the pipeline of `id` to stop at its next check. Returns false if `id` is not
    /// being created.
    pub fn request_cancellation(&self, id: &DatasetId) -> DatasetResult<bool> {
        let in_process = self.cancellations.cancel(id);
        let persisted = self.store.request_stop(id)?;
        if in_process || persisted {
            tracing::info!("stop requested for dataset {}", id);
        }
        Ok(in_process || persisted)
    }

    /// Clears the stop marker and error of an unfinished creation so that the next run
    /// resumes it.
    pub fn relaunch(&self, id: &DatasetId) -> DatasetResult<()> {
        if self.cancellations.is_running(id) {
            return Err(DatasetError::InvalidInput(format!(
                "dataset {id} is being created right now"
            )));
        }
        if self.store.checkpoint(id)?.is_none() {
            return Err(DatasetError::InvalidInput(format!(
                "dataset {id} is not being created"
            )));
        }
        self.store.reset_checkpoint(id, "Relaunch requested")?;
        Ok(())
    }

    pub fn status(&self, id: &DatasetId) -> DatasetResult<CreationStatus> {
        if let Some(checkpoint) = self.store.checkpoint(id)? {
            return Ok(match checkpoint.status {
                CheckpointStatus::Running => CreationStatus::Running(checkpoint),
                CheckpointStatus::Error => CreationStatus::Failed(checkpoint),
            });
        }
        let dataset = self
            .store
            .get_dataset(id)?
            .ok_or(DatasetError::DatasetNotFound(*id))?;
        Ok(CreationStatus::Settled(dataset.state))
    }

    fn execute(
        &self,
        id: &DatasetId,
        token: &CancellationToken,
        checkpoint: &Checkpoint,
    ) -> DatasetResult<()> {
        self.check_and_report(id, token, "Loading dataset")?;
        let dataset = self.load(id, token)?;
        if dataset.state == DatasetState::Invalidated {
            return Err(DatasetError::DatasetInvalidated(*id));
        }
        let mut studies = self.store.dataset_studies(id)?;

        self.check_and_report(id, token, "Checking paths")?;
        self.validate_paths(&dataset, &studies)?;

        if !checkpoint.is_done(CreationPhase::Pruned) {
            self.check_and_report(id, token, "Removing missing series")?;
            studies = self.prune(&studies)?;
            if studies.is_empty() {
                return Err(DatasetError::InvalidInput(
                    "none of the selected series exist in the data lake".into(),
                ));
            }
            self.store.replace_dataset_studies(id, &studies)?;
            self.store.mark_phase_done(id, CreationPhase::Pruned)?;
        }

        if !checkpoint.is_done(CreationPhase::MetadataCollected) {
            self.check_and_report(id, token, "Collecting metadata")?;
            let collected = metadata::collect(&dataset, &studies, self.config.datalake_dir())?;
            self.store.record_collected_metadata(
                id,
                &collected.dataset,
                collected.size_in_bytes,
                &collected.studies,
            )?;
            self.store
                .mark_phase_done(id, CreationPhase::MetadataCollected)?;
            studies = collected.studies;
        }

        if !checkpoint.is_done(CreationPhase::Materialized) {
            self.check_and_report(id, token, "Creating dataset directory")?;
            self.materializer.materialize(id, &studies)?;
            self.store.mark_phase_done(id, CreationPhase::Materialized)?;
        }

        let dataset_dir = self.config.dataset_dir(id);
        if !checkpoint.is_done(CreationPhase::IndexWritten) {
            self.check_and_report(id, token, "Writing index")?;
            write_index(&dataset_dir, &dataset, &studies)?;
            write_eforms(&dataset_dir, &self.config.working_file(id))?;
            self.store.mark_phase_done(id, CreationPhase::IndexWritten)?;
        }

        if !checkpoint.is_done(CreationPhase::Notarized) {
            self.hash_and_notarize(id, token, &dataset, &studies, &dataset_dir)?;
        }

        self.check_and_report(id, token, "Finishing")?;
        self.store.set_dataset_state(id, DatasetState::Active)?;
        Ok(())
    }

    /// Fails with `Cancelled` if a stop was requested, otherwise records `message`.
    fn check_and_report(
        &self,
        id: &DatasetId,
        token: &CancellationToken,
        message: &str,
    ) -> DatasetResult<()> {
        if token.is_cancelled() || self.store.is_stop_requested(id)? {
            return Err(DatasetError::Cancelled);
        }
        tracing::info!("dataset {}: {}", id, message);
        self.store.report_progress(id, message)?;
        Ok(())
    }

    fn load(&self, id: &DatasetId, token: &CancellationToken) -> DatasetResult<Dataset> {
        let retry = self.config.load_retry();
        for attempt in 1..=retry.attempts {
            if let Some(dataset) = self.store.get_dataset(id)? {
                return Ok(dataset);
            }
            if attempt < retry.attempts {
                tracing::debug!(
                    "dataset {} not visible yet (attempt {}/{})",
                    id,
                    attempt,
                    retry.attempts
                );
                thread::sleep(retry.interval);
                if token.is_cancelled() {
                    return Err(DatasetError::Cancelled);
                }
            }
        }
        Err(DatasetError::DatasetNotFound(*id))
    }

    fn validate_paths(&self, dataset: &Dataset, studies: &[DatasetStudy]) -> DatasetResult<()> {
        let datalake = self.config.datalake_dir();
        let dataset_dir = self.config.dataset_dir(&dataset.id);
        for entry in studies {
            let study_path = Path::new(&entry.study.path_in_datalake);
            resolve_under(datalake, study_path)?;
            for series in &entry.series {
                resolve_under(datalake, study_path.join(&series.folder_name))?;
            }
            resolve_under(&dataset_dir, &entry.study.subject_name)?;
        }
        Ok(())
    }

    fn prune(&self, studies: &[DatasetStudy]) -> DatasetResult<Vec<DatasetStudy>> {
        let mut kept = Vec::with_capacity(studies.len());
        for entry in studies {
            let study_dir =
                resolve_under(self.config.datalake_dir(), &entry.study.path_in_datalake)?;
            let mut entry = entry.clone();
            entry.series.retain(|series| {
                let present = study_dir.join(&series.folder_name).is_dir();
                if !present {
                    tracing::warn!(
                        "series {} of study {} is missing from the data lake, dropping it",
                        series.folder_name,
                        entry.study.id
                    );
                }
                present
            });
            if entry.series.is_empty() {
                tracing::warn!(
                    "study {} has no series left, dropping it",
                    entry.study.id
                );
                continue;
            }
            kept.push(entry);
        }
        Ok(kept)
    }

    fn hash_and_notarize(
        &self,
        id: &DatasetId,
        token: &CancellationToken,
        dataset: &Dataset,
        studies: &[DatasetStudy],
        dataset_dir: &Path,
    ) -> DatasetResult<()> {
        let Some(notary) = self.notary.as_ref() else {
            tracing::info!("no notarization service configured, skipping hashes of {}", id);
            return Ok(());
        };
        if dataset.source == DatasetSource::External {
            tracing::info!("dataset {} is external, skipping notarization", id);
            return Ok(());
        }

        self.check_and_report(id, token, "Computing hashes")?;
        let sources = studies
            .iter()
            .map(|entry| {
                Ok(StudySource {
                    study_id: entry.study.id.clone(),
                    study_dir: resolve_under(
                        self.config.datalake_dir(),
                        &entry.study.path_in_datalake,
                    )?,
                    series_folders: entry
                        .series
                        .iter()
                        .map(|series| series.folder_name.clone())
                        .collect(),
                })
            })
            .collect::<DatasetResult<Vec<_>>>()?;

        let mut should_stop = |event: HashProgress<'_>| match event {
            HashProgress::Study { .. } | HashProgress::Series { .. } => self.is_stopping(id, token),
            HashProgress::File { .. } => token.is_cancelled(),
        };
        let hashes = self
            .hashing
            .hashes_of_dataset(
                &index_path(dataset_dir),
                &eforms_path(dataset_dir),
                &sources,
                &mut should_stop,
            )?
            .ok_or(DatasetError::Cancelled)?;

        self.check_and_report(id, token, "Notarizing hashes")?;
        notary.notarize(&NotarizationRequest::dataset_created(id, &hashes))?;
        self.store.set_study_hashes(&hashes.studies)?;
        self.store.mark_phase_done(id, CreationPhase::Notarized)?;
        Ok(())
    }

    /// Stop check used inside hashing, where errors cannot be propagated.
    fn is_stopping(&self, id: &DatasetId, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return true;
        }
        match self.store.is_stop_requested(id) {
            Ok(requested) => requested,
            Err(e) => {
                tracing::warn!("could not read stop marker of dataset {}: {}", id, e);
                false
            }
        }
    }

    fn finish(&self, id: &DatasetId) -> DatasetResult<()> {
        let working_file = self.config.working_file(id);
        match fs::remove_file(&working_file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(DatasetError::io(working_file)(e)),
        }
        self.store.clear_checkpoint(id)?;
        Ok(())
    }
}
