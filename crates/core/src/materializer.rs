//! Builds the on-disk tree of a dataset.
//!
//! A dataset directory holds one sub-directory per subject with a symbolic link per study
//! pointing into the data lake:
//!
//! ```text
//! <datasets>/<id>/                      0700, readable through ACL grants only
//! └── <subject>/                        0755
//!     └── <study-dir> -> <datalake>/<path_in_datalake>
//! ```
//!
//! The linked study directories are tightened to 0700 so that group and other can only read
//! them through an explicit ACL grant, while everything beneath them stays world-readable.
//! Tightening the mode also rewrites the ACL mask from the group bits, which would silence
//! grants already held through other datasets sharing the study, so the mask is set back to
//! `r-x` afterwards.

use crate::constants::{
    DATASET_DIR_MODE, SOURCE_DIR_MODE, SOURCE_FILE_MODE, STUDY_DIR_MODE, SUBJECT_DIR_MODE,
};
use crate::paths::resolve_under;
use crate::{DatasetError, DatasetResult};
use lakeset_acl::{AclPerms, FsGateway, Ownership};
use lakeset_store::DatasetStudy;
use lakeset_types::DatasetId;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub links_created: usize,
    pub links_existing: usize,
}

#[derive(Clone, Debug)]
pub struct Materializer {
    gateway: FsGateway,
    datalake_dir: PathBuf,
    datasets_dir: PathBuf,
    owner: Option<Ownership>,
}

impl Materializer {
    pub fn new(
        gateway: FsGateway,
        datalake_dir: PathBuf,
        datasets_dir: PathBuf,
        owner: Option<Ownership>,
    ) -> Self {
        Self {
            gateway,
            datalake_dir,
            datasets_dir,
            owner,
        }
    }

    pub fn dataset_dir(&self, id: &DatasetId) -> PathBuf {
        self.datasets_dir.join(id.to_string())
    }

    /// Creates the dataset tree. Safe to re-run: existing directories and links are kept.
    pub fn materialize(
        &self,
        id: &DatasetId,
        studies: &[DatasetStudy],
    ) -> DatasetResult<MaterializeReport> {
        let dataset_dir = self.dataset_dir(id);
        self.gateway
            .create_directory(&dataset_dir, self.owner, DATASET_DIR_MODE)?;

        let mut report = MaterializeReport::default();
        for entry in studies {
            let study = &entry.study;
            let subject_dir = resolve_under(&dataset_dir, &study.subject_name)?;
            let source_dir = resolve_under(&self.datalake_dir, &study.path_in_datalake)?;
            let link_name = study.directory_name();
            if matches!(link_name, "" | "." | "..") {
                return Err(DatasetError::InvalidInput(format!(
                    "study {} has no directory name in '{}'",
                    study.id, study.path_in_datalake
                )));
            }

            self.gateway
                .create_directory(&subject_dir, self.owner, SUBJECT_DIR_MODE)?;
            let link = subject_dir.join(link_name);
            if self.gateway.create_symlink(&source_dir, &link)? {
                report.links_created += 1;
            } else {
                report.links_existing += 1;
            }

            self.restrict_source(&source_dir)?;
        }

        tracing::info!(
            "materialized dataset {}: {} links created, {} already present",
            id,
            report.links_created,
            report.links_existing
        );
        Ok(report)
    }

    fn restrict_source(&self, study_dir: &Path) -> DatasetResult<()> {
        self.gateway.chmod(study_dir, STUDY_DIR_MODE)?;
        self.gateway
            .set_acl_mask(AclPerms::READ_TRAVERSE, study_dir)?;
        self.gateway
            .chmod_tree(study_dir, SOURCE_DIR_MODE, SOURCE_FILE_MODE)?;
        Ok(())
    }

    /// Removes every ACL grant on the dataset directory itself. The linked study directories
    /// are left alone since other datasets may share them.
    pub fn invalidate(&self, id: &DatasetId) -> DatasetResult<()> {
        let dataset_dir = self.dataset_dir(id);
        if !dataset_dir.is_dir() {
            tracing::warn!(
                "dataset {} has no directory at {}, nothing to invalidate",
                id,
                dataset_dir.display()
            );
            return Ok(());
        }
        self.gateway.clear_all_grants(&dataset_dir, false)?;
        Ok(())
    }
}
