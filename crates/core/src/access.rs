//! Access lifecycle: opening and closing group access to datasets.
//!
//! A group holds an ACL grant on a study directory exactly while at least one of its open
//! accesses includes a dataset containing that study. Two datasets may share a study, so
//! closing an access revokes only the set difference between the paths it covered and the
//! paths still covered by the group's remaining open accesses. Pre-authorized accesses hold no
//! grants and are left out of that count.

use crate::paths::resolve_under;
use crate::{DatasetError, DatasetResult};
use lakeset_acl::{AclPerms, FsGateway};
use lakeset_store::{AccessRecord, DatasetState, SqliteStore, StoreError};
use lakeset_types::{AccessId, DatasetId, GroupId};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

/// What the remaining open accesses of a group still cover.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessInUse {
    pub datasets: BTreeSet<DatasetId>,
    pub study_paths: BTreeSet<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct AccessManager {
    store: Arc<SqliteStore>,
    gateway: FsGateway,
    datalake_dir: PathBuf,
    datasets_dir: PathBuf,
}

impl AccessManager {
    pub fn new(
        store: Arc<SqliteStore>,
        gateway: FsGateway,
        datalake_dir: PathBuf,
        datasets_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            gateway,
            datalake_dir,
            datasets_dir,
        }
    }

    /// Opens an access of `group` to `datasets` and grants the ACL entries it needs.
    ///
    /// Pre-authorized accesses are recorded but grant nothing: the caller already has read
    /// rights through another channel.
    pub fn open(
        &self,
        group: GroupId,
        datasets: &[DatasetId],
        preauthorized: bool,
    ) -> DatasetResult<AccessRecord> {
        if datasets.is_empty() {
            return Err(DatasetError::InvalidInput(
                "an access needs at least one dataset".into(),
            ));
        }
        for id in datasets {
            let dataset = self
                .store
                .get_dataset(id)?
                .ok_or(DatasetError::DatasetNotFound(*id))?;
            if dataset.state == DatasetState::Invalidated {
                return Err(DatasetError::DatasetInvalidated(*id));
            }
        }

        let record = self.store.open_access(group, datasets, preauthorized)?;
        tracing::info!(
            "opened access {} for group {} to {} dataset(s)",
            record.id,
            group,
            datasets.len()
        );
        if !preauthorized {
            for id in datasets {
                let paths = self.study_paths(id)?;
                self.grant(id, group, &paths)?;
            }
        }
        Ok(record)
    }

    /// Closes an access and revokes what no remaining open access of the group still needs.
    pub fn close(&self, access_id: AccessId) -> DatasetResult<AccessRecord> {
        let record = self.store.close_access(access_id).map_err(|e| match e {
            StoreError::NotFound(_) => DatasetError::AccessNotFound(access_id),
            StoreError::Conflict(_) => DatasetError::AccessClosed(access_id),
            other => other.into(),
        })?;
        tracing::info!("closed access {} of group {}", record.id, record.group);
        if record.preauthorized {
            return Ok(record);
        }

        let in_use = self.in_use(record.group)?;
        self.revoke(record.group, &record.dataset_ids, &in_use)?;
        Ok(record)
    }

    /// Grants read and traverse on the dataset directory and on each study directory.
    pub fn grant(
        &self,
        dataset: &DatasetId,
        group: GroupId,
        study_paths: &BTreeSet<PathBuf>,
    ) -> DatasetResult<()> {
        let dataset_dir = self.datasets_dir.join(dataset.to_string());
        self.gateway
            .grant_group_access(group, AclPerms::READ_TRAVERSE, &dataset_dir, false)?;
        for path in study_paths {
            self.gateway
                .grant_group_access(group, AclPerms::READ_TRAVERSE, path, false)?;
        }
        Ok(())
    }

    /// Revokes the grants of `candidates` that `in_use` does not cover any more.
    pub fn revoke(
        &self,
        group: GroupId,
        candidates: &[DatasetId],
        in_use: &AccessInUse,
    ) -> DatasetResult<()> {
        let mut closed_paths = BTreeSet::new();
        for dataset in candidates {
            if !in_use.datasets.contains(dataset) {
                let dataset_dir = self.datasets_dir.join(dataset.to_string());
                self.gateway.revoke_group_access(group, &dataset_dir, false)?;
            }
            closed_paths.extend(self.study_paths(dataset)?);
        }

        for path in closed_paths.difference(&in_use.study_paths) {
            self.gateway.revoke_group_access(group, path, false)?;
        }
        Ok(())
    }

    /// Datasets and study paths covered by the open accesses of `group` that hold grants.
    /// Pre-authorized accesses granted nothing, so they keep nothing alive.
    pub fn in_use(&self, group: GroupId) -> DatasetResult<AccessInUse> {
        let mut in_use = AccessInUse::default();
        for access in self.store.open_accesses_for_group(group)? {
            if access.preauthorized {
                continue;
            }
            for dataset in access.dataset_ids {
                if in_use.datasets.insert(dataset) {
                    in_use.study_paths.extend(self.study_paths(&dataset)?);
                }
            }
        }
        Ok(in_use)
    }

    /// Source study directories of a dataset.
    pub fn study_paths(&self, dataset: &DatasetId) -> DatasetResult<BTreeSet<PathBuf>> {
        self.store
            .dataset_studies(dataset)?
            .iter()
            .map(|entry| resolve_under(&self.datalake_dir, &entry.study.path_in_datalake))
            .collect()
    }
}
