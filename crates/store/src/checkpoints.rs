//! Creation checkpoints: one row per dataset that is still being created.

use crate::models::{Checkpoint, CheckpointStatus, CreationPhase};
use crate::{SqliteStore, StoreError, StoreResult};
use lakeset_types::DatasetId;
use rusqlite::{params, OptionalExtension};

impl SqliteStore {
    /// Creates the checkpoint of a dataset, or marks an existing one as running again.
    ///
    /// Phase flags of an existing checkpoint are kept, so the new run resumes where the
    /// previous one stopped. The stop marker is kept while the checkpoint is running and
    /// cleared once a previous run ended in `error`.
    pub fn begin_checkpoint(&self, id: &DatasetId, message: &str) -> StoreResult<Checkpoint> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO creation_checkpoint (dataset_id, status, last_message) \
                 VALUES (?1, 'running', ?2) \
                 ON CONFLICT(dataset_id) DO UPDATE SET status = 'running', \
                     last_message = excluded.last_message, \
                     stop_requested = CASE WHEN creation_checkpoint.status = 'error' \
                         THEN 0 ELSE creation_checkpoint.stop_requested END",
                params![id.to_string(), message],
            )?;
            Ok(())
        })?;
        self.checkpoint(id)?
            .ok_or_else(|| StoreError::NotFound(format!("checkpoint of {id}")))
    }

    pub fn checkpoint(&self, id: &DatasetId) -> StoreResult<Option<Checkpoint>> {
        let row = self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT status, last_message, stop_requested, pruned, metadata_collected, \
                            materialized, index_written, notarized \
                     FROM creation_checkpoint WHERE dataset_id = ?1",
                    params![id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            [
                                row.get::<_, bool>(2)?,
                                row.get::<_, bool>(3)?,
                                row.get::<_, bool>(4)?,
                                row.get::<_, bool>(5)?,
                                row.get::<_, bool>(6)?,
                                row.get::<_, bool>(7)?,
                            ],
                        ))
                    },
                )
                .optional()?)
        })?;
        let Some((status, last_message, flags)) = row else {
            return Ok(None);
        };
        let [stop_requested, pruned, metadata_collected, materialized, index_written, notarized] =
            flags;
        Ok(Some(Checkpoint {
            dataset_id: *id,
            status: CheckpointStatus::from_sql(&status)?,
            last_message,
            stop_requested,
            pruned,
            metadata_collected,
            materialized,
            index_written,
            notarized,
        }))
    }

    /// Records the message shown to users while the pipeline runs.
    pub fn report_progress(&self, id: &DatasetId, message: &str) -> StoreResult<()> {
        self.update_checkpoint(
            id,
            "UPDATE creation_checkpoint SET last_message = ?2 WHERE dataset_id = ?1",
            message,
        )
    }

    pub fn mark_phase_done(&self, id: &DatasetId, phase: CreationPhase) -> StoreResult<()> {
        let sql = format!(
            "UPDATE creation_checkpoint SET {} = 1 WHERE dataset_id = ?1",
            phase.column()
        );
        self.with_connection(|conn| {
            if conn.execute(&sql, params![id.to_string()])? == 0 {
                return Err(StoreError::NotFound(format!("checkpoint of {id}")));
            }
            Ok(())
        })
    }

    /// Persists a stop request. Returns false if the dataset has no checkpoint, i.e. it is
    /// not being created.
    pub fn request_stop(&self, id: &DatasetId) -> StoreResult<bool> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE creation_checkpoint SET stop_requested = 1 WHERE dataset_id = ?1",
                params![id.to_string()],
            )?;
            Ok(updated > 0)
        })
    }

    pub fn is_stop_requested(&self, id: &DatasetId) -> StoreResult<bool> {
        self.with_connection(|conn| {
            let flag: Option<bool> = conn
                .query_row(
                    "SELECT stop_requested FROM creation_checkpoint WHERE dataset_id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(flag.unwrap_or(false))
        })
    }

    /// Marks the creation as failed with the message users will see.
    pub fn fail_checkpoint(&self, id: &DatasetId, message: &str) -> StoreResult<()> {
        self.update_checkpoint(
            id,
            "UPDATE creation_checkpoint SET status = 'error', last_message = ?2 \
             WHERE dataset_id = ?1",
            message,
        )
    }

    /// Clears the stop marker and error status so the next run resumes.
    pub fn reset_checkpoint(&self, id: &DatasetId, message: &str) -> StoreResult<()> {
        self.update_checkpoint(
            id,
            "UPDATE creation_checkpoint SET status = 'running', stop_requested = 0, \
             last_message = ?2 WHERE dataset_id = ?1",
            message,
        )
    }

    /// Deletes the checkpoint once creation has finished.
    pub fn clear_checkpoint(&self, id: &DatasetId) -> StoreResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM creation_checkpoint WHERE dataset_id = ?1",
                params![id.to_string()],
            )?;
            Ok(())
        })
    }

    fn update_checkpoint(&self, id: &DatasetId, sql: &str, message: &str) -> StoreResult<()> {
        self.with_connection(|conn| {
            if conn.execute(sql, params![id.to_string(), message])? == 0 {
                return Err(StoreError::NotFound(format!("checkpoint of {id}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_creates_a_running_checkpoint() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = DatasetId::new();

        let checkpoint = store.begin_checkpoint(&id, "Starting").unwrap();

        assert_eq!(checkpoint.status, CheckpointStatus::Running);
        assert_eq!(checkpoint.last_message, "Starting");
        assert!(!checkpoint.pruned);
        assert!(!checkpoint.stop_requested);
    }

    #[test]
    fn phase_flags_survive_a_second_begin() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = DatasetId::new();
        store.begin_checkpoint(&id, "Starting").unwrap();
        store.mark_phase_done(&id, CreationPhase::Pruned).unwrap();
        store.mark_phase_done(&id, CreationPhase::Materialized).unwrap();
        store.fail_checkpoint(&id, "boom").unwrap();

        let checkpoint = store.begin_checkpoint(&id, "Resuming").unwrap();

        assert_eq!(checkpoint.status, CheckpointStatus::Running);
        assert!(checkpoint.is_done(CreationPhase::Pruned));
        assert!(checkpoint.is_done(CreationPhase::Materialized));
        assert!(!checkpoint.is_done(CreationPhase::MetadataCollected));
    }

    #[test]
    fn stop_requests_need_a_checkpoint() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = DatasetId::new();

        assert!(!store.request_stop(&id).unwrap());
        assert!(!store.is_stop_requested(&id).unwrap());

        store.begin_checkpoint(&id, "Starting").unwrap();
        assert!(store.request_stop(&id).unwrap());
        assert!(store.is_stop_requested(&id).unwrap());

        store.reset_checkpoint(&id, "Relaunched").unwrap();
        assert!(!store.is_stop_requested(&id).unwrap());
    }

    #[test]
    fn begin_keeps_a_pending_stop_and_drops_an_honoured_one() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = DatasetId::new();
        store.begin_checkpoint(&id, "queued").unwrap();
        store.request_stop(&id).unwrap();

        let checkpoint = store.begin_checkpoint(&id, "started").unwrap();
        assert!(checkpoint.stop_requested);

        store.fail_checkpoint(&id, "Canceled by user.").unwrap();
        let checkpoint = store.begin_checkpoint(&id, "started again").unwrap();
        assert!(!checkpoint.stop_requested);
        assert_eq!(checkpoint.status, CheckpointStatus::Running);
    }

    #[test]
    fn failure_keeps_the_row_and_clear_removes_it() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = DatasetId::new();
        store.begin_checkpoint(&id, "Starting").unwrap();

        store.fail_checkpoint(&id, "Canceled by user.").unwrap();
        let checkpoint = store.checkpoint(&id).unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Error);
        assert_eq!(checkpoint.last_message, "Canceled by user.");

        store.clear_checkpoint(&id).unwrap();
        assert!(store.checkpoint(&id).unwrap().is_none());
    }

    #[test]
    fn progress_without_checkpoint_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.report_progress(&DatasetId::new(), "hello");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
