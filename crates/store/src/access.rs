//! Access rows: which group may currently read which datasets.

use crate::models::AccessRecord;
use crate::{time_from_sql, time_to_sql, SqliteStore, StoreError, StoreResult};
use chrono::Utc;
use lakeset_types::{AccessId, DatasetId, GroupId};
use rusqlite::{params, Connection, OptionalExtension};

type AccessRow = (i64, u32, bool, bool, String, Option<String>);

const ACCESS_COLUMNS: &str = "id, group_id, preauthorized, closed, started_at, ended_at";

impl SqliteStore {
    /// Persists a new open access of `group` to `datasets`.
    pub fn open_access(
        &self,
        group: GroupId,
        datasets: &[DatasetId],
        preauthorized: bool,
    ) -> StoreResult<AccessRecord> {
        let started_at = Utc::now();
        let id = self.with_connection(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO access (group_id, preauthorized, closed, started_at) \
                 VALUES (?1, ?2, 0, ?3)",
                params![group.get(), preauthorized, time_to_sql(started_at)],
            )?;
            let id = tx.last_insert_rowid();
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO access_dataset (access_id, dataset_id) VALUES (?1, ?2)",
                )?;
                for dataset in datasets {
                    stmt.execute(params![id, dataset.to_string()])?;
                }
            }
            tx.commit()?;
            Ok(id)
        })?;
        self.access(AccessId(id))?
            .ok_or_else(|| StoreError::NotFound(format!("access {id}")))
    }

    /// Marks an access closed. Returns the record as it was before closing so the caller can
    /// revoke what it granted; an already closed access is a conflict.
    pub fn close_access(&self, id: AccessId) -> StoreResult<AccessRecord> {
        let record = self
            .access(id)?
            .ok_or_else(|| StoreError::NotFound(format!("access {id}")))?;
        if record.closed {
            return Err(StoreError::Conflict(format!("access {id} is already closed")));
        }
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE access SET closed = 1, ended_at = ?2 WHERE id = ?1",
                params![id.0, time_to_sql(Utc::now())],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    pub fn access(&self, id: AccessId) -> StoreResult<Option<AccessRecord>> {
        self.with_connection(|conn| {
            let row: Option<AccessRow> = conn
                .query_row(
                    &format!("SELECT {ACCESS_COLUMNS} FROM access WHERE id = ?1"),
                    params![id.0],
                    read_access_row,
                )
                .optional()?;
            row.map(|row| to_record(conn, row)).transpose()
        })
    }

    /// Open accesses of a group, oldest first.
    pub fn open_accesses_for_group(&self, group: GroupId) -> StoreResult<Vec<AccessRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACCESS_COLUMNS} FROM access \
                 WHERE group_id = ?1 AND closed = 0 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(params![group.get()], read_access_row)?
                .collect::<rusqlite::Result<Vec<AccessRow>>>()?;
            drop(stmt);
            rows.into_iter().map(|row| to_record(conn, row)).collect()
        })
    }
}

fn read_access_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccessRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn to_record(conn: &Connection, row: AccessRow) -> StoreResult<AccessRecord> {
    let (id, group, preauthorized, closed, started_at, ended_at) = row;
    let mut stmt = conn.prepare(
        "SELECT dataset_id FROM access_dataset WHERE access_id = ?1 ORDER BY dataset_id",
    )?;
    let dataset_ids = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))?
        .map(|value| {
            let value = value?;
            DatasetId::parse(&value).map_err(|e| StoreError::Corrupt(e.to_string()))
        })
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(AccessRecord {
        id: AccessId(id),
        group: GroupId::new(group),
        dataset_ids,
        preauthorized,
        closed,
        started_at: time_from_sql(&started_at)?,
        ended_at: ended_at.as_deref().map(time_from_sql).transpose()?,
    })
}
