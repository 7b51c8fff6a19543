//! # Lakeset Store
//!
//! SQLite persistence for the dataset pipeline.
//!
//! Every public method is its own unit of work: single statements run in autocommit mode and
//! multi-statement updates run inside one transaction that commits before the method
//! returns. Nothing spans pipeline phases, so a crash between two calls always leaves the
//! previous state durable and consistent.
//!
//! The schema is bootstrapped with `CREATE TABLE IF NOT EXISTS`; schema evolution is handled
//! elsewhere.

mod access;
mod checkpoints;
mod datasets;
mod models;
mod schema;
mod series_cache;

pub use models::{
    AccessRecord, Checkpoint, CheckpointStatus, CreationPhase, Dataset, DatasetMetadata,
    DatasetSource, DatasetState, DatasetStudy, SeriesSelection, Study, StudyMetadata,
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode or decode stored JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored value is invalid: {0}")]
    Corrupt(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// SQLite-backed store shared by the pipeline, the access manager and the hash engine.
#[derive(Debug)]
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and bootstraps the schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection = Connection::open_with_flags(path, flags)?;
        connection.execute_batch("PRAGMA journal_mode = wal; PRAGMA synchronous = full;")?;
        tracing::debug!("opened database at {}", path.display());
        Self::from_connection(connection)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut connection: Connection) -> StoreResult<Self> {
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        schema::initialize(&mut connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Runs `f` with exclusive use of the connection.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

pub(crate) fn time_to_sql(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn time_from_sql(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{value}': {e}")))
}
