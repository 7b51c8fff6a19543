use crate::StoreResult;
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dataset (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    project TEXT NOT NULL,
    source TEXT NOT NULL,
    state TEXT NOT NULL,
    size_in_bytes INTEGER,
    corrupted INTEGER NOT NULL DEFAULT 0,
    last_integrity_check TEXT,
    metadata TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS study (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    subject_name TEXT NOT NULL,
    path_in_datalake TEXT NOT NULL,
    url TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    hash TEXT
);
CREATE TABLE IF NOT EXISTS series (
    study_id TEXT NOT NULL,
    folder_name TEXT NOT NULL,
    hash TEXT NOT NULL,
    hash_computed_at TEXT NOT NULL,
    PRIMARY KEY (study_id, folder_name)
);
CREATE TABLE IF NOT EXISTS dataset_study (
    dataset_id TEXT NOT NULL REFERENCES dataset(id) ON DELETE CASCADE,
    study_id TEXT NOT NULL REFERENCES study(id),
    position INTEGER NOT NULL,
    series TEXT NOT NULL,
    subproject TEXT,
    PRIMARY KEY (dataset_id, study_id)
);
CREATE TABLE IF NOT EXISTS creation_checkpoint (
    dataset_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    last_message TEXT NOT NULL DEFAULT '',
    stop_requested INTEGER NOT NULL DEFAULT 0,
    pruned INTEGER NOT NULL DEFAULT 0,
    metadata_collected INTEGER NOT NULL DEFAULT 0,
    materialized INTEGER NOT NULL DEFAULT 0,
    index_written INTEGER NOT NULL DEFAULT 0,
    notarized INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS access (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL,
    preauthorized INTEGER NOT NULL,
    closed INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    ended_at TEXT
);
CREATE TABLE IF NOT EXISTS access_dataset (
    access_id INTEGER NOT NULL REFERENCES access(id) ON DELETE CASCADE,
    dataset_id TEXT NOT NULL REFERENCES dataset(id),
    PRIMARY KEY (access_id, dataset_id)
);
CREATE INDEX IF NOT EXISTS idx_dataset_study_position ON dataset_study (dataset_id, position);
CREATE INDEX IF NOT EXISTS idx_access_group_open ON access (group_id, closed);
";

pub(crate) fn initialize(connection: &mut Connection) -> StoreResult<()> {
    let tx = connection.transaction()?;
    tx.execute_batch(SCHEMA)?;
    tx.commit()?;
    Ok(())
}
