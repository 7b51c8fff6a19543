//! Datasets, studies and the ordered study list of each dataset.

use crate::models::{
    Dataset, DatasetMetadata, DatasetSource, DatasetState, DatasetStudy, SeriesSelection, Study,
    StudyMetadata,
};
use crate::{time_from_sql, time_to_sql, SqliteStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use lakeset_types::{DatasetId, Sha256Hash};
use rusqlite::{params, OptionalExtension, Transaction};

const DATASET_COLUMNS: &str = "id, name, project, source, state, size_in_bytes, corrupted, \
                               last_integrity_check, metadata, created_at";

struct DatasetRow {
    id: String,
    name: String,
    project: String,
    source: String,
    state: String,
    size_in_bytes: Option<i64>,
    corrupted: bool,
    last_integrity_check: Option<String>,
    metadata: Option<String>,
    created_at: String,
}

impl DatasetRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            project: row.get(2)?,
            source: row.get(3)?,
            state: row.get(4)?,
            size_in_bytes: row.get(5)?,
            corrupted: row.get(6)?,
            last_integrity_check: row.get(7)?,
            metadata: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_dataset(self) -> StoreResult<Dataset> {
        let id = DatasetId::parse(&self.id).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let size_in_bytes = self
            .size_in_bytes
            .map(|size| {
                u64::try_from(size)
                    .map_err(|_| StoreError::Corrupt(format!("negative size for {id}")))
            })
            .transpose()?;
        Ok(Dataset {
            id,
            name: self.name,
            project: self.project,
            source: DatasetSource::from_sql(&self.source)?,
            state: DatasetState::from_sql(&self.state)?,
            size_in_bytes,
            corrupted: self.corrupted,
            last_integrity_check: self
                .last_integrity_check
                .as_deref()
                .map(time_from_sql)
                .transpose()?,
            metadata: self
                .metadata
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: time_from_sql(&self.created_at)?,
        })
    }
}

impl SqliteStore {
    /// Inserts a dataset with its ordered studies. Studies already known by id are updated.
    pub fn insert_dataset(&self, dataset: &Dataset, studies: &[DatasetStudy]) -> StoreResult<()> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM dataset WHERE id = ?1)",
                params![dataset.id.to_string()],
                |row| row.get(0),
            )?;
            if exists {
                return Err(StoreError::Conflict(format!(
                    "dataset {} already exists",
                    dataset.id
                )));
            }
            let metadata = dataset
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                &format!("INSERT INTO dataset ({DATASET_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    dataset.id.to_string(),
                    dataset.name,
                    dataset.project,
                    dataset.source.as_str(),
                    dataset.state.as_str(),
                    dataset.size_in_bytes.map(size_to_sql).transpose()?,
                    dataset.corrupted,
                    dataset.last_integrity_check.map(time_to_sql),
                    metadata,
                    time_to_sql(dataset.created_at),
                ],
            )?;
            for entry in studies {
                upsert_study(&tx, &entry.study)?;
            }
            insert_dataset_studies(&tx, &dataset.id, studies)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_dataset(&self, id: &DatasetId) -> StoreResult<Option<Dataset>> {
        let row = self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {DATASET_COLUMNS} FROM dataset WHERE id = ?1"),
                    params![id.to_string()],
                    DatasetRow::read,
                )
                .optional()?)
        })?;
        row.map(DatasetRow::into_dataset).transpose()
    }

    pub fn list_datasets(&self) -> StoreResult<Vec<Dataset>> {
        let rows = self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DATASET_COLUMNS} FROM dataset ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([], DatasetRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(DatasetRow::into_dataset).collect()
    }

    /// The studies of a dataset in dataset order.
    pub fn dataset_studies(&self, id: &DatasetId) -> StoreResult<Vec<DatasetStudy>> {
        type Raw = (
            String,
            String,
            String,
            String,
            Option<String>,
            String,
            Option<String>,
            String,
            Option<String>,
        );
        let rows: Vec<Raw> = self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.name, s.subject_name, s.path_in_datalake, s.url, s.metadata, \
                        s.hash, ds.series, ds.subproject \
                 FROM dataset_study ds JOIN study s ON s.id = ds.study_id \
                 WHERE ds.dataset_id = ?1 ORDER BY ds.position",
            )?;
            let rows = stmt
                .query_map(params![id.to_string()], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<Raw>>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(
                |(id, name, subject_name, path, url, metadata, hash, series, subproject)| {
                    let hash = hash
                        .as_deref()
                        .map(Sha256Hash::parse)
                        .transpose()
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                    let metadata: StudyMetadata = serde_json::from_str(&metadata)?;
                    let series: Vec<SeriesSelection> = serde_json::from_str(&series)?;
                    Ok(DatasetStudy {
                        study: Study {
                            id,
                            name,
                            subject_name,
                            path_in_datalake: path,
                            url,
                            metadata,
                            hash,
                        },
                        series,
                        subproject,
                    })
                },
            )
            .collect()
    }

    /// Replaces the study list of a dataset, e.g. after pruning.
    pub fn replace_dataset_studies(
        &self,
        id: &DatasetId,
        studies: &[DatasetStudy],
    ) -> StoreResult<()> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM dataset_study WHERE dataset_id = ?1",
                params![id.to_string()],
            )?;
            insert_dataset_studies(&tx, id, studies)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Stores derived metadata for a dataset and its studies in one transaction.
    pub fn record_collected_metadata(
        &self,
        id: &DatasetId,
        metadata: &DatasetMetadata,
        size_in_bytes: u64,
        studies: &[DatasetStudy],
    ) -> StoreResult<()> {
        let metadata = serde_json::to_string(metadata)?;
        let size = size_to_sql(size_in_bytes)?;
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE dataset SET metadata = ?2, size_in_bytes = ?3 WHERE id = ?1",
                params![id.to_string(), metadata, size],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("dataset {id}")));
            }
            for entry in studies {
                tx.execute(
                    "UPDATE study SET metadata = ?2 WHERE id = ?1",
                    params![entry.study.id, serde_json::to_string(&entry.study.metadata)?],
                )?;
                tx.execute(
                    "UPDATE dataset_study SET subproject = ?3 WHERE dataset_id = ?1 AND study_id = ?2",
                    params![id.to_string(), entry.study.id, entry.subproject],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn set_study_hashes(&self, hashes: &[(String, Sha256Hash)]) -> StoreResult<()> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            for (study_id, hash) in hashes {
                tx.execute(
                    "UPDATE study SET hash = ?2 WHERE id = ?1",
                    params![study_id, hash.to_hex()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn set_dataset_state(&self, id: &DatasetId, state: DatasetState) -> StoreResult<()> {
        self.update_dataset(
            id,
            "UPDATE dataset SET state = ?2 WHERE id = ?1",
            state.as_str().to_owned(),
        )
    }

    pub fn record_integrity_check(
        &self,
        id: &DatasetId,
        corrupted: bool,
        checked_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE dataset SET corrupted = ?2, last_integrity_check = ?3 WHERE id = ?1",
                params![id.to_string(), corrupted, time_to_sql(checked_at)],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("dataset {id}")));
            }
            Ok(())
        })
    }

    fn update_dataset(&self, id: &DatasetId, sql: &str, value: String) -> StoreResult<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(sql, params![id.to_string(), value])?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("dataset {id}")));
            }
            Ok(())
        })
    }
}

fn size_to_sql(size: u64) -> StoreResult<i64> {
    i64::try_from(size).map_err(|_| StoreError::Corrupt(format!("size {size} out of range")))
}

fn upsert_study(tx: &Transaction<'_>, study: &Study) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO study (id, name, subject_name, path_in_datalake, url, metadata, hash) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, \
             subject_name = excluded.subject_name, \
             path_in_datalake = excluded.path_in_datalake, \
             url = excluded.url",
        params![
            study.id,
            study.name,
            study.subject_name,
            study.path_in_datalake,
            study.url,
            serde_json::to_string(&study.metadata)?,
            study.hash.map(|h| h.to_hex()),
        ],
    )?;
    Ok(())
}

fn insert_dataset_studies(
    tx: &Transaction<'_>,
    id: &DatasetId,
    studies: &[DatasetStudy],
) -> StoreResult<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO dataset_study (dataset_id, study_id, position, series, subproject) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (position, entry) in studies.iter().enumerate() {
        let position = i64::try_from(position)
            .map_err(|_| StoreError::Corrupt("too many studies".to_owned()))?;
        stmt.execute(params![
            id.to_string(),
            entry.study.id,
            position,
            serde_json::to_string(&entry.series)?,
            entry.subproject,
        ])?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn dataset_study(id: &str, series: &[&str]) -> DatasetStudy {
        DatasetStudy {
            study: Study {
                id: id.into(),
                name: format!("Study {id}"),
                subject_name: format!("subject-{id}"),
                path_in_datalake: format!("proj/subject-{id}/{id}"),
                url: None,
                metadata: StudyMetadata::default(),
                hash: None,
            },
            series: series.iter().map(|s| SeriesSelection::new(*s)).collect(),
            subproject: None,
        }
    }

    pub(crate) fn insert_sample(store: &SqliteStore) -> Dataset {
        let dataset = Dataset::draft(DatasetId::new(), "Sample", "proj", DatasetSource::Internal);
        store
            .insert_dataset(
                &dataset,
                &[dataset_study("st-b", &["s1", "s2"]), dataset_study("st-a", &["s1"])],
            )
            .unwrap();
        dataset
    }

    #[test]
    fn insert_and_get_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dataset = insert_sample(&store);

        let loaded = store.get_dataset(&dataset.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Sample");
        assert_eq!(loaded.state, DatasetState::Draft);
        assert_eq!(loaded.source, DatasetSource::Internal);
        assert_eq!(loaded.size_in_bytes, None);
    }

    #[test]
    fn missing_dataset_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_dataset(&DatasetId::new()).unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_a_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dataset = insert_sample(&store);
        let result = store.insert_dataset(&dataset, &[]);
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn studies_keep_dataset_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dataset = insert_sample(&store);

        let studies = store.dataset_studies(&dataset.id).unwrap();
        let ids: Vec<_> = studies.iter().map(|s| s.study.id.as_str()).collect();
        assert_eq!(ids, ["st-b", "st-a"]);
        assert_eq!(studies[0].series.len(), 2);
    }

    #[test]
    fn replace_studies_drops_pruned_entries() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dataset = insert_sample(&store);

        store
            .replace_dataset_studies(&dataset.id, &[dataset_study("st-a", &["s1"])])
            .unwrap();

        let studies = store.dataset_studies(&dataset.id).unwrap();
        assert_eq!(studies.len(), 1);
        assert_eq!(studies[0].study.id, "st-a");
    }

    #[test]
    fn collected_metadata_is_persisted() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dataset = insert_sample(&store);

        let mut studies = store.dataset_studies(&dataset.id).unwrap();
        studies[0].study.metadata.sex = Some("F".into());
        studies[0].subproject = Some("proj".into());
        let metadata = DatasetMetadata {
            sex: vec!["F".into()],
            ..DatasetMetadata::default()
        };
        store
            .record_collected_metadata(&dataset.id, &metadata, 4096, &studies)
            .unwrap();

        let loaded = store.get_dataset(&dataset.id).unwrap().unwrap();
        assert_eq!(loaded.size_in_bytes, Some(4096));
        assert_eq!(loaded.metadata, Some(metadata));
        let studies = store.dataset_studies(&dataset.id).unwrap();
        assert_eq!(studies[0].study.metadata.sex.as_deref(), Some("F"));
        assert_eq!(studies[0].subproject.as_deref(), Some("proj"));
    }

    #[test]
    fn study_hashes_and_integrity_are_recorded() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dataset = insert_sample(&store);
        let hash = Sha256Hash::from_bytes([7; 32]);

        store.set_study_hashes(&[("st-a".into(), hash)]).unwrap();
        store.record_integrity_check(&dataset.id, true, Utc::now()).unwrap();
        store.set_dataset_state(&dataset.id, DatasetState::Active).unwrap();

        let studies = store.dataset_studies(&dataset.id).unwrap();
        assert_eq!(studies[1].study.hash, Some(hash));
        assert_eq!(studies[0].study.hash, None);
        let loaded = store.get_dataset(&dataset.id).unwrap().unwrap();
        assert!(loaded.corrupted);
        assert!(loaded.last_integrity_check.is_some());
        assert_eq!(loaded.state, DatasetState::Active);
    }

    #[test]
    fn updating_unknown_dataset_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.set_dataset_state(&DatasetId::new(), DatasetState::Active);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
