//! Series digest cache backing the hash engine.

use crate::{time_from_sql, time_to_sql, SqliteStore, StoreError};
use lakeset_hashing::{CachedDigest, HashCache, HashError, HashResult};
use lakeset_types::Sha256Hash;
use rusqlite::{params, OptionalExtension};

fn cache_error(error: StoreError) -> HashError {
    HashError::Cache(Box::new(error))
}

impl HashCache for SqliteStore {
    fn cached_series_hash(
        &self,
        study_id: &str,
        series_folder: &str,
    ) -> HashResult<Option<CachedDigest>> {
        let row = self
            .with_connection(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT hash, hash_computed_at FROM series \
                         WHERE study_id = ?1 AND folder_name = ?2",
                        params![study_id, series_folder],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?)
            })
            .map_err(cache_error)?;
        let Some((hash, computed_at)) = row else {
            return Ok(None);
        };
        let hash = Sha256Hash::parse(&hash)
            .map_err(|e| cache_error(StoreError::Corrupt(e.to_string())))?;
        let computed_at = time_from_sql(&computed_at).map_err(cache_error)?;
        Ok(Some(CachedDigest { hash, computed_at }))
    }

    fn store_series_hash(
        &self,
        study_id: &str,
        series_folder: &str,
        digest: &CachedDigest,
    ) -> HashResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO series (study_id, folder_name, hash, hash_computed_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(study_id, folder_name) DO UPDATE SET \
                     hash = excluded.hash, hash_computed_at = excluded.hash_computed_at",
                params![
                    study_id,
                    series_folder,
                    digest.hash.to_hex(),
                    time_to_sql(digest.computed_at)
                ],
            )?;
            Ok(())
        })
        .map_err(cache_error)
    }
}
