//! Constants used throughout the Lakeset core crate.
//!
//! File names and modes of the dataset tree live here so that the materializer, the index
//! writer and the integrity check agree on them.

use std::time::Duration;

/// Index of the studies and series in a dataset.
pub const INDEX_FILENAME: &str = "index.json";

/// Clinical data (e-forms) of a dataset.
pub const EFORMS_FILENAME: &str = "eforms.json";

/// Directory under the datasets root holding the working files of datasets being created.
pub const CREATING_DIR_NAME: &str = ".creating";

/// Metadata sidecar written into each study directory at data lake ingestion.
pub const STUDY_METADATA_FILENAME: &str = "study-metadata.json";

/// Default database file name under the datasets root.
pub const DEFAULT_DB_FILENAME: &str = ".lakeset.db";

pub const DATASET_DIR_MODE: u32 = 0o700;
pub const SUBJECT_DIR_MODE: u32 = 0o755;
pub const STUDY_DIR_MODE: u32 = 0o700;
pub const SOURCE_DIR_MODE: u32 = 0o755;
pub const SOURCE_FILE_MODE: u32 = 0o644;
pub const WORKING_DIR_MODE: u32 = 0o700;
pub const DATASET_FILE_MODE: u32 = 0o644;

pub const DEFAULT_HASH_CACHE_DAYS: i64 = 7;
pub const DEFAULT_LOAD_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOAD_INTERVAL: Duration = Duration::from_secs(2);

pub const CANCELLED_MESSAGE: &str = "Canceled by user.";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal error, please contact the administrator.";

/// Action type sent with the digests of a newly created dataset.
pub const NOTARY_CREATE_ACTION: &str = "CREATE_DATASET";
pub const NOTARY_HASH_ALGORITHM: &str = "SHA256";
