//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services as an
//! `Arc<CoreConfig>`. Nothing in this crate reads process environment variables on its own:
//! binaries hand [`CoreConfig::from_lookup`] a lookup function (usually `std::env::var`), and
//! tests hand it a map.

use crate::constants::{
    CREATING_DIR_NAME, DEFAULT_DB_FILENAME, DEFAULT_HASH_CACHE_DAYS, DEFAULT_LOAD_ATTEMPTS,
    DEFAULT_LOAD_INTERVAL,
};
use crate::{DatasetError, DatasetResult};
use lakeset_acl::Ownership;
use lakeset_types::DatasetId;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_DATALAKE_DIR: &str = "LAKESET_DATALAKE_DIR";
pub const ENV_DATASETS_DIR: &str = "LAKESET_DATASETS_DIR";
pub const ENV_DB_PATH: &str = "LAKESET_DB_PATH";
pub const ENV_HASH_CACHE_DAYS: &str = "LAKESET_HASH_CACHE_DAYS";
pub const ENV_DATASET_UID: &str = "LAKESET_DATASET_UID";
pub const ENV_DATASET_GID: &str = "LAKESET_DATASET_GID";
pub const ENV_LOAD_ATTEMPTS: &str = "LAKESET_LOAD_ATTEMPTS";
pub const ENV_LOAD_INTERVAL_MS: &str = "LAKESET_LOAD_INTERVAL_MS";
pub const ENV_ACL_DRY_RUN: &str = "LAKESET_ACL_DRY_RUN";
pub const ENV_NOTARY_URL: &str = "LAKESET_NOTARY_URL";
pub const ENV_NOTARY_TOKEN_URL: &str = "LAKESET_NOTARY_TOKEN_URL";
pub const ENV_NOTARY_CLIENT_ID: &str = "LAKESET_NOTARY_CLIENT_ID";
pub const ENV_NOTARY_USER: &str = "LAKESET_NOTARY_USER";
pub const ENV_NOTARY_PASSWORD: &str = "LAKESET_NOTARY_PASSWORD";

/// How long the pipeline waits for the dataset row to become visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadRetry {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for LoadRetry {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_LOAD_ATTEMPTS,
            interval: DEFAULT_LOAD_INTERVAL,
        }
    }
}

/// Credentials and endpoints of the notarization service.
#[derive(Clone, PartialEq, Eq)]
pub struct NotaryConfig {
    pub url: String,
    pub token_url: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for NotaryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotaryConfig")
            .field("url", &self.url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    datalake_dir: PathBuf,
    datasets_dir: PathBuf,
    database_path: PathBuf,
    hash_cache_validity: chrono::Duration,
    dataset_owner: Option<Ownership>,
    load_retry: LoadRetry,
    acl_dry_run: bool,
    notary: Option<NotaryConfig>,
}

impl CoreConfig {
    /// Create a new `CoreConfig` with defaults for everything but the two roots.
    ///
    /// Both roots must be absolute and distinct.
    pub fn new(datalake_dir: PathBuf, datasets_dir: PathBuf) -> DatasetResult<Self> {
        if !datalake_dir.is_absolute() || !datasets_dir.is_absolute() {
            return Err(DatasetError::InvalidInput(
                "data lake and datasets directories must be absolute paths".into(),
            ));
        }
        if datalake_dir == datasets_dir {
            return Err(DatasetError::InvalidInput(
                "data lake and datasets directories must differ".into(),
            ));
        }

        let database_path = datasets_dir.join(DEFAULT_DB_FILENAME);
        Ok(Self {
            datalake_dir,
            datasets_dir,
            database_path,
            hash_cache_validity: chrono::Duration::days(DEFAULT_HASH_CACHE_DAYS),
            dataset_owner: None,
            load_retry: LoadRetry::default(),
            acl_dry_run: false,
            notary: None,
        })
    }

    /// Resolve the configuration from `LAKESET_*` variables returned by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DatasetResult<Self> {
        let required = |name: &str| {
            non_empty(lookup(name))
                .map(PathBuf::from)
                .ok_or_else(|| DatasetError::InvalidInput(format!("{name} must be set")))
        };

        let mut config = Self::new(required(ENV_DATALAKE_DIR)?, required(ENV_DATASETS_DIR)?)?;
        if let Some(path) = non_empty(lookup(ENV_DB_PATH)) {
            config.database_path = PathBuf::from(path);
        }
        config.hash_cache_validity = hash_cache_validity_from_env_value(lookup(ENV_HASH_CACHE_DAYS))?;
        config.dataset_owner =
            ownership_from_env_values(lookup(ENV_DATASET_UID), lookup(ENV_DATASET_GID))?;
        config.load_retry = load_retry_from_env_values(
            lookup(ENV_LOAD_ATTEMPTS),
            lookup(ENV_LOAD_INTERVAL_MS),
        )?;
        config.acl_dry_run = flag_from_env_value(ENV_ACL_DRY_RUN, lookup(ENV_ACL_DRY_RUN))?;
        config.notary = notary_from_env_values(
            lookup(ENV_NOTARY_URL),
            lookup(ENV_NOTARY_TOKEN_URL),
            lookup(ENV_NOTARY_CLIENT_ID),
            lookup(ENV_NOTARY_USER),
            lookup(ENV_NOTARY_PASSWORD),
        )?;
        Ok(config)
    }

    pub fn with_database_path(mut self, path: PathBuf) -> Self {
        self.database_path = path;
        self
    }

    pub fn with_hash_cache_validity(mut self, validity: chrono::Duration) -> Self {
        self.hash_cache_validity = validity;
        self
    }

    pub fn with_dataset_owner(mut self, owner: Option<Ownership>) -> Self {
        self.dataset_owner = owner;
        self
    }

    pub fn with_load_retry(mut self, load_retry: LoadRetry) -> Self {
        self.load_retry = load_retry;
        self
    }

    pub fn with_acl_dry_run(mut self, dry_run: bool) -> Self {
        self.acl_dry_run = dry_run;
        self
    }

    pub fn with_notary(mut self, notary: Option<NotaryConfig>) -> Self {
        self.notary = notary;
        self
    }

    pub fn datalake_dir(&self) -> &Path {
        &self.datalake_dir
    }

    pub fn datasets_dir(&self) -> &Path {
        &self.datasets_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn hash_cache_validity(&self) -> chrono::Duration {
        self.hash_cache_validity
    }

    pub fn dataset_owner(&self) -> Option<Ownership> {
        self.dataset_owner
    }

    pub fn load_retry(&self) -> LoadRetry {
        self.load_retry
    }

    pub fn acl_dry_run(&self) -> bool {
        self.acl_dry_run
    }

    pub fn notary(&self) -> Option<&NotaryConfig> {
        self.notary.as_ref()
    }

    pub fn dataset_dir(&self, id: &DatasetId) -> PathBuf {
        self.datasets_dir.join(id.to_string())
    }

    pub fn creating_dir(&self) -> PathBuf {
        self.datasets_dir.join(CREATING_DIR_NAME)
    }

    /// Working file holding the clinical data of a dataset until creation succeeds.
    pub fn working_file(&self, id: &DatasetId) -> PathBuf {
        self.creating_dir().join(format!("{id}.json"))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_value<T: FromStr>(name: &str, value: Option<String>) -> DatasetResult<Option<T>>
where
    T::Err: fmt::Display,
{
    non_empty(value)
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| DatasetError::InvalidInput(format!("{name}='{v}': {e}")))
        })
        .transpose()
}

/// Parse the hash cache validity (whole days) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default of seven days.
pub fn hash_cache_validity_from_env_value(
    value: Option<String>,
) -> DatasetResult<chrono::Duration> {
    let days: i64 = parse_value(ENV_HASH_CACHE_DAYS, value)?.unwrap_or(DEFAULT_HASH_CACHE_DAYS);
    if days < 0 {
        return Err(DatasetError::InvalidInput(format!(
            "{ENV_HASH_CACHE_DAYS} cannot be negative"
        )));
    }
    Ok(chrono::Duration::days(days))
}

/// Parse the dataset owner. Both ids must be given, or neither.
pub fn ownership_from_env_values(
    uid: Option<String>,
    gid: Option<String>,
) -> DatasetResult<Option<Ownership>> {
    match (
        parse_value::<u32>(ENV_DATASET_UID, uid)?,
        parse_value::<u32>(ENV_DATASET_GID, gid)?,
    ) {
        (Some(uid), Some(gid)) => Ok(Some(Ownership { uid, gid })),
        (None, None) => Ok(None),
        _ => Err(DatasetError::InvalidInput(format!(
            "{ENV_DATASET_UID} and {ENV_DATASET_GID} must be set together"
        ))),
    }
}

pub fn load_retry_from_env_values(
    attempts: Option<String>,
    interval_ms: Option<String>,
) -> DatasetResult<LoadRetry> {
    let defaults = LoadRetry::default();
    let attempts = parse_value::<u32>(ENV_LOAD_ATTEMPTS, attempts)?.unwrap_or(defaults.attempts);
    if attempts == 0 {
        return Err(DatasetError::InvalidInput(format!(
            "{ENV_LOAD_ATTEMPTS} must be at least 1"
        )));
    }
    let interval = parse_value::<u64>(ENV_LOAD_INTERVAL_MS, interval_ms)?
        .map(Duration::from_millis)
        .unwrap_or(defaults.interval);
    Ok(LoadRetry { attempts, interval })
}

/// Parse a boolean flag. Accepts `1/0`, `true/false`, `yes/no` (any case); unset is false.
pub fn flag_from_env_value(name: &str, value: Option<String>) -> DatasetResult<bool> {
    match non_empty(value).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("0" | "false" | "no") => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some(other) => Err(DatasetError::InvalidInput(format!(
            "{name}='{other}' is not a boolean"
        ))),
    }
}

/// Notarization is configured when the service URL is set; the rest is then required.
pub fn notary_from_env_values(
    url: Option<String>,
    token_url: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> DatasetResult<Option<NotaryConfig>> {
    let Some(url) = non_empty(url) else {
        return Ok(None);
    };
    let require = |name: &str, value: Option<String>| {
        non_empty(value).ok_or_else(|| {
            DatasetError::InvalidInput(format!("{name} is required when {ENV_NOTARY_URL} is set"))
        })
    };
    Ok(Some(NotaryConfig {
        url,
        token_url: require(ENV_NOTARY_TOKEN_URL, token_url)?,
        client_id: require(ENV_NOTARY_CLIENT_ID, client_id)?,
        username: require(ENV_NOTARY_USER, username)?,
        password: require(ENV_NOTARY_PASSWORD, password)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn minimal_environment_uses_defaults() {
        let config = CoreConfig::from_lookup(lookup_from(&[
            (ENV_DATALAKE_DIR, "/lake"),
            (ENV_DATASETS_DIR, "/datasets"),
        ]))
        .unwrap();

        assert_eq!(config.datalake_dir(), Path::new("/lake"));
        assert_eq!(config.database_path(), Path::new("/datasets/.lakeset.db"));
        assert_eq!(config.hash_cache_validity(), chrono::Duration::days(7));
        assert_eq!(config.load_retry(), LoadRetry::default());
        assert!(config.dataset_owner().is_none());
        assert!(config.notary().is_none());
        assert!(!config.acl_dry_run());
    }

    #[test]
    fn missing_roots_are_rejected() {
        let result = CoreConfig::from_lookup(lookup_from(&[(ENV_DATALAKE_DIR, "/lake")]));
        assert!(matches!(result, Err(DatasetError::InvalidInput(_))));
    }

    #[test]
    fn relative_roots_are_rejected() {
        let result = CoreConfig::new(PathBuf::from("lake"), PathBuf::from("/datasets"));
        assert!(result.is_err());
    }

    #[test]
    fn full_environment_is_parsed() {
        let config = CoreConfig::from_lookup(lookup_from(&[
            (ENV_DATALAKE_DIR, "/lake"),
            (ENV_DATASETS_DIR, "/datasets"),
            (ENV_DB_PATH, "/var/lib/lakeset/db.sqlite"),
            (ENV_HASH_CACHE_DAYS, " 30 "),
            (ENV_DATASET_UID, "1000"),
            (ENV_DATASET_GID, "2000"),
            (ENV_LOAD_ATTEMPTS, "3"),
            (ENV_LOAD_INTERVAL_MS, "250"),
            (ENV_ACL_DRY_RUN, "yes"),
            (ENV_NOTARY_URL, "https://notary.example/traces"),
            (ENV_NOTARY_TOKEN_URL, "https://auth.example/token"),
            (ENV_NOTARY_CLIENT_ID, "lakeset"),
            (ENV_NOTARY_USER, "svc"),
            (ENV_NOTARY_PASSWORD, "hunter2"),
        ]))
        .unwrap();

        assert_eq!(config.database_path(), Path::new("/var/lib/lakeset/db.sqlite"));
        assert_eq!(config.hash_cache_validity(), chrono::Duration::days(30));
        assert_eq!(
            config.dataset_owner(),
            Some(Ownership {
                uid: 1000,
                gid: 2000
            })
        );
        assert_eq!(config.load_retry().attempts, 3);
        assert_eq!(config.load_retry().interval, Duration::from_millis(250));
        assert!(config.acl_dry_run());
        let notary = config.notary().unwrap();
        assert_eq!(notary.username, "svc");
        assert!(!format!("{notary:?}").contains("hunter2"));
    }

    #[test]
    fn ownership_needs_both_ids() {
        assert!(ownership_from_env_values(Some("1".into()), None).is_err());
        assert!(ownership_from_env_values(None, None).unwrap().is_none());
        assert!(ownership_from_env_values(Some("x".into()), Some("1".into())).is_err());
    }

    #[test]
    fn flags_and_numbers_are_validated() {
        assert!(flag_from_env_value(ENV_ACL_DRY_RUN, Some("maybe".into())).is_err());
        assert!(!flag_from_env_value(ENV_ACL_DRY_RUN, Some("  ".into())).unwrap());
        assert!(hash_cache_validity_from_env_value(Some("-1".into())).is_err());
        assert!(load_retry_from_env_values(Some("0".into()), None).is_err());
    }

    #[test]
    fn notary_requires_credentials_once_enabled() {
        let result = notary_from_env_values(
            Some("https://notary.example".into()),
            None,
            None,
            None,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn dataset_paths_are_derived_from_the_datasets_root() {
        let config =
            CoreConfig::new(PathBuf::from("/lake"), PathBuf::from("/datasets")).unwrap();
        let id = DatasetId::parse("0f8fad5b-d9cb-469f-a165-70867728950e").unwrap();

        assert_eq!(
            config.dataset_dir(&id),
            Path::new("/datasets/0f8fad5b-d9cb-469f-a165-70867728950e")
        );
        assert_eq!(
            config.working_file(&id),
            Path::new("/datasets/.creating/0f8fad5b-d9cb-469f-a165-70867728950e.json")
        );
    }
}
