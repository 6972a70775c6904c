//! Dual-Backend Store
//!
//! Progress records are written to a durable backend (always) and an
//! expiring backend (best effort, when one is configured). Reads prefer the
//! expiring copy and fall back to the durable one.
//!
//! | operation | durable backend            | expiring backend              |
//! |-----------|----------------------------|-------------------------------|
//! | `put`     | required, failure surfaced | best effort, failure logged   |
//! | `get`     | fallback                   | preferred                     |
//! | `delete`  | independent outcome        | independent outcome           |
//! | `list`    | directory scan, newest first | key pattern match           |
//!
//! The two backends are eventually consistent with each other; nothing here
//! coordinates them transactionally.

pub mod file;
pub mod memory;
pub mod pattern;
#[cfg(feature = "redis-backend")]
pub mod redis_store;

pub use file::FileDurableStore;
pub use memory::InMemoryExpiringStore;
pub use pattern::JobPattern;
#[cfg(feature = "redis-backend")]
pub use redis_store::RedisExpiringStore;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::codec::RecordCodec;
use crate::config::Config;
use crate::errors::{BackendKind, ProgressError, ProgressResult, StoreResult};
use crate::models::ProgressRecord;

/// Key-value backend with a time to live on every key
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExpiringBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Store `value` under `key`, replacing any previous value and expiry
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Returns whether a live key was removed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Up to `limit` `(job_id, payload)` pairs whose key is `prefix` followed
    /// by a job id matching `pattern`
    async fn scan(
        &self,
        prefix: &str,
        pattern: &JobPattern,
        limit: usize,
    ) -> StoreResult<Vec<(String, String)>>;

    async fn count(&self, prefix: &str, pattern: &JobPattern) -> StoreResult<usize>;
}

/// Backend with no automatic expiry, addressed by job id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurableBackend: Send + Sync {
    /// Human-readable location, for reports
    fn location(&self) -> String;

    /// Replace the stored payload atomically
    async fn write(&self, job_id: &str, payload: &str) -> StoreResult<()>;

    async fn read(&self, job_id: &str) -> StoreResult<Option<String>>;

    /// Returns whether a record was removed
    async fn remove(&self, job_id: &str) -> StoreResult<bool>;

    /// Up to `limit` `(job_id, payload)` pairs, most recently written first
    async fn scan(&self, pattern: &JobPattern, limit: usize) -> StoreResult<Vec<(String, String)>>;

    async fn count(&self, pattern: &JobPattern) -> StoreResult<usize>;
}

/// Settings the store needs from configuration
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub ttl: Duration,
    pub key_prefix: String,
}

impl From<&Config> for StoreSettings {
    fn from(config: &Config) -> Self {
        Self {
            ttl: config.expiring.ttl,
            key_prefix: config.expiring.key_prefix.clone(),
        }
    }
}

/// Result of deleting from one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "message")]
pub enum BackendOutcome {
    Removed,
    NotFound,
    /// No backend of this kind is configured
    Disabled,
    Failed(String),
}

impl BackendOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, BackendOutcome::Failed(_))
    }

    fn from_result(result: StoreResult<bool>) -> Self {
        match result {
            Ok(true) => BackendOutcome::Removed,
            Ok(false) => BackendOutcome::NotFound,
            Err(e) => BackendOutcome::Failed(e.to_string()),
        }
    }
}

impl fmt::Display for BackendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendOutcome::Removed => f.write_str("removed"),
            BackendOutcome::NotFound => f.write_str("not found"),
            BackendOutcome::Disabled => f.write_str("disabled"),
            BackendOutcome::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// Per-backend result of a delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub durable: BackendOutcome,
    pub expiring: BackendOutcome,
}

impl DeleteOutcome {
    /// Neither backend failed
    pub fn is_complete(&self) -> bool {
        self.durable.is_ok() && self.expiring.is_ok()
    }

    pub fn removed_any(&self) -> bool {
        self.durable == BackendOutcome::Removed || self.expiring == BackendOutcome::Removed
    }
}

/// A record read back from one backend
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: ProgressRecord,
    pub source: BackendKind,
}

/// A raw listing entry, not yet decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub job_id: String,
    pub payload: String,
    pub source: BackendKind,
}

/// Entries from both backends plus whatever went wrong per backend
#[derive(Debug, Default)]
pub struct Listing {
    pub entries: Vec<StoredEntry>,
    pub failures: Vec<(BackendKind, String)>,
}

/// Record counts and settings of both backends
#[derive(Debug, Clone, Serialize)]
pub struct StorageReport {
    pub durable_location: String,
    pub durable_records: Option<usize>,
    pub expiring_backend: Option<&'static str>,
    pub expiring_records: Option<usize>,
    #[serde(with = "crate::config::duration_serde::duration")]
    pub ttl: Duration,
    pub key_prefix: String,
    pub failures: Vec<(BackendKind, String)>,
}

pub struct DualBackendStore {
    durable: Arc<dyn DurableBackend>,
    expiring: Option<Arc<dyn ExpiringBackend>>,
    settings: StoreSettings,
    durable_codec: RecordCodec,
    expiring_codec: RecordCodec,
}

impl fmt::Debug for DualBackendStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualBackendStore")
            .field("durable", &self.durable.location())
            .field("expiring", &self.expiring.as_ref().map(|e| e.name()))
            .field("settings", &self.settings)
            .finish()
    }
}

impl DualBackendStore {
    pub fn new(
        durable: Arc<dyn DurableBackend>,
        expiring: Option<Arc<dyn ExpiringBackend>>,
        settings: StoreSettings,
    ) -> Self {
        Self {
            durable,
            expiring,
            settings,
            durable_codec: RecordCodec::pretty(),
            expiring_codec: RecordCodec::new(),
        }
    }

    /// Build the store described by `config`.
    ///
    /// An expiring backend that cannot be reached is disabled with a warning;
    /// the durable backend alone still guarantees persistence.
    pub async fn from_config(config: &Config) -> Self {
        let durable = Arc::new(FileDurableStore::new(
            config.storage.data_dir.clone(),
            config.storage.file_extension.clone(),
        ));
        let expiring = if config.expiring.enabled {
            Self::connect_expiring(config).await
        } else {
            debug!("Expiring store disabled by configuration");
            None
        };
        Self::new(durable, expiring, StoreSettings::from(config))
    }

    #[cfg(feature = "redis-backend")]
    async fn connect_expiring(config: &Config) -> Option<Arc<dyn ExpiringBackend>> {
        match RedisExpiringStore::connect(&config.expiring.connection_url()).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(
                    "Expiring store at {}:{} unavailable, continuing with durable store only: {}",
                    config.expiring.host, config.expiring.port, e
                );
                None
            }
        }
    }

    #[cfg(not(feature = "redis-backend"))]
    async fn connect_expiring(_config: &Config) -> Option<Arc<dyn ExpiringBackend>> {
        warn!("Built without redis support, using the in-process expiring store");
        Some(Arc::new(InMemoryExpiringStore::new()))
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn has_expiring(&self) -> bool {
        self.expiring.is_some()
    }

    /// Codec used for the compact expiring payloads
    pub fn codec(&self) -> &RecordCodec {
        &self.expiring_codec
    }

    pub fn expiring_key(&self, job_id: &str) -> String {
        format!("{}{}", self.settings.key_prefix, job_id)
    }

    /// Persist a record under its `job_id`.
    ///
    /// The durable write must succeed; the expiring write is attempted after
    /// it and only logged on failure. Each expiring write restarts the TTL.
    /// A failed expiring write also drops the previous expiring copy so reads
    /// fall through to the durable record instead of an older one.
    pub async fn put(&self, record: &ProgressRecord) -> ProgressResult<()> {
        let job_id = record.job_id.as_str();

        let payload = self.durable_codec.encode(record)?;
        if let Err(e) = self.durable.write(job_id, &payload).await {
            let err = ProgressError::from_store(BackendKind::Durable, e);
            if err.is_durable_failure() {
                error!("Durable write of job {} failed: {}", job_id, err);
            }
            return Err(err);
        }

        if let Some(expiring) = &self.expiring {
            let payload = self.expiring_codec.encode(record)?;
            let key = self.expiring_key(job_id);
            if let Err(e) = expiring
                .set_with_ttl(&key, &payload, self.settings.ttl)
                .await
            {
                warn!("Expiring write of job {} failed: {}", job_id, e);
                match expiring.delete(&key).await {
                    Ok(_) => debug!("Dropped stale expiring copy of job {}", job_id),
                    Err(e) => warn!(
                        "Could not drop stale expiring copy of job {}: {}",
                        job_id, e
                    ),
                }
            }
        }
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> ProgressResult<ProgressRecord> {
        self.fetch(job_id).await.map(|stored| stored.record)
    }

    /// Like [`get`](Self::get), also reporting which backend answered
    pub async fn fetch(&self, job_id: &str) -> ProgressResult<StoredRecord> {
        if let Some(expiring) = &self.expiring {
            match expiring.get(&self.expiring_key(job_id)).await {
                Ok(Some(payload)) => match self.expiring_codec.decode_as(job_id, &payload) {
                    Ok(record) => {
                        return Ok(StoredRecord {
                            record,
                            source: BackendKind::Expiring,
                        });
                    }
                    Err(e) => warn!("Ignoring expiring copy of job {}: {}", job_id, e),
                },
                Ok(None) => debug!("Job {} not in expiring store", job_id),
                Err(e) => warn!("Expiring read of job {} failed: {}", job_id, e),
            }
        }

        match self.durable.read(job_id).await {
            Ok(Some(payload)) => Ok(StoredRecord {
                record: self.durable_codec.decode_as(job_id, &payload)?,
                source: BackendKind::Durable,
            }),
            Ok(None) => Err(ProgressError::not_found(job_id)),
            Err(e) => Err(ProgressError::from_store(BackendKind::Durable, e)),
        }
    }

    /// Remove a record from both backends independently
    pub async fn delete(&self, job_id: &str) -> DeleteOutcome {
        let durable = BackendOutcome::from_result(self.durable.remove(job_id).await);
        if let BackendOutcome::Failed(message) = &durable {
            warn!("Durable delete of job {} failed: {}", job_id, message);
        }

        let expiring = match &self.expiring {
            None => BackendOutcome::Disabled,
            Some(expiring) => {
                let outcome =
                    BackendOutcome::from_result(expiring.delete(&self.expiring_key(job_id)).await);
                if let BackendOutcome::Failed(message) = &outcome {
                    warn!("Expiring delete of job {} failed: {}", job_id, message);
                }
                outcome
            }
        };

        let outcome = DeleteOutcome { durable, expiring };
        info!(
            "Deleted job {} (durable: {}, expiring: {})",
            job_id, outcome.durable, outcome.expiring
        );
        outcome
    }

    /// Raw entries from both backends matching a job-id glob.
    ///
    /// Fails only on an invalid pattern; backend failures are reported in
    /// [`Listing::failures`].
    pub async fn list(&self, pattern: &str, limit: usize) -> ProgressResult<Listing> {
        let pattern = JobPattern::new(pattern)?;
        let mut listing = Listing::default();

        if let Some(expiring) = &self.expiring {
            match expiring
                .scan(&self.settings.key_prefix, &pattern, limit)
                .await
            {
                Ok(entries) => listing.entries.extend(entries.into_iter().map(
                    |(job_id, payload)| StoredEntry {
                        job_id,
                        payload,
                        source: BackendKind::Expiring,
                    },
                )),
                Err(e) => {
                    warn!("Expiring store listing failed: {}", e);
                    listing.failures.push((BackendKind::Expiring, e.to_string()));
                }
            }
        }

        match self.durable.scan(&pattern, limit).await {
            Ok(entries) => listing.entries.extend(entries.into_iter().map(
                |(job_id, payload)| StoredEntry {
                    job_id,
                    payload,
                    source: BackendKind::Durable,
                },
            )),
            Err(e) => {
                warn!("Durable store listing failed: {}", e);
                listing.failures.push((BackendKind::Durable, e.to_string()));
            }
        }

        debug!(
            "Listed {} entries for pattern '{}' ({} backend failures)",
            listing.entries.len(),
            pattern.as_glob(),
            listing.failures.len()
        );
        Ok(listing)
    }

    pub async fn storage_report(&self) -> StorageReport {
        let all = JobPattern::all();
        let mut failures = Vec::new();

        let durable_records = match self.durable.count(&all).await {
            Ok(count) => Some(count),
            Err(e) => {
                failures.push((BackendKind::Durable, e.to_string()));
                None
            }
        };

        let expiring_records = match &self.expiring {
            None => None,
            Some(expiring) => match expiring.count(&self.settings.key_prefix, &all).await {
                Ok(count) => Some(count),
                Err(e) => {
                    failures.push((BackendKind::Expiring, e.to_string()));
                    None
                }
            },
        };

        StorageReport {
            durable_location: self.durable.location(),
            durable_records,
            expiring_backend: self.expiring.as_ref().map(|e| e.name()),
            expiring_records,
            ttl: self.settings.ttl,
            key_prefix: self.settings.key_prefix.clone(),
            failures,
        }
    }
}
