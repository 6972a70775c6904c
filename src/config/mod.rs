use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub mod defaults;
pub mod duration_serde;

use crate::errors::{ProgressError, ProgressResult};
use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub expiring: ExpiringStoreConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
}

/// Durable (file) store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one `progress_{job_id}.{ext}` file per job
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
}

/// Expiring (key-value) store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiringStoreConfig {
    #[serde(default = "default_expiring_enabled")]
    pub enabled: bool,
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_redis_db")]
    pub db: i64,
    /// Time-to-live applied on every write
    #[serde(with = "duration_serde::duration", default = "default_expiring_ttl")]
    pub ttl: Duration,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Viewer-side polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval between scheduled polls of a running job
    #[serde(with = "duration_serde::duration", default = "default_refresh_interval")]
    pub refresh_interval: Duration,
    /// Interval between scheduled polls of a depth-1 (fast) job
    #[serde(
        with = "duration_serde::duration",
        default = "default_fast_refresh_interval"
    )]
    pub fast_refresh_interval: Duration,
    /// Minimum spacing between refreshes of one job for one viewer
    #[serde(
        with = "duration_serde::duration",
        default = "default_min_refresh_interval"
    )]
    pub min_refresh_interval: Duration,
    /// Minimum spacing for depth-1 (fast) jobs
    #[serde(
        with = "duration_serde::duration",
        default = "default_fast_min_refresh_interval"
    )]
    pub fast_min_refresh_interval: Duration,
    /// Scheduled polling gives up after this long
    #[serde(with = "duration_serde::duration", default = "default_max_poll_duration")]
    pub max_poll_duration: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,
    /// Upper bound on entries fetched from each backend per listing
    #[serde(default = "default_history_scan_limit")]
    pub scan_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_research_depth")]
    pub default_depth: u8,
    /// Duration multiplier per provider; unknown providers use 1.0
    #[serde(default = "default_provider_factors")]
    pub provider_factors: HashMap<String, f64>,
}

// Storage defaults
fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_file_extension() -> String {
    DEFAULT_FILE_EXTENSION.to_string()
}

// Expiring store defaults
fn default_expiring_enabled() -> bool {
    DEFAULT_EXPIRING_ENABLED
}

fn default_redis_host() -> String {
    DEFAULT_REDIS_HOST.to_string()
}

fn default_redis_port() -> u16 {
    DEFAULT_REDIS_PORT
}

fn default_redis_db() -> i64 {
    DEFAULT_REDIS_DB
}

fn default_expiring_ttl() -> Duration {
    parse_default_duration(DEFAULT_EXPIRING_TTL, Duration::from_secs(3600))
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

// Polling defaults
fn default_refresh_interval() -> Duration {
    parse_default_duration(DEFAULT_REFRESH_INTERVAL, Duration::from_secs(3))
}

fn default_fast_refresh_interval() -> Duration {
    parse_default_duration(DEFAULT_FAST_REFRESH_INTERVAL, Duration::from_secs(6))
}

fn default_min_refresh_interval() -> Duration {
    parse_default_duration(DEFAULT_MIN_REFRESH_INTERVAL, Duration::from_secs(2))
}

fn default_fast_min_refresh_interval() -> Duration {
    parse_default_duration(DEFAULT_FAST_MIN_REFRESH_INTERVAL, Duration::from_secs(5))
}

fn default_max_poll_duration() -> Duration {
    parse_default_duration(DEFAULT_MAX_POLL_DURATION, Duration::from_secs(1800))
}

// History defaults
fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_history_scan_limit() -> usize {
    DEFAULT_HISTORY_SCAN_LIMIT
}

// Planner defaults
fn default_provider_factors() -> HashMap<String, f64> {
    DEFAULT_PROVIDER_FACTORS
        .iter()
        .map(|(provider, factor)| (provider.to_string(), *factor))
        .collect()
}

fn default_research_depth() -> u8 {
    DEFAULT_RESEARCH_DEPTH
}

fn parse_default_duration(value: &str, fallback: Duration) -> Duration {
    duration_serde::parse(value).unwrap_or(fallback)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            file_extension: default_file_extension(),
        }
    }
}

impl Default for ExpiringStoreConfig {
    fn default() -> Self {
        Self {
            enabled: default_expiring_enabled(),
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: default_redis_db(),
            ttl: default_expiring_ttl(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            fast_refresh_interval: default_fast_refresh_interval(),
            min_refresh_interval: default_min_refresh_interval(),
            fast_min_refresh_interval: default_fast_min_refresh_interval(),
            max_poll_duration: default_max_poll_duration(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            scan_limit: default_history_scan_limit(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            provider_factors: default_provider_factors(),
            default_depth: default_research_depth(),
        }
    }
}

impl ExpiringStoreConfig {
    /// Connection URL for the key-value server, `redis://[:password@]host:port/db`
    pub fn connection_url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_file(&config_file)
    }

    pub fn load_from_file(config_file: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(config_file)?;
            toml::from_str(&contents)?
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
            default_config
        };

        config.apply_overrides_from(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `REDIS_*` / `PROGRESS_*` overrides from the given lookup
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(enabled) = lookup("REDIS_ENABLED") {
            self.expiring.enabled = enabled.trim().eq_ignore_ascii_case("true");
        }
        if let Some(host) = lookup("REDIS_HOST") {
            self.expiring.host = host;
        }
        if let Some(port) = lookup("REDIS_PORT") {
            match port.trim().parse() {
                Ok(port) => self.expiring.port = port,
                Err(e) => warn!("Ignoring invalid REDIS_PORT '{}': {}", port, e),
            }
        }
        if let Some(password) = lookup("REDIS_PASSWORD") {
            self.expiring.password = Some(password).filter(|p| !p.is_empty());
        }
        if let Some(db) = lookup("REDIS_DB") {
            match db.trim().parse() {
                Ok(db) => self.expiring.db = db,
                Err(e) => warn!("Ignoring invalid REDIS_DB '{}': {}", db, e),
            }
        }
        if let Some(ttl) = lookup("PROGRESS_TTL") {
            match duration_serde::parse(&ttl) {
                Ok(ttl) => self.expiring.ttl = ttl,
                Err(e) => warn!("Ignoring invalid PROGRESS_TTL '{}': {}", ttl, e),
            }
        }
        if let Some(data_dir) = lookup("PROGRESS_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }
    }

    pub fn validate(&self) -> ProgressResult<()> {
        let ttl_secs = self.expiring.ttl.as_secs();
        if !(MIN_EXPIRING_TTL_SECS..=MAX_EXPIRING_TTL_SECS).contains(&ttl_secs) {
            return Err(ProgressError::configuration(format!(
                "expiring.ttl must be between {}s and {}s, got {}s",
                MIN_EXPIRING_TTL_SECS, MAX_EXPIRING_TTL_SECS, ttl_secs
            )));
        }

        let intervals = [
            ("polling.refresh_interval", self.polling.refresh_interval),
            ("polling.fast_refresh_interval", self.polling.fast_refresh_interval),
            ("polling.min_refresh_interval", self.polling.min_refresh_interval),
            (
                "polling.fast_min_refresh_interval",
                self.polling.fast_min_refresh_interval,
            ),
            ("polling.max_poll_duration", self.polling.max_poll_duration),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| value.is_zero()) {
            return Err(ProgressError::configuration(format!(
                "{name} must be greater than zero"
            )));
        }

        if self.history.default_limit == 0 || self.history.scan_limit == 0 {
            return Err(ProgressError::configuration(
                "history limits must be greater than zero",
            ));
        }

        if self.storage.file_extension.is_empty()
            || self.storage.file_extension.contains(['/', '\\', '.'])
        {
            return Err(ProgressError::configuration(format!(
                "storage.file_extension '{}' is not a plain extension",
                self.storage.file_extension
            )));
        }

        if let Some((provider, factor)) = self
            .planner
            .provider_factors
            .iter()
            .find(|(_, factor)| !factor.is_finite() || **factor <= 0.0)
        {
            return Err(ProgressError::configuration(format!(
                "planner.provider_factors.{provider} must be positive, got {factor}"
            )));
        }

        Ok(())
    }
}
