//! Error type definitions for the progress subsystem
//!
//! Two layers: [`StoreError`] describes what went wrong inside a single
//! storage backend, [`ProgressError`] is what callers of the tracker, store,
//! history and poll components see.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which storage backend an error or outcome refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// File-backed store, no automatic expiry
    Durable,
    /// Network key-value store with per-key time-to-live
    Expiring,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Durable => write!(f, "durable"),
            BackendKind::Expiring => write!(f, "expiring"),
        }
    }
}

/// Top-level error type for progress tracking operations
#[derive(Error, Debug)]
pub enum ProgressError {
    /// Record absent from both backends
    #[error("Progress record not found: {job_id}")]
    NotFound { job_id: String },

    /// Stored payload could not be decoded into a progress record
    #[error("Malformed progress record for {job_id}: {reason}")]
    MalformedRecord { job_id: String, reason: String },

    /// Tracker used before `create`
    #[error("Progress tracker not initialized for job {job_id}")]
    NotInitialized { job_id: String },

    /// `create` called on a tracker that already owns a record
    #[error("Progress tracker already initialized for job {job_id}")]
    AlreadyInitialized { job_id: String },

    /// Storage backend failed (network or file I/O)
    #[error("{backend} backend unavailable: {message}")]
    BackendUnavailable { backend: BackendKind, message: String },

    /// Caller supplied unusable job parameters or identifiers
    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String },

    /// Configuration values out of range or inconsistent
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Errors raised by an individual storage backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Redis command or connection failed
    #[cfg(feature = "redis-backend")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A job id would resolve to a path outside the data directory
    #[error("Path validation failed: {path:?} - {reason}")]
    PathValidation { path: PathBuf, reason: String },

    /// Payload could not be (de)serialized
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend reachable but refusing work
    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },
}

impl ProgressError {
    pub fn not_found<S: Into<String>>(job_id: S) -> Self {
        Self::NotFound {
            job_id: job_id.into(),
        }
    }

    pub fn malformed<J: Into<String>, R: Into<String>>(job_id: J, reason: R) -> Self {
        Self::MalformedRecord {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    pub fn not_initialized<S: Into<String>>(job_id: S) -> Self {
        Self::NotInitialized {
            job_id: job_id.into(),
        }
    }

    pub fn invalid_parameters<S: Into<String>>(message: S) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap a backend failure, keeping path validation problems as caller errors
    pub fn from_store(backend: BackendKind, error: StoreError) -> Self {
        match error {
            StoreError::PathValidation { path, reason } => Self::InvalidParameters {
                message: format!("{} ({})", reason, path.display()),
            },
            other => Self::BackendUnavailable {
                backend,
                message: other.to_string(),
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Durable write failures are the ones callers must act on
    pub fn is_durable_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable {
                backend: BackendKind::Durable,
                ..
            }
        )
    }
}

impl StoreError {
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}
