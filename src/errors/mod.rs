//! Centralized error handling for the progress subsystem
//!
//! # Error Categories
//!
//! - **NotFound**: record absent from both backends; callers show an
//!   initializing/empty state
//! - **MalformedRecord**: stored payload failed to decode; skipped in list
//!   views, surfaced on single-record views
//! - **NotInitialized**: tracker misuse, fatal to the calling operation
//! - **BackendUnavailable**: I/O failure, fatal on durable writes, logged and
//!   bypassed on the expiring backend
//!
//! # Usage
//!
//! ```rust
//! use analysis_progress::errors::{ProgressError, ProgressResult};
//!
//! fn lookup(job_id: &str) -> ProgressResult<()> {
//!     Err(ProgressError::not_found(job_id))
//! }
//!
//! assert!(lookup("analysis_1").unwrap_err().is_not_found());
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using ProgressError
pub type ProgressResult<T> = Result<T, ProgressError>;

/// Convenience type alias for backend Results
pub type StoreResult<T> = Result<T, StoreError>;
