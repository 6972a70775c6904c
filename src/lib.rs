//! Progress tracking for long-running, multi-step analysis jobs.
//!
//! A job is driven through a [`tracker::ProgressTracker`], which plans its
//! steps with a [`planner::StepPlanner`] and persists every update through a
//! [`storage::DualBackendStore`] (a durable file store plus an optional
//! expiring key-value store). Viewers read snapshots through a
//! [`poll::PollCoordinator`]; list views come from a
//! [`history::HistoryAggregator`].

pub mod codec;
pub mod config;
pub mod errors;
pub mod history;
pub mod models;
pub mod planner;
pub mod poll;
pub mod storage;
pub mod tracker;
pub mod utils;

pub use errors::{ProgressError, ProgressResult};
pub use models::{JobParameters, JobStatus, ProgressRecord};
