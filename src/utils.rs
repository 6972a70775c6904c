//! Utility functions shared by the progress components
//!
//! - `utils::time` for epoch timestamps and display formatting
//! - `utils::human_format` for human-readable durations

pub mod human_format;
pub mod time;

pub use human_format::format_seconds;
pub use time::now_epoch;
