//! Time utilities for epoch timestamps
//!
//! Progress records carry wall-clock timestamps as floating point seconds
//! since the Unix epoch so that records written by other tools stay readable.

use chrono::{DateTime, Local, TimeZone, Utc};

/// Current wall-clock time in fractional seconds since the Unix epoch
pub fn now_epoch() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Convert epoch seconds into a UTC timestamp, `None` for out-of-range values
pub fn epoch_to_utc(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() || epoch <= 0.0 {
        return None;
    }
    let secs = epoch.trunc() as i64;
    let nanos = ((epoch.fract()) * 1_000_000_000.0).round() as u32;
    Utc.timestamp_opt(secs, nanos.min(999_999_999)).single()
}

/// Format epoch seconds as local `YYYY-MM-DD HH:MM:SS`, or `"unknown"`
pub fn format_timestamp(epoch: f64) -> String {
    match epoch_to_utc(epoch) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "unknown".to_string(),
    }
}

/// Epoch seconds of the most recent local midnight
pub fn start_of_today_epoch() -> f64 {
    let now = Local::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|midnight| midnight.timestamp() as f64)
        .unwrap_or_else(|| now_epoch() - 86_400.0)
}
