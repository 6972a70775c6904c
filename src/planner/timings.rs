//! Observed step durations, shared between the planner and trackers

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::trace;

#[derive(Debug, Clone, Copy, Default)]
struct TimingStats {
    total_seconds: f64,
    samples: u64,
}

/// Running mean of how long each named step took in past jobs
#[derive(Debug, Default)]
pub struct StepTimings {
    stats: RwLock<HashMap<String, TimingStats>>,
}

impl StepTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation; non-finite or negative samples are ignored
    pub fn record(&self, step_name: &str, seconds: f64) {
        if !seconds.is_finite() || seconds < 0.0 {
            return;
        }
        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        let entry = stats.entry(step_name.to_string()).or_default();
        entry.total_seconds += seconds;
        entry.samples += 1;
        trace!(
            "Step '{}' took {:.2}s ({} samples)",
            step_name, seconds, entry.samples
        );
    }

    /// Historical average for a step, `None` when never observed
    pub fn average(&self, step_name: &str) -> Option<f64> {
        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
        stats
            .get(step_name)
            .filter(|s| s.samples > 0)
            .map(|s| s.total_seconds / s.samples as f64)
    }

    pub fn sample_count(&self, step_name: &str) -> u64 {
        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
        stats.get(step_name).map(|s| s.samples).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_average() {
        let timings = StepTimings::new();
        assert_eq!(timings.average("report"), None);

        timings.record("report", 10.0);
        timings.record("report", 20.0);
        timings.record("report", f64::NAN);
        timings.record("report", -1.0);

        assert_eq!(timings.average("report"), Some(15.0));
        assert_eq!(timings.sample_count("report"), 2);
        assert_eq!(timings.sample_count("prepare"), 0);
    }
}
