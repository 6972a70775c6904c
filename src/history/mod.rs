//! History Aggregator
//!
//! Lists progress records for many jobs across both backends. Entries are
//! decoded individually (bad ones are skipped), deduplicated by job id with
//! the expiring copy winning, filtered, sorted newest first and projected
//! into display summaries. Summaries are computed on every listing and never
//! stored.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::HistoryConfig;
use crate::errors::{BackendKind, ProgressResult};
use crate::models::{AnalysisModule, JobStatus, ProgressRecord, depth_text};
use crate::storage::DualBackendStore;
use crate::utils::time::{format_timestamp, start_of_today_epoch};
use crate::utils::{format_seconds, now_epoch};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Ticker-like token: US symbol, six-digit A-share code or Hong Kong code
static SUBJECT_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:[A-Z]{1,5}|\d{6}|\d{3,4}\.HK)$").ok());

/// Inclusive window on `last_update_time`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeRange {
    pub from: Option<f64>,
    pub to: Option<f64>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    /// Since local midnight
    pub fn today() -> Self {
        Self {
            from: Some(start_of_today_epoch()),
            to: None,
        }
    }

    pub fn last_days(days: u32) -> Self {
        Self {
            from: Some(now_epoch() - f64::from(days) * SECONDS_PER_DAY),
            to: None,
        }
    }

    pub fn between(from: f64, to: f64) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, timestamp: f64) -> bool {
        self.from.is_none_or(|from| timestamp >= from) && self.to.is_none_or(|to| timestamp <= to)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Falls back to the configured default when `None`
    pub limit: Option<usize>,
    pub status: Option<JobStatus>,
    pub time_range: TimeRange,
    /// Job-id glob, `*` when empty
    pub pattern: String,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = range;
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    fn matches(&self, record: &ProgressRecord) -> bool {
        self.status.is_none_or(|status| record.status == status)
            && self.time_range.contains(record.last_update_time)
    }
}

/// Display projection of one record
#[derive(Debug, Clone, Serialize)]
pub struct ProgressRecordSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub status_icon: &'static str,
    pub status_text: &'static str,
    pub progress_percentage: f64,
    pub subject: String,
    pub last_message: String,
    pub start_time: f64,
    pub last_update_time: f64,
    pub start_time_text: String,
    pub last_update_text: String,
    pub duration_text: String,
    pub modules: Vec<AnalysisModule>,
    pub depth: Option<u8>,
    pub depth_text: &'static str,
    pub has_results: bool,
    pub source: BackendKind,
}

impl ProgressRecordSummary {
    pub fn from_record(record: &ProgressRecord, source: BackendKind, now: f64) -> Self {
        Self {
            job_id: record.job_id.clone(),
            status: record.status,
            status_icon: record.status.icon(),
            status_text: record.status.label(),
            progress_percentage: record.progress_percentage,
            subject: extract_subject(record),
            last_message: record.last_message.clone(),
            start_time: record.start_time,
            last_update_time: record.last_update_time,
            start_time_text: format_timestamp(record.start_time),
            last_update_text: format_timestamp(record.last_update_time),
            duration_text: format_seconds(record.elapsed_at(now)),
            modules: record
                .parameters
                .as_ref()
                .map(|p| p.modules.clone())
                .unwrap_or_default(),
            depth: record.depth(),
            depth_text: depth_text(record.depth()),
            has_results: record.raw_results.is_some(),
            source,
        }
    }
}

/// Subject of a job: from its results, else a ticker-like token in the id
pub fn extract_subject(record: &ProgressRecord) -> String {
    let from_results = record.raw_results.as_ref().and_then(|results| {
        ["stock_symbol", "subject"]
            .iter()
            .filter_map(|key| results.get(*key)?.as_str())
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    });
    if let Some(subject) = from_results {
        return subject;
    }

    if let Some(regex) = SUBJECT_TOKEN.as_ref()
        && let Some(token) = record.job_id.split('_').find(|t| regex.is_match(t))
    {
        return token.to_string();
    }
    crate::codec::UNKNOWN.to_string()
}

/// Counts and rates over a summary list
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStatistics {
    pub total: usize,
    pub completed: usize,
    pub running: usize,
    pub failed: usize,
    pub initializing: usize,
    /// Percentages of `total`
    pub completion_rate: f64,
    pub failure_rate: f64,
}

impl HistoryStatistics {
    pub fn from_summaries(summaries: &[ProgressRecordSummary]) -> Self {
        let mut stats = Self {
            total: summaries.len(),
            ..Self::default()
        };
        for summary in summaries {
            match summary.status {
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Initializing => stats.initializing += 1,
            }
        }
        if stats.total > 0 {
            stats.completion_rate = stats.completed as f64 / stats.total as f64 * 100.0;
            stats.failure_rate = stats.failed as f64 / stats.total as f64 * 100.0;
        }
        stats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMarker {
    Done,
    Current,
    Failed,
    Pending,
}

impl StepMarker {
    pub fn symbol(&self) -> &'static str {
        match self {
            StepMarker::Done => "✅",
            StepMarker::Current => "🔄",
            StepMarker::Failed => "❌",
            StepMarker::Pending => "⏳",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepDetail {
    pub index: usize,
    pub name: String,
    pub description: String,
    pub marker: StepMarker,
}

/// Single-record view with per-step markers
#[derive(Debug, Clone, Serialize)]
pub struct RecordDetails {
    pub summary: ProgressRecordSummary,
    pub steps: Vec<StepDetail>,
    pub estimated_total_time: f64,
    pub remaining_text: String,
    pub error_message: Option<String>,
    pub raw_results: Option<serde_json::Value>,
}

fn step_marker(record: &ProgressRecord, index: usize) -> StepMarker {
    let current = record.current_step_index;
    match record.status {
        JobStatus::Completed => StepMarker::Done,
        _ if index < current => StepMarker::Done,
        JobStatus::Failed if index == current => StepMarker::Failed,
        _ if index == current => StepMarker::Current,
        _ => StepMarker::Pending,
    }
}

pub struct HistoryAggregator {
    store: Arc<DualBackendStore>,
    settings: HistoryConfig,
}

impl HistoryAggregator {
    pub fn new(store: Arc<DualBackendStore>, settings: HistoryConfig) -> Self {
        Self { store, settings }
    }

    /// Decoded, deduplicated, filtered records, newest first
    pub async fn list_records(
        &self,
        query: &HistoryQuery,
    ) -> ProgressResult<Vec<(ProgressRecord, BackendKind)>> {
        let listing = self
            .store
            .list(&query.pattern, self.settings.scan_limit)
            .await?;
        for (backend, message) in &listing.failures {
            debug!("History listing without {} backend: {}", backend, message);
        }

        let codec = self.store.codec();
        let mut by_job: HashMap<String, (ProgressRecord, BackendKind)> = HashMap::new();
        let mut skipped = 0usize;
        for entry in listing.entries {
            let record = match codec.decode_as(&entry.job_id, &entry.payload) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping {} record {}: {}", entry.source, entry.job_id, e);
                    skipped += 1;
                    continue;
                }
            };
            match by_job.entry(record.job_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert((record, entry.source));
                }
                Entry::Occupied(mut slot) => {
                    if entry.source == BackendKind::Expiring {
                        slot.insert((record, entry.source));
                    }
                }
            }
        }

        let mut records: Vec<_> = by_job
            .into_values()
            .filter(|(record, _)| query.matches(record))
            .collect();
        records.sort_by(|a, b| {
            b.0.last_update_time
                .total_cmp(&a.0.last_update_time)
                .then_with(|| a.0.job_id.cmp(&b.0.job_id))
        });
        records.truncate(query.limit.unwrap_or(self.settings.default_limit));

        debug!(
            "History query returned {} records ({} malformed skipped)",
            records.len(),
            skipped
        );
        Ok(records)
    }

    pub async fn list_history(
        &self,
        query: &HistoryQuery,
    ) -> ProgressResult<Vec<ProgressRecordSummary>> {
        let now = now_epoch();
        Ok(self
            .list_records(query)
            .await?
            .iter()
            .map(|(record, source)| ProgressRecordSummary::from_record(record, *source, now))
            .collect())
    }

    pub async fn details(&self, job_id: &str) -> ProgressResult<RecordDetails> {
        let stored = self.store.fetch(job_id).await?;
        let record = stored.record;
        let now = now_epoch();

        let steps = record
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepDetail {
                index,
                name: step.name.clone(),
                description: step.description.clone(),
                marker: step_marker(&record, index),
            })
            .collect();

        Ok(RecordDetails {
            summary: ProgressRecordSummary::from_record(&record, stored.source, now),
            steps,
            estimated_total_time: record.estimated_total_time,
            remaining_text: format_seconds(record.remaining_at(now)),
            error_message: record.error_message.clone(),
            raw_results: record.raw_results.clone(),
        })
    }
}
