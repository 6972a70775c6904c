//! Progress Tracker
//!
//! Owns the state machine of one job:
//!
//! ```text
//! initializing -> running -> completed
//!                         \-> failed
//! ```
//!
//! Every operation is serialised by a per-job lock that is held across the
//! durable write, and the in-memory state only moves forward once that write
//! has succeeded. A failed write therefore leaves the tracker exactly where
//! it was, and the caller decides whether to retry or fail the job.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::{ProgressError, ProgressResult};
use crate::models::{JobParameters, JobStatus, ProgressRecord};
use crate::planner::{StepPlan, StepPlanner, StepTimings};
use crate::storage::DualBackendStore;
use crate::utils::now_epoch;

/// Percentage ceiling while a job is still running
const MAX_RUNNING_PERCENTAGE: f64 = 99.0;

#[derive(Debug)]
struct TrackerState {
    record: ProgressRecord,
    /// When the current step began, for step timing history
    step_started: f64,
}

#[derive(Debug)]
pub struct ProgressTracker {
    job_id: String,
    store: Arc<DualBackendStore>,
    timings: Option<Arc<StepTimings>>,
    state: Mutex<Option<TrackerState>>,
}

impl ProgressTracker {
    /// A tracker bound to `job_id`; nothing is persisted until [`create`](Self::create)
    pub fn new(job_id: impl Into<String>, store: Arc<DualBackendStore>) -> Self {
        Self {
            job_id: job_id.into(),
            store,
            timings: None,
            state: Mutex::new(None),
        }
    }

    /// Feed observed step durations back into the planner's history
    pub fn with_timings(mut self, timings: Arc<StepTimings>) -> Self {
        self.timings = Some(timings);
        self
    }

    /// Plan, create and persist a job in one call
    pub async fn start(
        job_id: impl Into<String>,
        params: &JobParameters,
        planner: &StepPlanner,
        store: Arc<DualBackendStore>,
    ) -> ProgressResult<Self> {
        let plan = planner.plan(params)?;
        let tracker = Self::new(job_id, store).with_timings(planner.timings());
        tracker.create(&plan).await?;
        Ok(tracker)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Latest committed record, `None` before `create`
    pub async fn snapshot(&self) -> Option<ProgressRecord> {
        self.state.lock().await.as_ref().map(|s| s.record.clone())
    }

    pub async fn create(&self, plan: &StepPlan) -> ProgressResult<ProgressRecord> {
        if plan.is_empty() {
            return Err(ProgressError::invalid_parameters(
                "cannot track a job with an empty step plan",
            ));
        }

        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(ProgressError::AlreadyInitialized {
                job_id: self.job_id.clone(),
            });
        }

        let now = now_epoch();
        let mut record = ProgressRecord {
            job_id: self.job_id.clone(),
            status: JobStatus::Initializing,
            steps: plan.steps.clone(),
            current_step_index: 0,
            progress_percentage: 0.0,
            last_message: "Analysis starting".to_string(),
            start_time: now,
            last_update_time: now,
            estimated_total_time: plan.estimated_total_time,
            elapsed_time: 0.0,
            raw_results: None,
            error_message: None,
            parameters: plan.parameters.clone(),
        };
        record.status = JobStatus::Running;

        self.store.put(&record).await?;
        info!(
            "Tracking job {}: {} steps, estimated {:.0}s",
            self.job_id,
            record.steps.len(),
            record.estimated_total_time
        );

        *state = Some(TrackerState {
            record: record.clone(),
            step_started: now,
        });
        Ok(record)
    }

    /// Report progress, optionally moving to a later step.
    ///
    /// A `step_index` lower than the current one is ignored (the message is
    /// still recorded); an index past the end is clamped to the last step.
    /// Each call performs one store write.
    pub async fn advance(
        &self,
        message: impl Into<String>,
        step_index: Option<usize>,
    ) -> ProgressResult<ProgressRecord> {
        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| ProgressError::not_initialized(&self.job_id))?;

        if state.record.is_terminal() {
            debug!(
                "Ignoring progress for job {} in terminal state {}",
                self.job_id, state.record.status
            );
            return Ok(state.record.clone());
        }

        let now = now_epoch().max(state.record.last_update_time);
        let mut next = state.record.clone();
        next.last_message = message.into();
        next.last_update_time = now;
        next.elapsed_time = (now - next.start_time).max(0.0);

        let current = next.current_step_index;
        let mut moved = false;
        if let Some(requested) = step_index {
            let target = requested.min(next.steps.len().saturating_sub(1));
            if target > current {
                next.current_step_index = target;
                moved = true;
            } else if requested < current {
                debug!(
                    "Ignoring backward step {} < {} for job {}",
                    requested, current, self.job_id
                );
            }
        }
        next.progress_percentage =
            running_percentage(&next).max(state.record.progress_percentage);

        self.store.put(&next).await?;

        if moved {
            self.record_step_time(&state.record, current, state.step_started, now);
            state.step_started = now;
        }
        state.record = next;
        Ok(state.record.clone())
    }

    /// Finish the job successfully, attaching its results. A second terminal
    /// call is a no-op returning the stored record.
    pub async fn mark_completed(
        &self,
        message: impl Into<String>,
        results: serde_json::Value,
    ) -> ProgressResult<ProgressRecord> {
        self.finish(JobStatus::Completed, message.into(), Some(results))
            .await
    }

    /// Fail the job; `message` becomes the error message. Idempotent.
    pub async fn mark_failed(&self, message: impl Into<String>) -> ProgressResult<ProgressRecord> {
        self.finish(JobStatus::Failed, message.into(), None).await
    }

    async fn finish(
        &self,
        status: JobStatus,
        message: String,
        results: Option<serde_json::Value>,
    ) -> ProgressResult<ProgressRecord> {
        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| ProgressError::not_initialized(&self.job_id))?;

        if state.record.is_terminal() {
            debug!(
                "Job {} already {}, ignoring {}",
                self.job_id, state.record.status, status
            );
            return Ok(state.record.clone());
        }

        let now = now_epoch().max(state.record.last_update_time);
        let mut next = state.record.clone();
        next.status = status;
        next.last_update_time = now;
        next.elapsed_time = (now - next.start_time).max(0.0);
        match status {
            JobStatus::Completed => {
                next.progress_percentage = 100.0;
                next.current_step_index = next.steps.len().saturating_sub(1);
                next.raw_results = results.filter(|v| !v.is_null());
                next.error_message = None;
            }
            _ => {
                next.error_message = Some(message.clone());
            }
        }
        next.last_message = message;

        self.store.put(&next).await?;

        if status == JobStatus::Completed {
            let current = state.record.current_step_index;
            self.record_step_time(&state.record, current, state.step_started, now);
        }
        info!(
            "Job {} {} after {:.1}s: {}",
            self.job_id, status, next.elapsed_time, next.last_message
        );
        state.record = next;
        Ok(state.record.clone())
    }

    fn record_step_time(&self, record: &ProgressRecord, index: usize, started: f64, now: f64) {
        if let (Some(timings), Some(step)) = (&self.timings, record.steps.get(index)) {
            timings.record(&step.name, now - started);
        }
    }
}

/// Share of the plan's weight covered by the steps before the current one
fn running_percentage(record: &ProgressRecord) -> f64 {
    let total: f64 = record.steps.iter().map(|s| s.weight).sum();
    let index = record.current_step_index.min(record.steps.len());
    let percentage = if total > 0.0 {
        let done: f64 = record.steps[..index].iter().map(|s| s.weight).sum();
        done / total * 100.0
    } else if record.steps.is_empty() {
        0.0
    } else {
        index as f64 / record.steps.len() as f64 * 100.0
    };
    percentage.clamp(0.0, MAX_RUNNING_PERCENTAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::models::StepInfo;
    use crate::storage::{
        FileDurableStore, InMemoryExpiringStore, MockDurableBackend, StoreSettings,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn settings() -> StoreSettings {
        StoreSettings {
            ttl: Duration::from_secs(60),
            key_prefix: "progress:".to_string(),
        }
    }

    fn file_store(dir: &TempDir) -> Arc<DualBackendStore> {
        Arc::new(DualBackendStore::new(
            Arc::new(FileDurableStore::new(dir.path(), "json")),
            Some(Arc::new(InMemoryExpiringStore::new())),
            settings(),
        ))
    }

    fn three_step_plan() -> StepPlan {
        StepPlan::from_steps(
            vec![
                StepInfo::new("collect", "Collect data", 10.0),
                StepInfo::new("analyse", "Analyse data", 30.0),
                StepInfo::new("report", "Write report", 10.0),
            ],
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = file_store(&dir);
        let tracker = ProgressTracker::new("job-1", store.clone());

        let record = tracker.create(&three_step_plan()).await.unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert_eq!(record.current_step_index, 0);
        assert_eq!(record.estimated_total_time, 50.0);

        let record = tracker.advance("analysing", Some(1)).await.unwrap();
        assert_eq!(record.progress_percentage, 20.0);
        let record = tracker.advance("reporting", Some(2)).await.unwrap();
        assert_eq!(record.progress_percentage, 80.0);

        let record = tracker
            .mark_completed("done", json!({"subject": "AAPL"}))
            .await
            .unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress_percentage, 100.0);
        assert!(record.raw_results.is_some());

        let stored = store.get("job-1").await.unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn test_operations_before_create() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new("job-1", file_store(&dir));

        let err = tracker.advance("x", None).await.unwrap_err();
        assert!(matches!(err, ProgressError::NotInitialized { .. }));
        let err = tracker.mark_completed("x", json!({})).await.unwrap_err();
        assert!(matches!(err, ProgressError::NotInitialized { .. }));
        let err = tracker.mark_failed("x").await.unwrap_err();
        assert!(matches!(err, ProgressError::NotInitialized { .. }));
        assert!(tracker.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_create_twice() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new("job-1", file_store(&dir));
        tracker.create(&three_step_plan()).await.unwrap();

        let err = tracker.create(&three_step_plan()).await.unwrap_err();
        assert!(matches!(err, ProgressError::AlreadyInitialized { .. }));
    }

    #[tokio::test]
    async fn test_backward_step_is_ignored() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new("job-1", file_store(&dir));
        tracker.create(&three_step_plan()).await.unwrap();
        tracker.advance("step two", Some(2)).await.unwrap();

        let record = tracker.advance("late message", Some(1)).await.unwrap();
        assert_eq!(record.current_step_index, 2);
        assert_eq!(record.last_message, "late message");

        let record = tracker.advance("past the end", Some(99)).await.unwrap();
        assert_eq!(record.current_step_index, 2);
        assert!(record.progress_percentage < 100.0);
    }

    #[tokio::test]
    async fn test_terminal_calls_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new("job-1", file_store(&dir));
        tracker.create(&three_step_plan()).await.unwrap();

        let first = tracker.mark_failed("model quota exhausted").await.unwrap();
        assert_eq!(first.status, JobStatus::Failed);
        assert_eq!(first.error_message.as_deref(), Some("model quota exhausted"));

        let second = tracker.mark_failed("again").await.unwrap();
        assert_eq!(first, second);
        let third = tracker.mark_completed("too late", json!({})).await.unwrap();
        assert_eq!(first, third);
        let fourth = tracker.advance("still going?", Some(2)).await.unwrap();
        assert_eq!(first, fourth);
    }

    #[tokio::test]
    async fn test_repeated_terminal_calls_write_nothing() {
        let mut durable = MockDurableBackend::new();
        // create, then the first terminal call
        durable.expect_write().times(2).returning(|_, _| Ok(()));
        durable.expect_location().returning(|| "mock".to_string());
        let store = Arc::new(DualBackendStore::new(Arc::new(durable), None, settings()));

        let tracker = ProgressTracker::new("job-1", store);
        tracker.create(&three_step_plan()).await.unwrap();

        let first = tracker.mark_failed("provider timeout").await.unwrap();
        let second = tracker.mark_failed("provider timeout").await.unwrap();
        let third = tracker.mark_completed("done", json!({"ok": true})).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, third);
        assert_eq!(third.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_durable_failure_leaves_state_untouched() {
        let writes = Arc::new(AtomicUsize::new(0));
        let counter = writes.clone();
        let mut durable = MockDurableBackend::new();
        durable.expect_write().returning(move |_, _| {
            // create and the first advance succeed, the second advance fails
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(())
            } else {
                Err(StoreError::unavailable("disk full"))
            }
        });
        let store = Arc::new(DualBackendStore::new(Arc::new(durable), None, settings()));
        let tracker = ProgressTracker::new("job-1", store);

        tracker.create(&three_step_plan()).await.unwrap();
        let before = tracker.advance("step one", Some(1)).await.unwrap();

        let err = tracker.advance("step two", Some(2)).await.unwrap_err();
        assert!(err.is_durable_failure());

        let after = tracker.snapshot().await.unwrap();
        assert_eq!(after, before);
        assert_eq!(after.status, JobStatus::Running);
        assert_eq!(after.current_step_index, 1);
    }

    #[tokio::test]
    async fn test_start_feeds_step_timings() {
        let dir = TempDir::new().unwrap();
        let planner = StepPlanner::new(&crate::config::PlannerConfig::default());
        let params = JobParameters::new(vec![crate::models::AnalysisModule::Market], 1, "openai");

        let tracker = ProgressTracker::start("job-1", &params, &planner, file_store(&dir))
            .await
            .unwrap();
        let record = tracker.snapshot().await.unwrap();
        assert_eq!(record.parameters.as_ref().map(|p| p.depth), Some(1));

        tracker.advance("decision", Some(1)).await.unwrap();
        assert_eq!(planner.timings().sample_count("market_analysis"), 1);
    }

    #[test]
    fn test_running_percentage_with_zero_weights() {
        let plan = StepPlan::from_steps(
            vec![StepInfo::new("a", "", 0.0), StepInfo::new("b", "", 0.0)],
            Some(10.0),
        )
        .unwrap();
        let mut record = ProgressRecord {
            job_id: "j".to_string(),
            status: JobStatus::Running,
            steps: plan.steps,
            current_step_index: 1,
            progress_percentage: 0.0,
            last_message: String::new(),
            start_time: 0.0,
            last_update_time: 0.0,
            estimated_total_time: 10.0,
            elapsed_time: 0.0,
            raw_results: None,
            error_message: None,
            parameters: None,
        };
        assert_eq!(running_percentage(&record), 50.0);
        record.current_step_index = 0;
        assert_eq!(running_percentage(&record), 0.0);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn progress_never_decreases(
                weights in proptest::collection::vec(0.0f64..100.0, 1..8),
                indices in proptest::collection::vec(0usize..10, 1..12),
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let dir = TempDir::new().unwrap();
                    let tracker = ProgressTracker::new("prop-job", file_store(&dir));
                    let steps = weights
                        .iter()
                        .enumerate()
                        .map(|(i, w)| StepInfo::new(format!("step_{i}"), "", *w))
                        .collect();
                    tracker
                        .create(&StepPlan::from_steps(steps, None).unwrap())
                        .await
                        .unwrap();

                    let mut sorted = indices.clone();
                    sorted.sort_unstable();
                    let mut last = 0.0;
                    for index in sorted {
                        let record = tracker.advance("tick", Some(index)).await.unwrap();
                        assert!(record.progress_percentage >= last);
                        assert!(record.progress_percentage < 100.0);
                        last = record.progress_percentage;
                    }

                    let done = tracker.mark_completed("done", serde_json::Value::Null).await.unwrap();
                    assert_eq!(done.progress_percentage, 100.0);
                });
            }
        }
    }
}
