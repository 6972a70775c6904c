//! Poll Coordinator
//!
//! Read-side guard for viewers polling a job. State is kept per
//! `(job_id, session)` pair so different viewers never contend:
//!
//! - a render permit allows one in-flight poll and render at a time; a poll
//!   arriving while one is in flight is dropped, not queued
//! - a rate limiter enforces a minimum interval between refreshes, widened
//!   for fast (depth 1) plans
//!
//! Stopping a session only affects polling; trackers and stores never see it.

pub mod scheduler;
pub mod view;

pub use scheduler::{PollEnd, PollScheduler};
pub use view::ProgressView;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::PollingConfig;
use crate::errors::ProgressError;
use crate::models::MIN_DEPTH;
use crate::storage::DualBackendStore;
use crate::utils::now_epoch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Viewer asked to stop
    Stopped,
    /// A terminal status was observed
    Finished,
    /// Gave up after the maximum poll duration
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    RateLimited { retry_after: Duration },
    Stopped,
}

#[derive(Debug)]
pub enum PollOutcome {
    /// Fresh snapshot; render it while holding `permit`
    Ready {
        view: ProgressView,
        permit: RenderPermit,
    },
    Skipped(SkipReason),
    /// No record yet, show the job as initializing
    Pending,
    /// The snapshot could not be read; try again on the next tick
    Unavailable { reason: String },
}

type SlotKey = (String, String);

#[derive(Debug)]
struct PollSlot {
    in_flight: bool,
    last_refresh: Option<Instant>,
    state: SessionState,
    fast: bool,
}

impl PollSlot {
    fn new() -> Self {
        Self {
            in_flight: false,
            last_refresh: None,
            state: SessionState::Active,
            fast: false,
        }
    }
}

type Slots = Arc<Mutex<HashMap<SlotKey, PollSlot>>>;

fn lock(slots: &Mutex<HashMap<SlotKey, PollSlot>>) -> MutexGuard<'_, HashMap<SlotKey, PollSlot>> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

/// Exclusive right to render one job for one session; released on drop
#[derive(Debug)]
pub struct RenderPermit {
    slots: Slots,
    key: SlotKey,
}

impl Drop for RenderPermit {
    fn drop(&mut self) {
        if let Some(slot) = lock(&self.slots).get_mut(&self.key) {
            slot.in_flight = false;
        }
    }
}

pub struct PollCoordinator {
    store: Arc<DualBackendStore>,
    settings: PollingConfig,
    slots: Slots,
}

impl PollCoordinator {
    pub fn new(store: Arc<DualBackendStore>, settings: PollingConfig) -> Self {
        Self {
            store,
            settings,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &PollingConfig {
        &self.settings
    }

    fn key(job_id: &str, session: &str) -> SlotKey {
        (job_id.to_string(), session.to_string())
    }

    fn min_interval(&self, fast: bool) -> Duration {
        if fast {
            self.settings.fast_min_refresh_interval
        } else {
            self.settings.min_refresh_interval
        }
    }

    /// Interval a scheduler should poll at
    pub fn refresh_interval(&self, fast: bool) -> Duration {
        if fast {
            self.settings.fast_refresh_interval
        } else {
            self.settings.refresh_interval
        }
    }

    pub async fn poll(&self, job_id: &str, session: &str) -> PollOutcome {
        let key = Self::key(job_id, session);
        let permit = {
            let mut slots = lock(&self.slots);
            let slot = slots.entry(key.clone()).or_insert_with(PollSlot::new);

            if slot.state != SessionState::Active {
                return PollOutcome::Skipped(SkipReason::Stopped);
            }
            if slot.in_flight {
                debug!("Dropping poll of {} for {}: render in flight", job_id, session);
                return PollOutcome::Skipped(SkipReason::InFlight);
            }
            let now = Instant::now();
            if let Some(last) = slot.last_refresh {
                let min = self.min_interval(slot.fast);
                let since = now.duration_since(last);
                if since < min {
                    let retry_after = min - since;
                    debug!(
                        "Dropping poll of {} for {}: retry in {:?}",
                        job_id, session, retry_after
                    );
                    return PollOutcome::Skipped(SkipReason::RateLimited { retry_after });
                }
            }
            slot.in_flight = true;
            slot.last_refresh = Some(now);
            RenderPermit {
                slots: Arc::clone(&self.slots),
                key: key.clone(),
            }
        };

        // the slot lock is released; the permit keeps other polls out
        match self.store.fetch(job_id).await {
            Ok(stored) => {
                let view = ProgressView::from_record(&stored.record, stored.source, now_epoch());
                let mut slots = lock(&self.slots);
                if let Some(slot) = slots.get_mut(&key) {
                    slot.fast = stored.record.depth() == Some(MIN_DEPTH);
                    if view.is_terminal && slot.state == SessionState::Active {
                        slot.state = SessionState::Finished;
                    }
                }
                drop(slots);
                PollOutcome::Ready { view, permit }
            }
            Err(ProgressError::NotFound { .. }) => PollOutcome::Pending,
            Err(e) => {
                debug!("Poll of {} for {} failed: {}", job_id, session, e);
                PollOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Let the next poll through regardless of the rate limit
    pub fn force_refresh(&self, job_id: &str, session: &str) {
        if let Some(slot) = lock(&self.slots).get_mut(&Self::key(job_id, session)) {
            slot.last_refresh = None;
        }
    }

    pub fn stop(&self, job_id: &str, session: &str) {
        self.set_state(job_id, session, SessionState::Stopped);
    }

    pub(crate) fn mark_timed_out(&self, job_id: &str, session: &str) {
        self.set_state(job_id, session, SessionState::TimedOut);
    }

    fn set_state(&self, job_id: &str, session: &str, state: SessionState) {
        let mut slots = lock(&self.slots);
        let slot = slots
            .entry(Self::key(job_id, session))
            .or_insert_with(PollSlot::new);
        if slot.state == SessionState::Active {
            slot.state = state;
        }
    }

    pub fn session_state(&self, job_id: &str, session: &str) -> Option<SessionState> {
        lock(&self.slots)
            .get(&Self::key(job_id, session))
            .map(|slot| slot.state)
    }

    /// Drop all state for a session, e.g. when the viewer goes away
    pub fn forget(&self, job_id: &str, session: &str) {
        lock(&self.slots).remove(&Self::key(job_id, session));
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::JobStatus;

    fn coordinator(store: Arc<DualBackendStore>) -> PollCoordinator {
        PollCoordinator::new(store, PollingConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_and_force_refresh() {
        let (store, expiring) = memory_store();
        publish(&expiring, &record("job-1", JobStatus::Running, 2)).await;
        let coordinator = coordinator(store);

        assert!(matches!(
            coordinator.poll("job-1", "viewer").await,
            PollOutcome::Ready { .. }
        ));

        match coordinator.poll("job-1", "viewer").await {
            PollOutcome::Skipped(SkipReason::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(2));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        coordinator.force_refresh("job-1", "viewer");
        assert!(matches!(
            coordinator.poll("job-1", "viewer").await,
            PollOutcome::Ready { .. }
        ));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(
            coordinator.poll("job-1", "viewer").await,
            PollOutcome::Ready { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_plans_get_wider_interval() {
        let (store, expiring) = memory_store();
        publish(&expiring, &record("job-1", JobStatus::Running, 1)).await;
        let coordinator = coordinator(store);

        assert!(matches!(
            coordinator.poll("job-1", "viewer").await,
            PollOutcome::Ready { .. }
        ));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(matches!(
            coordinator.poll("job-1", "viewer").await,
            PollOutcome::Skipped(SkipReason::RateLimited { .. })
        ));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(
            coordinator.poll("job-1", "viewer").await,
            PollOutcome::Ready { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_poll_is_dropped_per_session() {
        let (store, expiring) = memory_store();
        publish(&expiring, &record("job-1", JobStatus::Running, 2)).await;
        let coordinator = coordinator(store);

        let PollOutcome::Ready { permit, .. } = coordinator.poll("job-1", "viewer-a").await else {
            panic!("first poll should be ready");
        };
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(matches!(
            coordinator.poll("job-1", "viewer-a").await,
            PollOutcome::Skipped(SkipReason::InFlight)
        ));
        // another viewer of the same job is unaffected
        assert!(matches!(
            coordinator.poll("job-1", "viewer-b").await,
            PollOutcome::Ready { .. }
        ));

        drop(permit);
        assert!(matches!(
            coordinator.poll("job-1", "viewer-a").await,
            PollOutcome::Ready { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_status_finishes_session() {
        let (store, expiring) = memory_store();
        publish(&expiring, &record("job-1", JobStatus::Completed, 2)).await;
        let coordinator = coordinator(store);

        let PollOutcome::Ready { view, .. } = coordinator.poll("job-1", "viewer").await else {
            panic!("expected a snapshot");
        };
        assert!(view.is_terminal);
        assert_eq!(
            coordinator.session_state("job-1", "viewer"),
            Some(SessionState::Finished)
        );

        coordinator.force_refresh("job-1", "viewer");
        assert!(matches!(
            coordinator.poll("job-1", "viewer").await,
            PollOutcome::Skipped(SkipReason::Stopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_pending() {
        let (store, _expiring) = memory_store();
        let coordinator = coordinator(store);

        assert!(matches!(
            coordinator.poll("not-yet", "viewer").await,
            PollOutcome::Pending
        ));

        coordinator.stop("not-yet", "viewer");
        assert_eq!(
            coordinator.session_state("not-yet", "viewer"),
            Some(SessionState::Stopped)
        );
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(
            coordinator.poll("not-yet", "viewer").await,
            PollOutcome::Skipped(SkipReason::Stopped)
        ));

        coordinator.forget("not-yet", "viewer");
        assert_eq!(coordinator.session_state("not-yet", "viewer"), None);
    }
}
