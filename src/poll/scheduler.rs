//! Timed polling of one job on behalf of one viewer session
//!
//! The scheduler ticks on a tokio interval, runs each tick through the
//! [`PollCoordinator`] and forwards fresh views over a channel. It ends when
//! the job reaches a terminal status, the session is stopped or cancelled,
//! the receiver goes away, or the maximum poll duration elapses.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{PollCoordinator, PollOutcome, ProgressView, SkipReason};
use crate::config::PollingConfig;
use crate::models::{JobStatus, MIN_DEPTH};

const VIEW_CHANNEL_CAPACITY: usize = 16;

/// Why a scheduler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEnd {
    Finished(JobStatus),
    Stopped,
    Cancelled,
    TimedOut,
    ReceiverClosed,
}

pub struct PollScheduler {
    coordinator: Arc<PollCoordinator>,
    job_id: String,
    session: String,
    cancel: CancellationToken,
    forget_on_exit: bool,
}

impl PollScheduler {
    pub fn new(
        coordinator: Arc<PollCoordinator>,
        job_id: impl Into<String>,
        session: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            job_id: job_id.into(),
            session: session.into(),
            cancel: CancellationToken::new(),
            forget_on_exit: false,
        }
    }

    /// Drop the session's coordinator state once polling ends.
    ///
    /// Without this the final [`SessionState`](super::SessionState) stays
    /// queryable and the caller owns [`PollCoordinator::forget`].
    pub fn forget_on_exit(mut self) -> Self {
        self.forget_on_exit = true;
        self
    }

    /// Token that stops the scheduler when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run on a background task, returning the view stream and the task handle
    pub fn spawn(self) -> (mpsc::Receiver<ProgressView>, JoinHandle<PollEnd>) {
        let (tx, rx) = mpsc::channel(VIEW_CHANNEL_CAPACITY);
        let handle = tokio::spawn(self.run(tx));
        (rx, handle)
    }

    pub async fn run(self, tx: mpsc::Sender<ProgressView>) -> PollEnd {
        let end = self.run_until_end(tx).await;
        if self.forget_on_exit {
            self.coordinator.forget(&self.job_id, &self.session);
        }
        end
    }

    async fn run_until_end(&self, tx: mpsc::Sender<ProgressView>) -> PollEnd {
        let settings = self.coordinator.settings().clone();
        let deadline = Instant::now() + settings.max_poll_duration;
        let mut fast = false;
        let mut interval = Self::interval(self.coordinator.refresh_interval(fast), Duration::ZERO);

        debug!(
            "Polling job {} for session {} (max {:?})",
            self.job_id, self.session, settings.max_poll_duration
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return self.cancelled(),
                _ = tokio::time::sleep_until(deadline) => return self.timed_out(&settings),
                _ = interval.tick() => {}
            }

            // a hung fetch must not outlive cancellation or the deadline
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return self.cancelled(),
                _ = tokio::time::sleep_until(deadline) => return self.timed_out(&settings),
                outcome = self.coordinator.poll(&self.job_id, &self.session) => outcome,
            };

            match outcome {
                PollOutcome::Ready { view, permit } => {
                    let status = view.status;
                    let terminal = view.is_terminal;
                    let view_fast = view.depth == Some(MIN_DEPTH);

                    if tx.send(view).await.is_err() {
                        self.coordinator.stop(&self.job_id, &self.session);
                        return PollEnd::ReceiverClosed;
                    }
                    drop(permit);

                    if terminal {
                        return PollEnd::Finished(status);
                    }
                    if view_fast != fast {
                        fast = view_fast;
                        let period = self.coordinator.refresh_interval(fast);
                        trace!("Job {} polling interval now {:?}", self.job_id, period);
                        interval = Self::interval(period, period);
                    }
                }
                PollOutcome::Skipped(SkipReason::Stopped) => return PollEnd::Stopped,
                PollOutcome::Skipped(reason) => trace!("Poll skipped: {:?}", reason),
                PollOutcome::Pending => trace!("Job {} has no record yet", self.job_id),
                PollOutcome::Unavailable { reason } => {
                    debug!("Job {} unavailable this tick: {}", self.job_id, reason)
                }
            }
        }
    }

    fn cancelled(&self) -> PollEnd {
        self.coordinator.stop(&self.job_id, &self.session);
        debug!("Polling of job {} cancelled", self.job_id);
        PollEnd::Cancelled
    }

    fn timed_out(&self, settings: &PollingConfig) -> PollEnd {
        self.coordinator.mark_timed_out(&self.job_id, &self.session);
        info!(
            "Stopped polling job {} after {:?}",
            self.job_id, settings.max_poll_duration
        );
        PollEnd::TimedOut
    }

    fn interval(period: Duration, first_after: Duration) -> tokio::time::Interval {
        let mut interval = tokio::time::interval_at(Instant::now() + first_after, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }
}
