//! Mutable scheduler state: the single-flight flag, run ids, the failure
//! streak and the bounded run history

use crate::state::RunSummary;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// When a run counts as failed and when a streak is alerted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertPolicy {
    /// Consecutive failures that trigger an alert
    pub failure_threshold: u32,
    /// Failed page ratio above which a completed run is a failure
    pub failed_page_ratio: f64,
}

impl AlertPolicy {
    pub fn from_config(config: &crate::config::AlertConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            failed_page_ratio: config.failed_page_ratio,
        }
    }
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failed_page_ratio: 0.5,
        }
    }
}

#[derive(Debug)]
struct Inner {
    active: bool,
    next_run_id: i64,
    streak: u32,
    alerted: bool,
    history: VecDeque<RunSummary>,
    history_size: usize,
}

/// State shared by every trigger of one scheduler
///
/// All fields live behind one lock, so the check-and-set of the active flag
/// and the run id assignment happen atomically.
#[derive(Debug)]
pub struct SchedulerState {
    inner: Mutex<Inner>,
    idle: Notify,
}

impl SchedulerState {
    /// Creates empty state; the first run gets id 1
    pub fn new(history_size: usize) -> Self {
        Self::restore(history_size, Vec::new(), None, &AlertPolicy::default())
    }

    /// Rebuilds state from persisted history
    ///
    /// # Arguments
    ///
    /// * `history_size` - Number of summaries kept in memory
    /// * `past` - Earlier summaries, oldest first
    /// * `last_run_id` - Highest run id ever issued, if any
    /// * `policy` - Classifies past runs to rebuild the trailing failure streak
    ///
    /// A restored streak already at the threshold counts as alerted, so the
    /// restart does not repeat an alert sent before it.
    pub fn restore(
        history_size: usize,
        past: Vec<RunSummary>,
        last_run_id: Option<i64>,
        policy: &AlertPolicy,
    ) -> Self {
        let streak = past
            .iter()
            .rev()
            .take_while(|s| s.is_failure(policy.failed_page_ratio))
            .count() as u32;

        let history_size = history_size.max(1);
        let skip = past.len().saturating_sub(history_size);
        let history: VecDeque<RunSummary> = past.into_iter().skip(skip).collect();

        let highest = history
            .iter()
            .map(|s| s.run_id)
            .chain(last_run_id)
            .max()
            .unwrap_or(0);

        Self {
            inner: Mutex::new(Inner {
                active: false,
                next_run_id: highest + 1,
                streak,
                alerted: streak >= policy.failure_threshold,
                history,
                history_size,
            }),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks a run active and assigns its id, or returns `None` if one is
    /// already active
    pub fn try_begin(&self) -> Option<i64> {
        let mut inner = self.lock();
        if inner.active {
            return None;
        }
        inner.active = true;
        let run_id = inner.next_run_id;
        inner.next_run_id += 1;
        Some(run_id)
    }

    /// Clears the active flag and wakes idle waiters
    pub fn finish(&self) {
        self.lock().active = false;
        self.idle.notify_waiters();
    }

    /// Appends a finished run and updates the failure streak
    ///
    /// Returns the streak length when this run crosses the alert threshold
    /// for the first time since the last success.
    pub fn record(&self, summary: RunSummary, policy: &AlertPolicy) -> Option<u32> {
        let mut inner = self.lock();

        let failed = summary.is_failure(policy.failed_page_ratio);
        inner.history.push_back(summary);
        while inner.history.len() > inner.history_size {
            inner.history.pop_front();
        }

        if !failed {
            inner.streak = 0;
            inner.alerted = false;
            return None;
        }

        inner.streak += 1;
        if inner.streak >= policy.failure_threshold && !inner.alerted {
            inner.alerted = true;
            return Some(inner.streak);
        }
        None
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn failure_streak(&self) -> u32 {
        self.lock().streak
    }

    /// Recent summaries, oldest first
    pub fn history(&self) -> Vec<RunSummary> {
        self.lock().history.iter().cloned().collect()
    }

    /// Resolves once no run is active
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_active() {
                return;
            }
            notified.await;
        }
    }
}
