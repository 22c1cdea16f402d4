//! Scheduler for crawl runs
//!
//! This module handles:
//! - Firing runs on an interval or cron trigger, or on demand
//! - Single-flight: at most one run is active at any moment
//! - Monotonic run ids and a bounded in-memory run history
//! - The consecutive-failure streak and alerting
//!
//! A trigger that arrives while a run is active is skipped, not queued.

mod state;
mod trigger;

pub use state::{AlertPolicy, SchedulerState};
pub use trigger::{CronSchedule, Trigger};

use crate::alert::{AlertError, Alerter};
use crate::state::RunSummary;
use crate::storage::{HistoryLog, StorageResult};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Longest an alert delivery may take before it is abandoned
pub const DEFAULT_ALERT_TIMEOUT: Duration = Duration::from_secs(30);

/// Starts one crawl run and reports how it ended
///
/// Implementations must return a summary for every run, including cancelled
/// ones. A panic is caught by the scheduler and recorded as an aborted run.
#[async_trait::async_trait]
pub trait RunLauncher: Send + Sync {
    async fn launch(&self, run_id: i64, cancel: CancellationToken) -> RunSummary;
}

/// What asked for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Timer,
    Manual,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timer => write!(f, "timer"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// A run was started and has finished with this summary
    Started(RunSummary),
    /// Another run was active, or the scheduler is shutting down
    Skipped,
}

/// Clears the active flag when the triggering call ends, however it ends
struct ActiveGuard<'a>(&'a SchedulerState);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

pub struct Scheduler {
    launcher: Arc<dyn RunLauncher>,
    alerter: Arc<dyn Alerter>,
    history_log: Option<Arc<dyn HistoryLog>>,
    state: Arc<SchedulerState>,
    policy: AlertPolicy,
    history_size: usize,
    alert_timeout: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        launcher: Arc<dyn RunLauncher>,
        alerter: Arc<dyn Alerter>,
        policy: AlertPolicy,
        history_size: usize,
    ) -> Self {
        Self {
            launcher,
            alerter,
            history_log: None,
            state: Arc::new(SchedulerState::new(history_size)),
            policy,
            history_size,
            alert_timeout: DEFAULT_ALERT_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_alert_timeout(mut self, timeout: Duration) -> Self {
        self.alert_timeout = timeout;
        self
    }

    /// Persists every summary to `log` and resumes history and run ids from it
    pub fn with_history_log(mut self, log: Arc<dyn HistoryLog>) -> StorageResult<Self> {
        let past = log.load_recent(self.history_size)?;
        let last_run_id = log.max_run_id()?;
        tracing::info!(
            "Restored {} run(s) from history, last run id {:?}",
            past.len(),
            last_run_id
        );

        self.state = Arc::new(SchedulerState::restore(
            self.history_size,
            past,
            last_run_id,
            &self.policy,
        ));
        self.history_log = Some(log);
        Ok(self)
    }

    /// Token that cancels the active run and stops the trigger loop
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        tracing::info!("Scheduler shutting down");
        self.shutdown.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Recent run summaries, oldest first
    pub fn history(&self) -> Vec<RunSummary> {
        self.state.history()
    }

    pub fn failure_streak(&self) -> u32 {
        self.state.failure_streak()
    }

    /// Resolves once no run is active
    pub async fn wait_idle(&self) {
        self.state.wait_idle().await
    }

    /// Starts a run unless one is already active, and waits for it to finish
    ///
    /// # Returns
    ///
    /// * `TriggerOutcome::Started(summary)` - The run's final summary
    /// * `TriggerOutcome::Skipped` - A run was already active or shutdown began
    pub async fn trigger(&self, source: TriggerSource) -> TriggerOutcome {
        if self.shutdown.is_cancelled() {
            tracing::debug!("Ignoring {} trigger during shutdown", source);
            return TriggerOutcome::Skipped;
        }

        let Some(run_id) = self.state.try_begin() else {
            tracing::info!("Skipping {} trigger: a run is already active", source);
            return TriggerOutcome::Skipped;
        };
        let _active = ActiveGuard(&self.state);

        tracing::info!("Run {} triggered by {}", run_id, source);
        let started_at = Utc::now();
        let launcher = self.launcher.clone();
        let cancel = self.shutdown.child_token();

        let summary = match AssertUnwindSafe(launcher.launch(run_id, cancel))
            .catch_unwind()
            .await
        {
            Ok(summary) => summary,
            Err(payload) => {
                let message = panic_message(payload);
                tracing::error!("Run {} panicked: {}", run_id, message);
                RunSummary::aborted(run_id, started_at, format!("run panicked: {}", message))
            }
        };

        self.finalize(&summary).await;
        TriggerOutcome::Started(summary)
    }

    async fn finalize(&self, summary: &RunSummary) {
        tracing::info!(
            "Run {} finished: {} in {}s ({} fetched, {} failed, {} records)",
            summary.run_id,
            summary.termination,
            summary.duration().num_seconds(),
            summary.pages_fetched,
            summary.pages_failed,
            summary.records_emitted
        );

        if let Some(log) = &self.history_log {
            if let Err(e) = log.append(summary) {
                tracing::warn!("Failed to persist run {}: {}", summary.run_id, e);
            }
        }

        if let Some(streak) = self.state.record(summary.clone(), &self.policy) {
            self.spawn_alert(summary.clone(), streak);
        }
    }

    /// Delivers an alert off the trigger path so a stuck alerter cannot hold
    /// the active flag
    fn spawn_alert(&self, summary: RunSummary, streak: u32) {
        let alerter = self.alerter.clone();
        let limit = self.alert_timeout;

        tokio::spawn(async move {
            let delivered = match tokio::time::timeout(limit, alerter.notify(&summary, streak)).await {
                Ok(result) => result,
                Err(_) => Err(AlertError::TimedOut(limit)),
            };
            if let Err(e) = delivered {
                tracing::warn!("Failed to deliver alert for run {}: {}", summary.run_id, e);
            }
        });
    }

    /// Fires runs from `trigger` until shutdown
    ///
    /// Each fire is spawned so a long run never delays the timer; fires that
    /// land on an active run are skipped.
    pub async fn run_loop(self: Arc<Self>, trigger: Trigger, run_on_start: bool) {
        if run_on_start {
            self.spawn_trigger(TriggerSource::Timer);
        }

        loop {
            let Some(delay) = trigger.next_delay(Utc::now()) else {
                tracing::warn!("Schedule has no future fire times; stopping trigger loop");
                break;
            };
            tracing::debug!("Next run in {:?}", delay);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            self.spawn_trigger(TriggerSource::Timer);
        }

        tracing::info!("Trigger loop stopped");
    }

    fn spawn_trigger(self: &Arc<Self>, source: TriggerSource) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.trigger(source).await;
        });
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
