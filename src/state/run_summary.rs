use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// How a crawl run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The frontier reached quiescence
    Completed,

    /// Page budget exhausted, cancelled, or a coordination failure
    Aborted,

    /// The wall-clock ceiling was hit
    TimedOut,
}

impl TerminationReason {
    /// Converts the reason to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::TimedOut => "timed_out",
        }
    }

    /// Parses a reason from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "aborted" => Some(Self::Aborted),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }

    pub fn all_reasons() -> [Self; 3] {
        [Self::Completed, Self::Aborted, Self::TimedOut]
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Finalized outcome of one crawl run
///
/// Built once when the run ends and never mutated afterwards; the scheduler
/// keeps it in its history and hands copies to the alerter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages_fetched: u64,
    pub pages_failed: u64,
    pub records_emitted: u64,
    pub sink_errors: u64,
    pub termination: TerminationReason,
    /// Panic message or invariant breach that aborted the run
    pub error: Option<String>,
}

impl RunSummary {
    /// Summary for a run that never got to crawl anything
    pub fn aborted(run_id: i64, started_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            pages_fetched: 0,
            pages_failed: 0,
            records_emitted: 0,
            sink_errors: 0,
            termination: TerminationReason::Aborted,
            error: Some(error.into()),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn pages_total(&self) -> u64 {
        self.pages_fetched + self.pages_failed
    }

    /// Failed pages over all finished pages; 0.0 for an empty run
    pub fn failed_ratio(&self) -> f64 {
        match self.pages_total() {
            0 => 0.0,
            total => self.pages_failed as f64 / total as f64,
        }
    }

    /// Returns true if this run counts toward the failure streak
    ///
    /// Aborted and timed-out runs always count. A completed run counts when
    /// its failed-page ratio exceeds `max_failed_ratio`.
    pub fn is_failure(&self, max_failed_ratio: f64) -> bool {
        match self.termination {
            TerminationReason::Completed => self.failed_ratio() > max_failed_ratio,
            TerminationReason::Aborted | TerminationReason::TimedOut => true,
        }
    }
}
