//! Statistics over the persisted run history
//!
//! This module provides functionality for extracting and displaying
//! run statistics from the storage layer.

use crate::state::{RunSummary, TerminationReason};
use crate::storage::Storage;
use crate::CrawlError;

/// Aggregate over a window of recent runs
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStatistics {
    /// Number of runs in the window
    pub total_runs: u64,

    /// Run count per termination reason, in declaration order
    pub runs_by_termination: Vec<(TerminationReason, u64)>,

    /// Runs that counted toward a failure streak
    pub failed_runs: u64,

    /// Consecutive failed runs at the end of the window
    pub trailing_failures: u64,

    pub pages_fetched: u64,
    pub pages_failed: u64,
    pub records_emitted: u64,
    pub sink_errors: u64,

    /// Mean run duration in seconds
    pub average_duration_secs: f64,

    /// Records currently in the store
    pub total_records: u64,

    /// Most recent run in the window
    pub last_run: Option<RunSummary>,
}

/// Aggregates `runs` (oldest first)
///
/// # Arguments
///
/// * `runs` - Run summaries, oldest first
/// * `total_records` - Current size of the record store
/// * `max_failed_ratio` - Failed page ratio above which a completed run failed
pub fn compute_statistics(
    runs: &[RunSummary],
    total_records: u64,
    max_failed_ratio: f64,
) -> HistoryStatistics {
    let runs_by_termination = TerminationReason::all_reasons()
        .into_iter()
        .map(|reason| {
            let count = runs.iter().filter(|r| r.termination == reason).count() as u64;
            (reason, count)
        })
        .collect();

    let failed_runs = runs
        .iter()
        .filter(|r| r.is_failure(max_failed_ratio))
        .count() as u64;
    let trailing_failures = runs
        .iter()
        .rev()
        .take_while(|r| r.is_failure(max_failed_ratio))
        .count() as u64;

    let average_duration_secs = if runs.is_empty() {
        0.0
    } else {
        let total_ms: i64 = runs.iter().map(|r| r.duration().num_milliseconds()).sum();
        total_ms as f64 / 1000.0 / runs.len() as f64
    };

    HistoryStatistics {
        total_runs: runs.len() as u64,
        runs_by_termination,
        failed_runs,
        trailing_failures,
        pages_fetched: runs.iter().map(|r| r.pages_fetched).sum(),
        pages_failed: runs.iter().map(|r| r.pages_failed).sum(),
        records_emitted: runs.iter().map(|r| r.records_emitted).sum(),
        sink_errors: runs.iter().map(|r| r.sink_errors).sum(),
        average_duration_secs,
        total_records,
        last_run: runs.last().cloned(),
    }
}

/// Loads statistics for the `limit` most recent runs
pub fn load_statistics(
    storage: &dyn Storage,
    limit: usize,
    max_failed_ratio: f64,
) -> Result<HistoryStatistics, CrawlError> {
    let runs = storage.recent_runs(limit)?;
    let total_records = storage.count_records()?;
    Ok(compute_statistics(&runs, total_records, max_failed_ratio))
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HistoryStatistics) {
    println!("=== Run History ===\n");

    println!("Overview:");
    println!("  Runs: {}", stats.total_runs);
    println!("  Records stored: {}", stats.total_records);
    println!("  Average duration: {:.1}s", stats.average_duration_secs);
    println!();

    println!("Runs by Termination:");
    for (reason, count) in &stats.runs_by_termination {
        let percentage = if stats.total_runs > 0 {
            (*count as f64 / stats.total_runs as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", reason, count, percentage);
    }
    println!();

    println!("Pages:");
    println!("  Fetched: {}", stats.pages_fetched);
    println!("  Failed: {}", stats.pages_failed);
    println!("  Records emitted: {}", stats.records_emitted);
    if stats.sink_errors > 0 {
        println!("  Sink errors: {}", stats.sink_errors);
    }
    println!();

    if let Some(last) = &stats.last_run {
        println!(
            "Last Run: #{} started {} ({}, {} fetched, {} failed)",
            last.run_id,
            last.started_at.to_rfc3339(),
            last.termination,
            last.pages_fetched,
            last.pages_failed
        );
        if let Some(error) = &last.error {
            println!("  Error: {}", error);
        }
    }

    println!(
        "Failed runs: {} / {} ({} consecutive at the end)",
        stats.failed_runs, stats.total_runs, stats.trailing_failures
    );
}
