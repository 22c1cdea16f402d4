//! Output module for run statistics and change reports
//!
//! This module handles:
//! - Summarizing the persisted run history
//! - Writing JSON reports of records changed by the latest run

mod report;
pub mod stats;

pub use report::{write_change_report, write_change_report_for, ReportOutcome};
pub use stats::{compute_statistics, load_statistics, print_statistics, HistoryStatistics};
