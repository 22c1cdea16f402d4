//! Storage traits and error types

use crate::record::Record;
use crate::state::RunSummary;
use crate::storage::{ChangeEntry, Snapshot, StoredRecord, UpsertOutcome};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Duplicate run id: {0}")]
    DuplicateRun(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Covers the two persistent concerns of the crawler: the append-only run
/// history and the deduplicated record store with its change log.
pub trait Storage {
    // ===== Run History =====

    /// Appends a finalized run summary
    ///
    /// # Errors
    ///
    /// `StorageError::DuplicateRun` if a summary with the same id exists;
    /// history is never rewritten.
    fn append_run(&mut self, summary: &RunSummary) -> StorageResult<()>;

    /// Returns up to `limit` most recent runs, oldest first
    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunSummary>>;

    /// Highest run id recorded so far
    fn max_run_id(&self) -> StorageResult<Option<i64>>;

    // ===== Records =====

    /// Inserts or updates a record by key
    ///
    /// Re-delivering an equal record (same content hash) only refreshes its
    /// last-seen time and reports `Unchanged`. New and changed records get a
    /// change-log entry flagged recent, and a snapshot when the record carries
    /// page HTML. All writes for one record are atomic.
    fn upsert_record(&mut self, record: &Record, run_id: i64) -> StorageResult<UpsertOutcome>;

    fn get_record(&self, key: &str) -> StorageResult<Option<StoredRecord>>;

    fn get_snapshot(&self, id: i64) -> StorageResult<Option<Snapshot>>;

    fn count_records(&self) -> StorageResult<u64>;

    // ===== Change Log =====

    /// Clears the recent flag on every change-log entry
    ///
    /// Returns the number of entries that were recent.
    fn mark_changes_old(&mut self) -> StorageResult<usize>;

    /// Change-log entries still flagged recent, oldest first
    fn recent_changes(&self) -> StorageResult<Vec<ChangeEntry>>;
}

/// Append-only log of finalized runs, as used by the scheduler
pub trait HistoryLog: Send + Sync {
    fn append(&self, summary: &RunSummary) -> StorageResult<()>;

    /// Up to `limit` most recent runs, oldest first
    fn load_recent(&self, limit: usize) -> StorageResult<Vec<RunSummary>>;

    fn max_run_id(&self) -> StorageResult<Option<i64>>;
}
