//! Record sink capability and its SQLite adapter

use crate::record::Record;
use crate::storage::{lock_storage, SharedStorage, Storage, StorageError, UpsertOutcome};
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Record rejected: {0}")]
    Rejected(String),
}

/// Receives records extracted during a run
///
/// Delivery is at-least-once, so `upsert` must be idempotent for equal
/// records.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Called once before a run starts delivering records
    async fn begin_run(&self, _run_id: i64) -> Result<(), SinkError> {
        Ok(())
    }

    async fn upsert(&self, record: &Record) -> Result<(), SinkError>;
}

/// Sink writing into the SQLite record store
pub struct SqliteSink {
    storage: SharedStorage,
    run_id: AtomicI64,
}

impl SqliteSink {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            run_id: AtomicI64::new(0),
        }
    }
}

#[async_trait::async_trait]
impl RecordSink for SqliteSink {
    /// Marks the previous run's changes old so reports only cover this run
    async fn begin_run(&self, run_id: i64) -> Result<(), SinkError> {
        self.run_id.store(run_id, Ordering::SeqCst);
        let marked = lock_storage(&self.storage).mark_changes_old()?;
        tracing::debug!("Marked {} change(s) as old before run {}", marked, run_id);
        Ok(())
    }

    async fn upsert(&self, record: &Record) -> Result<(), SinkError> {
        let run_id = self.run_id.load(Ordering::SeqCst);
        let outcome = lock_storage(&self.storage).upsert_record(record, run_id)?;

        match outcome {
            UpsertOutcome::Inserted => tracing::info!("New record {}", record.key),
            UpsertOutcome::Updated(fields) => tracing::info!(
                "Updated record {}: {}",
                record.key,
                fields.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
            ),
            UpsertOutcome::Unchanged => tracing::trace!("Unchanged record {}", record.key),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let storage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let sink = SqliteSink::new(storage.clone());
        let record = Record::new("k1", "https://example.com/k1", json!({"title": "One"}));

        sink.begin_run(1).await.unwrap();
        sink.upsert(&record).await.unwrap();
        sink.upsert(&record).await.unwrap();

        let storage = lock_storage(&storage);
        assert_eq!(storage.count_records().unwrap(), 1);
        assert_eq!(storage.recent_changes().unwrap().len(), 1);
        assert_eq!(storage.get_record("k1").unwrap().unwrap().last_run_id, 1);
    }

    #[tokio::test]
    async fn test_begin_run_ages_changes() {
        let storage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let sink = SqliteSink::new(storage.clone());

        sink.begin_run(1).await.unwrap();
        sink.upsert(&Record::new("k1", "u", json!({"v": 1}))).await.unwrap();
        sink.begin_run(2).await.unwrap();
        sink.upsert(&Record::new("k2", "u", json!({"v": 2}))).await.unwrap();

        let changes = lock_storage(&storage).recent_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].record_key, "k2");
        assert_eq!(changes[0].run_id, 2);
    }
}
