//! SQLite storage implementation

use crate::record::Record;
use crate::state::{RunSummary, TerminationReason};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{HistoryLog, Storage, StorageError, StorageResult};
use crate::storage::{
    changed_fields, lock_storage, ChangeEntry, ChangeType, FieldChanges, SharedStorage, Snapshot,
    StoredRecord, UpsertOutcome,
};
use crate::CrawlError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path` and applies the schema
    pub fn new(path: &Path) -> Result<Self, CrawlError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, CrawlError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

}

fn insert_change(
    conn: &Connection,
    key: &str,
    change: ChangeType,
    fields: &FieldChanges,
    run_id: i64,
    now: &str,
) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO change_log (record_key, change_type, changed_fields, run_id, changed_at, recent)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)",
        params![
            key,
            change.to_db_string(),
            serde_json::to_string(fields)?,
            run_id,
            now
        ],
    )?;
    Ok(())
}

/// Stores the record's page HTML, if it carries any
fn insert_snapshot(
    conn: &Connection,
    record: &Record,
    run_id: i64,
    now: &str,
) -> StorageResult<Option<i64>> {
    let Some(html) = &record.snapshot else {
        return Ok(None);
    };

    conn.execute(
        "INSERT INTO snapshots (record_key, source_url, html, run_id, captured_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![record.key, record.source_url, html, run_id, now],
    )?;
    Ok(Some(conn.last_insert_rowid()))
}

fn find_record(conn: &Connection, key: &str) -> StorageResult<Option<StoredRecord>> {
    let row = conn
        .query_row(
            "SELECT key, source_url, payload, content_hash, first_seen, last_seen, last_run_id,
             raw_snapshot_id
             FROM records WHERE key = ?1",
            params![key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Option<i64>>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((key, source_url, payload, content_hash, first_seen, last_seen, last_run_id, raw_snapshot_id)) =
        row
    else {
        return Ok(None);
    };

    Ok(Some(StoredRecord {
        key,
        source_url,
        payload: serde_json::from_str(&payload)?,
        content_hash,
        first_seen,
        last_seen,
        last_run_id,
        raw_snapshot_id,
    }))
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunSummary> {
    let termination: String = row.get(7)?;
    Ok(RunSummary {
        run_id: row.get(0)?,
        started_at: parse_timestamp(1, row.get(1)?)?,
        finished_at: parse_timestamp(2, row.get(2)?)?,
        pages_fetched: row.get::<_, i64>(3)? as u64,
        pages_failed: row.get::<_, i64>(4)? as u64,
        records_emitted: row.get::<_, i64>(5)? as u64,
        sink_errors: row.get::<_, i64>(6)? as u64,
        termination: TerminationReason::from_db_string(&termination)
            .unwrap_or(TerminationReason::Aborted),
        error: row.get(8)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Run History =====

    fn append_run(&mut self, summary: &RunSummary) -> StorageResult<()> {
        let result = self.conn.execute(
            "INSERT INTO runs (id, started_at, finished_at, pages_fetched, pages_failed,
             records_emitted, sink_errors, termination, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                summary.run_id,
                summary.started_at.to_rfc3339(),
                summary.finished_at.to_rfc3339(),
                summary.pages_fetched as i64,
                summary.pages_failed as i64,
                summary.records_emitted as i64,
                summary.sink_errors as i64,
                summary.termination.to_db_string(),
                summary.error,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::DuplicateRun(summary.run_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, pages_fetched, pages_failed, records_emitted,
             sink_errors, termination, error
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;

        let mut runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        runs.reverse();
        Ok(runs)
    }

    fn max_run_id(&self) -> StorageResult<Option<i64>> {
        let max = self
            .conn
            .query_row("SELECT MAX(id) FROM runs", [], |row| row.get(0))?;
        Ok(max)
    }

    // ===== Records =====

    fn upsert_record(&mut self, record: &Record, run_id: i64) -> StorageResult<UpsertOutcome> {
        let now = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(&record.payload)?;

        // The record row, its snapshot and its change-log entry commit together
        let tx = self.conn.transaction()?;

        let outcome = match find_record(&tx, &record.key)? {
            None => {
                let snapshot_id = insert_snapshot(&tx, record, run_id, &now)?;
                tx.execute(
                    "INSERT INTO records (key, source_url, payload, content_hash, first_seen,
                     last_seen, last_run_id, raw_snapshot_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7)",
                    params![
                        record.key,
                        record.source_url,
                        payload,
                        record.content_hash,
                        now,
                        run_id,
                        snapshot_id
                    ],
                )?;
                insert_change(&tx, &record.key, ChangeType::New, &FieldChanges::new(), run_id, &now)?;
                UpsertOutcome::Inserted
            }
            Some(existing) if existing.content_hash == record.content_hash => {
                tx.execute(
                    "UPDATE records SET last_seen = ?1, last_run_id = ?2 WHERE key = ?3",
                    params![now, run_id, record.key],
                )?;
                UpsertOutcome::Unchanged
            }
            Some(existing) => {
                let fields = changed_fields(&existing.payload, &record.payload);
                let snapshot_id =
                    insert_snapshot(&tx, record, run_id, &now)?.or(existing.raw_snapshot_id);
                tx.execute(
                    "UPDATE records SET source_url = ?1, payload = ?2, content_hash = ?3,
                     last_seen = ?4, last_run_id = ?5, raw_snapshot_id = ?6 WHERE key = ?7",
                    params![
                        record.source_url,
                        payload,
                        record.content_hash,
                        now,
                        run_id,
                        snapshot_id,
                        record.key
                    ],
                )?;
                insert_change(&tx, &record.key, ChangeType::Updated, &fields, run_id, &now)?;
                UpsertOutcome::Updated(fields)
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn get_record(&self, key: &str) -> StorageResult<Option<StoredRecord>> {
        find_record(&self.conn, key)
    }

    fn get_snapshot(&self, id: i64) -> StorageResult<Option<Snapshot>> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT id, record_key, source_url, html, run_id, captured_at
                 FROM snapshots WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Snapshot {
                        id: row.get(0)?,
                        record_key: row.get(1)?,
                        source_url: row.get(2)?,
                        html: row.get(3)?,
                        run_id: row.get(4)?,
                        captured_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    fn count_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Change Log =====

    fn mark_changes_old(&mut self) -> StorageResult<usize> {
        let updated = self
            .conn
            .execute("UPDATE change_log SET recent = 0 WHERE recent = 1", [])?;
        Ok(updated)
    }

    fn recent_changes(&self) -> StorageResult<Vec<ChangeEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, record_key, change_type, changed_fields, run_id, changed_at, recent
             FROM change_log WHERE recent = 1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, bool>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, record_key, change_type, fields, run_id, changed_at, recent)| {
                Ok(ChangeEntry {
                    id,
                    record_key,
                    change_type: ChangeType::from_db_string(&change_type)
                        .unwrap_or(ChangeType::Updated),
                    changed_fields: serde_json::from_str(&fields)?,
                    run_id,
                    changed_at,
                    recent,
                })
            })
            .collect()
    }
}

/// [`HistoryLog`] backed by the shared SQLite store
#[derive(Clone)]
pub struct SqliteHistory {
    storage: SharedStorage,
}

impl SqliteHistory {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }
}

impl HistoryLog for SqliteHistory {
    fn append(&self, summary: &RunSummary) -> StorageResult<()> {
        lock_storage(&self.storage).append_run(summary)
    }

    fn load_recent(&self, limit: usize) -> StorageResult<Vec<RunSummary>> {
        lock_storage(&self.storage).recent_runs(limit)
    }

    fn max_run_id(&self) -> StorageResult<Option<i64>> {
        lock_storage(&self.storage).max_run_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn summary(run_id: i64, termination: TerminationReason) -> RunSummary {
        let now = Utc::now();
        RunSummary {
            run_id,
            started_at: now,
            finished_at: now,
            pages_fetched: 10,
            pages_failed: 2,
            records_emitted: 7,
            sink_errors: 1,
            termination,
            error: None,
        }
    }

    fn book(title: &str, price: &str) -> Record {
        Record::new(
            "a-light-in-the-attic_1000",
            "https://books.example.com/catalogue/a-light-in-the-attic_1000/index.html",
            json!({"title": title, "price": price}),
        )
    }

    #[test]
    fn test_open_file_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");

        let mut storage = SqliteStorage::new(&path).unwrap();
        storage.append_run(&summary(1, TerminationReason::Completed)).unwrap();
        drop(storage);

        let reopened = SqliteStorage::new(&path).unwrap();
        assert_eq!(reopened.max_run_id().unwrap(), Some(1));
    }

    #[test]
    fn test_run_history_append_only() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert_eq!(storage.max_run_id().unwrap(), None);

        storage.append_run(&summary(1, TerminationReason::Completed)).unwrap();
        storage.append_run(&summary(2, TerminationReason::TimedOut)).unwrap();
        storage.append_run(&summary(3, TerminationReason::Aborted)).unwrap();

        assert!(matches!(
            storage.append_run(&summary(2, TerminationReason::Completed)),
            Err(StorageError::DuplicateRun(2))
        ));

        let runs = storage.recent_runs(2).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, 2);
        assert_eq!(runs[0].termination, TerminationReason::TimedOut);
        assert_eq!(runs[1].run_id, 3);
        assert_eq!(runs[1].sink_errors, 1);
        assert_eq!(storage.max_run_id().unwrap(), Some(3));
    }

    #[test]
    fn test_upsert_detects_changes() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();

        assert_eq!(
            storage.upsert_record(&book("A Light", "51.77"), 1).unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            storage.upsert_record(&book("A Light", "51.77"), 2).unwrap(),
            UpsertOutcome::Unchanged
        );
        let UpsertOutcome::Updated(fields) = storage.upsert_record(&book("A Light", "45.00"), 3).unwrap()
        else {
            panic!("expected an update");
        };
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["price"].old, json!("51.77"));
        assert_eq!(fields["price"].new, json!("45.00"));

        assert_eq!(storage.count_records().unwrap(), 1);
        let stored = storage.get_record("a-light-in-the-attic_1000").unwrap().unwrap();
        assert_eq!(stored.payload["price"], "45.00");
        assert_eq!(stored.last_run_id, 3);
    }

    #[test]
    fn test_change_log_recent_flag() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.upsert_record(&book("A Light", "51.77"), 1).unwrap();

        let changes = storage.recent_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::New);
        assert!(changes[0].recent);

        assert_eq!(storage.mark_changes_old().unwrap(), 1);
        assert!(storage.recent_changes().unwrap().is_empty());

        storage.upsert_record(&book("A Light", "51.77"), 2).unwrap();
        assert!(storage.recent_changes().unwrap().is_empty());

        storage.upsert_record(&book("A Lighter", "51.77"), 3).unwrap();
        let changes = storage.recent_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Updated);
        assert_eq!(
            changes[0].changed_fields.keys().collect::<Vec<_>>(),
            vec!["title"]
        );
        assert_eq!(changes[0].changed_fields["title"].old, json!("A Light"));
        assert_eq!(changes[0].changed_fields["title"].new, json!("A Lighter"));
        assert_eq!(changes[0].run_id, 3);
    }

    #[test]
    fn test_snapshots_follow_changes() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let key = "a-light-in-the-attic_1000";

        storage
            .upsert_record(&book("A Light", "51.77").with_snapshot("<p>v1</p>"), 1)
            .unwrap();
        let first = storage.get_record(key).unwrap().unwrap().raw_snapshot_id.unwrap();
        let snapshot = storage.get_snapshot(first).unwrap().unwrap();
        assert_eq!(snapshot.html, "<p>v1</p>");
        assert_eq!(snapshot.record_key, key);
        assert_eq!(snapshot.run_id, 1);

        // unchanged content keeps the earlier snapshot
        storage
            .upsert_record(&book("A Light", "51.77").with_snapshot("<p>v1 again</p>"), 2)
            .unwrap();
        assert_eq!(storage.get_record(key).unwrap().unwrap().raw_snapshot_id, Some(first));

        storage
            .upsert_record(&book("A Light", "45.00").with_snapshot("<p>v2</p>"), 3)
            .unwrap();
        let second = storage.get_record(key).unwrap().unwrap().raw_snapshot_id.unwrap();
        assert_ne!(second, first);
        assert_eq!(storage.get_snapshot(second).unwrap().unwrap().html, "<p>v2</p>");
        assert!(storage.get_snapshot(999).unwrap().is_none());
    }

    #[test]
    fn test_failed_change_log_write_leaves_record_untouched() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let key = "a-light-in-the-attic_1000";
        storage.upsert_record(&book("A Light", "51.77"), 1).unwrap();

        storage
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_changes BEFORE INSERT ON change_log
                 BEGIN SELECT RAISE(ABORT, 'change log unavailable'); END;",
            )
            .unwrap();

        assert!(storage
            .upsert_record(&book("A Light", "45.00").with_snapshot("<p>v2</p>"), 2)
            .is_err());
        let stored = storage.get_record(key).unwrap().unwrap();
        assert_eq!(stored.payload["price"], "51.77");
        assert_eq!(stored.last_run_id, 1);

        let other = Record::new("tipping-the-velvet_999", "https://x/t", json!({"price": "53.74"}));
        assert!(storage.upsert_record(&other, 2).is_err());
        assert!(storage.get_record("tipping-the-velvet_999").unwrap().is_none());
        assert_eq!(storage.count_records().unwrap(), 1);

        let snapshots: i64 = storage
            .conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))
            .unwrap();
        assert_eq!(snapshots, 0);
    }

    #[test]
    fn test_history_log_over_shared_storage() {
        let shared = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let history = SqliteHistory::new(shared);

        history.append(&summary(7, TerminationReason::Completed)).unwrap();
        assert_eq!(history.max_run_id().unwrap(), Some(7));
        assert_eq!(history.load_recent(10).unwrap().len(), 1);
    }
}
