//! Storage module for persisting crawl results
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - The append-only run history
//! - Record upserts with content-hash change detection
//! - The change log consumed by reports

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{SqliteHistory, SqliteStorage};
pub use traits::{HistoryLog, Storage, StorageError, StorageResult};

use crate::CrawlError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Storage shared between the sink, the history log and the CLI
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(CrawlError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, CrawlError> {
    SqliteStorage::new(path)
}

/// Locks shared storage, recovering from a poisoned lock
pub fn lock_storage(storage: &SharedStorage) -> MutexGuard<'_, SqliteStorage> {
    storage.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A record as persisted in the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub source_url: String,
    pub payload: serde_json::Value,
    pub content_hash: String,
    pub first_seen: String,
    pub last_seen: String,
    pub last_run_id: i64,
    /// Page snapshot taken when the record was last inserted or changed
    pub raw_snapshot_id: Option<i64>,
}

/// Raw HTML of the page a record was extracted from
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: i64,
    pub record_key: String,
    pub source_url: String,
    pub html: String,
    pub run_id: i64,
    pub captured_at: String,
}

/// Before and after values of one payload field; absent values are null
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// Changed top-level payload fields by name
pub type FieldChanges = BTreeMap<String, FieldChange>;

/// What an upsert did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated(FieldChanges),
    Unchanged,
}

/// Kind of change recorded in the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    New,
    Updated,
}

impl ChangeType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Updated => "updated",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "updated" => Some(Self::Updated),
            _ => None,
        }
    }
}

/// One change-log row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEntry {
    pub id: i64,
    pub record_key: String,
    pub change_type: ChangeType,
    /// Empty for new records
    pub changed_fields: FieldChanges,
    pub run_id: i64,
    pub changed_at: String,
    pub recent: bool,
}

/// Top-level payload fields whose values differ, with both values
///
/// Non-object payloads are compared as a whole and reported as `"payload"`.
pub fn changed_fields(old: &Value, new: &Value) -> FieldChanges {
    match (old.as_object(), new.as_object()) {
        (Some(old), Some(new)) => old
            .keys()
            .chain(new.keys())
            .filter(|k| old.get(*k) != new.get(*k))
            .map(|k| {
                let change = FieldChange {
                    old: old.get(k).cloned().unwrap_or(Value::Null),
                    new: new.get(k).cloned().unwrap_or(Value::Null),
                };
                (k.clone(), change)
            })
            .collect(),
        _ if old != new => BTreeMap::from([(
            "payload".to_string(),
            FieldChange {
                old: old.clone(),
                new: new.clone(),
            },
        )]),
        _ => BTreeMap::new(),
    }
}
