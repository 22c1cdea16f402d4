//! Database schema definitions
//!
//! Run history and the record store share one SQLite file but are otherwise
//! independent: run rows are appended after a run finalizes, records are
//! upserted while it is running.

use rusqlite::Connection;

/// Version stamped into `PRAGMA user_version`
pub const SCHEMA_VERSION: i32 = 2;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Append-only history of finalized runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    pages_fetched INTEGER NOT NULL,
    pages_failed INTEGER NOT NULL,
    records_emitted INTEGER NOT NULL,
    sink_errors INTEGER NOT NULL DEFAULT 0,
    termination TEXT NOT NULL,
    error TEXT
);

-- Raw page HTML captured whenever a record is new or changed
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_key TEXT NOT NULL,
    source_url TEXT NOT NULL,
    html TEXT NOT NULL,
    run_id INTEGER NOT NULL,
    captured_at TEXT NOT NULL
);

-- Latest version of every record, keyed by natural key
CREATE TABLE IF NOT EXISTS records (
    key TEXT PRIMARY KEY,
    source_url TEXT NOT NULL,
    payload TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    last_run_id INTEGER NOT NULL,
    raw_snapshot_id INTEGER REFERENCES snapshots(id)
);

-- New and updated records; `recent` marks changes from the latest run.
-- `changed_fields` is a JSON object of {field: {old, new}}.
CREATE TABLE IF NOT EXISTS change_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_key TEXT NOT NULL REFERENCES records(key),
    change_type TEXT NOT NULL,
    changed_fields TEXT NOT NULL,
    run_id INTEGER NOT NULL,
    changed_at TEXT NOT NULL,
    recent INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_change_log_recent ON change_log(recent);
CREATE INDEX IF NOT EXISTS idx_change_log_record ON change_log(record_key);
CREATE INDEX IF NOT EXISTS idx_snapshots_record ON snapshots(record_key);
"#;

/// Initializes the database schema and upgrades older databases
pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;

    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 2 && !has_column(conn, "records", "raw_snapshot_id")? {
        tracing::info!("Upgrading database schema to version {}", SCHEMA_VERSION);
        conn.execute_batch(
            "ALTER TABLE records ADD COLUMN raw_snapshot_id INTEGER REFERENCES snapshots(id);",
        )?;
    }

    conn.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
