//! JSON and CSV change reports for records that changed in the latest run

use crate::storage::{ChangeEntry, Storage};
use crate::CrawlError;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const NO_CHANGES_MESSAGE: &str = "No new changes found in this crawl.";

/// Where a report was written and what it held
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Written {
        path: PathBuf,
        csv_path: PathBuf,
        changes: usize,
    },
    NoChanges {
        path: PathBuf,
        csv_path: PathBuf,
    },
}

impl ReportOutcome {
    /// The JSON report
    pub fn path(&self) -> &Path {
        match self {
            Self::Written { path, .. } | Self::NoChanges { path, .. } => path,
        }
    }

    pub fn csv_path(&self) -> &Path {
        match self {
            Self::Written { csv_path, .. } | Self::NoChanges { csv_path, .. } => csv_path,
        }
    }
}

#[derive(Serialize)]
struct NoChanges {
    message: &'static str,
}

/// One CSV line; field changes stay JSON-encoded in a single column
#[derive(Serialize)]
struct CsvRow<'a> {
    id: i64,
    record_key: &'a str,
    change_type: &'static str,
    run_id: i64,
    changed_at: &'a str,
    changed_fields: String,
}

impl<'a> CsvRow<'a> {
    fn from_entry(entry: &'a ChangeEntry) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: entry.id,
            record_key: &entry.record_key,
            change_type: entry.change_type.to_db_string(),
            run_id: entry.run_id,
            changed_at: &entry.changed_at,
            changed_fields: serde_json::to_string(&entry.changed_fields)?,
        })
    }
}

/// Writes `changes_<YYYY-MM-DD>.json` and `.csv` (UTC date) into `dir`
pub fn write_change_report(storage: &dyn Storage, dir: &Path) -> Result<ReportOutcome, CrawlError> {
    write_change_report_for(storage, dir, Utc::now().date_naive())
}

/// Writes the change reports for `date`
///
/// The JSON file holds an array of the change-log entries flagged recent,
/// each with its `{field: {old, new}}` changes, or a single message object
/// when there are none. The CSV file has one row per entry, or a single
/// `message` row. Existing reports for the same date are overwritten.
pub fn write_change_report_for(
    storage: &dyn Storage,
    dir: &Path,
    date: NaiveDate,
) -> Result<ReportOutcome, CrawlError> {
    fs::create_dir_all(dir)?;
    let base = format!("changes_{}", date.format("%Y-%m-%d"));
    let path = dir.join(format!("{}.json", base));
    let csv_path = dir.join(format!("{}.csv", base));

    let changes: Vec<ChangeEntry> = storage.recent_changes()?;
    if changes.is_empty() {
        let no_changes = NoChanges {
            message: NO_CHANGES_MESSAGE,
        };
        fs::write(&path, serde_json::to_string_pretty(&[&no_changes])?)?;

        let mut writer = csv::Writer::from_path(&csv_path)?;
        writer.serialize(&no_changes)?;
        writer.flush()?;

        tracing::info!("No new changes; wrote empty reports to {}", dir.display());
        return Ok(ReportOutcome::NoChanges { path, csv_path });
    }

    fs::write(&path, serde_json::to_string_pretty(&changes)?)?;

    let mut writer = csv::Writer::from_path(&csv_path)?;
    for entry in &changes {
        writer.serialize(CsvRow::from_entry(entry)?)?;
    }
    writer.flush()?;

    tracing::info!(
        "Wrote change report with {} change(s) to {} and {}",
        changes.len(),
        path.display(),
        csv_path.display()
    );

    Ok(ReportOutcome::Written {
        path,
        csv_path,
        changes: changes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::storage::SqliteStorage;
    use serde_json::json;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn test_report_without_changes() {
        let dir = TempDir::new().unwrap();
        let storage = SqliteStorage::new_in_memory().unwrap();

        let outcome = write_change_report_for(&storage, dir.path(), date()).unwrap();

        assert!(matches!(outcome, ReportOutcome::NoChanges { .. }));
        assert!(outcome.path().ends_with("changes_2024-05-01.json"));
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(outcome.path()).unwrap()).unwrap();
        assert_eq!(written, json!([{"message": NO_CHANGES_MESSAGE}]));

        assert!(outcome.csv_path().ends_with("changes_2024-05-01.csv"));
        let csv = fs::read_to_string(outcome.csv_path()).unwrap();
        assert_eq!(csv, format!("message\n{}\n", NO_CHANGES_MESSAGE));
    }

    #[test]
    fn test_report_lists_recent_changes() {
        let dir = TempDir::new().unwrap();
        let mut storage = SqliteStorage::new_in_memory().unwrap();

        storage
            .upsert_record(&Record::new("a", "https://x/a", json!({"price": "1"})), 1)
            .unwrap();
        storage.mark_changes_old().unwrap();
        storage
            .upsert_record(&Record::new("a", "https://x/a", json!({"price": "2"})), 2)
            .unwrap();
        storage
            .upsert_record(&Record::new("b", "https://x/b", json!({"price": "3"})), 2)
            .unwrap();

        let outcome = write_change_report_for(&storage, &dir.path().join("reports"), date()).unwrap();

        let ReportOutcome::Written {
            path,
            csv_path,
            changes,
        } = outcome
        else {
            panic!("expected a written report");
        };
        assert_eq!(changes, 2);

        let written: Vec<serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|c| c["run_id"] == 2));
        let updated = written
            .iter()
            .find(|c| c["record_key"] == "a")
            .unwrap();
        assert_eq!(updated["change_type"], "updated");
        assert_eq!(
            updated["changed_fields"],
            json!({"price": {"old": "1", "new": "2"}})
        );
        let new = written.iter().find(|c| c["record_key"] == "b").unwrap();
        assert_eq!(new["change_type"], "new");
        assert_eq!(new["changed_fields"], json!({}));

        let mut reader = csv::Reader::from_path(csv_path).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            vec!["id", "record_key", "change_type", "run_id", "changed_at", "changed_fields"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "a");
        assert_eq!(&rows[0][2], "updated");
        let fields: serde_json::Value = serde_json::from_str(&rows[0][5]).unwrap();
        assert_eq!(fields["price"]["new"], "2");
    }
}
