//! CSV-backed ledger store: `Label,Timestamp` rows, appended and fsynced one
//! at a time.
//!
//! Timestamps are written as RFC 3339 UTC with millisecond precision, which
//! sorts lexically. Rows in the older `YYYY-mm-dd HH:MM:SS` form are read as
//! UTC.
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::capture::domain::visit_ledger::{LedgerStore, PersistenceError, VisitRecord};
use crate::shared::constants::LEDGER_HEADER;

const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct CsvLedgerStore {
    path: PathBuf,
}

impl CsvLedgerStore {
    /// Opens the ledger at `path`, creating it (header only) if missing.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            path: path.to_path_buf(),
        };
        let is_empty = match std::fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        if is_empty {
            store.write_header_only()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the file with a header-only copy via rename, so a failure
    /// leaves the previous contents in place.
    fn write_header_only(&self) -> Result<(), PersistenceError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        {
            let mut wtr = csv::Writer::from_writer(tmp.as_file_mut());
            wtr.write_record(LEDGER_HEADER)?;
            wtr.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl LedgerStore for CsvLedgerStore {
    fn load(&self) -> Result<Vec<VisitRecord>, PersistenceError> {
        let mut rdr = csv::Reader::from_path(&self.path)?;
        let headers = rdr.headers()?.clone();
        if headers.iter().ne(LEDGER_HEADER.iter().copied()) {
            return Err(PersistenceError::Corrupt {
                line: 1,
                reason: format!("unexpected header {headers:?}"),
            });
        }

        let mut records = Vec::new();
        for row in rdr.records() {
            let row = row?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            let corrupt = |reason: String| PersistenceError::Corrupt { line, reason };

            let label = row.get(0).ok_or_else(|| corrupt("missing label".into()))?;
            let stable_id = label
                .trim()
                .parse()
                .map_err(|_| corrupt(format!("invalid label '{label}'")))?;
            let raw_ts = row
                .get(1)
                .ok_or_else(|| corrupt("missing timestamp".into()))?;
            let timestamp =
                parse_timestamp(raw_ts).ok_or_else(|| corrupt(format!("invalid timestamp '{raw_ts}'")))?;

            records.push(VisitRecord {
                stable_id,
                timestamp,
            });
        }
        Ok(records)
    }

    fn append(&mut self, record: &VisitRecord) -> Result<(), PersistenceError> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        wtr.write_record([
            record.stable_id.to_string(),
            format_timestamp(&record.timestamp),
        ])?;
        let mut file: File = wtr.into_inner().map_err(|e| e.into_error())?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self) -> Result<(), PersistenceError> {
        self.write_header_only()
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT)
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(stable_id: u32, secs: i64) -> VisitRecord {
        VisitRecord {
            stable_id,
            timestamp: at(secs),
        }
    }

    #[test]
    fn test_open_creates_header_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("visit_log.csv");
        let store = CsvLedgerStore::open(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Label,Timestamp\n");
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_append_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visit_log.csv");
        let mut store = CsvLedgerStore::open(&path).unwrap();
        store.append(&record(2, 5)).unwrap();
        store.append(&record(0, 1)).unwrap();

        let reopened = CsvLedgerStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), vec![record(2, 5), record(0, 1)]);
    }

    #[test]
    fn test_rows_use_sortable_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visit_log.csv");
        let mut store = CsvLedgerStore::open(&path).unwrap();
        store.append(&record(7, 0)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Label,Timestamp\n7,2023-11-14T22:13:20.000Z\n");
    }

    #[test]
    fn test_truncate_leaves_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visit_log.csv");
        let mut store = CsvLedgerStore::open(&path).unwrap();
        store.append(&record(1, 0)).unwrap();
        store.truncate().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Label,Timestamp\n");
        store.append(&record(1, 2)).unwrap();
        assert_eq!(store.load().unwrap(), vec![record(1, 2)]);
    }

    #[test]
    fn test_legacy_timestamps_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visit_log.csv");
        std::fs::write(&path, "Label,Timestamp\n3,2025-01-02 03:04:05\n").unwrap();
        let store = CsvLedgerStore::open(&path).unwrap();
        let records = store.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stable_id, 3);
        assert_eq!(
            records[0].timestamp,
            Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
        );
    }

    #[test]
    fn test_corrupt_row_is_reported_with_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visit_log.csv");
        std::fs::write(
            &path,
            "Label,Timestamp\n1,2025-01-02T03:04:05Z\nabc,2025-01-02T03:04:05Z\n",
        )
        .unwrap();
        let store = CsvLedgerStore::open(&path).unwrap();
        match store.load() {
            Err(PersistenceError::Corrupt { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected corrupt row, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visit_log.csv");
        std::fs::write(&path, "id,when\n").unwrap();
        let store = CsvLedgerStore::open(&path).unwrap();
        assert!(matches!(
            store.load(),
            Err(PersistenceError::Corrupt { line: 1, .. })
        ));
    }

    #[test]
    fn test_append_to_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visit_log.csv");
        let mut store = CsvLedgerStore::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            store.append(&record(1, 0)),
            Err(PersistenceError::Io(_))
        ));
    }
}
