use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::capture::domain::visit_ledger::VisitLedger;
use crate::capture::infrastructure::csv_ledger_store::CsvLedgerStore;
use crate::capture::infrastructure::directory_capture_sink::DirectoryCaptureSink;
use crate::identity::domain::identity::StableId;

/// One row of the frequent-customer report.
#[derive(Clone, Debug, PartialEq)]
pub struct CustomerEntry {
    pub stable_id: StableId,
    pub visit_count: usize,
    pub last_seen: DateTime<Utc>,
    /// Earliest saved crop of this customer, if any survive.
    pub thumbnail: Option<PathBuf>,
}

/// Read-only views over a ledger file and its capture directory.
pub struct VisitReportUseCase {
    ledger_path: PathBuf,
    artifacts: DirectoryCaptureSink,
}

impl VisitReportUseCase {
    pub fn new(ledger_path: &Path, artifacts: DirectoryCaptureSink) -> Self {
        Self {
            ledger_path: ledger_path.to_path_buf(),
            artifacts,
        }
    }

    /// Per-customer visit totals ordered by stable id. A missing ledger is
    /// an empty report.
    pub fn build(&self) -> Result<Vec<CustomerEntry>, Box<dyn std::error::Error>> {
        if !self.ledger_path.exists() {
            return Ok(Vec::new());
        }
        let ledger = VisitLedger::open(Box::new(CsvLedgerStore::open(&self.ledger_path)?))?;

        Ok(ledger
            .aggregate()
            .into_iter()
            .map(|(stable_id, summary)| CustomerEntry {
                stable_id,
                visit_count: summary.visit_count,
                last_seen: summary.last_seen,
                thumbnail: self.artifacts.first_capture(stable_id),
            })
            .collect())
    }

    /// Copies the ledger to `dest`, returning the number of bytes written.
    pub fn export(&self, dest: &Path) -> Result<u64, Box<dyn std::error::Error>> {
        if !self.ledger_path.is_file() {
            return Err(format!("No visit log at {}", self.ledger_path.display()).into());
        }
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let bytes = std::fs::copy(&self.ledger_path, dest)?;
        log::info!("Exported visit log to {}", dest.display());
        Ok(bytes)
    }
}
