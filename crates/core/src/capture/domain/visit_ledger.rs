use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::identity::domain::identity::StableId;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("ledger I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger encoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("corrupt ledger row {line}: {reason}")]
    Corrupt { line: u64, reason: String },
}

/// One recorded visit. Immutable once written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisitRecord {
    pub stable_id: StableId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisitSummary {
    pub visit_count: usize,
    pub last_seen: DateTime<Utc>,
}

/// Durable backing for the ledger: an append-only log of visit records.
pub trait LedgerStore: Send {
    /// Reads every record in insertion order.
    fn load(&self) -> Result<Vec<VisitRecord>, PersistenceError>;

    fn append(&mut self, record: &VisitRecord) -> Result<(), PersistenceError>;

    /// Drops every record. Must be all-or-nothing.
    fn truncate(&mut self) -> Result<(), PersistenceError>;
}

/// Append-only visit log with derived aggregates.
///
/// The store is the single source of truth; the in-memory copy mirrors it
/// and is only updated after the store accepted a write.
pub struct VisitLedger {
    store: Box<dyn LedgerStore>,
    records: Vec<VisitRecord>,
}

impl VisitLedger {
    /// Opens a ledger over `store`, loading what it already holds.
    pub fn open(store: Box<dyn LedgerStore>) -> Result<Self, PersistenceError> {
        let records = store.load()?;
        Ok(Self { store, records })
    }

    pub fn record(
        &mut self,
        stable_id: StableId,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let record = VisitRecord {
            stable_id,
            timestamp,
        };
        self.store.append(&record)?;
        self.records.push(record);
        Ok(())
    }

    /// Timestamps recorded for `stable_id`, in recorded order.
    pub fn query(&self, stable_id: StableId) -> Vec<DateTime<Utc>> {
        self.records
            .iter()
            .filter(|r| r.stable_id == stable_id)
            .map(|r| r.timestamp)
            .collect()
    }

    /// Visit count and latest timestamp per identity, by linear scan.
    pub fn aggregate(&self) -> BTreeMap<StableId, VisitSummary> {
        aggregate(&self.records)
    }

    pub fn records(&self) -> &[VisitRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn max_stable_id(&self) -> Option<StableId> {
        self.records.iter().map(|r| r.stable_id).max()
    }

    /// Re-derives the in-memory copy from the store.
    pub fn reload(&mut self) -> Result<(), PersistenceError> {
        self.records = self.store.load()?;
        Ok(())
    }

    /// Truncates the store, then the in-memory copy. On failure nothing
    /// changes.
    pub fn reset(&mut self) -> Result<(), PersistenceError> {
        self.store.truncate()?;
        self.records.clear();
        Ok(())
    }
}

/// Aggregates an ordered record sequence.
pub fn aggregate(records: &[VisitRecord]) -> BTreeMap<StableId, VisitSummary> {
    let mut summary: BTreeMap<StableId, VisitSummary> = BTreeMap::new();
    for r in records {
        summary
            .entry(r.stable_id)
            .and_modify(|s| {
                s.visit_count += 1;
                s.last_seen = s.last_seen.max(r.timestamp);
            })
            .or_insert(VisitSummary {
                visit_count: 1,
                last_seen: r.timestamp,
            });
    }
    summary
}
