use std::sync::{Arc, Mutex};

use crate::capture::domain::visit_ledger::{LedgerStore, PersistenceError, VisitRecord};

/// Volatile ledger store. Clones share the same records, which lets a caller
/// keep a handle for inspection after handing the store to a ledger.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    records: Arc<Mutex<Vec<VisitRecord>>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<VisitRecord>>, PersistenceError> {
        self.records
            .lock()
            .map_err(|e| std::io::Error::other(format!("Lock poisoned: {e}")).into())
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> Result<Vec<VisitRecord>, PersistenceError> {
        Ok(self.lock()?.clone())
    }

    fn append(&mut self, record: &VisitRecord) -> Result<(), PersistenceError> {
        self.lock()?.push(*record);
        Ok(())
    }

    fn truncate(&mut self) -> Result<(), PersistenceError> {
        self.lock()?.clear();
        Ok(())
    }
}
