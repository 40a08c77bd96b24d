pub mod csv_ledger_store;
pub mod directory_capture_sink;
pub mod memory_ledger_store;
