//! Storage layer
//!
//! SQLite-backed persistence with write-ahead logging, FTS5 full-text
//! indexing, the idempotency ledger, and the metrics ledger.

pub mod migrations;
mod sqlite;

pub use sqlite::{ContentUpdate, NewMemory, Result, Storage, StorageError};
