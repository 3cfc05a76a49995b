//! Persistence layer for tally records
//!
//! Defines the [`RecordStore`] trait consumed by the dedup/merge engine,
//! the [`MergeTx`] transaction-scoped unit of work that makes merges
//! all-or-nothing, and a SQLite implementation.

pub mod sqlite_store;
pub mod store;

pub use sqlite_store::SqliteRecordStore;
pub use store::{MergeTx, RecordStore, StoreError, TxError};
