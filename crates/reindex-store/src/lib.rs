//! Durable queue store for the reindex coordinator.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for the type queue, item queue and result log
//! - Sequence-ordered keys so queue scans follow insertion order
//! - A progress index over items so polling and failure counts are prefix scans
//! - Transactions as mutex-guarded write batches (commit-or-rollback)
//! - Resumption from an existing store without re-seeding

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod records;
pub mod transaction;

pub use db::{ClearedErrors, QueueStats, Store};
pub use error::StoreError;
pub use keys::{ItemKey, ProgressKey, ResultKey, TypeKey};
pub use records::{ItemTask, Outcome, Progress, ResultRecord, StoreMeta, TypeTask};
pub use transaction::Transaction;
