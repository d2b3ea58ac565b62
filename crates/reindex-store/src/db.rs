//! RocksDB wrapper for the reindex queue.
//!
//! Provides:
//! - Fresh store initialization seeded from a type registry (all-or-nothing)
//! - Reopening an existing store without modification
//! - Mutex-guarded transactions (see [`crate::transaction`])
//! - Autocommit reads used for polling and error accounting

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, DB};
use tracing::{debug, info, warn};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_ITEMS, CF_ITEM_PROGRESS, CF_META, CF_RESULTS, CF_TYPES,
};
use crate::error::StoreError;
use crate::keys::{ItemKey, ProgressKey, ResultKey, TypeKey, META_KEY};
use crate::records::{ItemTask, Outcome, Progress, ResultRecord, StoreMeta, TypeTask};
use crate::transaction::Transaction;

/// Durable queue backing one reindex run.
///
/// A single `Store` is shared (behind an `Arc`) by the listing driver, the
/// item dispatcher and every in-flight item. Multi-statement changes go
/// through [`Store::begin`]; single reads need no lock.
pub struct Store {
    pub(crate) db: DB,
    path: PathBuf,
    tx_lock: Mutex<()>,
    item_sequence: AtomicU64,
    result_sequence: AtomicU64,
}

impl Store {
    /// Create a new store at `path` seeded with one ENQUEUED type per entry of
    /// `types`, in order.
    ///
    /// Seeding happens in a single transaction. If it fails the partially
    /// created store is removed from disk and the error is returned.
    pub fn initialize<S: AsRef<str>>(path: &Path, types: &[S]) -> Result<Self, StoreError> {
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.display().to_string()));
        }

        info!(path = ?path, types = types.len(), "Initializing reindex store");
        let store = Self::open_db(path, true)?;

        match store.seed(types) {
            Ok(()) => Ok(store),
            Err(e) => {
                drop(store);
                if std::fs::remove_dir_all(path).is_err() && path.exists() {
                    warn!(path = ?path, "Could not delete partially initialized store");
                }
                Err(e)
            }
        }
    }

    /// Attach to an existing store. Nothing is written.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(format!("store {}", path.display())));
        }

        info!(path = ?path, "Opening reindex store");
        let store = Self::open_db(path, false)?;

        if store.db.get_cf(store.cf(CF_META)?, META_KEY)?.is_none() {
            return Err(StoreError::NotFound(format!(
                "{} is not an initialized reindex store",
                path.display()
            )));
        }

        Ok(store)
    }

    fn open_db(path: &Path, create: bool) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(create);
        db_opts.create_missing_column_families(create);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;

        // Resume sequences after the highest existing keys
        let item_sequence = Self::load_next_sequence(&db, CF_ITEMS, |k| {
            ItemKey::from_bytes(k).map(|key| key.sequence)
        })?;
        let result_sequence = Self::load_next_sequence(&db, CF_RESULTS, |k| {
            ResultKey::from_bytes(k).map(|key| key.sequence)
        })?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
            tx_lock: Mutex::new(()),
            item_sequence: AtomicU64::new(item_sequence),
            result_sequence: AtomicU64::new(result_sequence),
        })
    }

    fn load_next_sequence(
        db: &DB,
        cf_name: &str,
        parse: impl Fn(&[u8]) -> Result<u64, StoreError>,
    ) -> Result<u64, StoreError> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        // Iterate in reverse to find highest key
        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            return Ok(parse(&key)? + 1);
        }
        Ok(0)
    }

    fn seed<S: AsRef<str>>(&self, types: &[S]) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        let mut tx = self.begin();

        for (sequence, name) in types.iter().enumerate() {
            let name = name.as_ref();
            if name.is_empty() {
                return Err(StoreError::InvalidInput("empty type name".to_string()));
            }
            if !seen.insert(name) {
                return Err(StoreError::InvalidInput(format!(
                    "duplicate type name: {}",
                    name
                )));
            }
            tx.insert_type(TypeTask::new(sequence as u64, name))?;
        }

        tx.put_meta(&StoreMeta::new(types.len() as u64))?;
        tx.commit()
    }

    pub(crate) fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(name.to_string()))
    }

    pub(crate) fn next_item_id(&self) -> u64 {
        self.item_sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn next_result_sequence(&self) -> u64 {
        self.result_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Location of the store on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin a transaction, blocking until no other transaction is open.
    pub fn begin(&self) -> Transaction<'_> {
        // A panic inside another transaction never leaves a partial batch
        // behind, so a poisoned lock is still safe to take.
        let guard = self.tx_lock.lock().unwrap_or_else(|e| e.into_inner());
        Transaction::new(self, guard)
    }

    /// Creation metadata written by [`Store::initialize`].
    pub fn meta(&self) -> Result<StoreMeta, StoreError> {
        let bytes = self
            .db
            .get_cf(self.cf(CF_META)?, META_KEY)?
            .ok_or_else(|| StoreError::NotFound("store metadata".to_string()))?;
        StoreMeta::from_bytes(&bytes)
    }

    // ==================== Type Queue ====================

    /// Get a type row by its sequence.
    pub fn get_type(&self, sequence: u64) -> Result<Option<TypeTask>, StoreError> {
        match self
            .db
            .get_cf(self.cf(CF_TYPES)?, TypeKey::new(sequence).to_bytes())?
        {
            Some(bytes) => Ok(Some(TypeTask::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All type rows in seeding order.
    pub fn type_tasks(&self) -> Result<Vec<TypeTask>, StoreError> {
        let iter = self.db.iterator_cf(self.cf(CF_TYPES)?, IteratorMode::Start);
        let mut tasks = Vec::new();
        for item in iter {
            let (_, value) = item?;
            tasks.push(TypeTask::from_bytes(&value)?);
        }
        Ok(tasks)
    }

    /// First ENQUEUED type in seeding order, if any.
    pub fn next_enqueued_type(&self) -> Result<Option<TypeTask>, StoreError> {
        Ok(self
            .type_tasks()?
            .into_iter()
            .find(|t| t.progress == Progress::Enqueued))
    }

    /// True while any type still waits to be listed.
    pub fn has_enqueued_types(&self) -> Result<bool, StoreError> {
        Ok(self.next_enqueued_type()?.is_some())
    }

    // ==================== Item Queue ====================

    /// Get an item row by id.
    pub fn get_item(&self, id: u64) -> Result<Option<ItemTask>, StoreError> {
        match self
            .db
            .get_cf(self.cf(CF_ITEMS)?, ItemKey::new(id).to_bytes())?
        {
            Some(bytes) => Ok(Some(ItemTask::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Up to `limit` ENQUEUED items in insertion order.
    ///
    /// This is an autocommit read: an item may change between the index scan
    /// and the row load, in which case it is skipped.
    pub fn poll_enqueued_items(&self, limit: usize) -> Result<Vec<ItemTask>, StoreError> {
        let mut items = Vec::with_capacity(limit);
        for item_id in self.item_ids_with_progress(Progress::Enqueued, Some(limit))? {
            match self.get_item(item_id)? {
                Some(item) if item.progress == Progress::Enqueued => items.push(item),
                _ => debug!(item_id, "Item changed while polling, skipping"),
            }
        }
        Ok(items)
    }

    fn item_ids_with_progress(
        &self,
        progress: Progress,
        limit: Option<usize>,
    ) -> Result<Vec<u64>, StoreError> {
        let prefix = ProgressKey::prefix(progress);
        let iter = self.db.iterator_cf(
            self.cf(CF_ITEM_PROGRESS)?,
            IteratorMode::From(&prefix, Direction::Forward),
        );

        let limit = limit.unwrap_or(usize::MAX);
        let mut ids = Vec::new();
        for item in iter {
            if ids.len() >= limit {
                break;
            }
            let (key, _) = item?;
            // Stop if we've passed the prefix
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(ProgressKey::from_bytes(&key)?.item_id);
        }
        Ok(ids)
    }

    fn count_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<u64, StoreError> {
        let iter = self
            .db
            .iterator_cf(self.cf(cf_name)?, IteratorMode::From(prefix, Direction::Forward));
        let mut count = 0u64;
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    // ==================== Error Accounting ====================

    /// Number of FAILED rows across the type and item queues.
    pub fn error_count(&self) -> Result<u64, StoreError> {
        let failed_types = self
            .type_tasks()?
            .iter()
            .filter(|t| t.progress == Progress::Failed)
            .count() as u64;
        let failed_items =
            self.count_prefix(CF_ITEM_PROGRESS, &ProgressKey::prefix(Progress::Failed))?;
        Ok(failed_types + failed_items)
    }

    /// Reset every FAILED type and item back to ENQUEUED.
    ///
    /// Each queue is reset in its own transaction. Rows in any other state are
    /// left untouched.
    pub fn clear_errors(&self) -> Result<ClearedErrors, StoreError> {
        let mut cleared = ClearedErrors::default();

        let mut tx = self.begin();
        for task in self.type_tasks()? {
            if task.progress == Progress::Failed {
                tx.set_type_progress(task.sequence, Progress::Enqueued)?;
                cleared.types += 1;
            }
        }
        tx.commit()?;

        let mut tx = self.begin();
        for item_id in self.item_ids_with_progress(Progress::Failed, None)? {
            tx.set_item_progress(item_id, Progress::Enqueued)?;
            cleared.items += 1;
        }
        tx.commit()?;

        info!(
            types = cleared.types,
            items = cleared.items,
            "Cleared failed queue entries"
        );
        Ok(cleared)
    }

    // ==================== Result Log ====================

    /// Result records in append order, optionally filtered by outcome.
    pub fn results(
        &self,
        outcome: Option<Outcome>,
        limit: Option<usize>,
    ) -> Result<Vec<ResultRecord>, StoreError> {
        let iter = self.db.iterator_cf(self.cf(CF_RESULTS)?, IteratorMode::Start);
        let limit = limit.unwrap_or(usize::MAX);

        let mut records = Vec::new();
        for item in iter {
            if records.len() >= limit {
                break;
            }
            let (_, value) = item?;
            let record = ResultRecord::from_bytes(&value)?;
            if outcome.is_none_or(|o| o == record.outcome) {
                records.push(record);
            }
        }
        Ok(records)
    }

    // ==================== Admin Operations ====================

    /// Get queue statistics.
    pub fn stats(&self) -> Result<QueueStats, StoreError> {
        let mut stats = QueueStats::default();

        for task in self.type_tasks()? {
            match task.progress {
                Progress::Enqueued => stats.types_enqueued += 1,
                Progress::Running => stats.types_running += 1,
                Progress::Failed => stats.types_failed += 1,
                Progress::Done => stats.types_done += 1,
            }
        }

        stats.items_enqueued =
            self.count_prefix(CF_ITEM_PROGRESS, &ProgressKey::prefix(Progress::Enqueued))?;
        stats.items_running =
            self.count_prefix(CF_ITEM_PROGRESS, &ProgressKey::prefix(Progress::Running))?;
        stats.items_failed =
            self.count_prefix(CF_ITEM_PROGRESS, &ProgressKey::prefix(Progress::Failed))?;

        for item in self.db.iterator_cf(self.cf(CF_RESULTS)?, IteratorMode::Start) {
            let (_, value) = item?;
            match ResultRecord::from_bytes(&value)?.outcome {
                Outcome::Success => stats.results_succeeded += 1,
                Outcome::Failure => stats.results_failed += 1,
            }
        }

        Ok(stats)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }
}

/// Rows reset by [`Store::clear_errors`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClearedErrors {
    pub types: u64,
    pub items: u64,
}

impl ClearedErrors {
    pub fn total(&self) -> u64 {
        self.types + self.items
    }
}

/// Statistics about the queue.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub types_enqueued: u64,
    pub types_running: u64,
    pub types_done: u64,
    pub types_failed: u64,
    pub items_enqueued: u64,
    /// Dispatched but never settled; these are not polled again
    pub items_running: u64,
    pub items_failed: u64,
    pub results_succeeded: u64,
    pub results_failed: u64,
}

impl QueueStats {
    /// Same quantity as [`Store::error_count`].
    pub fn errors(&self) -> u64 {
        self.types_failed + self.items_failed
    }
}
