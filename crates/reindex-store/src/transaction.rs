//! Multi-statement transactions over the queue store.
//!
//! A [`Transaction`] holds the store-wide transaction mutex for its whole
//! lifetime and stages every write in a RocksDB `WriteBatch`. `commit` writes
//! the batch atomically; dropping the transaction without committing discards
//! it, which is the rollback.
//!
//! Reads inside a transaction see the transaction's own staged rows first, then
//! the committed state. Because every mutation goes through a transaction, the
//! committed state cannot change underneath an open transaction.
//!
//! The guard is not `Send`, so a transaction can never be held across an
//! `.await` in a spawned task.

use std::collections::HashMap;
use std::sync::MutexGuard;

use rocksdb::WriteBatch;
use tracing::{debug, trace};

use crate::column_families::{CF_ITEMS, CF_ITEM_PROGRESS, CF_META, CF_RESULTS, CF_TYPES};
use crate::db::Store;
use crate::error::StoreError;
use crate::keys::{ItemKey, ProgressKey, ResultKey, TypeKey, META_KEY};
use crate::records::{ItemTask, Progress, ResultRecord, StoreMeta, TypeTask};

/// An open transaction. See the module docs for isolation guarantees.
pub struct Transaction<'a> {
    store: &'a Store,
    _guard: MutexGuard<'a, ()>,
    batch: WriteBatch,
    staged_types: HashMap<u64, TypeTask>,
    /// `None` marks an item removed within this transaction
    staged_items: HashMap<u64, Option<ItemTask>>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(store: &'a Store, guard: MutexGuard<'a, ()>) -> Self {
        Self {
            store,
            _guard: guard,
            batch: WriteBatch::default(),
            staged_types: HashMap::new(),
            staged_items: HashMap::new(),
        }
    }

    /// Number of writes staged so far.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    fn load_type(&self, sequence: u64) -> Result<Option<TypeTask>, StoreError> {
        if let Some(task) = self.staged_types.get(&sequence) {
            return Ok(Some(task.clone()));
        }
        self.store.get_type(sequence)
    }

    /// Read an item as this transaction currently sees it.
    pub fn item(&self, id: u64) -> Result<Option<ItemTask>, StoreError> {
        self.load_item(id)
    }

    fn load_item(&self, id: u64) -> Result<Option<ItemTask>, StoreError> {
        if let Some(staged) = self.staged_items.get(&id) {
            return Ok(staged.clone());
        }
        self.store.get_item(id)
    }

    fn put_type(&mut self, task: TypeTask) -> Result<(), StoreError> {
        let cf = self.store.cf(CF_TYPES)?;
        self.batch
            .put_cf(cf, TypeKey::new(task.sequence).to_bytes(), task.to_bytes()?);
        self.staged_types.insert(task.sequence, task);
        Ok(())
    }

    /// Seed a type row. Only used while initializing a fresh store.
    pub(crate) fn insert_type(&mut self, task: TypeTask) -> Result<(), StoreError> {
        self.put_type(task)
    }

    pub(crate) fn put_meta(&mut self, meta: &StoreMeta) -> Result<(), StoreError> {
        let cf = self.store.cf(CF_META)?;
        self.batch.put_cf(cf, META_KEY, meta.to_bytes()?);
        Ok(())
    }

    /// Move a type to `progress`, returning the updated row.
    pub fn set_type_progress(
        &mut self,
        sequence: u64,
        progress: Progress,
    ) -> Result<TypeTask, StoreError> {
        let mut task = self
            .load_type(sequence)?
            .ok_or_else(|| StoreError::NotFound(format!("type #{}", sequence)))?;

        trace!(type_name = %task.name, from = %task.progress, to = %progress, "Type transition");
        task.progress = progress;
        self.put_type(task.clone())?;
        Ok(task)
    }

    /// Insert a new ENQUEUED item owned by `type_name`, returning its id.
    pub fn insert_item(&mut self, type_name: &str, uri: &str) -> Result<u64, StoreError> {
        let id = self.store.next_item_id();
        let item = ItemTask {
            id,
            type_name: type_name.to_string(),
            uri: uri.to_string(),
            progress: Progress::Enqueued,
        };

        let items_cf = self.store.cf(CF_ITEMS)?;
        let progress_cf = self.store.cf(CF_ITEM_PROGRESS)?;
        self.batch
            .put_cf(items_cf, ItemKey::new(id).to_bytes(), item.to_bytes()?);
        self.batch
            .put_cf(progress_cf, ProgressKey::new(Progress::Enqueued, id).to_bytes(), b"");
        self.staged_items.insert(id, Some(item));
        Ok(id)
    }

    /// Move an item to `progress`, returning the updated row.
    ///
    /// Items have no `Done` state; use [`Transaction::remove_item`] instead.
    pub fn set_item_progress(
        &mut self,
        id: u64,
        progress: Progress,
    ) -> Result<ItemTask, StoreError> {
        if progress == Progress::Done {
            return Err(StoreError::InvalidInput(format!(
                "item {} cannot be marked done; remove it instead",
                id
            )));
        }

        let mut item = self
            .load_item(id)?
            .ok_or_else(|| StoreError::NotFound(format!("item {}", id)))?;

        let items_cf = self.store.cf(CF_ITEMS)?;
        let progress_cf = self.store.cf(CF_ITEM_PROGRESS)?;
        self.batch
            .delete_cf(progress_cf, ProgressKey::new(item.progress, id).to_bytes());
        self.batch
            .put_cf(progress_cf, ProgressKey::new(progress, id).to_bytes(), b"");

        item.progress = progress;
        self.batch
            .put_cf(items_cf, ItemKey::new(id).to_bytes(), item.to_bytes()?);
        self.staged_items.insert(id, Some(item.clone()));
        Ok(item)
    }

    /// Delete an item row. Removing an item twice is a `NotFound` error.
    pub fn remove_item(&mut self, id: u64) -> Result<ItemTask, StoreError> {
        let item = self
            .load_item(id)?
            .ok_or_else(|| StoreError::NotFound(format!("item {}", id)))?;

        let items_cf = self.store.cf(CF_ITEMS)?;
        let progress_cf = self.store.cf(CF_ITEM_PROGRESS)?;
        self.batch.delete_cf(items_cf, ItemKey::new(id).to_bytes());
        self.batch
            .delete_cf(progress_cf, ProgressKey::new(item.progress, id).to_bytes());
        self.staged_items.insert(id, None);
        Ok(item)
    }

    /// Append an entry to the result log.
    pub fn append_result(&mut self, record: &ResultRecord) -> Result<(), StoreError> {
        let key = ResultKey::new(self.store.next_result_sequence());
        let cf = self.store.cf(CF_RESULTS)?;
        self.batch.put_cf(cf, key.to_bytes(), record.to_bytes()?);
        Ok(())
    }

    /// Atomically write every staged change.
    pub fn commit(self) -> Result<(), StoreError> {
        let writes = self.batch.len();
        self.store.db.write(self.batch)?;
        trace!(writes, "Committed transaction");
        Ok(())
    }

    /// Discard every staged change.
    pub fn rollback(self) {
        debug!(writes = self.batch.len(), "Rolled back transaction");
    }
}
