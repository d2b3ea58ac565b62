//! Item dispatcher: moves ENQUEUED items into the executor.
//!
//! Each poll reads up to `batch_size` ENQUEUED items. Every item is marked
//! RUNNING in its own transaction before it is submitted, so a RUNNING item is
//! never picked up twice. Submission blocks while the pool is full.
//!
//! The outcome of an item is settled in one transaction: success removes the
//! item and appends a success record, a task fault marks it FAILED and appends
//! a failure record. If that transaction cannot commit the item stays RUNNING
//! and is not polled again in this store's lifetime.
//!
//! An item claimed but refused by the executor (interrupt or shutdown) goes
//! back to ENQUEUED, since its unit never ran.

use std::sync::Arc;

use reindex_store::{ItemTask, Progress, ResultRecord, Store, StoreError};
use tracing::{debug, trace, warn};

use crate::collaborator::IndexTask;
use crate::error::ReindexError;
use crate::executor::BoundedExecutor;
use crate::progress::PassTracker;

pub(crate) struct Dispatcher<'a> {
    store: &'a Arc<Store>,
    executor: &'a BoundedExecutor,
    task: Arc<dyn IndexTask>,
    tracker: Arc<PassTracker>,
    batch_size: usize,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(
        store: &'a Arc<Store>,
        executor: &'a BoundedExecutor,
        task: Arc<dyn IndexTask>,
        tracker: Arc<PassTracker>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            executor,
            task,
            tracker,
            batch_size,
        }
    }

    /// Submit ENQUEUED items until a poll comes back empty.
    ///
    /// Returns the number of items submitted. A store fault while claiming an
    /// item or an executor interruption ends the round with an error.
    pub(crate) async fn dispatch_available(&self) -> Result<usize, ReindexError> {
        let mut submitted = 0;

        loop {
            let batch = self.store.poll_enqueued_items(self.batch_size)?;
            if batch.is_empty() {
                break;
            }
            trace!(count = batch.len(), "Polled enqueued items");

            for item in batch {
                let Some(item) = mark_running(self.store, &item)? else {
                    continue;
                };

                let unit = process_item(
                    self.store.clone(),
                    self.task.clone(),
                    self.tracker.clone(),
                    item.clone(),
                );
                if let Err(e) = self.executor.submit(unit).await {
                    unclaim(self.store, &item);
                    return Err(e.into());
                }
                submitted += 1;
            }
        }

        if submitted > 0 {
            debug!(submitted, "Dispatched items");
        }
        Ok(submitted)
    }
}

/// Claim an item for processing. Returns `None` if it is no longer ENQUEUED.
fn mark_running(store: &Store, item: &ItemTask) -> Result<Option<ItemTask>, StoreError> {
    let mut tx = store.begin();
    match tx.item(item.id)? {
        Some(current) if current.progress == Progress::Enqueued => {}
        _ => return Ok(None),
    }

    let claimed = tx.set_item_progress(item.id, Progress::Running)?;
    tx.commit().inspect_err(|e| {
        warn!(
            item_id = item.id,
            type_name = %item.type_name,
            uri = %item.uri,
            stage = "mark_running",
            error = %e,
            "Could not take item out of queue"
        );
    })?;
    Ok(Some(claimed))
}

/// Return a claimed item that never reached the pool to the queue.
fn unclaim(store: &Store, item: &ItemTask) {
    warn!(
        item_id = item.id,
        type_name = %item.type_name,
        uri = %item.uri,
        stage = "unclaim",
        "Submission refused, returning item to queue"
    );
    if let Err(e) = set_enqueued(store, item.id) {
        warn!(
            item_id = item.id,
            uri = %item.uri,
            stage = "unclaim",
            error = %e,
            "Could not return item to queue"
        );
    }
}

fn set_enqueued(store: &Store, id: u64) -> Result<(), StoreError> {
    let mut tx = store.begin();
    match tx.item(id)? {
        Some(current) if current.progress == Progress::Running => {}
        _ => return Ok(()),
    }
    tx.set_item_progress(id, Progress::Enqueued)?;
    tx.commit()
}

/// Run the index task for one item and persist its outcome.
pub(crate) async fn process_item(
    store: Arc<Store>,
    task: Arc<dyn IndexTask>,
    tracker: Arc<PassTracker>,
    item: ItemTask,
) {
    match task.index(&item.uri).await {
        Ok(payload) => match record_success(&store, &item, payload) {
            Ok(()) => tracker.record_processed(),
            Err(e) => {
                warn!(
                    item_id = item.id,
                    type_name = %item.type_name,
                    uri = %item.uri,
                    stage = "record_success",
                    error = %e,
                    "Could not record success, item left running"
                );
                tracker.record_unsettled();
            }
        },
        Err(fault) => {
            debug!(uri = %item.uri, error = %fault, "Index task failed");
            match record_failure(&store, &item, fault.to_string()) {
                Ok(()) => tracker.record_item_failure(),
                Err(e) => {
                    warn!(
                        item_id = item.id,
                        type_name = %item.type_name,
                        uri = %item.uri,
                        stage = "record_failure",
                        error = %e,
                        "Could not record failure, item left running"
                    );
                    tracker.record_unsettled();
                }
            }
        }
    }
}

fn record_success(store: &Store, item: &ItemTask, payload: String) -> Result<(), StoreError> {
    let mut tx = store.begin();
    let removed = tx.remove_item(item.id)?;
    tx.append_result(&ResultRecord::success(&removed, payload))?;
    tx.commit()
}

fn record_failure(store: &Store, item: &ItemTask, description: String) -> Result<(), StoreError> {
    let mut tx = store.begin();
    let failed = tx.set_item_progress(item.id, Progress::Failed)?;
    tx.append_result(&ResultRecord::failure(&failed, description))?;
    tx.commit()
}
