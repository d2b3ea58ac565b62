//! Listing driver: turns ENQUEUED types into ENQUEUED items.
//!
//! Types are listed one at a time in seeding order. For each type the driver
//! marks it RUNNING, drains the lister's stream into an on-disk spool, then
//! replays the spool to insert every item and mark the type DONE in a single
//! transaction. A fault anywhere in that sequence discards the staged items and
//! marks the type FAILED instead, so a type's items appear all at once or not
//! at all.
//!
//! The stream is drained before the transaction opens because a transaction
//! holds the store lock and cannot live across an `.await`.
//!
//! Interruption is checked before each claim and while a stream is drained. A
//! type interrupted mid-listing is returned to ENQUEUED with nothing inserted,
//! so the next run lists it from scratch.

use std::path::Path;

use futures::StreamExt;
use reindex_store::{Progress, Store, StoreError, TypeTask};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborator::Lister;
use crate::error::ReindexError;
use crate::progress::PassTracker;
use crate::staging::ListingSpool;

/// List every ENQUEUED type until none remain or `interrupt` fires.
///
/// Listing faults are absorbed per type. An error is returned only when the
/// store cannot claim the next type, which ends the listing phase early.
pub(crate) async fn run_listing(
    store: &Store,
    lister: &dyn Lister,
    tracker: &PassTracker,
    interrupt: &CancellationToken,
    staging_dir: Option<&Path>,
) -> Result<(), StoreError> {
    loop {
        if interrupt.is_cancelled() {
            info!("Listing interrupted");
            return Ok(());
        }
        let Some(task) = claim_next_type(store)? else {
            break;
        };
        info!(type_name = %task.name, "Enqueueing items");

        let listed = tokio::select! {
            biased;
            _ = interrupt.cancelled() => {
                info!(type_name = %task.name, "Listing interrupted");
                release_type(store, &task);
                return Ok(());
            }
            listed = enqueue_type(store, lister, &task, staging_dir) => listed,
        };

        match listed {
            Ok(count) => {
                info!(type_name = %task.name, items = count, "Done enqueueing items");
                tracker.record_listed(count);
            }
            Err(e) => {
                warn!(
                    type_name = %task.name,
                    stage = "enqueue_items",
                    error = %e,
                    "Error loading item queue"
                );
                mark_type_failed(store, &task);
                tracker.record_listing_failure();
            }
        }
    }

    debug!("No enqueued types remain");
    Ok(())
}

fn claim_next_type(store: &Store) -> Result<Option<TypeTask>, StoreError> {
    let Some(task) = store.next_enqueued_type()? else {
        return Ok(None);
    };

    let mut tx = store.begin();
    let task = tx.set_type_progress(task.sequence, Progress::Running)?;
    tx.commit()?;
    Ok(Some(task))
}

/// Drain, then insert. The only awaits come before the transaction opens, so
/// dropping this future never leaves a partial write.
async fn enqueue_type(
    store: &Store,
    lister: &dyn Lister,
    task: &TypeTask,
    staging_dir: Option<&Path>,
) -> Result<u64, ReindexError> {
    let mut stream = lister.list(&task.name).await?;

    let mut spool = ListingSpool::create(staging_dir)?;
    while let Some(resource) = stream.next().await {
        spool.push(&resource?).await?;
    }
    let count = spool.len();
    let replay = spool.finish().await?;

    let mut tx = store.begin();
    for resource in replay {
        tx.insert_item(&task.name, &resource?)?;
    }
    tx.set_type_progress(task.sequence, Progress::Done)?;
    tx.commit()?;

    Ok(count)
}

fn mark_type_failed(store: &Store, task: &TypeTask) {
    if let Err(e) = set_type_progress(store, task.sequence, Progress::Failed) {
        warn!(
            type_name = %task.name,
            stage = "mark_type_failed",
            error = %e,
            "Could not mark type as failed"
        );
    }
}

fn release_type(store: &Store, task: &TypeTask) {
    if let Err(e) = set_type_progress(store, task.sequence, Progress::Enqueued) {
        warn!(
            type_name = %task.name,
            stage = "release_type",
            error = %e,
            "Could not return type to queue"
        );
    }
}

fn set_type_progress(store: &Store, sequence: u64, progress: Progress) -> Result<(), StoreError> {
    let mut tx = store.begin();
    tx.set_type_progress(sequence, progress)?;
    tx.commit()
}
