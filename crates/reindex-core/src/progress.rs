//! Progress tracking for a single pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

/// Snapshot of what a pass has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassProgress {
    /// Types whose listing was committed
    pub types_listed: u64,
    /// Types whose listing faulted
    pub types_failed: u64,
    /// Items enqueued by successful listings
    pub items_listed: u64,
    /// Items indexed and removed from the queue
    pub items_processed: u64,
    /// Items whose index task faulted
    pub items_failed: u64,
    /// Items whose outcome could not be persisted and were left RUNNING
    pub items_unsettled: u64,
}

impl PassProgress {
    /// Items that reached a terminal outcome, successful or not.
    pub fn items_settled(&self) -> u64 {
        self.items_processed + self.items_failed
    }
}

/// Trait for receiving pass progress updates.
pub trait ProgressCallback: Send + Sync {
    /// Called after each listed type and each settled item.
    fn on_progress(&self, progress: &PassProgress);
}

/// A no-op progress callback for when progress reporting isn't needed.
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_progress(&self, _progress: &PassProgress) {}
}

/// Logs progress at info level every `every` settled items.
pub struct LoggingProgressCallback {
    every: u64,
}

impl LoggingProgressCallback {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl ProgressCallback for LoggingProgressCallback {
    fn on_progress(&self, progress: &PassProgress) {
        let settled = progress.items_settled();
        if settled > 0 && settled.is_multiple_of(self.every) {
            info!(
                processed = progress.items_processed,
                failed = progress.items_failed,
                listed = progress.items_listed,
                "Reindex progress"
            );
        }
    }
}

/// Shared counters updated by the listing unit and item units of one pass.
pub(crate) struct PassTracker {
    types_listed: AtomicU64,
    types_failed: AtomicU64,
    items_listed: AtomicU64,
    items_processed: AtomicU64,
    items_failed: AtomicU64,
    items_unsettled: AtomicU64,
    callback: Arc<dyn ProgressCallback>,
}

impl PassTracker {
    pub(crate) fn new(callback: Arc<dyn ProgressCallback>) -> Self {
        Self {
            types_listed: AtomicU64::new(0),
            types_failed: AtomicU64::new(0),
            items_listed: AtomicU64::new(0),
            items_processed: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            items_unsettled: AtomicU64::new(0),
            callback,
        }
    }

    pub(crate) fn record_listed(&self, items: u64) {
        self.types_listed.fetch_add(1, Ordering::Relaxed);
        self.items_listed.fetch_add(items, Ordering::Relaxed);
        self.notify();
    }

    pub(crate) fn record_listing_failure(&self) {
        self.types_failed.fetch_add(1, Ordering::Relaxed);
        self.notify();
    }

    pub(crate) fn record_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::Relaxed);
        self.notify();
    }

    pub(crate) fn record_item_failure(&self) {
        self.items_failed.fetch_add(1, Ordering::Relaxed);
        self.notify();
    }

    pub(crate) fn record_unsettled(&self) {
        self.items_unsettled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PassProgress {
        PassProgress {
            types_listed: self.types_listed.load(Ordering::Relaxed),
            types_failed: self.types_failed.load(Ordering::Relaxed),
            items_listed: self.items_listed.load(Ordering::Relaxed),
            items_processed: self.items_processed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            items_unsettled: self.items_unsettled.load(Ordering::Relaxed),
        }
    }

    fn notify(&self) {
        self.callback.on_progress(&self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording(Mutex<Vec<PassProgress>>);

    impl ProgressCallback for Recording {
        fn on_progress(&self, progress: &PassProgress) {
            self.0.lock().unwrap().push(progress.clone());
        }
    }

    #[test]
    fn test_tracker_counts() {
        let tracker = PassTracker::new(Arc::new(NoOpProgressCallback));
        tracker.record_listed(4);
        tracker.record_listing_failure();
        tracker.record_processed();
        tracker.record_processed();
        tracker.record_item_failure();
        tracker.record_unsettled();

        let progress = tracker.snapshot();
        assert_eq!(progress.types_listed, 1);
        assert_eq!(progress.types_failed, 1);
        assert_eq!(progress.items_listed, 4);
        assert_eq!(progress.items_processed, 2);
        assert_eq!(progress.items_failed, 1);
        assert_eq!(progress.items_unsettled, 1);
        assert_eq!(progress.items_settled(), 3);
    }

    #[test]
    fn test_callback_sees_every_update() {
        let recording = Arc::new(Recording(Mutex::new(Vec::new())));
        let tracker = PassTracker::new(recording.clone());
        tracker.record_listed(2);
        tracker.record_processed();
        tracker.record_unsettled();

        let seen = recording.0.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].items_processed, 1);
    }

    #[test]
    fn test_logging_callback_zero_interval() {
        let callback = LoggingProgressCallback::new(0);
        callback.on_progress(&PassProgress::default());
        callback.on_progress(&PassProgress {
            items_processed: 1,
            ..Default::default()
        });
    }
}
