//! One full reindex pass.
//!
//! A pass submits the listing unit to the executor first, then keeps
//! dispatching ENQUEUED items while listing is still producing them. Once the
//! listing unit has finished, one last dispatch round picks up whatever it
//! enqueued at the end and the pass waits for the pool to drain.

use std::sync::Arc;
use std::time::Instant;

use reindex_store::Store;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::collaborator::{IndexTask, Lister};
use crate::config::RunnerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ExecutorError, ReindexError};
use crate::executor::BoundedExecutor;
use crate::listing;
use crate::progress::{LoggingProgressCallback, PassProgress, PassTracker, ProgressCallback};

/// Outcome of a single pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Counters collected while the pass ran
    pub progress: PassProgress,
    /// FAILED types plus FAILED items once the pass drained
    pub error_count: u64,
    /// Items still RUNNING after the pass; their outcome was never persisted
    pub items_stuck: u64,
    /// Types still ENQUEUED after the pass, non-zero only if listing aborted
    pub types_pending: u64,
    pub elapsed_ms: u64,
}

impl PassReport {
    /// Items indexed successfully during this pass.
    pub fn processed(&self) -> u64 {
        self.progress.items_processed
    }
}

/// Sets the listing-finished flag when the listing unit ends, panics included.
struct ListingDone(watch::Sender<bool>);

impl Drop for ListingDone {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// Drives passes over one store with one worker pool.
pub struct Runner {
    store: Arc<Store>,
    config: RunnerConfig,
    executor: BoundedExecutor,
    interrupt: CancellationToken,
    progress: Arc<dyn ProgressCallback>,
}

impl Runner {
    /// Create a runner. Must be called within a Tokio runtime.
    ///
    /// Cancelling `interrupt` aborts the current pass with
    /// [`ExecutorError::Interrupted`]; units already accepted still finish.
    pub fn new(
        store: Arc<Store>,
        config: RunnerConfig,
        interrupt: CancellationToken,
    ) -> Result<Self, ReindexError> {
        config.validate()?;
        let executor =
            BoundedExecutor::new(config.pool_size, config.drain_interval, interrupt.clone())?;
        let progress = Arc::new(LoggingProgressCallback::new(config.progress_every));

        Ok(Self {
            store,
            config,
            executor,
            interrupt,
            progress,
        })
    }

    /// Replace the default logging progress callback.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }

    /// Run one pass: list every ENQUEUED type and process every ENQUEUED item.
    pub async fn process(
        &self,
        lister: Arc<dyn Lister>,
        task: Arc<dyn IndexTask>,
    ) -> Result<PassReport, ReindexError> {
        let started = Instant::now();
        let tracker = Arc::new(PassTracker::new(self.progress.clone()));
        let (done_tx, mut listing_done) = watch::channel(false);

        let listing_unit = {
            let store = self.store.clone();
            let tracker = tracker.clone();
            let interrupt = self.interrupt.clone();
            let staging_dir = self.config.staging_dir.clone();
            async move {
                let _done = ListingDone(done_tx);
                let listed = listing::run_listing(
                    &store,
                    lister.as_ref(),
                    &tracker,
                    &interrupt,
                    staging_dir.as_deref(),
                )
                .await;
                if let Err(e) = listed {
                    error!(error = %e, "Error populating item queue");
                }
            }
        };
        self.executor.submit(listing_unit).await?;

        let dispatcher = Dispatcher::new(
            &self.store,
            &self.executor,
            task,
            tracker.clone(),
            self.config.batch_size,
        );

        loop {
            // Read before dispatching so the round after listing ends sees
            // every item it committed.
            let listing_finished = *listing_done.borrow_and_update();
            dispatcher.dispatch_available().await?;
            if listing_finished {
                break;
            }

            tokio::select! {
                _ = self.interrupt.cancelled() => {
                    self.executor.shutdown();
                    return Err(ExecutorError::Interrupted.into());
                }
                _ = listing_done.changed() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.executor.await_drained().await?;

        let stats = self.store.stats()?;
        let report = PassReport {
            progress: tracker.snapshot(),
            error_count: stats.errors(),
            items_stuck: stats.items_running,
            types_pending: stats.types_enqueued,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if report.items_stuck > 0 {
            warn!(
                items = report.items_stuck,
                "Items left running; their outcome could not be saved"
            );
        }
        if report.types_pending > 0 {
            warn!(types = report.types_pending, "Types left unlisted");
        }
        info!(
            processed = report.progress.items_processed,
            failed_items = report.progress.items_failed,
            failed_types = report.progress.types_failed,
            errors = report.error_count,
            elapsed_ms = report.elapsed_ms,
            "Pass complete"
        );

        Ok(report)
    }

    /// Stop the worker pool and wait for accepted units to finish.
    pub async fn shutdown(self) {
        self.executor.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{resource_stream, ResourceStream};
    use crate::error::{ListingError, TaskError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct SlowLister;

    #[async_trait]
    impl Lister for SlowLister {
        async fn list(&self, type_name: &str) -> Result<ResourceStream, ListingError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let resources = (0..3).map(|i| format!("{}:/{}", type_name, i)).collect::<Vec<_>>();
            Ok(resource_stream(resources))
        }
    }

    struct PanickingLister;

    #[async_trait]
    impl Lister for PanickingLister {
        async fn list(&self, _type_name: &str) -> Result<ResourceStream, ListingError> {
            panic!("lister blew up");
        }
    }

    struct EchoTask;

    #[async_trait]
    impl IndexTask for EchoTask {
        async fn index(&self, resource: &str) -> Result<String, TaskError> {
            Ok(resource.to_string())
        }
    }

    fn test_config() -> RunnerConfig {
        RunnerConfig::default()
            .with_pool_size(2)
            .with_batch_size(2)
            .with_poll_interval(Duration::from_millis(5))
            .with_drain_interval(Duration::from_millis(5))
    }

    fn create_test_store(types: &[&str]) -> (Arc<Store>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::initialize(&temp_dir.path().join("queue.db"), types).unwrap();
        (Arc::new(store), temp_dir)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pass_processes_items_listed_while_dispatching() {
        let (store, _temp) = create_test_store(&["A", "B", "C"]);
        let runner = Runner::new(store.clone(), test_config(), CancellationToken::new()).unwrap();

        let report = runner
            .process(Arc::new(SlowLister), Arc::new(EchoTask))
            .await
            .unwrap();

        assert_eq!(report.processed(), 9);
        assert_eq!(report.error_count, 0);
        assert_eq!(report.items_stuck, 0);
        assert_eq!(report.types_pending, 0);
        assert_eq!(store.stats().unwrap().results_succeeded, 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_of_one_still_completes() {
        let (store, _temp) = create_test_store(&["A"]);
        let runner = Runner::new(
            store.clone(),
            test_config().with_pool_size(1),
            CancellationToken::new(),
        )
        .unwrap();

        let report = runner
            .process(Arc::new(SlowLister), Arc::new(EchoTask))
            .await
            .unwrap();
        assert_eq!(report.processed(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_listing_panic_ends_pass() {
        let (store, _temp) = create_test_store(&["A"]);
        let runner = Runner::new(store.clone(), test_config(), CancellationToken::new()).unwrap();

        let report = runner
            .process(Arc::new(PanickingLister), Arc::new(EchoTask))
            .await
            .unwrap();

        assert_eq!(report.processed(), 0);
        assert_eq!(runner.executor().stats().panicked(), 1);
        // The type was claimed before the lister panicked.
        assert_eq!(store.stats().unwrap().types_running, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupted_pass() {
        let (store, _temp) = create_test_store(&["A"]);
        let interrupt = CancellationToken::new();
        let runner = Runner::new(store, test_config(), interrupt.clone()).unwrap();
        interrupt.cancel();

        let result = runner
            .process(Arc::new(SlowLister), Arc::new(EchoTask))
            .await;
        assert!(matches!(
            result,
            Err(ReindexError::Executor(ExecutorError::Interrupted))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (store, _temp) = create_test_store(&["A"]);
        let result = Runner::new(store, test_config().with_batch_size(0), CancellationToken::new());
        assert!(matches!(result, Err(ReindexError::Config(_))));
    }

    /// Tracks how many listing or indexing calls are in progress at once.
    #[derive(Default)]
    struct ActivityMeter {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ActivityMeter {
        fn enter(&self) -> Active<'_> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Active(self)
        }
    }

    struct Active<'a>(&'a ActivityMeter);

    impl Drop for Active<'_> {
        fn drop(&mut self) {
            self.0.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct MeteredLister(Arc<ActivityMeter>);

    #[async_trait]
    impl Lister for MeteredLister {
        async fn list(&self, type_name: &str) -> Result<ResourceStream, ListingError> {
            let _active = self.0.enter();
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(resource_stream(
                (0..4).map(|i| format!("{}:/{}", type_name, i)).collect(),
            ))
        }
    }

    struct MeteredTask(Arc<ActivityMeter>);

    #[async_trait]
    impl IndexTask for MeteredTask {
        async fn index(&self, resource: &str) -> Result<String, TaskError> {
            let _active = self.0.enter();
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(resource.to_string())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_listing_and_tasks_share_pool_bound() {
        let (store, _temp) = create_test_store(&["A", "B", "C", "D"]);
        let meter = Arc::new(ActivityMeter::default());
        let runner = Runner::new(
            store.clone(),
            test_config().with_pool_size(3),
            CancellationToken::new(),
        )
        .unwrap();

        let report = runner
            .process(
                Arc::new(MeteredLister(meter.clone())),
                Arc::new(MeteredTask(meter.clone())),
            )
            .await
            .unwrap();

        assert_eq!(report.processed(), 16);
        let peak = meter.peak.load(Ordering::SeqCst);
        assert!(peak >= 1);
        assert!(peak <= 3, "peak concurrency {} exceeded pool size", peak);
        assert_eq!(meter.active.load(Ordering::SeqCst), 0);
    }

    /// Takes far longer to list a type than the test waits before interrupting.
    struct StallingLister;

    #[async_trait]
    impl Lister for StallingLister {
        async fn list(&self, type_name: &str) -> Result<ResourceStream, ListingError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(resource_stream(vec![format!("{}:/1", type_name)]))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupt_stops_listing_remaining_types() {
        let types = ["T0", "T1", "T2", "T3", "T4", "T5", "T6", "T7"];
        let (store, _temp) = create_test_store(&types);
        let interrupt = CancellationToken::new();
        let runner = Runner::new(store.clone(), test_config(), interrupt.clone()).unwrap();

        let canceller = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = runner
            .process(Arc::new(StallingLister), Arc::new(EchoTask))
            .await;
        assert!(matches!(
            result,
            Err(ReindexError::Executor(ExecutorError::Interrupted))
        ));

        // Listing all eight types would take well over a second.
        tokio::time::timeout(Duration::from_secs(1), runner.shutdown())
            .await
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.types_running, 0);
        assert_eq!(stats.types_done, 0);
        assert_eq!(stats.types_enqueued, types.len() as u64);
        assert_eq!(stats.items_enqueued, 0);
    }
}
