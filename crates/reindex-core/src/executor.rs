//! Bounded worker pool with slot-based admission.
//!
//! [`BoundedExecutor`] runs at most `capacity` units at once. `submit`
//! reserves a slot before handing the unit to the pool and waits while every
//! slot is taken. A slot is released only after its unit has finished, so
//! `in_flight() == 0` means every submitted unit has completed.
//!
//! Slots are the reserved capacity of an mpsc channel that is never sent on:
//! dropping an [`OwnedPermit`] hands its slot back.
//!
//! Failures and panics inside a unit are logged and counted, never returned
//! to the submitter. The only errors the caller sees are interruption and
//! submitting after shutdown.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExecutorError;

/// Counters for units run by the pool.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl ExecutorStats {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }
}

struct Job {
    work: BoxFuture<'static, ()>,
    slot: OwnedPermit<()>,
}

impl Job {
    async fn run(self, stats: &ExecutorStats) {
        let Job { work, slot } = self;
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(()) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(panic = %message, "Work unit panicked");
                stats.panicked.fetch_add(1, Ordering::Relaxed);
            }
        }
        drop(slot);
    }
}

/// Fixed-size worker pool with blocking admission.
pub struct BoundedExecutor {
    slots: mpsc::Sender<()>,
    // Held so slot reservations never fail; nothing is ever received.
    _slot_rx: mpsc::Receiver<()>,
    jobs: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<ExecutorStats>,
    drain_interval: Duration,
    interrupt: CancellationToken,
    shutdown: CancellationToken,
}

impl BoundedExecutor {
    /// Start `capacity` workers. Must be called within a Tokio runtime.
    ///
    /// Cancelling `interrupt` shuts the pool down and makes pending
    /// `submit`/`await_drained` calls return [`ExecutorError::Interrupted`].
    pub fn new(
        capacity: usize,
        drain_interval: Duration,
        interrupt: CancellationToken,
    ) -> Result<Self, ExecutorError> {
        if capacity == 0 {
            return Err(ExecutorError::ZeroCapacity);
        }

        let (slots, slot_rx) = mpsc::channel(capacity);
        let (jobs, job_rx) = mpsc::channel::<Job>(capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let stats = Arc::new(ExecutorStats::default());
        let shutdown = interrupt.child_token();

        let workers = (0..capacity)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    job_rx.clone(),
                    stats.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        debug!(capacity, "Started bounded executor");

        Ok(Self {
            slots,
            _slot_rx: slot_rx,
            jobs,
            workers,
            stats,
            drain_interval,
            interrupt,
            shutdown,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.max_capacity()
    }

    /// Units submitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.slots.max_capacity() - self.slots.capacity()
    }

    pub fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Submit a unit of work, waiting for a free slot first.
    ///
    /// Once accepted the unit runs to completion even if the pool is shut
    /// down afterwards.
    pub async fn submit<F>(&self, work: F) -> Result<(), ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(self.shutdown_reason());
        }

        let slot = tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => {
                self.shutdown();
                return Err(ExecutorError::Interrupted);
            }
            _ = self.shutdown.cancelled() => return Err(ExecutorError::Closed),
            slot = self.slots.clone().reserve_owned() => {
                slot.map_err(|_| ExecutorError::Closed)?
            }
        };

        let job = Job {
            work: work.boxed(),
            slot,
        };
        self.jobs.send(job).await.map_err(|_| ExecutorError::Closed)
    }

    /// Wait until every slot is free, checking every `drain_interval`.
    pub async fn await_drained(&self) -> Result<(), ExecutorError> {
        loop {
            let in_flight = self.in_flight();
            if in_flight == 0 {
                return Ok(());
            }
            debug!(in_flight, "Waiting for executor to drain");

            tokio::select! {
                _ = self.interrupt.cancelled() => {
                    self.shutdown();
                    return Err(ExecutorError::Interrupted);
                }
                _ = tokio::time::sleep(self.drain_interval) => {}
            }
        }
    }

    /// Stop accepting work. Units already accepted still run.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(in_flight = self.in_flight(), "Shutting down executor");
            self.shutdown.cancel();
        }
    }

    /// Shut down and wait for every worker to exit.
    pub async fn join(mut self) {
        self.shutdown();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!(error = %e, "Executor worker ended abnormally");
            }
        }
    }

    fn shutdown_reason(&self) -> ExecutorError {
        if self.interrupt.is_cancelled() {
            ExecutorError::Interrupted
        } else {
            ExecutorError::Closed
        }
    }
}

impl Drop for BoundedExecutor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn worker_loop(
    worker: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    stats: Arc<ExecutorStats>,
    shutdown: CancellationToken,
) {
    loop {
        let next = {
            let mut rx = jobs.lock().await;
            tokio::select! {
                job = rx.recv() => job,
                _ = shutdown.cancelled() => {
                    // Accepted jobs still run; close and keep draining.
                    rx.close();
                    rx.recv().await
                }
            }
        };

        match next {
            Some(job) => job.run(&stats).await,
            None => break,
        }
    }
    debug!(worker, "Executor worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn executor(capacity: usize) -> BoundedExecutor {
        BoundedExecutor::new(capacity, Duration::from_millis(5), CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected() {
        let result = BoundedExecutor::new(0, Duration::from_millis(5), CancellationToken::new());
        assert!(matches!(result, Err(ExecutorError::ZeroCapacity)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_capacity() {
        let executor = executor(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let running = running.clone();
            let peak = peak.clone();
            executor
                .submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            assert!(executor.in_flight() <= 3);
        }

        executor.await_drained().await.unwrap();
        assert_eq!(executor.in_flight(), 0);
        assert_eq!(executor.stats().completed(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_panics_are_contained() {
        let executor = executor(2);
        executor.submit(async { panic!("boom") }).await.unwrap();
        executor.submit(async {}).await.unwrap();

        executor.await_drained().await.unwrap();
        assert_eq!(executor.stats().panicked(), 1);
        assert_eq!(executor.stats().completed(), 1);
    }

    #[tokio::test]
    async fn test_drained_when_idle() {
        let executor = executor(2);
        executor.await_drained().await.unwrap();
        assert_eq!(executor.capacity(), 2);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_closed() {
        let executor = executor(1);
        executor.shutdown();
        let result = executor.submit(async {}).await;
        assert_eq!(result, Err(ExecutorError::Closed));
    }

    #[tokio::test]
    async fn test_interrupt_while_waiting_for_slot() {
        let interrupt = CancellationToken::new();
        let executor =
            BoundedExecutor::new(1, Duration::from_millis(5), interrupt.clone()).unwrap();

        let release = CancellationToken::new();
        let hold = release.clone();
        executor
            .submit(async move { hold.cancelled().await })
            .await
            .unwrap();

        interrupt.cancel();
        let result = executor.submit(async {}).await;
        assert_eq!(result, Err(ExecutorError::Interrupted));
        assert!(executor.is_shutdown());

        let drained = executor.await_drained().await;
        assert_eq!(drained, Err(ExecutorError::Interrupted));
        release.cancel();
    }

    #[tokio::test]
    async fn test_accepted_work_runs_after_shutdown() {
        let executor = executor(2);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let done = done.clone();
            executor
                .submit(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }

        executor.join().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }
}
