//! Queue worker pool.
//!
//! # Responsibilities
//! - Pull queued submissions and run them through the dispatch engine
//! - Honour each item's not-before instant
//! - On shutdown, stop taking items, drain what is left within a deadline,
//!   and account for anything abandoned
//!
//! # Design Decisions
//! - Workers exit between items, never in the middle of a dispatch
//! - An item whose backoff is interrupted by shutdown goes back to the queue so the drain sees it
//! - A zero drain deadline keeps the lossy behaviour: in-flight work finishes, queued items
//!   are logged and dropped
//! - The drain also waits for the engine's detached dispatches, which can requeue after the
//!   queue first looks empty

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};

use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::observability::metrics;
use crate::payments::dispatch::DispatchEngine;
use crate::queue::retry_queue::{QueueItem, RetryQueue};

/// What happened to the backlog at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items dispatched during the drain window.
    pub dispatched: usize,
    /// Items left undispatched when the window closed.
    pub abandoned: usize,
}

/// A fixed set of tasks feeding the queue into the dispatch engine.
pub struct WorkerPool {
    tasks: JoinSet<()>,
    queue: Arc<RetryQueue>,
    engine: Arc<DispatchEngine>,
    size: usize,
}

impl WorkerPool {
    /// Start `size` workers. They run until `shutdown` fires.
    pub fn spawn(size: usize, engine: Arc<DispatchEngine>, shutdown: &Shutdown) -> Self {
        let queue = Arc::clone(engine.queue());
        let mut tasks = JoinSet::new();
        for id in 0..size {
            tasks.spawn(worker_loop(
                id,
                Arc::clone(&queue),
                Arc::clone(&engine),
                shutdown.subscribe(),
            ));
        }
        tracing::info!(workers = size, "Worker pool started");

        Self {
            tasks,
            queue,
            engine,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for every worker to stop, then drain the backlog until `drain_timeout`.
    ///
    /// Call after the shutdown signal has been triggered. Detached dispatches
    /// and inserts are waited for as part of the drain; whatever is still
    /// queued or in flight when the window closes is reported as abandoned.
    pub async fn shutdown(mut self, drain_timeout: Duration) -> DrainReport {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task failed");
            }
        }

        let (dispatched, timed_out) = if drain_timeout.is_zero() {
            // In-flight work still finishes; the backlog is left alone.
            self.engine.wait_idle().await;
            (0, false)
        } else {
            drain(&self.queue, &self.engine, self.size.max(1), Instant::now() + drain_timeout).await
        };

        // Cancelled drain tasks, plus detached tasks the deadline cut off.
        let mut stranded = self.engine.take_dropped_payments();
        if timed_out {
            stranded.extend(self.engine.in_flight_payments());
        }

        let leftover = self.queue.drain_all().await;
        for item in &leftover {
            tracing::warn!(
                correlation_id = %item.correlation_id(),
                attempts = item.attempts,
                "Abandoning queued payment at shutdown"
            );
        }
        for payment in &stranded {
            tracing::warn!(
                correlation_id = %payment.correlation_id,
                stage = payment.stage.as_str(),
                "Abandoning in-flight payment at shutdown"
            );
        }
        let abandoned = leftover.len() + stranded.len();
        metrics::record_abandoned(abandoned);

        let report = DrainReport {
            dispatched,
            abandoned,
        };
        tracing::info!(
            dispatched = report.dispatched,
            abandoned = report.abandoned,
            "Worker pool stopped"
        );
        report
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<RetryQueue>,
    engine: Arc<DispatchEngine>,
    mut shutdown: ShutdownSignal,
) {
    tracing::debug!(worker = id, "Worker started");
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            item = queue.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        if let Some(not_before) = item.not_before {
            tokio::select! {
                _ = sleep_until(not_before) => {}
                _ = shutdown.recv() => {
                    queue.send(item);
                    break;
                }
            }
        }

        let outcome = engine.dispatch(item).await;
        tracing::trace!(worker = id, ?outcome, "Queued item dispatched");
    }
    tracing::debug!(worker = id, "Worker stopped");
}

/// Dispatch queue and spill items with `concurrency` tasks until nothing is
/// queued or in flight, or `deadline` passes.
///
/// Returns how many items were dispatched and whether the deadline cut the
/// drain short.
async fn drain(
    queue: &Arc<RetryQueue>,
    engine: &Arc<DispatchEngine>,
    concurrency: usize,
    deadline: Instant,
) -> (usize, bool) {
    let dispatched = Arc::new(AtomicUsize::new(0));
    let deferred: Arc<Mutex<Vec<QueueItem>>> = Arc::new(Mutex::new(Vec::new()));
    let mut timed_out = false;

    loop {
        let pending = queue.queue_len() + queue.spill_len();
        if pending > 0 {
            tracing::info!(pending, "Draining queued payments before exit");
            let mut tasks = JoinSet::new();
            for _ in 0..concurrency {
                let queue = Arc::clone(queue);
                let engine = Arc::clone(engine);
                let dispatched = Arc::clone(&dispatched);
                let deferred = Arc::clone(&deferred);
                tasks.spawn(async move {
                    while let Some(item) = queue.try_next().await {
                        if item.not_before.is_some_and(|not_before| not_before >= deadline) {
                            deferred.lock().unwrap_or_else(PoisonError::into_inner).push(item);
                            continue;
                        }
                        engine.dispatch_when_due(item).await;
                        dispatched.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }

            let finished = tokio::time::timeout_at(deadline, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if finished.is_err() {
                tracing::warn!("Drain deadline reached, stopping in-flight dispatches");
                tasks.abort_all();
                // Cancelled cycles land in the engine's dropped list once joined.
                while tasks.join_next().await.is_some() {}
                timed_out = true;
                break;
            }
        }

        // Detached dispatches may still requeue, and inserts may still be pending.
        if tokio::time::timeout_at(deadline, engine.wait_idle()).await.is_err() {
            tracing::warn!("Drain deadline reached with dispatches in flight");
            timed_out = true;
            break;
        }
        if queue.queue_len() + queue.spill_len() == 0 {
            break;
        }
    }

    let deferred = std::mem::take(&mut *deferred.lock().unwrap_or_else(PoisonError::into_inner));
    for item in deferred {
        queue.send(item);
    }
    (dispatched.load(Ordering::Relaxed), timed_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::processor::{PaymentProcessor, ProcessorError};
    use crate::payments::store::InMemoryPaymentStore;
    use crate::payments::types::{PaymentSubmission, Processor};
    use crate::resilience::RetryPolicy;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    struct Fixed(Processor, u16);

    #[async_trait]
    impl PaymentProcessor for Fixed {
        fn kind(&self) -> Processor {
            self.0
        }

        async fn submit(&self, _: &PaymentSubmission) -> Result<u16, ProcessorError> {
            Ok(self.1)
        }
    }

    fn engine(status: u16, store: &InMemoryPaymentStore, queue: &Arc<RetryQueue>) -> Arc<DispatchEngine> {
        Arc::new(DispatchEngine::new(
            Arc::new(Fixed(Processor::Default, status)),
            Arc::new(Fixed(Processor::Fallback, status)),
            Arc::new(store.clone()),
            Arc::clone(queue),
            RetryPolicy::unlimited(10, 10),
            8,
        ))
    }

    /// First call stalls for `stall` and fails; later calls succeed.
    struct FlakyOnce {
        kind: Processor,
        stall: Duration,
        calls: AtomicUsize,
    }

    impl FlakyOnce {
        fn new(kind: Processor, stall: Duration) -> Arc<Self> {
            Arc::new(Self {
                kind,
                stall,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PaymentProcessor for FlakyOnce {
        fn kind(&self) -> Processor {
            self.kind
        }

        async fn submit(&self, _: &PaymentSubmission) -> Result<u16, ProcessorError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(self.stall).await;
                return Ok(500);
            }
            Ok(200)
        }
    }

    fn flaky_engine(stall: Duration, store: &InMemoryPaymentStore, queue: &Arc<RetryQueue>) -> Arc<DispatchEngine> {
        Arc::new(DispatchEngine::new(
            FlakyOnce::new(Processor::Default, stall),
            FlakyOnce::new(Processor::Fallback, stall),
            Arc::new(store.clone()),
            Arc::clone(queue),
            RetryPolicy::unlimited(10, 10),
            8,
        ))
    }

    fn item(id: &str) -> QueueItem {
        QueueItem::new(PaymentSubmission::new(id, dec!(2.50), chrono::Utc::now()))
    }

    async fn wait_for(store: &InMemoryPaymentStore, n: usize) {
        for _ in 0..200 {
            if store.len().await >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn workers_dispatch_queued_items() {
        let store = InMemoryPaymentStore::new();
        let queue = Arc::new(RetryQueue::new(16, 4));
        let shutdown = Shutdown::new();
        let pool = WorkerPool::spawn(2, engine(200, &store, &queue), &shutdown);

        for id in ["a", "b", "c"] {
            queue.send(item(id));
        }
        wait_for(&store, 3).await;
        assert_eq!(store.len().await, 3);

        shutdown.trigger();
        let report = pool.shutdown(Duration::ZERO).await;
        assert_eq!(report, DrainReport::default());
    }

    #[tokio::test]
    async fn worker_waits_for_not_before() {
        let store = InMemoryPaymentStore::new();
        let queue = Arc::new(RetryQueue::new(16, 4));
        let shutdown = Shutdown::new();
        let pool = WorkerPool::spawn(1, engine(200, &store, &queue), &shutdown);

        queue.send(item("later").retry(1, Duration::from_millis(200)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty().await);

        wait_for(&store, 1).await;
        assert_eq!(store.len().await, 1);

        shutdown.trigger();
        pool.shutdown(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn zero_drain_abandons_backlog() {
        let store = InMemoryPaymentStore::new();
        let queue = Arc::new(RetryQueue::new(2, 4));
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let pool = WorkerPool::spawn(2, engine(200, &store, &queue), &shutdown);

        for id in ["a", "b", "c"] {
            queue.send(item(id));
        }
        let report = pool.shutdown(Duration::ZERO).await;
        assert_eq!(report.abandoned, 3);
        assert_eq!(queue.queue_len() + queue.spill_len(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn drain_dispatches_backlog_before_exit() {
        let store = InMemoryPaymentStore::new();
        let queue = Arc::new(RetryQueue::new(2, 4));
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let pool = WorkerPool::spawn(2, engine(200, &store, &queue), &shutdown);

        for id in ["a", "b", "c", "d"] {
            queue.send(item(id));
        }
        let report = pool.shutdown(Duration::from_secs(2)).await;
        assert_eq!(report.dispatched, 4);
        assert_eq!(report.abandoned, 0);

        wait_for(&store, 4).await;
        assert_eq!(store.len().await, 4);
    }

    #[tokio::test]
    async fn drain_waits_for_direct_dispatch_that_requeues() {
        let store = InMemoryPaymentStore::new();
        let queue = Arc::new(RetryQueue::new(16, 4));
        let shutdown = Shutdown::new();
        let engine = flaky_engine(Duration::from_millis(150), &store, &queue);
        let pool = WorkerPool::spawn(1, Arc::clone(&engine), &shutdown);

        engine.submit(PaymentSubmission::new("in-flight", dec!(9.99), chrono::Utc::now()));
        shutdown.trigger();

        let report = pool.shutdown(Duration::from_secs(2)).await;
        assert_eq!(report, DrainReport { dispatched: 1, abandoned: 0 });
        assert_eq!(queue.queue_len(), 0);
        assert_eq!(store.records().await[0].correlation_id, "in-flight");
        assert!(engine.in_flight_payments().is_empty());
    }

    #[tokio::test]
    async fn dispatch_still_running_at_deadline_is_abandoned() {
        let store = InMemoryPaymentStore::new();
        let queue = Arc::new(RetryQueue::new(16, 4));
        let shutdown = Shutdown::new();
        let engine = flaky_engine(Duration::from_secs(30), &store, &queue);
        let pool = WorkerPool::spawn(1, Arc::clone(&engine), &shutdown);

        engine.submit(PaymentSubmission::new("stuck", dec!(1.00), chrono::Utc::now()));
        shutdown.trigger();

        let report = pool.shutdown(Duration::from_millis(200)).await;
        assert_eq!(report, DrainReport { dispatched: 0, abandoned: 1 });
        assert!(store.is_empty().await);
        assert_eq!(engine.in_flight_payments()[0].correlation_id, "stuck");
    }

    #[tokio::test]
    async fn zero_drain_still_waits_for_in_flight_work() {
        let store = InMemoryPaymentStore::new();
        let queue = Arc::new(RetryQueue::new(16, 4));
        let shutdown = Shutdown::new();
        let engine = engine(200, &store, &queue);
        let pool = WorkerPool::spawn(1, Arc::clone(&engine), &shutdown);

        engine.submit(PaymentSubmission::new("direct", dec!(1.00), chrono::Utc::now()));
        shutdown.trigger();
        let report = pool.shutdown(Duration::ZERO).await;
        assert_eq!(report, DrainReport::default());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn drain_dispatch_cut_off_by_deadline_is_abandoned() {
        let store = InMemoryPaymentStore::new();
        let queue = Arc::new(RetryQueue::new(16, 4));
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let engine = flaky_engine(Duration::from_secs(30), &store, &queue);
        let pool = WorkerPool::spawn(1, Arc::clone(&engine), &shutdown);

        queue.send(item("queued"));
        let report = pool.shutdown(Duration::from_millis(200)).await;
        assert_eq!(report, DrainReport { dispatched: 0, abandoned: 1 });
        assert_eq!(queue.queue_len(), 0);
        assert!(engine.in_flight_payments().is_empty());
        assert!(engine.take_dropped_payments().is_empty());
    }
}
