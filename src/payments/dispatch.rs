//! Payment dispatch engine.
//!
//! # Responsibilities
//! - Try the default processor, fail over to the fallback
//! - Classify processor answers: 2xx accepted, 422 rejected, anything else failed
//! - Persist accepted payments off the critical path
//! - Requeue submissions both processors failed, until the retry policy gives up
//!
//! # State machine
//! ```text
//! Received → DefaultAttempt ─2xx──────────────→ RecordedDefault
//!                 │ ─422──────────────────────→ Rejected
//!                 └ other/transport → FallbackAttempt ─2xx→ RecordedFallback
//!                                          │ ─422────────→ Rejected
//!                                          └ other ──────→ Requeued | Undeliverable
//! ```
//!
//! # Design Decisions
//! - Direct dispatch is bounded by a semaphore; overflow goes to the queue instead of waiting
//! - Persistence failures are logged and counted, never retried: the processor has already charged
//! - 422 is terminal because the processor has judged the payment itself, not its own health
//! - Every detached task runs on a tracker so shutdown can wait for it
//! - A submission stays in the in-flight registry from the moment it leaves the queue until
//!   its record is stored, so shutdown can name anything it gives up on; a cancelled task
//!   leaves its entry behind in a dropped list

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep_until;
use tokio_util::task::TaskTracker;

use crate::observability::metrics;
use crate::payments::processor::{PaymentProcessor, ProcessorError};
use crate::payments::store::PaymentStore;
use crate::payments::types::{PaymentRecord, PaymentSubmission, Processor};
use crate::queue::retry_queue::{QueueItem, RetryQueue, Undeliverable};
use crate::resilience::{with_timeout, RetryPolicy};

/// Terminal result of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A processor accepted the payment; a record is being persisted.
    Recorded(Processor),
    /// A processor refused the payment with 422. Nothing stored, no retry.
    Rejected(Processor),
    /// Both processors failed; the submission went back to the queue.
    Requeued { attempts: u32 },
    /// Both processors failed and the retry policy is exhausted.
    Undeliverable { attempts: u32 },
}

/// How a single processor call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accepted,
    Rejected,
    Failed,
}

impl Verdict {
    fn of(result: &Result<u16, ProcessorError>) -> Self {
        match result {
            Ok(status) if (200..300).contains(status) => Verdict::Accepted,
            Ok(422) => Verdict::Rejected,
            _ => Verdict::Failed,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::Rejected => "rejected",
            Verdict::Failed => "failed",
        }
    }
}

/// Where an in-flight submission is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Waiting,
    Dispatching,
    Persisting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Waiting => "waiting",
            Stage::Dispatching => "dispatching",
            Stage::Persisting => "persisting",
        }
    }
}

/// A submission that has left the queue but has not reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightPayment {
    pub correlation_id: String,
    pub stage: Stage,
}

#[derive(Debug, Default)]
struct RegistryState {
    live: HashMap<u64, InFlightPayment>,
    /// Entries whose task was dropped before reaching a terminal state.
    dropped: Vec<InFlightPayment>,
}

#[derive(Debug, Default)]
struct InFlightRegistry {
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

impl InFlightRegistry {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(self: &Arc<Self>, correlation_id: &str, stage: Stage) -> InFlightGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().live.insert(
            id,
            InFlightPayment {
                correlation_id: correlation_id.to_string(),
                stage,
            },
        );
        InFlightGuard {
            registry: Arc::clone(self),
            id,
            finished: false,
        }
    }

    fn snapshot(&self) -> Vec<InFlightPayment> {
        self.lock().live.values().cloned().collect()
    }

    fn take_dropped(&self) -> Vec<InFlightPayment> {
        std::mem::take(&mut self.lock().dropped)
    }
}

/// Keeps a submission in the registry until it finishes or is dropped.
///
/// Dropping without [`InFlightGuard::finish`] means the owning task was
/// cancelled, and the entry moves to the dropped list.
struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    id: u64,
    finished: bool,
}

impl InFlightGuard {
    fn advance(&self, stage: Stage) {
        if let Some(entry) = self.registry.lock().live.get_mut(&self.id) {
            entry.stage = stage;
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.registry.lock();
        if let Some(entry) = state.live.remove(&self.id) {
            if !self.finished {
                state.dropped.push(entry);
            }
        }
    }
}

/// Routes submissions to processors and owns the failover policy.
pub struct DispatchEngine {
    default: Arc<dyn PaymentProcessor>,
    fallback: Arc<dyn PaymentProcessor>,
    store: Arc<dyn PaymentStore>,
    queue: Arc<RetryQueue>,
    retry: RetryPolicy,
    in_flight: Arc<Semaphore>,
    store_timeout: Duration,
    tasks: TaskTracker,
    pending: Arc<InFlightRegistry>,
}

impl DispatchEngine {
    pub fn new(
        default: Arc<dyn PaymentProcessor>,
        fallback: Arc<dyn PaymentProcessor>,
        store: Arc<dyn PaymentStore>,
        queue: Arc<RetryQueue>,
        retry: RetryPolicy,
        max_in_flight: usize,
    ) -> Self {
        Self {
            default,
            fallback,
            store,
            queue,
            retry,
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            store_timeout: Duration::from_secs(2),
            tasks: TaskTracker::new(),
            pending: Arc::new(InFlightRegistry::default()),
        }
    }

    /// Deadline applied to each background insert.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    /// Wait for every detached dispatch and insert to finish.
    ///
    /// Tasks spawned while waiting are waited for too.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Submissions currently between the queue and a terminal state.
    pub fn in_flight_payments(&self) -> Vec<InFlightPayment> {
        self.pending.snapshot()
    }

    /// Submissions whose task was cancelled mid-cycle since the last call.
    pub fn take_dropped_payments(&self) -> Vec<InFlightPayment> {
        self.pending.take_dropped()
    }

    /// Hand a freshly received submission over. Never blocks.
    ///
    /// With a free in-flight slot the cycle runs on a detached task; otherwise
    /// the submission is queued for the worker pool.
    pub fn submit(self: &Arc<Self>, submission: PaymentSubmission) {
        let item = QueueItem::new(submission);
        match Arc::clone(&self.in_flight).try_acquire_owned() {
            Ok(permit) => {
                let engine = Arc::clone(self);
                self.tasks.spawn(async move {
                    engine.dispatch(item).await;
                    drop(permit);
                });
            }
            Err(_) => {
                tracing::debug!(
                    correlation_id = %item.correlation_id(),
                    "Dispatch slots exhausted, queueing submission"
                );
                self.queue.send(item);
            }
        }
    }

    /// Run one full cycle: default, then fallback, then requeue.
    pub async fn dispatch(&self, item: QueueItem) -> DispatchOutcome {
        let guard = self.pending.register(item.correlation_id(), Stage::Dispatching);
        self.run_cycle(item, guard).await
    }

    /// Wait out the item's not-before instant, then run one cycle.
    ///
    /// The item counts as in flight while it waits.
    pub async fn dispatch_when_due(&self, item: QueueItem) -> DispatchOutcome {
        let guard = self.pending.register(item.correlation_id(), Stage::Waiting);
        if let Some(not_before) = item.not_before {
            sleep_until(not_before).await;
        }
        guard.advance(Stage::Dispatching);
        self.run_cycle(item, guard).await
    }

    async fn run_cycle(&self, item: QueueItem, guard: InFlightGuard) -> DispatchOutcome {
        for processor in [&self.default, &self.fallback] {
            let kind = processor.kind();
            let result = processor.submit(&item.submission).await;
            let verdict = Verdict::of(&result);
            metrics::record_dispatch(kind, verdict.label());

            match verdict {
                Verdict::Accepted => {
                    tracing::debug!(
                        correlation_id = %item.correlation_id(),
                        processor = %kind,
                        attempt = item.attempts + 1,
                        "Payment accepted"
                    );
                    guard.advance(Stage::Persisting);
                    self.persist(item.submission.into_record(kind), guard);
                    return DispatchOutcome::Recorded(kind);
                }
                Verdict::Rejected => {
                    tracing::warn!(
                        correlation_id = %item.correlation_id(),
                        processor = %kind,
                        "Payment rejected by processor"
                    );
                    guard.finish();
                    return DispatchOutcome::Rejected(kind);
                }
                Verdict::Failed => match result {
                    Ok(status) => tracing::debug!(
                        correlation_id = %item.correlation_id(),
                        processor = %kind,
                        status,
                        "Processor refused payment"
                    ),
                    Err(e) => tracing::debug!(
                        correlation_id = %item.correlation_id(),
                        processor = %kind,
                        error = %e,
                        "Processor unreachable"
                    ),
                },
            }
        }

        // Out of the registry before it is visible in the queue, never in both.
        guard.finish();
        self.requeue(item)
    }

    fn requeue(&self, item: QueueItem) -> DispatchOutcome {
        let attempts = item.attempts + 1;
        match self.retry.next_delay(attempts) {
            Some(delay) => {
                tracing::debug!(
                    correlation_id = %item.correlation_id(),
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Both processors failed, requeueing"
                );
                self.queue.send(item.retry(attempts, delay));
                metrics::record_requeued();
                DispatchOutcome::Requeued { attempts }
            }
            None => {
                tracing::error!(
                    correlation_id = %item.correlation_id(),
                    attempts,
                    "Payment undeliverable, retry attempts exhausted"
                );
                metrics::record_undeliverable();
                self.queue.push_dead_letter(Undeliverable {
                    submission: item.submission,
                    attempts,
                    given_up_at: Utc::now(),
                });
                DispatchOutcome::Undeliverable { attempts }
            }
        }
    }

    /// Fire-and-forget insert of an accepted payment.
    fn persist(&self, record: PaymentRecord, guard: InFlightGuard) {
        let store = Arc::clone(&self.store);
        let limit = self.store_timeout;
        self.tasks.spawn(async move {
            let correlation_id = record.correlation_id.clone();
            let result = with_timeout("insert payment", limit, store.insert(record)).await;
            guard.finish();
            let error = match result {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            metrics::record_persist_failure();
            tracing::error!(
                correlation_id = %correlation_id,
                error = %error,
                "Failed to persist accepted payment"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::store::InMemoryPaymentStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

    struct Scripted {
        kind: Processor,
        status: AtomicU16,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(kind: Processor, status: u16) -> Arc<Self> {
            Arc::new(Self {
                kind,
                status: AtomicU16::new(status),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentProcessor for Scripted {
        fn kind(&self) -> Processor {
            self.kind
        }

        async fn submit(&self, _: &PaymentSubmission) -> Result<u16, ProcessorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.status.load(Ordering::SeqCst) {
                0 => Err(ProcessorError::Transport(self.kind, "connection refused".into())),
                status => Ok(status),
            }
        }
    }

    struct Harness {
        engine: Arc<DispatchEngine>,
        default: Arc<Scripted>,
        fallback: Arc<Scripted>,
        store: InMemoryPaymentStore,
        queue: Arc<RetryQueue>,
    }

    fn harness(default_status: u16, fallback_status: u16, retry: RetryPolicy) -> Harness {
        let default = Scripted::new(Processor::Default, default_status);
        let fallback = Scripted::new(Processor::Fallback, fallback_status);
        let store = InMemoryPaymentStore::new();
        let queue = Arc::new(RetryQueue::new(16, 16));
        let engine = Arc::new(DispatchEngine::new(
            default.clone(),
            fallback.clone(),
            Arc::new(store.clone()),
            Arc::clone(&queue),
            retry,
            4,
        ));
        Harness {
            engine,
            default,
            fallback,
            store,
            queue,
        }
    }

    fn submission(id: &str) -> PaymentSubmission {
        PaymentSubmission::new(id, dec!(19.90), Utc::now())
    }

    async fn wait_for_records(store: &InMemoryPaymentStore, n: usize) -> Vec<PaymentRecord> {
        for _ in 0..100 {
            if store.len().await >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        store.records().await
    }

    #[tokio::test]
    async fn default_success_records_default() {
        let h = harness(200, 200, RetryPolicy::default());
        let outcome = h.engine.dispatch(QueueItem::new(submission("a"))).await;
        assert_eq!(outcome, DispatchOutcome::Recorded(Processor::Default));

        let records = wait_for_records(&h.store, 1).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].processor, Processor::Default);
        assert_eq!(h.fallback.calls(), 0);
    }

    #[tokio::test]
    async fn default_down_fallback_up_records_fallback() {
        let h = harness(0, 201, RetryPolicy::default());
        let outcome = h.engine.dispatch(QueueItem::new(submission("abc-123"))).await;
        assert_eq!(outcome, DispatchOutcome::Recorded(Processor::Fallback));

        let records = wait_for_records(&h.store, 1).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].correlation_id, "abc-123");
        assert_eq!(records[0].amount, dec!(19.90));
        assert_eq!(records[0].processor, Processor::Fallback);
    }

    #[tokio::test]
    async fn unprocessable_is_terminal() {
        let h = harness(422, 200, RetryPolicy::default());
        let outcome = h.engine.dispatch(QueueItem::new(submission("a"))).await;
        assert_eq!(outcome, DispatchOutcome::Rejected(Processor::Default));
        assert_eq!(h.fallback.calls(), 0);

        let h = harness(500, 422, RetryPolicy::default());
        let outcome = h.engine.dispatch(QueueItem::new(submission("b"))).await;
        assert_eq!(outcome, DispatchOutcome::Rejected(Processor::Fallback));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.store.is_empty().await);
        assert_eq!(h.queue.queue_len(), 0);
    }

    #[tokio::test]
    async fn both_failing_requeues_with_backoff() {
        let h = harness(503, 0, RetryPolicy::unlimited(50, 1_000));
        let outcome = h.engine.dispatch(QueueItem::new(submission("a"))).await;
        assert_eq!(outcome, DispatchOutcome::Requeued { attempts: 1 });

        let queued = h.queue.try_next().await.unwrap();
        assert_eq!(queued.attempts, 1);
        assert!(queued.not_before.is_some());
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn attempt_cap_makes_submission_undeliverable() {
        let policy = RetryPolicy {
            max_attempts: Some(2),
            base_delay_ms: 1,
            max_delay_ms: 1,
        };
        let h = harness(500, 500, policy);

        let first = h.engine.dispatch(QueueItem::new(submission("a"))).await;
        assert_eq!(first, DispatchOutcome::Requeued { attempts: 1 });
        let item = h.queue.try_next().await.unwrap();
        let second = h.engine.dispatch(item).await;
        assert_eq!(second, DispatchOutcome::Undeliverable { attempts: 2 });

        assert!(h.queue.try_next().await.is_none());
        assert_eq!(h.default.calls(), 2);
        assert_eq!(h.fallback.calls(), 2);
        let dead = h.queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].submission.correlation_id, "a");
        assert_eq!(dead[0].attempts, 2);
    }

    #[tokio::test]
    async fn submit_overflows_to_queue_when_slots_exhausted() {
        let h = harness(200, 200, RetryPolicy::default());
        let held = Arc::clone(&h.engine.in_flight).acquire_many_owned(4).await.unwrap();

        h.engine.submit(submission("queued"));
        assert_eq!(h.queue.queue_len(), 1);
        drop(held);

        h.engine.submit(submission("direct"));
        let records = wait_for_records(&h.store, 1).await;
        assert_eq!(records[0].correlation_id, "direct");
        assert_eq!(h.queue.queue_len(), 1);
    }

    #[tokio::test]
    async fn wait_idle_covers_detached_dispatch_and_insert() {
        let h = harness(200, 200, RetryPolicy::default());
        h.engine.submit(submission("idle"));
        h.engine.wait_idle().await;
        assert_eq!(h.store.len().await, 1);
        assert!(h.engine.in_flight_payments().is_empty());
    }

    #[tokio::test]
    async fn requeued_item_is_no_longer_in_flight() {
        let h = harness(500, 500, RetryPolicy::unlimited(10, 10));
        h.engine.dispatch(QueueItem::new(submission("again"))).await;
        assert!(h.engine.in_flight_payments().is_empty());
        assert_eq!(h.queue.queue_len(), 1);
    }

    #[tokio::test]
    async fn cancelled_cycle_is_reported_as_dropped() {
        let h = harness(200, 200, RetryPolicy::default());
        let item = QueueItem::new(submission("cut")).retry(1, Duration::from_secs(30));

        let engine = Arc::clone(&h.engine);
        let task = tokio::spawn(async move { engine.dispatch_when_due(item).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.engine.in_flight_payments()[0].stage, Stage::Waiting);

        task.abort();
        let _ = task.await;
        assert!(h.engine.in_flight_payments().is_empty());
        let dropped = h.engine.take_dropped_payments();
        assert_eq!(dropped[0].correlation_id, "cut");
        assert!(h.engine.take_dropped_payments().is_empty());
        assert_eq!(h.default.calls(), 0);
    }
}
