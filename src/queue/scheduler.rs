//! Periodic background tasks.
//!
//! # Responsibilities
//! - Run a unit of work on a fixed interval until shutdown
//! - Move spilled submissions back into the queue
//!
//! # Design Decisions
//! - Errors from the work are logged and the ticker keeps going
//! - Missed ticks are delayed, not bunched, so a slow cycle never causes a burst

use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::ShutdownSignal;
use crate::queue::retry_queue::RetryQueue;

/// Spawn `work` every `period` until `shutdown` fires.
pub fn spawn_periodic<F, Fut, E>(
    name: &'static str,
    period: Duration,
    mut shutdown: ShutdownSignal,
    mut work: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
    E: Display + Send,
{
    tokio::spawn(async move {
        tracing::info!(task = name, period_ms = period.as_millis() as u64, "Periodic task starting");
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = work().await {
                        tracing::warn!(task = name, error = %e, "Periodic task failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!(task = name, "Periodic task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}

/// Drain the spill list back into the queue whenever it is non-empty.
pub fn spawn_spill_retry(queue: Arc<RetryQueue>, period: Duration, shutdown: ShutdownSignal) -> JoinHandle<()> {
    spawn_periodic("spill-retry", period, shutdown, move || {
        let queue = Arc::clone(&queue);
        async move {
            let pending = queue.spill_len();
            if pending > 0 {
                let moved = queue.retry_spill();
                tracing::debug!(moved, remaining = pending - moved, "Spill drain cycle");
            }
            Ok::<(), Infallible>(())
        }
    })
}
