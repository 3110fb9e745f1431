//! Queue & retry subsystem.
//!
//! # Data Flow
//! ```text
//! DispatchEngine::submit (no free slot) ─┐
//! DispatchEngine requeue (both failed) ──┴→ retry_queue.rs send()
//!                                              ├─ queue has room → bounded queue
//!                                              └─ queue full     → spill list
//!
//! workers.rs   : bounded queue → wait for not-before → DispatchEngine::dispatch
//! scheduler.rs : every retry_interval, spill → bounded queue (order preserved)
//! ```
//!
//! # Design Decisions
//! - Producers never block; spill is unbounded so nothing is dropped under pressure
//! - Queue capacity and worker count are fixed at startup

pub mod retry_queue;
pub mod scheduler;
pub mod workers;

pub use retry_queue::{QueueItem, RetryQueue, Undeliverable};
pub use scheduler::{spawn_periodic, spawn_spill_retry};
pub use workers::{DrainReport, WorkerPool};
