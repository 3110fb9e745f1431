//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Both processors refused a submission:
//!     → retries.rs (attempt cap reached? → undeliverable)
//!     → backoff.rs (how long until the next cycle)
//!     → queue (requeue with a not-before instant)
//!
//! Storage call:
//!     → timeouts.rs (deadline)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries are bounded by policy, never by accident

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::RetryPolicy;
pub use timeouts::{with_timeout, TimeoutError};
