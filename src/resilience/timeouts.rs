//! Deadline enforcement for external calls.
//!
//! Processor calls carry their own deadline inside the HTTP client; this
//! wrapper bounds everything else (storage queries, startup pings).

use std::future::Future;
use std::time::Duration;

/// Raised when an operation outlives its deadline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} timed out after {elapsed:?}")]
pub struct TimeoutError {
    pub operation: &'static str,
    pub elapsed: Duration,
}

/// Run `future`, failing with [`TimeoutError`] if it takes longer than `limit`.
pub async fn with_timeout<F, T>(operation: &'static str, limit: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| TimeoutError {
            operation,
            elapsed: limit,
        })
}
