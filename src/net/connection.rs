//! Connection manager and lifecycle tracking.
//!
//! # Responsibilities
//! - Own each connection's byte buffer and keep-alive flag
//! - Decode every complete frame after each read, in order, and reply
//! - Close on `Connection: close`, framing errors, deadline or shutdown
//! - Generate unique connection IDs and count open connections
//!
//! # Design Decisions
//! - All responses produced by one read are written with a single `write_all`
//! - The deadline is fixed at open + `idle_secs`; activity does not extend it
//! - Keep-alive is per connection: one client's `close` never affects another

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep_until, Instant};

use crate::http::request::{ConnectionBuffer, RequestDecoder};
use crate::http::response::{BufferPool, Response};
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::routing::Router;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks active connections for status reporting and graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened();
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or `timeout` passes. Returns the count still open.
    pub async fn wait_for_idle(&self, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        while self.active_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.active_count()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::connection_closed();
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Why a connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    KeepAliveOff,
    FramingError,
    Deadline,
    Shutdown,
    Io,
}

/// Everything a connection needs to serve requests; shared by all connections.
pub struct ConnectionHandler {
    router: Arc<Router>,
    decoder: RequestDecoder,
    pool: Arc<BufferPool>,
    lifetime: Duration,
}

impl ConnectionHandler {
    pub fn new(router: Arc<Router>, decoder: RequestDecoder, pool: Arc<BufferPool>, lifetime: Duration) -> Self {
        Self {
            router,
            decoder,
            pool,
            lifetime,
        }
    }

    /// Serve one connection until it closes.
    pub async fn serve<S>(
        &self,
        mut stream: S,
        peer: SocketAddr,
        guard: ConnectionGuard,
        mut shutdown: ShutdownSignal,
    ) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = Instant::now() + self.lifetime;
        let mut buffer = ConnectionBuffer::with_capacity(4 * 1024);
        let mut keep_alive = true;

        let reason = loop {
            let read = tokio::select! {
                read = stream.read_buf(buffer.as_read_buf()) => read,
                _ = sleep_until(deadline) => break CloseReason::Deadline,
                _ = shutdown.recv() => break CloseReason::Shutdown,
            };
            match read {
                Ok(0) => break CloseReason::PeerClosed,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(connection_id = %guard.id(), error = %e, "Read failed");
                    break CloseReason::Io;
                }
            }

            let mut out = self.pool.acquire();
            let mut close = None;
            loop {
                match buffer.next_frame(&self.decoder) {
                    Ok(None) => break,
                    Ok(Some(request)) => {
                        if request.wants_close() {
                            keep_alive = false;
                        }
                        let response = self.router.handle(&request).await;
                        response.encode(keep_alive, &mut out);
                        if !keep_alive {
                            close = Some(CloseReason::KeepAliveOff);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(
                            connection_id = %guard.id(),
                            peer_addr = %peer,
                            error = %e,
                            "Rejecting malformed request"
                        );
                        Response::new(e.status(), e.body()).encode(false, &mut out);
                        close = Some(CloseReason::FramingError);
                        break;
                    }
                }
            }

            if !out.is_empty() {
                if let Err(e) = stream.write_all(&out).await {
                    tracing::debug!(connection_id = %guard.id(), error = %e, "Write failed");
                    break CloseReason::Io;
                }
            }
            if let Some(reason) = close {
                break reason;
            }
        };

        let _ = stream.shutdown().await;
        tracing::trace!(connection_id = %guard.id(), peer_addr = %peer, ?reason, "Connection finished");
        reason
    }
}
