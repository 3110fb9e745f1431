//! HTTP server accept loop.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Spawn one task per connection running the connection manager
//! - Stop accepting on shutdown and let open connections wind down

use std::sync::Arc;
use std::time::Duration;

use crate::config::LimitsConfig;
use crate::http::request::RequestDecoder;
use crate::http::response::BufferPool;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionHandler, ConnectionTracker, Listener, ListenerError};
use crate::routing::Router;

/// Idle write buffers kept for reuse across connections.
const POOLED_BUFFERS: usize = 1024;
const BUFFER_CAPACITY: usize = 4 * 1024;

/// HTTP server for the payment gateway.
pub struct HttpServer {
    handler: Arc<ConnectionHandler>,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Create a server; `lifetime` is the per-connection deadline.
    pub fn new(router: Arc<Router>, limits: LimitsConfig, lifetime: Duration) -> Self {
        let handler = ConnectionHandler::new(
            router,
            RequestDecoder::new(limits),
            BufferPool::new(POOLED_BUFFERS, BUFFER_CAPACITY),
            lifetime,
        );
        Self {
            handler: Arc::new(handler),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Open-connection counter shared with status reporting.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Run the accept loop until `shutdown` fires.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ListenerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "HTTP server starting");
        }
        let mut stop = shutdown.subscribe();

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = stop.recv() => break,
            };

            let (stream, peer, permit) = match accepted {
                Ok(conn) => conn,
                Err(ListenerError::Accept(e)) => {
                    // Usually fd exhaustion; back off briefly instead of spinning.
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let handler = Arc::clone(&self.handler);
            let guard = self.tracker.track();
            let signal = shutdown.subscribe();
            tokio::spawn(async move {
                handler.serve(stream, peer, guard, signal).await;
                drop(permit);
            });
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "HTTP server stopped accepting"
        );
        Ok(())
    }
}
