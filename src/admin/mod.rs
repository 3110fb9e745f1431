//! Authenticated admin API.
//!
//! Served on its own address, separate from the payment listener:
//! - `GET  /admin/status`           queue depth, spill size, dead letters, connections
//! - `POST /admin/purge-payments`   delete every stored payment
//! - `GET  /admin/undeliverable`    submissions that exhausted their retries

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::lifecycle::ShutdownSignal;
use crate::net::ConnectionTracker;
use crate::payments::store::PaymentStore;
use crate::queue::RetryQueue;

use self::auth::admin_auth_middleware;
use self::handlers::{get_status, get_undeliverable, purge_payments};

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub queue: Arc<RetryQueue>,
    pub store: Arc<dyn PaymentStore>,
    pub connections: ConnectionTracker,
    pub api_key: Arc<str>,
    pub store_timeout: Duration,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/purge-payments", post(purge_payments))
        .route("/admin/undeliverable", get(get_undeliverable))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on `listener` until `shutdown` fires.
pub async fn serve(listener: TcpListener, state: AdminState, mut shutdown: ShutdownSignal) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await
}
