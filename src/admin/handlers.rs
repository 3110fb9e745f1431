use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::queue::Undeliverable;
use crate::resilience::with_timeout;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub spill_size: usize,
    pub undeliverable: usize,
    pub active_connections: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        queue_depth: state.queue.queue_len(),
        queue_capacity: state.queue.capacity(),
        spill_size: state.queue.spill_len(),
        undeliverable: state.queue.dead_letter_len(),
        active_connections: state.connections.active_count(),
    })
}

pub async fn purge_payments(
    State(state): State<AdminState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let result = with_timeout("purge payments", state.store_timeout, state.store.purge()).await;
    let error = match result {
        Ok(Ok(())) => {
            tracing::info!("All payment records purged");
            return Ok(Json(serde_json::json!({ "purged": true })));
        }
        Ok(Err(e)) => e.to_string(),
        Err(e) => e.to_string(),
    };
    tracing::error!(error = %error, "Purge failed");
    Err((
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": error })),
    ))
}

pub async fn get_undeliverable(State(state): State<AdminState>) -> Json<Vec<Undeliverable>> {
    Json(state.queue.dead_letters())
}
