//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, dispatch outcomes, queue pressure)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, route, status
//! - `gateway_request_duration_seconds` (histogram): handling latency by route
//! - `gateway_active_connections` (gauge): open client connections
//! - `gateway_dispatch_total` (counter): dispatch outcomes by processor
//! - `gateway_processor_duration_seconds` (histogram): processor round trip
//! - `gateway_persist_failures_total` (counter): records lost after a processor accepted them
//! - `gateway_queue_spilled_total` (counter) / `gateway_queue_spill_size` (gauge)
//! - `gateway_queue_requeued_total` (counter): submissions sent back for another cycle
//! - `gateway_payments_undeliverable_total` (counter): submissions that hit the attempt cap
//! - `gateway_queue_abandoned_total` (counter): queued or in-flight items left undelivered at shutdown
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed, so tests never need one
//! - Label values are static strings where possible to keep cardinality bounded

use std::net::SocketAddr;
use std::time::Instant;

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::payments::types::Processor;

pub use metrics_exporter_prometheus::BuildError;

/// Install the Prometheus recorder and its HTTP listener on `addr`.
///
/// Must run inside a Tokio runtime; the exporter spawns its listener there.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn describe() {
    describe_counter!("gateway_requests_total", "Requests handled, by method, route and status");
    describe_histogram!("gateway_request_duration_seconds", "Request handling latency");
    describe_gauge!("gateway_active_connections", "Open client connections");
    describe_counter!("gateway_dispatch_total", "Dispatch outcomes by processor");
    describe_histogram!("gateway_processor_duration_seconds", "Processor round-trip latency");
    describe_counter!("gateway_persist_failures_total", "Accepted payments that failed to persist");
    describe_counter!("gateway_queue_spilled_total", "Submissions diverted to the spill list");
    describe_gauge!("gateway_queue_spill_size", "Current spill list length");
    describe_counter!("gateway_queue_requeued_total", "Submissions requeued for another cycle");
    describe_counter!("gateway_payments_undeliverable_total", "Submissions that exhausted their attempts");
    describe_counter!("gateway_queue_abandoned_total", "Queued or in-flight submissions abandoned at shutdown");
}

pub fn record_request(method: &str, route: &'static str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method_label(method),
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

/// Clients choose the method token, so anything unknown shares one label.
fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "PATCH" => "PATCH",
        "HEAD" => "HEAD",
        "OPTIONS" => "OPTIONS",
        _ => "other",
    }
}

pub fn connection_opened() {
    gauge!("gateway_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("gateway_active_connections").decrement(1.0);
}

pub fn record_processor_call(processor: Processor, start: Instant) {
    histogram!("gateway_processor_duration_seconds", "processor" => processor.as_str())
        .record(start.elapsed().as_secs_f64());
}

/// `outcome` is one of `accepted`, `rejected`, `failed`.
pub fn record_dispatch(processor: Processor, outcome: &'static str) {
    counter!(
        "gateway_dispatch_total",
        "processor" => processor.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_persist_failure() {
    counter!("gateway_persist_failures_total").increment(1);
}

pub fn record_spilled(spill_size: usize) {
    counter!("gateway_queue_spilled_total").increment(1);
    set_spill_size(spill_size);
}

pub fn set_spill_size(spill_size: usize) {
    gauge!("gateway_queue_spill_size").set(spill_size as f64);
}

pub fn record_requeued() {
    counter!("gateway_queue_requeued_total").increment(1);
}

pub fn record_undeliverable() {
    counter!("gateway_payments_undeliverable_total").increment(1);
}

pub fn record_abandoned(count: usize) {
    counter!("gateway_queue_abandoned_total").increment(count as u64);
}
