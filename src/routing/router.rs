//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Map (method, target) to a handler
//! - Acknowledge payment submissions before they are processed
//! - Answer summary queries from storage
//!
//! # Design Decisions
//! - Immutable after construction (shared across connections without locks)
//! - `POST /payments` is answered 200 as soon as the body parses; processor errors never reach the client
//! - Explicit NotFound / MethodNotAllowed rather than a silent default

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::http::request::ParsedRequest;
use crate::http::response::Response;
use crate::observability::metrics;
use crate::payments::dispatch::DispatchEngine;
use crate::payments::store::PaymentStore;
use crate::payments::types::PaymentSubmission;
use crate::resilience::with_timeout;
use crate::routing::query::parse_summary_query;

pub const PAYMENTS_PATH: &str = "/payments";
pub const SUMMARY_PATH: &str = "/payments-summary";

/// Result of matching a request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    SubmitPayment,
    PaymentsSummary,
    NotFound,
    MethodNotAllowed,
}

impl Route {
    pub fn resolve(method: &str, target: &str, path: &str) -> Self {
        match method {
            "POST" if target == PAYMENTS_PATH => Route::SubmitPayment,
            "GET" if path == SUMMARY_PATH => Route::PaymentsSummary,
            "POST" | "GET" => Route::NotFound,
            _ => Route::MethodNotAllowed,
        }
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Route::SubmitPayment => "payments",
            Route::PaymentsSummary => "payments-summary",
            Route::NotFound => "not-found",
            Route::MethodNotAllowed => "method-not-allowed",
        }
    }
}

/// Request handler shared by every connection.
pub struct Router {
    engine: Arc<DispatchEngine>,
    store: Arc<dyn PaymentStore>,
    store_timeout: Duration,
}

impl Router {
    pub fn new(engine: Arc<DispatchEngine>, store: Arc<dyn PaymentStore>, store_timeout: Duration) -> Self {
        Self {
            engine,
            store,
            store_timeout,
        }
    }

    /// Produce the response for one request.
    pub async fn handle(&self, request: &ParsedRequest) -> Response {
        let start = Instant::now();
        let route = Route::resolve(&request.method, &request.target, request.path());

        let response = match route {
            Route::SubmitPayment => self.submit_payment(request),
            Route::PaymentsSummary => self.payments_summary(request).await,
            Route::NotFound => Response::error(404, "not found"),
            Route::MethodNotAllowed => Response::error(405, "method not allowed"),
        };

        metrics::record_request(&request.method, route.label(), response.status, start);
        response
    }

    fn submit_payment(&self, request: &ParsedRequest) -> Response {
        match PaymentSubmission::from_json(&request.body, Utc::now()) {
            Ok(submission) => {
                self.engine.submit(submission);
                Response::empty(200)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Rejecting unparseable payment body");
                Response::error(400, "invalid payment")
            }
        }
    }

    async fn payments_summary(&self, request: &ParsedRequest) -> Response {
        let range = match parse_summary_query(request.query()) {
            Ok(range) => range,
            Err(e) => return Response::error(400, &e.to_string()),
        };

        let summary = match with_timeout("payments summary", self.store_timeout, self.store.summary(range)).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Summary query failed");
                return Response::error(500, "summary unavailable");
            }
            Err(e) => {
                tracing::error!(error = %e, "Summary query failed");
                return Response::error(500, "summary unavailable");
            }
        };

        Response::json(200, &summary).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to encode summary");
            Response::error(500, "summary unavailable")
        })
    }
}
