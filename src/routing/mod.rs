//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! ParsedRequest (method, target, body)
//!     → router.rs (Route::resolve)
//!         POST /payments          → parse body → DispatchEngine::submit → 200
//!         GET  /payments-summary  → query.rs → PaymentStore::summary → 200 JSON
//!         other GET/POST          → 404
//!         other methods           → 405
//! ```
//!
//! # Design Decisions
//! - Two fixed routes; no route table or configuration
//! - Deterministic: same input always matches same route

pub mod query;
pub mod router;

pub use query::{parse_summary_query, QueryError};
pub use router::{Route, Router};
