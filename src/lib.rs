//! Payment gateway library.
//!
//! Accepts payment submissions over a minimal HTTP/1.1 front end, forwards
//! each one to a default processor with failover to a fallback, queues what
//! neither could take, and answers per-processor summaries from storage.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod payments;
pub mod queue;
pub mod resilience;
pub mod routing;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::{Gateway, Shutdown};
