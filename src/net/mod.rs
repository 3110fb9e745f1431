//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits, TCP_NODELAY)
//!     → connection.rs (buffer, decode, route, encode, keep-alive, deadline)
//!
//! Connection lifetime:
//!     Accepted → Serving (any number of pipelined requests) → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for status reporting and graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{CloseReason, ConnectionHandler, ConnectionTracker};
pub use listener::{Listener, ListenerError};
