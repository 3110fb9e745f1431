//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection bytes
//!     → request.rs (ConnectionBuffer + RequestDecoder → ParsedRequest)
//!     → [routing layer produces a Response]
//!     → response.rs (encode with keep-alive/close, pooled buffer)
//!     → write to socket
//!
//! server.rs: accept loop spawning one connection task per client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{ConnectionBuffer, Decoded, FrameError, ParsedRequest, RequestDecoder};
pub use response::{BufferPool, Response};
pub use server::HttpServer;
