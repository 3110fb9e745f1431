//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Open storage → Build processors, queue, engine → Start workers + scheduler
//!     → Start admin API → Accept payment traffic
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Connections finish → Scheduler stops
//!     → Workers drain queue until deadline → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: storage first, listeners last
//! - Ordered shutdown: stop accept, drain, close
//! - The queue drain has a deadline; whatever is left is logged and dropped

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::{spawn_signal_handler, wait_for_signal};
pub use startup::{Gateway, StartupError};
