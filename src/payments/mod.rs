//! Payments subsystem.
//!
//! # Data Flow
//! ```text
//! POST /payments body
//!     → types.rs (PaymentSubmission, stamped at receipt)
//!     → dispatch.rs (default → fallback → requeue)
//!     → processor.rs (HTTP call to a processor)
//!     → store.rs / postgres.rs (record accepted payments)
//!
//! GET /payments-summary
//!     → store.rs (aggregate by processor over a time window)
//! ```

pub mod dispatch;
pub mod postgres;
pub mod processor;
pub mod store;
pub mod types;

pub use dispatch::{DispatchEngine, DispatchOutcome, InFlightPayment, Stage};
pub use processor::{HttpProcessor, PaymentProcessor, ProcessorError};
pub use store::{InMemoryPaymentStore, PaymentStore, StoreError};
pub use types::{PaymentRecord, PaymentSubmission, PaymentSummary, Processor, SummaryRange};
