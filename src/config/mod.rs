//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overrides: START_PORT, DEFAULT_URL, DB_*, ...)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → values handed to each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; queue capacity and worker count are fixed at startup
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, DispatchConfig, GatewayConfig, LimitsConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, PostgresConfig, ProcessorsConfig, QueueConfig, RetryConfig,
    ShutdownConfig, StorageConfig, TimeoutConfig,
};
