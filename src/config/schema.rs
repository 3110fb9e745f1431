//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the payment gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Tokio runtime sizing.
    pub runtime: RuntimeConfig,

    /// Connection and downstream timeouts.
    pub timeouts: TimeoutConfig,

    /// Request framing limits.
    pub limits: LimitsConfig,

    /// Downstream payment processor addresses.
    pub processors: ProcessorsConfig,

    /// Direct dispatch settings.
    pub dispatch: DispatchConfig,

    /// Bounded queue and worker pool.
    pub queue: QueueConfig,

    /// Retry policy for submissions both processors refused.
    pub retries: RetryConfig,

    /// Storage backend.
    pub storage: StorageConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Event loop threads. 0 means one per CPU core.
    pub worker_threads: usize,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection lifetime in seconds, measured from accept.
    pub idle_secs: u64,

    /// Processor connection establishment timeout in milliseconds.
    pub processor_connect_ms: u64,

    /// Processor request timeout (total time for request/response) in milliseconds.
    pub processor_request_ms: u64,

    /// Deadline for a single storage call in milliseconds.
    pub storage_ms: u64,
}

impl TimeoutConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn processor_connect(&self) -> Duration {
        Duration::from_millis(self.processor_connect_ms)
    }

    pub fn processor_request(&self) -> Duration {
        Duration::from_millis(self.processor_request_ms)
    }

    pub fn storage(&self) -> Duration {
        Duration::from_millis(self.storage_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: 60,
            processor_connect_ms: 500,
            processor_request_ms: 2_000,
            storage_ms: 2_000,
        }
    }
}

/// Request framing limits.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of the request line plus headers, in bytes.
    pub max_header_bytes: usize,

    /// Maximum declared body size, in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Downstream processor addresses.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessorsConfig {
    /// Base URL of the primary processor.
    pub default_url: String,

    /// Base URL of the secondary processor.
    pub fallback_url: String,
}

impl Default for ProcessorsConfig {
    fn default() -> Self {
        Self {
            default_url: "http://payment-processor-default:8080".to_string(),
            fallback_url: "http://payment-processor-fallback:8080".to_string(),
        }
    }
}

/// Direct dispatch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum submissions dispatched directly at once; overflow goes to the queue.
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_in_flight: 512 }
    }
}

/// Queue and worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity of the bounded queue.
    pub capacity: usize,

    /// Number of worker tasks draining the queue.
    pub workers: usize,

    /// Interval between spill drain cycles in milliseconds.
    pub retry_interval_ms: u64,

    /// Maximum undeliverable submissions kept for inspection.
    pub dead_letter_capacity: usize,
}

impl QueueConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            workers: 16,
            retry_interval_ms: 300,
            dead_letter_capacity: 1_024,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of dispatch cycles per submission. `None` retries forever.
    pub max_attempts: Option<u32>,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// Records kept in process memory.
    Memory,
    /// Records kept in PostgreSQL.
    Postgres(PostgresConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            dbname: "payments".to_string(),
            pool_size: 32,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long queued submissions may keep dispatching after cancellation.
    /// 0 stops workers immediately and abandons queued items.
    pub drain_timeout_secs: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 5,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Placeholder admin key; validation rejects it when the admin API is enabled.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.queue.capacity, 10_000);
        assert_eq!(config.retries.max_attempts, None);
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.observability.log_format, LogFormat::Compact);
    }

    #[test]
    fn postgres_storage_section() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [storage]
            type = "postgres"
            host = "db"
            dbname = "rinha"
            "#,
        )
        .unwrap();

        match config.storage {
            StorageConfig::Postgres(pg) => {
                assert_eq!(pg.host, "db");
                assert_eq!(pg.dbname, "rinha");
                assert_eq!(pg.port, 5432);
            }
            other => panic!("unexpected storage: {:?}", other),
        }
    }
}
