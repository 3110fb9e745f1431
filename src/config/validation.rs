//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, timeouts > 0, addresses parse)
//! - Validate processor base URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{GatewayConfig, PLACEHOLDER_API_KEY};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a fully-loaded configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.timeouts.idle_secs == 0 {
        errors.push(ValidationError::new("timeouts.idle_secs", "must be greater than 0"));
    }
    if config.timeouts.processor_request_ms == 0 {
        errors.push(ValidationError::new("timeouts.processor_request_ms", "must be greater than 0"));
    }
    if config.timeouts.storage_ms == 0 {
        errors.push(ValidationError::new("timeouts.storage_ms", "must be greater than 0"));
    }

    if config.limits.max_header_bytes == 0 {
        errors.push(ValidationError::new("limits.max_header_bytes", "must be greater than 0"));
    }

    check_processor_url(&mut errors, "processors.default_url", &config.processors.default_url);
    check_processor_url(&mut errors, "processors.fallback_url", &config.processors.fallback_url);

    if config.dispatch.max_in_flight == 0 {
        errors.push(ValidationError::new("dispatch.max_in_flight", "must be greater than 0"));
    }

    if config.queue.capacity == 0 {
        errors.push(ValidationError::new("queue.capacity", "must be greater than 0"));
    }
    if config.queue.workers == 0 {
        errors.push(ValidationError::new("queue.workers", "must be greater than 0"));
    }
    if config.queue.retry_interval_ms == 0 {
        errors.push(ValidationError::new("queue.retry_interval_ms", "must be greater than 0"));
    }

    if config.retries.max_attempts == Some(0) {
        errors.push(ValidationError::new(
            "retries.max_attempts",
            "must be at least 1 (omit for unlimited)",
        ));
    }
    if config.retries.max_delay_ms < config.retries.base_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            format!(
                "must be >= base_delay_ms ({} < {})",
                config.retries.max_delay_ms, config.retries.base_delay_ms
            ),
        ));
    }

    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be set to a real key when the admin API is enabled",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if let Err(e) = value.parse::<SocketAddr>() {
        errors.push(ValidationError::new(field, format!("invalid address {:?}: {}", value, e)));
    }
}

fn check_processor_url(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    match url::Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            if url.host_str().is_none() {
                errors.push(ValidationError::new(field, "missing host"));
            }
        }
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme {:?}", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid url {:?}: {}", value, e))),
    }
}
