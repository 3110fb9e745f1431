//! Configuration loading from disk and environment.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use crate::config::schema::{GatewayConfig, PostgresConfig, StorageConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {var}: {message}")]
    Env { var: &'static str, message: String },
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: TOML file (optional), then process environment, then validation.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GatewayConfig::default(),
    };

    let config = apply_env_overrides(config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply deployment environment variables on top of a parsed configuration.
///
/// `lookup` abstracts the environment so callers (and tests) decide where values come from.
pub fn apply_env_overrides<F>(mut config: GatewayConfig, lookup: F) -> Result<GatewayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("START_PORT") {
        let port: u16 = parse_env("START_PORT", &port)?;
        let bind = match config.listener.bind_address.parse::<SocketAddr>() {
            Ok(mut addr) => {
                addr.set_port(port);
                addr.to_string()
            }
            Err(_) => format!("0.0.0.0:{}", port),
        };
        config.listener.bind_address = bind;
    }

    if let Some(url) = lookup("DEFAULT_URL") {
        config.processors.default_url = url;
    }
    if let Some(url) = lookup("FALLBACK_URL") {
        config.processors.fallback_url = url;
    }
    config.processors.default_url = with_scheme(&config.processors.default_url);
    config.processors.fallback_url = with_scheme(&config.processors.fallback_url);

    if let Some(capacity) = lookup("QUEUE_BUFFER") {
        config.queue.capacity = parse_env("QUEUE_BUFFER", &capacity)?;
    }
    if let Some(workers) = lookup("QUEUE_WORKERS") {
        config.queue.workers = parse_env("QUEUE_WORKERS", &workers)?;
    }
    if let Some(attempts) = lookup("ATTEMPTS_RETRY") {
        config.retries.max_attempts = Some(parse_env("ATTEMPTS_RETRY", &attempts)?);
    }

    const DB_VARS: [&str; 5] = ["DB_HOST", "DB_PORT", "DB_USER", "DB_PASSWORD", "DB_NAME"];
    if DB_VARS.iter().any(|var| lookup(var).is_some()) {
        let mut pg = match config.storage {
            StorageConfig::Postgres(pg) => pg,
            StorageConfig::Memory => PostgresConfig::default(),
        };
        if let Some(host) = lookup("DB_HOST") {
            pg.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            pg.port = parse_env("DB_PORT", &port)?;
        }
        if let Some(user) = lookup("DB_USER") {
            pg.user = user;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            pg.password = password;
        }
        if let Some(dbname) = lookup("DB_NAME") {
            pg.dbname = dbname;
        }
        config.storage = StorageConfig::Postgres(pg);
    }

    Ok(config)
}

fn parse_env<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        message: format!("{:?}: {}", raw, e),
    })
}

/// Processor addresses are often given as bare `host:port`.
fn with_scheme(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}
