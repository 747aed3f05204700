//! Server configuration read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use eventbus_hub::{HubConfig, RetryPolicy};
use eventbus_projection::ProjectionConfig;

use crate::error::AppError;

/// Where events, subscriptions and checkpoints are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// PostgreSQL via `DATABASE_URL`.
    Postgres,
    /// Process memory; lost on exit.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::Config(format!(
                "EVENTBUS_STORAGE must be `postgres` or `memory`, got {other:?}"
            ))),
        }
    }
}

/// Everything the server needs at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Storage backend.
    pub storage: StorageBackend,
    /// PostgreSQL connection string; required for `Postgres`.
    pub database_url: Option<String>,
    /// Pool size.
    pub database_max_connections: u32,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Per-attempt webhook timeout.
    pub webhook_timeout: Duration,
    /// Attempts per event before a push subscription degrades.
    pub webhook_max_attempts: u32,
    /// First retry delay.
    pub webhook_initial_backoff: Duration,
    /// Retry delay cap.
    pub webhook_max_backoff: Duration,
    /// Safety-net poll for push workers and projections.
    pub poll_interval: Duration,
    /// Undelivered replay events held per subscription.
    pub replay_buffer_capacity: usize,
    /// OTLP collector endpoint; export is off when unset.
    pub otlp_endpoint: Option<String>,
}

impl ServerConfig {
    /// Reads the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is missing or malformed.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is missing or malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let storage: StorageBackend = lookup("EVENTBUS_STORAGE")
            .as_deref()
            .unwrap_or("postgres")
            .parse()?;
        let database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        if storage == StorageBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config(
                "DATABASE_URL environment variable must be set".into(),
            ));
        }

        Ok(Self {
            storage,
            database_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parse_or(&lookup, "PORT", 3000)?,
            webhook_timeout: millis_or(&lookup, "WEBHOOK_TIMEOUT_MS", 5_000)?,
            webhook_max_attempts: parse_or(&lookup, "WEBHOOK_MAX_ATTEMPTS", 5)?,
            webhook_initial_backoff: millis_or(&lookup, "WEBHOOK_INITIAL_BACKOFF_MS", 200)?,
            webhook_max_backoff: millis_or(&lookup, "WEBHOOK_MAX_BACKOFF_MS", 30_000)?,
            poll_interval: millis_or(&lookup, "HUB_POLL_INTERVAL_MS", 5_000)?,
            replay_buffer_capacity: parse_or(&lookup, "REPLAY_BUFFER_CAPACITY", 10_000)?,
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|e| !e.is_empty()),
        })
    }

    /// The socket address to listen on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `HOST:PORT` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }

    /// Retry policy for push delivery.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.webhook_max_attempts,
            initial_backoff: self.webhook_initial_backoff,
            max_backoff: self.webhook_max_backoff,
            attempt_timeout: self.webhook_timeout,
            ..RetryPolicy::default()
        }
    }

    /// Distribution hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            retry: self.retry_policy(),
            poll_interval: self.poll_interval,
            replay_buffer_capacity: self.replay_buffer_capacity,
            ..HubConfig::default()
        }
    }

    /// Projection runner settings.
    #[must_use]
    pub fn projection_config(&self) -> ProjectionConfig {
        ProjectionConfig {
            poll_interval: self.poll_interval,
            ..ProjectionConfig::default()
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid ({raw:?}): {e}"))),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, AppError> {
    let millis: u64 = parse_or(lookup, key, default)?;
    if millis == 0 {
        return Err(AppError::Config(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServerConfig, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_database_url() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/bus")]).unwrap();

        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(config.port, 3000);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.webhook_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.hub_config().poll_interval, Duration::from_secs(5));
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.bind_addr().unwrap().port(), 3000);
    }

    #[test]
    fn test_postgres_requires_database_url() {
        assert!(matches!(config_from(&[]), Err(AppError::Config(_))));
    }

    #[test]
    fn test_memory_storage_needs_no_database() {
        let config = config_from(&[("EVENTBUS_STORAGE", "memory"), ("PORT", "8080")]).unwrap();

        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_overrides_flow_into_component_configs() {
        let config = config_from(&[
            ("EVENTBUS_STORAGE", "memory"),
            ("WEBHOOK_MAX_ATTEMPTS", "3"),
            ("WEBHOOK_INITIAL_BACKOFF_MS", "50"),
            ("HUB_POLL_INTERVAL_MS", "250"),
            ("REPLAY_BUFFER_CAPACITY", "64"),
        ])
        .unwrap();

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_backoff, Duration::from_millis(50));
        assert_eq!(
            config.projection_config().poll_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.hub_config().replay_buffer_capacity, 64);
    }

    #[test]
    fn test_rejects_malformed_values() {
        for vars in [
            [("EVENTBUS_STORAGE", "sqlite"), ("PORT", "1")],
            [("EVENTBUS_STORAGE", "memory"), ("PORT", "http")],
            [("EVENTBUS_STORAGE", "memory"), ("HUB_POLL_INTERVAL_MS", "0")],
        ] {
            assert!(
                matches!(config_from(&vars), Err(AppError::Config(_))),
                "{vars:?} accepted"
            );
        }
    }
}
