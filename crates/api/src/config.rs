//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use orchestrator::{OrchestratorConfig, RetryPolicy};

/// Gateway configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: Postgres connection string; the in-memory store is used
///   when unset
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `KAFKA_BROKERS`: Kafka bootstrap servers; requires the `kafka` feature.
///   When unset, requests only reach in-process subscribers and replies
///   arrive over `POST /replies`
/// - `KAFKA_CONSUMER_GROUP`: consumer group of the reply worker
///   (default: `"saga-orchestrator"`)
/// - `PUBLISH_TIMEOUT_MS`: broker publish timeout (default: `5000`)
/// - `STORE_TIMEOUT_MS`: store call timeout (default: `5000`)
/// - `WORKER_MAX_IN_FLIGHT`: replies reconciled concurrently (default: `16`)
/// - `WORKER_MAX_RETRIES`: retries for a failing reply (default: `5`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub kafka_brokers: Option<String>,
    pub kafka_consumer_group: String,
    pub publish_timeout: Duration,
    pub store_timeout: Duration,
    pub worker_max_in_flight: usize,
    pub worker_max_retries: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            kafka_brokers: std::env::var("KAFKA_BROKERS")
                .ok()
                .filter(|brokers| !brokers.is_empty()),
            kafka_consumer_group: std::env::var("KAFKA_CONSUMER_GROUP")
                .unwrap_or(defaults.kafka_consumer_group),
            publish_timeout: Duration::from_millis(env_or("PUBLISH_TIMEOUT_MS", 5000)),
            store_timeout: Duration::from_millis(env_or("STORE_TIMEOUT_MS", 5000)),
            worker_max_in_flight: env_or("WORKER_MAX_IN_FLIGHT", defaults.worker_max_in_flight),
            worker_max_retries: env_or("WORKER_MAX_RETRIES", defaults.worker_max_retries),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            publish_timeout: self.publish_timeout,
            store_timeout: self.store_timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.worker_max_retries)
    }
}

impl Default for Config {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            database_max_connections: 10,
            kafka_brokers: None,
            kafka_consumer_group: "saga-orchestrator".to_string(),
            publish_timeout: orchestrator.publish_timeout,
            store_timeout: orchestrator.store_timeout,
            worker_max_in_flight: 16,
            worker_max_retries: RetryPolicy::default().max_retries,
        }
    }
}

/// Parses an environment variable, keeping `default` when unset or invalid.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
