use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::services::{BackoffPolicy, RetryScope};

/// Which `JobStore`/`SchedulingQueue` implementation backs the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub store_backend: StoreBackend,
    pub worker_concurrency: usize,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub publish_timeout: Duration,
    pub poll_interval: Duration,
    pub lease_timeout: Duration,
    pub retry_scope: RetryScope,
    pub completed_retention: Duration,
    pub publish_relay_url: Option<String>,
    pub publish_relay_secret: Option<String>,
    pub otel_exporter_endpoint: Option<String>,
    pub service_name: String,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset and blank keys fall back
    /// to their defaults; malformed values are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Config {
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://postfanout.db?mode=rwc".to_string()),
            store_backend: parse_or(&get, "STORE_BACKEND", StoreBackend::Sqlite)?,
            worker_concurrency: parse_or(&get, "WORKER_CONCURRENCY", 5)?,
            rate_limit_max: parse_or(&get, "RATE_LIMIT_MAX", 10)?,
            rate_limit_window: Duration::from_millis(parse_or(&get, "RATE_LIMIT_WINDOW_MS", 1000)?),
            max_attempts: parse_or(&get, "MAX_ATTEMPTS", 3)?,
            backoff_base: Duration::from_millis(parse_or(&get, "BACKOFF_BASE_MS", 1000)?),
            backoff_multiplier: parse_or(&get, "BACKOFF_MULTIPLIER", 2.0)?,
            publish_timeout: Duration::from_secs(parse_or(&get, "PUBLISH_TIMEOUT_SECS", 30)?),
            poll_interval: Duration::from_millis(parse_or(&get, "POLL_INTERVAL_MS", 1000)?),
            lease_timeout: Duration::from_secs(parse_or(&get, "LEASE_TIMEOUT_SECS", 300)?),
            retry_scope: parse_or(&get, "RETRY_SCOPE", RetryScope::FailedOnly)?,
            completed_retention: Duration::from_secs(
                parse_or::<u64, _>(&get, "COMPLETED_RETENTION_HOURS", 168)?.saturating_mul(3600),
            ),
            publish_relay_url: get("PUBLISH_RELAY_URL"),
            publish_relay_secret: get("PUBLISH_RELAY_SECRET"),
            otel_exporter_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
            service_name: get("SERVICE_NAME").unwrap_or_else(|| "postfanout".to_string()),
            metrics_port: get("METRICS_PORT")
                .map(|v| parse_value("METRICS_PORT", &v))
                .transpose()?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("WORKER_CONCURRENCY", self.worker_concurrency as u128),
            ("RATE_LIMIT_MAX", self.rate_limit_max as u128),
            ("RATE_LIMIT_WINDOW_MS", self.rate_limit_window.as_millis()),
            ("MAX_ATTEMPTS", self.max_attempts as u128),
            ("PUBLISH_TIMEOUT_SECS", self.publish_timeout.as_millis()),
            ("POLL_INTERVAL_MS", self.poll_interval.as_millis()),
            ("LEASE_TIMEOUT_SECS", self.lease_timeout.as_millis()),
        ];
        if let Some((key, value)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                key: "BACKOFF_MULTIPLIER".to_string(),
                value: self.backoff_multiplier.to_string(),
            });
        }
        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.backoff_base,
            multiplier: self.backoff_multiplier,
            ..BackoffPolicy::default()
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    Invalid { key: String, value: String },

    #[error("Invalid rate limit: {0}")]
    InvalidRateLimit(String),
}
