//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use checkout::CheckoutSettings;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL connection string; unset runs on the in-memory store
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `10`)
/// - `SWEEP_INTERVAL_SECS` — time between expiry sweeps (default: `60`)
/// - `SWEEP_CONCURRENCY` — sessions expired at once per sweep (default: `8`)
/// - `CHECKOUT_SESSION_TTL_SECS` — how long a checkout holds stock (default: `1800`)
/// - `IDEMPOTENCY_LOCK_TTL_SECS` — lifetime of a pending commit lock (default: `600`)
/// - `BULK_WRITE_BATCH_SIZE` — conditional updates per storage request (default: `500`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub sweep_interval: Duration,
    pub sweep_concurrency: usize,
    pub session_ttl_secs: i64,
    pub idempotency_lock_ttl_secs: i64,
    pub batch_size: usize,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
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
                .filter(|url| !url.trim().is_empty()),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            sweep_interval: Duration::from_secs(env_or(
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
            sweep_concurrency: env_or("SWEEP_CONCURRENCY", defaults.sweep_concurrency),
            session_ttl_secs: env_or("CHECKOUT_SESSION_TTL_SECS", defaults.session_ttl_secs),
            idempotency_lock_ttl_secs: env_or(
                "IDEMPOTENCY_LOCK_TTL_SECS",
                defaults.idempotency_lock_ttl_secs,
            ),
            batch_size: env_or("BULK_WRITE_BATCH_SIZE", defaults.batch_size),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checkout tunables derived from this configuration.
    pub fn checkout_settings(&self) -> CheckoutSettings {
        CheckoutSettings {
            batch_size: self.batch_size,
            session_ttl: chrono::Duration::seconds(self.session_ttl_secs),
            idempotency_lock_ttl: chrono::Duration::seconds(self.idempotency_lock_ttl_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let checkout = CheckoutSettings::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            database_max_connections: 10,
            sweep_interval: lifecycle::scheduler::DEFAULT_SWEEP_INTERVAL,
            sweep_concurrency: lifecycle::reconciler::DEFAULT_SWEEP_CONCURRENCY,
            session_ttl_secs: checkout.session_ttl.num_seconds(),
            idempotency_lock_ttl_secs: checkout.idempotency_lock_ttl.num_seconds(),
            batch_size: checkout.batch_size,
        }
    }
}
