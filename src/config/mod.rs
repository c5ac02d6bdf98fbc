//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on malformed values. Every variable
//! has a default, so an empty environment yields a usable config.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::ratelimit::ItemExponentialFailureRateLimiter;

#[derive(Debug, Clone)]
pub struct Config {
    pub queue_name: String,
    /// First retry delay of the default rate limiter.
    pub base_delay: Duration,
    /// Cap on the default rate limiter's backoff.
    pub max_delay: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let base_delay = millis_var(
            "PRIOQ_BASE_DELAY_MS",
            ItemExponentialFailureRateLimiter::<()>::DEFAULT_BASE_DELAY,
        )?;
        let max_delay = millis_var(
            "PRIOQ_MAX_DELAY_MS",
            ItemExponentialFailureRateLimiter::<()>::DEFAULT_MAX_DELAY,
        )?;
        if max_delay < base_delay {
            return Err(Error::Config(format!(
                "PRIOQ_MAX_DELAY_MS ({}) is below PRIOQ_BASE_DELAY_MS ({})",
                max_delay.as_millis(),
                base_delay.as_millis()
            )));
        }

        Ok(Self {
            queue_name: std::env::var("PRIOQ_QUEUE_NAME").unwrap_or_else(|_| "default".to_string()),
            base_delay,
            max_delay,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// The per-key exponential backoff described by this config.
    pub fn rate_limiter<K>(&self) -> ItemExponentialFailureRateLimiter<K> {
        ItemExponentialFailureRateLimiter::new(self.base_delay, self.max_delay)
    }
}

fn millis_var(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| Error::Config(format!("{name} must be milliseconds, got {raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}
