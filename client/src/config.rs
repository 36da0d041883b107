//! Configuration management for the client.

use gardensync_engine::RetryPolicy;
use std::env;
use std::time::Duration;

/// Sync configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Local database location: `sqlite:` URL, `memory:` or `file:` snapshot path
    pub database_url: String,
    /// Period of the background drain
    pub sync_interval: Duration,
    /// Retry schedule for failed deliveries
    pub retry: RetryPolicy,
    /// How long completed operations and settled tombstones are kept
    pub retention: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://gardensync.db".to_string(),
            sync_interval: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl SyncConfig {
    /// Load configuration from `GARDENSYNC_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url =
            env::var("GARDENSYNC_DATABASE_URL").unwrap_or(defaults.database_url);

        let sync_interval = parse_var("GARDENSYNC_SYNC_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sync_interval);

        let max_retries = parse_var("GARDENSYNC_MAX_RETRIES")?.unwrap_or(defaults.retry.max_retries);
        let base_delay_ms = parse_var::<u64>("GARDENSYNC_RETRY_BASE_DELAY_SECS")?
            .map(|s| s.saturating_mul(1_000))
            .unwrap_or(defaults.retry.base_delay_ms);
        let max_delay_ms = parse_var::<u64>("GARDENSYNC_RETRY_MAX_DELAY_SECS")?
            .map(|s| s.saturating_mul(1_000))
            .unwrap_or(defaults.retry.max_delay_ms);

        let retention = parse_var::<u64>("GARDENSYNC_RETENTION_HOURS")?
            .map(|h| Duration::from_secs(h.saturating_mul(3_600)))
            .unwrap_or(defaults.retention);

        if sync_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "GARDENSYNC_SYNC_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url,
            sync_interval,
            retry: RetryPolicy {
                max_retries,
                base_delay_ms,
                max_delay_ms,
            },
            retention,
        })
    }

    /// Retention window in milliseconds.
    pub fn retention_ms(&self) -> u64 {
        u64::try_from(self.retention.as_millis()).unwrap_or(u64::MAX)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}
