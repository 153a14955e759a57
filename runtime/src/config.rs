//! Configuration for the connection pool and the coordinator.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::retry::RetryPolicy;
use charterbook_core::BookingError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of concurrent handle holders
    pub max_connections: u32,
    /// Minimum number of idle connections kept by a backing database pool
    pub min_connections: u32,
    /// How long `acquire()` waits before failing, in milliseconds
    pub acquire_timeout_ms: u64,
    /// Idle timeout for backing database connections, in milliseconds
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout_ms: 5_000,
            idle_timeout_ms: 600_000,
        }
    }
}

impl PoolConfig {
    /// Load pool configuration from `CHARTERBOOK_POOL_*` environment variables.
    ///
    /// Missing or unparsable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections: env_or("CHARTERBOOK_POOL_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_or("CHARTERBOOK_POOL_MIN_CONNECTIONS", defaults.min_connections),
            acquire_timeout_ms: env_or(
                "CHARTERBOOK_POOL_ACQUIRE_TIMEOUT_MS",
                defaults.acquire_timeout_ms,
            ),
            idle_timeout_ms: env_or("CHARTERBOOK_POOL_IDLE_TIMEOUT_MS", defaults.idle_timeout_ms),
        }
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] when `max_connections` is zero,
    /// `min_connections` exceeds `max_connections`, or the acquire timeout is zero.
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.max_connections == 0 {
            return Err(BookingError::Validation(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(BookingError::Validation(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(BookingError::Validation(
                "acquire_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Acquire timeout as a `Duration`.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Pool bounding concurrent store handles
    pub pool: PoolConfig,
    /// Backoff for compensating actions hit by transient store failures.
    ///
    /// `max_attempts` caps how often a single compensation is invoked.
    pub compensation_retry: RetryPolicy,
}

impl CoordinatorConfig {
    /// Load coordinator configuration from environment variables.
    ///
    /// Reads the pool variables plus `CHARTERBOOK_MAX_COMPENSATION_ATTEMPTS`.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            pool: PoolConfig::from_env(),
            compensation_retry: RetryPolicy::builder()
                .max_attempts(env_or(
                    "CHARTERBOOK_MAX_COMPENSATION_ATTEMPTS",
                    defaults.max_attempts,
                ))
                .build(),
        }
    }

    /// Replace the pool configuration.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Replace the compensation retry policy.
    #[must_use]
    pub fn with_compensation_retry(mut self, policy: RetryPolicy) -> Self {
        self.compensation_retry = policy;
        self
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_max_connections() {
        let config = PoolConfig {
            max_connections: 0,
            min_connections: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(config.validate(), Err(BookingError::Validation(_))));
    }

    #[test]
    fn rejects_min_above_max() {
        let config = PoolConfig {
            max_connections: 2,
            min_connections: 3,
            ..PoolConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_connections (3)"));
    }

    #[test]
    fn rejects_zero_acquire_timeout() {
        let config = PoolConfig {
            acquire_timeout_ms: 0,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_fallback_when_unset() {
        assert_eq!(env_or("CHARTERBOOK_TEST_SURELY_UNSET_VARIABLE", 7u32), 7);
    }

    #[test]
    fn durations() {
        let config = PoolConfig {
            acquire_timeout_ms: 100,
            idle_timeout_ms: 2_000,
            ..PoolConfig::default()
        };
        assert_eq!(config.acquire_timeout(), Duration::from_millis(100));
        assert_eq!(config.idle_timeout(), Duration::from_secs(2));
    }
}
