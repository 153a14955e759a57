//! Bounded retry with exponential backoff.
//!
//! The coordinator never retries a reservation on the caller's behalf. Retrying is
//! reserved for compensating actions hit by transient store failures, and even
//! then only a small fixed number of times so a struggling store does not turn a
//! single rollback into a storm of writes.
//!
//! # Example
//!
//! ```rust
//! use charterbook_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .initial_delay(Duration::from_millis(10))
//!     .build();
//!
//! let outcome = retry_with_predicate(
//!     &policy,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("transient"),
//! )
//! .await;
//!
//! assert_eq!(outcome.result, Ok(42));
//! assert_eq!(outcome.attempts, 1);
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3 (including the first call)
/// - `initial_delay`: 25ms
/// - `max_delay`: 1 second
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: true
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of calls, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Scale each delay by a random factor in `[0.5, 1.0]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: 3,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculate the delay after a failed call (0-indexed retry number).
    ///
    /// `delay = min(initial_delay * multiplier^retry, max_delay)`, then jittered
    /// when enabled.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        use rand::Rng;

        #[allow(clippy::cast_possible_wrap)] // attempt counts are tiny
        let base_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            Duration::from_secs_f64(capped_secs * factor)
        } else {
            Duration::from_secs_f64(capped_secs)
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl RetryPolicyBuilder {
    /// Set the maximum number of calls (values below 1 are treated as 1).
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// Result of a retried operation together with how many calls it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T, E> {
    /// Final result: the first success, or the last error.
    pub result: Result<T, E>,
    /// Number of times the operation was invoked.
    pub attempts: u32,
}

/// Retry an async operation while `is_retryable` accepts its error.
///
/// Stops at the first success, the first non-retryable error, or after
/// `policy.max_attempts` calls.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::info!(attempts, "Operation succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::debug!(error = %err, "Error is not retryable, failing immediately");
                    return RetryOutcome {
                        result: Err(err),
                        attempts,
                    };
                }

                if attempts >= policy.max_attempts {
                    tracing::error!(attempts, error = %err, "Operation failed after max attempts");
                    return RetryOutcome {
                        result: Err(err),
                        attempts,
                    };
                }

                let delay = policy.delay_for_retry(attempts - 1);
                tracing::warn!(
                    attempts,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .initial_delay(Duration::from_millis(1))
            .jitter(false)
            .build()
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_millis(350))
            .jitter(false)
            .build();

        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .build();

        for _ in 0..50 {
            let delay = policy.delay_for_retry(0);
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(100));
        }
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::builder().max_attempts(0).build().max_attempts, 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let outcome = retry_with_predicate(
            &fast_policy(3),
            || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
            |_: &String| true,
        )
        .await;

        assert_eq!(outcome.result, Ok(7));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn stops_at_max_attempts() {
        let outcome = retry_with_predicate(
            &fast_policy(2),
            || async { Err::<(), _>("still down") },
            |_: &&str| true,
        )
        .await;

        assert_eq!(outcome.result, Err("still down"));
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let outcome = retry_with_predicate(
            &fast_policy(5),
            || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("permanent")
                }
            },
            |err: &&str| err.contains("transient"),
        )
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
