// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Sink deliveries retry transient failures a bounded number of times.
//! Permanent failures (bad credentials, malformed batches) are returned
//! immediately through [`retry_if`].
//!
//! # Example
//!
//! ```
//! use ingest_engine::RetryConfig;
//! use std::time::Duration;
//!
//! let sink = RetryConfig::sink();
//! assert_eq!(sink.max_attempts, 3);
//!
//! // Delay after the first failed attempt, then doubling
//! assert_eq!(sink.backoff(1), Duration::from_millis(100));
//! assert_eq!(sink.backoff(2), Duration::from_millis(200));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::sink()`] - Default delivery retry
/// - [`RetryConfig::aggressive()`] - More attempts for sinks that must not lose data
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts including the first; 0 is treated as 1
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::sink()
    }
}

impl RetryConfig {
    /// Three attempts with fast backoff, then give up and let the caller discard.
    #[must_use]
    pub fn sink() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Six attempts with backoff capped at 10 seconds.
    /// Holds a consumer for up to ~20s per batch, so size buffers accordingly.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay to wait after `attempt` failed attempts (1-based), capped at `max_delay`.
    #[must_use]
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn attempt_limit(&self) -> usize {
        self.max_attempts.max(1)
    }
}

/// Retry `operation` on every error until it succeeds or attempts run out.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, operation, |_| true).await
}

/// Retry `operation` while `should_retry` accepts the error.
///
/// Returns the last error once attempts are exhausted, or the first error
/// `should_retry` rejects.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max = config.attempt_limit();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(val) => {
                if attempts > 1 {
                    info!(
                        "Operation '{}' succeeded after {} attempts",
                        operation_name, attempts
                    );
                }
                return Ok(val);
            }
            Err(err) => {
                if !should_retry(&err) {
                    return Err(err);
                }
                if attempts >= max {
                    return Err(err);
                }

                let delay = config.backoff(attempts);
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, max, err, delay
                );
                crate::metrics::record_retry(operation_name);

                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient(String),
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Transient(msg) => write!(f, "{}", msg),
                Self::Permanent => write!(f, "permanent"),
            }
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> =
            retry("test_op", &RetryConfig::test(), || async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry("test_op", &RetryConfig::test(), || {
            let a = attempts_clone.clone();
            async move {
                let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err(TestError::Transient(format!("fail {}", count)))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry("test_op", &RetryConfig::test(), || {
            let a = attempts_clone.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient("always fail".to_string()))
            }
        })
        .await;

        assert_eq!(
            result.unwrap_err(),
            TestError::Transient("always fail".to_string())
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_if_stops_on_permanent_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry_if(
            "test_op",
            &RetryConfig::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Permanent)
                }
            },
            |e| matches!(e, TestError::Transient(_)),
        )
        .await;

        assert_eq!(result.unwrap_err(), TestError::Permanent);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let attempts = AtomicUsize::new(0);
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::test()
        };

        let result: Result<(), TestError> = retry("test_op", &config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Transient("nope".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_config_presets() {
        let sink = RetryConfig::sink();
        assert_eq!(sink.max_attempts, 3);

        let aggressive = RetryConfig::aggressive();
        assert!(aggressive.max_attempts > sink.max_attempts);
        assert!(aggressive.max_delay > sink.max_delay);
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            max_attempts: 5,
        };

        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            factor: 10.0, // Aggressive factor
            max_attempts: 5,
        };

        assert_eq!(config.backoff(2), Duration::from_secs(5));
        // Far past overflow of the raw exponent
        assert_eq!(config.backoff(10_000), Duration::from_secs(5));
    }
}
