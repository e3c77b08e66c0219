// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for batch processors and resilient sinks.
//!
//! # Example
//!
//! ```
//! use ingest_engine::BatchConfig;
//!
//! // Minimal config (uses defaults)
//! let config = BatchConfig::named("api_requests");
//! assert_eq!(config.batch_size, 1000);
//! assert!(config.drop_on_full);
//!
//! // Billing-relevant producer: block instead of dropping
//! let config = BatchConfig {
//!     batch_size: 500,
//!     flush_interval_ms: 2000,
//!     drop_on_full: false,
//!     ..BatchConfig::named("key_verifications")
//! };
//! assert!(config.validate().is_ok());
//! ```

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitConfig;
use crate::resilience::retry::RetryConfig;

/// Rejected configuration. This is the only error the engine raises loudly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch_size must be at least 1")]
    ZeroBatchSize,
    #[error("buffer_capacity must be at least 1")]
    ZeroCapacity,
    #[error("flush_interval_ms must be at least 1")]
    ZeroFlushInterval,
    #[error("occupancy_sample_ms must be at least 1")]
    ZeroSampleInterval,
    #[error("trip_threshold must be at least 1")]
    ZeroTripThreshold,
    #[error("max_trial_requests must be at least 1")]
    ZeroTrialRequests,
}

/// Configuration for one [`BatchProcessor`](crate::BatchProcessor).
///
/// Immutable once the processor is built.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Name used for metric labels and logs (e.g. "api_requests")
    #[serde(default = "default_name")]
    pub name: String,

    /// Flush after this many items
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Bounded queue capacity shared by all consumers
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Flush pending items after this many milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Number of consumer tasks (0 is treated as 1)
    #[serde(default = "default_consumers")]
    pub consumers: usize,

    /// Drop new items when the queue is full instead of suspending the producer
    #[serde(default = "default_drop_on_full")]
    pub drop_on_full: bool,

    /// How often queue occupancy is sampled
    #[serde(default = "default_occupancy_sample_ms")]
    pub occupancy_sample_ms: u64,
}

fn default_name() -> String { "default".to_string() }
fn default_batch_size() -> usize { 1000 }
fn default_buffer_capacity() -> usize { 10_000 }
fn default_flush_interval_ms() -> u64 { 1000 }
fn default_consumers() -> usize { 1 }
fn default_drop_on_full() -> bool { true }
fn default_occupancy_sample_ms() -> u64 { 5000 }

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            batch_size: default_batch_size(),
            buffer_capacity: default_buffer_capacity(),
            flush_interval_ms: default_flush_interval_ms(),
            consumers: default_consumers(),
            drop_on_full: default_drop_on_full(),
            occupancy_sample_ms: default_occupancy_sample_ms(),
        }
    }
}

impl BatchConfig {
    /// Defaults with the given name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::ZeroFlushInterval);
        }
        if self.occupancy_sample_ms == 0 {
            return Err(ConfigError::ZeroSampleInterval);
        }
        Ok(())
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub fn occupancy_sample_interval(&self) -> Duration {
        Duration::from_millis(self.occupancy_sample_ms)
    }

    /// Consumer count with the "unset means one" rule applied
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.max(1)
    }
}

/// Circuit breaker and retry settings for one sink, in a deserializable shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    /// Failures within one cyclic period that trip the breaker
    #[serde(default = "default_trip_threshold")]
    pub trip_threshold: u32,
    /// How long the breaker stays open before allowing trials
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Window after which the closed-state failure count is cleared
    #[serde(default = "default_cyclic_period_ms")]
    pub cyclic_period_ms: u64,
    /// Concurrent trial calls allowed while half-open
    #[serde(default = "default_max_trial_requests")]
    pub max_trial_requests: u32,

    /// Attempts per batch, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_trip_threshold() -> u32 { 5 }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_cyclic_period_ms() -> u64 { 5_000 }
fn default_max_trial_requests() -> u32 { 1 }
fn default_max_attempts() -> usize { 3 }
fn default_initial_backoff_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 2_000 }
fn default_backoff_factor() -> f64 { 2.0 }

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            trip_threshold: default_trip_threshold(),
            timeout_ms: default_timeout_ms(),
            cyclic_period_ms: default_cyclic_period_ms(),
            max_trial_requests: default_max_trial_requests(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl ResilienceConfig {
    /// Reject breaker settings that would leave a tripped circuit stuck.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trip_threshold == 0 {
            return Err(ConfigError::ZeroTripThreshold);
        }
        if self.max_trial_requests == 0 {
            return Err(ConfigError::ZeroTrialRequests);
        }
        Ok(())
    }

    #[must_use]
    pub fn circuit(&self) -> CircuitConfig {
        CircuitConfig {
            trip_threshold: self.trip_threshold,
            timeout: Duration::from_millis(self.timeout_ms),
            cyclic_period: Duration::from_millis(self.cyclic_period_ms),
            max_trial_requests: self.max_trial_requests,
        }
    }

    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            factor: self.backoff_factor,
        }
    }
}
