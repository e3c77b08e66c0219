// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sink wrapper that retries transient failures behind a circuit breaker.
//!
//! Every attempt passes through the breaker, so a sink that keeps failing
//! trips it and later batches fail fast instead of tying up consumers in
//! backoff. A batch that cannot be delivered is logged and discarded; the
//! consumer moves on to the next one.
//!
//! # Example
//!
//! ```
//! use ingest_engine::{MemorySink, ResilientSink, ResilienceConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sink = ResilientSink::new(MemorySink::new("warehouse"), &ResilienceConfig::default())
//!     .expect("valid config");
//! let attempts = sink.deliver(&[1u32, 2, 3]).await.unwrap();
//! assert_eq!(attempts, 1);
//! assert_eq!(sink.inner().items(), vec![1, 2, 3]);
//! # }
//! ```

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use super::traits::{Sink, SinkError};
use crate::batching::{Flush, FlushBatch};
use crate::config::{ConfigError, ResilienceConfig};
use crate::metrics::LatencyTimer;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitError};
use crate::resilience::retry::{retry_if, RetryConfig};

/// Why a batch was not delivered.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("circuit open for sink after {attempts} attempt(s)")]
    Rejected { attempts: usize },

    #[error("permanent sink failure after {attempts} attempt(s): {source}")]
    Permanent {
        attempts: usize,
        #[source]
        source: SinkError,
    },

    #[error("sink still failing after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: usize,
        #[source]
        source: SinkError,
    },
}

impl DeliveryError {
    #[must_use]
    pub fn attempts(&self) -> usize {
        match self {
            Self::Rejected { attempts }
            | Self::Permanent { attempts, .. }
            | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "rejected",
            Self::Permanent { .. } => "permanent",
            Self::Exhausted { .. } => "exhausted",
        }
    }
}

/// A [`Sink`] guarded by retry and a circuit breaker, usable as a flush target.
pub struct ResilientSink<T, S> {
    sink: S,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    should_retry: fn(&SinkError) -> bool,
    _items: PhantomData<fn(T)>,
}

impl<T, S> ResilientSink<T, S>
where
    T: Send + Sync,
    S: Sink<T>,
{
    /// Wrap `sink` with a breaker named after it.
    pub fn new(sink: S, config: &ResilienceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let breaker = Arc::new(CircuitBreaker::new(sink.name(), config.circuit()));
        Ok(Self::with_breaker(sink, breaker, config.retry()))
    }

    /// Wrap `sink` with an existing breaker.
    ///
    /// Processors for different item types that write to the same store
    /// should share one breaker.
    pub fn with_breaker(sink: S, breaker: Arc<CircuitBreaker>, retry: RetryConfig) -> Self {
        Self {
            sink,
            breaker,
            retry,
            should_retry: SinkError::is_retryable,
            _items: PhantomData,
        }
    }

    /// Override which sink errors are retried.
    #[must_use]
    pub fn with_retry_predicate(mut self, should_retry: fn(&SinkError) -> bool) -> Self {
        self.should_retry = should_retry;
        self
    }

    #[must_use]
    pub fn inner(&self) -> &S {
        &self.sink
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Deliver one batch. Returns the number of attempts it took.
    pub async fn deliver(&self, batch: &[T]) -> Result<usize, DeliveryError> {
        let name = self.sink.name();
        let _timer = LatencyTimer::new(name);
        let should_retry = self.should_retry;
        let sink = &self.sink;
        let breaker = &*self.breaker;
        let counter = AtomicUsize::new(0);
        let tries = &counter;

        let result = retry_if(
            name,
            &self.retry,
            move || {
                tries.fetch_add(1, Ordering::Relaxed);
                breaker.call(move || sink.deliver(batch))
            },
            |e: &CircuitError<SinkError>| match e {
                CircuitError::Rejected => false,
                CircuitError::Inner(err) => should_retry(err),
            },
        )
        .await;
        let attempts = counter.into_inner();

        let outcome = match result {
            Ok(()) => {
                debug!(sink = %name, batch_size = batch.len(), attempts, "Batch delivered");
                crate::metrics::record_delivery(name, "success");
                return Ok(attempts);
            }
            Err(CircuitError::Rejected) => DeliveryError::Rejected { attempts },
            Err(CircuitError::Inner(source)) if !should_retry(&source) => {
                DeliveryError::Permanent { attempts, source }
            }
            Err(CircuitError::Inner(source)) => DeliveryError::Exhausted { attempts, source },
        };

        crate::metrics::record_delivery(name, outcome.outcome());
        Err(outcome)
    }
}

#[async_trait]
impl<T, S> Flush<T> for ResilientSink<T, S>
where
    T: Send + Sync + 'static,
    S: Sink<T>,
{
    async fn flush(&self, batch: FlushBatch<T>) {
        if let Err(e) = self.deliver(&batch.items).await {
            error!(
                sink = %self.sink.name(),
                batch_size = batch.len(),
                reason = %batch.reason,
                attempts = e.attempts(),
                error = %e,
                "Discarding batch after delivery failure"
            );
            crate::metrics::record_discarded(self.sink.name(), batch.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::FlushReason;
    use crate::resilience::circuit_breaker::{CircuitConfig, CircuitState};
    use crate::sink::MemorySink;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Plays back scripted results, then succeeds.
    struct ScriptedSink {
        script: Mutex<VecDeque<SinkError>>,
        calls: AtomicUsize,
        delivered: MemorySink<u32>,
    }

    impl ScriptedSink {
        fn new(script: Vec<SinkError>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                delivered: MemorySink::new("scripted"),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Sink<u32> for ScriptedSink {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn deliver(&self, batch: &[u32]) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            match next {
                Some(err) => Err(err),
                None => self.delivered.deliver(batch).await,
            }
        }
    }

    fn fast_retry(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
        }
    }

    fn resilient(
        script: Vec<SinkError>,
        circuit: CircuitConfig,
        max_attempts: usize,
    ) -> ResilientSink<u32, ScriptedSink> {
        ResilientSink::with_breaker(
            ScriptedSink::new(script),
            Arc::new(CircuitBreaker::new("scripted", circuit)),
            fast_retry(max_attempts),
        )
    }

    fn lenient_circuit() -> CircuitConfig {
        CircuitConfig {
            trip_threshold: 100,
            timeout: Duration::from_secs(60),
            cyclic_period: Duration::ZERO,
            max_trial_requests: 1,
        }
    }

    #[tokio::test]
    async fn test_transient_failure_retried_then_delivered() {
        let sink = resilient(
            vec![SinkError::Unavailable("503".into())],
            lenient_circuit(),
            3,
        );

        let attempts = sink.deliver(&[1, 2]).await.unwrap();

        assert_eq!(attempts, 2);
        assert_eq!(sink.inner().delivered.items(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let sink = resilient(
            vec![SinkError::Unauthorized("expired".into())],
            lenient_circuit(),
            3,
        );

        let err = sink.deliver(&[1]).await.unwrap_err();

        assert!(matches!(err, DeliveryError::Permanent { attempts: 1, .. }));
        assert_eq!(sink.inner().calls(), 1);
        assert!(sink.inner().delivered.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let script = vec![SinkError::Backend("reset".into()); 5];
        let sink = resilient(script, lenient_circuit(), 3);

        let err = sink.deliver(&[1]).await.unwrap_err();

        assert!(matches!(
            err,
            DeliveryError::Exhausted { attempts: 3, source: SinkError::Backend(_) }
        ));
        assert_eq!(sink.inner().calls(), 3);
    }

    #[tokio::test]
    async fn test_breaker_rejection_stops_retrying() {
        let circuit = CircuitConfig {
            trip_threshold: 2,
            ..lenient_circuit()
        };
        let script = vec![SinkError::Timeout(Duration::from_secs(1)); 5];
        let sink = resilient(script, circuit, 5);

        let err = sink.deliver(&[1]).await.unwrap_err();

        // Two real failures trip the breaker, the third attempt is rejected
        assert!(matches!(err, DeliveryError::Rejected { attempts: 3 }));
        assert_eq!(sink.inner().calls(), 2);
        assert_eq!(sink.breaker().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_custom_retry_predicate() {
        let sink = resilient(
            vec![SinkError::InvalidBatch("schema drift".into())],
            lenient_circuit(),
            3,
        )
        .with_retry_predicate(|_| true);

        assert_eq!(sink.deliver(&[9]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_flush_discards_failed_batch() {
        let sink = resilient(
            vec![SinkError::Forbidden("no grant".into())],
            lenient_circuit(),
            3,
        );

        sink.flush(FlushBatch {
            items: vec![1, 2, 3],
            reason: FlushReason::SizeLimit,
        })
        .await;
        sink.flush(FlushBatch {
            items: vec![4],
            reason: FlushReason::TimeInterval,
        })
        .await;

        // First batch dropped, the next one still goes through
        assert_eq!(sink.inner().delivered.batches(), vec![vec![4]]);
    }

    #[tokio::test]
    async fn test_new_names_breaker_after_sink() {
        let sink: ResilientSink<u32, _> =
            ResilientSink::new(MemorySink::new("clickhouse"), &ResilienceConfig::default())
                .unwrap();
        assert_eq!(sink.breaker().name(), "clickhouse");
        assert_eq!(sink.breaker().config().trip_threshold, 5);
    }

    #[test]
    fn test_new_rejects_zero_trial_requests() {
        let config = ResilienceConfig {
            trip_threshold: 1,
            timeout_ms: 10,
            max_trial_requests: 0,
            ..Default::default()
        };
        let result: Result<ResilientSink<u32, _>, _> =
            ResilientSink::new(MemorySink::new("clickhouse"), &config);
        assert!(matches!(result, Err(ConfigError::ZeroTrialRequests)));
    }
}
