// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker for sink calls.
//!
//! Stops calling a failing sink for a cooldown period so an outage is not
//! amplified by every consumer hammering it with retries.
//!
//! States:
//! - Closed: Normal operation, calls pass through. Failures are counted in
//!   a window of `cyclic_period`; reaching `trip_threshold` opens the circuit.
//! - Open: Sink unhealthy, calls fail fast without touching it. After
//!   `timeout` the next call moves the circuit to half-open.
//! - HalfOpen: At most `max_trial_requests` concurrent trial calls. A trial
//!   success closes the circuit, a trial failure reopens it.
//!
//! State is shared by every consumer flushing to the same sink, so it lives
//! behind a mutex that is never held across an await.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open)
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Failures within one cyclic period that trip the circuit
    pub trip_threshold: u32,
    /// How long the circuit stays open before trial calls are allowed
    pub timeout: Duration,
    /// Closed-state failure counts are cleared after this long.
    /// `Duration::ZERO` never clears them.
    pub cyclic_period: Duration,
    /// Maximum concurrent trial calls while half-open
    pub max_trial_requests: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            trip_threshold: 5,
            timeout: Duration::from_secs(30),
            cyclic_period: Duration::from_secs(5),
            max_trial_requests: 1,
        }
    }
}

impl CircuitConfig {
    /// Aggressive config for sinks shared by many producers (trips faster, recovers cautiously)
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            trip_threshold: 3,
            timeout: Duration::from_secs(60),
            cyclic_period: Duration::from_secs(10),
            max_trial_requests: 1,
        }
    }

    /// Lenient config for best-effort telemetry (tolerates more failures)
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            trip_threshold: 10,
            timeout: Duration::from_secs(15),
            cyclic_period: Duration::from_secs(5),
            max_trial_requests: 3,
        }
    }

    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            trip_threshold: 2,
            timeout: Duration::from_millis(50),
            cyclic_period: Duration::ZERO,
            max_trial_requests: 1,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    /// Bumped on every transition; outcomes from an older generation are ignored
    generation: u64,
    failures: u32,
    window_start: Instant,
    opened_at: Instant,
    trials_in_flight: u32,
}

/// Admission ticket for one call
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.generation, self.trial);
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.generation, self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        // Call future dropped mid-flight: give the trial slot back
        if !self.settled && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<BreakerState>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    open_count: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config.
    ///
    /// A zero `trip_threshold` or `max_trial_requests` is raised to 1 so a
    /// tripped circuit can always close again.
    pub fn new(name: impl Into<String>, mut config: CircuitConfig) -> Self {
        config.trip_threshold = config.trip_threshold.max(1);
        config.max_trial_requests = config.max_trial_requests.max(1);
        let now = Instant::now();
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                failures: 0,
                window_start: now,
                opened_at: now,
                trials_in_flight: 0,
            }),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            open_count: AtomicU64::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Get current circuit state, applying any elapsed timeout
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Execute an async operation through the circuit breaker
    ///
    /// Takes a closure that returns a Future, so a rejected call never
    /// constructs the operation.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let Some(permit) = self.acquire() else {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            debug!(circuit = %self.name, "Circuit breaker rejected call");
            crate::metrics::record_circuit_call(&self.name, "rejected");
            return Err(CircuitError::Rejected);
        };

        match f().await {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                permit.success();
                crate::metrics::record_circuit_call(&self.name, "success");
                Ok(result)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                permit.failure();
                crate::metrics::record_circuit_call(&self.name, "failure");
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());

        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => return None,
            CircuitState::HalfOpen => {
                if inner.trials_in_flight >= self.config.max_trial_requests {
                    return None;
                }
                inner.trials_in_flight += 1;
                true
            }
        };

        Some(Permit {
            breaker: self,
            generation: inner.generation,
            trial,
            settled: false,
        })
    }

    /// Apply time-based transitions: window expiry and open timeout
    fn refresh(&self, inner: &mut BreakerState, now: Instant) {
        match inner.state {
            CircuitState::Closed => {
                if !self.config.cyclic_period.is_zero()
                    && now.duration_since(inner.window_start) >= self.config.cyclic_period
                {
                    inner.failures = 0;
                    inner.window_start = now;
                }
            }
            CircuitState::Open => {
                if now.duration_since(inner.opened_at) >= self.config.timeout {
                    self.transition(inner, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn on_success(&self, generation: u64, trial: bool) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        if trial {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            if inner.state == CircuitState::HalfOpen {
                self.transition(&mut inner, CircuitState::Closed, Instant::now());
            }
        }
    }

    fn on_failure(&self, generation: u64, trial: bool) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        let now = Instant::now();

        if trial {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            if inner.state == CircuitState::HalfOpen {
                self.transition(&mut inner, CircuitState::Open, now);
            }
            return;
        }

        if inner.state == CircuitState::Closed {
            self.refresh(&mut inner, now);
            inner.failures += 1;
            if inner.failures >= self.config.trip_threshold {
                self.transition(&mut inner, CircuitState::Open, now);
            }
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = inner.state;
        let failures = inner.failures;

        inner.state = to;
        inner.generation += 1;
        inner.failures = 0;
        inner.window_start = now;
        inner.trials_in_flight = 0;

        match to {
            CircuitState::Open => {
                inner.opened_at = now;
                self.open_count.fetch_add(1, Ordering::Relaxed);
                if from == CircuitState::HalfOpen {
                    warn!(circuit = %self.name, "Circuit breaker re-opened - trial call failed");
                } else {
                    warn!(
                        circuit = %self.name,
                        failures,
                        timeout = ?self.config.timeout,
                        "Circuit breaker opened - too many failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                info!(circuit = %self.name, "Circuit breaker half-open - allowing trial calls");
            }
            CircuitState::Closed => {
                info!(circuit = %self.name, "Circuit breaker closed - sink recovered");
            }
        }
        crate::metrics::set_circuit_state(&self.name, to as u8);
    }

    /// Get total number of calls
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get number of successful calls
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors)
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Get number of times the circuit has opened
    #[must_use]
    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.calls_total();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64
    }
}
