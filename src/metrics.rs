// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for ingest-engine.
//!
//! Two layers live here:
//!
//! - [`MetricsPort`]: the narrow capability the buffering engine calls into
//!   (buffer state, occupancy, flushes). [`NoopMetrics`] is the null object
//!   for tests and embedders that do not care; [`FacadeMetrics`] forwards to
//!   the `metrics` crate.
//! - Free functions over the `metrics` crate facade, used directly by the
//!   resilience layer. The embedding service chooses the exporter
//!   (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `ingest_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `name`: buffer / processor name
//! - `sink`: delivery target
//! - `state`: buffered, dropped, closed
//! - `trigger`: size_limit, time_interval, close
//! - `outcome`: success, failure, rejected (breaker); success, rejected, permanent, exhausted (delivery)

use metrics::{counter, gauge, histogram};
use std::fmt;
use std::time::{Duration, Instant};

use crate::batching::FlushReason;

/// Outcome of a single enqueue, as reported to [`MetricsPort::record_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Item accepted into the queue
    Buffered,
    /// Item discarded because the queue was full
    Dropped,
    /// Item discarded because the buffer was already closed
    Closed,
}

impl BufferState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffered => "buffered",
            Self::Dropped => "dropped",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observability capability used by [`Buffer`](crate::Buffer) and
/// [`BatchProcessor`](crate::BatchProcessor).
///
/// Implementations must be cheap and must not block; they are called on
/// producer hot paths.
pub trait MetricsPort: Send + Sync {
    /// One call per enqueue attempt.
    fn record_state(&self, name: &str, state: BufferState);

    /// Periodic occupancy sample, `ratio` is `len / capacity` in `0.0..=1.0`.
    fn record_size(&self, name: &str, drop_on_full: bool, ratio: f64);

    /// One call per flush handed to the flush callback.
    fn record_flush(&self, name: &str, trigger: FlushReason, batch_size: usize);
}

/// Null-object metrics port.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsPort for NoopMetrics {
    fn record_state(&self, _name: &str, _state: BufferState) {}
    fn record_size(&self, _name: &str, _drop_on_full: bool, _ratio: f64) {}
    fn record_flush(&self, _name: &str, _trigger: FlushReason, _batch_size: usize) {}
}

/// Metrics port backed by the `metrics` crate facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeMetrics;

impl MetricsPort for FacadeMetrics {
    fn record_state(&self, name: &str, state: BufferState) {
        record_buffer_state(name, state);
    }

    fn record_size(&self, name: &str, drop_on_full: bool, ratio: f64) {
        set_buffer_occupancy(name, drop_on_full, ratio);
    }

    fn record_flush(&self, name: &str, trigger: FlushReason, batch_size: usize) {
        record_flush(name, trigger, batch_size);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUFFER - Enqueue outcomes and occupancy
// ═══════════════════════════════════════════════════════════════════════════

/// Record an enqueue outcome
pub fn record_buffer_state(name: &str, state: BufferState) {
    counter!(
        "ingest_buffer_items_total",
        "name" => name.to_string(),
        "state" => state.as_str()
    )
    .increment(1);
}

/// Set buffer occupancy ratio (0.0 - 1.0)
pub fn set_buffer_occupancy(name: &str, drop_on_full: bool, ratio: f64) {
    gauge!(
        "ingest_buffer_occupancy_ratio",
        "name" => name.to_string(),
        "drop_on_full" => if drop_on_full { "true" } else { "false" }
    )
    .set(ratio);
}

// ═══════════════════════════════════════════════════════════════════════════
// BATCH FLUSH - Flush counts and sizes per trigger
// ═══════════════════════════════════════════════════════════════════════════

/// Record a flush and the size of the batch it carried
pub fn record_flush(name: &str, trigger: FlushReason, batch_size: usize) {
    counter!(
        "ingest_flushes_total",
        "name" => name.to_string(),
        "trigger" => trigger.as_str()
    )
    .increment(1);
    histogram!(
        "ingest_flush_batch_size",
        "name" => name.to_string(),
        "trigger" => trigger.as_str()
    )
    .record(batch_size as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER - Resilience metrics
// ═══════════════════════════════════════════════════════════════════════════

/// Record circuit breaker state change (0 = closed, 1 = half-open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "ingest_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "ingest_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// DELIVERY - Sink outcomes
// ═══════════════════════════════════════════════════════════════════════════

/// Record a retry of a failed sink attempt
pub fn record_retry(sink: &str) {
    counter!(
        "ingest_sink_retries_total",
        "sink" => sink.to_string()
    )
    .increment(1);
}

/// Record the final outcome of delivering one batch
pub fn record_delivery(sink: &str, outcome: &str) {
    counter!(
        "ingest_sink_deliveries_total",
        "sink" => sink.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record items discarded after delivery gave up
pub fn record_discarded(sink: &str, count: usize) {
    counter!(
        "ingest_sink_discarded_items_total",
        "sink" => sink.to_string()
    )
    .increment(count as u64);
}

/// Record delivery latency (all attempts, including backoff)
pub fn record_delivery_latency(sink: &str, duration: Duration) {
    histogram!(
        "ingest_sink_delivery_seconds",
        "sink" => sink.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records delivery latency on drop
pub struct LatencyTimer {
    sink: String,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(sink: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_delivery_latency(&self.sink, self.start.elapsed());
    }
}
