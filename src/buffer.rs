// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded, concurrency-safe FIFO buffer with a per-instance full-queue policy.
//!
//! Producers call [`Buffer::enqueue`], consumers pull from a
//! [`BufferReceiver`] obtained via [`Buffer::consume`]. Every item goes to
//! exactly one receiver (queue semantics, not broadcast).
//!
//! # Full-queue policy
//!
//! - `drop_on_full = true`: enqueue never suspends on a full queue, the item
//!   is discarded and recorded as [`BufferState::Dropped`]. Use this for
//!   latency-critical request-path telemetry.
//! - `drop_on_full = false`: enqueue suspends until a consumer frees a slot
//!   or the buffer is closed. Use this for billing / audit producers.
//!
//! # Close
//!
//! The sender half lives behind a `RwLock`. Enqueue holds the read lock for
//! its whole check-then-send; close takes the write lock and drops the
//! sender exactly once, so no producer can send after the queue is closed.
//! Close first cancels a token that releases producers suspended on a full
//! queue, so close never waits on a stalled producer. Enqueue after close
//! is a recorded no-op, never a panic or error.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ingest_engine::{Buffer, NoopMetrics};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let buffer = Buffer::new(16, true, "audit_logs", Arc::new(NoopMetrics)).unwrap();
//! let rx = buffer.consume();
//!
//! buffer.enqueue("login").await;
//! buffer.close().await;
//! buffer.enqueue("ignored").await;
//!
//! assert_eq!(rx.recv().await, Some("login"));
//! assert_eq!(rx.recv().await, None);
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backpressure::OccupancyLevel;
use crate::config::ConfigError;
use crate::metrics::{BufferState, MetricsPort};

/// Default interval between occupancy samples
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

struct Shared<T> {
    name: String,
    capacity: usize,
    drop_on_full: bool,
    /// `None` once closed
    sender: RwLock<Option<mpsc::Sender<T>>>,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    depth: Arc<AtomicUsize>,
    closing: CancellationToken,
    metrics: Arc<dyn MetricsPort>,
}

impl<T> Shared<T> {
    fn occupancy(&self) -> f64 {
        let depth = self.depth.load(Ordering::Relaxed).min(self.capacity);
        depth as f64 / self.capacity as f64
    }
}

/// Bounded FIFO of `T`. Cheap to clone; clones share the same queue.
pub struct Buffer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Buffer<T> {
    /// Create a buffer sampling occupancy every [`DEFAULT_SAMPLE_INTERVAL`].
    ///
    /// Must be called from within a tokio runtime (the sampler is spawned).
    pub fn new(
        capacity: usize,
        drop_on_full: bool,
        name: impl Into<String>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Result<Self, ConfigError> {
        Self::with_sample_interval(capacity, drop_on_full, name, metrics, DEFAULT_SAMPLE_INTERVAL)
    }

    /// Create a buffer with an explicit occupancy sampling interval.
    pub fn with_sample_interval(
        capacity: usize,
        drop_on_full: bool,
        name: impl Into<String>,
        metrics: Arc<dyn MetricsPort>,
        sample_interval: Duration,
    ) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if sample_interval.is_zero() {
            return Err(ConfigError::ZeroSampleInterval);
        }

        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared {
            name: name.into(),
            capacity,
            drop_on_full,
            sender: RwLock::new(Some(tx)),
            receiver: Arc::new(Mutex::new(rx)),
            depth: Arc::new(AtomicUsize::new(0)),
            closing: CancellationToken::new(),
            metrics,
        });

        spawn_sampler(Arc::downgrade(&shared), shared.closing.clone(), sample_interval);

        Ok(Self { shared })
    }
}

impl<T> Buffer<T> {
    /// Add an item to the queue.
    ///
    /// Never fails and never panics: a full queue under the drop policy or a
    /// closed buffer discards the item and records why. Suspends only when
    /// `drop_on_full` is false and the queue is full.
    pub async fn enqueue(&self, item: T) {
        let shared = &self.shared;
        let guard = shared.sender.read().await;
        let Some(tx) = guard.as_ref() else {
            shared.metrics.record_state(&shared.name, BufferState::Closed);
            return;
        };

        if shared.drop_on_full {
            match tx.try_reserve() {
                Ok(permit) => {
                    shared.depth.fetch_add(1, Ordering::Relaxed);
                    permit.send(item);
                    shared.metrics.record_state(&shared.name, BufferState::Buffered);
                }
                Err(TrySendError::Full(())) => {
                    shared.metrics.record_state(&shared.name, BufferState::Dropped);
                }
                Err(TrySendError::Closed(())) => {
                    shared.metrics.record_state(&shared.name, BufferState::Closed);
                }
            }
            return;
        }

        tokio::select! {
            biased;

            () = shared.closing.cancelled() => {
                shared.metrics.record_state(&shared.name, BufferState::Closed);
            }

            permit = tx.reserve() => match permit {
                Ok(permit) => {
                    shared.depth.fetch_add(1, Ordering::Relaxed);
                    permit.send(item);
                    shared.metrics.record_state(&shared.name, BufferState::Buffered);
                }
                Err(_) => {
                    shared.metrics.record_state(&shared.name, BufferState::Closed);
                }
            },
        }
    }

    /// Read side of the queue. Receivers obtained from the same buffer
    /// split the items between them.
    pub fn consume(&self) -> BufferReceiver<T> {
        BufferReceiver {
            receiver: Arc::clone(&self.shared.receiver),
            depth: Arc::clone(&self.shared.depth),
        }
    }

    /// Close the buffer. Idempotent and safe to call concurrently.
    ///
    /// Receivers drain what is already queued and then observe end-of-stream.
    /// Producers suspended on a full queue are released and their items
    /// discarded. Occupancy sampling stops.
    ///
    /// Returns `true` only for the call that actually closed the buffer.
    pub async fn close(&self) -> bool {
        let shared = &self.shared;
        shared.closing.cancel();

        let mut guard = shared.sender.write().await;
        let closed = guard.take().is_some();
        if closed {
            info!(
                buffer = %shared.name,
                pending = shared.depth.load(Ordering::Relaxed),
                "Buffer closed"
            );
        }
        closed
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closing.is_cancelled()
    }

    /// Approximate number of queued items. Diagnostics only.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    #[must_use]
    pub fn drop_on_full(&self) -> bool {
        self.shared.drop_on_full
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

/// Receive half of a [`Buffer`]. Cheap to clone; clones compete for items.
pub struct BufferReceiver<T> {
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    depth: Arc<AtomicUsize>,
}

impl<T> Clone for BufferReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: Arc::clone(&self.receiver),
            depth: Arc::clone(&self.depth),
        }
    }
}

impl<T> BufferReceiver<T> {
    /// Next item, or `None` once the buffer is closed and drained.
    ///
    /// Cancel safe: dropping the future never loses an item.
    pub async fn recv(&self) -> Option<T> {
        let mut rx = self.receiver.lock().await;
        let item = rx.recv().await;
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        item
    }
}

fn spawn_sampler<T: Send + 'static>(
    shared: Weak<Shared<T>>,
    closing: CancellationToken,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Consume the first immediate tick
        ticker.tick().await;

        let mut last_level = OccupancyLevel::Normal;
        loop {
            tokio::select! {
                () = closing.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(shared) = shared.upgrade() else { break };
                    let ratio = shared.occupancy();
                    shared.metrics.record_size(&shared.name, shared.drop_on_full, ratio);

                    let level = OccupancyLevel::from_ratio(ratio);
                    if level > last_level && level.should_warn() {
                        warn!(
                            buffer = %shared.name,
                            occupancy = ratio,
                            drop_on_full = shared.drop_on_full,
                            level = %level,
                            "{}",
                            level.description()
                        );
                    }
                    last_level = level;
                }
            }
        }
        debug!("Occupancy sampler stopped");
    });
}
