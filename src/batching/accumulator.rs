// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-consumer batch accumulation.
//!
//! An [`Accumulator`] is owned by exactly one consumer task and is never
//! shared, so it needs no locking. It collects items until the size
//! threshold is reached and hands them out as a [`FlushBatch`] tagged with
//! the [`FlushReason`] that caused the flush.
//!
//! # Example
//!
//! ```
//! use ingest_engine::{Accumulator, FlushReason};
//!
//! let mut acc: Accumulator<&str> = Accumulator::new(2);
//! assert!(acc.push("a").is_none());
//! assert_eq!(acc.push("b"), Some(FlushReason::SizeLimit));
//!
//! let batch = acc.take(FlushReason::SizeLimit).unwrap();
//! assert_eq!(batch.items, vec!["a", "b"]);
//! assert!(acc.is_empty());
//! ```

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Batch flush trigger reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// Batch reached the configured size
    SizeLimit,
    /// Flush interval elapsed with items pending
    TimeInterval,
    /// Buffer closed and drained
    Close,
}

impl FlushReason {
    /// Metric / log label
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SizeLimit => "size_limit",
            Self::TimeInterval => "time_interval",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch of items handed to the flush callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushBatch<T> {
    pub items: Vec<T>,
    pub reason: FlushReason,
}

impl<T> FlushBatch<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Items pending flush for a single consumer
#[derive(Debug)]
pub struct Accumulator<T> {
    items: Vec<T>,
    batch_size: usize,
    started_at: Instant,
}

impl<T> Accumulator<T> {
    /// Create an accumulator pre-sized for `batch_size` items.
    pub fn new(batch_size: usize) -> Self {
        Self {
            items: Vec::with_capacity(batch_size),
            batch_size,
            started_at: Instant::now(),
        }
    }

    /// Append an item, returns [`FlushReason::SizeLimit`] once the batch is full
    pub fn push(&mut self, item: T) -> Option<FlushReason> {
        if self.items.is_empty() {
            self.started_at = Instant::now();
        }
        self.items.push(item);

        if self.items.len() >= self.batch_size {
            Some(FlushReason::SizeLimit)
        } else {
            None
        }
    }

    /// Take the pending items, leaving an empty accumulator with the same
    /// capacity hint. Returns `None` when nothing is pending.
    pub fn take(&mut self, reason: FlushReason) -> Option<FlushBatch<T>> {
        if self.items.is_empty() {
            return None;
        }
        let items = std::mem::replace(&mut self.items, Vec::with_capacity(self.batch_size));
        trace!(count = items.len(), reason = %reason, age = ?self.started_at.elapsed(), "Batch taken for flush");
        Some(FlushBatch { items, reason })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Time since the oldest pending item arrived (zero when empty)
    #[must_use]
    pub fn age(&self) -> Duration {
        if self.items.is_empty() {
            Duration::ZERO
        } else {
            self.started_at.elapsed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_below_threshold() {
        let mut acc = Accumulator::new(3);

        assert!(acc.push(1).is_none());
        assert!(acc.push(2).is_none());
        assert_eq!(acc.len(), 2);
        assert!(!acc.is_empty());
    }

    #[test]
    fn test_flush_on_size_threshold() {
        let mut acc = Accumulator::new(3);

        acc.push('a');
        acc.push('b');
        assert_eq!(acc.push('c'), Some(FlushReason::SizeLimit));

        let batch = acc.take(FlushReason::SizeLimit).unwrap();
        assert_eq!(batch.items, vec!['a', 'b', 'c']);
        assert_eq!(batch.reason, FlushReason::SizeLimit);
    }

    #[test]
    fn test_take_resets_accumulator() {
        let mut acc = Accumulator::new(10);

        acc.push("x");
        acc.push("y");
        let batch = acc.take(FlushReason::TimeInterval).unwrap();
        assert_eq!(batch.len(), 2);

        assert!(acc.is_empty());
        assert_eq!(acc.age(), Duration::ZERO);
        assert!(acc.take(FlushReason::Close).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_follows_oldest_pending_item() {
        let mut acc = Accumulator::new(10);
        assert_eq!(acc.age(), Duration::ZERO);

        acc.push(1);
        tokio::time::sleep(Duration::from_millis(250)).await;
        acc.push(2);
        assert_eq!(acc.age(), Duration::from_millis(250));

        acc.take(FlushReason::TimeInterval);
        tokio::time::sleep(Duration::from_millis(100)).await;
        acc.push(3);
        assert_eq!(acc.age(), Duration::ZERO);
    }

    #[test]
    fn test_take_preserves_order() {
        let mut acc = Accumulator::new(100);
        for i in 0..50 {
            acc.push(i);
        }

        let batch = acc.take(FlushReason::Close).unwrap();
        assert_eq!(batch.items, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_batch_size_one_flushes_every_item() {
        let mut acc = Accumulator::new(1);
        assert_eq!(acc.push(7), Some(FlushReason::SizeLimit));
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(FlushReason::SizeLimit.to_string(), "size_limit");
        assert_eq!(FlushReason::TimeInterval.to_string(), "time_interval");
        assert_eq!(FlushReason::Close.to_string(), "close");
    }
}
