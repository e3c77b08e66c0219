// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Buffered batch processing with size, time and close triggers.
//!
//! A [`BatchProcessor`] owns one [`Buffer`] and starts `consumers`
//! independent tasks. Each task keeps a private [`Accumulator`] and a single
//! reusable timer, and hands batches to the [`Flush`] callback when:
//!
//! - the accumulator reaches `batch_size` ([`FlushReason::SizeLimit`]),
//! - the flush interval elapses with items pending ([`FlushReason::TimeInterval`]),
//! - the buffer is closed and drained ([`FlushReason::Close`]).
//!
//! The timer is reset after every flush and on every expiry, so the interval
//! is measured from the last flush or expiry, not from the last item.
//!
//! Items within one consumer are flushed in arrival order. With more than
//! one consumer there is no ordering between items handled by different
//! consumers, in exchange for batches being in flight concurrently.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ingest_engine::{BatchConfig, BatchProcessor, FlushBatch, NoopMetrics};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = BatchConfig {
//!     batch_size: 100,
//!     ..BatchConfig::named("ratelimits")
//! };
//! let flush = |batch: FlushBatch<String>| async move {
//!     println!("{} events ({})", batch.len(), batch.reason);
//! };
//!
//! let processor = BatchProcessor::new(config, Arc::new(flush), Arc::new(NoopMetrics)).unwrap();
//! processor.enqueue("identifier=user_123 passed=true".to_string()).await;
//! processor.drain().await;
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::batching::accumulator::{Accumulator, FlushBatch, FlushReason};
use crate::buffer::{Buffer, BufferReceiver};
use crate::config::{BatchConfig, ConfigError};
use crate::metrics::MetricsPort;

/// Receives every batch a consumer produces.
///
/// Implementations must not panic; a panic ends the consumer task that
/// called it. Slow implementations only delay the calling consumer.
#[async_trait]
pub trait Flush<T>: Send + Sync {
    async fn flush(&self, batch: FlushBatch<T>);
}

#[async_trait]
impl<T, F, Fut> Flush<T> for F
where
    T: Send + 'static,
    F: Fn(FlushBatch<T>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn flush(&self, batch: FlushBatch<T>) {
        (self)(batch).await
    }
}

/// Bounded buffer plus the consumer tasks that batch and flush it.
pub struct BatchProcessor<T> {
    buffer: Buffer<T>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    config: BatchConfig,
}

impl<T: Send + 'static> BatchProcessor<T> {
    /// Validate `config`, build the buffer and start the consumers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: BatchConfig,
        flusher: Arc<dyn Flush<T>>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let buffer = Buffer::with_sample_interval(
            config.buffer_capacity,
            config.drop_on_full,
            config.name.clone(),
            Arc::clone(&metrics),
            config.occupancy_sample_interval(),
        )?;

        let handles = (0..config.consumer_count())
            .map(|id| {
                let consumer = Consumer {
                    id,
                    name: config.name.clone(),
                    batch_size: config.batch_size,
                    interval: config.flush_interval(),
                    receiver: buffer.consume(),
                    flusher: Arc::clone(&flusher),
                    metrics: Arc::clone(&metrics),
                };
                tokio::spawn(consumer.run())
            })
            .collect();

        debug!(
            processor = %config.name,
            consumers = config.consumer_count(),
            batch_size = config.batch_size,
            capacity = config.buffer_capacity,
            drop_on_full = config.drop_on_full,
            "Batch processor started"
        );

        Ok(Self {
            buffer,
            consumers: Mutex::new(handles),
            config,
        })
    }
}

impl<T> BatchProcessor<T> {
    /// Hand an item to the buffer. Fire-and-forget; see [`Buffer::enqueue`].
    pub async fn enqueue(&self, item: T) {
        self.buffer.enqueue(item).await;
    }

    /// Close the buffer. Consumers flush what they hold and exit on their
    /// own; this does not wait for them. Idempotent: returns `true` only for
    /// the call that closed the buffer.
    pub async fn close(&self) -> bool {
        self.buffer.close().await
    }

    /// Close the buffer and wait until every consumer has flushed its final
    /// batch and exited.
    pub async fn drain(&self) {
        self.buffer.close().await;

        let handles = std::mem::take(&mut *self.consumers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(processor = %self.config.name, error = %e, "Consumer task failed");
            }
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }

    /// Approximate queued item count. Diagnostics only.
    #[must_use]
    pub fn size(&self) -> usize {
        self.buffer.size()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }
}

struct Consumer<T> {
    id: usize,
    name: String,
    batch_size: usize,
    interval: Duration,
    receiver: BufferReceiver<T>,
    flusher: Arc<dyn Flush<T>>,
    metrics: Arc<dyn MetricsPort>,
}

impl<T> Consumer<T> {
    async fn run(self) {
        let mut acc = Accumulator::new(self.batch_size);
        let timer = tokio::time::sleep(self.interval);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                item = self.receiver.recv() => match item {
                    Some(item) => {
                        if let Some(reason) = acc.push(item) {
                            self.flush(&mut acc, reason).await;
                            timer.as_mut().reset(Instant::now() + self.interval);
                        }
                    }
                    None => {
                        self.flush(&mut acc, FlushReason::Close).await;
                        break;
                    }
                },

                () = &mut timer => {
                    self.flush(&mut acc, FlushReason::TimeInterval).await;
                    timer.as_mut().reset(Instant::now() + self.interval);
                }
            }
        }

        debug!(processor = %self.name, consumer = self.id, "Consumer exited");
    }

    async fn flush(&self, acc: &mut Accumulator<T>, reason: FlushReason) {
        let Some(batch) = acc.take(reason) else { return };

        debug!(
            processor = %self.name,
            consumer = self.id,
            batch_size = batch.len(),
            reason = %reason,
            "Flushing batch"
        );
        self.metrics.record_flush(&self.name, reason, batch.len());
        self.flusher.flush(batch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{BufferState, NoopMetrics};
    use parking_lot::Mutex as SyncMutex;

    type Log<T> = Arc<SyncMutex<Vec<FlushBatch<T>>>>;

    fn recording<T: Send + 'static>() -> (Arc<dyn Flush<T>>, Log<T>) {
        let log: Log<T> = Arc::new(SyncMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let flush = move |batch: FlushBatch<T>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(batch);
            }
        };
        (Arc::new(flush), log)
    }

    fn config(batch_size: usize, interval_ms: u64) -> BatchConfig {
        BatchConfig {
            batch_size,
            buffer_capacity: 100,
            flush_interval_ms: interval_ms,
            drop_on_full: false,
            ..BatchConfig::named("test")
        }
    }

    #[derive(Default)]
    struct FlushCounter {
        flushes: SyncMutex<Vec<(FlushReason, usize)>>,
    }

    impl MetricsPort for FlushCounter {
        fn record_state(&self, _name: &str, _state: BufferState) {}
        fn record_size(&self, _name: &str, _drop_on_full: bool, _ratio: f64) {}
        fn record_flush(&self, _name: &str, trigger: FlushReason, batch_size: usize) {
            self.flushes.lock().push((trigger, batch_size));
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (flush, _) = recording::<u32>();
        let result = BatchProcessor::new(config(0, 100), flush, Arc::new(NoopMetrics));
        assert!(matches!(result, Err(ConfigError::ZeroBatchSize)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_trigger_flushes_partial_batch() {
        let (flush, log) = recording();
        let processor = BatchProcessor::new(config(1000, 100), flush, Arc::new(NoopMetrics)).unwrap();

        for i in 0..5u32 {
            processor.enqueue(i).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        {
            let log = log.lock();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].reason, FlushReason::TimeInterval);
            assert_eq!(log[0].items, vec![0, 1, 2, 3, 4]);
        }
        processor.drain().await;
        assert_eq!(log.lock().len(), 1, "nothing left for the close flush");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_resets_after_size_flush() {
        let (flush, log) = recording();
        let processor = BatchProcessor::new(config(3, 100), flush, Arc::new(NoopMetrics)).unwrap();

        // t=50: full batch, timer restarts from here (next expiry t=150)
        tokio::time::sleep(Duration::from_millis(50)).await;
        for i in 0..3u32 {
            processor.enqueue(i).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        processor.enqueue(3).await;

        // t=140: neither the original t=100 deadline nor the item age applies
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(log.lock().len(), 1);

        // t=160: interval measured from the size flush
        tokio::time::sleep(Duration::from_millis(20)).await;
        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].reason, FlushReason::SizeLimit);
        assert_eq!(log[1].reason, FlushReason::TimeInterval);
        assert_eq!(log[1].items, vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_resets_on_empty_expiry() {
        let (flush, log) = recording();
        let processor = BatchProcessor::new(config(10, 100), flush, Arc::new(NoopMetrics)).unwrap();

        // t=100 expires with nothing pending, next expiry at t=200
        tokio::time::sleep(Duration::from_millis(150)).await;
        processor.enqueue(1u32).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(log.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_flushes_every_consumer() {
        let (flush, log) = recording();
        let config = BatchConfig {
            consumers: 4,
            ..config(1000, 60_000)
        };
        let processor = BatchProcessor::new(config, flush, Arc::new(NoopMetrics)).unwrap();

        for i in 0..100u32 {
            processor.enqueue(i).await;
        }
        processor.drain().await;

        let log = log.lock();
        assert!(log.iter().all(|b| b.reason == FlushReason::Close));
        let mut items: Vec<u32> = log.iter().flat_map(|b| b.items.iter().copied()).collect();
        items.sort_unstable();
        assert_eq!(items, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_each_consumer_preserves_arrival_order() {
        let (flush, log) = recording();
        let config = BatchConfig {
            consumers: 3,
            ..config(7, 60_000)
        };
        let processor = BatchProcessor::new(config, flush, Arc::new(NoopMetrics)).unwrap();

        for i in 0..200u32 {
            processor.enqueue(i).await;
        }
        processor.drain().await;

        for batch in log.lock().iter() {
            assert!(batch.len() <= 7);
            assert!(batch.items.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn test_flushes_reported_to_metrics() {
        let (flush, _) = recording();
        let metrics = Arc::new(FlushCounter::default());
        let processor = BatchProcessor::new(config(2, 60_000), flush, metrics.clone()).unwrap();

        for i in 0..5u32 {
            processor.enqueue(i).await;
        }
        processor.drain().await;

        assert_eq!(
            *metrics.flushes.lock(),
            vec![
                (FlushReason::SizeLimit, 2),
                (FlushReason::SizeLimit, 2),
                (FlushReason::Close, 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_drain_is_idempotent() {
        let (flush, log) = recording::<u32>();
        let processor = BatchProcessor::new(config(10, 60_000), flush, Arc::new(NoopMetrics)).unwrap();

        processor.enqueue(1).await;
        processor.drain().await;
        processor.drain().await;
        processor.close().await;

        assert!(processor.is_closed());
        assert_eq!(log.lock().len(), 1);
    }
}
