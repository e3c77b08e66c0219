//! # Ingest Engine
//!
//! Buffered, batched ingestion of high-volume events into downstream stores.
//!
//! ## Architecture
//!
//! Producers hand typed items to a [`BatchProcessor`]. Items wait in a bounded
//! [`Buffer`], are grouped into batches by one or more consumer tasks, and each
//! batch is handed to a [`Flush`] target, usually a [`ResilientSink`]:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Producers                           │
//! │  • enqueue() never returns an error                         │
//! │  • Full queue: drop the item, or wait for room              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Bounded Buffer                         │
//! │  • FIFO, shared by all consumers                            │
//! │  • Occupancy sampled to metrics                             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!             (Consumers: flush on size, interval or close)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Resilient Sink                         │
//! │  • Retry with exponential backoff                           │
//! │  • Circuit breaker per downstream store                     │
//! │  • Undeliverable batches are logged and discarded           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ingest_engine::{BatchConfig, BatchProcessor, FacadeMetrics, MemorySink, ResilienceConfig, ResilientSink};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = Arc::new(ResilientSink::new(
//!         MemorySink::<u32>::new("warehouse"),
//!         &ResilienceConfig::default(),
//!     ).expect("valid config"));
//!
//!     let processor: BatchProcessor<u32> = BatchProcessor::new(
//!         BatchConfig {
//!             batch_size: 100,
//!             ..BatchConfig::named("api_requests")
//!         },
//!         sink.clone(),
//!         Arc::new(FacadeMetrics),
//!     )
//!     .expect("valid config");
//!
//!     for i in 0..250u32 {
//!         processor.enqueue(i).await;
//!     }
//!
//!     // Flushes everything still buffered before returning
//!     processor.drain().await;
//!     assert_eq!(sink.inner().item_count(), 250);
//! }
//! ```
//!
//! ## Features
//!
//! - **Typed Batching**: One processor per item type, flush on size or interval
//! - **Backpressure Policy**: Drop-on-full for telemetry, blocking for billing data
//! - **Graceful Drain**: Close flushes every accepted item before returning
//! - **Circuit Breakers**: Fail fast while a sink is down
//! - **Retry Logic**: Transient sink errors retried with backoff
//! - **Metrics**: Buffer, flush and delivery metrics via the `metrics` facade
//!
//! ## Modules
//!
//! - [`buffer`]: Bounded multi-consumer queue with a drop/block policy
//! - [`batching`]: Accumulator and the [`BatchProcessor`] consumer loop
//! - [`sink`]: Sink trait, in-memory sink, resilient wrapper
//! - [`resilience`]: Circuit breakers, retry logic
//! - [`backpressure`]: Occupancy levels
//! - [`metrics`]: Metric names and the [`MetricsPort`] seam
//! - [`config`]: Deserializable configuration

pub mod config;
pub mod buffer;
pub mod batching;
pub mod sink;
pub mod resilience;
pub mod backpressure;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::{BatchConfig, ConfigError, ResilienceConfig};
pub use buffer::{Buffer, BufferReceiver};
pub use batching::{Accumulator, BatchProcessor, Flush, FlushBatch, FlushReason};
pub use backpressure::OccupancyLevel;
pub use sink::{DeliveryError, MemorySink, ResilientSink, Sink, SinkError};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitState};
pub use resilience::retry::RetryConfig;
pub use metrics::{BufferState, FacadeMetrics, LatencyTimer, MetricsPort, NoopMetrics};
