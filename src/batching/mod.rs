// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch accumulation and the consumer tasks that drive it.
//!
//! - [`Accumulator`]: per-consumer pending items, no sharing
//! - [`BatchProcessor`]: owns a [`Buffer`](crate::Buffer) and its consumers
//! - [`Flush`]: the callback a batch is handed to

pub mod accumulator;
pub mod batch_processor;

pub use accumulator::{Accumulator, FlushBatch, FlushReason};
pub use batch_processor::{BatchProcessor, Flush};
