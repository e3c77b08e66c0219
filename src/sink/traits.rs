// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink rejected credentials: {0}")]
    Unauthorized(String),
    #[error("Sink denied access: {0}")]
    Forbidden(String),
    #[error("Sink rejected batch: {0}")]
    InvalidBatch(String),
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
    #[error("Sink timed out after {0:?}")]
    Timeout(Duration),
    #[error("Sink backend error: {0}")]
    Backend(String),
}

impl SinkError {
    /// Transient failures are worth retrying; auth and payload errors are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout(_) | Self::Backend(_)
        )
    }
}

/// Downstream store that accepts whole batches.
///
/// Implementations deliver all items or fail; partial success is reported
/// as an error and the batch is retried as a whole.
#[async_trait]
pub trait Sink<T>: Send + Sync {
    /// Name used in circuit breaker, metric and log labels
    fn name(&self) -> &str;

    async fn deliver(&self, batch: &[T]) -> Result<(), SinkError>;
}
