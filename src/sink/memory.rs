// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use parking_lot::Mutex;
use super::traits::{Sink, SinkError};

/// Sink that keeps every delivered batch in memory.
pub struct MemorySink<T> {
    name: String,
    batches: Mutex<Vec<Vec<T>>>,
}

impl<T: Clone> MemorySink<T> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Delivered batches, in delivery order
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<T>> {
        self.batches.lock().clone()
    }

    /// Every delivered item, flattened
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Number of delivered batches
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }

    /// Total delivered items across batches
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }

    pub fn clear(&self) {
        self.batches.lock().clear();
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> Sink<T> for MemorySink<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, batch: &[T]) -> Result<(), SinkError> {
        self.batches.lock().push(batch.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_sink_is_empty() {
        let sink: MemorySink<u32> = MemorySink::new("mem");
        assert!(sink.is_empty());
        assert_eq!(sink.len(), 0);
        assert_eq!(sink.name(), "mem");
    }

    #[tokio::test]
    async fn test_deliver_keeps_batch_boundaries() {
        let sink = MemorySink::new("mem");
        sink.deliver(&[1, 2, 3]).await.unwrap();
        sink.deliver(&[4]).await.unwrap();

        assert_eq!(sink.batches(), vec![vec![1, 2, 3], vec![4]]);
        assert_eq!(sink.items(), vec![1, 2, 3, 4]);
        assert_eq!(sink.item_count(), 4);
    }

    #[tokio::test]
    async fn test_clear() {
        let sink = MemorySink::new("mem");
        sink.deliver(&["a".to_string()]).await.unwrap();
        sink.clear();
        assert!(sink.is_empty());
    }
}
