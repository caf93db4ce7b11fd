//! Dead Letter Queue for failed batches
//!
//! The engine never retries a batch. When a dispatch fails, the batch lands
//! here so callers can inspect it and resubmit above the engine.

use bulkline_core::metrics::set_dlq_size;
use bulkline_core::prelude::*;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::warn;

/// Dead letter queue entry
#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub batch: Batch,
    pub error: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Bounded in-memory dead letter queue
pub struct DeadLetterQueue {
    max_size: usize,
    entries: RwLock<VecDeque<DlqEntry>>,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn add(&self, batch: Batch, error: String) {
        let mut entries = self.entries.write().await;

        if entries.len() >= self.max_size {
            warn!(max_size = self.max_size, "DLQ full, dropping oldest entry");
            entries.pop_front();
        }

        entries.push_back(DlqEntry {
            batch,
            error,
            timestamp: chrono::Utc::now(),
        });
        set_dlq_size(entries.len());
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Take every entry, oldest first
    pub async fn drain(&self) -> Vec<DlqEntry> {
        let mut entries = self.entries.write().await;
        set_dlq_size(0);
        entries.drain(..).collect()
    }

    pub async fn peek(&self, count: usize) -> Vec<DlqEntry> {
        self.entries.read().await.iter().take(count).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(sequence: u64) -> Batch {
        Batch::new(
            Target::new("db", "col"),
            vec![WriteOp::insert(json!({"seq": sequence}))],
        )
        .with_position(1, sequence)
    }

    #[tokio::test]
    async fn test_drops_oldest_when_full() {
        let dlq = DeadLetterQueue::new(2);
        for seq in 0..3 {
            dlq.add(batch(seq), "boom".to_string()).await;
        }

        assert_eq!(dlq.len().await, 2);
        let entries = dlq.drain().await;
        assert_eq!(entries[0].batch.sequence, 1);
        assert_eq!(entries[1].batch.sequence, 2);
        assert!(dlq.is_empty().await);
    }

    #[tokio::test]
    async fn test_peek_does_not_remove() {
        let dlq = DeadLetterQueue::new(10);
        dlq.add(batch(0), "timeout".to_string()).await;

        let peeked = dlq.peek(5).await;
        assert_eq!(peeked.len(), 1);
        assert_eq!(peeked[0].error, "timeout");
        assert_eq!(dlq.len().await, 1);
    }
}
