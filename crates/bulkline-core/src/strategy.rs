//! Sink strategy trait
//!
//! The batching engine never talks to a store directly. Everything it needs
//! from the outside world is expressed by [`BatchSink`]: apply one batch
//! against its target and say how it went.
//!
//! ```text
//! producers ──► BatchBlock ──► aggregator ──► limiter ──► BatchSink
//!                                                  │
//!                                     TimeoutSink / RetryingSink / ...
//! ```
//!
//! Decorators wrap a sink to add deadlines or retries without the aggregator
//! knowing about either.

use crate::error::{BulkError, Result};
use crate::message::Batch;
use async_trait::async_trait;
use std::sync::Arc;

/// Write result for tracking success/failure
#[derive(Debug, Clone)]
pub struct WriteResult {
    /// Number of ops successfully applied
    pub success_count: usize,
    /// Number of ops that failed
    pub failure_count: usize,
    /// Position in the batch and reason for each failed op
    pub failures: Vec<(usize, String)>,
    /// Time taken for the write operation
    pub duration_ms: u64,
}

impl WriteResult {
    /// Create a fully successful result
    pub fn success(count: usize, duration_ms: u64) -> Self {
        Self {
            success_count: count,
            failure_count: 0,
            failures: Vec::new(),
            duration_ms,
        }
    }

    /// Create a result from a batch size and the ops that failed
    pub fn partial(total: usize, failures: Vec<(usize, String)>, duration_ms: u64) -> Self {
        let failure_count = failures.len().min(total);
        Self {
            success_count: total - failure_count,
            failure_count,
            failures,
            duration_ms,
        }
    }

    /// Check if all writes succeeded
    pub fn is_complete_success(&self) -> bool {
        self.failure_count == 0
    }

    /// Turn a partial failure into [`BulkError::PartialWrite`]
    pub fn into_result(self) -> Result<WriteResult> {
        if self.is_complete_success() {
            Ok(self)
        } else {
            Err(BulkError::PartialWrite {
                succeeded: self.success_count,
                failed: self.failure_count,
                failures: self.failures,
            })
        }
    }
}

/// Sink strategy - applies a batch to the target store
///
/// Implementations:
/// - `MemorySink`: records batches in memory (tests, dry runs)
/// - `JsonLinesSink`: writes batches as NDJSON to a stream
/// - `TimeoutSink` / `RetryingSink`: decorators over another sink
///
/// `batch.ordered == false` means unordered bulk semantics: items may be
/// applied in any order and one failing item must not block the others.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Apply every op of the batch against `batch.target`.
    ///
    /// Partial failures may be reported either as `Ok` with a non-zero
    /// `failure_count` or as [`BulkError::PartialWrite`]; the engine treats
    /// both the same way.
    async fn submit(&self, batch: &Batch) -> Result<WriteResult>;

    /// Get component name for logging
    fn component_name(&self) -> &'static str;
}

#[async_trait]
impl<S: BatchSink + ?Sized> BatchSink for Arc<S> {
    async fn submit(&self, batch: &Batch) -> Result<WriteResult> {
        (**self).submit(batch).await
    }

    fn component_name(&self) -> &'static str {
        (**self).component_name()
    }
}
