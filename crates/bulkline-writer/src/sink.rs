//! Reference sinks and sink decorators
//!
//! - [`MemorySink`]: records batches in memory, with optional delay and
//!   failure injection; tracks peak concurrent submits
//! - [`JsonLinesSink`]: writes each batch as NDJSON to an `AsyncWrite`
//! - [`TimeoutSink`]: bounds every submit with a deadline

use async_trait::async_trait;
use bulkline_core::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tracing::trace;

// ============================================================================
// Memory sink
// ============================================================================

/// In-memory sink for tests and dry runs
#[derive(Default)]
pub struct MemorySink {
    batches: RwLock<Vec<Batch>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    delay: Option<Duration>,
    fail_first: usize,
    fail_every: Option<usize>,
    reject_ops: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every submit for `delay` before applying it
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the first `n` submits outright
    pub fn fail_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Fail every `n`th submit outright
    pub fn fail_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    /// Report the first `n` ops of every batch as failed
    pub fn reject_ops(mut self, n: usize) -> Self {
        self.reject_ops = n;
        self
    }

    /// Batches applied successfully, in completion order
    pub async fn batches(&self) -> Vec<Batch> {
        self.batches.read().await.clone()
    }

    pub async fn batch_count(&self) -> usize {
        self.batches.read().await.len()
    }

    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batches.read().await.iter().map(Batch::len).collect()
    }

    /// Ops across all successfully applied batches
    pub async fn total_ops(&self) -> usize {
        self.batches.read().await.iter().map(Batch::len).sum()
    }

    /// Submits seen, including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of submits observed running at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn apply(&self, batch: &Batch, attempt: usize, start: Instant) -> Result<WriteResult> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let injected = attempt <= self.fail_first
            || self.fail_every.is_some_and(|n| attempt % n == 0);
        if injected {
            return Err(BulkError::sink(format!("injected failure on attempt {}", attempt)));
        }

        if self.reject_ops > 0 {
            let failures = (0..self.reject_ops.min(batch.len()))
                .map(|i| (i, "rejected".to_string()))
                .collect();
            let elapsed = start.elapsed().as_millis() as u64;
            return WriteResult::partial(batch.len(), failures, elapsed).into_result();
        }

        self.batches.write().await.push(batch.clone());
        Ok(WriteResult::success(batch.len(), start.elapsed().as_millis() as u64))
    }
}

#[async_trait]
impl BatchSink for MemorySink {
    async fn submit(&self, batch: &Batch) -> Result<WriteResult> {
        let start = Instant::now();
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.apply(batch, attempt, start).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn component_name(&self) -> &'static str {
        "memory_sink"
    }
}

// ============================================================================
// NDJSON sink
// ============================================================================

/// Writes each batch as one header line followed by one line per op
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn encode(batch: &Batch) -> Result<String> {
        let mut lines = String::new();
        let header = json!({
            "batch": {
                "target": batch.target.key(),
                "generation": batch.generation,
                "sequence": batch.sequence,
                "ordered": batch.ordered,
                "size": batch.len(),
            }
        });
        lines.push_str(&serde_json::to_string(&header)?);
        lines.push('\n');

        for op in batch.iter() {
            lines.push_str(&serde_json::to_string(op)?);
            lines.push('\n');
        }
        Ok(lines)
    }
}

#[async_trait]
impl<W> BatchSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn submit(&self, batch: &Batch) -> Result<WriteResult> {
        let start = Instant::now();
        let body = Self::encode(batch)?;

        // One batch per lock so lines of concurrent batches never interleave
        let mut writer = self.writer.lock().await;
        writer.write_all(body.as_bytes()).await?;
        writer.flush().await?;

        trace!(block = %batch.target, sequence = batch.sequence, bytes = body.len(), "Batch written");
        Ok(WriteResult::success(batch.len(), start.elapsed().as_millis() as u64))
    }

    fn component_name(&self) -> &'static str {
        "json_lines_sink"
    }
}

// ============================================================================
// Timeout decorator
// ============================================================================

/// Fails a submit with [`BulkError::Timeout`] when it runs past the deadline.
///
/// A hung store otherwise pins a limiter slot forever.
pub struct TimeoutSink<S> {
    inner: S,
    timeout: Duration,
}

impl<S: BatchSink> TimeoutSink<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<S: BatchSink> BatchSink for TimeoutSink<S> {
    async fn submit(&self, batch: &Batch) -> Result<WriteResult> {
        match tokio::time::timeout(self.timeout, self.inner.submit(batch)).await {
            Ok(result) => result,
            Err(_) => Err(BulkError::timeout(
                format!("{} submit", self.inner.component_name()),
                self.timeout.as_millis() as u64,
            )),
        }
    }

    fn component_name(&self) -> &'static str {
        self.inner.component_name()
    }
}
