//! Producer-facing batch handle
//!
//! A [`BatchBlock`] is the stable identity of one write target. Internally it
//! runs a sequence of generations; each generation owns one inbound queue,
//! one aggregator task and one join group. Closing a block ends the current
//! generation, and reopening installs a fresh one behind the same handle.

use crate::aggregator::{Aggregator, DispatchContext, Request};
use crate::dlq::DeadLetterQueue;
use crate::limiter::ConcurrencyLimiter;
use bulkline_core::prelude::*;
use bulkline_core::BatchMetrics;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};

/// Lifecycle state of a block's current generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Open,
    /// Close requested; buffered writes are being dispatched
    Draining,
    Closed,
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Draining => f.write_str("draining"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Per-block knobs
#[derive(Debug, Clone)]
pub struct BlockSettings {
    pub limit: usize,
    pub queue_capacity: usize,
    pub ordered: bool,
}

impl BlockSettings {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            queue_capacity: 1,
            ordered: false,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(BulkError::config("batch limit must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(BulkError::config("queue capacity must be at least 1"));
        }
        Ok(())
    }
}

/// One open-to-closed lifecycle of a block
struct Generation {
    id: u64,
    limit: usize,
    tx: mpsc::Sender<Request>,
    status: Arc<watch::Sender<BlockStatus>>,
}

impl Generation {
    fn status(&self) -> BlockStatus {
        *self.status.borrow()
    }
}

/// Handle producers use to submit writes for one target.
///
/// Must be created inside a tokio runtime: opening a generation spawns its
/// aggregator task. Dropping every handle without closing still drains the
/// buffer in the background.
pub struct BatchBlock {
    target: Target,
    queue_capacity: usize,
    ordered: Arc<AtomicBool>,
    dispatch: DispatchContext,
    generations: AtomicU64,
    current: RwLock<Arc<Generation>>,
}

impl BatchBlock {
    /// Create the block and start its first generation
    pub fn open(
        target: Target,
        settings: BlockSettings,
        sink: Arc<dyn BatchSink>,
        limiter: ConcurrencyLimiter,
        dlq: Option<Arc<DeadLetterQueue>>,
    ) -> Result<Self> {
        settings.validate()?;

        let dispatch = DispatchContext {
            sink,
            limiter,
            dlq,
            metrics: BatchMetrics::new("bulk_block", target.key()),
        };
        let ordered = Arc::new(AtomicBool::new(settings.ordered));
        let first = Self::start_generation(&target, 1, &settings, &ordered, &dispatch);

        info!(block = %target, limit = settings.limit, "bulk start");
        Ok(Self {
            target,
            queue_capacity: settings.queue_capacity,
            ordered,
            dispatch,
            generations: AtomicU64::new(1),
            current: RwLock::new(Arc::new(first)),
        })
    }

    fn start_generation(
        target: &Target,
        id: u64,
        settings: &BlockSettings,
        ordered: &Arc<AtomicBool>,
        dispatch: &DispatchContext,
    ) -> Generation {
        let (tx, rx) = mpsc::channel(settings.queue_capacity);
        let status = Arc::new(watch::Sender::new(BlockStatus::Open));

        let aggregator = Aggregator::new(
            target.clone(),
            id,
            settings.limit,
            ordered.clone(),
            rx,
            status.clone(),
            dispatch.clone(),
        );
        tokio::spawn(aggregator.run());
        dispatch.metrics.record_opened();

        Generation {
            id,
            limit: settings.limit,
            tx,
            status,
        }
    }

    fn generation_handle(&self) -> Arc<Generation> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Install a fresh generation with a new limit.
    ///
    /// Only valid once the current generation is `Closed`; anything else is
    /// left untouched and reported as an error.
    pub(crate) fn reopen(&self, limit: usize) -> Result<()> {
        let settings = BlockSettings {
            limit,
            queue_capacity: self.queue_capacity,
            ordered: self.ordered.load(Ordering::Acquire),
        };
        settings.validate()?;

        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if current.status() != BlockStatus::Closed {
            return Err(BulkError::Internal(format!(
                "{} is {}, cannot reopen",
                self.target,
                current.status()
            )));
        }

        let id = self.generations.fetch_add(1, Ordering::AcqRel) + 1;
        *current = Arc::new(Self::start_generation(
            &self.target,
            id,
            &settings,
            &self.ordered,
            &self.dispatch,
        ));

        info!(block = %self.target, generation = id, limit, "bulk restart");
        Ok(())
    }

    /// Queue one write.
    ///
    /// Waits while the aggregator is busy. Fails with a fatal
    /// [`BulkError::LifecycleViolation`] once the block is draining or closed.
    pub async fn add(&self, op: WriteOp) -> Result<()> {
        let generation = self.generation_handle();
        if generation.status() != BlockStatus::Open {
            return Err(self.put_after_close(&generation));
        }

        generation
            .tx
            .send(Request::Write(op))
            .await
            .map_err(|_| self.put_after_close(&generation))
    }

    fn put_after_close(&self, generation: &Generation) -> BulkError {
        error!(
            block = %self.target,
            generation = generation.id,
            status = %generation.status(),
            "put after close"
        );
        BulkError::lifecycle(&self.target)
    }

    /// Cut the partially filled batch now.
    ///
    /// Returns once the batch is cut; its dispatch may still be running.
    /// Writes racing with the flush from other tasks may land in this batch
    /// or the next one. No-op when the block is not open.
    pub async fn flush(&self) -> Result<()> {
        let generation = self.generation_handle();
        if generation.status() != BlockStatus::Open {
            return Ok(());
        }

        let (ack, cut) = oneshot::channel();
        if generation.tx.send(Request::Flush(ack)).await.is_err() {
            // Closed concurrently; shutdown cuts the remainder anyway
            return Ok(());
        }
        let _ = cut.await;
        Ok(())
    }

    /// End input and wait until every buffered write has been dispatched
    /// and every dispatch has finished.
    ///
    /// Safe to call repeatedly and from several tasks; all callers return
    /// once the generation is closed. Dispatch failures are not reported
    /// here; they go to logs, metrics and the dead-letter queue.
    pub async fn close(&self) {
        let generation = self.generation_handle();

        let initiated = generation.status.send_if_modified(|status| {
            if *status == BlockStatus::Open {
                *status = BlockStatus::Draining;
                true
            } else {
                false
            }
        });
        if initiated {
            debug!(block = %self.target, generation = generation.id, "Close requested");
            // An error means the aggregator already stopped receiving
            let _ = generation.tx.send(Request::Close).await;
        }

        Self::wait_closed(&generation).await;
    }

    async fn wait_closed(generation: &Generation) {
        let mut status = generation.status.subscribe();
        let _ = status.wait_for(|s| *s == BlockStatus::Closed).await;
    }

    /// Wait for the current generation to finish without requesting a close
    pub(crate) async fn closed(&self) {
        let generation = self.generation_handle();
        Self::wait_closed(&generation).await;
    }

    pub fn status(&self) -> BlockStatus {
        self.generation_handle().status()
    }

    pub fn is_closed(&self) -> bool {
        self.status() == BlockStatus::Closed
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Batch size of the current generation
    pub fn limit(&self) -> usize {
        self.generation_handle().limit
    }

    /// Current generation number, starting at 1
    pub fn generation(&self) -> u64 {
        self.generation_handle().id
    }

    /// Ordered flag applied to batches cut from now on
    pub fn set_ordered(&self, ordered: bool) {
        self.ordered.store(ordered, Ordering::Release);
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered.load(Ordering::Acquire)
    }
}

impl fmt::Display for BatchBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (generation {})", self.target, self.generation())
    }
}

impl fmt::Debug for BatchBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchBlock")
            .field("target", &self.target)
            .field("generation", &self.generation())
            .field("limit", &self.limit())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use futures::future::join_all;
    use serde_json::json;
    use std::time::Duration;

    fn open_block(limit: usize, sink: Arc<MemorySink>, max_in_flight: usize) -> BatchBlock {
        BatchBlock::open(
            Target::new("db", "col"),
            BlockSettings::new(limit),
            sink,
            ConcurrencyLimiter::new(max_in_flight).unwrap(),
            None,
        )
        .unwrap()
    }

    fn op(name: &str) -> WriteOp {
        WriteOp::insert(json!({ "name": name }))
    }

    fn names(batch: &Batch) -> Vec<String> {
        batch
            .iter()
            .map(|op| match op {
                WriteOp::InsertOne { document } => document["name"].as_str().unwrap().to_string(),
                other => panic!("unexpected op {:?}", other),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_limit_three_five_ops_then_close() {
        let sink = Arc::new(MemorySink::new());
        let block = open_block(3, sink.clone(), 3);

        for name in ["a", "b", "c", "d", "e"] {
            block.add(op(name)).await.unwrap();
        }
        block.close().await;

        let mut batches = sink.batches().await;
        batches.sort_by_key(|b| b.sequence);
        assert_eq!(batches.len(), 2);
        assert_eq!(names(&batches[0]), vec!["a", "b", "c"]);
        assert_eq!(names(&batches[1]), vec!["d", "e"]);
        assert!(block.is_closed());
    }

    async fn wait_for_batches(sink: &MemorySink, n: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while sink.batch_count().await < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("batch was not dispatched");
    }

    #[tokio::test]
    async fn test_flush_cuts_partial_batch() {
        let sink = Arc::new(MemorySink::new());
        let block = open_block(100, sink.clone(), 3);

        block.add(op("a")).await.unwrap();
        block.add(op("b")).await.unwrap();
        block.flush().await.unwrap();

        // Dispatched while the block is still open
        wait_for_batches(&sink, 1).await;
        assert_eq!(block.status(), BlockStatus::Open);

        block.add(op("c")).await.unwrap();
        block.close().await;

        let mut batches = sink.batches().await;
        batches.sort_by_key(|b| b.sequence);
        assert_eq!(batches.len(), 2);
        assert_eq!(names(&batches[0]), vec!["a", "b"]);
        assert_eq!(names(&batches[1]), vec!["c"]);
    }

    #[tokio::test]
    async fn test_flush_returns_with_slot_taken() {
        let sink = Arc::new(MemorySink::new().with_delay(Duration::from_millis(200)));
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let block = BatchBlock::open(
            Target::new("db", "col"),
            BlockSettings::new(100),
            sink.clone(),
            limiter.clone(),
            None,
        )
        .unwrap();

        block.add(op("a")).await.unwrap();
        block.flush().await.unwrap();
        assert_eq!(limiter.in_use(), 1);
        assert_eq!(sink.batch_count().await, 0);

        block.close().await;
        assert_eq!(limiter.in_use(), 0);
        assert_eq!(sink.batch_count().await, 1);
    }

    #[tokio::test]
    async fn test_batch_size_invariant() {
        for (n, limit) in [(0usize, 4usize), (7, 1), (10, 3), (12, 4), (5, 9)] {
            let sink = Arc::new(MemorySink::new());
            let block = open_block(limit, sink.clone(), 2);
            for i in 0..n {
                block.add(op(&i.to_string())).await.unwrap();
            }
            block.close().await;

            let sizes = sink.batch_sizes().await;
            let full = sizes.iter().filter(|&&s| s == limit).count();
            assert_eq!(full, n / limit, "n={} limit={}", n, limit);
            let rest: Vec<_> = sizes.iter().filter(|&&s| s != limit).collect();
            if n % limit == 0 {
                assert!(rest.is_empty());
            } else {
                assert_eq!(rest, vec![&(n % limit)]);
            }
            assert_eq!(sink.total_ops().await, n);
        }
    }

    #[tokio::test]
    async fn test_add_after_close_is_fatal() {
        let sink = Arc::new(MemorySink::new());
        let block = open_block(10, sink.clone(), 3);
        block.close().await;

        let err = block.add(op("late")).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn test_flush_after_close_is_noop() {
        let sink = Arc::new(MemorySink::new());
        let block = open_block(10, sink.clone(), 3);
        block.close().await;
        block.flush().await.unwrap();
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let sink = Arc::new(MemorySink::new());
        let block = open_block(10, sink.clone(), 3);
        block.add(op("a")).await.unwrap();

        block.close().await;
        block.close().await;

        assert_eq!(sink.attempts(), 1);
        assert_eq!(block.status(), BlockStatus::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_close_all_return() {
        let sink = Arc::new(MemorySink::new().with_delay(Duration::from_millis(30)));
        let block = Arc::new(open_block(2, sink.clone(), 3));
        for i in 0..5 {
            block.add(op(&i.to_string())).await.unwrap();
        }

        let closers = (0..4).map(|_| {
            let block = block.clone();
            tokio::spawn(async move { block.close().await })
        });
        for closer in join_all(closers).await {
            closer.unwrap();
        }

        assert_eq!(sink.total_ops().await, 5);
        assert_eq!(sink.attempts(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispatch_concurrency_bound() {
        let sink = Arc::new(MemorySink::new().with_delay(Duration::from_millis(20)));
        let block = open_block(1, sink.clone(), 2);

        for i in 0..12 {
            block.add(op(&i.to_string())).await.unwrap();
        }
        block.close().await;

        assert_eq!(sink.batch_count().await, 12);
        assert!(sink.peak_in_flight() <= 2);
        assert!(sink.peak_in_flight() >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_lose_nothing() {
        let sink = Arc::new(MemorySink::new());
        let block = Arc::new(open_block(7, sink.clone(), 3));

        let producers = (0..8).map(|p| {
            let block = block.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    block.add(op(&format!("{}-{}", p, i))).await.unwrap();
                }
            })
        });
        for producer in join_all(producers).await {
            producer.unwrap();
        }
        block.close().await;

        assert_eq!(sink.total_ops().await, 200);
        assert!(sink.batch_sizes().await.iter().all(|&s| s <= 7));
    }

    #[tokio::test]
    async fn test_close_waits_for_failed_dispatches() {
        let sink = Arc::new(MemorySink::new().fail_first(1));
        let block = open_block(2, sink.clone(), 3);
        for name in ["a", "b", "c"] {
            block.add(op(name)).await.unwrap();
        }
        block.close().await;

        assert_eq!(sink.attempts(), 2);
        assert_eq!(sink.batch_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_reaches_dlq() {
        let sink = Arc::new(MemorySink::new().reject_ops(1));
        let dlq = Arc::new(DeadLetterQueue::new(8));
        let block = BatchBlock::open(
            Target::new("db", "col"),
            BlockSettings::new(2),
            sink,
            ConcurrencyLimiter::new(1).unwrap(),
            Some(dlq.clone()),
        )
        .unwrap();

        block.add(op("a")).await.unwrap();
        block.add(op("b")).await.unwrap();
        block.close().await;

        let entries = dlq.drain().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].batch.len(), 2);
        assert_eq!(entries[0].error, "bulk write failed: 1 failed, 1 succeeded");
    }

    #[tokio::test]
    async fn test_reopen_starts_fresh_generation() {
        let sink = Arc::new(MemorySink::new());
        let block = open_block(2, sink.clone(), 3);
        block.add(op("a")).await.unwrap();
        block.close().await;

        block.reopen(5).unwrap();
        assert_eq!(block.generation(), 2);
        assert_eq!(block.limit(), 5);
        assert_eq!(block.status(), BlockStatus::Open);

        block.add(op("b")).await.unwrap();
        block.close().await;

        let mut batches = sink.batches().await;
        batches.sort_by_key(|b| b.generation);
        assert_eq!(batches.len(), 2);
        assert_eq!((batches[0].generation, batches[0].sequence), (1, 0));
        assert_eq!((batches[1].generation, batches[1].sequence), (2, 0));
        assert_eq!(names(&batches[1]), vec!["b"]);
    }

    #[tokio::test]
    async fn test_reopen_refused_while_open() {
        let block = open_block(2, Arc::new(MemorySink::new()), 3);
        assert!(block.reopen(3).is_err());
        assert_eq!(block.generation(), 1);
        block.close().await;
    }

    #[tokio::test]
    async fn test_ordered_flag_applies_to_later_batches() {
        let sink = Arc::new(MemorySink::new());
        let block = open_block(1, sink.clone(), 1);

        block.add(op("a")).await.unwrap();
        block.flush().await.unwrap();
        block.set_ordered(true);
        block.add(op("b")).await.unwrap();
        block.close().await;

        let mut batches = sink.batches().await;
        batches.sort_by_key(|b| b.sequence);
        assert!(!batches[0].ordered);
        assert!(batches[1].ordered);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let result = BatchBlock::open(
                Target::new("db", "col"),
                BlockSettings::new(0),
                Arc::new(MemorySink::new()),
                ConcurrencyLimiter::new(1).unwrap(),
                None,
            );
            assert!(matches!(result, Err(BulkError::Configuration { .. })));
        });
    }
}
