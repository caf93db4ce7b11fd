//! Caller-owned map from target to batch block
//!
//! A registry belongs to whatever owns the store session; dropping or
//! closing the session tears its blocks down. All blocks created by one
//! registry share its sink, its dead-letter queue and one concurrency
//! limiter, so `max_in_flight` bounds dispatches across every target.

use crate::block::{BatchBlock, BlockSettings, BlockStatus};
use crate::dlq::DeadLetterQueue;
use crate::limiter::ConcurrencyLimiter;
use crate::retry::{RetryPolicy, RetryingSink};
use crate::sink::TimeoutSink;
use bulkline_core::prelude::*;
use bulkline_core::BatchConfig;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct Registry {
    sink: Arc<dyn BatchSink>,
    limiter: ConcurrencyLimiter,
    dlq: Option<Arc<DeadLetterQueue>>,
    batch: BatchConfig,
    blocks: Mutex<HashMap<Target, Arc<BatchBlock>>>,
}

impl Registry {
    /// Build a registry around `sink`.
    ///
    /// The sink is wrapped with a deadline when `batch.dispatch_timeout` is
    /// set, and with retries when `retry.enabled` is set; each retry attempt
    /// gets its own deadline.
    pub fn new(config: &EngineConfig, sink: Arc<dyn BatchSink>) -> Result<Self> {
        config.validate()?;

        let sink: Arc<dyn BatchSink> = match config.batch.dispatch_timeout {
            Some(timeout) => Arc::new(TimeoutSink::new(sink, timeout)),
            None => sink,
        };
        let sink: Arc<dyn BatchSink> = if config.retry.enabled {
            Arc::new(RetryingSink::new(sink, RetryPolicy::from(&config.retry)))
        } else {
            sink
        };

        let dlq = config
            .dlq
            .enabled
            .then(|| Arc::new(DeadLetterQueue::new(config.dlq.max_size)));

        Ok(Self {
            sink,
            limiter: ConcurrencyLimiter::new(config.batch.max_in_flight)?,
            dlq,
            batch: config.batch.clone(),
            blocks: Mutex::new(HashMap::new()),
        })
    }

    /// Block for `target` using the configured default limit
    pub async fn block(&self, target: &Target) -> Result<Arc<BatchBlock>> {
        self.get_or_create(target, self.batch.limit).await
    }

    /// Return the open block for `target`, creating or reopening it as needed.
    ///
    /// - absent: a new block is started with `limit`
    /// - open: returned unchanged; a different `limit` is ignored with a warning
    /// - closed: reopened in place with `limit`, same handle
    /// - draining: waits for the drain to finish, then reopens
    pub async fn get_or_create(&self, target: &Target, limit: usize) -> Result<Arc<BatchBlock>> {
        if limit == 0 {
            return Err(BulkError::config("batch limit must be at least 1"));
        }

        loop {
            let mut blocks = self.blocks.lock().await;

            let existing = match blocks.get(target) {
                Some(block) => block.clone(),
                None => {
                    let block = Arc::new(BatchBlock::open(
                        target.clone(),
                        self.settings(limit),
                        self.sink.clone(),
                        self.limiter.clone(),
                        self.dlq.clone(),
                    )?);
                    blocks.insert(target.clone(), block.clone());
                    return Ok(block);
                }
            };

            match existing.status() {
                BlockStatus::Open => {
                    if existing.limit() != limit {
                        warn!(
                            block = %target,
                            requested = limit,
                            active = existing.limit(),
                            "Block already open, ignoring requested limit"
                        );
                    }
                    return Ok(existing);
                }
                BlockStatus::Closed => {
                    existing.reopen(limit)?;
                    return Ok(existing);
                }
                BlockStatus::Draining => {
                    drop(blocks);
                    debug!(block = %target, "Waiting for drain before reopening");
                    existing.closed().await;
                }
            }
        }
    }

    fn settings(&self, limit: usize) -> BlockSettings {
        BlockSettings {
            limit,
            queue_capacity: self.batch.queue_capacity,
            ordered: self.batch.ordered,
        }
    }

    /// Look up without creating
    pub async fn get(&self, target: &Target) -> Option<Arc<BatchBlock>> {
        self.blocks.lock().await.get(target).cloned()
    }

    /// Close and forget the block for `target`.
    ///
    /// The entry stays registered while it drains, so a concurrent
    /// `get_or_create` waits on it instead of starting a second aggregator.
    /// If that caller reopens the block first, the reopened entry is kept.
    pub async fn remove(&self, target: &Target) -> bool {
        let Some(block) = self.get(target).await else {
            return false;
        };
        block.close().await;
        self.forget(std::slice::from_ref(&block)).await > 0
    }

    /// Close and forget every block of `database`; returns how many
    pub async fn remove_database(&self, database: &str) -> usize {
        let doomed: Vec<_> = self
            .blocks
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t.database == database)
            .map(|(_, block)| block.clone())
            .collect();

        join_all(doomed.iter().map(|block| block.close())).await;
        self.forget(&doomed).await
    }

    /// Drop entries that still hold one of `closed` and are still closed
    async fn forget(&self, closed: &[Arc<BatchBlock>]) -> usize {
        let mut blocks = self.blocks.lock().await;
        let mut forgotten = 0;
        for block in closed {
            let current = blocks.get(block.target());
            if current.is_some_and(|c| Arc::ptr_eq(c, block) && c.is_closed()) {
                blocks.remove(block.target());
                forgotten += 1;
            } else {
                debug!(block = %block.target(), "Block reopened during removal, keeping it");
            }
        }
        forgotten
    }

    /// Close every block and wait for all of them to drain.
    ///
    /// Entries stay registered, so a later `get_or_create` reopens them.
    pub async fn close_all(&self) {
        let blocks: Vec<_> = self.blocks.lock().await.values().cloned().collect();
        join_all(blocks.iter().map(|block| block.close())).await;
        info!(blocks = blocks.len(), "All blocks closed");
    }

    pub async fn len(&self) -> usize {
        self.blocks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blocks.lock().await.is_empty()
    }

    pub async fn targets(&self) -> Vec<Target> {
        let mut targets: Vec<_> = self.blocks.lock().await.keys().cloned().collect();
        targets.sort();
        targets
    }

    pub fn dlq(&self) -> Option<&Arc<DeadLetterQueue>> {
        self.dlq.as_ref()
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }
}
