//! Per-generation aggregation loop
//!
//! The aggregator is the only reader of a block's inbound queue and the only
//! owner of its buffer. Producers talk to it through [`Request`] messages;
//! batches leave it as spawned dispatch tasks tracked in a `JoinSet`.

use crate::block::BlockStatus;
use crate::dlq::DeadLetterQueue;
use crate::limiter::{ConcurrencyLimiter, LimiterSlot};
use bulkline_core::prelude::*;
use bulkline_core::{BatchMetrics, ErrorContext, ErrorContextExt, LatencyTimer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Messages on a block's inbound queue
#[derive(Debug)]
pub(crate) enum Request {
    Write(WriteOp),
    /// Cut the partial batch; the sender is answered once it is cut
    Flush(oneshot::Sender<()>),
    Close,
}

/// Everything a dispatch task needs besides the batch itself
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub sink: Arc<dyn BatchSink>,
    pub limiter: ConcurrencyLimiter,
    pub dlq: Option<Arc<DeadLetterQueue>>,
    pub metrics: BatchMetrics,
}

pub(crate) struct Aggregator {
    target: Target,
    generation: u64,
    limit: usize,
    ordered: Arc<AtomicBool>,
    rx: mpsc::Receiver<Request>,
    status: Arc<watch::Sender<BlockStatus>>,
    ctx: DispatchContext,
    buffer: Vec<WriteOp>,
    sequence: u64,
    tasks: JoinSet<()>,
}

impl Aggregator {
    pub(crate) fn new(
        target: Target,
        generation: u64,
        limit: usize,
        ordered: Arc<AtomicBool>,
        rx: mpsc::Receiver<Request>,
        status: Arc<watch::Sender<BlockStatus>>,
        ctx: DispatchContext,
    ) -> Self {
        Self {
            target,
            generation,
            limit,
            ordered,
            rx,
            status,
            ctx,
            buffer: Vec::with_capacity(limit),
            sequence: 0,
            tasks: JoinSet::new(),
        }
    }

    /// Receive until a close request arrives or every sender is gone, then
    /// drain, wait for all dispatches and publish `Closed`.
    pub(crate) async fn run(mut self) {
        debug!(block = %self.target, generation = self.generation, limit = self.limit, "Aggregator started");

        while let Some(request) = self.rx.recv().await {
            match request {
                Request::Write(op) => self.enqueue(op).await,
                Request::Flush(ack) => {
                    self.flush().await;
                    let _ = ack.send(());
                }
                Request::Close => break,
            }
        }

        self.shutdown().await;
    }

    async fn enqueue(&mut self, op: WriteOp) {
        self.buffer.push(op);
        self.ctx.metrics.record_enqueued();
        if self.buffer.len() >= self.limit {
            self.cut().await;
        }
    }

    async fn flush(&mut self) {
        self.cut().await;
    }

    async fn shutdown(mut self) {
        // Refuse new sends, but keep what producers already queued.
        self.rx.close();
        while let Some(request) = self.rx.recv().await {
            match request {
                Request::Write(op) => self.enqueue(op).await,
                Request::Flush(ack) => {
                    self.flush().await;
                    let _ = ack.send(());
                }
                Request::Close => {}
            }
        }
        self.flush().await;

        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!(block = %self.target, error = %e, "Dispatch task aborted");
            }
        }

        self.status.send_replace(BlockStatus::Closed);
        info!(
            block = %self.target,
            generation = self.generation,
            batches = self.sequence,
            "bulk close"
        );
    }

    /// Detach the buffer as one batch and hand it to a dispatch task.
    ///
    /// Waiting for a limiter slot happens here, on the aggregator, so a
    /// saturated sink pushes back on producers. A batch that cannot get a
    /// slot is never submitted; it is counted as failed and dead-lettered.
    async fn cut(&mut self) {
        let ops = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.limit));
        let batch = Batch::new(self.target.clone(), ops)
            .with_ordered(self.ordered.load(Ordering::Acquire))
            .with_position(self.generation, self.sequence);
        if batch.is_empty() {
            return;
        }
        self.sequence += 1;

        let slot = match self.ctx.limiter.acquire().await {
            Ok(slot) => slot,
            Err(e) => {
                error!(
                    block = %self.target,
                    generation = batch.generation,
                    sequence = batch.sequence,
                    error = %e,
                    "No dispatch slot, batch not submitted"
                );
                self.ctx.metrics.record_failed(batch.len() as u64, "limiter");
                if let Some(ref dlq) = self.ctx.dlq {
                    dlq.add(batch, e.to_string()).await;
                }
                return;
            }
        };

        debug!(
            block = %self.target,
            sequence = batch.sequence,
            size = batch.len(),
            in_flight = self.ctx.limiter.in_use(),
            "Batch cut"
        );
        self.ctx.metrics.record_dispatched(batch.len());
        self.tasks.spawn(dispatch(self.ctx.clone(), batch, slot));

        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                error!(block = %self.target, error = %e, "Dispatch task aborted");
            }
        }
    }
}

/// Send one batch to the sink exactly once.
///
/// Failures are reported through logs, metrics and the dead-letter queue;
/// nothing is retried here.
async fn dispatch(ctx: DispatchContext, batch: Batch, _slot: LimiterSlot) {
    let size = batch.len();
    ctx.metrics.in_flight_inc();

    let metrics = ctx.metrics.clone();
    let timer = LatencyTimer::start(move |d| metrics.record_latency(d));
    let result = ctx
        .sink
        .submit(&batch)
        .await
        .and_then(WriteResult::into_result)
        .with_context(
            ErrorContext::new(ctx.sink.component_name(), "submit")
                .with_target(&batch.target)
                .with_batch(batch.generation, batch.sequence),
        );
    timer.stop();
    ctx.metrics.in_flight_dec();

    match result {
        Ok(result) => {
            debug!(
                block = %batch.target,
                generation = batch.generation,
                sequence = batch.sequence,
                size,
                duration_ms = result.duration_ms,
                "Batch applied"
            );
        }
        Err(e) => {
            let (failed, error_type) = match &e {
                BulkError::PartialWrite { failed, .. } => (*failed, "partial"),
                BulkError::Timeout { .. } => (size, "timeout"),
                _ => (size, "batch"),
            };
            ctx.metrics.record_failed(failed as u64, error_type);

            if let Some(ref dlq) = ctx.dlq {
                dlq.add(batch, e.to_string()).await;
            }
        }
    }
}
