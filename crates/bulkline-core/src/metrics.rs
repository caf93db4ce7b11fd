//! Metrics for bulkline
//!
//! Thin wrapper over the `metrics` facade. No exporter is installed here;
//! binaries embedding the engine pick one.

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Metric names as constants for consistency
pub mod names {
    pub const OPS_ENQUEUED: &str = "bulkline_ops_enqueued_total";
    pub const BATCHES_DISPATCHED: &str = "bulkline_batches_dispatched_total";
    pub const BATCH_SIZE: &str = "bulkline_batch_size";
    pub const DISPATCH_FAILED: &str = "bulkline_dispatch_failed_total";
    pub const DISPATCH_LATENCY: &str = "bulkline_dispatch_latency_seconds";
    pub const DISPATCH_IN_FLIGHT: &str = "bulkline_dispatch_in_flight";
    pub const DLQ_SIZE: &str = "bulkline_dlq_size";
    pub const BLOCKS_OPENED: &str = "bulkline_blocks_opened_total";
}

/// Labels for metrics
pub mod labels {
    pub const COMPONENT: &str = "component";
    pub const TARGET: &str = "target";
    pub const ERROR_TYPE: &str = "error_type";
}

/// Per-block batching metrics
#[derive(Clone)]
pub struct BatchMetrics {
    component: String,
    target: String,
}

impl BatchMetrics {
    pub fn new(component: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            target: target.into(),
        }
    }

    /// Record an accepted write
    pub fn record_enqueued(&self) {
        counter!(
            names::OPS_ENQUEUED,
            labels::COMPONENT => self.component.clone(),
            labels::TARGET => self.target.clone(),
        )
        .increment(1);
    }

    /// Record a cut batch handed to a dispatch task
    pub fn record_dispatched(&self, size: usize) {
        counter!(
            names::BATCHES_DISPATCHED,
            labels::COMPONENT => self.component.clone(),
            labels::TARGET => self.target.clone(),
        )
        .increment(1);
        histogram!(
            names::BATCH_SIZE,
            labels::TARGET => self.target.clone(),
        )
        .record(size as f64);
    }

    /// Record a failed dispatch
    pub fn record_failed(&self, count: u64, error_type: &str) {
        counter!(
            names::DISPATCH_FAILED,
            labels::COMPONENT => self.component.clone(),
            labels::TARGET => self.target.clone(),
            labels::ERROR_TYPE => error_type.to_string(),
        )
        .increment(count);
    }

    /// Record dispatch latency
    pub fn record_latency(&self, duration: Duration) {
        histogram!(
            names::DISPATCH_LATENCY,
            labels::TARGET => self.target.clone(),
        )
        .record(duration.as_secs_f64());
    }

    /// Track dispatch tasks currently running for this block
    pub fn in_flight_inc(&self) {
        gauge!(names::DISPATCH_IN_FLIGHT, labels::TARGET => self.target.clone()).increment(1.0);
    }

    pub fn in_flight_dec(&self) {
        gauge!(names::DISPATCH_IN_FLIGHT, labels::TARGET => self.target.clone()).decrement(1.0);
    }

    /// Record a new generation starting
    pub fn record_opened(&self) {
        counter!(
            names::BLOCKS_OPENED,
            labels::TARGET => self.target.clone(),
        )
        .increment(1);
    }
}

/// Set dead-letter queue size
pub fn set_dlq_size(size: usize) {
    gauge!(names::DLQ_SIZE).set(size as f64);
}

/// Timer guard for automatic latency recording
pub struct LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    /// Start a new timer
    pub fn start(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Get elapsed time without stopping
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and record
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if let Some(f) = self.on_drop.take() {
            f(elapsed);
        }
        elapsed
    }
}

impl<F> Drop for LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer() {
        let mut recorded = None;
        {
            let timer = LatencyTimer::start(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(10));
            timer.stop();
        }
        assert!(recorded.is_some());
        assert!(recorded.unwrap() >= Duration::from_millis(10));
    }

    #[test]
    fn test_timer_records_on_drop() {
        let mut recorded = false;
        {
            let _timer = LatencyTimer::start(|_| recorded = true);
        }
        assert!(recorded);
    }

    #[test]
    fn test_metrics_without_recorder() {
        let metrics = BatchMetrics::new("test", "db::col");
        metrics.record_enqueued();
        metrics.record_dispatched(3);
        metrics.in_flight_inc();
        metrics.in_flight_dec();
    }
}
