//! Retry policy and retrying sink decorator
//!
//! The aggregator submits every batch exactly once. Retrying is a sink-level
//! policy: wrap a sink in [`RetryingSink`] to re-attempt retryable failures.
//! Partial writes are never retried, since part of the batch already landed.

use async_trait::async_trait;
use bulkline_core::prelude::*;
use bulkline_core::RetryConfig;
use std::time::Duration;
use tracing::warn;

/// Retry policy with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: config.initial_backoff,
            max_delay: config.max_backoff,
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        let delay = Duration::from_millis(delay as u64);
        std::cmp::min(delay, self.max_delay)
    }
}

/// Sink decorator that re-attempts retryable failures with backoff
pub struct RetryingSink<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: BatchSink> RetryingSink<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S: BatchSink> BatchSink for RetryingSink<S> {
    async fn submit(&self, batch: &Batch) -> Result<WriteResult> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.inner.submit(batch).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && self.policy.should_retry(attempts) => {
                    let delay = self.policy.delay(attempts);
                    warn!(
                        block = %batch.target,
                        sequence = batch.sequence,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying batch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(BulkError::RetryExhausted {
                        attempts,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn component_name(&self) -> &'static str {
        self.inner.component_name()
    }
}
