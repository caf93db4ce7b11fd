//! Configuration types for bulkline
//!
//! Uses the `config` crate for layered configuration from files and environment.

use crate::error::{BulkError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Batching configuration
    #[serde(default)]
    pub batch: BatchConfig,

    /// Dead letter queue configuration
    #[serde(default)]
    pub dlq: DlqConfig,

    /// Retry configuration for the retrying sink decorator
    #[serde(default)]
    pub retry: RetryConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================================================
// Batching
// ============================================================================

/// Batch cutting and dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum ops per batch
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Maximum batches in flight against the sink
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Ordered bulk writes
    #[serde(default)]
    pub ordered: bool,

    /// Inbound queue bound per block
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Deadline for a single sink call; none by default
    #[serde(
        with = "humantime_serde",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dispatch_timeout: Option<Duration>,
}

fn default_limit() -> usize {
    1000
}

fn default_max_in_flight() -> usize {
    3
}

fn default_queue_capacity() -> usize {
    1
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            max_in_flight: default_max_in_flight(),
            ordered: false,
            queue_capacity: default_queue_capacity(),
            dispatch_timeout: None,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(BulkError::config("batch.limit must be at least 1"));
        }
        if self.max_in_flight == 0 {
            return Err(BulkError::config("batch.max_in_flight must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(BulkError::config("batch.queue_capacity must be at least 1"));
        }
        if self.dispatch_timeout == Some(Duration::ZERO) {
            return Err(BulkError::config("batch.dispatch_timeout must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Failure handling
// ============================================================================

/// Dead letter queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    /// Enable DLQ
    #[serde(default)]
    pub enabled: bool,

    /// Maximum failed batches retained
    #[serde(default = "default_dlq_max_size")]
    pub max_size: usize,
}

fn default_dlq_max_size() -> usize {
    10_000
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size: default_dlq_max_size(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Enable the retrying sink decorator
    #[serde(default)]
    pub enabled: bool,

    /// Maximum attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial_backoff: Duration,

    /// Maximum backoff delay
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl EngineConfig {
    /// Load configuration from file and environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Add default values
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add config file if specified
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Add environment variables with prefix BULKLINE_
        builder = builder.add_source(
            config::Environment::with_prefix("BULKLINE")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.batch.validate()?;
        if self.dlq.enabled && self.dlq.max_size == 0 {
            return Err(BulkError::config("dlq.max_size must be at least 1"));
        }
        if self.retry.enabled && self.retry.max_attempts == 0 {
            return Err(BulkError::config("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}
