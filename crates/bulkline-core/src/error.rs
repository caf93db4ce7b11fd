//! Error types for bulkline
//!
//! Uses `thiserror` for ergonomic error handling with full context preservation.

use std::fmt;
use thiserror::Error;

/// Result type alias for bulkline operations
pub type Result<T> = std::result::Result<T, BulkError>;

/// Primary error type for all bulkline operations
#[derive(Error, Debug)]
pub enum BulkError {
    /// A write was submitted to a block that is draining or closed.
    ///
    /// This is a caller bug: the producer outlived the block's generation.
    #[error("put after close: {target}")]
    LifecycleViolation { target: String },

    /// The sink applied only part of a batch
    #[error("bulk write failed: {failed} failed, {succeeded} succeeded")]
    PartialWrite {
        succeeded: usize,
        failed: usize,
        /// Position in the batch and reason for each failed op
        failures: Vec<(usize, String)>,
    },

    /// The sink rejected the whole batch or could not be reached
    #[error("Sink error: {message}")]
    Sink {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Operation timeout
    #[error("Timeout: {operation} exceeded {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Retry limit exceeded
    #[error("Retry exhausted after {attempts} attempts: {message}")]
    RetryExhausted { attempts: u32, message: String },

    /// I/O errors from sinks writing to local streams
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Graceful shutdown requested
    #[error("Shutdown requested")]
    Shutdown,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BulkError {
    /// Create a lifecycle violation for the given target
    pub fn lifecycle(target: impl fmt::Display) -> Self {
        Self::LifecycleViolation {
            target: target.to_string(),
        }
    }

    /// Create a sink error
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
            source: None,
        }
    }

    /// Create a sink error with source
    pub fn sink_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Sink {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a serialization error with source
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Check if error signals a programming error upstream
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LifecycleViolation { .. })
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Sink { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }

    /// Check if error is transient (may resolve on its own)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for BulkError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization_with_source("JSON encoding failed", e)
    }
}

impl From<config::ConfigError> for BulkError {
    fn from(e: config::ConfigError) -> Self {
        Self::config(e.to_string())
    }
}

/// Error context for enhanced debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub component: &'static str,
    pub operation: String,
    pub target: Option<String>,
    pub generation: Option<u64>,
    pub sequence: Option<u64>,
}

impl ErrorContext {
    pub fn new(component: &'static str, operation: impl Into<String>) -> Self {
        Self {
            component,
            operation: operation.into(),
            target: None,
            generation: None,
            sequence: None,
        }
    }

    pub fn with_target(mut self, target: impl fmt::Display) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_batch(mut self, generation: u64, sequence: u64) -> Self {
        self.generation = Some(generation);
        self.sequence = Some(sequence);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}::{}]", self.component, self.operation)?;
        if let Some(ref target) = self.target {
            write!(f, " target={}", target)?;
        }
        if let Some(generation) = self.generation {
            write!(f, " gen={}", generation)?;
        }
        if let Some(seq) = self.sequence {
            write!(f, " seq={}", seq)?;
        }
        Ok(())
    }
}

/// Extension trait for adding context to errors
pub trait ErrorContextExt<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T>;
}

impl<T> ErrorContextExt<T> for Result<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T> {
        self.map_err(|e| {
            tracing::error!(
                error = %e,
                component = ctx.component,
                operation = %ctx.operation,
                target = ?ctx.target,
                generation = ?ctx.generation,
                sequence = ?ctx.sequence,
                "Operation failed"
            );
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_write_message() {
        let err = BulkError::PartialWrite {
            succeeded: 7,
            failed: 3,
            failures: vec![(1, "duplicate key".to_string())],
        };
        assert_eq!(err.to_string(), "bulk write failed: 3 failed, 7 succeeded");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_lifecycle_is_fatal() {
        let err = BulkError::lifecycle("db::col");
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "put after close: db::col");
        assert!(!BulkError::sink("down").is_fatal());
    }

    #[test]
    fn test_error_context_display() {
        let ctx = ErrorContext::new("aggregator", "dispatch")
            .with_target("db::col")
            .with_batch(2, 5);
        assert_eq!(ctx.to_string(), "[aggregator::dispatch] target=db::col gen=2 seq=5");
    }
}
