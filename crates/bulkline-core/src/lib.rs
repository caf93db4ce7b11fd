//! # bulkline core
//!
//! Core types, the sink strategy trait, configuration and metrics for the
//! bulkline write-batching engine.
//!
//! ## Architecture
//!
//! ```text
//!  producers          aggregator (1 per block)        dispatch (1 per batch)
//! ┌──────────┐      ┌──────────────────────┐        ┌──────────────────┐
//! │  add()   │─────►│ buffer ──cut──► Batch│──slot─►│ BatchSink.submit │
//! │ flush()  │─────►│                      │        └──────────────────┘
//! │ close()  │─────►│ drain, join, Closed  │
//! └──────────┘      └──────────────────────┘
//! ```
//!
//! The engine itself lives in `bulkline-writer`; this crate holds the
//! vocabulary shared with sink implementations.

pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod strategy;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::message::*;
pub use crate::metrics::{BatchMetrics, LatencyTimer};
pub use crate::strategy::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::{BulkError, Result};
    pub use crate::message::{Batch, Target, WriteKind, WriteOp};
    pub use crate::strategy::{BatchSink, WriteResult};
}
