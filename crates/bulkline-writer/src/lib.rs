//! # bulkline writer
//!
//! Accepts individual writes from many concurrent producers, groups them
//! into bounded batches per target and dispatches each batch to a
//! [`BatchSink`](bulkline_core::BatchSink) with a bounded number of batches
//! in flight.
//!
//! ## Components
//!
//! - `Registry`: caller-owned map from target to block
//! - `BatchBlock`: `add` / `flush` / `close` handle for one target
//! - aggregator: one task per block generation owning the buffer
//! - `ConcurrencyLimiter`: caps concurrent sink calls
//!
//! ## Guarantees
//!
//! - Ops are grouped in arrival order; batches may complete out of order
//! - A batch is submitted exactly once; failures go to logs, metrics and
//!   the optional dead-letter queue
//! - `close` returns only after every accepted write has been attempted
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = Registry::new(&EngineConfig::default(), Arc::new(sink))?;
//! let block = registry.get_or_create(&Target::new("shop", "orders"), 500).await?;
//! block.add(WriteOp::insert(json!({"sku": "A-1"}))).await?;
//! block.close().await;
//! ```

pub mod block;
pub mod dlq;
pub mod limiter;
pub mod registry;
pub mod retry;
pub mod sink;

mod aggregator;

pub use block::*;
pub use dlq::*;
pub use limiter::*;
pub use registry::*;
pub use retry::*;
pub use sink::*;
