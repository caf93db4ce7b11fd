//! Message types for bulkline
//!
//! Defines the write target, the opaque write operations producers submit,
//! and the immutable batches the aggregator hands to a sink.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Database/collection pair a block writes to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub database: String,
    pub collection: String,
}

impl Target {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Registry key, `database::collection`
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.database, self.collection)
    }
}

/// Write operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    InsertOne,
    UpdateOne,
    ReplaceOne,
    DeleteOne,
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsertOne => "insert_one",
            Self::UpdateOne => "update_one",
            Self::ReplaceOne => "replace_one",
            Self::DeleteOne => "delete_one",
        }
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single write instruction.
///
/// The engine never looks inside; it only counts and forwards. Sinks decide
/// how each variant maps onto the store's bulk API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteOp {
    InsertOne {
        document: Value,
    },
    UpdateOne {
        filter: Value,
        update: Value,
        #[serde(default)]
        upsert: bool,
    },
    ReplaceOne {
        filter: Value,
        replacement: Value,
        #[serde(default)]
        upsert: bool,
    },
    DeleteOne {
        filter: Value,
    },
}

impl WriteOp {
    pub fn insert(document: Value) -> Self {
        Self::InsertOne { document }
    }

    pub fn update(filter: Value, update: Value) -> Self {
        Self::UpdateOne {
            filter,
            update,
            upsert: false,
        }
    }

    /// Update that inserts when nothing matches the filter
    pub fn upsert(filter: Value, update: Value) -> Self {
        Self::UpdateOne {
            filter,
            update,
            upsert: true,
        }
    }

    pub fn replace(filter: Value, replacement: Value) -> Self {
        Self::ReplaceOne {
            filter,
            replacement,
            upsert: false,
        }
    }

    pub fn delete(filter: Value) -> Self {
        Self::DeleteOne { filter }
    }

    pub fn kind(&self) -> WriteKind {
        match self {
            Self::InsertOne { .. } => WriteKind::InsertOne,
            Self::UpdateOne { .. } => WriteKind::UpdateOne,
            Self::ReplaceOne { .. } => WriteKind::ReplaceOne,
            Self::DeleteOne { .. } => WriteKind::DeleteOne,
        }
    }
}

/// An immutable group of writes cut by the aggregator.
///
/// `generation` identifies the open-to-closed lifecycle of the block that
/// produced it; `sequence` counts batches within that generation from zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub target: Target,
    pub ordered: bool,
    pub generation: u64,
    pub sequence: u64,
    ops: Vec<WriteOp>,
}

impl Batch {
    pub fn new(target: Target, ops: Vec<WriteOp>) -> Self {
        Self {
            target,
            ordered: false,
            generation: 0,
            sequence: 0,
            ops,
        }
    }

    /// Builder: set ordered flag
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// Builder: set generation and sequence
    pub fn with_position(mut self, generation: u64, sequence: u64) -> Self {
        self.generation = generation;
        self.sequence = sequence;
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_key() {
        let target = Target::new("sales", "orders");
        assert_eq!(target.key(), "sales::orders");
    }

    #[test]
    fn test_write_op_wire_shape() {
        let op = WriteOp::upsert(json!({"_id": 1}), json!({"$set": {"n": 2}}));
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["kind"], "update_one");
        assert_eq!(value["upsert"], true);

        let parsed: WriteOp =
            serde_json::from_value(json!({"kind": "delete_one", "filter": {"_id": 9}})).unwrap();
        assert_eq!(parsed.kind(), WriteKind::DeleteOne);
    }

    #[test]
    fn test_batch_defaults_unordered() {
        let batch = Batch::new(
            Target::new("db", "col"),
            vec![WriteOp::insert(json!({"a": 1}))],
        )
        .with_position(3, 1);
        assert!(!batch.ordered);
        assert_eq!(batch.len(), 1);
        assert_eq!((batch.generation, batch.sequence), (3, 1));
    }
}
