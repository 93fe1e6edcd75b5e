use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use dcbflow_core::Query;

use crate::{DomainEvent, SequencedEvent};

/// Structured projection key: an ordered sequence of string segments.
///
/// Keys order lexicographically segment by segment, so every key sharing a
/// prefix is contiguous in an ordered store and a prefix scan is a range scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionKey(Vec<String>);

impl ProjectionKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The empty prefix (matches every key).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &ProjectionKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl core::fmt::Display for ProjectionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Keyspaces owned by one read model.
///
/// `Reverse` holds auxiliary entries used only to make deletions cheap; it is
/// never exposed to readers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keyspace {
    Primary,
    Reverse,
}

impl Keyspace {
    pub fn as_str(self) -> &'static str {
        match self {
            Keyspace::Primary => "primary",
            Keyspace::Reverse => "reverse",
        }
    }
}

/// One stored projection entry. `value == None` is an existence-only entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionEntry {
    pub key: ProjectionKey,
    pub value: Option<JsonValue>,
}

/// A single projection mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProjectionOp {
    Put {
        keyspace: Keyspace,
        key: ProjectionKey,
        value: Option<JsonValue>,
    },
    Delete {
        keyspace: Keyspace,
        key: ProjectionKey,
    },
}

/// Ordered set of mutations produced by applying one event.
///
/// Stores commit a batch together with the cursor advance as a unit, which is
/// what keeps primary and reverse entries consistent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionBatch {
    ops: Vec<ProjectionOp>,
}

impl ProjectionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, keyspace: Keyspace, key: ProjectionKey, value: Option<JsonValue>) {
        self.ops.push(ProjectionOp::Put {
            keyspace,
            key,
            value,
        });
    }

    pub fn delete(&mut self, keyspace: Keyspace, key: ProjectionKey) {
        self.ops.push(ProjectionOp::Delete { keyspace, key });
    }

    pub fn ops(&self) -> &[ProjectionOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<ProjectionOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("projection read failed: {0}")]
    Read(String),

    #[error("projection value could not be decoded: {0}")]
    Decode(String),
}

/// Read access a handler gets to its own projection while applying an event.
pub trait ProjectionView {
    fn get(
        &self,
        keyspace: Keyspace,
        key: &ProjectionKey,
    ) -> Result<Option<ProjectionEntry>, ProjectionError>;

    /// Entries whose key starts with `prefix`, in key order.
    fn scan(
        &self,
        keyspace: Keyspace,
        prefix: &ProjectionKey,
    ) -> Result<Vec<ProjectionEntry>, ProjectionError>;
}

/// A read model builds a derived key/value projection from the event log.
///
/// ## Lifecycle
///
/// The runtime reads every event whose type is in [`ReadModel::event_types`]
/// from the read model's durable cursor, calls [`ReadModel::apply`] for each,
/// and commits the resulting batch together with the cursor advance.
///
/// ## Handler contract
///
/// - total: unknown or uninteresting events produce an empty batch
/// - no side effects other than the returned batch
/// - deletions remove *every* entry derivable from the event, using the
///   reverse keyspace to find compound keys instead of scanning
///
/// ## Disposability
///
/// Projections can be reset and rebuilt from the log at any time; the log is
/// the source of truth.
pub trait ReadModel: Send + Sync + 'static {
    type Event: DomainEvent;

    /// Stable name; also identifies the projection's storage and cursor.
    fn name(&self) -> &'static str;

    /// Event types this read model subscribes to.
    fn event_types(&self) -> &'static [&'static str];

    /// Query used by the runtime to read the log.
    fn subscription(&self) -> Query {
        Query::of_types(self.event_types().iter().copied())
    }

    /// Turn one event into projection mutations.
    fn apply(
        &self,
        view: &dyn ProjectionView,
        event: &SequencedEvent<Self::Event>,
        batch: &mut ProjectionBatch,
    ) -> Result<(), ProjectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_a_common_prefix_are_contiguous() {
        let mut keys = vec![
            ProjectionKey::new(["p2", "c1", "i1"]),
            ProjectionKey::new(["p1", "c2", "i1"]),
            ProjectionKey::new(["p1", "c1", "i9"]),
            ProjectionKey::new(["p10", "c1", "i1"]),
        ];
        keys.sort();

        let prefix = ProjectionKey::new(["p1"]);
        let hits: Vec<_> = keys.iter().filter(|k| k.starts_with(&prefix)).collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(keys[0], ProjectionKey::new(["p1", "c1", "i9"]));
        assert_eq!(keys[1], ProjectionKey::new(["p1", "c2", "i1"]));
    }

    #[test]
    fn batch_keeps_mutation_order() {
        let mut batch = ProjectionBatch::new();
        let key = ProjectionKey::new(["a"]);
        batch.put(Keyspace::Primary, key.clone(), None);
        batch.delete(Keyspace::Primary, key.clone());

        assert_eq!(batch.len(), 2);
        assert!(matches!(batch.ops()[0], ProjectionOp::Put { .. }));
        assert!(matches!(batch.ops()[1], ProjectionOp::Delete { .. }));
    }
}
