use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;

use dcbflow_core::Position;
use dcbflow_events::{
    Keyspace, ProjectionBatch, ProjectionEntry, ProjectionError, ProjectionKey, ProjectionOp,
    ProjectionView,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProjectionStoreError {
    #[error("projection store unavailable: {0}")]
    Unavailable(String),

    #[error("projection entry could not be decoded: {0}")]
    Decode(String),
}

impl From<ProjectionStoreError> for ProjectionError {
    fn from(value: ProjectionStoreError) -> Self {
        match value {
            ProjectionStoreError::Unavailable(msg) => ProjectionError::Read(msg),
            ProjectionStoreError::Decode(msg) => ProjectionError::Decode(msg),
        }
    }
}

/// Key/value storage for one read model, plus its durable cursor.
///
/// ## Ownership
///
/// A store instance belongs to exactly one read model and is written only by
/// that read model's worker. Readers only ever call `get` / `scan`.
///
/// ## Commit
///
/// `commit()` applies the batch and advances the cursor as one unit: after a
/// crash either both are visible or neither is. The cursor never moves
/// backwards; a commit at or below the current cursor still applies the batch
/// but leaves the cursor where it is.
///
/// ## Disposability
///
/// `reset()` drops every entry and rewinds the cursor to the log start so the
/// projection can be rebuilt from the log.
pub trait ProjectionStore: Send + Sync {
    fn get(
        &self,
        keyspace: Keyspace,
        key: &ProjectionKey,
    ) -> Result<Option<ProjectionEntry>, ProjectionStoreError>;

    /// Entries whose key starts with `prefix`, in key order.
    fn scan(
        &self,
        keyspace: Keyspace,
        prefix: &ProjectionKey,
    ) -> Result<Vec<ProjectionEntry>, ProjectionStoreError>;

    fn cursor(&self) -> Result<Position, ProjectionStoreError>;

    fn commit(&self, batch: ProjectionBatch, cursor: Position) -> Result<(), ProjectionStoreError>;

    fn reset(&self) -> Result<(), ProjectionStoreError>;
}

impl<S> ProjectionStore for Arc<S>
where
    S: ProjectionStore + ?Sized,
{
    fn get(
        &self,
        keyspace: Keyspace,
        key: &ProjectionKey,
    ) -> Result<Option<ProjectionEntry>, ProjectionStoreError> {
        (**self).get(keyspace, key)
    }

    fn scan(
        &self,
        keyspace: Keyspace,
        prefix: &ProjectionKey,
    ) -> Result<Vec<ProjectionEntry>, ProjectionStoreError> {
        (**self).scan(keyspace, prefix)
    }

    fn cursor(&self) -> Result<Position, ProjectionStoreError> {
        (**self).cursor()
    }

    fn commit(&self, batch: ProjectionBatch, cursor: Position) -> Result<(), ProjectionStoreError> {
        (**self).commit(batch, cursor)
    }

    fn reset(&self) -> Result<(), ProjectionStoreError> {
        (**self).reset()
    }
}

/// Read access for handlers, backed by a store's committed state.
pub struct StoreView<'a, S: ?Sized>(pub &'a S);

impl<S> ProjectionView for StoreView<'_, S>
where
    S: ProjectionStore + ?Sized,
{
    fn get(
        &self,
        keyspace: Keyspace,
        key: &ProjectionKey,
    ) -> Result<Option<ProjectionEntry>, ProjectionError> {
        Ok(self.0.get(keyspace, key)?)
    }

    fn scan(
        &self,
        keyspace: Keyspace,
        prefix: &ProjectionKey,
    ) -> Result<Vec<ProjectionEntry>, ProjectionError> {
        Ok(self.0.scan(keyspace, prefix)?)
    }
}

type Entries = BTreeMap<ProjectionKey, Option<JsonValue>>;

#[derive(Debug, Default)]
struct Inner {
    primary: Entries,
    reverse: Entries,
    cursor: Position,
}

impl Inner {
    fn keyspace(&self, keyspace: Keyspace) -> &Entries {
        match keyspace {
            Keyspace::Primary => &self.primary,
            Keyspace::Reverse => &self.reverse,
        }
    }

    fn keyspace_mut(&mut self, keyspace: Keyspace) -> &mut Entries {
        match keyspace {
            Keyspace::Primary => &mut self.primary,
            Keyspace::Reverse => &mut self.reverse,
        }
    }
}

/// In-memory projection store for tests/dev.
///
/// Keys live in ordered maps, so a prefix scan is a range scan starting at the
/// prefix itself.
#[derive(Debug, Default)]
pub struct InMemoryProjectionStore {
    inner: RwLock<Inner>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, keyspace: Keyspace) -> usize {
        self.inner
            .read()
            .map(|i| i.keyspace(keyspace).len())
            .unwrap_or(0)
    }
}

fn poisoned() -> ProjectionStoreError {
    ProjectionStoreError::Unavailable("lock poisoned".to_string())
}

impl ProjectionStore for InMemoryProjectionStore {
    fn get(
        &self,
        keyspace: Keyspace,
        key: &ProjectionKey,
    ) -> Result<Option<ProjectionEntry>, ProjectionStoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .keyspace(keyspace)
            .get(key)
            .map(|value| ProjectionEntry {
                key: key.clone(),
                value: value.clone(),
            }))
    }

    fn scan(
        &self,
        keyspace: Keyspace,
        prefix: &ProjectionKey,
    ) -> Result<Vec<ProjectionEntry>, ProjectionStoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .keyspace(keyspace)
            .range((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ProjectionEntry {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }

    fn cursor(&self) -> Result<Position, ProjectionStoreError> {
        Ok(self.inner.read().map_err(|_| poisoned())?.cursor)
    }

    fn commit(&self, batch: ProjectionBatch, cursor: Position) -> Result<(), ProjectionStoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        for op in batch.into_ops() {
            match op {
                ProjectionOp::Put {
                    keyspace,
                    key,
                    value,
                } => {
                    inner.keyspace_mut(keyspace).insert(key, value);
                }
                ProjectionOp::Delete { keyspace, key } => {
                    inner.keyspace_mut(keyspace).remove(&key);
                }
            }
        }
        if cursor > inner.cursor {
            inner.cursor = cursor;
        }
        Ok(())
    }

    fn reset(&self) -> Result<(), ProjectionStoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        *inner = Inner::default();
        Ok(())
    }
}
