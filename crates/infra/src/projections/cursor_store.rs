//! Consumer cursor persistence.
//!
//! Automations track the last log position they fully handled. This enables:
//! - resume after restart without replaying handled events
//! - at-least-once delivery (the cursor is saved after the side effect)
//! - deterministic replays (clear the cursor and start from the log start)

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::Row;
use thiserror::Error;

use dcbflow_core::Position;

use crate::pg::{PgBridge, describe};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CursorStoreError {
    #[error("cursor store unavailable: {0}")]
    Unavailable(String),
}

/// Durable cursor per named consumer.
///
/// `save` never moves a cursor backwards; only `clear` rewinds it.
pub trait CursorStore: Send + Sync {
    fn load(&self, consumer: &str) -> Result<Position, CursorStoreError>;

    fn save(&self, consumer: &str, position: Position) -> Result<(), CursorStoreError>;

    fn clear(&self, consumer: &str) -> Result<(), CursorStoreError>;
}

impl<S> CursorStore for Arc<S>
where
    S: CursorStore + ?Sized,
{
    fn load(&self, consumer: &str) -> Result<Position, CursorStoreError> {
        (**self).load(consumer)
    }

    fn save(&self, consumer: &str, position: Position) -> Result<(), CursorStoreError> {
        (**self).save(consumer, position)
    }

    fn clear(&self, consumer: &str) -> Result<(), CursorStoreError> {
        (**self).clear(consumer)
    }
}

/// In-memory cursor store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<String, Position>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> CursorStoreError {
    CursorStoreError::Unavailable("lock poisoned".to_string())
}

impl CursorStore for InMemoryCursorStore {
    fn load(&self, consumer: &str) -> Result<Position, CursorStoreError> {
        let cursors = self.cursors.read().map_err(|_| poisoned())?;
        Ok(cursors.get(consumer).copied().unwrap_or(Position::START))
    }

    fn save(&self, consumer: &str, position: Position) -> Result<(), CursorStoreError> {
        let mut cursors = self.cursors.write().map_err(|_| poisoned())?;
        let current = cursors.entry(consumer.to_string()).or_default();
        if position > *current {
            *current = position;
        }
        Ok(())
    }

    fn clear(&self, consumer: &str) -> Result<(), CursorStoreError> {
        let mut cursors = self.cursors.write().map_err(|_| poisoned())?;
        cursors.remove(consumer);
        Ok(())
    }
}

/// Postgres-backed cursor store (`consumer_cursors` table).
#[derive(Debug, Clone)]
pub struct PostgresCursorStore {
    pg: PgBridge,
}

impl PostgresCursorStore {
    pub fn new(pg: PgBridge) -> Self {
        Self { pg }
    }
}

fn unavailable(operation: &str, err: sqlx::Error) -> CursorStoreError {
    CursorStoreError::Unavailable(describe(operation, &err))
}

impl CursorStore for PostgresCursorStore {
    fn load(&self, consumer: &str) -> Result<Position, CursorStoreError> {
        self.pg.block_on(async {
            let row = sqlx::query("SELECT position FROM consumer_cursors WHERE consumer = $1")
                .bind(consumer)
                .fetch_optional(self.pg.pool())
                .await
                .map_err(|e| unavailable("load_cursor", e))?;

            match row {
                Some(row) => {
                    let position: i64 = row
                        .try_get("position")
                        .map_err(|e| unavailable("load_cursor", e))?;
                    Ok(Position::new(position as u64))
                }
                None => Ok::<_, CursorStoreError>(Position::START),
            }
        })
    }

    fn save(&self, consumer: &str, position: Position) -> Result<(), CursorStoreError> {
        self.pg.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO consumer_cursors (consumer, position)
                VALUES ($1, $2)
                ON CONFLICT (consumer)
                DO UPDATE SET
                    position = GREATEST(consumer_cursors.position, EXCLUDED.position),
                    updated_at = NOW()
                "#,
            )
            .bind(consumer)
            .bind(position.value() as i64)
            .execute(self.pg.pool())
            .await
            .map_err(|e| unavailable("save_cursor", e))?;
            Ok::<_, CursorStoreError>(())
        })
    }

    fn clear(&self, consumer: &str) -> Result<(), CursorStoreError> {
        self.pg.block_on(async {
            sqlx::query("DELETE FROM consumer_cursors WHERE consumer = $1")
                .bind(consumer)
                .execute(self.pg.pool())
                .await
                .map_err(|e| unavailable("clear_cursor", e))?;
            Ok::<_, CursorStoreError>(())
        })
    }
}
