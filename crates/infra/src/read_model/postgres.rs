//! Postgres-backed projection store.
//!
//! All read models share two tables, partitioned by read model name:
//!
//! - `projection_entries(read_model, keyspace, key TEXT[], value JSONB)`
//! - `projection_cursors(read_model, position)`
//!
//! A commit is one transaction covering every mutation of the batch plus the
//! cursor upsert, so primary and reverse entries never drift apart.

use sqlx::Row;
use tracing::instrument;

use dcbflow_core::Position;
use dcbflow_events::{Keyspace, ProjectionBatch, ProjectionEntry, ProjectionKey, ProjectionOp};

use super::store::{ProjectionStore, ProjectionStoreError};
use crate::pg::{PgBridge, describe};

#[derive(Debug, Clone)]
pub struct PostgresProjectionStore {
    pg: PgBridge,
    read_model: String,
}

impl PostgresProjectionStore {
    pub fn new(pg: PgBridge, read_model: impl Into<String>) -> Self {
        Self {
            pg,
            read_model: read_model.into(),
        }
    }

    async fn fetch_one(
        &self,
        keyspace: Keyspace,
        key: &ProjectionKey,
    ) -> Result<Option<ProjectionEntry>, ProjectionStoreError> {
        let row = sqlx::query(
            r#"
            SELECT value
            FROM projection_entries
            WHERE read_model = $1 AND keyspace = $2 AND key = $3
            "#,
        )
        .bind(&self.read_model)
        .bind(keyspace.as_str())
        .bind(key.segments())
        .fetch_optional(self.pg.pool())
        .await
        .map_err(|e| unavailable("get_entry", e))?;

        row.map(|row| {
            Ok(ProjectionEntry {
                key: key.clone(),
                value: row.try_get("value").map_err(decode)?,
            })
        })
        .transpose()
    }

    async fn fetch_prefix(
        &self,
        keyspace: Keyspace,
        prefix: &ProjectionKey,
    ) -> Result<Vec<ProjectionEntry>, ProjectionStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT key, value
            FROM projection_entries
            WHERE read_model = $1
              AND keyspace = $2
              AND ($4 = 0 OR key[1:$4] = $3)
            ORDER BY key ASC
            "#,
        )
        .bind(&self.read_model)
        .bind(keyspace.as_str())
        .bind(prefix.segments())
        .bind(prefix.len() as i32)
        .fetch_all(self.pg.pool())
        .await
        .map_err(|e| unavailable("scan_entries", e))?;

        rows.iter()
            .map(|row| {
                let key: Vec<String> = row.try_get("key").map_err(decode)?;
                Ok(ProjectionEntry {
                    key: ProjectionKey::new(key),
                    value: row.try_get("value").map_err(decode)?,
                })
            })
            .collect()
    }

    async fn fetch_cursor(&self) -> Result<Position, ProjectionStoreError> {
        let row = sqlx::query("SELECT position FROM projection_cursors WHERE read_model = $1")
            .bind(&self.read_model)
            .fetch_optional(self.pg.pool())
            .await
            .map_err(|e| unavailable("get_cursor", e))?;

        match row {
            Some(row) => {
                let position: i64 = row.try_get("position").map_err(decode)?;
                Ok(Position::new(position as u64))
            }
            None => Ok(Position::START),
        }
    }

    #[instrument(skip(self, batch), fields(read_model = %self.read_model, ops = batch.len()), err)]
    async fn write_batch(
        &self,
        batch: ProjectionBatch,
        cursor: Position,
    ) -> Result<(), ProjectionStoreError> {
        let mut tx = self
            .pg
            .pool()
            .begin()
            .await
            .map_err(|e| unavailable("begin_transaction", e))?;

        for op in batch.into_ops() {
            match op {
                ProjectionOp::Put {
                    keyspace,
                    key,
                    value,
                } => {
                    sqlx::query(
                        r#"
                        INSERT INTO projection_entries (read_model, keyspace, key, value)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (read_model, keyspace, key)
                        DO UPDATE SET value = EXCLUDED.value
                        "#,
                    )
                    .bind(&self.read_model)
                    .bind(keyspace.as_str())
                    .bind(key.segments())
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| unavailable("put_entry", e))?;
                }
                ProjectionOp::Delete { keyspace, key } => {
                    sqlx::query(
                        r#"
                        DELETE FROM projection_entries
                        WHERE read_model = $1 AND keyspace = $2 AND key = $3
                        "#,
                    )
                    .bind(&self.read_model)
                    .bind(keyspace.as_str())
                    .bind(key.segments())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| unavailable("delete_entry", e))?;
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO projection_cursors (read_model, position)
            VALUES ($1, $2)
            ON CONFLICT (read_model)
            DO UPDATE SET
                position = GREATEST(projection_cursors.position, EXCLUDED.position),
                updated_at = NOW()
            "#,
        )
        .bind(&self.read_model)
        .bind(cursor.value() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| unavailable("advance_cursor", e))?;

        tx.commit()
            .await
            .map_err(|e| unavailable("commit_transaction", e))
    }

    async fn clear(&self) -> Result<(), ProjectionStoreError> {
        let mut tx = self
            .pg
            .pool()
            .begin()
            .await
            .map_err(|e| unavailable("begin_transaction", e))?;

        sqlx::query("DELETE FROM projection_entries WHERE read_model = $1")
            .bind(&self.read_model)
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable("clear_entries", e))?;
        sqlx::query("DELETE FROM projection_cursors WHERE read_model = $1")
            .bind(&self.read_model)
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable("clear_cursor", e))?;

        tx.commit()
            .await
            .map_err(|e| unavailable("commit_transaction", e))
    }
}

fn unavailable(operation: &str, err: sqlx::Error) -> ProjectionStoreError {
    ProjectionStoreError::Unavailable(describe(operation, &err))
}

fn decode(err: sqlx::Error) -> ProjectionStoreError {
    ProjectionStoreError::Decode(err.to_string())
}

impl ProjectionStore for PostgresProjectionStore {
    fn get(
        &self,
        keyspace: Keyspace,
        key: &ProjectionKey,
    ) -> Result<Option<ProjectionEntry>, ProjectionStoreError> {
        self.pg.block_on(self.fetch_one(keyspace, key))
    }

    fn scan(
        &self,
        keyspace: Keyspace,
        prefix: &ProjectionKey,
    ) -> Result<Vec<ProjectionEntry>, ProjectionStoreError> {
        self.pg.block_on(self.fetch_prefix(keyspace, prefix))
    }

    fn cursor(&self) -> Result<Position, ProjectionStoreError> {
        self.pg.block_on(self.fetch_cursor())
    }

    fn commit(&self, batch: ProjectionBatch, cursor: Position) -> Result<(), ProjectionStoreError> {
        self.pg.block_on(self.write_batch(batch, cursor))
    }

    fn reset(&self) -> Result<(), ProjectionStoreError> {
        self.pg.block_on(self.clear())
    }
}
