//! Postgres connectivity shared by the persistent backends.
//!
//! The log, projection and cursor traits are synchronous (they are driven from
//! plain worker threads), while sqlx is async. [`PgBridge`] owns the pool and a
//! dedicated tokio runtime and runs each statement with `block_on`. It must
//! not be used from inside another tokio runtime.

use std::future::Future;
use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::info;

use crate::config::DatabaseConfig;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    position     BIGSERIAL PRIMARY KEY,
    event_id     UUID NOT NULL UNIQUE,
    event_type   TEXT NOT NULL,
    tags         TEXT[] NOT NULL,
    payload      JSONB NOT NULL,
    occurred_at  TIMESTAMPTZ NOT NULL,
    recorded_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS events_tags_idx ON events USING GIN (tags);
CREATE INDEX IF NOT EXISTS events_type_idx ON events (event_type, position);

CREATE TABLE IF NOT EXISTS projection_entries (
    read_model  TEXT NOT NULL,
    keyspace    TEXT NOT NULL,
    key         TEXT[] NOT NULL,
    value       JSONB,
    PRIMARY KEY (read_model, keyspace, key)
);

CREATE TABLE IF NOT EXISTS projection_cursors (
    read_model  TEXT PRIMARY KEY,
    position    BIGINT NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS consumer_cursors (
    consumer    TEXT PRIMARY KEY,
    position    BIGINT NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

#[derive(Debug, Error)]
pub enum PgError {
    #[error("failed to start database runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("failed to connect to postgres: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("schema setup failed: {0}")]
    Schema(#[source] sqlx::Error),
}

/// Pool + runtime pair handed to every Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgBridge {
    pool: PgPool,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl PgBridge {
    pub fn connect(config: &DatabaseConfig) -> Result<Self, PgError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("dcbflow-pg")
            .enable_all()
            .build()?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect(&config.url),
            )
            .map_err(PgError::Connect)?;

        info!(max_connections = config.max_connections, "connected to postgres");

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    /// Create the tables the persistent backends need (idempotent).
    pub fn ensure_schema(&self) -> Result<(), PgError> {
        self.block_on(sqlx::raw_sql(SCHEMA).execute(&self.pool))
            .map_err(PgError::Schema)?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

/// Render an sqlx error with the failing operation for error messages.
pub(crate) fn describe(operation: &str, err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => {
            format!("database error in {operation}: {}", db_err.message())
        }
        sqlx::Error::PoolClosed => format!("connection pool closed in {operation}"),
        sqlx::Error::PoolTimedOut => format!("connection pool timed out in {operation}"),
        other => format!("sqlx error in {operation}: {other}"),
    }
}
