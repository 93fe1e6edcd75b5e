//! Postgres-backed event log.
//!
//! ## Append
//!
//! Each append runs in one transaction:
//!
//! 1. `LOCK TABLE events IN EXCLUSIVE MODE` serializes writers, so positions
//!    become visible in order and `MAX(position)` is a safe head for readers
//! 2. the append condition is evaluated with a bounded `SELECT ... LIMIT 1`
//! 3. events are inserted, each receiving the next `BIGSERIAL` position
//!
//! A violated condition rolls the transaction back and surfaces as
//! [`EventLogError::ConditionViolated`]; any sqlx failure becomes
//! [`EventLogError::Unavailable`].
//!
//! ## Queries
//!
//! Each query item compiles to `(event_type = ANY($types) AND tags @> $tags)`,
//! items are OR-combined. The GIN index on `tags` serves the containment test.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use dcbflow_core::{AppendCondition, EventId, Position, Query, Tag};

use super::r#trait::{EventLog, EventLogError, ReadRange, StoredEvent, UncommittedEvent};
use crate::pg::{PgBridge, describe};

#[derive(Debug, Clone)]
pub struct PostgresEventLog {
    pg: PgBridge,
}

impl PostgresEventLog {
    pub fn new(pg: PgBridge) -> Self {
        Self { pg }
    }

    #[instrument(skip(self, events, condition), fields(event_count = events.len()), err)]
    async fn append_events(
        &self,
        events: Vec<UncommittedEvent>,
        condition: Option<&AppendCondition>,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        let mut tx = self
            .pg
            .pool()
            .begin()
            .await
            .map_err(|e| unavailable("begin_transaction", e))?;

        sqlx::query("LOCK TABLE events IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable("lock_events", e))?;

        if let Some(cond) = condition.filter(|c| !c.query().is_empty()) {
            let mut check = QueryBuilder::<Postgres>::new("SELECT position FROM events WHERE position > ");
            check.push_bind(cond.after().value() as i64);
            check.push(" AND ");
            push_query(&mut check, cond.query());
            check.push(" ORDER BY position ASC LIMIT 1");

            let hit = check
                .build()
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| unavailable("check_condition", e))?;

            if let Some(row) = hit {
                let found: i64 = row
                    .try_get("position")
                    .map_err(|e| unavailable("check_condition", e))?;
                tx.rollback()
                    .await
                    .map_err(|e| unavailable("rollback", e))?;
                return Err(EventLogError::ConditionViolated {
                    after: cond.after(),
                    found: Position::new(found as u64),
                });
            }
        }

        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let tags: Vec<String> = e.tags.iter().map(|t| t.as_str().to_string()).collect();
            let row = sqlx::query(
                r#"
                INSERT INTO events (event_id, event_type, tags, payload, occurred_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING position, recorded_at
                "#,
            )
            .bind(e.event_id.as_uuid())
            .bind(&e.event_type)
            .bind(&tags)
            .bind(&e.payload)
            .bind(e.occurred_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| unavailable("insert_event", err))?;

            let position: i64 = row
                .try_get("position")
                .map_err(|err| unavailable("insert_event", err))?;
            let recorded_at: DateTime<Utc> = row
                .try_get("recorded_at")
                .map_err(|err| unavailable("insert_event", err))?;

            committed.push(StoredEvent {
                event_id: e.event_id,
                position: Position::new(position as u64),
                event_type: e.event_type,
                tags: e.tags,
                occurred_at: e.occurred_at,
                recorded_at,
                payload: e.payload,
            });
        }

        tx.commit()
            .await
            .map_err(|e| unavailable("commit_transaction", e))?;

        debug!(committed = committed.len(), "events appended");
        Ok(committed)
    }

    async fn read_events(
        &self,
        query: &Query,
        range: ReadRange,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        let mut sql = QueryBuilder::<Postgres>::new(
            "SELECT event_id, position, event_type, tags, payload, occurred_at, recorded_at \
             FROM events WHERE position > ",
        );
        sql.push_bind(range.after.value() as i64);
        if let Some(until) = range.until {
            sql.push(" AND position <= ");
            sql.push_bind(until.value() as i64);
        }
        sql.push(" AND ");
        push_query(&mut sql, query);
        sql.push(" ORDER BY position ASC");
        if let Some(limit) = range.limit {
            sql.push(" LIMIT ");
            sql.push_bind(limit as i64);
        }

        let rows = sql
            .build()
            .fetch_all(self.pg.pool())
            .await
            .map_err(|e| unavailable("read_events", e))?;

        rows.iter().map(row_to_event).collect()
    }

    async fn current_head(&self) -> Result<Position, EventLogError> {
        let row = sqlx::query("SELECT COALESCE(MAX(position), 0) AS head FROM events")
            .fetch_one(self.pg.pool())
            .await
            .map_err(|e| unavailable("head", e))?;
        let head: i64 = row.try_get("head").map_err(|e| unavailable("head", e))?;
        Ok(Position::new(head as u64))
    }
}

/// Append `(item) OR (item) ...` for a non-empty query.
fn push_query(sql: &mut QueryBuilder<'_, Postgres>, query: &Query) {
    sql.push("(");
    for (idx, item) in query.items().iter().enumerate() {
        if idx > 0 {
            sql.push(" OR ");
        }
        sql.push("(TRUE");
        if !item.event_types().is_empty() {
            let types: Vec<String> = item.event_types().iter().cloned().collect();
            sql.push(" AND event_type = ANY(");
            sql.push_bind(types);
            sql.push(")");
        }
        if !item.required_tags().is_empty() {
            let tags: Vec<String> = item
                .required_tags()
                .iter()
                .map(|t| t.as_str().to_string())
                .collect();
            sql.push(" AND tags @> ");
            sql.push_bind(tags);
        }
        sql.push(")");
    }
    sql.push(")");
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventLogError> {
    let decode = |e: sqlx::Error| EventLogError::Decode(format!("bad event row: {e}"));

    let event_id: Uuid = row.try_get("event_id").map_err(decode)?;
    let position: i64 = row.try_get("position").map_err(decode)?;
    let raw_tags: Vec<String> = row.try_get("tags").map_err(decode)?;
    let tags = raw_tags
        .iter()
        .map(|t| Tag::parse(t))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EventLogError::Decode(e.to_string()))?;

    Ok(StoredEvent {
        event_id: EventId::from_uuid(event_id),
        position: Position::new(position as u64),
        event_type: row.try_get("event_type").map_err(decode)?,
        tags,
        occurred_at: row.try_get("occurred_at").map_err(decode)?,
        recorded_at: row.try_get("recorded_at").map_err(decode)?,
        payload: row.try_get("payload").map_err(decode)?,
    })
}

fn unavailable(operation: &str, err: sqlx::Error) -> EventLogError {
    EventLogError::Unavailable(describe(operation, &err))
}

impl EventLog for PostgresEventLog {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        condition: Option<&AppendCondition>,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        self.pg.block_on(self.append_events(events, condition))
    }

    fn read(&self, query: &Query, range: ReadRange) -> Result<Vec<StoredEvent>, EventLogError> {
        if query.is_empty() || range.limit == Some(0) {
            return Ok(vec![]);
        }
        self.pg.block_on(self.read_events(query, range))
    }

    fn head(&self) -> Result<Position, EventLogError> {
        self.pg.block_on(self.current_head())
    }
}
