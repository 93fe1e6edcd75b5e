use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use dcbflow_core::{AppendCondition, EventId, Position, Query, Tag};
use dcbflow_events::{DomainEvent, SequencedEvent};

/// An event ready to be appended (not yet assigned a position).
///
/// Built from a typed domain event with [`UncommittedEvent::from_typed`], which
/// serializes the payload and derives the tags once. Tags never change after
/// this point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub tags: Vec<Tag>,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    pub fn from_typed<E>(event: &E) -> Result<Self, EventLogError>
    where
        E: DomainEvent,
    {
        let payload = event.to_payload().map_err(|e| {
            EventLogError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id: EventId::new(),
            event_type: event.event_type().to_string(),
            tags: event.tags(),
            occurred_at: Utc::now(),
            payload,
        })
    }
}

/// An event persisted in the log, with its global position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub position: Position,
    pub event_type: String,
    pub tags: Vec<Tag>,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl StoredEvent {
    /// Decode into a consumer's closed event type.
    ///
    /// Returns `Ok(None)` for event types the consumer does not know.
    pub fn decode<E>(&self) -> Result<Option<SequencedEvent<E>>, EventLogError>
    where
        E: DomainEvent,
    {
        let payload = E::from_payload(&self.event_type, &self.payload).map_err(|e| {
            EventLogError::Decode(format!(
                "event {} ({}) at position {}: {e}",
                self.event_id, self.event_type, self.position
            ))
        })?;

        Ok(payload.map(|payload| {
            SequencedEvent::new(
                self.event_id,
                self.event_type.clone(),
                self.tags.clone(),
                self.position,
                self.recorded_at,
                payload,
            )
        }))
    }
}

/// Position window for one read.
///
/// Reads return events with `after < position <= until`, in position order,
/// at most `limit` of them.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ReadRange {
    pub after: Position,
    pub until: Option<Position>,
    pub limit: Option<usize>,
}

impl ReadRange {
    pub fn from_start() -> Self {
        Self::default()
    }

    pub fn after(position: Position) -> Self {
        Self {
            after: position,
            ..Self::default()
        }
    }

    pub fn until(mut self, position: Position) -> Self {
        self.until = Some(position);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn contains(&self, position: Position) -> bool {
        position > self.after && self.until.is_none_or(|u| position <= u)
    }
}

/// Event log operation error.
///
/// `ConditionViolated` is the only variant that means "retry the decision";
/// everything else is an infrastructure failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventLogError {
    #[error("append condition violated: event at position {found} matches (read at {after})")]
    ConditionViolated { after: Position, found: Position },

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event decode failed: {0}")]
    Decode(String),

    #[error("event log unavailable: {0}")]
    Unavailable(String),
}

/// Append-only, globally ordered, tagged event log.
///
/// ## Append semantics
///
/// `append()`:
/// - evaluates `condition` against the live log (not the caller's read)
/// - assigns consecutive positions after the current head
/// - persists the whole batch or nothing
///
/// Both steps happen inside one atomic section, so two appends guarded by
/// overlapping conditions cannot both succeed.
///
/// ## Read semantics
///
/// `read()` returns the events matching `query` inside `range`, strictly
/// ordered by position. The empty query matches nothing.
pub trait EventLog: Send + Sync {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        condition: Option<&AppendCondition>,
    ) -> Result<Vec<StoredEvent>, EventLogError>;

    fn read(&self, query: &Query, range: ReadRange) -> Result<Vec<StoredEvent>, EventLogError>;

    /// Position of the last committed event (`Position::START` when empty).
    fn head(&self) -> Result<Position, EventLogError>;
}

impl<S> EventLog for Arc<S>
where
    S: EventLog + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        condition: Option<&AppendCondition>,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        (**self).append(events, condition)
    }

    fn read(&self, query: &Query, range: ReadRange) -> Result<Vec<StoredEvent>, EventLogError> {
        (**self).read(query, range)
    }

    fn head(&self) -> Result<Position, EventLogError> {
        (**self).head()
    }
}
