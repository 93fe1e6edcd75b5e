use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dcbflow_core::{EventId, Position, Tag};

/// A decoded event together with the metadata the log assigned to it.
///
/// This is what folds, projections and automations consume.
///
/// Notes:
/// - `position` is global and strictly increasing across the whole log.
/// - `tags` are the ones stored with the event, not recomputed from `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEvent<E> {
    event_id: EventId,
    event_type: String,
    tags: Vec<Tag>,
    position: Position,
    recorded_at: DateTime<Utc>,
    payload: E,
}

impl<E> SequencedEvent<E> {
    pub fn new(
        event_id: EventId,
        event_type: impl Into<String>,
        tags: Vec<Tag>,
        position: Position,
        recorded_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            tags,
            position,
            recorded_at,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}
