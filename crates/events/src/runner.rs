//! Projection runner utilities (read model builders).
//!
//! Read models are **disposable**; events are the source of truth.
//! This module enforces position ordering and tracks the cursor for one read
//! model without making storage assumptions: the caller commits each batch
//! and then reports the commit back.

use thiserror::Error;

use dcbflow_core::Position;

use crate::{ProjectionBatch, ProjectionError, ProjectionView, ReadModel, SequencedEvent};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("non-monotonic position (last={last}, found={found})")]
    NonMonotonicPosition { last: Position, found: Position },

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Runs sequenced events through a read model and tracks progress.
#[derive(Debug)]
pub struct ProjectionRunner<R>
where
    R: ReadModel,
{
    read_model: R,
    cursor: Position,
}

impl<R> ProjectionRunner<R>
where
    R: ReadModel,
{
    /// Create a runner resuming after `cursor` (the last committed position).
    pub fn new(read_model: R, cursor: Position) -> Self {
        Self { read_model, cursor }
    }

    pub fn read_model(&self) -> &R {
        &self.read_model
    }

    /// Last committed position.
    pub fn cursor(&self) -> Position {
        self.cursor
    }

    /// Produce the mutations for one event.
    ///
    /// Events at or before the cursor are rejected: the runtime never delivers
    /// a position twice, so seeing one means the caller lost track.
    pub fn apply(
        &self,
        view: &dyn ProjectionView,
        event: &SequencedEvent<R::Event>,
    ) -> Result<ProjectionBatch, RunnerError> {
        let found = event.position();
        if found <= self.cursor {
            return Err(RunnerError::NonMonotonicPosition {
                last: self.cursor,
                found,
            });
        }

        let mut batch = ProjectionBatch::new();
        self.read_model.apply(view, event, &mut batch)?;
        Ok(batch)
    }

    /// Record that everything up to `position` is durably committed.
    ///
    /// Never moves the cursor backwards.
    pub fn committed(&mut self, position: Position) {
        if position > self.cursor {
            self.cursor = position;
        }
    }

    /// Forget progress; the next event applied may start from the log start.
    pub fn reset(&mut self) {
        self.cursor = Position::START;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Value as JsonValue;

    use dcbflow_core::{EventId, Tag};

    use super::*;
    use crate::{DomainEvent, Keyspace, ProjectionEntry, ProjectionKey};

    #[derive(Debug, Clone)]
    struct Seen(String);

    impl DomainEvent for Seen {
        fn event_type(&self) -> &'static str {
            "Seen"
        }

        fn tags(&self) -> Vec<Tag> {
            vec![Tag::new("name", &self.0)]
        }

        fn to_payload(&self) -> Result<JsonValue, serde_json::Error> {
            Ok(JsonValue::String(self.0.clone()))
        }

        fn from_payload(
            event_type: &str,
            payload: &JsonValue,
        ) -> Result<Option<Self>, serde_json::Error> {
            match event_type {
                "Seen" => Ok(Some(Seen(serde_json::from_value(payload.clone())?))),
                _ => Ok(None),
            }
        }
    }

    struct Names;

    impl ReadModel for Names {
        type Event = Seen;

        fn name(&self) -> &'static str {
            "names"
        }

        fn event_types(&self) -> &'static [&'static str] {
            &["Seen"]
        }

        fn apply(
            &self,
            _view: &dyn ProjectionView,
            event: &SequencedEvent<Seen>,
            batch: &mut ProjectionBatch,
        ) -> Result<(), ProjectionError> {
            batch.put(
                Keyspace::Primary,
                ProjectionKey::new([event.payload().0.clone()]),
                None,
            );
            Ok(())
        }
    }

    struct EmptyView;

    impl ProjectionView for EmptyView {
        fn get(
            &self,
            _keyspace: Keyspace,
            _key: &ProjectionKey,
        ) -> Result<Option<ProjectionEntry>, ProjectionError> {
            Ok(None)
        }

        fn scan(
            &self,
            _keyspace: Keyspace,
            _prefix: &ProjectionKey,
        ) -> Result<Vec<ProjectionEntry>, ProjectionError> {
            Ok(vec![])
        }
    }

    fn seen(position: u64, name: &str) -> SequencedEvent<Seen> {
        SequencedEvent::new(
            EventId::new(),
            "Seen",
            vec![Tag::new("name", name)],
            Position::new(position),
            Utc::now(),
            Seen(name.to_string()),
        )
    }

    #[test]
    fn applies_events_after_the_cursor() {
        let runner = ProjectionRunner::new(Names, Position::new(3));
        let batch = runner.apply(&EmptyView, &seen(4, "ada")).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn rejects_positions_at_or_before_the_cursor() {
        let mut runner = ProjectionRunner::new(Names, Position::START);
        runner.committed(Position::new(5));

        let err = runner.apply(&EmptyView, &seen(5, "ada")).unwrap_err();
        assert_eq!(
            err,
            RunnerError::NonMonotonicPosition {
                last: Position::new(5),
                found: Position::new(5)
            }
        );
    }

    #[test]
    fn committed_never_regresses() {
        let mut runner = ProjectionRunner::new(Names, Position::new(10));
        runner.committed(Position::new(4));
        assert_eq!(runner.cursor(), Position::new(10));

        runner.reset();
        assert_eq!(runner.cursor(), Position::START);
    }
}
