//! Optimistic append conditions (the dynamic consistency boundary).

use serde::{Deserialize, Serialize};

use crate::position::Position;
use crate::query::Query;
use crate::tag::Tag;

/// Guard attached to an append.
///
/// The append succeeds only if no event matching `query` exists in the log
/// with a position greater than `after`. Logs must evaluate this against the
/// live log inside the same atomic section that writes the new events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendCondition {
    query: Query,
    after: Position,
}

impl AppendCondition {
    pub fn new(query: Query, after: Position) -> Self {
        Self { query, after }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn after(&self) -> Position {
        self.after
    }

    /// Whether an already-committed event breaks this condition.
    pub fn is_violated_by(&self, position: Position, event_type: &str, tags: &[Tag]) -> bool {
        position > self.after && self.query.matches(event_type, tags)
    }
}

/// How a decision's events are appended.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum AppendPolicy {
    /// Guard the append with the decision's own query and read position.
    #[default]
    Conditional,
    /// Append without a condition. Only for rules that establish idempotency
    /// themselves (e.g. "already in target state => no-op").
    Unconditional,
}
