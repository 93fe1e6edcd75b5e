//! Command execution pipeline (the decision protocol).
//!
//! ```text
//! Command
//!   ↓
//! 1. Read every event matching command.query() up to the current head
//!   ↓
//! 2. Decode into the command's event type (unknown types skipped) and fold
//!   ↓
//! 3. Decide: new events, "nothing to do", or a domain error
//!   ↓
//! 4. Append guarded by AppendCondition { same query, head from step 1 }
//! ```
//!
//! If any event the decision would have read was appended after step 1, the
//! append is rejected and the caller gets [`DispatchError::ConcurrencyConflict`].
//! No locks are held across the read/decide/append span.
//!
//! Caller-issued commands and automation-issued commands go through the same
//! dispatcher and therefore get the same conflict guarantee.

use thiserror::Error;
use tracing::{debug, warn};

use dcbflow_core::{AppendCondition, AppendPolicy, DomainError, Position};
use dcbflow_events::Command;

use crate::event_log::{
    DEFAULT_BATCH_SIZE, EventLog, EventLogError, QueryStream, StoredEvent, UncommittedEvent,
};

/// Coarse error classes for a boundary layer (e.g. status code mapping).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Concurrency,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Deterministic business failure; returned verbatim, never retried.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The append condition was violated by a concurrent write.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Historical events could not be decoded into the command's event type.
    #[error("event decode failed: {0}")]
    Decode(String),

    /// The log failed; opaque to the caller.
    #[error("event log failure: {0}")]
    Log(EventLogError),
}

impl From<EventLogError> for DispatchError {
    fn from(value: EventLogError) -> Self {
        match value {
            EventLogError::ConditionViolated { .. } => {
                DispatchError::ConcurrencyConflict(value.to_string())
            }
            EventLogError::Decode(msg) => DispatchError::Decode(msg),
            other => DispatchError::Log(other),
        }
    }
}

impl DispatchError {
    /// Only conflicts are safe to retry by re-running the whole cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::ConcurrencyConflict(_))
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, DispatchError::Domain(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Domain(DomainError::NotFound(_)) => ErrorKind::NotFound,
            DispatchError::Domain(DomainError::Conflict(_)) => ErrorKind::Conflict,
            DispatchError::Domain(
                DomainError::Validation(_)
                | DomainError::InvariantViolation(_)
                | DomainError::InvalidId(_),
            ) => ErrorKind::Validation,
            DispatchError::ConcurrencyConflict(_) => ErrorKind::Concurrency,
            DispatchError::Decode(_) | DispatchError::Log(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Log head observed by the read phase.
    pub read_position: Position,
    /// Events appended by this command (empty when already satisfied).
    pub events: Vec<StoredEvent>,
}

impl CommandOutcome {
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }

    /// Position of the last appended event, or the read position for a no-op.
    pub fn position(&self) -> Position {
        self.events
            .last()
            .map(|e| e.position)
            .unwrap_or(self.read_position)
    }
}

/// Runs commands through read → fold → decide → conditional append.
#[derive(Debug, Clone)]
pub struct CommandDispatcher<L> {
    log: L,
    batch_size: usize,
}

impl<L> CommandDispatcher<L> {
    pub fn new(log: L) -> Self {
        Self {
            log,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn log(&self) -> &L {
        &self.log
    }
}

impl<L> CommandDispatcher<L>
where
    L: EventLog,
{
    /// Run one read/fold/decide/append cycle.
    pub fn dispatch<C>(&self, command: &C) -> Result<CommandOutcome, DispatchError>
    where
        C: Command,
    {
        // 1) Read (position = head at read time)
        let query = command.query();
        let stream = QueryStream::open(&self.log, query.clone(), Position::START, self.batch_size)?;
        let read_position = stream.position();

        // 2) Fold
        let mut state = C::State::default();
        for stored in stream {
            if let Some(event) = stored?.decode::<C::Event>()? {
                state = command.evolve(state, &event);
            }
        }

        // 3) Decide (pure)
        let decided = command.decide(&state)?;
        if decided.is_empty() {
            debug!(command = command.name(), position = %read_position, "already satisfied");
            return Ok(CommandOutcome {
                read_position,
                events: vec![],
            });
        }

        // 4) Append
        let uncommitted = decided
            .iter()
            .map(UncommittedEvent::from_typed)
            .collect::<Result<Vec<_>, _>>()?;
        let condition = match command.append_policy() {
            AppendPolicy::Conditional => Some(AppendCondition::new(query, read_position)),
            AppendPolicy::Unconditional => None,
        };
        let events = self.log.append(uncommitted, condition.as_ref())?;

        debug!(
            command = command.name(),
            position = %read_position,
            appended = events.len(),
            "command dispatched"
        );
        Ok(CommandOutcome {
            read_position,
            events,
        })
    }

    /// Dispatch, re-running the whole cycle on concurrency conflicts.
    ///
    /// At most `max_attempts` cycles run (at least one). Any other error is
    /// returned immediately.
    pub fn dispatch_with_retry<C>(
        &self,
        command: &C,
        max_attempts: u32,
    ) -> Result<CommandOutcome, DispatchError>
    where
        C: Command,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.dispatch(command) {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(
                        command = command.name(),
                        attempt,
                        max_attempts,
                        error = %err,
                        "retrying after concurrency conflict"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
