//! Automation mechanics (reactive commands, framework only, no business rules).
//!
//! - One triggering event type per automation
//! - Each triggering event maps to at most one command
//! - Commands run through the same decision protocol as caller-issued ones
//! - Delivery is at-least-once; commands detect already-applied outcomes and
//!   return no events instead of duplicating them
//!
//! Infra is responsible for polling the log, tracking the durable cursor and
//! dispatching the commands.

use std::marker::PhantomData;

use thiserror::Error;

use dcbflow_core::Position;

use crate::{Command, DomainEvent, SequencedEvent};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AutomationError {
    /// A dependency (e.g. a read model) is not ready; retry the same event later.
    #[error("dependency not ready: {0}")]
    NotReady(String),

    /// The event could not be turned into a command.
    #[error("mapping failed: {0}")]
    Mapping(String),
}

/// Automation contract.
///
/// Implementors define which event type triggers them and how a triggering
/// event becomes a command. The mapping must be a pure function of the event
/// and of the dependency bundle the automation was registered with.
pub trait Automation: Send + Sync + 'static {
    type Event: DomainEvent;
    type Command: Command;

    /// Stable name; also identifies the automation's durable cursor.
    fn name(&self) -> &'static str;

    /// The event type that triggers this automation.
    fn trigger(&self) -> &'static str;

    /// Map a triggering event to a command (`None` = nothing to do).
    fn to_command(
        &self,
        event: &SequencedEvent<Self::Event>,
    ) -> Result<Option<Self::Command>, AutomationError>;

    /// Whether dependencies have observed everything up to `position`.
    fn ready_for(&self, _position: Position) -> bool {
        true
    }
}

/// Bundle of collaborators injected into an automation's mapping.
pub trait Dependencies: Send + Sync + 'static {
    /// Whether every dependency reflects the log at least up to `position`.
    fn ready_for(&self, position: Position) -> bool;
}

impl Dependencies for () {
    fn ready_for(&self, _position: Position) -> bool {
        true
    }
}

/// Automation built from a name, a trigger and a mapping closure.
pub struct MappedAutomation<E, C, D, F> {
    name: &'static str,
    trigger: &'static str,
    dependencies: D,
    mapping: F,
    _types: PhantomData<fn() -> (E, C)>,
}

impl<E, C, D, F> MappedAutomation<E, C, D, F>
where
    E: DomainEvent,
    C: Command,
    D: Dependencies,
    F: Fn(&SequencedEvent<E>, &D) -> Result<Option<C>, AutomationError> + Send + Sync + 'static,
{
    pub fn new(name: &'static str, trigger: &'static str, dependencies: D, mapping: F) -> Self {
        Self {
            name,
            trigger,
            dependencies,
            mapping,
            _types: PhantomData,
        }
    }

    pub fn dependencies(&self) -> &D {
        &self.dependencies
    }
}

impl<E, C, D, F> Automation for MappedAutomation<E, C, D, F>
where
    E: DomainEvent,
    C: Command,
    D: Dependencies,
    F: Fn(&SequencedEvent<E>, &D) -> Result<Option<C>, AutomationError> + Send + Sync + 'static,
{
    type Event = E;
    type Command = C;

    fn name(&self) -> &'static str {
        self.name
    }

    fn trigger(&self) -> &'static str {
        self.trigger
    }

    fn to_command(&self, event: &SequencedEvent<E>) -> Result<Option<C>, AutomationError> {
        (self.mapping)(event, &self.dependencies)
    }

    fn ready_for(&self, position: Position) -> bool {
        self.dependencies.ready_for(position)
    }
}
