pub mod automation;
pub mod command;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod projection;
pub mod runner;

pub use automation::{Automation, AutomationError, Dependencies, MappedAutomation};
pub use command::Command;
pub use envelope::SequencedEvent;
pub use event::DomainEvent;
pub use handler::{decide, fold};
pub use projection::{
    Keyspace, ProjectionBatch, ProjectionEntry, ProjectionError, ProjectionKey, ProjectionOp,
    ProjectionView, ReadModel,
};
pub use runner::{ProjectionRunner, RunnerError};
