//! Infrastructure layer: event log backends, the decision protocol runtime,
//! projection storage, background workers and configuration.

pub mod automations;
pub mod command_dispatcher;
pub mod config;
pub mod event_log;
pub mod pg;
pub mod projections;
pub mod read_model;
pub mod runtime;
pub mod workers;


pub use command_dispatcher::{CommandDispatcher, CommandOutcome, DispatchError, ErrorKind};
pub use config::{ConfigError, DatabaseConfig, DependencyPolicy, RuntimeConfig};
pub use runtime::{Runtime, RuntimeBuilder};
