//! Append-only, tagged event log boundary.
//!
//! The log is the single source of truth and the only resource shared between
//! the decision protocol, read models and automations. Coordination happens
//! entirely through append conditions.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;
pub use query::{DEFAULT_BATCH_SIZE, QueryResult, QueryStream, read_all};
pub use r#trait::{EventLog, EventLogError, ReadRange, StoredEvent, UncommittedEvent};
