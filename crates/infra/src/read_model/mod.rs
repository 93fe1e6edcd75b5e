//! Read-model storage: per-read-model key/value entries plus a durable cursor.

pub mod postgres;
pub mod store;

pub use postgres::PostgresProjectionStore;
pub use store::{InMemoryProjectionStore, ProjectionStore, ProjectionStoreError, StoreView};
