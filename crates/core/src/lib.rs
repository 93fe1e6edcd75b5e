//! `dcbflow-core`: domain foundation building blocks.
//!
//! This crate contains **pure** primitives shared by the decision protocol,
//! the read-model runtime and the automation runtime: tags, positions, queries
//! and append conditions (no infrastructure concerns).

pub mod condition;
pub mod error;
pub mod id;
pub mod position;
pub mod query;
pub mod tag;

pub use condition::{AppendCondition, AppendPolicy};
pub use error::{DomainError, DomainResult};
pub use id::EventId;
pub use position::Position;
pub use query::{Query, QueryItem};
pub use tag::Tag;
