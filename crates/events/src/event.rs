use serde_json::Value as JsonValue;

use dcbflow_core::Tag;

/// A domain event payload.
///
/// Implementors are closed tagged unions over the event types one consumer
/// knows about. Events are:
/// - **immutable** facts
/// - **tagged**: `tags()` is a pure function of the payload, evaluated once
///   when the event is appended and never recomputed afterwards
/// - **append-only**
pub trait DomainEvent: Clone + core::fmt::Debug + Send + Sync + Sized + 'static {
    /// Stable event type identifier (e.g. "ItemAdded").
    fn event_type(&self) -> &'static str;

    /// Tags derived from the payload (`"<dimension>:<value>"`).
    fn tags(&self) -> Vec<Tag>;

    /// Serialize the payload (without the type discriminator).
    fn to_payload(&self) -> Result<JsonValue, serde_json::Error>;

    /// Decode a stored payload.
    ///
    /// Returns `Ok(None)` for event types this union does not know about;
    /// consumers ignore those instead of failing.
    fn from_payload(event_type: &str, payload: &JsonValue)
    -> Result<Option<Self>, serde_json::Error>;
}
