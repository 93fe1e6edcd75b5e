use dcbflow_core::{AppendPolicy, DomainError, Query};

use crate::{DomainEvent, SequencedEvent};

/// A decision scoped by a query (command abstraction).
///
/// Commands represent **intent**. They are transient: the dispatcher reads
/// every event matching [`Command::query`], folds them into a fresh
/// [`Command::State`] with [`Command::evolve`], asks [`Command::decide`] for new
/// events, and appends those guarded by the same query.
///
/// ## Consistency boundary
///
/// There is no aggregate id. The boundary is "the set of events this decision
/// cares about", expressed by the query (typically one item per entity tag).
/// Two decisions conflict only if one appends an event the other's query
/// would have read.
///
/// ## Fold contract
///
/// `evolve` is a total function: event types the command does not care about
/// must leave the state unchanged. Counters derived by the fold may go
/// negative; `decide` must not assume otherwise.
///
/// ## Decision contract
///
/// `decide` is pure. It returns either the complete list of events to append
/// (possibly empty, meaning "already satisfied") or a domain error; there is no
/// partial application.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    type Event: DomainEvent;
    type State: Default;

    /// Stable command name used for logging.
    fn name(&self) -> &'static str;

    /// Events relevant to this decision.
    fn query(&self) -> Query;

    /// Fold one event into the decision state.
    fn evolve(&self, state: Self::State, event: &SequencedEvent<Self::Event>) -> Self::State;

    /// Decide which events to append given the folded state.
    fn decide(&self, state: &Self::State) -> Result<Vec<Self::Event>, DomainError>;

    /// Whether the append is guarded by the decision's query.
    fn append_policy(&self) -> AppendPolicy {
        AppendPolicy::Conditional
    }
}
