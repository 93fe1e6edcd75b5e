use dcbflow_core::DomainError;

use crate::{Command, SequencedEvent};

/// Fold events into a command's decision state (single left-to-right pass).
///
/// Events are expected in position order; the dispatcher guarantees this
/// when reading from the log.
pub fn fold<'a, C>(
    command: &C,
    events: impl IntoIterator<Item = &'a SequencedEvent<C::Event>>,
) -> C::State
where
    C: Command,
{
    events
        .into_iter()
        .fold(C::State::default(), |state, ev| command.evolve(state, ev))
}

/// Execute a decision deterministically (no IO).
///
/// This provides the read-side-free half of the decision protocol:
///
/// 1. **Fold**: builds the state from `events` via `evolve`
/// 2. **Decide**: calls `decide` on the folded state
///
/// Useful for unit-testing business rules without a log. For the full
/// protocol (read, conditional append, conflict detection) use the
/// infrastructure `CommandDispatcher`.
pub fn decide<'a, C>(
    command: &C,
    events: impl IntoIterator<Item = &'a SequencedEvent<C::Event>>,
) -> Result<Vec<C::Event>, DomainError>
where
    C: Command,
{
    let state = fold(command, events);
    command.decide(&state)
}
