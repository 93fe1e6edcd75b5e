//! Automation worker: turns triggering events into commands.
//!
//! An automation behaves like a single-purpose read model whose only side
//! effect is dispatching a command. Its cursor is saved after each handled
//! event, so delivery is at-least-once and commands must no-op on replays.
//!
//! Failure policy per event:
//! - domain error: logged and skipped (the cursor advances)
//! - concurrency conflict: retried up to the configured budget, then the
//!   cycle stops without advancing
//! - infrastructure failure: the cycle stops without advancing

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use dcbflow_core::Query;
use dcbflow_events::{Automation, AutomationError};

use super::BackgroundTask;
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::{DependencyPolicy, RuntimeConfig};
use crate::event_log::{EventLog, EventLogError, QueryStream};
use crate::projections::cursor_store::{CursorStore, CursorStoreError};

#[derive(Debug, Error)]
pub enum AutomationWorkerError {
    #[error(transparent)]
    Cursor(#[from] CursorStoreError),

    #[error(transparent)]
    Log(#[from] EventLogError),

    #[error("command dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AutomationSettings {
    pub batch_size: usize,
    /// Total dispatch attempts per event (conflicts only).
    pub max_attempts: u32,
    pub dependency_policy: DependencyPolicy,
}

impl From<&RuntimeConfig> for AutomationSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_attempts: config.max_conflict_retries.saturating_add(1),
            dependency_policy: config.dependency_policy,
        }
    }
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

/// What one cycle did.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AutomationCycle {
    /// Triggering events whose handling is complete (cursor advanced).
    pub handled: usize,
    /// Commands that appended at least one event.
    pub dispatched: usize,
    /// Events left for a later cycle because a dependency lagged.
    pub waiting: bool,
}

/// Drives one automation over the log.
pub struct AutomationProcessor<A>
where
    A: Automation,
{
    automation: A,
    log: Arc<dyn EventLog>,
    dispatcher: CommandDispatcher<Arc<dyn EventLog>>,
    cursors: Arc<dyn CursorStore>,
    settings: AutomationSettings,
}

impl<A> AutomationProcessor<A>
where
    A: Automation,
{
    pub fn new(
        automation: A,
        log: Arc<dyn EventLog>,
        cursors: Arc<dyn CursorStore>,
        settings: AutomationSettings,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(log.clone()).with_batch_size(settings.batch_size);
        Self {
            automation,
            log,
            dispatcher,
            cursors,
            settings,
        }
    }

    pub fn automation(&self) -> &A {
        &self.automation
    }

    /// Handle every triggering event after the durable cursor.
    pub fn run_cycle(&mut self) -> Result<AutomationCycle, AutomationWorkerError> {
        let name = self.automation.name();
        let cursor = self.cursors.load(name)?;
        let query = Query::of_types([self.automation.trigger()]);
        let stream = QueryStream::open(&*self.log, query, cursor, self.settings.batch_size)?;

        let mut cycle = AutomationCycle::default();
        for stored in stream {
            let stored = stored?;
            let position = stored.position;

            if self.settings.dependency_policy == DependencyPolicy::WaitForCatchUp
                && !self.automation.ready_for(position)
            {
                debug!(automation = name, %position, "waiting for dependencies");
                cycle.waiting = true;
                break;
            }

            if let Some(event) = stored.decode::<A::Event>()? {
                match self.automation.to_command(&event) {
                    Ok(Some(command)) => {
                        match self
                            .dispatcher
                            .dispatch_with_retry(&command, self.settings.max_attempts)
                        {
                            Ok(outcome) => {
                                if !outcome.is_noop() {
                                    cycle.dispatched += 1;
                                }
                                debug!(
                                    automation = name,
                                    %position,
                                    recorded_at = %event.recorded_at(),
                                    command = ?command,
                                    appended = outcome.events.len(),
                                    "automation command dispatched"
                                );
                            }
                            Err(err) if err.is_domain() => {
                                warn!(
                                    automation = name,
                                    %position,
                                    event_id = %event.event_id(),
                                    error = %err,
                                    "automation command rejected; skipping event"
                                );
                            }
                            Err(err) => return Err(err.into()),
                        }
                    }
                    Ok(None) => {}
                    Err(AutomationError::NotReady(reason)) => {
                        debug!(automation = name, %position, %reason, "dependency not ready");
                        cycle.waiting = true;
                        break;
                    }
                    Err(AutomationError::Mapping(reason)) => {
                        warn!(
                            automation = name,
                            %position,
                            event_id = %event.event_id(),
                            %reason,
                            "event could not be mapped; skipping"
                        );
                    }
                }
            }

            self.cursors.save(name, position)?;
            cycle.handled += 1;
        }

        Ok(cycle)
    }
}

impl<A> BackgroundTask for AutomationProcessor<A>
where
    A: Automation,
{
    fn name(&self) -> String {
        format!("automation:{}", self.automation.name())
    }

    fn tick(&mut self) {
        if let Err(err) = self.run_cycle() {
            error!(
                automation = self.automation.name(),
                error = %err,
                "automation cycle failed; retrying next poll"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use dcbflow_carts::{CartEvent, CartId, CloseCart, types};
    use dcbflow_core::Position;
    use dcbflow_events::{Dependencies, MappedAutomation, SequencedEvent};

    use super::*;
    use crate::event_log::{InMemoryEventLog, UncommittedEvent, read_all};
    use crate::projections::cursor_store::InMemoryCursorStore;

    /// Dependency whose applied position the test sets by hand.
    #[derive(Clone, Default)]
    struct Gate(Arc<AtomicU64>);

    impl Dependencies for Gate {
        fn ready_for(&self, position: Position) -> bool {
            self.0.load(Ordering::SeqCst) >= position.value()
        }
    }

    fn close_on_submit<D: Dependencies>(
        deps: D,
    ) -> impl Automation<Event = CartEvent, Command = CloseCart> {
        MappedAutomation::new(
            "close_on_submit",
            types::CART_SUBMITTED,
            deps,
            |event: &SequencedEvent<CartEvent>, _deps: &D| match event.payload() {
                CartEvent::CartSubmitted(e) => Ok(Some(CloseCart { cart_id: e.cart_id })),
                _ => Ok(None),
            },
        )
    }

    fn submitted_cart(log: &InMemoryEventLog) -> CartId {
        let cart_id = CartId::new();
        let events = [
            CartEvent::ItemAdded(dcbflow_carts::ItemAdded {
                cart_id,
                item_id: dcbflow_carts::ItemId::new(),
                product_id: dcbflow_carts::ProductId::new(),
                description: "lamp".to_string(),
                price: 2500,
            }),
            CartEvent::CartSubmitted(dcbflow_carts::CartSubmitted {
                cart_id,
                ordered_products: vec![],
                total_price: 2500,
            }),
        ];
        let uncommitted = events
            .iter()
            .map(|e| UncommittedEvent::from_typed(e).unwrap())
            .collect();
        log.append(uncommitted, None).unwrap();
        cart_id
    }

    fn closed_count(log: &InMemoryEventLog) -> usize {
        read_all(log, &Query::of_types([types::CART_CLOSED]), Position::START)
            .unwrap()
            .events
            .len()
    }

    #[test]
    fn dispatches_once_and_advances_the_cursor() {
        let log = Arc::new(InMemoryEventLog::new());
        let cursors = Arc::new(InMemoryCursorStore::new());
        submitted_cart(&log);

        let mut processor = AutomationProcessor::new(
            close_on_submit(()),
            log.clone(),
            cursors.clone(),
            AutomationSettings::default(),
        );
        let cycle = processor.run_cycle().unwrap();
        assert_eq!(cycle.handled, 1);
        assert_eq!(cycle.dispatched, 1);
        assert_eq!(cursors.load("close_on_submit").unwrap(), Position::new(2));

        let again = processor.run_cycle().unwrap();
        assert_eq!(again.handled, 0);
        assert_eq!(closed_count(&log), 1);
    }

    #[test]
    fn replays_do_not_duplicate_effects() {
        let log = Arc::new(InMemoryEventLog::new());
        submitted_cart(&log);

        for _ in 0..2 {
            let mut processor = AutomationProcessor::new(
                close_on_submit(()),
                log.clone(),
                Arc::new(InMemoryCursorStore::new()),
                AutomationSettings::default(),
            );
            processor.run_cycle().unwrap();
        }
        assert_eq!(closed_count(&log), 1);
    }

    #[test]
    fn waits_for_lagging_dependencies() {
        let log = Arc::new(InMemoryEventLog::new());
        let cursors = Arc::new(InMemoryCursorStore::new());
        submitted_cart(&log);
        let gate = Gate::default();

        let mut processor = AutomationProcessor::new(
            close_on_submit(gate.clone()),
            log.clone(),
            cursors.clone(),
            AutomationSettings::default(),
        );
        let cycle = processor.run_cycle().unwrap();
        assert!(cycle.waiting);
        assert_eq!(cycle.handled, 0);
        assert_eq!(closed_count(&log), 0);

        gate.0.store(2, Ordering::SeqCst);
        assert_eq!(processor.run_cycle().unwrap().dispatched, 1);
        assert_eq!(closed_count(&log), 1);
    }

    #[test]
    fn eventual_policy_ignores_dependencies() {
        let log = Arc::new(InMemoryEventLog::new());
        submitted_cart(&log);

        let settings = AutomationSettings {
            dependency_policy: DependencyPolicy::Eventual,
            ..AutomationSettings::default()
        };
        let mut processor = AutomationProcessor::new(
            close_on_submit(Gate::default()),
            log.clone(),
            Arc::new(InMemoryCursorStore::new()),
            settings,
        );
        assert_eq!(processor.run_cycle().unwrap().dispatched, 1);
    }

    #[test]
    fn domain_errors_are_skipped() {
        let log = Arc::new(InMemoryEventLog::new());
        let cursors = Arc::new(InMemoryCursorStore::new());
        // A submission for a cart with no history: CloseCart answers NotFound.
        let orphan = CartEvent::CartSubmitted(dcbflow_carts::CartSubmitted {
            cart_id: CartId::new(),
            ordered_products: vec![],
            total_price: 0,
        });
        let uncommitted = UncommittedEvent {
            tags: vec![],
            ..UncommittedEvent::from_typed(&orphan).unwrap()
        };
        log.append(vec![uncommitted], None).unwrap();

        let mut processor = AutomationProcessor::new(
            close_on_submit(()),
            log.clone(),
            cursors.clone(),
            AutomationSettings::default(),
        );
        let cycle = processor.run_cycle().unwrap();
        assert_eq!(cycle.handled, 1);
        assert_eq!(cycle.dispatched, 0);
        assert_eq!(cursors.load("close_on_submit").unwrap(), Position::new(1));
    }
}
