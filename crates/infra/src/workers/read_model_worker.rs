//! Read-model worker: keeps one projection in step with the log.
//!
//! Lifecycle: `Stopped → CatchingUp → Live → Stopped`.
//!
//! Every cycle queries the log for the read model's subscribed types from its
//! durable cursor up to the tail captured when the query opened. Each event
//! is committed together with the cursor advance. When the stream is drained
//! the cursor is moved to the captured tail so that events of other types do
//! not keep the read model looking behind.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info};

use dcbflow_core::Position;
use dcbflow_events::{
    Dependencies, Keyspace, ProjectionBatch, ProjectionEntry, ProjectionKey, ProjectionRunner,
    ReadModel, RunnerError,
};

use super::BackgroundTask;
use crate::event_log::{EventLog, EventLogError, QueryStream};
use crate::read_model::{ProjectionStore, ProjectionStoreError, StoreView};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadModelStatus {
    Stopped,
    CatchingUp,
    Live,
}

impl ReadModelStatus {
    fn to_u8(self) -> u8 {
        match self {
            ReadModelStatus::Stopped => 0,
            ReadModelStatus::CatchingUp => 1,
            ReadModelStatus::Live => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ReadModelStatus::CatchingUp,
            2 => ReadModelStatus::Live,
            _ => ReadModelStatus::Stopped,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadModelError {
    /// Reads are refused until the initial catch-up completes.
    #[error("read model {read_model} has not caught up yet")]
    NotCaughtUp { read_model: &'static str },

    #[error(transparent)]
    Store(#[from] ProjectionStoreError),

    #[error(transparent)]
    Log(#[from] EventLogError),

    #[error(transparent)]
    Projection(#[from] RunnerError),
}

/// Progress shared between a worker and its handles.
#[derive(Debug)]
struct Shared {
    name: &'static str,
    status: AtomicU8,
    initial_done: AtomicBool,
    applied: AtomicU64,
    rebuild: AtomicBool,
}

impl Shared {
    fn set_status(&self, status: ReadModelStatus) {
        self.status.store(status.to_u8(), Ordering::SeqCst);
    }

    fn applied(&self) -> Position {
        Position::new(self.applied.load(Ordering::SeqCst))
    }

    fn set_applied(&self, position: Position) {
        self.applied.store(position.value(), Ordering::SeqCst);
    }

    /// Initial catch-up finished and no rebuild is pending.
    fn readable(&self) -> bool {
        self.initial_done.load(Ordering::SeqCst) && !self.rebuild.load(Ordering::SeqCst)
    }
}

/// Cloneable, read-only view of a running read model.
#[derive(Clone)]
pub struct ReadModelHandle {
    shared: Arc<Shared>,
    store: Arc<dyn ProjectionStore>,
    log: Arc<dyn EventLog>,
}

impl core::fmt::Debug for ReadModelHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadModelHandle")
            .field("name", &self.shared.name)
            .field("status", &self.status())
            .field("position", &self.position())
            .finish()
    }
}

impl ReadModelHandle {
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn status(&self) -> ReadModelStatus {
        ReadModelStatus::from_u8(self.shared.status.load(Ordering::SeqCst))
    }

    /// Last log position reflected in the projection.
    pub fn position(&self) -> Position {
        self.shared.applied()
    }

    /// True once the initial catch-up finished and every event appended
    /// before this call is reflected.
    pub fn is_caught_up(&self) -> bool {
        if !self.shared.readable() {
            return false;
        }
        match self.log.head() {
            Ok(head) => self.position() >= head,
            Err(err) => {
                debug!(read_model = self.name(), error = %err, "head unavailable");
                false
            }
        }
    }

    /// Block until [`Self::is_caught_up`] or the timeout elapses.
    pub fn wait_until_caught_up(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_caught_up() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn get(&self, key: &ProjectionKey) -> Result<Option<ProjectionEntry>, ReadModelError> {
        self.ensure_readable()?;
        Ok(self.store.get(Keyspace::Primary, key)?)
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn scan(&self, prefix: &ProjectionKey) -> Result<Vec<ProjectionEntry>, ReadModelError> {
        self.ensure_readable()?;
        Ok(self.store.scan(Keyspace::Primary, prefix)?)
    }

    /// Ask the worker to drop the projection and rebuild it from the log.
    ///
    /// Reads are refused until the rebuild has caught up again.
    pub fn rebuild(&self) {
        self.shared.rebuild.store(true, Ordering::SeqCst);
    }

    fn ensure_readable(&self) -> Result<(), ReadModelError> {
        if self.shared.readable() {
            Ok(())
        } else {
            Err(ReadModelError::NotCaughtUp {
                read_model: self.name(),
            })
        }
    }
}

impl Dependencies for ReadModelHandle {
    fn ready_for(&self, position: Position) -> bool {
        self.shared.readable() && self.position() >= position
    }
}

/// Drives one read model: catch-up, live polling and rebuilds.
pub struct ReadModelProcessor<R>
where
    R: ReadModel,
{
    runner: ProjectionRunner<R>,
    store: Arc<dyn ProjectionStore>,
    log: Arc<dyn EventLog>,
    shared: Arc<Shared>,
    batch_size: usize,
    cursor_loaded: bool,
}

impl<R> ReadModelProcessor<R>
where
    R: ReadModel,
{
    pub fn new(
        read_model: R,
        store: Arc<dyn ProjectionStore>,
        log: Arc<dyn EventLog>,
        batch_size: usize,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: read_model.name(),
            status: AtomicU8::new(ReadModelStatus::Stopped.to_u8()),
            initial_done: AtomicBool::new(false),
            applied: AtomicU64::new(0),
            rebuild: AtomicBool::new(false),
        });

        Self {
            runner: ProjectionRunner::new(read_model, Position::START),
            store,
            log,
            shared,
            batch_size: batch_size.max(1),
            cursor_loaded: false,
        }
    }

    pub fn handle(&self) -> ReadModelHandle {
        ReadModelHandle {
            shared: self.shared.clone(),
            store: self.store.clone(),
            log: self.log.clone(),
        }
    }

    /// Bring the projection up to the current log tail.
    ///
    /// Returns the number of events applied.
    pub fn run_cycle(&mut self) -> Result<usize, ReadModelError> {
        let name = self.runner.read_model().name();

        if self.shared.rebuild.load(Ordering::SeqCst) {
            info!(read_model = name, "rebuilding projection");
            self.shared.initial_done.store(false, Ordering::SeqCst);
            self.shared.set_status(ReadModelStatus::CatchingUp);
            // The request stays pending until the store is actually empty.
            self.store.reset()?;
            self.shared.rebuild.store(false, Ordering::SeqCst);
            self.runner.reset();
            self.shared.set_applied(Position::START);
            self.cursor_loaded = true;
        }

        if !self.cursor_loaded {
            let cursor = self.store.cursor()?;
            self.runner.committed(cursor);
            self.shared.set_applied(cursor);
            self.cursor_loaded = true;
        }

        let subscription = self.runner.read_model().subscription();
        let stream = QueryStream::open(
            &*self.log,
            subscription,
            self.runner.cursor(),
            self.batch_size,
        )?;
        let tail = stream.position();

        let mut applied = 0;
        for stored in stream {
            let stored = stored?;
            let position = stored.position;

            let batch = match stored.decode::<R::Event>()? {
                Some(event) => self.runner.apply(&StoreView(&*self.store), &event)?,
                None => ProjectionBatch::new(),
            };
            self.store.commit(batch, position)?;
            self.runner.committed(position);
            self.shared.set_applied(position);
            applied += 1;
        }

        if tail > self.runner.cursor() {
            self.store.commit(ProjectionBatch::new(), tail)?;
            self.runner.committed(tail);
            self.shared.set_applied(tail);
        }

        if !self.shared.initial_done.swap(true, Ordering::SeqCst) {
            self.shared.set_status(ReadModelStatus::Live);
            info!(read_model = name, position = %tail, "read model caught up");
        } else if applied > 0 {
            debug!(read_model = name, applied, position = %tail, "read model advanced");
        }

        Ok(applied)
    }
}

impl<R> BackgroundTask for ReadModelProcessor<R>
where
    R: ReadModel,
{
    fn name(&self) -> String {
        format!("read-model:{}", self.runner.read_model().name())
    }

    fn tick(&mut self) {
        if let Err(err) = self.run_cycle() {
            error!(
                read_model = self.runner.read_model().name(),
                position = %self.runner.cursor(),
                error = %err,
                "read model cycle failed"
            );
        }
    }

    fn on_start(&mut self) {
        self.shared.set_status(ReadModelStatus::CatchingUp);
    }

    fn on_stop(&mut self) {
        self.shared.set_status(ReadModelStatus::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use dcbflow_carts::{CartEvent, CartId, InventoryChanged, ItemAdded, ItemId, ProductId, types};
    use dcbflow_events::{ProjectionError, ProjectionView, SequencedEvent};

    use super::*;
    use crate::event_log::{InMemoryEventLog, UncommittedEvent};
    use crate::read_model::InMemoryProjectionStore;

    /// Cart items keyed by (cart, item).
    struct AddedItems;

    impl ReadModel for AddedItems {
        type Event = CartEvent;

        fn name(&self) -> &'static str {
            "added_items"
        }

        fn event_types(&self) -> &'static [&'static str] {
            &[types::ITEM_ADDED]
        }

        fn apply(
            &self,
            _view: &dyn ProjectionView,
            event: &SequencedEvent<CartEvent>,
            batch: &mut ProjectionBatch,
        ) -> Result<(), ProjectionError> {
            if let CartEvent::ItemAdded(e) = event.payload() {
                batch.put(
                    Keyspace::Primary,
                    ProjectionKey::new([e.cart_id.to_string(), e.item_id.to_string()]),
                    None,
                );
            }
            Ok(())
        }
    }

    fn append(log: &InMemoryEventLog, event: CartEvent) {
        log.append(vec![UncommittedEvent::from_typed(&event).unwrap()], None)
            .unwrap();
    }

    fn item_added(cart_id: CartId) -> CartEvent {
        CartEvent::ItemAdded(ItemAdded {
            cart_id,
            item_id: ItemId::new(),
            product_id: ProductId::new(),
            description: "mug".to_string(),
            price: 900,
        })
    }

    fn setup() -> (
        Arc<InMemoryEventLog>,
        Arc<InMemoryProjectionStore>,
        ReadModelProcessor<AddedItems>,
    ) {
        let log = Arc::new(InMemoryEventLog::new());
        let store = Arc::new(InMemoryProjectionStore::new());
        let processor = ReadModelProcessor::new(AddedItems, store.clone(), log.clone(), 2);
        (log, store, processor)
    }

    #[test]
    fn reads_are_refused_before_the_initial_catch_up() {
        let (log, _store, processor) = setup();
        append(&log, item_added(CartId::new()));
        let handle = processor.handle();

        assert_eq!(handle.status(), ReadModelStatus::Stopped);
        assert!(!handle.is_caught_up());
        assert!(matches!(
            handle.scan(&ProjectionKey::root()),
            Err(ReadModelError::NotCaughtUp { read_model: "added_items" })
        ));
    }

    #[test]
    fn catch_up_applies_every_subscribed_event() {
        let (log, store, mut processor) = setup();
        let cart = CartId::new();
        for _ in 0..5 {
            append(&log, item_added(cart));
        }
        let handle = processor.handle();

        assert_eq!(processor.run_cycle().unwrap(), 5);
        assert_eq!(handle.status(), ReadModelStatus::Live);
        assert!(handle.is_caught_up());
        assert_eq!(handle.scan(&ProjectionKey::new([cart.to_string()])).unwrap().len(), 5);
        assert_eq!(store.cursor().unwrap(), Position::new(5));

        append(&log, item_added(cart));
        assert!(!handle.is_caught_up());
        assert_eq!(processor.run_cycle().unwrap(), 1);
        assert!(handle.is_caught_up());
    }

    #[test]
    fn unrelated_events_still_advance_the_cursor() {
        let (log, store, mut processor) = setup();
        append(&log, item_added(CartId::new()));
        append(
            &log,
            CartEvent::InventoryChanged(InventoryChanged {
                product_id: ProductId::new(),
                inventory: 4,
            }),
        );

        processor.run_cycle().unwrap();
        assert_eq!(processor.handle().position(), Position::new(2));
        assert_eq!(store.cursor().unwrap(), Position::new(2));
        assert!(processor.handle().is_caught_up());
    }

    #[test]
    fn resumes_from_the_durable_cursor() {
        let (log, store, mut processor) = setup();
        append(&log, item_added(CartId::new()));
        processor.run_cycle().unwrap();

        let mut restarted = ReadModelProcessor::new(AddedItems, store.clone(), log.clone(), 2);
        assert_eq!(restarted.run_cycle().unwrap(), 0);
        assert_eq!(store.len(Keyspace::Primary), 1);
    }

    #[test]
    fn rebuild_replays_from_the_log_start() {
        let (log, store, mut processor) = setup();
        append(&log, item_added(CartId::new()));
        append(&log, item_added(CartId::new()));
        processor.run_cycle().unwrap();

        let handle = processor.handle();
        handle.rebuild();
        assert!(handle.get(&ProjectionKey::root()).is_err());

        assert_eq!(processor.run_cycle().unwrap(), 2);
        assert!(handle.is_caught_up());
        assert_eq!(store.len(Keyspace::Primary), 2);
    }

    /// Store whose first `reset()` fails.
    struct FlakyReset {
        inner: InMemoryProjectionStore,
        failed_once: AtomicBool,
        resets: AtomicU64,
    }

    impl ProjectionStore for FlakyReset {
        fn get(
            &self,
            keyspace: Keyspace,
            key: &ProjectionKey,
        ) -> Result<Option<ProjectionEntry>, ProjectionStoreError> {
            self.inner.get(keyspace, key)
        }

        fn scan(
            &self,
            keyspace: Keyspace,
            prefix: &ProjectionKey,
        ) -> Result<Vec<ProjectionEntry>, ProjectionStoreError> {
            self.inner.scan(keyspace, prefix)
        }

        fn cursor(&self) -> Result<Position, ProjectionStoreError> {
            self.inner.cursor()
        }

        fn commit(
            &self,
            batch: ProjectionBatch,
            cursor: Position,
        ) -> Result<(), ProjectionStoreError> {
            self.inner.commit(batch, cursor)
        }

        fn reset(&self) -> Result<(), ProjectionStoreError> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(ProjectionStoreError::Unavailable("connection reset".to_string()));
            }
            self.resets.fetch_add(1, Ordering::SeqCst);
            self.inner.reset()
        }
    }

    #[test]
    fn failed_reset_keeps_the_rebuild_pending() {
        let log = Arc::new(InMemoryEventLog::new());
        let store = Arc::new(FlakyReset {
            inner: InMemoryProjectionStore::new(),
            failed_once: AtomicBool::new(false),
            resets: AtomicU64::new(0),
        });
        let mut processor = ReadModelProcessor::new(AddedItems, store.clone(), log.clone(), 2);
        append(&log, item_added(CartId::new()));
        processor.run_cycle().unwrap();

        let handle = processor.handle();
        handle.rebuild();
        assert!(matches!(
            processor.run_cycle(),
            Err(ReadModelError::Store(ProjectionStoreError::Unavailable(_)))
        ));
        assert!(!handle.is_caught_up());
        assert_eq!(handle.status(), ReadModelStatus::CatchingUp);

        assert_eq!(processor.run_cycle().unwrap(), 1);
        assert_eq!(store.resets.load(Ordering::SeqCst), 1);
        assert!(handle.is_caught_up());
        assert_eq!(handle.status(), ReadModelStatus::Live);
    }

    #[test]
    fn ready_for_tracks_the_applied_position() {
        let (log, _store, mut processor) = setup();
        append(&log, item_added(CartId::new()));
        let handle = processor.handle();
        assert!(!handle.ready_for(Position::new(1)));

        processor.run_cycle().unwrap();
        assert!(handle.ready_for(Position::new(1)));
        assert!(!handle.ready_for(Position::new(2)));
    }
}
