//! Composition root: wires the log, read models and automations, then runs a
//! short cart scenario against them.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{info, warn};

use dcbflow_carts::{
    AddItem, CartId, ChangeInventory, ChangePrice, ItemId, ProductId, SubmitCart, types,
};
use dcbflow_core::{Position, Query};
use dcbflow_infra::automations::{archive_items_on_price_change, auto_close_submitted_carts};
use dcbflow_infra::event_log::{EventLog, InMemoryEventLog, PostgresEventLog, read_all};
use dcbflow_infra::pg::PgBridge;
use dcbflow_infra::projections::{
    CursorStore, InMemoryCursorStore, OPEN_CARTS_WITH_PRODUCTS, OpenCartsWithProducts,
    PostgresCursorStore, open_cart_items,
};
use dcbflow_infra::read_model::{InMemoryProjectionStore, PostgresProjectionStore, ProjectionStore};
use dcbflow_infra::{CommandDispatcher, RuntimeBuilder, RuntimeConfig};

struct Backend {
    log: Arc<dyn EventLog>,
    cursors: Arc<dyn CursorStore>,
    open_carts: Arc<dyn ProjectionStore>,
}

fn backend(config: &RuntimeConfig) -> anyhow::Result<Backend> {
    match &config.database {
        Some(db) => {
            info!(max_connections = db.max_connections, "using postgres backend");
            let pg = PgBridge::connect(db).context("connecting to postgres")?;
            pg.ensure_schema().context("creating schema")?;
            Ok(Backend {
                log: Arc::new(PostgresEventLog::new(pg.clone())),
                cursors: Arc::new(PostgresCursorStore::new(pg.clone())),
                open_carts: Arc::new(PostgresProjectionStore::new(pg, OPEN_CARTS_WITH_PRODUCTS)),
            })
        }
        None => {
            info!("DATABASE_URL not set; using in-memory backend");
            Ok(Backend {
                log: Arc::new(InMemoryEventLog::new()),
                cursors: Arc::new(InMemoryCursorStore::new()),
                open_carts: Arc::new(InMemoryProjectionStore::new()),
            })
        }
    }
}

fn add(
    dispatcher: &CommandDispatcher<Arc<dyn EventLog>>,
    cart_id: CartId,
    product_id: ProductId,
    description: &str,
    price: i64,
) {
    let command = AddItem {
        cart_id,
        item_id: ItemId::new(),
        product_id,
        description: description.to_string(),
        price,
    };
    match dispatcher.dispatch(&command) {
        Ok(outcome) => info!(cart = %cart_id, position = %outcome.position(), "item added"),
        Err(err) => warn!(cart = %cart_id, kind = ?err.kind(), error = %err, "item rejected"),
    }
}

/// Poll the log until automations have appended `expected` follow-up events.
fn wait_for_follow_ups(
    log: &dyn EventLog,
    expected: usize,
    timeout: Duration,
) -> anyhow::Result<usize> {
    let query = Query::of_types([types::CART_CLOSED, types::ITEM_ARCHIVED]);
    let deadline = Instant::now() + timeout;
    loop {
        let seen = read_all(log, &query, Position::START)?.events.len();
        if seen >= expected || Instant::now() >= deadline {
            return Ok(seen);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn main() -> anyhow::Result<()> {
    dcbflow_observability::init();

    let config = RuntimeConfig::from_env().context("loading configuration")?;
    let Backend {
        log,
        cursors,
        open_carts,
    } = backend(&config)?;

    let mut builder = RuntimeBuilder::new(log.clone(), config, cursors);
    let open_carts = builder.register_read_model(OpenCartsWithProducts, open_carts);
    builder
        .register(auto_close_submitted_carts())
        .register(archive_items_on_price_change(open_carts.clone()));
    let runtime = builder.start().context("starting workers")?;

    let dispatcher = runtime.dispatcher();
    let (kettle, mug) = (ProductId::new(), ProductId::new());
    dispatcher.dispatch(&ChangeInventory {
        product_id: kettle,
        inventory: 10,
    })?;
    dispatcher.dispatch(&ChangePrice {
        product_id: kettle,
        new_price: 3999,
    })?;

    let (first, second) = (CartId::new(), CartId::new());
    add(dispatcher, first, kettle, "kettle", 3999);
    add(dispatcher, first, mug, "mug", 899);
    add(dispatcher, first, mug, "mug", 899);
    // Fourth item: rejected by the max-items rule.
    add(dispatcher, first, mug, "mug", 899);
    add(dispatcher, second, kettle, "kettle", 3999);

    dispatcher.dispatch(&SubmitCart { cart_id: first })?;
    dispatcher.dispatch(&ChangePrice {
        product_id: kettle,
        new_price: 4499,
    })?;

    // One CartClosed for the submitted cart, one ItemArchived for the open one.
    let follow_ups = wait_for_follow_ups(&*log, 2, Duration::from_secs(5))?;
    if !runtime.wait_until_caught_up(Duration::from_secs(5)) {
        warn!("read models did not catch up in time");
    }

    let remaining = open_cart_items(&open_carts, kettle)?;
    let head = log.head()?;
    info!(
        open_kettle_items = remaining.len(),
        follow_up_events = follow_ups,
        %head,
        "scenario finished"
    );

    runtime.shutdown();
    Ok(())
}
