//! Open carts with products.
//!
//! Answers "which open carts currently hold product P?".
//!
//! Layout:
//! - primary `(product_id, cart_id, item_id)` → `{description, price}`
//! - reverse `(cart_id, item_id, product_id)` → existence only
//!
//! Removal events only carry cart (and item) ids, so the reverse keyspace is
//! scanned by that prefix to find the primary keys to delete. Both keyspaces
//! change in the same commit.

use serde::{Deserialize, Serialize};

use dcbflow_carts::{CartEvent, CartId, CartItemRef, ItemId, ProductId, types};
use dcbflow_events::{
    Keyspace, ProjectionBatch, ProjectionError, ProjectionKey, ProjectionView, ReadModel,
    SequencedEvent,
};

use crate::read_model::ProjectionStoreError;
use crate::workers::{ReadModelError, ReadModelHandle};

pub const OPEN_CARTS_WITH_PRODUCTS: &str = "open_carts_with_products";

const EVENT_TYPES: &[&str] = &[
    types::ITEM_ADDED,
    types::ITEM_REMOVED,
    types::ITEM_ARCHIVED,
    types::CART_CLEARED,
    types::CART_SUBMITTED,
];

/// Value stored under each primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCartItem {
    pub description: String,
    pub price: i64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCartsWithProducts;

impl OpenCartsWithProducts {
    pub fn primary_key(product_id: ProductId, cart_id: CartId, item_id: ItemId) -> ProjectionKey {
        ProjectionKey::new([
            product_id.to_string(),
            cart_id.to_string(),
            item_id.to_string(),
        ])
    }

    pub fn product_prefix(product_id: ProductId) -> ProjectionKey {
        ProjectionKey::new([product_id.to_string()])
    }

    fn reverse_key(cart_id: CartId, item_id: ItemId, product_id: ProductId) -> ProjectionKey {
        ProjectionKey::new([
            cart_id.to_string(),
            item_id.to_string(),
            product_id.to_string(),
        ])
    }

    /// Delete every primary entry reachable from reverse entries under `prefix`.
    fn drop_reachable(
        view: &dyn ProjectionView,
        prefix: ProjectionKey,
        batch: &mut ProjectionBatch,
    ) -> Result<(), ProjectionError> {
        for entry in view.scan(Keyspace::Reverse, &prefix)? {
            let (cart, item, product) = match entry.key.segments() {
                [cart, item, product] => (cart, item, product),
                _ => {
                    return Err(ProjectionError::Decode(format!(
                        "malformed reverse key {}",
                        entry.key
                    )));
                }
            };
            batch.delete(
                Keyspace::Primary,
                ProjectionKey::new([product.as_str(), cart.as_str(), item.as_str()]),
            );
            batch.delete(Keyspace::Reverse, entry.key);
        }
        Ok(())
    }
}

impl ReadModel for OpenCartsWithProducts {
    type Event = CartEvent;

    fn name(&self) -> &'static str {
        OPEN_CARTS_WITH_PRODUCTS
    }

    fn event_types(&self) -> &'static [&'static str] {
        EVENT_TYPES
    }

    fn apply(
        &self,
        view: &dyn ProjectionView,
        event: &SequencedEvent<CartEvent>,
        batch: &mut ProjectionBatch,
    ) -> Result<(), ProjectionError> {
        match event.payload() {
            CartEvent::ItemAdded(e) => {
                let value = serde_json::to_value(OpenCartItem {
                    description: e.description.clone(),
                    price: e.price,
                })
                .map_err(|err| ProjectionError::Decode(err.to_string()))?;

                batch.put(
                    Keyspace::Primary,
                    Self::primary_key(e.product_id, e.cart_id, e.item_id),
                    Some(value),
                );
                batch.put(
                    Keyspace::Reverse,
                    Self::reverse_key(e.cart_id, e.item_id, e.product_id),
                    None,
                );
                Ok(())
            }
            CartEvent::ItemRemoved(e) => Self::drop_reachable(
                view,
                ProjectionKey::new([e.cart_id.to_string(), e.item_id.to_string()]),
                batch,
            ),
            CartEvent::ItemArchived(e) => Self::drop_reachable(
                view,
                ProjectionKey::new([e.cart_id.to_string(), e.item_id.to_string()]),
                batch,
            ),
            CartEvent::CartCleared(e) => {
                Self::drop_reachable(view, ProjectionKey::new([e.cart_id.to_string()]), batch)
            }
            CartEvent::CartSubmitted(e) => {
                Self::drop_reachable(view, ProjectionKey::new([e.cart_id.to_string()]), batch)
            }
            _ => Ok(()),
        }
    }
}

/// Every item of `product_id` sitting in an open cart, in key order.
pub fn open_cart_items(
    handle: &ReadModelHandle,
    product_id: ProductId,
) -> Result<Vec<CartItemRef>, ReadModelError> {
    handle
        .scan(&OpenCartsWithProducts::product_prefix(product_id))?
        .into_iter()
        .map(|entry| {
            let parsed = match entry.key.segments() {
                [_, cart, item] => cart
                    .parse::<CartId>()
                    .and_then(|cart_id| item.parse::<ItemId>().map(|item_id| (cart_id, item_id)))
                    .map_err(|e| e.to_string()),
                _ => Err(format!("malformed key {}", entry.key)),
            };
            parsed
                .map(|(cart_id, item_id)| CartItemRef { cart_id, item_id })
                .map_err(|msg| ReadModelError::Store(ProjectionStoreError::Decode(msg)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dcbflow_carts::{
        CartCleared, CartSubmitted, ItemAdded, ItemArchived, ItemRemoved, PriceChanged,
    };

    use super::*;
    use crate::event_log::{EventLog, InMemoryEventLog, UncommittedEvent};
    use crate::read_model::{InMemoryProjectionStore, ProjectionStore};
    use crate::workers::ReadModelProcessor;

    struct Fixture {
        log: Arc<InMemoryEventLog>,
        store: Arc<InMemoryProjectionStore>,
        processor: ReadModelProcessor<OpenCartsWithProducts>,
    }

    impl Fixture {
        fn new() -> Self {
            let log = Arc::new(InMemoryEventLog::new());
            let store = Arc::new(InMemoryProjectionStore::new());
            let processor =
                ReadModelProcessor::new(OpenCartsWithProducts, store.clone(), log.clone(), 16);
            Self {
                log,
                store,
                processor,
            }
        }

        fn append(&mut self, event: CartEvent) {
            self.log
                .append(vec![UncommittedEvent::from_typed(&event).unwrap()], None)
                .unwrap();
            self.processor.run_cycle().unwrap();
        }

        fn items(&self, product_id: ProductId) -> Vec<CartItemRef> {
            open_cart_items(&self.processor.handle(), product_id).unwrap()
        }
    }

    fn added(cart_id: CartId, item_id: ItemId, product_id: ProductId) -> CartEvent {
        CartEvent::ItemAdded(ItemAdded {
            cart_id,
            item_id,
            product_id,
            description: "kettle".to_string(),
            price: 3999,
        })
    }

    #[test]
    fn added_items_are_listed_per_product() {
        let mut fx = Fixture::new();
        let (cart, item, product) = (CartId::new(), ItemId::new(), ProductId::new());
        fx.append(added(cart, item, product));
        fx.append(added(CartId::new(), ItemId::new(), ProductId::new()));

        assert_eq!(
            fx.items(product),
            vec![CartItemRef {
                cart_id: cart,
                item_id: item
            }]
        );

        let entry = fx
            .processor
            .handle()
            .get(&OpenCartsWithProducts::primary_key(product, cart, item))
            .unwrap()
            .unwrap();
        let value: OpenCartItem = serde_json::from_value(entry.value.unwrap()).unwrap();
        assert_eq!(value.price, 3999);
    }

    #[test]
    fn removal_drops_primary_and_reverse_entries() {
        let mut fx = Fixture::new();
        let (cart, product) = (CartId::new(), ProductId::new());
        let (kept, removed) = (ItemId::new(), ItemId::new());
        fx.append(added(cart, kept, product));
        fx.append(added(cart, removed, product));

        fx.append(CartEvent::ItemRemoved(ItemRemoved {
            cart_id: cart,
            item_id: removed,
        }));

        assert_eq!(fx.items(product).len(), 1);
        assert_eq!(fx.store.len(Keyspace::Reverse), 1);
    }

    #[test]
    fn archived_items_disappear() {
        let mut fx = Fixture::new();
        let (cart, item, product) = (CartId::new(), ItemId::new(), ProductId::new());
        fx.append(added(cart, item, product));
        fx.append(CartEvent::ItemArchived(ItemArchived {
            cart_id: cart,
            item_id: item,
            product_id: product,
        }));

        assert!(fx.items(product).is_empty());
        assert_eq!(fx.store.len(Keyspace::Primary), 0);
    }

    #[test]
    fn cleared_and_submitted_carts_drop_every_entry() {
        let mut fx = Fixture::new();
        let product = ProductId::new();
        let (cleared, submitted, open) = (CartId::new(), CartId::new(), CartId::new());
        for cart in [cleared, submitted, open] {
            fx.append(added(cart, ItemId::new(), product));
            fx.append(added(cart, ItemId::new(), ProductId::new()));
        }

        fx.append(CartEvent::CartCleared(CartCleared { cart_id: cleared }));
        fx.append(CartEvent::CartSubmitted(CartSubmitted {
            cart_id: submitted,
            ordered_products: vec![],
            total_price: 0,
        }));

        let items = fx.items(product);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].cart_id, open);
        assert_eq!(fx.store.len(Keyspace::Primary), 2);
        assert_eq!(fx.store.len(Keyspace::Reverse), 2);
    }

    #[test]
    fn uninteresting_events_leave_the_projection_alone() {
        let mut fx = Fixture::new();
        let product = ProductId::new();
        fx.append(added(CartId::new(), ItemId::new(), product));
        fx.append(CartEvent::PriceChanged(PriceChanged {
            product_id: product,
            old_price: None,
            new_price: 10,
        }));

        assert_eq!(fx.items(product).len(), 1);
        assert_eq!(fx.store.cursor().unwrap(), fx.log.head().unwrap());
    }
}
