//! Cart commands and their business rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dcbflow_core::{DomainError, Query, QueryItem};
use dcbflow_events::{Command, SequencedEvent};

use crate::events::{
    CartCleared, CartClosed, CartEvent, CartId, CartSubmitted, ItemAdded, ItemArchived, ItemId,
    ItemRemoved, ProductId, cart_tag, product_tag, types,
};
use crate::state::{CartState, MAX_ITEMS};

/// Every lifecycle event of one cart.
pub fn cart_history(cart_id: CartId) -> QueryItem {
    QueryItem::new()
        .types(types::CART_LIFECYCLE.iter().copied())
        .tag(cart_tag(cart_id))
}

fn cart_not_found(cart_id: CartId) -> DomainError {
    DomainError::not_found(format!("cart {cart_id}"))
}

fn ensure_open(cart_id: CartId, state: &CartState) -> Result<(), DomainError> {
    if state.is_submitted() {
        return Err(DomainError::conflict(format!(
            "cart {cart_id} already submitted"
        )));
    }
    Ok(())
}

/// Command: AddItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub cart_id: CartId,
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub description: String,
    pub price: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AddItemState {
    pub cart: CartState,
    /// Last known stock level; `None` when the product is not stock-managed.
    pub inventory: Option<i64>,
}

impl Command for AddItem {
    type Event = CartEvent;
    type State = AddItemState;

    fn name(&self) -> &'static str {
        "AddItem"
    }

    fn query(&self) -> Query {
        Query::new(vec![
            cart_history(self.cart_id),
            QueryItem::new()
                .types([types::INVENTORY_CHANGED])
                .tag(product_tag(self.product_id)),
        ])
    }

    fn evolve(&self, mut state: AddItemState, event: &SequencedEvent<CartEvent>) -> AddItemState {
        match event.payload() {
            CartEvent::InventoryChanged(e) if e.product_id == self.product_id => {
                state.inventory = Some(e.inventory);
            }
            other => state.cart.apply(other),
        }
        state
    }

    fn decide(&self, state: &AddItemState) -> Result<Vec<CartEvent>, DomainError> {
        if self.description.trim().is_empty() {
            return Err(DomainError::validation("description must not be empty"));
        }
        if self.price <= 0 {
            return Err(DomainError::validation("price must be positive"));
        }
        if state.cart.is_closed() {
            return Err(DomainError::conflict(format!(
                "cart {} already closed",
                self.cart_id
            )));
        }
        ensure_open(self.cart_id, &state.cart)?;

        if state.cart.ever_contained(self.item_id) {
            return Ok(vec![]);
        }
        if state.cart.is_full() {
            return Err(DomainError::invariant(format!(
                "max items reached ({MAX_ITEMS})"
            )));
        }
        if state.inventory.is_some_and(|stock| stock <= 0) {
            return Err(DomainError::invariant(format!(
                "inventory exhausted for product {}",
                self.product_id
            )));
        }

        Ok(vec![CartEvent::ItemAdded(ItemAdded {
            cart_id: self.cart_id,
            item_id: self.item_id,
            product_id: self.product_id,
            description: self.description.clone(),
            price: self.price,
        })])
    }
}

/// Command: RemoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub cart_id: CartId,
    pub item_id: ItemId,
}

impl Command for RemoveItem {
    type Event = CartEvent;
    type State = CartState;

    fn name(&self) -> &'static str {
        "RemoveItem"
    }

    fn query(&self) -> Query {
        Query::single(cart_history(self.cart_id))
    }

    fn evolve(&self, mut state: CartState, event: &SequencedEvent<CartEvent>) -> CartState {
        state.apply(event.payload());
        state
    }

    fn decide(&self, state: &CartState) -> Result<Vec<CartEvent>, DomainError> {
        if !state.exists() {
            return Err(cart_not_found(self.cart_id));
        }
        ensure_open(self.cart_id, state)?;
        if !state.ever_contained(self.item_id) {
            return Err(DomainError::not_found(format!("item {}", self.item_id)));
        }
        if !state.contains(self.item_id) {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::ItemRemoved(ItemRemoved {
            cart_id: self.cart_id,
            item_id: self.item_id,
        })])
    }
}

/// Command: ClearCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCart {
    pub cart_id: CartId,
}

impl Command for ClearCart {
    type Event = CartEvent;
    type State = CartState;

    fn name(&self) -> &'static str {
        "ClearCart"
    }

    fn query(&self) -> Query {
        Query::single(cart_history(self.cart_id))
    }

    fn evolve(&self, mut state: CartState, event: &SequencedEvent<CartEvent>) -> CartState {
        state.apply(event.payload());
        state
    }

    fn decide(&self, state: &CartState) -> Result<Vec<CartEvent>, DomainError> {
        if !state.exists() {
            return Err(cart_not_found(self.cart_id));
        }
        ensure_open(self.cart_id, state)?;
        if state.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::CartCleared(CartCleared {
            cart_id: self.cart_id,
        })])
    }
}

/// Command: SubmitCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitCart {
    pub cart_id: CartId,
}

impl Command for SubmitCart {
    type Event = CartEvent;
    type State = CartState;

    fn name(&self) -> &'static str {
        "SubmitCart"
    }

    fn query(&self) -> Query {
        Query::single(cart_history(self.cart_id))
    }

    fn evolve(&self, mut state: CartState, event: &SequencedEvent<CartEvent>) -> CartState {
        state.apply(event.payload());
        state
    }

    fn decide(&self, state: &CartState) -> Result<Vec<CartEvent>, DomainError> {
        if !state.exists() {
            return Err(cart_not_found(self.cart_id));
        }
        if state.is_submitted() {
            return Ok(vec![]);
        }
        if state.is_empty() {
            return Err(DomainError::validation("cannot submit an empty cart"));
        }

        Ok(vec![CartEvent::CartSubmitted(CartSubmitted {
            cart_id: self.cart_id,
            ordered_products: state.ordered_products(),
            total_price: state.total_price(),
        })])
    }
}

/// Command: CloseCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseCart {
    pub cart_id: CartId,
}

impl Command for CloseCart {
    type Event = CartEvent;
    type State = CartState;

    fn name(&self) -> &'static str {
        "CloseCart"
    }

    fn query(&self) -> Query {
        Query::single(cart_history(self.cart_id))
    }

    fn evolve(&self, mut state: CartState, event: &SequencedEvent<CartEvent>) -> CartState {
        state.apply(event.payload());
        state
    }

    fn decide(&self, state: &CartState) -> Result<Vec<CartEvent>, DomainError> {
        if !state.exists() {
            return Err(cart_not_found(self.cart_id));
        }
        if state.is_closed() {
            return Ok(vec![]);
        }
        if !state.is_submitted() {
            return Err(DomainError::invariant(format!(
                "cart {} is not submitted",
                self.cart_id
            )));
        }

        Ok(vec![CartEvent::CartClosed(CartClosed {
            cart_id: self.cart_id,
        })])
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CartItemRef {
    pub cart_id: CartId,
    pub item_id: ItemId,
}

/// Command: ArchiveItems.
///
/// Archives the listed items of one product across several carts. The
/// consistency boundary spans every listed cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveItems {
    pub product_id: ProductId,
    pub items: Vec<CartItemRef>,
}

impl ArchiveItems {
    fn carts(&self) -> impl Iterator<Item = CartId> + '_ {
        let mut seen = Vec::new();
        self.items.iter().filter_map(move |r| {
            if seen.contains(&r.cart_id) {
                None
            } else {
                seen.push(r.cart_id);
                Some(r.cart_id)
            }
        })
    }
}

impl Command for ArchiveItems {
    type Event = CartEvent;
    type State = BTreeMap<CartId, CartState>;

    fn name(&self) -> &'static str {
        "ArchiveItems"
    }

    fn query(&self) -> Query {
        self.carts().map(cart_history).collect()
    }

    fn evolve(
        &self,
        mut state: BTreeMap<CartId, CartState>,
        event: &SequencedEvent<CartEvent>,
    ) -> BTreeMap<CartId, CartState> {
        if let Some(cart_id) = event.payload().cart_id() {
            state.entry(cart_id).or_default().apply(event.payload());
        }
        state
    }

    fn decide(&self, state: &BTreeMap<CartId, CartState>) -> Result<Vec<CartEvent>, DomainError> {
        let mut out = Vec::new();
        let mut done: Vec<CartItemRef> = Vec::new();

        for r in &self.items {
            if done.contains(r) {
                continue;
            }
            done.push(*r);

            let Some(cart) = state.get(&r.cart_id) else {
                continue;
            };
            if cart.is_submitted() {
                continue;
            }
            let matches_product = cart
                .line(r.item_id)
                .is_some_and(|l| l.product_id == self.product_id);
            if !matches_product {
                continue;
            }

            out.push(CartEvent::ItemArchived(ItemArchived {
                cart_id: r.cart_id,
                item_id: r.item_id,
                product_id: self.product_id,
            }));
        }

        Ok(out)
    }
}
