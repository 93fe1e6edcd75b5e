//! Decision state folded from a cart's history.

use crate::events::{CartEvent, ItemId, OrderedProduct, ProductId};

/// Carts hold at most this many items at once.
pub const MAX_ITEMS: i64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub price: i64,
}

/// Everything a cart decision needs to know about one cart.
///
/// `item_count` is derived purely from increment/decrement/reset events and is
/// signed on purpose: a stray `ItemRemoved` drives it below zero rather than
/// being clamped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartState {
    exists: bool,
    lines: Vec<CartLine>,
    seen: Vec<ItemId>,
    item_count: i64,
    submitted: bool,
    closed: bool,
}

impl CartState {
    pub fn apply(&mut self, event: &CartEvent) {
        match event {
            CartEvent::ItemAdded(e) => {
                self.exists = true;
                self.item_count += 1;
                if !self.seen.contains(&e.item_id) {
                    self.seen.push(e.item_id);
                }
                if !self.contains(e.item_id) {
                    self.lines.push(CartLine {
                        item_id: e.item_id,
                        product_id: e.product_id,
                        price: e.price,
                    });
                }
            }
            CartEvent::ItemRemoved(e) => {
                self.exists = true;
                self.item_count -= 1;
                self.lines.retain(|l| l.item_id != e.item_id);
            }
            CartEvent::ItemArchived(e) => {
                self.exists = true;
                self.item_count -= 1;
                self.lines.retain(|l| l.item_id != e.item_id);
            }
            CartEvent::CartCleared(_) => {
                self.exists = true;
                self.item_count = 0;
                self.lines.clear();
            }
            CartEvent::CartSubmitted(_) => {
                self.exists = true;
                self.submitted = true;
            }
            CartEvent::CartClosed(_) => {
                self.exists = true;
                self.closed = true;
            }
            CartEvent::InventoryChanged(_) | CartEvent::PriceChanged(_) => {}
        }
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn item_count(&self) -> i64 {
        self.item_count
    }

    pub fn is_full(&self) -> bool {
        self.item_count >= MAX_ITEMS
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Item currently in the cart.
    pub fn contains(&self, item_id: ItemId) -> bool {
        self.lines.iter().any(|l| l.item_id == item_id)
    }

    /// Item was added at some point, whether or not it is still there.
    pub fn ever_contained(&self, item_id: ItemId) -> bool {
        self.seen.contains(&item_id)
    }

    pub fn line(&self, item_id: ItemId) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.item_id == item_id)
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn ordered_products(&self) -> Vec<OrderedProduct> {
        self.lines
            .iter()
            .map(|l| OrderedProduct {
                product_id: l.product_id,
                price: l.price,
            })
            .collect()
    }

    pub fn total_price(&self) -> i64 {
        self.lines.iter().map(|l| l.price).sum()
    }
}
