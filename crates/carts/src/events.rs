use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use dcbflow_core::{Tag, uuid_newtype};
use dcbflow_events::DomainEvent;

uuid_newtype!(CartId, "CartId");
uuid_newtype!(ItemId, "ItemId");
uuid_newtype!(ProductId, "ProductId");

/// Tag dimensions. Changing any of these breaks queries against history.
pub const CART_ID: &str = "cart_id";
pub const ITEM_ID: &str = "item_id";
pub const PRODUCT_ID: &str = "product_id";

pub fn cart_tag(id: CartId) -> Tag {
    Tag::new(CART_ID, id)
}

pub fn item_tag(id: ItemId) -> Tag {
    Tag::new(ITEM_ID, id)
}

pub fn product_tag(id: ProductId) -> Tag {
    Tag::new(PRODUCT_ID, id)
}

/// Event type identifiers.
pub mod types {
    pub const ITEM_ADDED: &str = "ItemAdded";
    pub const ITEM_REMOVED: &str = "ItemRemoved";
    pub const ITEM_ARCHIVED: &str = "ItemArchived";
    pub const CART_CLEARED: &str = "CartCleared";
    pub const CART_SUBMITTED: &str = "CartSubmitted";
    pub const CART_CLOSED: &str = "CartClosed";
    pub const INVENTORY_CHANGED: &str = "InventoryChanged";
    pub const PRICE_CHANGED: &str = "PriceChanged";

    /// Every event type that carries a cart's lifecycle.
    pub const CART_LIFECYCLE: &[&str] = &[
        ITEM_ADDED,
        ITEM_REMOVED,
        ITEM_ARCHIVED,
        CART_CLEARED,
        CART_SUBMITTED,
        CART_CLOSED,
    ];
}

/// Event: ItemAdded. Prices are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub cart_id: CartId,
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub description: String,
    pub price: i64,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub cart_id: CartId,
    pub item_id: ItemId,
}

/// Event: ItemArchived (compensation after a price change).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemArchived {
    pub cart_id: CartId,
    pub item_id: ItemId,
    pub product_id: ProductId,
}

/// Event: CartCleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCleared {
    pub cart_id: CartId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedProduct {
    pub product_id: ProductId,
    pub price: i64,
}

/// Event: CartSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSubmitted {
    pub cart_id: CartId,
    pub ordered_products: Vec<OrderedProduct>,
    pub total_price: i64,
}

/// Event: CartClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartClosed {
    pub cart_id: CartId,
}

/// Event: InventoryChanged (absolute stock level for a product).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryChanged {
    pub product_id: ProductId,
    pub inventory: i64,
}

/// Event: PriceChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChanged {
    pub product_id: ProductId,
    pub old_price: Option<i64>,
    pub new_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartEvent {
    ItemAdded(ItemAdded),
    ItemRemoved(ItemRemoved),
    ItemArchived(ItemArchived),
    CartCleared(CartCleared),
    CartSubmitted(CartSubmitted),
    CartClosed(CartClosed),
    InventoryChanged(InventoryChanged),
    PriceChanged(PriceChanged),
}

impl CartEvent {
    /// The cart this event belongs to, if any.
    pub fn cart_id(&self) -> Option<CartId> {
        match self {
            CartEvent::ItemAdded(e) => Some(e.cart_id),
            CartEvent::ItemRemoved(e) => Some(e.cart_id),
            CartEvent::ItemArchived(e) => Some(e.cart_id),
            CartEvent::CartCleared(e) => Some(e.cart_id),
            CartEvent::CartSubmitted(e) => Some(e.cart_id),
            CartEvent::CartClosed(e) => Some(e.cart_id),
            CartEvent::InventoryChanged(_) | CartEvent::PriceChanged(_) => None,
        }
    }
}

impl DomainEvent for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::ItemAdded(_) => types::ITEM_ADDED,
            CartEvent::ItemRemoved(_) => types::ITEM_REMOVED,
            CartEvent::ItemArchived(_) => types::ITEM_ARCHIVED,
            CartEvent::CartCleared(_) => types::CART_CLEARED,
            CartEvent::CartSubmitted(_) => types::CART_SUBMITTED,
            CartEvent::CartClosed(_) => types::CART_CLOSED,
            CartEvent::InventoryChanged(_) => types::INVENTORY_CHANGED,
            CartEvent::PriceChanged(_) => types::PRICE_CHANGED,
        }
    }

    fn tags(&self) -> Vec<Tag> {
        match self {
            CartEvent::ItemAdded(e) => vec![
                cart_tag(e.cart_id),
                item_tag(e.item_id),
                product_tag(e.product_id),
            ],
            CartEvent::ItemRemoved(e) => vec![cart_tag(e.cart_id), item_tag(e.item_id)],
            CartEvent::ItemArchived(e) => vec![
                cart_tag(e.cart_id),
                item_tag(e.item_id),
                product_tag(e.product_id),
            ],
            CartEvent::CartCleared(e) => vec![cart_tag(e.cart_id)],
            CartEvent::CartSubmitted(e) => vec![cart_tag(e.cart_id)],
            CartEvent::CartClosed(e) => vec![cart_tag(e.cart_id)],
            CartEvent::InventoryChanged(e) => vec![product_tag(e.product_id)],
            CartEvent::PriceChanged(e) => vec![product_tag(e.product_id)],
        }
    }

    fn to_payload(&self) -> Result<JsonValue, serde_json::Error> {
        match self {
            CartEvent::ItemAdded(e) => serde_json::to_value(e),
            CartEvent::ItemRemoved(e) => serde_json::to_value(e),
            CartEvent::ItemArchived(e) => serde_json::to_value(e),
            CartEvent::CartCleared(e) => serde_json::to_value(e),
            CartEvent::CartSubmitted(e) => serde_json::to_value(e),
            CartEvent::CartClosed(e) => serde_json::to_value(e),
            CartEvent::InventoryChanged(e) => serde_json::to_value(e),
            CartEvent::PriceChanged(e) => serde_json::to_value(e),
        }
    }

    fn from_payload(
        event_type: &str,
        payload: &JsonValue,
    ) -> Result<Option<Self>, serde_json::Error> {
        let payload = payload.clone();
        let event = match event_type {
            types::ITEM_ADDED => CartEvent::ItemAdded(serde_json::from_value(payload)?),
            types::ITEM_REMOVED => CartEvent::ItemRemoved(serde_json::from_value(payload)?),
            types::ITEM_ARCHIVED => CartEvent::ItemArchived(serde_json::from_value(payload)?),
            types::CART_CLEARED => CartEvent::CartCleared(serde_json::from_value(payload)?),
            types::CART_SUBMITTED => CartEvent::CartSubmitted(serde_json::from_value(payload)?),
            types::CART_CLOSED => CartEvent::CartClosed(serde_json::from_value(payload)?),
            types::INVENTORY_CHANGED => {
                CartEvent::InventoryChanged(serde_json::from_value(payload)?)
            }
            types::PRICE_CHANGED => CartEvent::PriceChanged(serde_json::from_value(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
