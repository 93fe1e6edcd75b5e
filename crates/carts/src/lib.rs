//! Cart domain: events, tag derivation and command rules.

pub mod cart;
pub mod events;
pub mod product;
pub mod state;

pub use cart::{
    AddItem, AddItemState, ArchiveItems, CartItemRef, ClearCart, CloseCart, RemoveItem,
    SubmitCart, cart_history,
};
pub use events::{
    CartCleared, CartClosed, CartEvent, CartId, CartSubmitted, InventoryChanged, ItemAdded,
    ItemArchived, ItemId, ItemRemoved, OrderedProduct, PriceChanged, ProductId, cart_tag,
    item_tag, product_tag, types,
};
pub use product::{ChangeInventory, ChangePrice};
pub use state::{CartLine, CartState, MAX_ITEMS};
