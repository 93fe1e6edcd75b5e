//! Concrete read models and consumer cursor persistence.
//!
//! Read models here are rebuildable from the log and idempotent per position.

pub mod cursor_store;
pub mod open_carts;

pub use cursor_store::{CursorStore, CursorStoreError, InMemoryCursorStore, PostgresCursorStore};
pub use open_carts::{OPEN_CARTS_WITH_PRODUCTS, OpenCartItem, OpenCartsWithProducts, open_cart_items};
