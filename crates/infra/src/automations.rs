//! Cart automations.

use dcbflow_carts::{ArchiveItems, CartEvent, CloseCart, types};
use dcbflow_events::{Automation, AutomationError, MappedAutomation, SequencedEvent};

use crate::projections::open_carts::open_cart_items;
use crate::workers::ReadModelHandle;

pub const AUTO_CLOSE_SUBMITTED_CARTS: &str = "auto_close_submitted_carts";
pub const ARCHIVE_ITEMS_ON_PRICE_CHANGE: &str = "archive_items_on_price_change";

/// `CartSubmitted` → `CloseCart`.
pub fn auto_close_submitted_carts() -> impl Automation<Event = CartEvent, Command = CloseCart> {
    MappedAutomation::new(
        AUTO_CLOSE_SUBMITTED_CARTS,
        types::CART_SUBMITTED,
        (),
        |event: &SequencedEvent<CartEvent>, _: &()| match event.payload() {
            CartEvent::CartSubmitted(e) => Ok(Some(CloseCart { cart_id: e.cart_id })),
            _ => Ok(None),
        },
    )
}

/// `PriceChanged` → `ArchiveItems` for every open cart holding the product.
///
/// Open carts are looked up in the open-carts read model behind `open_carts`.
pub fn archive_items_on_price_change(
    open_carts: ReadModelHandle,
) -> impl Automation<Event = CartEvent, Command = ArchiveItems> {
    MappedAutomation::new(
        ARCHIVE_ITEMS_ON_PRICE_CHANGE,
        types::PRICE_CHANGED,
        open_carts,
        |event: &SequencedEvent<CartEvent>, open_carts: &ReadModelHandle| {
            let CartEvent::PriceChanged(e) = event.payload() else {
                return Ok(None);
            };

            // Not caught up yet, or the store is down: retry this event later.
            let items = open_cart_items(open_carts, e.product_id)
                .map_err(|err| AutomationError::NotReady(err.to_string()))?;
            if items.is_empty() {
                return Ok(None);
            }

            Ok(Some(ArchiveItems {
                product_id: e.product_id,
                items,
            }))
        },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use dcbflow_carts::{CartId, CartSubmitted, PriceChanged, ProductId};
    use dcbflow_core::{EventId, Position};

    use super::*;
    use crate::event_log::InMemoryEventLog;
    use crate::projections::open_carts::OpenCartsWithProducts;
    use crate::read_model::InMemoryProjectionStore;
    use crate::workers::ReadModelProcessor;

    fn sequenced(position: u64, event: CartEvent) -> SequencedEvent<CartEvent> {
        SequencedEvent::new(
            EventId::new(),
            dcbflow_events::DomainEvent::event_type(&event),
            dcbflow_events::DomainEvent::tags(&event),
            Position::new(position),
            Utc::now(),
            event,
        )
    }

    #[test]
    fn submitted_carts_map_to_close() {
        let cart_id = CartId::new();
        let automation = auto_close_submitted_carts();
        let event = sequenced(
            1,
            CartEvent::CartSubmitted(CartSubmitted {
                cart_id,
                ordered_products: vec![],
                total_price: 0,
            }),
        );

        assert_eq!(automation.trigger(), types::CART_SUBMITTED);
        assert_eq!(
            automation.to_command(&event).unwrap(),
            Some(CloseCart { cart_id })
        );
    }

    #[test]
    fn price_change_waits_for_the_read_model() {
        let log = Arc::new(InMemoryEventLog::new());
        let processor = ReadModelProcessor::new(
            OpenCartsWithProducts,
            Arc::new(InMemoryProjectionStore::new()),
            log,
            16,
        );
        let automation = archive_items_on_price_change(processor.handle());
        let event = sequenced(
            1,
            CartEvent::PriceChanged(PriceChanged {
                product_id: ProductId::new(),
                old_price: Some(1),
                new_price: 2,
            }),
        );

        assert!(!automation.ready_for(Position::new(1)));
        assert!(matches!(
            automation.to_command(&event),
            Err(AutomationError::NotReady(_))
        ));
    }

    #[test]
    fn price_change_without_open_items_is_a_noop() {
        let log = Arc::new(InMemoryEventLog::new());
        let mut processor = ReadModelProcessor::new(
            OpenCartsWithProducts,
            Arc::new(InMemoryProjectionStore::new()),
            log,
            16,
        );
        processor.run_cycle().unwrap();
        let automation = archive_items_on_price_change(processor.handle());
        let event = sequenced(
            1,
            CartEvent::PriceChanged(PriceChanged {
                product_id: ProductId::new(),
                old_price: None,
                new_price: 5,
            }),
        );

        assert_eq!(automation.to_command(&event).unwrap(), None);
    }
}
