//! Product-scoped commands: stock level and price.

use serde::{Deserialize, Serialize};

use dcbflow_core::{AppendPolicy, DomainError, Query, QueryItem};
use dcbflow_events::{Command, SequencedEvent};

use crate::events::{CartEvent, InventoryChanged, PriceChanged, ProductId, product_tag, types};

/// Command: ChangeInventory (sets the absolute stock level).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInventory {
    pub product_id: ProductId,
    pub inventory: i64,
}

impl Command for ChangeInventory {
    type Event = CartEvent;
    type State = Option<i64>;

    fn name(&self) -> &'static str {
        "ChangeInventory"
    }

    fn query(&self) -> Query {
        Query::single(
            QueryItem::new()
                .types([types::INVENTORY_CHANGED])
                .tag(product_tag(self.product_id)),
        )
    }

    fn evolve(&self, state: Option<i64>, event: &SequencedEvent<CartEvent>) -> Option<i64> {
        match event.payload() {
            CartEvent::InventoryChanged(e) => Some(e.inventory),
            _ => state,
        }
    }

    fn decide(&self, state: &Option<i64>) -> Result<Vec<CartEvent>, DomainError> {
        if self.inventory < 0 {
            return Err(DomainError::validation("inventory must not be negative"));
        }
        if *state == Some(self.inventory) {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::InventoryChanged(InventoryChanged {
            product_id: self.product_id,
            inventory: self.inventory,
        })])
    }

    fn append_policy(&self) -> AppendPolicy {
        AppendPolicy::Unconditional
    }
}

/// Command: ChangePrice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePrice {
    pub product_id: ProductId,
    pub new_price: i64,
}

impl Command for ChangePrice {
    type Event = CartEvent;
    type State = Option<i64>;

    fn name(&self) -> &'static str {
        "ChangePrice"
    }

    fn query(&self) -> Query {
        Query::single(
            QueryItem::new()
                .types([types::PRICE_CHANGED])
                .tag(product_tag(self.product_id)),
        )
    }

    fn evolve(&self, state: Option<i64>, event: &SequencedEvent<CartEvent>) -> Option<i64> {
        match event.payload() {
            CartEvent::PriceChanged(e) => Some(e.new_price),
            _ => state,
        }
    }

    fn decide(&self, state: &Option<i64>) -> Result<Vec<CartEvent>, DomainError> {
        if self.new_price <= 0 {
            return Err(DomainError::validation("price must be positive"));
        }
        if *state == Some(self.new_price) {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::PriceChanged(PriceChanged {
            product_id: self.product_id,
            old_price: *state,
            new_price: self.new_price,
        })])
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use dcbflow_core::{EventId, Position};
    use dcbflow_events::{DomainEvent, decide};

    use super::*;

    fn at(position: u64, ev: CartEvent) -> SequencedEvent<CartEvent> {
        SequencedEvent::new(
            EventId::new(),
            ev.event_type(),
            ev.tags(),
            Position::new(position),
            Utc::now(),
            ev,
        )
    }

    #[test]
    fn negative_inventory_is_rejected() {
        let cmd = ChangeInventory {
            product_id: ProductId::new(),
            inventory: -1,
        };
        assert!(matches!(
            decide(&cmd, std::iter::empty()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn setting_the_same_inventory_twice_is_a_no_op() {
        let product_id = ProductId::new();
        let cmd = ChangeInventory {
            product_id,
            inventory: 4,
        };
        let first = decide(&cmd, std::iter::empty()).unwrap();
        assert_eq!(first.len(), 1);

        let events = vec![at(1, first[0].clone())];
        assert!(decide(&cmd, &events).unwrap().is_empty());
    }

    #[test]
    fn price_change_carries_the_previous_price() {
        let product_id = ProductId::new();
        let events = vec![at(
            1,
            CartEvent::PriceChanged(PriceChanged {
                product_id,
                old_price: None,
                new_price: 100,
            }),
        )];

        let out = decide(
            &ChangePrice {
                product_id,
                new_price: 120,
            },
            &events,
        )
        .unwrap();
        assert_eq!(
            out,
            vec![CartEvent::PriceChanged(PriceChanged {
                product_id,
                old_price: Some(100),
                new_price: 120
            })]
        );

        let same = decide(
            &ChangePrice {
                product_id,
                new_price: 100,
            },
            &events,
        )
        .unwrap();
        assert!(same.is_empty());
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let cmd = ChangePrice {
            product_id: ProductId::new(),
            new_price: 0,
        };
        assert!(matches!(
            decide(&cmd, std::iter::empty()),
            Err(DomainError::Validation(_))
        ));
    }
}
