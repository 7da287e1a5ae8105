//! The projection row: current on-hand and reserved quantity of one stock key.
//!
//! Rows are derived state. Business logic never writes them directly; the ledger
//! evolves them through the pure functions below, inside the append transaction.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{CompanyId, DomainError, DomainResult};

use crate::identity::StockKey;
use crate::ids::WarehouseId;
use crate::movement::StockMove;

/// Change applied to one row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RowDelta {
    pub on_hand: Decimal,
    pub reserved: Decimal,
}

impl RowDelta {
    pub fn on_hand(delta: Decimal) -> Self {
        Self {
            on_hand: delta,
            reserved: Decimal::ZERO,
        }
    }

    pub fn reserved(delta: Decimal) -> Self {
        Self {
            on_hand: Decimal::ZERO,
            reserved: delta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub company_id: CompanyId,
    pub warehouse_id: WarehouseId,
    pub key: StockKey,
    pub qty_on_hand: Decimal,
    pub qty_reserved: Decimal,
}

impl InventoryItem {
    pub fn empty(company_id: CompanyId, warehouse_id: WarehouseId, key: StockKey) -> Self {
        Self {
            company_id,
            warehouse_id,
            key,
            qty_on_hand: Decimal::ZERO,
            qty_reserved: Decimal::ZERO,
        }
    }

    pub fn with_quantities(mut self, on_hand: Decimal, reserved: Decimal) -> Self {
        self.qty_on_hand = on_hand;
        self.qty_reserved = reserved;
        self
    }

    /// `on_hand - reserved`, never reported below zero.
    pub fn available(&self) -> Decimal {
        (self.qty_on_hand - self.qty_reserved).max(Decimal::ZERO)
    }

    pub fn is_empty(&self) -> bool {
        self.qty_on_hand.is_zero() && self.qty_reserved.is_zero()
    }

    /// Pure `(row, delta) -> row`. Rejects any result breaking the row invariants.
    pub fn apply_delta(&self, delta: RowDelta) -> DomainResult<InventoryItem> {
        let on_hand = self.qty_on_hand + delta.on_hand;
        let reserved = self.qty_reserved + delta.reserved;

        if on_hand < Decimal::ZERO {
            return Err(DomainError::invariant(format!(
                "on-hand would become negative ({on_hand}) at location {}",
                self.key.location_id
            )));
        }
        if reserved < Decimal::ZERO {
            return Err(DomainError::invariant(format!(
                "reserved would become negative ({reserved}) at location {}",
                self.key.location_id
            )));
        }
        if reserved > on_hand {
            return Err(DomainError::invariant(format!(
                "reserved ({reserved}) would exceed on-hand ({on_hand}) at location {}",
                self.key.location_id
            )));
        }
        if self.key.tracking.is_serial() && on_hand > Decimal::ONE {
            return Err(DomainError::invariant(format!(
                "serialized row would hold {on_hand} units at location {}",
                self.key.location_id
            )));
        }

        Ok(InventoryItem {
            qty_on_hand: on_hand,
            qty_reserved: reserved,
            ..self.clone()
        })
    }

    /// Pure `(row, move) -> row` for the on-hand side of a move.
    pub fn apply_move(&self, stock_move: &StockMove) -> DomainResult<InventoryItem> {
        if stock_move.company_id != self.company_id {
            return Err(DomainError::invariant("move belongs to another company"));
        }
        if !stock_move.touches(&self.key) {
            return Err(DomainError::invariant(format!(
                "move {} does not touch this row",
                stock_move.id
            )));
        }
        self.apply_delta(RowDelta::on_hand(stock_move.delta_for(&self.key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ProductRef, Tracking};
    use crate::ids::{LocationId, ProductId, SerialId};
    use crate::movement::MoveType;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn row(tracking: Tracking) -> InventoryItem {
        InventoryItem::empty(
            CompanyId::new(),
            WarehouseId::new(),
            StockKey::new(
                LocationId::new(),
                ProductRef::product(ProductId::new()),
                tracking,
            ),
        )
    }

    #[test]
    fn receipt_then_pick_updates_on_hand() {
        let item = row(Tracking::Untracked);
        let receipt = StockMove::new(
            item.company_id,
            MoveType::Receipt,
            item.warehouse_id,
            item.key.product,
            item.key.tracking,
            dec!(10),
            Utc::now(),
        )
        .to_location(item.key.location_id);
        let item = item.apply_move(&receipt).unwrap();
        assert_eq!(item.qty_on_hand, dec!(10));

        let pick = StockMove::new(
            item.company_id,
            MoveType::Pick,
            item.warehouse_id,
            item.key.product,
            item.key.tracking,
            dec!(4),
            Utc::now(),
        )
        .from_location(item.key.location_id);
        let item = item.apply_move(&pick).unwrap();
        assert_eq!(item.qty_on_hand, dec!(6));
    }

    #[test]
    fn on_hand_never_goes_negative() {
        let item = row(Tracking::Untracked).with_quantities(dec!(2), dec!(0));
        let err = item.apply_delta(RowDelta::on_hand(dec!(-3))).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn reserved_cannot_exceed_on_hand() {
        let item = row(Tracking::Untracked).with_quantities(dec!(5), dec!(3));
        assert!(item.apply_delta(RowDelta::reserved(dec!(3))).is_err());
        assert!(item.apply_delta(RowDelta::on_hand(dec!(-3))).is_err());
        let ok = item.apply_delta(RowDelta::reserved(dec!(2))).unwrap();
        assert_eq!(ok.available(), dec!(0));
    }

    #[test]
    fn serial_row_holds_at_most_one_unit() {
        let item = row(Tracking::Serial(SerialId::new())).with_quantities(dec!(1), dec!(0));
        let err = item.apply_delta(RowDelta::on_hand(dec!(1))).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn foreign_moves_are_rejected() {
        let item = row(Tracking::Untracked);
        let other = StockMove::new(
            item.company_id,
            MoveType::Receipt,
            item.warehouse_id,
            item.key.product,
            item.key.tracking,
            dec!(1),
            Utc::now(),
        )
        .to_location(LocationId::new());
        assert!(item.apply_move(&other).is_err());
    }

    proptest! {
        // Whatever deltas are accepted, the row invariants hold afterwards.
        #[test]
        fn accepted_deltas_preserve_invariants(
            deltas in proptest::collection::vec((-50i64..50, -50i64..50), 0..40)
        ) {
            let mut item = row(Tracking::Untracked);
            for (on_hand, reserved) in deltas {
                let delta = RowDelta {
                    on_hand: Decimal::from(on_hand),
                    reserved: Decimal::from(reserved),
                };
                if let Ok(next) = item.apply_delta(delta) {
                    item = next;
                }
                prop_assert!(item.qty_on_hand >= Decimal::ZERO);
                prop_assert!(item.qty_reserved >= Decimal::ZERO);
                prop_assert!(item.qty_reserved <= item.qty_on_hand);
            }
        }

        // Reserving and releasing the same quantity is an exact round trip.
        #[test]
        fn reserve_release_is_conservative(on_hand in 0i64..1000, qty in 0i64..1000) {
            let item = row(Tracking::Untracked).with_quantities(Decimal::from(on_hand), Decimal::ZERO);
            let qty = Decimal::from(qty);
            match item.apply_delta(RowDelta::reserved(qty)) {
                Ok(reserved) => {
                    let released = reserved.apply_delta(RowDelta::reserved(-qty)).unwrap();
                    prop_assert_eq!(released, item);
                }
                Err(_) => prop_assert!(qty > item.qty_on_hand),
            }
        }
    }
}
