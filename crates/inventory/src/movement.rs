//! The ledger entry: an immutable, typed stock movement.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::quantity::{ensure_positive, ensure_scale};
use stockledger_core::{CompanyId, DomainError, DomainResult};
use stockledger_events::{CompanyScoped, Event};

use crate::identity::{ProductRef, StockKey, Tracking};
use crate::ids::{
    AdjustmentId, AdjustmentItemId, CountItemId, CycleCountId, LocationId, MoveId, PickTaskId,
    PickWaveId, ReceiptId, ReceiptItemId, ReservationId, ShipmentId, TransferOrderId, WarehouseId,
};
use crate::location::LocationType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    Receipt,
    Putaway,
    Pick,
    Pack,
    Ship,
    Adjustment,
    Transfer,
}

/// Whether a location side of a move must, may or must not be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Required,
    Optional,
    Absent,
}

impl MoveType {
    pub fn as_str(self) -> &'static str {
        match self {
            MoveType::Receipt => "receipt",
            MoveType::Putaway => "putaway",
            MoveType::Pick => "pick",
            MoveType::Pack => "pack",
            MoveType::Ship => "ship",
            MoveType::Adjustment => "adjustment",
            MoveType::Transfer => "transfer",
        }
    }

    fn sides(self) -> (Side, Side) {
        match self {
            MoveType::Receipt | MoveType::Adjustment => (Side::Absent, Side::Required),
            MoveType::Putaway | MoveType::Pack | MoveType::Transfer => {
                (Side::Required, Side::Required)
            }
            MoveType::Pick => (Side::Required, Side::Optional),
            MoveType::Ship => (Side::Required, Side::Absent),
        }
    }

    /// Location kinds the destination of this move type may have, if restricted.
    pub fn destination_kinds(self) -> Option<&'static [LocationType]> {
        match self {
            MoveType::Receipt => Some(&[LocationType::Inbound]),
            MoveType::Putaway => Some(&[LocationType::Pick, LocationType::Bulk, LocationType::Buffer]),
            MoveType::Pick => Some(&[LocationType::Staging]),
            MoveType::Pack => Some(&[LocationType::Outbound]),
            MoveType::Ship | MoveType::Adjustment | MoveType::Transfer => None,
        }
    }

    /// Only transfers may end in a different warehouse than they start.
    pub fn may_cross_warehouses(self) -> bool {
        matches!(self, MoveType::Transfer)
    }

    /// Adjustments carry a signed quantity; everything else is positive.
    pub fn is_signed(self) -> bool {
        matches!(self, MoveType::Adjustment)
    }
}

/// Link from a move back to the workflow document that produced it.
///
/// A closed set of reference kinds; each variant carries its own typed ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "ref_type", rename_all = "snake_case")]
pub enum MoveRef {
    Receipt {
        receipt_id: ReceiptId,
        item_id: ReceiptItemId,
    },
    PickTask {
        wave_id: PickWaveId,
        task_id: PickTaskId,
    },
    Reservation {
        reservation_id: ReservationId,
    },
    Shipment {
        shipment_id: ShipmentId,
    },
    Transfer {
        transfer_id: TransferOrderId,
    },
    Adjustment {
        adjustment_id: AdjustmentId,
        item_id: AdjustmentItemId,
    },
    CycleCount {
        count_id: CycleCountId,
        item_id: CountItemId,
    },
}

impl MoveRef {
    pub fn ref_type(&self) -> &'static str {
        match self {
            MoveRef::Receipt { .. } => "receipt",
            MoveRef::PickTask { .. } => "pick_task",
            MoveRef::Reservation { .. } => "reservation",
            MoveRef::Shipment { .. } => "shipment",
            MoveRef::Transfer { .. } => "transfer",
            MoveRef::Adjustment { .. } => "adjustment",
            MoveRef::CycleCount { .. } => "cycle_count",
        }
    }

    /// Id of the owning document (header, not line).
    pub fn ref_id(&self) -> Uuid {
        match self {
            MoveRef::Receipt { receipt_id, .. } => (*receipt_id).into(),
            MoveRef::PickTask { wave_id, .. } => (*wave_id).into(),
            MoveRef::Reservation { reservation_id } => (*reservation_id).into(),
            MoveRef::Shipment { shipment_id } => (*shipment_id).into(),
            MoveRef::Transfer { transfer_id } => (*transfer_id).into(),
            MoveRef::Adjustment { adjustment_id, .. } => (*adjustment_id).into(),
            MoveRef::CycleCount { count_id, .. } => (*count_id).into(),
        }
    }

    fn line_id(&self) -> Option<Uuid> {
        match self {
            MoveRef::Receipt { item_id, .. } => Some((*item_id).into()),
            MoveRef::PickTask { task_id, .. } => Some((*task_id).into()),
            MoveRef::Adjustment { item_id, .. } => Some((*item_id).into()),
            MoveRef::CycleCount { item_id, .. } => Some((*item_id).into()),
            MoveRef::Reservation { .. } | MoveRef::Shipment { .. } | MoveRef::Transfer { .. } => {
                None
            }
        }
    }
}

impl core::fmt::Display for MoveRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.ref_type(), self.ref_id())?;
        if let Some(line) = self.line_id() {
            write!(f, "/{line}")?;
        }
        Ok(())
    }
}

/// An immutable, append-only ledger entry.
///
/// Once appended it is never updated or deleted; corrections are offsetting moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMove {
    pub id: MoveId,
    pub company_id: CompanyId,
    pub kind: MoveType,
    pub warehouse_id: WarehouseId,
    pub from_location: Option<LocationId>,
    pub to_location: Option<LocationId>,
    pub product: ProductRef,
    pub tracking: Tracking,
    pub qty: Decimal,
    pub reference: Option<MoveRef>,
    pub occurred_at: DateTime<Utc>,
}

impl StockMove {
    pub fn new(
        company_id: CompanyId,
        kind: MoveType,
        warehouse_id: WarehouseId,
        product: ProductRef,
        tracking: Tracking,
        qty: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MoveId::new(),
            company_id,
            kind,
            warehouse_id,
            from_location: None,
            to_location: None,
            product,
            tracking,
            qty,
            reference: None,
            occurred_at,
        }
    }

    pub fn from_location(mut self, location_id: LocationId) -> Self {
        self.from_location = Some(location_id);
        self
    }

    pub fn to_location(mut self, location_id: LocationId) -> Self {
        self.to_location = Some(location_id);
        self
    }

    pub fn referencing(mut self, reference: MoveRef) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Shape checks that need no reference data: location presence per type,
    /// quantity sign and scale, serial quantities.
    pub fn validate_shape(&self, max_scale: u32) -> DomainResult<()> {
        let kind = self.kind.as_str();
        let (from, to) = self.kind.sides();
        check_side(kind, "from_location", from, self.from_location.is_some())?;
        check_side(kind, "to_location", to, self.to_location.is_some())?;

        if self.from_location.is_some() && self.from_location == self.to_location {
            return Err(DomainError::validation(format!(
                "{kind} move cannot start and end in the same location"
            )));
        }

        ensure_scale(self.qty, max_scale, "move quantity")?;
        if self.kind.is_signed() {
            if self.qty.is_zero() {
                return Err(DomainError::validation("adjustment quantity cannot be zero"));
            }
        } else {
            ensure_positive(self.qty, "move quantity")?;
        }

        if self.tracking.is_serial() && self.qty.abs() != Decimal::ONE {
            return Err(DomainError::validation(format!(
                "serial moves must move exactly one unit, got {}",
                self.qty
            )));
        }
        Ok(())
    }

    pub fn source_key(&self) -> Option<StockKey> {
        self.from_location
            .map(|loc| StockKey::new(loc, self.product, self.tracking))
    }

    pub fn dest_key(&self) -> Option<StockKey> {
        self.to_location
            .map(|loc| StockKey::new(loc, self.product, self.tracking))
    }

    /// Signed on-hand change per touched row, source first.
    pub fn row_deltas(&self) -> Vec<(StockKey, Decimal)> {
        let mut out = Vec::with_capacity(2);
        if let Some(key) = self.source_key() {
            out.push((key, -self.qty));
        }
        if let Some(key) = self.dest_key() {
            out.push((key, self.qty));
        }
        out
    }

    /// Signed on-hand change this move applies to `key` (zero if untouched).
    pub fn delta_for(&self, key: &StockKey) -> Decimal {
        self.row_deltas()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, d)| d)
            .sum()
    }

    pub fn touches(&self, key: &StockKey) -> bool {
        self.source_key().as_ref() == Some(key) || self.dest_key().as_ref() == Some(key)
    }
}

fn check_side(kind: &str, name: &str, side: Side, present: bool) -> DomainResult<()> {
    match (side, present) {
        (Side::Required, false) => Err(DomainError::validation(format!(
            "{kind} move requires {name}"
        ))),
        (Side::Absent, true) => Err(DomainError::validation(format!(
            "{kind} move cannot have {name}"
        ))),
        _ => Ok(()),
    }
}

impl Event for StockMove {
    fn event_type(&self) -> &'static str {
        match self.kind {
            MoveType::Receipt => "stock.move.receipt",
            MoveType::Putaway => "stock.move.putaway",
            MoveType::Pick => "stock.move.pick",
            MoveType::Pack => "stock.move.pack",
            MoveType::Ship => "stock.move.ship",
            MoveType::Adjustment => "stock.move.adjustment",
            MoveType::Transfer => "stock.move.transfer",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl CompanyScoped for StockMove {
    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProductId;
    use rust_decimal_macros::dec;

    fn mv(kind: MoveType, qty: Decimal) -> StockMove {
        StockMove::new(
            CompanyId::new(),
            kind,
            WarehouseId::new(),
            ProductRef::product(ProductId::new()),
            Tracking::Untracked,
            qty,
            Utc::now(),
        )
    }

    #[test]
    fn receipt_requires_only_a_destination() {
        let to = LocationId::new();
        assert!(mv(MoveType::Receipt, dec!(5)).to_location(to).validate_shape(4).is_ok());

        let err = mv(MoveType::Receipt, dec!(5)).validate_shape(4).unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref m) if m.contains("requires to_location")));

        let err = mv(MoveType::Receipt, dec!(5))
            .from_location(LocationId::new())
            .to_location(to)
            .validate_shape(4)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref m) if m.contains("cannot have from_location")));
    }

    #[test]
    fn ship_requires_only_a_source_and_transfer_requires_both() {
        let a = LocationId::new();
        let b = LocationId::new();
        assert!(mv(MoveType::Ship, dec!(1)).from_location(a).validate_shape(4).is_ok());
        assert!(mv(MoveType::Ship, dec!(1)).from_location(a).to_location(b).validate_shape(4).is_err());
        assert!(mv(MoveType::Transfer, dec!(1)).from_location(a).validate_shape(4).is_err());
        assert!(mv(MoveType::Transfer, dec!(1)).from_location(a).to_location(b).validate_shape(4).is_ok());
        assert!(mv(MoveType::Pick, dec!(1)).from_location(a).validate_shape(4).is_ok());
    }

    #[test]
    fn only_adjustments_may_be_negative() {
        let to = LocationId::new();
        assert!(mv(MoveType::Adjustment, dec!(-3)).to_location(to).validate_shape(4).is_ok());
        assert!(mv(MoveType::Adjustment, dec!(0)).to_location(to).validate_shape(4).is_err());
        assert!(mv(MoveType::Receipt, dec!(-3)).to_location(to).validate_shape(4).is_err());
        assert!(mv(MoveType::Receipt, dec!(0)).to_location(to).validate_shape(4).is_err());
    }

    #[test]
    fn quantity_scale_is_bounded() {
        let to = LocationId::new();
        assert!(mv(MoveType::Receipt, dec!(1.25)).to_location(to).validate_shape(2).is_ok());
        assert!(mv(MoveType::Receipt, dec!(1.255)).to_location(to).validate_shape(2).is_err());
    }

    #[test]
    fn serial_moves_carry_one_unit() {
        let to = LocationId::new();
        let mut m = mv(MoveType::Receipt, dec!(2)).to_location(to);
        m.tracking = Tracking::Serial(crate::ids::SerialId::new());
        assert!(m.validate_shape(4).is_err());
        m.qty = dec!(1);
        assert!(m.validate_shape(4).is_ok());
    }

    #[test]
    fn same_source_and_destination_is_rejected() {
        let a = LocationId::new();
        let err = mv(MoveType::Putaway, dec!(1))
            .from_location(a)
            .to_location(a)
            .validate_shape(4)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn row_deltas_follow_move_direction() {
        let a = LocationId::new();
        let b = LocationId::new();
        let m = mv(MoveType::Putaway, dec!(4)).from_location(a).to_location(b);
        let deltas = m.row_deltas();
        assert_eq!(deltas.len(), 2);
        assert_eq!(m.delta_for(&m.source_key().unwrap()), dec!(-4));
        assert_eq!(m.delta_for(&m.dest_key().unwrap()), dec!(4));

        let adj = mv(MoveType::Adjustment, dec!(-3)).to_location(a);
        assert_eq!(adj.delta_for(&adj.dest_key().unwrap()), dec!(-3));
    }

    #[test]
    fn reference_renders_type_and_ids() {
        let receipt_id = ReceiptId::new();
        let item_id = ReceiptItemId::new();
        let r = MoveRef::Receipt { receipt_id, item_id };
        assert_eq!(r.to_string(), format!("receipt:{receipt_id}/{item_id}"));
        assert_eq!(r.ref_type(), "receipt");

        let shipment_id = ShipmentId::new();
        assert_eq!(
            MoveRef::Shipment { shipment_id }.to_string(),
            format!("shipment:{shipment_id}")
        );
    }
}
