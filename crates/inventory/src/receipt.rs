//! Receipt aggregate: inbound goods, received into an inbound location and then
//! put away into storage.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::quantity::ensure_positive;
use stockledger_core::{Aggregate, AggregateRoot, CompanyId, DomainError};
use stockledger_events::Event;

use crate::identity::{ProductRef, Tracking};
use crate::ids::{LocationId, ReceiptId, ReceiptItemId, WarehouseId};
use crate::movement::{MoveRef, MoveType, StockMove};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    #[default]
    Draft,
    Received,
    Putaway,
}

impl ReceiptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReceiptStatus::Draft => "draft",
            ReceiptStatus::Received => "received",
            ReceiptStatus::Putaway => "putaway",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptItemStatus {
    Expected,
    PartiallyReceived,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub id: ReceiptItemId,
    pub product: ProductRef,
    pub tracking: Tracking,
    pub qty_expected: Decimal,
    pub qty_received: Decimal,
    pub qty_put_away: Decimal,
}

impl ReceiptItem {
    pub fn status(&self) -> ReceiptItemStatus {
        if self.qty_received >= self.qty_expected {
            ReceiptItemStatus::Received
        } else if self.qty_received > Decimal::ZERO {
            ReceiptItemStatus::PartiallyReceived
        } else {
            ReceiptItemStatus::Expected
        }
    }

    /// Received but still sitting in the inbound location.
    pub fn awaiting_putaway(&self) -> Decimal {
        self.qty_received - self.qty_put_away
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Receipt {
    id: ReceiptId,
    company_id: Option<CompanyId>,
    warehouse_id: WarehouseId,
    inbound_location: LocationId,
    items: Vec<ReceiptItem>,
    status: ReceiptStatus,
    version: u64,
    created: bool,
}

impl Receipt {
    pub fn empty(id: ReceiptId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.company_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn inbound_location(&self) -> LocationId {
        self.inbound_location
    }

    pub fn items(&self) -> &[ReceiptItem] {
        &self.items
    }

    pub fn item(&self, item_id: ReceiptItemId) -> Option<&ReceiptItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn status(&self) -> ReceiptStatus {
        self.status
    }
}

impl AggregateRoot for Receipt {
    type Id = ReceiptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReceiptItem {
    pub item_id: ReceiptItemId,
    pub product: ProductRef,
    pub tracking: Tracking,
    pub qty_expected: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReceipt {
    pub company_id: CompanyId,
    pub receipt_id: ReceiptId,
    pub warehouse_id: WarehouseId,
    pub inbound_location: LocationId,
    pub items: Vec<NewReceiptItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveQty {
    pub company_id: CompanyId,
    pub item_id: ReceiptItemId,
    pub qty: Decimal,
    pub allow_over_receipt: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Relocate received stock; `qty: None` moves everything awaiting putaway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutAwayQty {
    pub company_id: CompanyId,
    pub item_id: ReceiptItemId,
    pub to_location: LocationId,
    pub qty: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptCommand {
    Create(CreateReceipt),
    Receive(ReceiveQty),
    PutAway(PutAwayQty),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptCreated {
    pub company_id: CompanyId,
    pub receipt_id: ReceiptId,
    pub warehouse_id: WarehouseId,
    pub inbound_location: LocationId,
    pub items: Vec<NewReceiptItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QtyReceived {
    pub receipt_id: ReceiptId,
    pub item_id: ReceiptItemId,
    pub stock_move: StockMove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QtyPutAway {
    pub receipt_id: ReceiptId,
    pub item_id: ReceiptItemId,
    pub stock_move: StockMove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptStatusChanged {
    pub receipt_id: ReceiptId,
    pub status: ReceiptStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptEvent {
    Created(ReceiptCreated),
    QtyReceived(QtyReceived),
    QtyPutAway(QtyPutAway),
    StatusChanged(ReceiptStatusChanged),
}

impl ReceiptEvent {
    pub fn stock_move(&self) -> Option<&StockMove> {
        match self {
            ReceiptEvent::QtyReceived(e) => Some(&e.stock_move),
            ReceiptEvent::QtyPutAway(e) => Some(&e.stock_move),
            ReceiptEvent::Created(_) | ReceiptEvent::StatusChanged(_) => None,
        }
    }
}

impl Event for ReceiptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReceiptEvent::Created(_) => "inventory.receipt.created",
            ReceiptEvent::QtyReceived(_) => "inventory.receipt.qty_received",
            ReceiptEvent::QtyPutAway(_) => "inventory.receipt.qty_put_away",
            ReceiptEvent::StatusChanged(_) => "inventory.receipt.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReceiptEvent::Created(e) => e.occurred_at,
            ReceiptEvent::QtyReceived(e) => e.stock_move.occurred_at,
            ReceiptEvent::QtyPutAway(e) => e.stock_move.occurred_at,
            ReceiptEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Receipt {
    type Command = ReceiptCommand;
    type Event = ReceiptEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReceiptEvent::Created(e) => {
                self.id = e.receipt_id;
                self.company_id = Some(e.company_id);
                self.warehouse_id = e.warehouse_id;
                self.inbound_location = e.inbound_location;
                self.items = e
                    .items
                    .iter()
                    .map(|i| ReceiptItem {
                        id: i.item_id,
                        product: i.product,
                        tracking: i.tracking,
                        qty_expected: i.qty_expected,
                        qty_received: Decimal::ZERO,
                        qty_put_away: Decimal::ZERO,
                    })
                    .collect();
                self.status = ReceiptStatus::Draft;
                self.created = true;
            }
            ReceiptEvent::QtyReceived(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == e.item_id) {
                    item.qty_received += e.stock_move.qty;
                }
            }
            ReceiptEvent::QtyPutAway(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == e.item_id) {
                    item.qty_put_away += e.stock_move.qty;
                }
            }
            ReceiptEvent::StatusChanged(e) => {
                self.status = e.status;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReceiptCommand::Create(cmd) => self.handle_create(cmd),
            ReceiptCommand::Receive(cmd) => self.handle_receive(cmd),
            ReceiptCommand::PutAway(cmd) => self.handle_put_away(cmd),
        }
    }
}

impl Receipt {
    fn ensure_company(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("receipt {}", self.id)));
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        Ok(())
    }

    fn find_item(&self, item_id: ReceiptItemId) -> Result<&ReceiptItem, DomainError> {
        self.item(item_id)
            .ok_or_else(|| DomainError::not_found(format!("receipt item {item_id}")))
    }

    fn handle_create(&self, cmd: &CreateReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "receipt {} already exists",
                cmd.receipt_id
            )));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("receipt needs at least one item"));
        }
        for item in &cmd.items {
            ensure_positive(item.qty_expected, "expected quantity")?;
        }
        let mut ids: Vec<_> = cmd.items.iter().map(|i| i.item_id).collect();
        ids.sort();
        ids.dedup();
        if ids.len() != cmd.items.len() {
            return Err(DomainError::validation("duplicate receipt item id"));
        }

        Ok(vec![ReceiptEvent::Created(ReceiptCreated {
            company_id: cmd.company_id,
            receipt_id: cmd.receipt_id,
            warehouse_id: cmd.warehouse_id,
            inbound_location: cmd.inbound_location,
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveQty) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_company(cmd.company_id)?;
        if self.status == ReceiptStatus::Putaway {
            return Err(DomainError::conflict(format!(
                "receipt {} is already put away",
                self.id
            )));
        }
        let item = self.find_item(cmd.item_id)?;
        ensure_positive(cmd.qty, "received quantity")?;

        let received = item.qty_received + cmd.qty;
        if received > item.qty_expected && !cmd.allow_over_receipt {
            return Err(DomainError::validation(format!(
                "receiving {} would exceed expected {} (already received {})",
                cmd.qty, item.qty_expected, item.qty_received
            )));
        }

        let stock_move = StockMove::new(
            cmd.company_id,
            MoveType::Receipt,
            self.warehouse_id,
            item.product,
            item.tracking,
            cmd.qty,
            cmd.occurred_at,
        )
        .to_location(self.inbound_location)
        .referencing(MoveRef::Receipt {
            receipt_id: self.id,
            item_id: item.id,
        });

        let mut events = vec![ReceiptEvent::QtyReceived(QtyReceived {
            receipt_id: self.id,
            item_id: item.id,
            stock_move,
        })];

        let all_received = self.items.iter().all(|i| {
            let got = if i.id == item.id { received } else { i.qty_received };
            got >= i.qty_expected
        });
        if self.status == ReceiptStatus::Draft && all_received {
            events.push(ReceiptEvent::StatusChanged(ReceiptStatusChanged {
                receipt_id: self.id,
                status: ReceiptStatus::Received,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_put_away(&self, cmd: &PutAwayQty) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_company(cmd.company_id)?;
        let item = self.find_item(cmd.item_id)?;

        let awaiting = item.awaiting_putaway();
        let qty = cmd.qty.unwrap_or(awaiting);
        if awaiting <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "receipt item {} has nothing awaiting putaway",
                item.id
            )));
        }
        ensure_positive(qty, "putaway quantity")?;
        if qty > awaiting {
            return Err(DomainError::validation(format!(
                "putaway {qty} exceeds the {awaiting} awaiting putaway"
            )));
        }

        let stock_move = StockMove::new(
            cmd.company_id,
            MoveType::Putaway,
            self.warehouse_id,
            item.product,
            item.tracking,
            qty,
            cmd.occurred_at,
        )
        .from_location(self.inbound_location)
        .to_location(cmd.to_location)
        .referencing(MoveRef::Receipt {
            receipt_id: self.id,
            item_id: item.id,
        });

        let mut events = vec![ReceiptEvent::QtyPutAway(QtyPutAway {
            receipt_id: self.id,
            item_id: item.id,
            stock_move,
        })];

        let all_put_away = self.items.iter().all(|i| {
            let put = if i.id == item.id {
                i.qty_put_away + qty
            } else {
                i.qty_put_away
            };
            put >= i.qty_received
        });
        if self.status == ReceiptStatus::Received && all_put_away {
            events.push(ReceiptEvent::StatusChanged(ReceiptStatusChanged {
                receipt_id: self.id,
                status: ReceiptStatus::Putaway,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProductId;
    use rust_decimal_macros::dec;
    use stockledger_events::execute;

    struct Fixture {
        company_id: CompanyId,
        receipt: Receipt,
        item_id: ReceiptItemId,
        inbound: LocationId,
    }

    fn fixture(expected: Decimal) -> Fixture {
        let company_id = CompanyId::new();
        let receipt_id = ReceiptId::new();
        let item_id = ReceiptItemId::new();
        let inbound = LocationId::new();
        let mut receipt = Receipt::empty(receipt_id);
        execute(
            &mut receipt,
            &ReceiptCommand::Create(CreateReceipt {
                company_id,
                receipt_id,
                warehouse_id: WarehouseId::new(),
                inbound_location: inbound,
                items: vec![NewReceiptItem {
                    item_id,
                    product: ProductRef::product(ProductId::new()),
                    tracking: Tracking::Untracked,
                    qty_expected: expected,
                }],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        Fixture {
            company_id,
            receipt,
            item_id,
            inbound,
        }
    }

    fn receive(f: &Fixture, qty: Decimal) -> ReceiptCommand {
        ReceiptCommand::Receive(ReceiveQty {
            company_id: f.company_id,
            item_id: f.item_id,
            qty,
            allow_over_receipt: false,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn partial_receipts_accumulate_until_expected() {
        let mut f = fixture(dec!(20));
        let cmd = receive(&f, dec!(12));
        let events = execute(&mut f.receipt, &cmd).unwrap();
        assert_eq!(events.len(), 1);
        let mv = events[0].stock_move().unwrap();
        assert_eq!(mv.kind, MoveType::Receipt);
        assert_eq!(mv.to_location, Some(f.inbound));
        assert_eq!(
            f.receipt.item(f.item_id).unwrap().status(),
            ReceiptItemStatus::PartiallyReceived
        );

        let cmd = receive(&f, dec!(8));
        let events = execute(&mut f.receipt, &cmd).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(f.receipt.status(), ReceiptStatus::Received);
        assert_eq!(f.receipt.item(f.item_id).unwrap().qty_received, dec!(20));

        let err = f.receipt.handle(&receive(&f, dec!(1))).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn over_receipt_needs_explicit_permission() {
        let f = fixture(dec!(5));
        let cmd = ReceiptCommand::Receive(ReceiveQty {
            company_id: f.company_id,
            item_id: f.item_id,
            qty: dec!(6),
            allow_over_receipt: true,
            occurred_at: Utc::now(),
        });
        assert!(f.receipt.handle(&cmd).is_ok());
        assert!(f.receipt.handle(&receive(&f, dec!(6))).is_err());
    }

    #[test]
    fn putaway_defaults_to_everything_awaiting() {
        let mut f = fixture(dec!(10));
        let cmd = receive(&f, dec!(10));
        execute(&mut f.receipt, &cmd).unwrap();

        let pick_face = LocationId::new();
        let partial = ReceiptCommand::PutAway(PutAwayQty {
            company_id: f.company_id,
            item_id: f.item_id,
            to_location: pick_face,
            qty: Some(dec!(4)),
            occurred_at: Utc::now(),
        });
        execute(&mut f.receipt, &partial).unwrap();
        assert_eq!(f.receipt.status(), ReceiptStatus::Received);

        let rest = ReceiptCommand::PutAway(PutAwayQty {
            company_id: f.company_id,
            item_id: f.item_id,
            to_location: pick_face,
            qty: None,
            occurred_at: Utc::now(),
        });
        let events = execute(&mut f.receipt, &rest).unwrap();
        let mv = events[0].stock_move().unwrap();
        assert_eq!(mv.qty, dec!(6));
        assert_eq!(mv.from_location, Some(f.inbound));
        assert_eq!(f.receipt.status(), ReceiptStatus::Putaway);

        assert!(f.receipt.handle(&rest).is_err());
    }

    #[test]
    fn putaway_before_full_receipt_keeps_draft() {
        let mut f = fixture(dec!(10));
        let cmd = receive(&f, dec!(3));
        execute(&mut f.receipt, &cmd).unwrap();
        let cmd = ReceiptCommand::PutAway(PutAwayQty {
            company_id: f.company_id,
            item_id: f.item_id,
            to_location: LocationId::new(),
            qty: None,
            occurred_at: Utc::now(),
        });
        execute(&mut f.receipt, &cmd).unwrap();
        assert_eq!(f.receipt.status(), ReceiptStatus::Draft);
    }
}
