//! Transfer orders: stock leaving one warehouse through a transit location and
//! arriving in another.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::quantity::ensure_positive;
use stockledger_core::{Aggregate, AggregateRoot, CompanyId, DomainError};
use stockledger_events::Event;

use crate::identity::{ProductRef, Tracking};
use crate::ids::{LocationId, TransferOrderId, WarehouseId};
use crate::movement::{MoveRef, MoveType, StockMove};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    #[default]
    Draft,
    InTransit,
    Received,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Draft => "draft",
            TransferStatus::InTransit => "in_transit",
            TransferStatus::Received => "received",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub product: ProductRef,
    pub tracking: Tracking,
    pub qty: Decimal,
}

/// Where a transfer starts, travels through and ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferRoute {
    pub source_warehouse: WarehouseId,
    pub source_location: LocationId,
    pub destination_warehouse: WarehouseId,
    /// Virtual transit location owned by the destination warehouse.
    pub transit_location: LocationId,
    pub destination_location: LocationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferOrder {
    id: TransferOrderId,
    company_id: Option<CompanyId>,
    route: TransferRoute,
    lines: Vec<TransferLine>,
    status: TransferStatus,
    version: u64,
    created: bool,
}

impl TransferOrder {
    pub fn empty(id: TransferOrderId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.company_id
    }

    pub fn route(&self) -> &TransferRoute {
        &self.route
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }
}

impl AggregateRoot for TransferOrder {
    type Id = TransferOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub company_id: CompanyId,
    pub transfer_id: TransferOrderId,
    pub route: TransferRoute,
    pub lines: Vec<TransferLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    Create(CreateTransfer),
    Ship {
        company_id: CompanyId,
        occurred_at: DateTime<Utc>,
    },
    Receive {
        company_id: CompanyId,
        occurred_at: DateTime<Utc>,
    },
    Cancel {
        company_id: CompanyId,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreated {
    pub company_id: CompanyId,
    pub transfer_id: TransferOrderId,
    pub route: TransferRoute,
    pub lines: Vec<TransferLine>,
    pub occurred_at: DateTime<Utc>,
}

/// A status transition, with the transfer moves it posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAdvanced {
    pub transfer_id: TransferOrderId,
    pub status: TransferStatus,
    pub moves: Vec<StockMove>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    Created(TransferCreated),
    Advanced(TransferAdvanced),
}

impl TransferEvent {
    pub fn moves(&self) -> &[StockMove] {
        match self {
            TransferEvent::Advanced(e) => &e.moves,
            TransferEvent::Created(_) => &[],
        }
    }
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::Created(_) => "inventory.transfer.created",
            TransferEvent::Advanced(e) => match e.status {
                TransferStatus::InTransit => "inventory.transfer.shipped",
                TransferStatus::Received => "inventory.transfer.received",
                TransferStatus::Draft | TransferStatus::Cancelled => "inventory.transfer.cancelled",
            },
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::Created(e) => e.occurred_at,
            TransferEvent::Advanced(e) => e.occurred_at,
        }
    }
}

impl Aggregate for TransferOrder {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::Created(e) => {
                self.id = e.transfer_id;
                self.company_id = Some(e.company_id);
                self.route = e.route;
                self.lines = e.lines.clone();
                self.status = TransferStatus::Draft;
                self.created = true;
            }
            TransferEvent::Advanced(e) => self.status = e.status,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::Create(cmd) => self.handle_create(cmd),
            TransferCommand::Ship {
                company_id,
                occurred_at,
            } => self.advance(*company_id, TransferStatus::Draft, TransferStatus::InTransit, *occurred_at),
            TransferCommand::Receive {
                company_id,
                occurred_at,
            } => self.advance(*company_id, TransferStatus::InTransit, TransferStatus::Received, *occurred_at),
            TransferCommand::Cancel {
                company_id,
                occurred_at,
            } => self.advance(*company_id, TransferStatus::Draft, TransferStatus::Cancelled, *occurred_at),
        }
    }
}

impl TransferOrder {
    fn handle_create(&self, cmd: &CreateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "transfer order {} already exists",
                cmd.transfer_id
            )));
        }
        let route = &cmd.route;
        if route.source_warehouse == route.destination_warehouse {
            return Err(DomainError::validation(
                "transfer source and destination warehouse must differ",
            ));
        }
        if route.transit_location == route.source_location
            || route.transit_location == route.destination_location
        {
            return Err(DomainError::validation(
                "transit location must differ from source and destination",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("transfer needs at least one line"));
        }
        for line in &cmd.lines {
            ensure_positive(line.qty, "transfer quantity")?;
        }

        Ok(vec![TransferEvent::Created(TransferCreated {
            company_id: cmd.company_id,
            transfer_id: cmd.transfer_id,
            route: cmd.route,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn advance(
        &self,
        company_id: CompanyId,
        from: TransferStatus,
        to: TransferStatus,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<TransferEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("transfer order {}", self.id)));
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        if self.status != from {
            return Err(DomainError::conflict(format!(
                "transfer order {} is {}, expected {}",
                self.id,
                self.status.as_str(),
                from.as_str()
            )));
        }

        let route = &self.route;
        let legs = match to {
            TransferStatus::InTransit => Some((
                route.source_warehouse,
                route.source_location,
                route.transit_location,
            )),
            // the transit location lives in the destination warehouse
            TransferStatus::Received => Some((
                route.destination_warehouse,
                route.transit_location,
                route.destination_location,
            )),
            TransferStatus::Draft | TransferStatus::Cancelled => None,
        };

        let moves = legs
            .map(|(warehouse_id, from_location, to_location)| {
                self.lines
                    .iter()
                    .map(|line| {
                        StockMove::new(
                            company_id,
                            MoveType::Transfer,
                            warehouse_id,
                            line.product,
                            line.tracking,
                            line.qty,
                            occurred_at,
                        )
                        .from_location(from_location)
                        .to_location(to_location)
                        .referencing(MoveRef::Transfer {
                            transfer_id: self.id,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(vec![TransferEvent::Advanced(TransferAdvanced {
            transfer_id: self.id,
            status: to,
            moves,
            occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProductId;
    use rust_decimal_macros::dec;
    use stockledger_events::execute;

    fn route() -> TransferRoute {
        TransferRoute {
            source_warehouse: WarehouseId::new(),
            source_location: LocationId::new(),
            destination_warehouse: WarehouseId::new(),
            transit_location: LocationId::new(),
            destination_location: LocationId::new(),
        }
    }

    fn created(company_id: CompanyId) -> TransferOrder {
        let transfer_id = TransferOrderId::new();
        let mut t = TransferOrder::empty(transfer_id);
        execute(
            &mut t,
            &TransferCommand::Create(CreateTransfer {
                company_id,
                transfer_id,
                route: route(),
                lines: vec![TransferLine {
                    product: ProductRef::product(ProductId::new()),
                    tracking: Tracking::Untracked,
                    qty: dec!(5),
                }],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        t
    }

    #[test]
    fn ship_then_receive_moves_through_transit() {
        let company_id = CompanyId::new();
        let mut t = created(company_id);
        let route = *t.route();

        let shipped = execute(
            &mut t,
            &TransferCommand::Ship {
                company_id,
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        let out = &shipped[0].moves()[0];
        assert_eq!(out.kind, MoveType::Transfer);
        assert_eq!(out.warehouse_id, route.source_warehouse);
        assert_eq!(out.from_location, Some(route.source_location));
        assert_eq!(out.to_location, Some(route.transit_location));
        assert_eq!(t.status(), TransferStatus::InTransit);

        let received = execute(
            &mut t,
            &TransferCommand::Receive {
                company_id,
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        let inbound = &received[0].moves()[0];
        assert_eq!(inbound.warehouse_id, route.destination_warehouse);
        assert_eq!(inbound.to_location, Some(route.destination_location));
        assert_eq!(t.status(), TransferStatus::Received);
    }

    #[test]
    fn cancel_is_only_allowed_in_draft() {
        let company_id = CompanyId::new();
        let mut t = created(company_id);
        execute(
            &mut t,
            &TransferCommand::Ship {
                company_id,
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        let err = t
            .handle(&TransferCommand::Cancel {
                company_id,
                occurred_at: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn same_warehouse_transfers_are_rejected() {
        let transfer_id = TransferOrderId::new();
        let mut r = route();
        r.destination_warehouse = r.source_warehouse;
        let err = TransferOrder::empty(transfer_id)
            .handle(&TransferCommand::Create(CreateTransfer {
                company_id: CompanyId::new(),
                transfer_id,
                route: r,
                lines: vec![],
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
