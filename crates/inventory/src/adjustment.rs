//! Manual adjustments: explicit signed corrections to on-hand quantity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateRoot, CompanyId, DomainError};
use stockledger_events::Event;

use crate::identity::{ProductRef, Tracking};
use crate::ids::{AdjustmentId, AdjustmentItemId, LocationId, WarehouseId};
use crate::movement::{MoveRef, MoveType, StockMove};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    #[default]
    Draft,
    Posted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentItem {
    pub id: AdjustmentItemId,
    pub location_id: LocationId,
    pub product: ProductRef,
    pub tracking: Tracking,
    pub delta: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Adjustment {
    id: AdjustmentId,
    company_id: Option<CompanyId>,
    warehouse_id: WarehouseId,
    items: Vec<AdjustmentItem>,
    status: AdjustmentStatus,
    version: u64,
    created: bool,
}

impl Adjustment {
    pub fn empty(id: AdjustmentId) -> Self {
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

    pub fn items(&self) -> &[AdjustmentItem] {
        &self.items
    }

    pub fn status(&self) -> AdjustmentStatus {
        self.status
    }
}

impl AggregateRoot for Adjustment {
    type Id = AdjustmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAdjustment {
    pub company_id: CompanyId,
    pub adjustment_id: AdjustmentId,
    pub warehouse_id: WarehouseId,
    pub items: Vec<AdjustmentItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentCommand {
    Create(CreateAdjustment),
    Post {
        company_id: CompanyId,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentEvent {
    Created(CreateAdjustment),
    Posted {
        adjustment_id: AdjustmentId,
        moves: Vec<StockMove>,
        occurred_at: DateTime<Utc>,
    },
}

impl AdjustmentEvent {
    pub fn moves(&self) -> &[StockMove] {
        match self {
            AdjustmentEvent::Posted { moves, .. } => moves,
            AdjustmentEvent::Created(_) => &[],
        }
    }
}

impl Event for AdjustmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AdjustmentEvent::Created(_) => "inventory.adjustment.created",
            AdjustmentEvent::Posted { .. } => "inventory.adjustment.posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AdjustmentEvent::Created(e) => e.occurred_at,
            AdjustmentEvent::Posted { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Adjustment {
    type Command = AdjustmentCommand;
    type Event = AdjustmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AdjustmentEvent::Created(e) => {
                self.id = e.adjustment_id;
                self.company_id = Some(e.company_id);
                self.warehouse_id = e.warehouse_id;
                self.items = e.items.clone();
                self.status = AdjustmentStatus::Draft;
                self.created = true;
            }
            AdjustmentEvent::Posted { .. } => self.status = AdjustmentStatus::Posted,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AdjustmentCommand::Create(cmd) => {
                if self.created {
                    return Err(DomainError::conflict(format!(
                        "adjustment {} already exists",
                        cmd.adjustment_id
                    )));
                }
                if cmd.items.is_empty() {
                    return Err(DomainError::validation("adjustment needs at least one item"));
                }
                if cmd.items.iter().any(|i| i.reason.trim().is_empty()) {
                    return Err(DomainError::validation("every adjustment item needs a reason"));
                }
                Ok(vec![AdjustmentEvent::Created(cmd.clone())])
            }
            AdjustmentCommand::Post {
                company_id,
                occurred_at,
            } => self.handle_post(*company_id, *occurred_at),
        }
    }
}

impl Adjustment {
    fn handle_post(
        &self,
        company_id: CompanyId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<AdjustmentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("adjustment {}", self.id)));
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        if self.status == AdjustmentStatus::Posted {
            return Err(DomainError::conflict(format!(
                "adjustment {} is already posted",
                self.id
            )));
        }

        let moves = self
            .items
            .iter()
            .filter(|i| !i.delta.is_zero())
            .map(|i| {
                StockMove::new(
                    company_id,
                    MoveType::Adjustment,
                    self.warehouse_id,
                    i.product,
                    i.tracking,
                    i.delta,
                    occurred_at,
                )
                .to_location(i.location_id)
                .referencing(MoveRef::Adjustment {
                    adjustment_id: self.id,
                    item_id: i.id,
                })
            })
            .collect();

        Ok(vec![AdjustmentEvent::Posted {
            adjustment_id: self.id,
            moves,
            occurred_at,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProductId;
    use rust_decimal_macros::dec;
    use stockledger_events::execute;

    fn item(delta: Decimal) -> AdjustmentItem {
        AdjustmentItem {
            id: AdjustmentItemId::new(),
            location_id: LocationId::new(),
            product: ProductRef::product(ProductId::new()),
            tracking: Tracking::Untracked,
            delta,
            reason: "damaged".into(),
        }
    }

    #[test]
    fn posting_emits_one_move_per_non_zero_item_and_only_once() {
        let company_id = CompanyId::new();
        let adjustment_id = AdjustmentId::new();
        let mut adj = Adjustment::empty(adjustment_id);
        execute(
            &mut adj,
            &AdjustmentCommand::Create(CreateAdjustment {
                company_id,
                adjustment_id,
                warehouse_id: WarehouseId::new(),
                items: vec![item(dec!(-2)), item(dec!(0)), item(dec!(5))],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let post = AdjustmentCommand::Post {
            company_id,
            occurred_at: Utc::now(),
        };
        let events = execute(&mut adj, &post).unwrap();
        let qtys: Vec<_> = events[0].moves().iter().map(|m| m.qty).collect();
        assert_eq!(qtys, vec![dec!(-2), dec!(5)]);
        assert_eq!(adj.status(), AdjustmentStatus::Posted);

        assert!(matches!(adj.handle(&post).unwrap_err(), DomainError::Conflict(_)));
    }

    #[test]
    fn items_need_a_reason() {
        let adjustment_id = AdjustmentId::new();
        let mut bad = item(dec!(1));
        bad.reason = "  ".into();
        let err = Adjustment::empty(adjustment_id)
            .handle(&AdjustmentCommand::Create(CreateAdjustment {
                company_id: CompanyId::new(),
                adjustment_id,
                warehouse_id: WarehouseId::new(),
                items: vec![bad],
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
