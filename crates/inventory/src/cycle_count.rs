//! Cycle counts: physical counts reconciled against the projection at posting
//! time.
//!
//! The variance depends on the on-hand quantity at the moment of posting, so
//! posting happens in two steps: `Post` emits the [`CountLine`]s the ledger
//! evaluates under the row lock, then `RecordVariances` stores what it found.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::quantity::ensure_non_negative;
use stockledger_core::{Aggregate, AggregateRoot, CompanyId, DomainError, DomainResult};
use stockledger_events::{CompanyScoped, Event};

use crate::identity::{ProductRef, StockKey, Tracking};
use crate::ids::{CountItemId, CycleCountId, LocationId, MoveId, WarehouseId};
use crate::movement::{MoveRef, MoveType, StockMove};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleCountStatus {
    #[default]
    Draft,
    Posted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountItem {
    pub id: CountItemId,
    pub location_id: LocationId,
    pub product: ProductRef,
    pub tracking: Tracking,
    pub qty_counted: Decimal,
    pub qty_on_hand_at_post: Option<Decimal>,
    pub variance: Option<Decimal>,
    pub move_id: Option<MoveId>,
}

impl CountItem {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.location_id, self.product, self.tracking)
    }
}

/// One counted row, evaluated by the ledger against the locked projection row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLine {
    pub company_id: CompanyId,
    pub warehouse_id: WarehouseId,
    pub item_id: CountItemId,
    pub key: StockKey,
    pub qty_counted: Decimal,
    pub reference: MoveRef,
    pub occurred_at: DateTime<Utc>,
}

impl CompanyScoped for CountLine {
    fn company_id(&self) -> CompanyId {
        self.company_id
    }
}

impl CountLine {
    /// The `counted - on_hand` adjustment, or `None` when the count matches.
    ///
    /// Counting fewer units than are reserved cannot be reconciled by an
    /// adjustment and is an invariant violation.
    pub fn adjustment_for(&self, on_hand: Decimal, reserved: Decimal) -> DomainResult<Option<StockMove>> {
        if self.qty_counted < reserved {
            return Err(DomainError::invariant(format!(
                "counted {} at location {} is below the {} reserved there",
                self.qty_counted, self.key.location_id, reserved
            )));
        }
        let variance = self.qty_counted - on_hand;
        if variance.is_zero() {
            return Ok(None);
        }
        Ok(Some(
            StockMove::new(
                self.company_id,
                MoveType::Adjustment,
                self.warehouse_id,
                self.key.product,
                self.key.tracking,
                variance,
                self.occurred_at,
            )
            .to_location(self.key.location_id)
            .referencing(self.reference),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountVariance {
    pub item_id: CountItemId,
    pub on_hand_before: Decimal,
    pub variance: Decimal,
    pub move_id: Option<MoveId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CycleCount {
    id: CycleCountId,
    company_id: Option<CompanyId>,
    warehouse_id: WarehouseId,
    items: Vec<CountItem>,
    status: CycleCountStatus,
    version: u64,
    created: bool,
}

impl CycleCount {
    pub fn empty(id: CycleCountId) -> Self {
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

    pub fn items(&self) -> &[CountItem] {
        &self.items
    }

    pub fn status(&self) -> CycleCountStatus {
        self.status
    }

    fn variances_recorded(&self) -> bool {
        self.items.iter().all(|i| i.variance.is_some())
    }
}

impl AggregateRoot for CycleCount {
    type Id = CycleCountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCountItem {
    pub item_id: CountItemId,
    pub location_id: LocationId,
    pub product: ProductRef,
    pub tracking: Tracking,
    pub qty_counted: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCycleCount {
    pub company_id: CompanyId,
    pub count_id: CycleCountId,
    pub warehouse_id: WarehouseId,
    pub items: Vec<NewCountItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleCountCommand {
    Create(CreateCycleCount),
    Post {
        company_id: CompanyId,
        occurred_at: DateTime<Utc>,
    },
    RecordVariances {
        company_id: CompanyId,
        variances: Vec<CountVariance>,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleCountEvent {
    Created(CreateCycleCount),
    Posted {
        count_id: CycleCountId,
        lines: Vec<CountLine>,
        occurred_at: DateTime<Utc>,
    },
    VariancesRecorded {
        count_id: CycleCountId,
        variances: Vec<CountVariance>,
        occurred_at: DateTime<Utc>,
    },
}

impl CycleCountEvent {
    pub fn count_lines(&self) -> &[CountLine] {
        match self {
            CycleCountEvent::Posted { lines, .. } => lines,
            _ => &[],
        }
    }
}

impl Event for CycleCountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CycleCountEvent::Created(_) => "inventory.cycle_count.created",
            CycleCountEvent::Posted { .. } => "inventory.cycle_count.posted",
            CycleCountEvent::VariancesRecorded { .. } => "inventory.cycle_count.variances_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CycleCountEvent::Created(e) => e.occurred_at,
            CycleCountEvent::Posted { occurred_at, .. } => *occurred_at,
            CycleCountEvent::VariancesRecorded { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for CycleCount {
    type Command = CycleCountCommand;
    type Event = CycleCountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CycleCountEvent::Created(e) => {
                self.id = e.count_id;
                self.company_id = Some(e.company_id);
                self.warehouse_id = e.warehouse_id;
                self.items = e
                    .items
                    .iter()
                    .map(|i| CountItem {
                        id: i.item_id,
                        location_id: i.location_id,
                        product: i.product,
                        tracking: i.tracking,
                        qty_counted: i.qty_counted,
                        qty_on_hand_at_post: None,
                        variance: None,
                        move_id: None,
                    })
                    .collect();
                self.status = CycleCountStatus::Draft;
                self.created = true;
            }
            CycleCountEvent::Posted { .. } => self.status = CycleCountStatus::Posted,
            CycleCountEvent::VariancesRecorded { variances, .. } => {
                for v in variances {
                    if let Some(item) = self.items.iter_mut().find(|i| i.id == v.item_id) {
                        item.qty_on_hand_at_post = Some(v.on_hand_before);
                        item.variance = Some(v.variance);
                        item.move_id = v.move_id;
                    }
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CycleCountCommand::Create(cmd) => self.handle_create(cmd),
            CycleCountCommand::Post {
                company_id,
                occurred_at,
            } => self.handle_post(*company_id, *occurred_at),
            CycleCountCommand::RecordVariances {
                company_id,
                variances,
                occurred_at,
            } => self.handle_record(*company_id, variances, *occurred_at),
        }
    }
}

impl CycleCount {
    fn ensure_company(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("cycle count {}", self.id)));
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateCycleCount) -> Result<Vec<CycleCountEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "cycle count {} already exists",
                cmd.count_id
            )));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("cycle count needs at least one item"));
        }
        let mut keys = BTreeSet::new();
        for item in &cmd.items {
            ensure_non_negative(item.qty_counted, "counted quantity")?;
            if !keys.insert(StockKey::new(item.location_id, item.product, item.tracking)) {
                return Err(DomainError::validation("the same stock row is counted twice"));
            }
        }
        Ok(vec![CycleCountEvent::Created(cmd.clone())])
    }

    fn handle_post(
        &self,
        company_id: CompanyId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<CycleCountEvent>, DomainError> {
        self.ensure_company(company_id)?;
        if self.status == CycleCountStatus::Posted {
            return Err(DomainError::conflict(format!(
                "cycle count {} is already posted",
                self.id
            )));
        }

        let lines = self
            .items
            .iter()
            .map(|i| CountLine {
                company_id,
                warehouse_id: self.warehouse_id,
                item_id: i.id,
                key: i.key(),
                qty_counted: i.qty_counted,
                reference: MoveRef::CycleCount {
                    count_id: self.id,
                    item_id: i.id,
                },
                occurred_at,
            })
            .collect();

        Ok(vec![CycleCountEvent::Posted {
            count_id: self.id,
            lines,
            occurred_at,
        }])
    }

    fn handle_record(
        &self,
        company_id: CompanyId,
        variances: &[CountVariance],
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<CycleCountEvent>, DomainError> {
        self.ensure_company(company_id)?;
        if self.status != CycleCountStatus::Posted || self.variances_recorded() {
            return Err(DomainError::conflict(format!(
                "cycle count {} is not awaiting variances",
                self.id
            )));
        }
        let reported: BTreeSet<_> = variances.iter().map(|v| v.item_id).collect();
        let expected: BTreeSet<_> = self.items.iter().map(|i| i.id).collect();
        if reported != expected || variances.len() != expected.len() {
            return Err(DomainError::validation(
                "variances must cover every count item exactly once",
            ));
        }

        Ok(vec![CycleCountEvent::VariancesRecorded {
            count_id: self.id,
            variances: variances.to_vec(),
            occurred_at,
        }])
    }
}
