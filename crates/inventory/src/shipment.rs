//! Shipments: picked quantity packed into packages and shipped for one order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateRoot, CompanyId, DomainError, DomainResult};
use stockledger_events::Event;

use crate::identity::{ProductRef, Tracking};
use crate::ids::{
    LocationId, OrderId, PackageId, PickTaskId, PickWaveId, ReservationId, ShipmentId, WarehouseId,
};
use crate::movement::{MoveRef, MoveType, StockMove};
use crate::picking::{PickTask, PickTaskStatus};
use crate::reservation::ReservationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    #[default]
    Packing,
    Shipped,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ShipmentStatus::Packing => "packing",
            ShipmentStatus::Shipped => "shipped",
            ShipmentStatus::Cancelled => "cancelled",
        }
    }
}

/// Picked quantity of one pick task, waiting in a staging location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentLine {
    pub wave_id: PickWaveId,
    pub task_id: PickTaskId,
    pub reservation_id: ReservationId,
    pub product: ProductRef,
    pub tracking: Tracking,
    pub staging_location: LocationId,
    pub qty: Decimal,
    pub package_id: Option<PackageId>,
}

impl ShipmentLine {
    /// Only done tasks that dropped their stock in a staging location can ship.
    pub fn from_task(wave_id: PickWaveId, task: &PickTask) -> DomainResult<Self> {
        if task.status != PickTaskStatus::Done {
            return Err(DomainError::validation(format!(
                "pick task {} is {}",
                task.id,
                task.status.as_str()
            )));
        }
        let staging_location = task.to_location.ok_or_else(|| {
            DomainError::validation(format!("pick task {} has no staging location", task.id))
        })?;
        Ok(Self {
            wave_id,
            task_id: task.id,
            reservation_id: task.reservation_id,
            product: task.product,
            tracking: task.tracking,
            staging_location,
            qty: task.qty,
            package_id: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Shipment {
    id: ShipmentId,
    company_id: Option<CompanyId>,
    warehouse_id: WarehouseId,
    order_id: OrderId,
    outbound_location: LocationId,
    lines: Vec<ShipmentLine>,
    packages: Vec<Package>,
    status: ShipmentStatus,
    version: u64,
    created: bool,
}

impl Shipment {
    pub fn empty(id: ShipmentId) -> Self {
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

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn outbound_location(&self) -> LocationId {
        self.outbound_location
    }

    pub fn lines(&self) -> &[ShipmentLine] {
        &self.lines
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn status(&self) -> ShipmentStatus {
        self.status
    }
}

impl AggregateRoot for Shipment {
    type Id = ShipmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateShipment {
    pub company_id: CompanyId,
    pub shipment_id: ShipmentId,
    pub warehouse_id: WarehouseId,
    pub order_id: OrderId,
    pub outbound_location: LocationId,
    pub lines: Vec<ShipmentLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPackage {
    pub company_id: CompanyId,
    pub package_id: PackageId,
    pub label: String,
    pub task_ids: Vec<PickTaskId>,
    pub occurred_at: DateTime<Utc>,
}

/// Current state of the tasks and reservations behind the shipment lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipShipment {
    pub company_id: CompanyId,
    pub task_status: BTreeMap<PickTaskId, PickTaskStatus>,
    pub reservation_status: BTreeMap<ReservationId, ReservationStatus>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelShipment {
    pub company_id: CompanyId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentCommand {
    Create(CreateShipment),
    AddPackage(AddPackage),
    Ship(ShipShipment),
    Cancel(CancelShipment),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCreated {
    pub company_id: CompanyId,
    pub shipment_id: ShipmentId,
    pub warehouse_id: WarehouseId,
    pub order_id: OrderId,
    pub outbound_location: LocationId,
    pub lines: Vec<ShipmentLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAdded {
    pub shipment_id: ShipmentId,
    pub package: Package,
    pub task_ids: Vec<PickTaskId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentShipped {
    pub shipment_id: ShipmentId,
    /// One `pack` and one `ship` move per line.
    pub moves: Vec<StockMove>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCancelled {
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentEvent {
    Created(ShipmentCreated),
    PackageAdded(PackageAdded),
    Shipped(ShipmentShipped),
    Cancelled(ShipmentCancelled),
}

impl ShipmentEvent {
    pub fn moves(&self) -> &[StockMove] {
        match self {
            ShipmentEvent::Shipped(e) => &e.moves,
            _ => &[],
        }
    }
}

impl Event for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::Created(_) => "inventory.shipment.created",
            ShipmentEvent::PackageAdded(_) => "inventory.shipment.package_added",
            ShipmentEvent::Shipped(_) => "inventory.shipment.shipped",
            ShipmentEvent::Cancelled(_) => "inventory.shipment.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ShipmentEvent::Created(e) => e.occurred_at,
            ShipmentEvent::PackageAdded(e) => e.occurred_at,
            ShipmentEvent::Shipped(e) => e.occurred_at,
            ShipmentEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Shipment {
    type Command = ShipmentCommand;
    type Event = ShipmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ShipmentEvent::Created(e) => {
                self.id = e.shipment_id;
                self.company_id = Some(e.company_id);
                self.warehouse_id = e.warehouse_id;
                self.order_id = e.order_id;
                self.outbound_location = e.outbound_location;
                self.lines = e.lines.clone();
                self.status = ShipmentStatus::Packing;
                self.created = true;
            }
            ShipmentEvent::PackageAdded(e) => {
                for line in self
                    .lines
                    .iter_mut()
                    .filter(|l| e.task_ids.contains(&l.task_id))
                {
                    line.package_id = Some(e.package.id);
                }
                self.packages.push(e.package.clone());
            }
            ShipmentEvent::Shipped(_) => self.status = ShipmentStatus::Shipped,
            ShipmentEvent::Cancelled(_) => self.status = ShipmentStatus::Cancelled,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ShipmentCommand::Create(cmd) => self.handle_create(cmd),
            ShipmentCommand::AddPackage(cmd) => self.handle_add_package(cmd),
            ShipmentCommand::Ship(cmd) => self.handle_ship(cmd),
            ShipmentCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Shipment {
    fn ensure_packing(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("shipment {}", self.id)));
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        if self.status != ShipmentStatus::Packing {
            return Err(DomainError::conflict(format!(
                "shipment {} is {}",
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "shipment {} already exists",
                cmd.shipment_id
            )));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("shipment needs at least one picked task"));
        }
        let mut tasks: Vec<_> = cmd.lines.iter().map(|l| l.task_id).collect();
        tasks.sort();
        tasks.dedup();
        if tasks.len() != cmd.lines.len() {
            return Err(DomainError::validation("pick task listed twice"));
        }

        Ok(vec![ShipmentEvent::Created(ShipmentCreated {
            company_id: cmd.company_id,
            shipment_id: cmd.shipment_id,
            warehouse_id: cmd.warehouse_id,
            order_id: cmd.order_id,
            outbound_location: cmd.outbound_location,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_package(&self, cmd: &AddPackage) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_packing(cmd.company_id)?;
        if cmd.task_ids.is_empty() {
            return Err(DomainError::validation("package must contain at least one line"));
        }
        if self.packages.iter().any(|p| p.id == cmd.package_id) {
            return Err(DomainError::conflict(format!(
                "package {} already exists",
                cmd.package_id
            )));
        }
        for task_id in &cmd.task_ids {
            let line = self
                .lines
                .iter()
                .find(|l| l.task_id == *task_id)
                .ok_or_else(|| DomainError::not_found(format!("shipment line for task {task_id}")))?;
            if let Some(existing) = line.package_id {
                return Err(DomainError::conflict(format!(
                    "task {task_id} is already packed in package {existing}"
                )));
            }
        }

        Ok(vec![ShipmentEvent::PackageAdded(PackageAdded {
            shipment_id: self.id,
            package: Package {
                id: cmd.package_id,
                label: cmd.label.trim().to_string(),
            },
            task_ids: cmd.task_ids.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &ShipShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_packing(cmd.company_id)?;

        for line in &self.lines {
            match cmd.task_status.get(&line.task_id) {
                Some(PickTaskStatus::Done) => {}
                Some(other) => {
                    return Err(DomainError::validation(format!(
                        "pick task {} is {}",
                        line.task_id,
                        other.as_str()
                    )));
                }
                None => {
                    return Err(DomainError::validation(format!(
                        "pick task {} is unknown",
                        line.task_id
                    )));
                }
            }
            if cmd.reservation_status.get(&line.reservation_id) != Some(&ReservationStatus::Fulfilled) {
                return Err(DomainError::validation(format!(
                    "reservation {} is not fulfilled",
                    line.reservation_id
                )));
            }
        }

        let reference = MoveRef::Shipment {
            shipment_id: self.id,
        };
        let mut moves = Vec::with_capacity(self.lines.len() * 2);
        for line in &self.lines {
            let base = |kind| {
                StockMove::new(
                    cmd.company_id,
                    kind,
                    self.warehouse_id,
                    line.product,
                    line.tracking,
                    line.qty,
                    cmd.occurred_at,
                )
                .referencing(reference)
            };
            moves.push(
                base(MoveType::Pack)
                    .from_location(line.staging_location)
                    .to_location(self.outbound_location),
            );
            moves.push(base(MoveType::Ship).from_location(self.outbound_location));
        }

        Ok(vec![ShipmentEvent::Shipped(ShipmentShipped {
            shipment_id: self.id,
            moves,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_packing(cmd.company_id)?;
        Ok(vec![ShipmentEvent::Cancelled(ShipmentCancelled {
            shipment_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
