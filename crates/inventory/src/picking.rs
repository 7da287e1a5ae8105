//! Pick waves: batches of pick tasks, each bound to one reservation line.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateRoot, CompanyId, DomainError};
use stockledger_events::Event;

use crate::allocation::AllocationLine;
use crate::identity::{ProductRef, StockKey, Tracking};
use crate::ids::{LocationId, OrderId, PickTaskId, PickWaveId, ReservationId, WarehouseId};
use crate::movement::{MoveRef, MoveType, StockMove};
use crate::reservation::Reservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickWaveStatus {
    #[default]
    Open,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickTaskStatus {
    New,
    Done,
    Cancelled,
}

impl PickTaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PickTaskStatus::New => "new",
            PickTaskStatus::Done => "done",
            PickTaskStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickTask {
    pub id: PickTaskId,
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub product: ProductRef,
    pub tracking: Tracking,
    pub from_location: LocationId,
    pub to_location: Option<LocationId>,
    pub qty: Decimal,
    pub status: PickTaskStatus,
}

impl PickTask {
    /// The reserved row this task picks from.
    pub fn line(&self) -> AllocationLine {
        AllocationLine {
            key: StockKey::new(self.from_location, self.product, self.tracking),
            qty: self.qty,
        }
    }
}

/// One task per outstanding allocation line of each active reservation.
pub fn plan_tasks(reservations: &[Reservation], to_location: Option<LocationId>) -> Vec<PickTask> {
    reservations
        .iter()
        .filter(|r| r.is_active())
        .flat_map(|r| {
            r.outstanding_lines().into_iter().map(move |line| PickTask {
                id: PickTaskId::new(),
                reservation_id: *r.id(),
                order_id: r.order_id(),
                product: line.key.product,
                tracking: line.key.tracking,
                from_location: line.key.location_id,
                to_location,
                qty: line.qty,
                status: PickTaskStatus::New,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PickWave {
    id: PickWaveId,
    company_id: Option<CompanyId>,
    warehouse_id: WarehouseId,
    tasks: Vec<PickTask>,
    status: PickWaveStatus,
    version: u64,
    created: bool,
}

impl PickWave {
    pub fn empty(id: PickWaveId) -> Self {
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

    pub fn tasks(&self) -> &[PickTask] {
        &self.tasks
    }

    pub fn task(&self, task_id: PickTaskId) -> Option<&PickTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn status(&self) -> PickWaveStatus {
        self.status
    }
}

impl AggregateRoot for PickWave {
    type Id = PickWaveId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanWave {
    pub company_id: CompanyId,
    pub wave_id: PickWaveId,
    pub warehouse_id: WarehouseId,
    pub tasks: Vec<PickTask>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteTask {
    pub company_id: CompanyId,
    pub task_id: PickTaskId,
    pub qty: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTask {
    pub company_id: CompanyId,
    pub task_id: PickTaskId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelWave {
    pub company_id: CompanyId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickWaveCommand {
    Plan(PlanWave),
    CompleteTask(CompleteTask),
    CancelTask(CancelTask),
    Cancel(CancelWave),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavePlanned {
    pub company_id: CompanyId,
    pub wave_id: PickWaveId,
    pub warehouse_id: WarehouseId,
    pub tasks: Vec<PickTask>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub wave_id: PickWaveId,
    pub task_id: PickTaskId,
    pub reservation_id: ReservationId,
    pub stock_move: StockMove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCancelled {
    pub wave_id: PickWaveId,
    pub task_id: PickTaskId,
    pub reservation_id: ReservationId,
    pub line: AllocationLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveClosed {
    pub wave_id: PickWaveId,
    pub status: PickWaveStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickWaveEvent {
    Planned(WavePlanned),
    TaskCompleted(TaskCompleted),
    TaskCancelled(TaskCancelled),
    Closed(WaveClosed),
}

impl PickWaveEvent {
    /// Reservation line handed back with this event.
    pub fn released_line(&self) -> Option<(ReservationId, AllocationLine)> {
        match self {
            PickWaveEvent::TaskCancelled(e) => Some((e.reservation_id, e.line)),
            _ => None,
        }
    }
}

impl Event for PickWaveEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PickWaveEvent::Planned(_) => "inventory.pick_wave.planned",
            PickWaveEvent::TaskCompleted(_) => "inventory.pick_wave.task_completed",
            PickWaveEvent::TaskCancelled(_) => "inventory.pick_wave.task_cancelled",
            PickWaveEvent::Closed(_) => "inventory.pick_wave.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PickWaveEvent::Planned(e) => e.occurred_at,
            PickWaveEvent::TaskCompleted(e) => e.stock_move.occurred_at,
            PickWaveEvent::TaskCancelled(e) => e.occurred_at,
            PickWaveEvent::Closed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PickWave {
    type Command = PickWaveCommand;
    type Event = PickWaveEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PickWaveEvent::Planned(e) => {
                self.id = e.wave_id;
                self.company_id = Some(e.company_id);
                self.warehouse_id = e.warehouse_id;
                self.tasks = e.tasks.clone();
                self.status = PickWaveStatus::Open;
                self.created = true;
            }
            PickWaveEvent::TaskCompleted(e) => {
                if let Some(task) = self.tasks.iter_mut().find(|t| t.id == e.task_id) {
                    task.status = PickTaskStatus::Done;
                }
            }
            PickWaveEvent::TaskCancelled(e) => {
                if let Some(task) = self.tasks.iter_mut().find(|t| t.id == e.task_id) {
                    task.status = PickTaskStatus::Cancelled;
                }
            }
            PickWaveEvent::Closed(e) => {
                self.status = e.status;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PickWaveCommand::Plan(cmd) => self.handle_plan(cmd),
            PickWaveCommand::CompleteTask(cmd) => self.handle_complete(cmd),
            PickWaveCommand::CancelTask(cmd) => self.handle_cancel_task(cmd),
            PickWaveCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PickWave {
    fn ensure_open(&self, company_id: CompanyId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("pick wave {}", self.id)));
        }
        if self.company_id != Some(company_id) {
            return Err(DomainError::invariant("company mismatch"));
        }
        if self.status != PickWaveStatus::Open {
            return Err(DomainError::conflict(format!("pick wave {} is closed", self.id)));
        }
        Ok(())
    }

    fn new_task(&self, task_id: PickTaskId) -> Result<&PickTask, DomainError> {
        let task = self
            .task(task_id)
            .ok_or_else(|| DomainError::not_found(format!("pick task {task_id}")))?;
        if task.status != PickTaskStatus::New {
            return Err(DomainError::conflict(format!(
                "pick task {task_id} is {}",
                task.status.as_str()
            )));
        }
        Ok(task)
    }

    /// Closes the wave once no task is left `new`, given `finished` just left it.
    fn close_if_done(
        &self,
        finished: PickTaskId,
        occurred_at: DateTime<Utc>,
    ) -> Option<PickWaveEvent> {
        let pending = self
            .tasks
            .iter()
            .any(|t| t.id != finished && t.status == PickTaskStatus::New);
        (!pending).then(|| {
            PickWaveEvent::Closed(WaveClosed {
                wave_id: self.id,
                status: PickWaveStatus::Completed,
                occurred_at,
            })
        })
    }

    fn handle_plan(&self, cmd: &PlanWave) -> Result<Vec<PickWaveEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "pick wave {} already exists",
                cmd.wave_id
            )));
        }
        if cmd.tasks.is_empty() {
            return Err(DomainError::validation("nothing to pick"));
        }
        for task in &cmd.tasks {
            if task.qty <= Decimal::ZERO || task.status != PickTaskStatus::New {
                return Err(DomainError::validation(format!(
                    "pick task {} must be new with a positive quantity",
                    task.id
                )));
            }
        }

        Ok(vec![PickWaveEvent::Planned(WavePlanned {
            company_id: cmd.company_id,
            wave_id: cmd.wave_id,
            warehouse_id: cmd.warehouse_id,
            tasks: cmd.tasks.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteTask) -> Result<Vec<PickWaveEvent>, DomainError> {
        self.ensure_open(cmd.company_id)?;
        let task = self.new_task(cmd.task_id)?;
        // Partial picks are modeled as smaller tasks.
        if cmd.qty != task.qty {
            return Err(DomainError::validation(format!(
                "pick task {} expects exactly {}, got {}",
                task.id, task.qty, cmd.qty
            )));
        }

        let mut stock_move = StockMove::new(
            cmd.company_id,
            MoveType::Pick,
            self.warehouse_id,
            task.product,
            task.tracking,
            task.qty,
            cmd.occurred_at,
        )
        .from_location(task.from_location)
        .referencing(MoveRef::PickTask {
            wave_id: self.id,
            task_id: task.id,
        });
        if let Some(to) = task.to_location {
            stock_move = stock_move.to_location(to);
        }

        let mut events = vec![PickWaveEvent::TaskCompleted(TaskCompleted {
            wave_id: self.id,
            task_id: task.id,
            reservation_id: task.reservation_id,
            stock_move,
        })];
        events.extend(self.close_if_done(task.id, cmd.occurred_at));
        Ok(events)
    }

    fn handle_cancel_task(&self, cmd: &CancelTask) -> Result<Vec<PickWaveEvent>, DomainError> {
        self.ensure_open(cmd.company_id)?;
        let task = self.new_task(cmd.task_id)?;

        let mut events = vec![PickWaveEvent::TaskCancelled(TaskCancelled {
            wave_id: self.id,
            task_id: task.id,
            reservation_id: task.reservation_id,
            line: task.line(),
            occurred_at: cmd.occurred_at,
        })];
        events.extend(self.close_if_done(task.id, cmd.occurred_at));
        Ok(events)
    }

    fn handle_cancel(&self, cmd: &CancelWave) -> Result<Vec<PickWaveEvent>, DomainError> {
        self.ensure_open(cmd.company_id)?;

        let mut events: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| t.status == PickTaskStatus::New)
            .map(|t| {
                PickWaveEvent::TaskCancelled(TaskCancelled {
                    wave_id: self.id,
                    task_id: t.id,
                    reservation_id: t.reservation_id,
                    line: t.line(),
                    occurred_at: cmd.occurred_at,
                })
            })
            .collect();
        events.push(PickWaveEvent::Closed(WaveClosed {
            wave_id: self.id,
            status: PickWaveStatus::Cancelled,
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }
}
