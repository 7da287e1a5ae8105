use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use stockledger_core::{CompanyContext, ExpectedVersion};
use stockledger_inventory::shipment::{
    AddPackage, CancelShipment, CreateShipment, ShipShipment, Shipment, ShipmentCommand,
    ShipmentEvent, ShipmentLine, ShipmentStatus,
};
use stockledger_inventory::{
    LocationId, LocationType, OrderId, PackageId, PickTaskId, PickWaveId, ShipmentId,
};

use super::claims::Claims;
use super::picking::PickingService;
use super::reservations::ReservationManager;
use super::decide;
use crate::error::LedgerError;
use crate::ledger::{InventoryLedger, LedgerBatch};
use crate::registry::LocationRegistry;
use crate::store::DocumentStore;

/// Shipments of picked stock for one order.
#[derive(Debug)]
pub struct ShippingService<L> {
    ledger: Arc<L>,
    locations: Arc<LocationRegistry>,
    reservations: Arc<ReservationManager<L>>,
    picking: Arc<PickingService<L>>,
    shipments: DocumentStore<Shipment>,
    /// Pick tasks on a shipment that is not cancelled.
    claims: Claims<PickTaskId, ShipmentId>,
}

impl<L> ShippingService<L>
where
    L: InventoryLedger,
{
    pub fn new(
        ledger: Arc<L>,
        locations: Arc<LocationRegistry>,
        reservations: Arc<ReservationManager<L>>,
        picking: Arc<PickingService<L>>,
    ) -> Self {
        Self {
            ledger,
            locations,
            reservations,
            picking,
            shipments: DocumentStore::new("shipment"),
            claims: Claims::new("pick task"),
        }
    }

    /// Gather done pick tasks of one order into a shipment leaving through
    /// `outbound_location`.
    #[instrument(skip(self, ctx, tasks), fields(company_id = %ctx.company_id(), order_id = %order_id, tasks = tasks.len()))]
    pub fn create(
        &self,
        ctx: &CompanyContext,
        order_id: OrderId,
        outbound_location: LocationId,
        tasks: &[(PickWaveId, PickTaskId)],
    ) -> Result<Shipment, LedgerError> {
        let outbound = self.locations.location(ctx, outbound_location)?;
        outbound.ensure_active()?;
        outbound.ensure_kind(&[LocationType::Outbound])?;

        let mut lines = Vec::with_capacity(tasks.len());
        for (wave_id, task_id) in tasks {
            let wave = self.picking.get(ctx, *wave_id)?;
            if wave.warehouse_id() != outbound.warehouse_id {
                return Err(LedgerError::Validation(format!(
                    "pick wave {wave_id} is outside warehouse {}",
                    outbound.warehouse_id
                )));
            }
            let task = wave
                .task(*task_id)
                .ok_or_else(|| LedgerError::NotFound(format!("pick task {task_id}")))?;
            if task.order_id != order_id {
                return Err(LedgerError::Validation(format!(
                    "pick task {task_id} belongs to order {}",
                    task.order_id
                )));
            }
            lines.push(ShipmentLine::from_task(*wave_id, task)?);
        }

        let shipment_id = ShipmentId::new();
        let task_ids: Vec<_> = lines.iter().map(|l| l.task_id).collect();
        self.claims.claim_all(ctx, task_ids.iter().copied(), shipment_id)?;
        let command = ShipmentCommand::Create(CreateShipment {
            company_id: ctx.company_id(),
            shipment_id,
            warehouse_id: outbound.warehouse_id,
            order_id,
            outbound_location,
            lines,
            occurred_at: Utc::now(),
        });
        let created = decide(&Shipment::empty(shipment_id), &command)
            .and_then(|(shipment, _)| self.shipments.insert(ctx, shipment.clone()).map(|_| shipment));
        match created {
            Ok(shipment) => {
                info!(shipment_id = %shipment_id, "shipment created");
                Ok(shipment)
            }
            Err(e) => {
                self.claims.release(ctx, task_ids, shipment_id)?;
                Err(e)
            }
        }
    }

    pub fn add_package(
        &self,
        ctx: &CompanyContext,
        shipment_id: ShipmentId,
        label: &str,
        task_ids: Vec<PickTaskId>,
    ) -> Result<(Shipment, PackageId), LedgerError> {
        let package_id = PackageId::new();
        let command = ShipmentCommand::AddPackage(AddPackage {
            company_id: ctx.company_id(),
            package_id,
            label: label.to_string(),
            task_ids,
            occurred_at: Utc::now(),
        });
        let shipment = self
            .shipments
            .update(ctx, &shipment_id, ExpectedVersion::Any, |shipment| {
                let (next, _) = decide(shipment, &command)?;
                *shipment = next;
                Ok(shipment.clone())
            })?;
        Ok((shipment, package_id))
    }

    /// Pack and ship every line. Requires every task done and every
    /// reservation behind the lines fulfilled.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn ship(&self, ctx: &CompanyContext, shipment_id: ShipmentId) -> Result<Shipment, LedgerError> {
        self.shipments
            .update(ctx, &shipment_id, ExpectedVersion::Any, |shipment| {
                let mut task_status = BTreeMap::new();
                let mut reservation_status = BTreeMap::new();
                for line in shipment.lines() {
                    let task = self.picking.task(ctx, line.wave_id, line.task_id)?;
                    task_status.insert(task.id, task.status);
                    let reservation = self.reservations.get(ctx, line.reservation_id)?;
                    reservation_status.insert(line.reservation_id, reservation.status());
                }

                let command = ShipmentCommand::Ship(ShipShipment {
                    company_id: ctx.company_id(),
                    task_status,
                    reservation_status,
                    occurred_at: Utc::now(),
                });
                let (next, events) = decide(shipment, &command)?;
                let moves = events.iter().flat_map(|e| e.moves().iter().cloned());
                let committed = self.ledger.append(ctx, LedgerBatch::new().with_moves(moves))?;

                *shipment = next;
                info!(
                    shipment_id = %shipment_id,
                    moves = committed.moves.len(),
                    "shipment shipped"
                );
                Ok(shipment.clone())
            })
    }

    /// Cancel a shipment that is still being packed. The picked stock stays in
    /// staging.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn cancel(&self, ctx: &CompanyContext, shipment_id: ShipmentId) -> Result<Shipment, LedgerError> {
        let command = ShipmentCommand::Cancel(CancelShipment {
            company_id: ctx.company_id(),
            occurred_at: Utc::now(),
        });
        let shipment = self
            .shipments
            .update(ctx, &shipment_id, ExpectedVersion::Any, |shipment| {
                let (next, events) = decide(shipment, &command)?;
                if events.iter().any(|e| matches!(e, ShipmentEvent::Cancelled(_))) {
                    info!(shipment_id = %shipment_id, "shipment cancelled");
                }
                *shipment = next;
                Ok(shipment.clone())
            })?;
        if shipment.status() == ShipmentStatus::Cancelled {
            self.claims
                .release(ctx, shipment.lines().iter().map(|l| l.task_id), shipment_id)?;
        }
        Ok(shipment)
    }

    pub fn get(&self, ctx: &CompanyContext, shipment_id: ShipmentId) -> Result<Shipment, LedgerError> {
        self.shipments.get(ctx, &shipment_id)
    }
}
