//! `InventoryService`: the in-process contract consumed by order management.
//!
//! Every call takes the caller's [`CompanyContext`]. Business outcomes the
//! caller must handle (a reservation that cannot be covered) are values;
//! everything else is a [`ServiceError`] with a stable `code()`.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, error, instrument, warn};

use stockledger_core::{AggregateRoot, CompanyContext};
use stockledger_inventory::cycle_count::CycleCount;
use stockledger_inventory::picking::PickWave;
use stockledger_inventory::receipt::ReceiptStatus;
use stockledger_inventory::shipment::Shipment;
use stockledger_inventory::transfer::TransferOrder;
use stockledger_inventory::{
    AdjustmentId, CycleCountId, LocationId, LotId, OrderId, PickTaskId, PickWaveId, ReceiptId,
    ReceiptItemId, ReservationId, SerialId, ShipmentId, StockSelector, TransferOrderId, WarehouseId,
};

use crate::config::EngineConfig;
use crate::error::{LedgerError, ServiceError};
use crate::ledger::{
    Availability, InMemoryLedger, InventoryLedger, MoveFilter, ReconciliationReport, RecordedMove,
};
use crate::registry::{IdentityRegistry, LocationRegistry};
use crate::services::{
    AdjustmentService, CycleCountService, PickingService, ReceivingService, ReservationManager,
    ReserveRequest, ShippingService, TransferService,
};

/// Result of [`InventoryService::reserve_stock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved { reservation_id: ReservationId },
    /// Nothing was held; `shortfall` more units would have been needed.
    Insufficient { shortfall: Decimal },
}

#[derive(Debug)]
pub struct InventoryService<L = InMemoryLedger> {
    config: EngineConfig,
    ledger: Arc<L>,
    locations: Arc<LocationRegistry>,
    identities: Arc<IdentityRegistry>,
    reservations: Arc<ReservationManager<L>>,
    receiving: ReceivingService<L>,
    picking: Arc<PickingService<L>>,
    shipping: ShippingService<L>,
    transfers: TransferService<L>,
    adjustments: AdjustmentService<L>,
    cycle_counts: CycleCountService<L>,
}

impl InventoryService<InMemoryLedger> {
    /// A self-contained engine with in-memory registries and ledger.
    pub fn in_memory(config: EngineConfig) -> Self {
        let locations = Arc::new(LocationRegistry::new());
        let identities = Arc::new(IdentityRegistry::new());
        let ledger = Arc::new(InMemoryLedger::new(
            locations.clone(),
            identities.clone(),
            config.quantity.max_scale,
        ));
        Self::new(config, ledger, locations, identities)
    }
}

impl<L> InventoryService<L>
where
    L: InventoryLedger,
{
    pub fn new(
        config: EngineConfig,
        ledger: Arc<L>,
        locations: Arc<LocationRegistry>,
        identities: Arc<IdentityRegistry>,
    ) -> Self {
        let reservations = Arc::new(ReservationManager::new(ledger.clone(), config.allocation));
        let picking = Arc::new(PickingService::new(locations.clone(), reservations.clone()));
        Self {
            receiving: ReceivingService::new(
                ledger.clone(),
                locations.clone(),
                identities.clone(),
                config.receiving,
            ),
            shipping: ShippingService::new(
                ledger.clone(),
                locations.clone(),
                reservations.clone(),
                picking.clone(),
            ),
            transfers: TransferService::new(ledger.clone(), locations.clone(), identities.clone()),
            adjustments: AdjustmentService::new(ledger.clone(), locations.clone(), identities.clone()),
            cycle_counts: CycleCountService::new(ledger.clone(), locations.clone(), identities.clone()),
            config,
            ledger,
            locations,
            identities,
            reservations,
            picking,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn locations(&self) -> &LocationRegistry {
        &self.locations
    }

    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    pub fn reservations(&self) -> &ReservationManager<L> {
        &self.reservations
    }

    pub fn receiving(&self) -> &ReceivingService<L> {
        &self.receiving
    }

    pub fn picking(&self) -> &PickingService<L> {
        &self.picking
    }

    pub fn shipping(&self) -> &ShippingService<L> {
        &self.shipping
    }

    pub fn transfers(&self) -> &TransferService<L> {
        &self.transfers
    }

    pub fn adjustments(&self) -> &AdjustmentService<L> {
        &self.adjustments
    }

    pub fn cycle_counts(&self) -> &CycleCountService<L> {
        &self.cycle_counts
    }

    /// Hold stock for one order line. A shortfall is an outcome, not an error.
    #[instrument(skip(self, ctx, request), fields(company_id = %ctx.company_id(), order_item_id = %request.order_item_id))]
    pub fn reserve_stock(
        &self,
        ctx: &CompanyContext,
        request: ReserveRequest,
    ) -> Result<ReserveOutcome, ServiceError> {
        match self.reservations.reserve(ctx, request) {
            Ok(reservation) => Ok(ReserveOutcome::Reserved {
                reservation_id: *reservation.id(),
            }),
            Err(LedgerError::InsufficientStock {
                requested,
                available,
                shortfall,
            }) => {
                debug!(%requested, %available, %shortfall, "insufficient stock");
                Ok(ReserveOutcome::Insufficient { shortfall })
            }
            Err(e) => Err(escalate(e)),
        }
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn release_reservation(
        &self,
        ctx: &CompanyContext,
        reservation_id: ReservationId,
    ) -> Result<(), ServiceError> {
        self.reservations
            .release(ctx, reservation_id)
            .map(|_| ())
            .map_err(escalate)
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn record_receipt(
        &self,
        ctx: &CompanyContext,
        receipt_id: ReceiptId,
        item_id: ReceiptItemId,
        qty: Decimal,
    ) -> Result<ReceiptStatus, ServiceError> {
        self.receiving
            .receive(ctx, receipt_id, item_id, qty)
            .map(|receipt| receipt.status())
            .map_err(escalate)
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn putaway(
        &self,
        ctx: &CompanyContext,
        receipt_id: ReceiptId,
        item_id: ReceiptItemId,
        to_location: LocationId,
        qty: Option<Decimal>,
    ) -> Result<ReceiptStatus, ServiceError> {
        self.receiving
            .putaway(ctx, receipt_id, item_id, to_location, qty)
            .map(|receipt| receipt.status())
            .map_err(escalate)
    }

    /// Ship a packed shipment; fails while any of its tasks is incomplete.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn confirm_shipment(&self, ctx: &CompanyContext, shipment_id: ShipmentId) -> Result<(), ServiceError> {
        self.shipping
            .ship(ctx, shipment_id)
            .map(|_| ())
            .map_err(escalate)
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn post_adjustment(&self, ctx: &CompanyContext, adjustment_id: AdjustmentId) -> Result<(), ServiceError> {
        self.adjustments
            .post(ctx, adjustment_id)
            .map(|_| ())
            .map_err(escalate)
    }

    /// Post a count; the returned document carries the variance of every item.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn post_cycle_count(&self, ctx: &CompanyContext, count_id: CycleCountId) -> Result<CycleCount, ServiceError> {
        self.cycle_counts.post(ctx, count_id).map_err(escalate)
    }

    #[instrument(skip(self, ctx, selector), fields(company_id = %ctx.company_id()))]
    pub fn get_availability(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
        selector: &StockSelector,
    ) -> Result<Availability, ServiceError> {
        self.ledger
            .availability(ctx, warehouse_id, selector)
            .map_err(escalate)
    }

    #[instrument(skip(self, ctx, reservation_ids), fields(company_id = %ctx.company_id(), reservations = reservation_ids.len()))]
    pub fn plan_wave(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
        reservation_ids: &[ReservationId],
        staging: Option<LocationId>,
    ) -> Result<PickWave, ServiceError> {
        self.picking
            .plan_wave(ctx, warehouse_id, reservation_ids, staging)
            .map_err(escalate)
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn complete_task(
        &self,
        ctx: &CompanyContext,
        wave_id: PickWaveId,
        task_id: PickTaskId,
        qty: Decimal,
    ) -> Result<PickWave, ServiceError> {
        self.picking
            .complete_task(ctx, wave_id, task_id, qty)
            .map_err(escalate)
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn cancel_task(
        &self,
        ctx: &CompanyContext,
        wave_id: PickWaveId,
        task_id: PickTaskId,
    ) -> Result<PickWave, ServiceError> {
        self.picking.cancel_task(ctx, wave_id, task_id).map_err(escalate)
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn cancel_wave(&self, ctx: &CompanyContext, wave_id: PickWaveId) -> Result<PickWave, ServiceError> {
        self.picking.cancel_wave(ctx, wave_id).map_err(escalate)
    }

    #[instrument(skip(self, ctx, tasks), fields(company_id = %ctx.company_id()))]
    pub fn create_shipment(
        &self,
        ctx: &CompanyContext,
        order_id: OrderId,
        outbound_location: LocationId,
        tasks: &[(PickWaveId, PickTaskId)],
    ) -> Result<Shipment, ServiceError> {
        self.shipping
            .create(ctx, order_id, outbound_location, tasks)
            .map_err(escalate)
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn ship_transfer(
        &self,
        ctx: &CompanyContext,
        transfer_id: TransferOrderId,
    ) -> Result<TransferOrder, ServiceError> {
        self.transfers.ship(ctx, transfer_id).map_err(escalate)
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn receive_transfer(
        &self,
        ctx: &CompanyContext,
        transfer_id: TransferOrderId,
    ) -> Result<TransferOrder, ServiceError> {
        self.transfers.receive(ctx, transfer_id).map_err(escalate)
    }

    /// Every move of one lot, in ledger order.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn trace_lot(&self, ctx: &CompanyContext, lot_id: LotId) -> Result<Vec<RecordedMove>, ServiceError> {
        self.identities.lot(ctx, lot_id).map_err(escalate)?;
        self.ledger
            .moves(ctx, &MoveFilter::ByLot(lot_id))
            .map_err(escalate)
    }

    /// Every move of one serial, in ledger order.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn trace_serial(&self, ctx: &CompanyContext, serial_id: SerialId) -> Result<Vec<RecordedMove>, ServiceError> {
        self.identities.serial(ctx, serial_id).map_err(escalate)?;
        self.ledger
            .moves(ctx, &MoveFilter::BySerial(serial_id))
            .map_err(escalate)
    }

    /// Compare the projection with the ledger. Drift is an operational error.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn reconcile(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, ServiceError> {
        let report = self.ledger.reconcile(ctx).map_err(escalate)?;
        if !report.is_consistent() {
            for drift in &report.drifts {
                error!(
                    location_id = %drift.key.location_id,
                    projected_on_hand = %drift.projected_on_hand,
                    ledger_on_hand = %drift.ledger_on_hand,
                    projected_reserved = %drift.projected_reserved,
                    held_reserved = %drift.held_reserved,
                    "consistency drift"
                );
            }
            return Err(ServiceError::ConsistencyDrift {
                rows: report.drifts.len(),
            });
        }
        Ok(report)
    }

    /// Recompute every row from the ledger; the report lists what was repaired.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn rebuild(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, ServiceError> {
        let report = self.ledger.rebuild(ctx).map_err(escalate)?;
        if !report.is_consistent() {
            warn!(rows = report.drifts.len(), "projection rows repaired from the ledger");
        }
        Ok(report)
    }
}

fn escalate(e: LedgerError) -> ServiceError {
    let e = ServiceError::from(e);
    if e.is_operational() {
        error!(code = e.code(), error = %e, "operation aborted");
    }
    e
}
