use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use stockledger_core::{CompanyContext, ExpectedVersion};
use stockledger_inventory::reservation::{
    ConsumeReservation, CreateReservation, ReleaseLine, ReleaseReservation, ReservationCommand,
    ReservationEvent,
};
use stockledger_inventory::{
    AllocationLine, OrderId, OrderItemId, Reservation, ReservationId, ReservationStatus, StockMove,
    StockSelector, WarehouseId,
};

use super::claims::Claims;
use super::decide;
use crate::config::AllocationConfig;
use crate::error::LedgerError;
use crate::ledger::{Committed, HoldRequest, InventoryLedger, LedgerBatch};
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveRequest {
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub warehouse_id: WarehouseId,
    pub selector: StockSelector,
    pub qty: Decimal,
}

/// Admits, consumes and releases reservations.
///
/// A reservation document and its holds on projection rows always change in
/// the same ledger call: creation is decided inside the allocation hook and
/// stored once the holds are committed, and consume/release append the hold
/// deltas while the document is locked.
#[derive(Debug)]
pub struct ReservationManager<L> {
    ledger: Arc<L>,
    reservations: DocumentStore<Reservation>,
    /// Order items with a reservation that is (or is about to be) active.
    claims: Claims<OrderItemId, ReservationId>,
    allocation: AllocationConfig,
}

impl<L> ReservationManager<L>
where
    L: InventoryLedger,
{
    pub fn new(ledger: Arc<L>, allocation: AllocationConfig) -> Self {
        Self {
            ledger,
            reservations: DocumentStore::new("reservation"),
            claims: Claims::new("order item"),
            allocation,
        }
    }

    /// Hold `qty` for one order line, all or nothing.
    ///
    /// Fails with `InsufficientStock` (and holds nothing) when the sellable
    /// rows of the warehouse cannot cover the quantity.
    #[instrument(
        skip(self, ctx, request),
        fields(
            company_id = %ctx.company_id(),
            order_item_id = %request.order_item_id,
            qty = %request.qty
        )
    )]
    pub fn reserve(&self, ctx: &CompanyContext, request: ReserveRequest) -> Result<Reservation, LedgerError> {
        let reservation_id = ReservationId::new();
        self.claims.claim(ctx, request.order_item_id, reservation_id)?;

        match self.allocate(ctx, reservation_id, &request) {
            Ok(reservation) => {
                info!(
                    reservation_id = %reservation_id,
                    rows = reservation.lines().len(),
                    "reservation created"
                );
                Ok(reservation)
            }
            Err(e) => {
                self.claims.release(ctx, [request.order_item_id], reservation_id)?;
                Err(e)
            }
        }
    }

    fn allocate(
        &self,
        ctx: &CompanyContext,
        reservation_id: ReservationId,
        request: &ReserveRequest,
    ) -> Result<Reservation, LedgerError> {
        let hold = HoldRequest {
            reservation_id,
            warehouse_id: request.warehouse_id,
            selector: request.selector,
            qty: request.qty,
            policy: self.allocation.policy,
            as_of: Utc::now().date_naive(),
            skip_expired: self.allocation.skip_expired_lots,
        };

        let mut created = None;
        self.ledger.reserve(ctx, &hold, &mut |lines| {
            let command = ReservationCommand::Create(CreateReservation {
                company_id: ctx.company_id(),
                reservation_id,
                order_id: request.order_id,
                order_item_id: request.order_item_id,
                warehouse_id: request.warehouse_id,
                selector: request.selector,
                qty: request.qty,
                lines: lines.to_vec(),
                occurred_at: Utc::now(),
            });
            let (reservation, _) = decide(&Reservation::empty(reservation_id), &command)?;
            created = Some(reservation);
            Ok(())
        })?;

        // the id is not handed out before this returns, so nothing can look
        // the reservation up between the commit and the insert
        let reservation =
            created.ok_or_else(|| LedgerError::Storage("reservation was allocated but not decided".into()))?;
        self.reservations.insert(ctx, reservation.clone())?;
        Ok(reservation)
    }

    /// Hand the outstanding quantity back. No-op on a fulfilled or cancelled
    /// reservation.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn release(&self, ctx: &CompanyContext, reservation_id: ReservationId) -> Result<Reservation, LedgerError> {
        let reservation = self
            .reservations
            .update(ctx, &reservation_id, ExpectedVersion::Any, |reservation| {
                let command = ReservationCommand::Release(ReleaseReservation {
                    company_id: ctx.company_id(),
                    occurred_at: Utc::now(),
                });
                let (next, events) = decide(reservation, &command)?;
                if events.is_empty() {
                    return Ok(reservation.clone());
                }

                self.ledger.append(ctx, batch_for(&events))?;
                *reservation = next;
                info!(reservation_id = %reservation_id, "reservation released");
                Ok(reservation.clone())
            })?;

        self.claims.release(ctx, [reservation.order_item_id()], reservation_id)?;
        Ok(reservation)
    }

    /// Hand back up to `line.qty` of one allocated row. The reservation
    /// becomes fulfilled or cancelled once nothing is left outstanding.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn release_line(
        &self,
        ctx: &CompanyContext,
        reservation_id: ReservationId,
        line: AllocationLine,
    ) -> Result<Reservation, LedgerError> {
        let reservation = self
            .reservations
            .update(ctx, &reservation_id, ExpectedVersion::Any, |reservation| {
                let command = ReservationCommand::ReleaseLine(ReleaseLine {
                    company_id: ctx.company_id(),
                    key: line.key,
                    qty: line.qty,
                    occurred_at: Utc::now(),
                });
                let (next, events) = decide(reservation, &command)?;
                if events.is_empty() {
                    return Ok(reservation.clone());
                }

                self.ledger.append(ctx, batch_for(&events))?;
                *reservation = next;
                info!(
                    reservation_id = %reservation_id,
                    location_id = %line.key.location_id,
                    status = reservation.status().as_str(),
                    "reservation line released"
                );
                Ok(reservation.clone())
            })?;

        if !reservation.is_active() {
            self.claims.release(ctx, [reservation.order_item_id()], reservation_id)?;
        }
        Ok(reservation)
    }

    /// Append pick moves covering everything outstanding; the reservation
    /// becomes fulfilled.
    pub fn fulfill(
        &self,
        ctx: &CompanyContext,
        reservation_id: ReservationId,
        moves: Vec<StockMove>,
    ) -> Result<(Reservation, Committed), LedgerError> {
        self.draw(ctx, reservation_id, moves, true)
    }

    /// Append pick moves for part of the outstanding quantity.
    pub fn consume(
        &self,
        ctx: &CompanyContext,
        reservation_id: ReservationId,
        moves: Vec<StockMove>,
    ) -> Result<(Reservation, Committed), LedgerError> {
        self.draw(ctx, reservation_id, moves, false)
    }

    #[instrument(skip(self, ctx, moves), fields(company_id = %ctx.company_id(), moves = moves.len()))]
    fn draw(
        &self,
        ctx: &CompanyContext,
        reservation_id: ReservationId,
        moves: Vec<StockMove>,
        require_complete: bool,
    ) -> Result<(Reservation, Committed), LedgerError> {
        let (reservation, committed) =
            self.reservations
                .update(ctx, &reservation_id, ExpectedVersion::Any, |reservation| {
                    let command = ReservationCommand::Consume(ConsumeReservation {
                        company_id: ctx.company_id(),
                        moves,
                        require_complete,
                        occurred_at: Utc::now(),
                    });
                    let (next, events) = decide(reservation, &command)?;
                    let committed = self.ledger.append(ctx, batch_for(&events))?;
                    *reservation = next;
                    Ok((reservation.clone(), committed))
                })?;

        if reservation.status() == ReservationStatus::Fulfilled {
            info!(reservation_id = %reservation_id, "reservation fulfilled");
            self.claims.release(ctx, [reservation.order_item_id()], reservation_id)?;
        }
        Ok((reservation, committed))
    }

    pub fn get(&self, ctx: &CompanyContext, reservation_id: ReservationId) -> Result<Reservation, LedgerError> {
        self.reservations.get(ctx, &reservation_id)
    }

    pub fn for_order(&self, ctx: &CompanyContext, order_id: OrderId) -> Result<Vec<Reservation>, LedgerError> {
        self.reservations.find(ctx, |r| r.order_id() == order_id)
    }

    /// Active reservations of one warehouse.
    pub fn active(&self, ctx: &CompanyContext, warehouse_id: WarehouseId) -> Result<Vec<Reservation>, LedgerError> {
        self.reservations
            .find(ctx, |r| r.is_active() && r.warehouse_id() == warehouse_id)
    }
}

fn batch_for(events: &[ReservationEvent]) -> LedgerBatch {
    events.iter().fold(LedgerBatch::new(), |batch, event| {
        batch
            .with_moves(event.moves().iter().cloned())
            .with_holds(event.hold_deltas())
    })
}
