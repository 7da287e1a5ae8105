use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use stockledger_core::{AggregateRoot, CompanyContext, ExpectedVersion};
use stockledger_inventory::picking::{
    CancelTask, CancelWave, CompleteTask, PickTask, PickTaskStatus, PickWave, PickWaveCommand,
    PickWaveEvent, PlanWave, plan_tasks,
};
use stockledger_inventory::{
    LocationId, LocationType, PickTaskId, PickWaveId, ReservationId, WarehouseId,
};

use super::claims::Claims;
use super::reservations::ReservationManager;
use super::{decide, ensure_in_warehouse};
use crate::error::LedgerError;
use crate::ledger::InventoryLedger;
use crate::registry::LocationRegistry;
use crate::store::DocumentStore;

/// Pick waves planned from active reservations.
///
/// Completing a task consumes the bound reservation line through the
/// [`ReservationManager`]; cancelling a task hands back only that line.
/// Lock order: wave, then reservation.
#[derive(Debug)]
pub struct PickingService<L> {
    locations: Arc<LocationRegistry>,
    reservations: Arc<ReservationManager<L>>,
    waves: DocumentStore<PickWave>,
    /// Reservations with `new` tasks in an open wave.
    claims: Claims<ReservationId, PickWaveId>,
}

impl<L> PickingService<L>
where
    L: InventoryLedger,
{
    pub fn new(locations: Arc<LocationRegistry>, reservations: Arc<ReservationManager<L>>) -> Self {
        Self {
            locations,
            reservations,
            waves: DocumentStore::new("pick wave"),
            claims: Claims::new("reservation"),
        }
    }

    /// Plan one task per outstanding allocation line of each reservation.
    ///
    /// With a `staging` location the picks drop the stock there, ready for a
    /// shipment; without one the picked stock leaves the ledger at pick time.
    #[instrument(skip(self, ctx, reservation_ids), fields(company_id = %ctx.company_id(), reservations = reservation_ids.len()))]
    pub fn plan_wave(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
        reservation_ids: &[ReservationId],
        staging: Option<LocationId>,
    ) -> Result<PickWave, LedgerError> {
        if let Some(id) = staging {
            let location = self.locations.location(ctx, id)?;
            ensure_in_warehouse(&location, warehouse_id)?;
            location.ensure_kind(&[LocationType::Staging])?;
        }

        let wanted: BTreeSet<_> = reservation_ids.iter().copied().collect();
        let mut reservations = Vec::with_capacity(wanted.len());
        for id in &wanted {
            let reservation = self.reservations.get(ctx, *id)?;
            if reservation.warehouse_id() != warehouse_id {
                return Err(LedgerError::Validation(format!(
                    "reservation {id} is for warehouse {}",
                    reservation.warehouse_id()
                )));
            }
            if !reservation.is_active() {
                return Err(LedgerError::Conflict(format!(
                    "reservation {id} is {}",
                    reservation.status().as_str()
                )));
            }
            reservations.push(reservation);
        }

        let wave_id = PickWaveId::new();
        self.claims.claim_all(ctx, wanted.iter().copied(), wave_id)?;
        let command = PickWaveCommand::Plan(PlanWave {
            company_id: ctx.company_id(),
            wave_id,
            warehouse_id,
            tasks: plan_tasks(&reservations, staging),
            occurred_at: Utc::now(),
        });
        let planned = decide(&PickWave::empty(wave_id), &command)
            .and_then(|(wave, _)| self.waves.insert(ctx, wave.clone()).map(|_| wave));
        match planned {
            Ok(wave) => {
                info!(wave_id = %wave_id, tasks = wave.tasks().len(), "pick wave planned");
                Ok(wave)
            }
            Err(e) => {
                self.claims.release(ctx, wanted.iter().copied(), wave_id)?;
                Err(e)
            }
        }
    }

    /// Complete a task for exactly its quantity, consuming the reservation line.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn complete_task(
        &self,
        ctx: &CompanyContext,
        wave_id: PickWaveId,
        task_id: PickTaskId,
        qty: Decimal,
    ) -> Result<PickWave, LedgerError> {
        let command = PickWaveCommand::CompleteTask(CompleteTask {
            company_id: ctx.company_id(),
            task_id,
            qty,
            occurred_at: Utc::now(),
        });
        let wave = self.waves.update(ctx, &wave_id, ExpectedVersion::Any, |wave| {
            let (next, events) = decide(wave, &command)?;
            for event in &events {
                if let PickWaveEvent::TaskCompleted(done) = event {
                    self.reservations
                        .consume(ctx, done.reservation_id, vec![done.stock_move.clone()])?;
                }
            }
            log_transition(wave, &next);
            *wave = next;
            Ok(wave.clone())
        })?;
        self.free_claims(ctx, &wave)?;
        Ok(wave)
    }

    /// Cancel one task and hand its reservation line back. Sibling tasks of
    /// the same reservation stay pickable.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn cancel_task(
        &self,
        ctx: &CompanyContext,
        wave_id: PickWaveId,
        task_id: PickTaskId,
    ) -> Result<PickWave, LedgerError> {
        let command = PickWaveCommand::CancelTask(CancelTask {
            company_id: ctx.company_id(),
            task_id,
            occurred_at: Utc::now(),
        });
        self.cancel(ctx, wave_id, &command)
    }

    /// Cancel every task still `new` and hand their reservation lines back.
    ///
    /// Line releases are capped at what is outstanding, so a wave left open by
    /// a failed release can be cancelled again.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn cancel_wave(&self, ctx: &CompanyContext, wave_id: PickWaveId) -> Result<PickWave, LedgerError> {
        let command = PickWaveCommand::Cancel(CancelWave {
            company_id: ctx.company_id(),
            occurred_at: Utc::now(),
        });
        self.cancel(ctx, wave_id, &command)
    }

    pub fn get(&self, ctx: &CompanyContext, wave_id: PickWaveId) -> Result<PickWave, LedgerError> {
        self.waves.get(ctx, &wave_id)
    }

    pub fn task(&self, ctx: &CompanyContext, wave_id: PickWaveId, task_id: PickTaskId) -> Result<PickTask, LedgerError> {
        self.get(ctx, wave_id)?
            .task(task_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("pick task {task_id}")))
    }

    fn cancel(
        &self,
        ctx: &CompanyContext,
        wave_id: PickWaveId,
        command: &PickWaveCommand,
    ) -> Result<PickWave, LedgerError> {
        let wave = self.waves.update(ctx, &wave_id, ExpectedVersion::Any, |wave| {
            let (next, events) = decide(wave, command)?;
            for (reservation_id, line) in events.iter().filter_map(PickWaveEvent::released_line) {
                self.reservations.release_line(ctx, reservation_id, line)?;
            }
            log_transition(wave, &next);
            *wave = next;
            Ok(wave.clone())
        })?;
        self.free_claims(ctx, &wave)?;
        Ok(wave)
    }

    /// A reservation stops being taken by a wave once none of its tasks there
    /// is `new`.
    fn free_claims(&self, ctx: &CompanyContext, wave: &PickWave) -> Result<(), LedgerError> {
        let pending: BTreeSet<_> = wave
            .tasks()
            .iter()
            .filter(|t| t.status == PickTaskStatus::New)
            .map(|t| t.reservation_id)
            .collect();
        let finished = wave
            .tasks()
            .iter()
            .map(|t| t.reservation_id)
            .filter(|id| !pending.contains(id));
        self.claims.release(ctx, finished, *wave.id())
    }
}

fn log_transition(before: &PickWave, after: &PickWave) {
    if before.status() != after.status() {
        info!(wave_id = %after.id(), status = ?after.status(), "pick wave closed");
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rust_decimal_macros::dec;

    use stockledger_inventory::picking::PickWaveStatus;
    use stockledger_inventory::{OrderId, OrderItemId, ReservationStatus, StockKey, StockSelector, Tracking};

    use super::*;
    use crate::config::AllocationConfig;
    use crate::ledger::InMemoryLedger;
    use crate::services::reservations::ReserveRequest;
    use crate::services::testkit::Kit;

    struct Setup {
        kit: Kit,
        reservations: Arc<ReservationManager<InMemoryLedger>>,
        picking: PickingService<InMemoryLedger>,
    }

    fn setup() -> Setup {
        let kit = Kit::new();
        let reservations = Arc::new(ReservationManager::new(kit.ledger.clone(), AllocationConfig::default()));
        let picking = PickingService::new(kit.locations.clone(), reservations.clone());
        Setup {
            kit,
            reservations,
            picking,
        }
    }

    fn reserve(s: &Setup, qty: Decimal) -> ReservationId {
        let reservation = s
            .reservations
            .reserve(
                &s.kit.ctx,
                ReserveRequest {
                    order_id: OrderId::new(),
                    order_item_id: OrderItemId::new(),
                    warehouse_id: s.kit.warehouse_id,
                    selector: StockSelector::any(s.kit.product),
                    qty,
                },
            )
            .unwrap();
        *reservation.id()
    }

    #[test]
    fn tasks_follow_the_allocation_lines() {
        let s = setup();
        s.kit.stock(s.kit.pick_a, dec!(3));
        s.kit.stock(s.kit.bulk_b, dec!(5));
        let reservation_id = reserve(&s, dec!(6));

        let wave = s
            .picking
            .plan_wave(&s.kit.ctx, s.kit.warehouse_id, &[reservation_id], Some(s.kit.staging))
            .unwrap();
        let tasks: BTreeSet<_> = wave.tasks().iter().map(|t| (t.from_location, t.qty)).collect();
        assert_eq!(tasks, BTreeSet::from([(s.kit.pick_a, dec!(3)), (s.kit.bulk_b, dec!(3))]));
        assert!(wave.tasks().iter().all(|t| t.to_location == Some(s.kit.staging)));
    }

    #[test]
    fn completing_every_task_fulfills_the_reservation_and_closes_the_wave() {
        let s = setup();
        s.kit.stock(s.kit.pick_a, dec!(10));
        let reservation_id = reserve(&s, dec!(4));
        let wave = s
            .picking
            .plan_wave(&s.kit.ctx, s.kit.warehouse_id, &[reservation_id], Some(s.kit.staging))
            .unwrap();
        let task_id = wave.tasks()[0].id;

        let err = s
            .picking
            .complete_task(&s.kit.ctx, *wave.id(), task_id, dec!(3))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let wave = s
            .picking
            .complete_task(&s.kit.ctx, *wave.id(), task_id, dec!(4))
            .unwrap();
        assert_eq!(wave.status(), PickWaveStatus::Completed);
        assert_eq!(
            s.reservations.get(&s.kit.ctx, reservation_id).unwrap().status(),
            ReservationStatus::Fulfilled
        );
        assert_eq!(s.kit.on_hand(s.kit.pick_a), dec!(6));
        assert_eq!(s.kit.on_hand(s.kit.staging), dec!(4));
    }

    #[test]
    fn cancelling_a_wave_releases_its_reservations() {
        let s = setup();
        s.kit.stock(s.kit.pick_a, dec!(10));
        let first = reserve(&s, dec!(2));
        let second = reserve(&s, dec!(3));
        let wave = s
            .picking
            .plan_wave(&s.kit.ctx, s.kit.warehouse_id, &[first, second], None)
            .unwrap();

        let wave = s.picking.cancel_wave(&s.kit.ctx, *wave.id()).unwrap();
        assert_eq!(wave.status(), PickWaveStatus::Cancelled);
        for id in [first, second] {
            assert_eq!(
                s.reservations.get(&s.kit.ctx, id).unwrap().status(),
                ReservationStatus::Cancelled
            );
        }
        let key = StockKey::new(s.kit.pick_a, s.kit.product, Tracking::Untracked);
        assert_eq!(s.kit.ledger.item(&s.kit.ctx, &key).unwrap().unwrap().qty_reserved, dec!(0));
    }

    fn reserved(s: &Setup, location: LocationId) -> Decimal {
        let key = StockKey::new(location, s.kit.product, Tracking::Untracked);
        s.kit.ledger.item(&s.kit.ctx, &key).unwrap().unwrap().qty_reserved
    }

    /// A reservation of 6 split over A-01 and B-01, planned into one wave.
    fn split_wave(s: &Setup) -> (ReservationId, PickWave, PickTask, PickTask) {
        s.kit.stock(s.kit.pick_a, dec!(3));
        s.kit.stock(s.kit.bulk_b, dec!(3));
        let reservation_id = reserve(s, dec!(6));
        let wave = s
            .picking
            .plan_wave(&s.kit.ctx, s.kit.warehouse_id, &[reservation_id], Some(s.kit.staging))
            .unwrap();
        let at = |location| {
            wave.tasks()
                .iter()
                .find(|t| t.from_location == location)
                .cloned()
                .unwrap()
        };
        let (a, b) = (at(s.kit.pick_a), at(s.kit.bulk_b));
        (reservation_id, wave, a, b)
    }

    #[test]
    fn cancelling_a_task_after_its_sibling_was_picked_fulfills_the_reservation() {
        let s = setup();
        let (reservation_id, wave, a, b) = split_wave(&s);

        s.picking.complete_task(&s.kit.ctx, *wave.id(), a.id, a.qty).unwrap();
        let wave = s.picking.cancel_task(&s.kit.ctx, *wave.id(), b.id).unwrap();

        assert_eq!(wave.status(), PickWaveStatus::Completed);
        let reservation = s.reservations.get(&s.kit.ctx, reservation_id).unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Fulfilled);
        assert_eq!(reservation.qty(), dec!(3));
        assert_eq!(reserved(&s, s.kit.bulk_b), dec!(0));
        assert_eq!(s.kit.on_hand(s.kit.bulk_b), dec!(3));
        assert_eq!(s.kit.on_hand(s.kit.staging), dec!(3));
    }

    #[test]
    fn cancelling_a_task_keeps_its_sibling_pickable() {
        let s = setup();
        let (reservation_id, wave, a, b) = split_wave(&s);

        let after_cancel = s.picking.cancel_task(&s.kit.ctx, *wave.id(), a.id).unwrap();
        assert_eq!(after_cancel.status(), PickWaveStatus::Open);
        assert_eq!(
            s.reservations.get(&s.kit.ctx, reservation_id).unwrap().status(),
            ReservationStatus::Active
        );
        assert_eq!(reserved(&s, s.kit.pick_a), dec!(0));
        assert_eq!(reserved(&s, s.kit.bulk_b), dec!(3));

        let wave = s.picking.complete_task(&s.kit.ctx, *wave.id(), b.id, b.qty).unwrap();
        assert_eq!(wave.status(), PickWaveStatus::Completed);
        assert_eq!(
            s.reservations.get(&s.kit.ctx, reservation_id).unwrap().status(),
            ReservationStatus::Fulfilled
        );
        assert_eq!(s.kit.on_hand(s.kit.staging), dec!(3));
    }

    #[test]
    fn a_reservation_is_planned_into_one_open_wave_at_a_time() {
        let s = setup();
        s.kit.stock(s.kit.pick_a, dec!(10));
        let reservation_id = reserve(&s, dec!(2));
        s.picking
            .plan_wave(&s.kit.ctx, s.kit.warehouse_id, &[reservation_id], None)
            .unwrap();

        let err = s
            .picking
            .plan_wave(&s.kit.ctx, s.kit.warehouse_id, &[reservation_id], None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[test]
    fn concurrent_plans_take_a_reservation_once() {
        let s = setup();
        s.kit.stock(s.kit.pick_a, dec!(10));
        let reservation_id = reserve(&s, dec!(2));

        let results: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        s.picking
                            .plan_wave(&s.kit.ctx, s.kit.warehouse_id, &[reservation_id], None)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LedgerError::Conflict(_))));
    }

    #[test]
    fn a_finished_wave_frees_its_reservations() {
        let s = setup();
        let (reservation_id, wave, a, _) = split_wave(&s);

        s.picking.cancel_task(&s.kit.ctx, *wave.id(), a.id).unwrap();
        // the other task is still new
        assert!(matches!(
            s.picking.plan_wave(&s.kit.ctx, s.kit.warehouse_id, &[reservation_id], None),
            Err(LedgerError::Conflict(_))
        ));

        s.picking.cancel_wave(&s.kit.ctx, *wave.id()).unwrap();
        // cancelled now, so it is refused for its status rather than the claim
        let err = s
            .picking
            .plan_wave(&s.kit.ctx, s.kit.warehouse_id, &[reservation_id], None)
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::Conflict(format!("reservation {reservation_id} is cancelled"))
        );
    }

    #[test]
    fn staging_must_be_a_staging_location() {
        let s = setup();
        s.kit.stock(s.kit.pick_a, dec!(10));
        let reservation_id = reserve(&s, dec!(2));
        let err = s
            .picking
            .plan_wave(&s.kit.ctx, s.kit.warehouse_id, &[reservation_id], Some(s.kit.outbound))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
