//! Engine-independent batch checks and row arithmetic.
//!
//! Both engines run the same sequence: [`Validator::prepare`] against the
//! reference data, lock the rows, [`evaluate`] on copies, check the holds with
//! [`next_holds`], then persist.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error};

use stockledger_core::quantity::ensure_scale;
use stockledger_core::{CompanyContext, DomainError};
use stockledger_events::CompanyScoped;
use stockledger_inventory::cycle_count::CountVariance;
use stockledger_inventory::{
    AllocationCandidate, AllocationLine, HoldDelta, InventoryItem, Location, LocationId,
    ReservationId, RowDelta, StockKey, StockMove, WarehouseId, allocate,
};

use super::r#trait::{Drift, HoldRequest, LedgerBatch, RecordedMove};
use crate::error::LedgerError;
use crate::registry::{IdentityRegistry, LocationRegistry};

pub(crate) type Holds = HashMap<ReservationId, BTreeMap<StockKey, Decimal>>;

/// Refuse a record owned by a company other than the caller's.
fn ensure_scoped(ctx: &CompanyContext, record: &impl CompanyScoped, what: impl Display) -> Result<(), LedgerError> {
    let owner = record.company_id();
    if owner != ctx.company_id() {
        return Err(LedgerError::TenantIsolation(format!("{what} belongs to company {owner}")));
    }
    Ok(())
}

/// A batch that passed every check needing only reference data.
#[derive(Debug, Default)]
pub(crate) struct PreparedBatch {
    /// Every row the batch touches, with the warehouse the row belongs to.
    pub keys: BTreeMap<StockKey, WarehouseId>,
    /// Locations referenced by moves or counts, as they were when checked.
    pub snapshots: Vec<Location>,
}

/// Location metadata of a row that may be allocated from.
#[derive(Debug, Clone)]
pub(crate) struct Eligible {
    pub location_code: String,
    pub expires_on: Option<NaiveDate>,
}

pub(crate) struct Validator<'a> {
    pub locations: &'a LocationRegistry,
    pub identities: &'a IdentityRegistry,
    pub max_scale: u32,
}

impl Validator<'_> {
    pub fn prepare(&self, ctx: &CompanyContext, batch: &LedgerBatch) -> Result<PreparedBatch, LedgerError> {
        let mut cache = BTreeMap::new();
        let mut referenced = Vec::new();

        for stock_move in &batch.moves {
            self.check_move(ctx, stock_move, &mut cache)?;
            referenced.extend(stock_move.from_location);
            referenced.extend(stock_move.to_location);
        }
        for line in &batch.counts {
            ensure_scoped(ctx, line, format_args!("count line {}", line.item_id))?;
            ensure_scale(line.qty_counted, self.max_scale, "counted quantity")?;
            let location = self.lookup(ctx, line.key.location_id, &mut cache)?;
            location.ensure_active()?;
            if location.warehouse_id != line.warehouse_id {
                return Err(LedgerError::Validation(format!(
                    "counted location {} is outside warehouse {}",
                    location.code, line.warehouse_id
                )));
            }
            self.identities
                .ensure_tracking(ctx, line.key.product.product_id, line.key.tracking)?;
            referenced.push(line.key.location_id);
        }

        let mut prepared = PreparedBatch::default();
        for stock_move in &batch.moves {
            for (key, _) in stock_move.row_deltas() {
                let location = self.lookup(ctx, key.location_id, &mut cache)?;
                prepared.keys.insert(key, location.warehouse_id);
            }
        }
        for hold in &batch.holds {
            let location = self.lookup(ctx, hold.key.location_id, &mut cache)?;
            prepared.keys.insert(hold.key, location.warehouse_id);
        }
        for line in &batch.counts {
            prepared.keys.insert(line.key, line.warehouse_id);
        }

        referenced.sort();
        referenced.dedup();
        prepared.snapshots = referenced
            .into_iter()
            .filter_map(|id| cache.get(&id).cloned())
            .collect();
        Ok(prepared)
    }

    /// Rows among `keys` a hold request may draw from: sellable, active and,
    /// unless pinned, not past expiry when expired lots are skipped.
    pub fn eligible(
        &self,
        ctx: &CompanyContext,
        request: &HoldRequest,
        keys: impl IntoIterator<Item = StockKey>,
    ) -> Result<BTreeMap<StockKey, Eligible>, LedgerError> {
        let mut out = BTreeMap::new();
        for key in keys {
            if !request.selector.matches(&key) {
                continue;
            }
            let location = self.locations.location(ctx, key.location_id)?;
            if !location.active
                || !location.kind.is_sellable()
                || location.warehouse_id != request.warehouse_id
            {
                continue;
            }
            let expires_on = self.identities.expiry(ctx, key.tracking)?;
            let expired = expires_on.is_some_and(|d| d < request.as_of);
            if expired && request.skip_expired && request.selector.pin.is_none() {
                debug!(location = %location.code, "skipping expired lot");
                continue;
            }
            out.insert(
                key,
                Eligible {
                    location_code: location.code,
                    expires_on,
                },
            );
        }
        Ok(out)
    }

    pub fn is_sellable(&self, ctx: &CompanyContext, location_id: LocationId) -> Result<bool, LedgerError> {
        Ok(self.locations.location(ctx, location_id)?.kind.is_sellable())
    }

    fn lookup(
        &self,
        ctx: &CompanyContext,
        id: LocationId,
        cache: &mut BTreeMap<LocationId, Location>,
    ) -> Result<Location, LedgerError> {
        if let Some(location) = cache.get(&id) {
            return Ok(location.clone());
        }
        let location = self.locations.location(ctx, id)?;
        cache.insert(id, location.clone());
        Ok(location)
    }

    fn check_move(
        &self,
        ctx: &CompanyContext,
        stock_move: &StockMove,
        cache: &mut BTreeMap<LocationId, Location>,
    ) -> Result<(), LedgerError> {
        ensure_scoped(ctx, stock_move, format_args!("move {}", stock_move.id))?;
        stock_move.validate_shape(self.max_scale)?;
        self.identities
            .ensure_tracking(ctx, stock_move.product.product_id, stock_move.tracking)?;

        let kind = stock_move.kind.as_str();
        if let Some(id) = stock_move.from_location {
            let from = self.lookup(ctx, id, cache)?;
            from.ensure_active()?;
            if from.warehouse_id != stock_move.warehouse_id {
                return Err(LedgerError::Validation(format!(
                    "{kind} move source {} is outside warehouse {}",
                    from.code, stock_move.warehouse_id
                )));
            }
        }
        if let Some(id) = stock_move.to_location {
            let to = self.lookup(ctx, id, cache)?;
            to.ensure_active()?;
            if let Some(kinds) = stock_move.kind.destination_kinds() {
                to.ensure_kind(kinds)?;
            }
            if !stock_move.kind.may_cross_warehouses() && to.warehouse_id != stock_move.warehouse_id {
                return Err(LedgerError::Validation(format!(
                    "{kind} move destination {} is outside warehouse {}",
                    to.code, stock_move.warehouse_id
                )));
            }
        }
        Ok(())
    }
}

/// Rows after a batch, plus what its counts produced.
#[derive(Debug)]
pub(crate) struct Evaluation {
    pub rows: BTreeMap<StockKey, InventoryItem>,
    pub generated: Vec<StockMove>,
    pub variances: Vec<CountVariance>,
}

/// Apply a batch to locked row copies.
///
/// Counts see the rows before anything else in the batch; then hold releases,
/// moves, count adjustments and new holds are applied in that order.
pub(crate) fn evaluate(
    batch: &LedgerBatch,
    mut rows: BTreeMap<StockKey, InventoryItem>,
    max_scale: u32,
) -> Result<Evaluation, LedgerError> {
    let mut generated = Vec::new();
    let mut variances = Vec::with_capacity(batch.counts.len());
    for line in &batch.counts {
        let row = rows
            .get(&line.key)
            .ok_or_else(|| LedgerError::Storage("counted row was not locked".into()))?;
        let adjustment = line.adjustment_for(row.qty_on_hand, row.qty_reserved).map_err(|e| {
            error!(item_id = %line.item_id, error = %e, "count cannot be reconciled");
            LedgerError::from(e)
        })?;
        if let Some(adjustment) = &adjustment {
            adjustment.validate_shape(max_scale)?;
        }
        variances.push(CountVariance {
            item_id: line.item_id,
            on_hand_before: row.qty_on_hand,
            variance: line.qty_counted - row.qty_on_hand,
            move_id: adjustment.as_ref().map(|m| m.id),
        });
        generated.extend(adjustment);
    }

    for hold in batch.holds.iter().filter(|h| h.delta < Decimal::ZERO) {
        apply_row(&mut rows, &hold.key, RowDelta::reserved(hold.delta))?;
    }
    for stock_move in batch.moves.iter().chain(&generated) {
        for (key, delta) in stock_move.row_deltas() {
            apply_row(&mut rows, &key, RowDelta::on_hand(delta))?;
        }
    }
    for hold in batch.holds.iter().filter(|h| h.delta > Decimal::ZERO) {
        apply_row(&mut rows, &hold.key, RowDelta::reserved(hold.delta))?;
    }

    Ok(Evaluation {
        rows,
        generated,
        variances,
    })
}

pub(crate) fn apply_row(
    rows: &mut BTreeMap<StockKey, InventoryItem>,
    key: &StockKey,
    delta: RowDelta,
) -> Result<(), LedgerError> {
    let row = rows
        .get(key)
        .ok_or_else(|| LedgerError::Storage(format!("row at location {} was not locked", key.location_id)))?;
    let next = row.apply_delta(delta).map_err(|e| {
        error!(location_id = %key.location_id, error = %e, "row invariant rejected the change");
        LedgerError::from(e)
    })?;
    rows.insert(*key, next);
    Ok(())
}

/// New hold state of every reservation touched by `deltas`.
///
/// A reservation whose holds drop to nothing maps to an empty set.
pub(crate) fn next_holds(current: &Holds, deltas: &[HoldDelta]) -> Result<Holds, LedgerError> {
    let mut out: Holds = HashMap::new();
    for delta in deltas {
        let lines = out
            .entry(delta.reservation_id)
            .or_insert_with(|| current.get(&delta.reservation_id).cloned().unwrap_or_default());
        let held = lines.entry(delta.key).or_insert(Decimal::ZERO);
        *held += delta.delta;
        if *held < Decimal::ZERO {
            error!(reservation_id = %delta.reservation_id, "hold released beyond what was reserved");
            return Err(LedgerError::InvariantViolation(format!(
                "reservation {} would hold {} at location {}",
                delta.reservation_id, held, delta.key.location_id
            )));
        }
        if held.is_zero() {
            lines.remove(&delta.key);
        }
    }
    Ok(out)
}

/// Allocate a hold over locked rows.
pub(crate) fn allocate_hold<'a>(
    request: &HoldRequest,
    rows: impl IntoIterator<Item = &'a InventoryItem>,
    eligible: &BTreeMap<StockKey, Eligible>,
) -> Result<Vec<AllocationLine>, LedgerError> {
    let candidates = rows
        .into_iter()
        .filter_map(|row| {
            eligible.get(&row.key).map(|meta| AllocationCandidate {
                key: row.key,
                location_code: meta.location_code.clone(),
                available: row.available(),
                expires_on: meta.expires_on,
            })
        })
        .collect();

    match allocate(candidates, request.qty, request.policy) {
        Ok(lines) => Ok(lines),
        Err(e @ DomainError::InsufficientStock { .. }) => {
            debug!(error = %e, "reservation not satisfiable");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Number the batch's moves from `first`, explicit moves before count adjustments.
pub(crate) fn record(
    moves: Vec<StockMove>,
    generated: Vec<StockMove>,
    first: u64,
    recorded_at: DateTime<Utc>,
) -> Vec<RecordedMove> {
    moves
        .into_iter()
        .chain(generated)
        .enumerate()
        .map(|(i, stock_move)| RecordedMove {
            sequence: first + i as u64,
            recorded_at,
            stock_move,
        })
        .collect()
}

/// Reserved quantity per row implied by a set of holds.
pub(crate) fn held_per_row(holds: &Holds) -> BTreeMap<StockKey, Decimal> {
    let mut out = BTreeMap::new();
    for lines in holds.values() {
        for (key, qty) in lines {
            *out.entry(*key).or_insert(Decimal::ZERO) += *qty;
        }
    }
    out
}

/// Compare one row with the values the ledger and holds imply.
pub(crate) fn drift(
    key: StockKey,
    warehouse_id: WarehouseId,
    projected: (Decimal, Decimal),
    ledger_on_hand: Decimal,
    held_reserved: Decimal,
) -> Option<Drift> {
    let (projected_on_hand, projected_reserved) = projected;
    if projected_on_hand == ledger_on_hand && projected_reserved == held_reserved {
        return None;
    }
    Some(Drift {
        key,
        warehouse_id,
        projected_on_hand,
        ledger_on_hand,
        projected_reserved,
        held_reserved,
    })
}
