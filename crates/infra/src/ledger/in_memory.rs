use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument};

use stockledger_core::quantity::ensure_scale;
use stockledger_core::{CompanyContext, CompanyId};
use stockledger_events::ProjectionRunner;
use stockledger_inventory::{
    AllocationLine, InventoryItem, ProductRef, RowDelta, StockKey, StockSelector, WarehouseId,
};

use super::plan::{self, Holds, Validator};
use super::r#trait::{
    AllocationHook, Availability, CommitHook, Committed, HoldRequest, InventoryLedger, LedgerBatch,
    MoveFilter, ReconciliationReport, RecordedMove,
};
use crate::error::LedgerError;
use crate::projection::StockProjection;
use crate::registry::{IdentityRegistry, LocationRegistry};

type RowSlot = Arc<Mutex<InventoryItem>>;

/// Per-company history: the recorded moves and the live reservation holds.
#[derive(Debug, Default)]
struct Journal {
    moves: Vec<RecordedMove>,
    holds: Holds,
}

impl Journal {
    fn next_sequence(&self) -> u64 {
        self.moves.len() as u64 + 1
    }

    fn merge_holds(&mut self, changed: Holds) {
        for (reservation_id, lines) in changed {
            if lines.is_empty() {
                self.holds.remove(&reservation_id);
            } else {
                self.holds.insert(reservation_id, lines);
            }
        }
    }
}

/// In-memory ledger engine with row-level locking.
///
/// Each projection row has its own mutex. A call locks exactly the rows it
/// touches, in key order, computes the new rows on copies and writes them back
/// only once every check (and the caller's hook) has passed. Calls on disjoint
/// rows run in parallel; rebuild and reconcile take the gate exclusively.
///
/// Lock order: gate, row mutexes, journal, location registry.
#[derive(Debug)]
pub struct InMemoryLedger {
    locations: Arc<LocationRegistry>,
    identities: Arc<IdentityRegistry>,
    max_scale: u32,
    gate: RwLock<()>,
    rows: RwLock<HashMap<(CompanyId, StockKey), RowSlot>>,
    by_product: RwLock<HashMap<(CompanyId, WarehouseId, ProductRef), BTreeSet<StockKey>>>,
    journals: Mutex<HashMap<CompanyId, Journal>>,
}

impl InMemoryLedger {
    pub fn new(locations: Arc<LocationRegistry>, identities: Arc<IdentityRegistry>, max_scale: u32) -> Self {
        Self {
            locations,
            identities,
            max_scale,
            gate: RwLock::new(()),
            rows: RwLock::new(HashMap::new()),
            by_product: RwLock::new(HashMap::new()),
            journals: Mutex::new(HashMap::new()),
        }
    }

    fn validator(&self) -> Validator<'_> {
        Validator {
            locations: &self.locations,
            identities: &self.identities,
            max_scale: self.max_scale,
        }
    }

    /// Row slots for `keys` in key order, created empty where missing.
    fn slots(
        &self,
        company_id: CompanyId,
        keys: &BTreeMap<StockKey, WarehouseId>,
    ) -> Result<Vec<RowSlot>, LedgerError> {
        {
            let rows = self.rows.read().map_err(|_| LedgerError::poisoned("rows"))?;
            let found: Vec<_> = keys
                .keys()
                .filter_map(|key| rows.get(&(company_id, *key)).cloned())
                .collect();
            if found.len() == keys.len() {
                return Ok(found);
            }
        }

        let mut rows = self.rows.write().map_err(|_| LedgerError::poisoned("rows"))?;
        let mut index = self
            .by_product
            .write()
            .map_err(|_| LedgerError::poisoned("product index"))?;
        let mut out = Vec::with_capacity(keys.len());
        for (key, warehouse_id) in keys {
            let slot = rows.entry((company_id, *key)).or_insert_with(|| {
                index
                    .entry((company_id, *warehouse_id, key.product))
                    .or_default()
                    .insert(*key);
                Arc::new(Mutex::new(InventoryItem::empty(company_id, *warehouse_id, *key)))
            });
            out.push(slot.clone());
        }
        Ok(out)
    }

    fn indexed_keys(
        &self,
        company_id: CompanyId,
        warehouse_id: WarehouseId,
        selector: &StockSelector,
    ) -> Result<Vec<StockKey>, LedgerError> {
        let index = self
            .by_product
            .read()
            .map_err(|_| LedgerError::poisoned("product index"))?;
        Ok(index
            .get(&(company_id, warehouse_id, selector.product))
            .map(|keys| keys.iter().filter(|k| selector.matches(k)).copied().collect())
            .unwrap_or_default())
    }

    fn existing_slots<'a>(
        &self,
        company_id: CompanyId,
        keys: impl IntoIterator<Item = &'a StockKey>,
    ) -> Result<Vec<RowSlot>, LedgerError> {
        let rows = self.rows.read().map_err(|_| LedgerError::poisoned("rows"))?;
        Ok(keys
            .into_iter()
            .filter_map(|key| rows.get(&(company_id, *key)).cloned())
            .collect())
    }

    fn recompute(&self, ctx: &CompanyContext, repair: bool) -> Result<ReconciliationReport, LedgerError> {
        let company_id = ctx.company_id();
        let _gate = self.gate.write().map_err(|_| LedgerError::poisoned("ledger gate"))?;

        let (history, held) = {
            let journals = self.journals.lock().map_err(|_| LedgerError::poisoned("journal"))?;
            match journals.get(&company_id) {
                Some(journal) => (
                    journal.moves.iter().map(RecordedMove::to_envelope).collect::<Vec<_>>(),
                    plan::held_per_row(&journal.holds),
                ),
                None => (Vec::new(), BTreeMap::new()),
            }
        };
        let (projection, _) =
            ProjectionRunner::rebuild_from_scratch(company_id, StockProjection::default, &history)
                .map_err(|e| LedgerError::Storage(format!("ledger replay failed: {e}")))?;

        let mut rows = self.rows.write().map_err(|_| LedgerError::poisoned("rows"))?;
        let mut keys: BTreeSet<StockKey> = rows
            .keys()
            .filter(|(c, _)| *c == company_id)
            .map(|(_, key)| *key)
            .collect();
        keys.extend(projection.keys().copied());
        keys.extend(held.keys().copied());

        let mut report = ReconciliationReport::default();
        for key in keys {
            let ledger_on_hand = projection.on_hand(&key);
            let held_reserved = held.get(&key).copied().unwrap_or(Decimal::ZERO);
            let slot = rows.get(&(company_id, key)).cloned();

            let (warehouse_id, projected) = match &slot {
                Some(slot) => {
                    let row = slot.lock().map_err(|_| LedgerError::poisoned("row"))?;
                    (row.warehouse_id, (row.qty_on_hand, row.qty_reserved))
                }
                None => (
                    self.locations.location(ctx, key.location_id)?.warehouse_id,
                    (Decimal::ZERO, Decimal::ZERO),
                ),
            };
            report.checked += 1;
            let Some(drift) = plan::drift(key, warehouse_id, projected, ledger_on_hand, held_reserved) else {
                continue;
            };
            report.drifts.push(drift);

            if repair {
                let fixed = InventoryItem::empty(company_id, warehouse_id, key)
                    .with_quantities(ledger_on_hand, held_reserved);
                match slot {
                    Some(slot) => *slot.lock().map_err(|_| LedgerError::poisoned("row"))? = fixed,
                    None => {
                        self.by_product
                            .write()
                            .map_err(|_| LedgerError::poisoned("product index"))?
                            .entry((company_id, warehouse_id, key.product))
                            .or_default()
                            .insert(key);
                        rows.insert((company_id, key), Arc::new(Mutex::new(fixed)));
                    }
                }
            }
        }

        if !report.is_consistent() {
            error!(
                company_id = %company_id,
                drifted = report.drifts.len(),
                checked = report.checked,
                "projection drift detected"
            );
        }
        Ok(report)
    }

    #[cfg(test)]
    pub(crate) fn overwrite_row(
        &self,
        company_id: CompanyId,
        key: &StockKey,
        on_hand: Decimal,
        reserved: Decimal,
    ) {
        let rows = self.rows.read().unwrap();
        let slot = rows.get(&(company_id, *key)).unwrap();
        let mut row = slot.lock().unwrap();
        row.qty_on_hand = on_hand;
        row.qty_reserved = reserved;
    }
}

fn lock_all(slots: &[RowSlot]) -> Result<Vec<MutexGuard<'_, InventoryItem>>, LedgerError> {
    slots
        .iter()
        .map(|slot| slot.lock().map_err(|_| LedgerError::poisoned("row")))
        .collect()
}

fn snapshot(guards: &[MutexGuard<'_, InventoryItem>]) -> BTreeMap<StockKey, InventoryItem> {
    guards.iter().map(|row| (row.key, (**row).clone())).collect()
}

fn write_back(guards: &mut [MutexGuard<'_, InventoryItem>], mut rows: BTreeMap<StockKey, InventoryItem>) {
    for guard in guards.iter_mut() {
        if let Some(row) = rows.remove(&guard.key) {
            **guard = row;
        }
    }
}

impl InventoryLedger for InMemoryLedger {
    #[instrument(
        skip(self, ctx, batch, on_commit),
        fields(
            company_id = %ctx.company_id(),
            moves = batch.moves.len(),
            holds = batch.holds.len(),
            counts = batch.counts.len()
        )
    )]
    fn append_with(
        &self,
        ctx: &CompanyContext,
        batch: LedgerBatch,
        on_commit: &mut CommitHook<'_>,
    ) -> Result<Committed, LedgerError> {
        let company_id = ctx.company_id();
        let _gate = self.gate.read().map_err(|_| LedgerError::poisoned("ledger gate"))?;

        let prepared = self.validator().prepare(ctx, &batch)?;
        let slots = self.slots(company_id, &prepared.keys)?;
        let mut guards = lock_all(&slots)?;
        let evaluation = plan::evaluate(&batch, snapshot(&guards), self.max_scale)?;

        let mut journals = self.journals.lock().map_err(|_| LedgerError::poisoned("journal"))?;
        let journal = journals.entry(company_id).or_default();
        let holds = plan::next_holds(&journal.holds, &batch.holds)?;

        let first = journal.next_sequence();
        let committed = Committed {
            moves: plan::record(batch.moves, evaluation.generated, first, Utc::now()),
            counts: evaluation.variances,
        };

        self.locations
            .with_references(company_id, &prepared.snapshots, || on_commit(&committed))?;

        write_back(&mut guards, evaluation.rows);
        journal.moves.extend(committed.moves.iter().cloned());
        journal.merge_holds(holds);

        debug!(
            first_sequence = first,
            recorded = committed.moves.len(),
            "ledger batch appended"
        );
        Ok(committed)
    }

    #[instrument(
        skip(self, ctx, request, on_allocated),
        fields(
            company_id = %ctx.company_id(),
            reservation_id = %request.reservation_id,
            qty = %request.qty
        )
    )]
    fn reserve(
        &self,
        ctx: &CompanyContext,
        request: &HoldRequest,
        on_allocated: &mut AllocationHook<'_>,
    ) -> Result<Vec<AllocationLine>, LedgerError> {
        let company_id = ctx.company_id();
        ensure_scale(request.qty, self.max_scale, "reservation quantity")?;
        let _gate = self.gate.read().map_err(|_| LedgerError::poisoned("ledger gate"))?;

        let keys = self.indexed_keys(company_id, request.warehouse_id, &request.selector)?;
        let eligible = self.validator().eligible(ctx, request, keys)?;

        let slots = self.existing_slots(company_id, eligible.keys())?;
        let mut guards = lock_all(&slots)?;
        let lines = plan::allocate_hold(request, guards.iter().map(|row| &**row), &eligible)?;

        let mut rows = snapshot(&guards);
        for line in &lines {
            plan::apply_row(&mut rows, &line.key, RowDelta::reserved(line.qty))?;
        }

        let mut journals = self.journals.lock().map_err(|_| LedgerError::poisoned("journal"))?;
        let journal = journals.entry(company_id).or_default();
        if journal.holds.contains_key(&request.reservation_id) {
            return Err(LedgerError::Conflict(format!(
                "reservation {} already holds stock",
                request.reservation_id
            )));
        }

        on_allocated(&lines)?;

        write_back(&mut guards, rows);
        journal.holds.insert(
            request.reservation_id,
            lines.iter().map(|line| (line.key, line.qty)).collect(),
        );
        debug!(rows = lines.len(), "stock held");
        Ok(lines)
    }

    fn item(&self, ctx: &CompanyContext, key: &StockKey) -> Result<Option<InventoryItem>, LedgerError> {
        let slot = self
            .rows
            .read()
            .map_err(|_| LedgerError::poisoned("rows"))?
            .get(&(ctx.company_id(), *key))
            .cloned();
        match slot {
            Some(slot) => Ok(Some(slot.lock().map_err(|_| LedgerError::poisoned("row"))?.clone())),
            None => Ok(None),
        }
    }

    fn items(&self, ctx: &CompanyContext, warehouse_id: WarehouseId) -> Result<Vec<InventoryItem>, LedgerError> {
        let slots: Vec<RowSlot> = self
            .rows
            .read()
            .map_err(|_| LedgerError::poisoned("rows"))?
            .iter()
            .filter(|((c, _), _)| *c == ctx.company_id())
            .map(|(_, slot)| slot.clone())
            .collect();

        let mut out = Vec::new();
        for slot in slots {
            let row = slot.lock().map_err(|_| LedgerError::poisoned("row"))?;
            if row.warehouse_id == warehouse_id && !row.is_empty() {
                out.push(row.clone());
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    #[instrument(skip(self, ctx, selector), fields(company_id = %ctx.company_id()))]
    fn availability(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
        selector: &StockSelector,
    ) -> Result<Availability, LedgerError> {
        let validator = self.validator();
        let mut out = Availability::default();
        for key in self.indexed_keys(ctx.company_id(), warehouse_id, selector)? {
            if !validator.is_sellable(ctx, key.location_id)? {
                continue;
            }
            if let Some(row) = self.item(ctx, &key)? {
                out.on_hand += row.qty_on_hand;
                out.reserved += row.qty_reserved;
            }
        }
        out.available = (out.on_hand - out.reserved).max(Decimal::ZERO);
        Ok(out)
    }

    fn moves(&self, ctx: &CompanyContext, filter: &MoveFilter) -> Result<Vec<RecordedMove>, LedgerError> {
        let journals = self.journals.lock().map_err(|_| LedgerError::poisoned("journal"))?;
        Ok(journals
            .get(&ctx.company_id())
            .map(|journal| {
                journal
                    .moves
                    .iter()
                    .filter(|recorded| filter.matches(&recorded.stock_move))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    fn reconcile(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, LedgerError> {
        self.recompute(ctx, false)
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    fn rebuild(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, LedgerError> {
        let report = self.recompute(ctx, true)?;
        info!(checked = report.checked, repaired = report.drifts.len(), "projection rebuilt");
        Ok(report)
    }
}
