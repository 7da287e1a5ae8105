use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::CompanyContext;
use stockledger_events::EventEnvelope;
use stockledger_inventory::cycle_count::{CountLine, CountVariance};
use stockledger_inventory::{
    AllocationLine, AllocationPolicy, HoldDelta, InventoryItem, LotId, MoveRef, ReservationId,
    SerialId, StockKey, StockMove, StockSelector, Tracking, WarehouseId,
};

use crate::error::LedgerError;

/// Stream name used when ledger moves are wrapped in envelopes.
pub const LEDGER_STREAM: &str = "stock_moves";

/// One all-or-nothing unit of work against the ledger.
///
/// Hold releases are applied first, then the moves (explicit moves, then the
/// adjustments produced by `counts`), then new holds. Counts are evaluated
/// against the rows as they are before anything in the batch is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerBatch {
    pub moves: Vec<StockMove>,
    pub holds: Vec<HoldDelta>,
    pub counts: Vec<CountLine>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_moves(mut self, moves: impl IntoIterator<Item = StockMove>) -> Self {
        self.moves.extend(moves);
        self
    }

    pub fn with_holds(mut self, holds: impl IntoIterator<Item = HoldDelta>) -> Self {
        self.holds.extend(holds);
        self
    }

    pub fn with_counts(mut self, counts: impl IntoIterator<Item = CountLine>) -> Self {
        self.counts.extend(counts);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty() && self.holds.is_empty() && self.counts.is_empty()
    }
}

/// A move as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMove {
    /// Gap-free position in the company's ledger, starting at 1.
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub stock_move: StockMove,
}

impl RecordedMove {
    pub fn to_envelope(&self) -> EventEnvelope<StockMove> {
        EventEnvelope::new(
            *self.stock_move.id.as_uuid(),
            self.stock_move.company_id,
            LEDGER_STREAM,
            self.sequence,
            self.stock_move.clone(),
        )
    }
}

/// What a batch wrote: the recorded moves and the evaluated count lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Committed {
    pub moves: Vec<RecordedMove>,
    pub counts: Vec<CountVariance>,
}

/// Request to hold `qty` of the selected stock for one reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldRequest {
    pub reservation_id: ReservationId,
    pub warehouse_id: WarehouseId,
    pub selector: StockSelector,
    pub qty: Decimal,
    pub policy: AllocationPolicy,
    /// Date against which lot expiry is judged.
    pub as_of: NaiveDate,
    /// Ignore expired lots unless the selector pins one.
    pub skip_expired: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub on_hand: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveFilter {
    All,
    ByKey(StockKey),
    /// Every move posted by one workflow document.
    ByDocument { ref_type: &'static str, ref_id: Uuid },
    ByLot(LotId),
    BySerial(SerialId),
    ByWarehouse(WarehouseId),
}

impl MoveFilter {
    pub fn document(reference: &MoveRef) -> Self {
        MoveFilter::ByDocument {
            ref_type: reference.ref_type(),
            ref_id: reference.ref_id(),
        }
    }

    pub fn matches(&self, stock_move: &StockMove) -> bool {
        match self {
            MoveFilter::All => true,
            MoveFilter::ByKey(key) => stock_move.touches(key),
            MoveFilter::ByDocument { ref_type, ref_id } => stock_move
                .reference
                .is_some_and(|r| r.ref_type() == *ref_type && r.ref_id() == *ref_id),
            MoveFilter::ByLot(id) => stock_move.tracking == Tracking::Lot(*id),
            MoveFilter::BySerial(id) => stock_move.tracking == Tracking::Serial(*id),
            MoveFilter::ByWarehouse(id) => stock_move.warehouse_id == *id,
        }
    }
}

/// A projection row that disagrees with the ledger or the reservation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drift {
    pub key: StockKey,
    pub warehouse_id: WarehouseId,
    pub projected_on_hand: Decimal,
    pub ledger_on_hand: Decimal,
    pub projected_reserved: Decimal,
    pub held_reserved: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Number of rows compared.
    pub checked: usize,
    pub drifts: Vec<Drift>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.drifts.is_empty()
    }
}

/// Hook run while the touched rows are locked, after every check has passed and
/// before anything is committed. An error aborts the whole batch.
///
/// A hook decides; it must not write anywhere else. A durable engine can still
/// fail its commit after the hook returned, so callers store what the hook
/// decided only once the ledger call has returned `Ok`.
pub type CommitHook<'a> = dyn FnMut(&Committed) -> Result<(), LedgerError> + 'a;

/// Hook run with the chosen allocation before the hold is committed. Same
/// rules as [`CommitHook`].
pub type AllocationHook<'a> = dyn FnMut(&[AllocationLine]) -> Result<(), LedgerError> + 'a;

/// Append-only stock ledger with an atomically maintained row projection.
///
/// Implementations must:
/// - reject any batch that would leave a row with negative on-hand, negative
///   reserved or reserved above on-hand, writing nothing
/// - lock only the rows a call touches, in a deterministic order
/// - assign every recorded move the next gap-free sequence of its company
/// - scope every read and write to `ctx.company_id()`
pub trait InventoryLedger: Send + Sync {
    fn append_with(
        &self,
        ctx: &CompanyContext,
        batch: LedgerBatch,
        on_commit: &mut CommitHook<'_>,
    ) -> Result<Committed, LedgerError>;

    fn append(&self, ctx: &CompanyContext, batch: LedgerBatch) -> Result<Committed, LedgerError> {
        self.append_with(ctx, batch, &mut |_| Ok(()))
    }

    fn append_move(&self, ctx: &CompanyContext, stock_move: StockMove) -> Result<RecordedMove, LedgerError> {
        let mut committed = self.append(ctx, LedgerBatch::new().with_moves([stock_move]))?;
        committed
            .moves
            .pop()
            .ok_or_else(|| LedgerError::Storage("append recorded no move".into()))
    }

    /// Allocate and hold stock for one reservation, all or nothing.
    fn reserve(
        &self,
        ctx: &CompanyContext,
        request: &HoldRequest,
        on_allocated: &mut AllocationHook<'_>,
    ) -> Result<Vec<AllocationLine>, LedgerError>;

    fn item(&self, ctx: &CompanyContext, key: &StockKey) -> Result<Option<InventoryItem>, LedgerError>;

    /// Non-empty rows of one warehouse, in key order.
    fn items(&self, ctx: &CompanyContext, warehouse_id: WarehouseId) -> Result<Vec<InventoryItem>, LedgerError>;

    /// Totals over the sellable rows matching `selector`.
    fn availability(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
        selector: &StockSelector,
    ) -> Result<Availability, LedgerError>;

    /// Recorded moves matching `filter`, in ledger order.
    fn moves(&self, ctx: &CompanyContext, filter: &MoveFilter) -> Result<Vec<RecordedMove>, LedgerError>;

    /// Compare every row with the ledger and the holds without writing.
    fn reconcile(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, LedgerError>;

    /// Recompute every row from the ledger and the holds. Idempotent.
    fn rebuild(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, LedgerError>;
}

impl<L> InventoryLedger for Arc<L>
where
    L: InventoryLedger + ?Sized,
{
    fn append_with(
        &self,
        ctx: &CompanyContext,
        batch: LedgerBatch,
        on_commit: &mut CommitHook<'_>,
    ) -> Result<Committed, LedgerError> {
        (**self).append_with(ctx, batch, on_commit)
    }

    fn reserve(
        &self,
        ctx: &CompanyContext,
        request: &HoldRequest,
        on_allocated: &mut AllocationHook<'_>,
    ) -> Result<Vec<AllocationLine>, LedgerError> {
        (**self).reserve(ctx, request, on_allocated)
    }

    fn item(&self, ctx: &CompanyContext, key: &StockKey) -> Result<Option<InventoryItem>, LedgerError> {
        (**self).item(ctx, key)
    }

    fn items(&self, ctx: &CompanyContext, warehouse_id: WarehouseId) -> Result<Vec<InventoryItem>, LedgerError> {
        (**self).items(ctx, warehouse_id)
    }

    fn availability(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
        selector: &StockSelector,
    ) -> Result<Availability, LedgerError> {
        (**self).availability(ctx, warehouse_id, selector)
    }

    fn moves(&self, ctx: &CompanyContext, filter: &MoveFilter) -> Result<Vec<RecordedMove>, LedgerError> {
        (**self).moves(ctx, filter)
    }

    fn reconcile(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, LedgerError> {
        (**self).reconcile(ctx)
    }

    fn rebuild(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, LedgerError> {
        (**self).rebuild(ctx)
    }
}
