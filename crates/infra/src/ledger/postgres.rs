//! Postgres-backed ledger engine.
//!
//! Same rules as [`super::InMemoryLedger`], persisted in four tables (see
//! `migrations/0001_stockledger.sql`):
//!
//! | table | role |
//! |-------|------|
//! | `stock_moves` | append-only ledger, numbered per company |
//! | `inventory_items` | the row projection, `CHECK`ed non-negative |
//! | `reservation_holds` | what each active reservation holds per row |
//! | `ledger_heads` | last sequence per company |
//!
//! ## Locking
//!
//! A batch runs in one transaction: missing rows are inserted, the touched rows
//! are locked with `SELECT .. FOR UPDATE ORDER BY row_key`, then the holds of
//! the touched reservations, then the company head. Two batches on disjoint
//! rows only meet at the head, after their checks have run.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError |
//! |------------|----------------------|-------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Conflict` |
//! | Database (check violation) | `23514` | `InvariantViolation` |
//! | anything else | | `Storage` |
//!
//! ## Sync bridge
//!
//! The inherent methods are async. [`InventoryLedger`] is implemented on top of
//! them with [`Handle::block_on`], so the workflow services and
//! `InventoryService` run unchanged on Postgres. Trait calls must come from
//! outside the runtime's async tasks (a plain thread or `spawn_blocking`), and
//! the runtime must be multi-threaded so its workers keep driving the pool's IO.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use stockledger_core::quantity::ensure_scale;
use stockledger_core::{CompanyContext, CompanyId};
use stockledger_events::ProjectionRunner;
use stockledger_inventory::{
    AllocationLine, InventoryItem, RowDelta, StockKey, StockMove, StockSelector, WarehouseId,
};

use super::plan::{self, Holds, Validator};
use super::r#trait::{
    AllocationHook, Availability, CommitHook, Committed, HoldRequest, InventoryLedger, LedgerBatch,
    MoveFilter, ReconciliationReport, RecordedMove,
};
use crate::config::PostgresConfig;
use crate::error::LedgerError;
use crate::projection::StockProjection;
use crate::registry::{IdentityRegistry, LocationRegistry};

const SCHEMA: &str = include_str!("../../migrations/0001_stockledger.sql");

const ROW_COLUMNS: &str = "row_key, warehouse_id, stock_key, qty_on_hand, qty_reserved";

#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
    /// Runtime the pool was opened on; drives the sync trait calls.
    runtime: Handle,
    locations: Arc<LocationRegistry>,
    identities: Arc<IdentityRegistry>,
    max_scale: u32,
}

impl PostgresLedger {
    pub fn new(
        pool: PgPool,
        runtime: Handle,
        locations: Arc<LocationRegistry>,
        identities: Arc<IdentityRegistry>,
        max_scale: u32,
    ) -> Self {
        Self {
            pool,
            runtime,
            locations,
            identities,
            max_scale,
        }
    }

    /// Open a pool from `postgres.url` on the current runtime.
    pub async fn connect(
        config: &PostgresConfig,
        locations: Arc<LocationRegistry>,
        identities: Arc<IdentityRegistry>,
        max_scale: u32,
    ) -> Result<Self, LedgerError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| LedgerError::Validation("postgres.url is not configured".into()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, Handle::current(), locations, identities, max_scale))
    }

    /// Create the tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn block_on<T>(&self, call: impl Future<Output = Result<T, LedgerError>>) -> Result<T, LedgerError> {
        self.runtime.block_on(call)
    }

    fn validator(&self) -> Validator<'_> {
        Validator {
            locations: &self.locations,
            identities: &self.identities,
            max_scale: self.max_scale,
        }
    }

    #[instrument(
        skip(self, ctx, batch, on_commit),
        fields(
            company_id = %ctx.company_id(),
            moves = batch.moves.len(),
            holds = batch.holds.len(),
            counts = batch.counts.len()
        ),
        err
    )]
    pub async fn append_with(
        &self,
        ctx: &CompanyContext,
        batch: LedgerBatch,
        on_commit: &mut CommitHook<'_>,
    ) -> Result<Committed, LedgerError> {
        let company_id = ctx.company_id();
        let prepared = self.validator().prepare(ctx, &batch)?;

        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        ensure_rows(&mut tx, company_id, &prepared.keys).await?;
        let locked = lock_rows(&mut tx, company_id, prepared.keys.keys()).await?;
        let evaluation = plan::evaluate(&batch, locked, self.max_scale)?;

        let reservations: BTreeSet<Uuid> = batch
            .holds
            .iter()
            .map(|h| *h.reservation_id.as_uuid())
            .collect();
        let current = lock_holds(&mut tx, company_id, &reservations).await?;
        let holds = plan::next_holds(&current, &batch.holds)?;

        let first = lock_head(&mut tx, company_id).await? + 1;
        let committed = Committed {
            moves: plan::record(batch.moves, evaluation.generated, first, Utc::now()),
            counts: evaluation.variances,
        };

        for recorded in &committed.moves {
            insert_move(&mut tx, recorded).await?;
        }
        for row in evaluation.rows.values() {
            update_row(&mut tx, row).await?;
        }
        write_holds(&mut tx, company_id, &holds).await?;
        if let Some(last) = committed.moves.last() {
            sqlx::query("UPDATE ledger_heads SET last_sequence = $2 WHERE company_id = $1")
                .bind(company_id.as_uuid())
                .bind(last.sequence as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_head", e))?;
        }

        self.locations
            .with_references(company_id, &prepared.snapshots, || on_commit(&committed))?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        debug!(
            first_sequence = first,
            recorded = committed.moves.len(),
            "ledger batch appended"
        );
        Ok(committed)
    }

    pub async fn append(&self, ctx: &CompanyContext, batch: LedgerBatch) -> Result<Committed, LedgerError> {
        self.append_with(ctx, batch, &mut |_| Ok(())).await
    }

    #[instrument(
        skip(self, ctx, request, on_allocated),
        fields(
            company_id = %ctx.company_id(),
            reservation_id = %request.reservation_id,
            qty = %request.qty
        )
    )]
    pub async fn reserve(
        &self,
        ctx: &CompanyContext,
        request: &HoldRequest,
        on_allocated: &mut AllocationHook<'_>,
    ) -> Result<Vec<AllocationLine>, LedgerError> {
        let company_id = ctx.company_id();
        ensure_scale(request.qty, self.max_scale, "reservation quantity")?;

        let candidates = self
            .product_rows(company_id, request.warehouse_id, &request.selector)
            .await?;
        let eligible = self
            .validator()
            .eligible(ctx, request, candidates.into_iter().map(|row| row.key))?;

        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut rows = lock_rows(&mut tx, company_id, eligible.keys()).await?;
        let lines = plan::allocate_hold(request, rows.values(), &eligible)?;
        for line in &lines {
            plan::apply_row(&mut rows, &line.key, RowDelta::reserved(line.qty))?;
        }

        let existing = lock_holds(&mut tx, company_id, &BTreeSet::from([*request.reservation_id.as_uuid()])).await?;
        if existing.contains_key(&request.reservation_id) {
            return Err(LedgerError::Conflict(format!(
                "reservation {} already holds stock",
                request.reservation_id
            )));
        }

        on_allocated(&lines)?;

        for line in &lines {
            if let Some(row) = rows.get(&line.key) {
                update_row(&mut tx, row).await?;
            }
        }
        let held: Holds = Holds::from([(
            request.reservation_id,
            lines.iter().map(|line| (line.key, line.qty)).collect(),
        )]);
        write_holds(&mut tx, company_id, &held).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        debug!(rows = lines.len(), "stock held");
        Ok(lines)
    }

    pub async fn item(&self, ctx: &CompanyContext, key: &StockKey) -> Result<Option<InventoryItem>, LedgerError> {
        let company_id = ctx.company_id();
        let row = sqlx::query(&format!(
            "SELECT {ROW_COLUMNS} FROM inventory_items WHERE company_id = $1 AND row_key = $2"
        ))
        .bind(company_id.as_uuid())
        .bind(row_key(key)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("item", e))?;
        row.map(|row| decode_item(company_id, &row)).transpose()
    }

    /// Non-empty rows of one warehouse, in key order.
    pub async fn items(&self, ctx: &CompanyContext, warehouse_id: WarehouseId) -> Result<Vec<InventoryItem>, LedgerError> {
        let company_id = ctx.company_id();
        let rows = sqlx::query(&format!(
            "SELECT {ROW_COLUMNS} FROM inventory_items
             WHERE company_id = $1 AND warehouse_id = $2 AND (qty_on_hand <> 0 OR qty_reserved <> 0)"
        ))
        .bind(company_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("items", e))?;

        let mut out = rows
            .iter()
            .map(|row| decode_item(company_id, row))
            .collect::<Result<Vec<_>, _>>()?;
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    #[instrument(skip(self, ctx, selector), fields(company_id = %ctx.company_id()))]
    pub async fn availability(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
        selector: &StockSelector,
    ) -> Result<Availability, LedgerError> {
        let validator = self.validator();
        let mut out = Availability::default();
        for row in self.product_rows(ctx.company_id(), warehouse_id, selector).await? {
            if !validator.is_sellable(ctx, row.key.location_id)? {
                continue;
            }
            out.on_hand += row.qty_on_hand;
            out.reserved += row.qty_reserved;
        }
        out.available = (out.on_hand - out.reserved).max(Decimal::ZERO);
        Ok(out)
    }

    /// Recorded moves matching `filter`, in ledger order.
    pub async fn moves(&self, ctx: &CompanyContext, filter: &MoveFilter) -> Result<Vec<RecordedMove>, LedgerError> {
        let company_id = *ctx.company_id().as_uuid();
        let narrowing = match filter {
            MoveFilter::All => "",
            MoveFilter::ByKey(_) => " AND product_id = $2 AND (from_location = $3 OR to_location = $3)",
            MoveFilter::ByDocument { .. } => " AND ref_type = $2 AND ref_id = $3",
            MoveFilter::ByLot(_) => " AND lot_id = $2",
            MoveFilter::BySerial(_) => " AND serial_id = $2",
            MoveFilter::ByWarehouse(_) => " AND warehouse_id = $2",
        };
        let sql = format!(
            "SELECT sequence, recorded_at, payload FROM stock_moves WHERE company_id = $1{narrowing} ORDER BY sequence"
        );
        let query = sqlx::query(&sql).bind(company_id);
        let query = match filter {
            MoveFilter::All => query,
            MoveFilter::ByKey(key) => query
                .bind(*key.product.product_id.as_uuid())
                .bind(*key.location_id.as_uuid()),
            MoveFilter::ByDocument { ref_type, ref_id } => query.bind(*ref_type).bind(*ref_id),
            MoveFilter::ByLot(id) => query.bind(*id.as_uuid()),
            MoveFilter::BySerial(id) => query.bind(*id.as_uuid()),
            MoveFilter::ByWarehouse(id) => query.bind(*id.as_uuid()),
        };
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("moves", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let recorded = decode_move(row)?;
            // the SQL narrows by product and location; tracking is checked here
            if filter.matches(&recorded.stock_move) {
                out.push(recorded);
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub async fn reconcile(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, LedgerError> {
        self.recompute(ctx, false).await
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub async fn rebuild(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, LedgerError> {
        let report = self.recompute(ctx, true).await?;
        info!(checked = report.checked, repaired = report.drifts.len(), "projection rebuilt");
        Ok(report)
    }

    async fn product_rows(
        &self,
        company_id: CompanyId,
        warehouse_id: WarehouseId,
        selector: &StockSelector,
    ) -> Result<Vec<InventoryItem>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {ROW_COLUMNS} FROM inventory_items
             WHERE company_id = $1 AND warehouse_id = $2 AND product_id = $3
               AND variant_id IS NOT DISTINCT FROM $4"
        ))
        .bind(company_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .bind(selector.product.product_id.as_uuid())
        .bind(selector.product.variant_id.map(|v| *v.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("product_rows", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let item = decode_item(company_id, row)?;
            if selector.matches(&item.key) {
                out.push(item);
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn recompute(&self, ctx: &CompanyContext, repair: bool) -> Result<ReconciliationReport, LedgerError> {
        let company_id = ctx.company_id();
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        if repair {
            // every row, then the head: appends wait until the rebuild commits
            sqlx::query("SELECT row_key FROM inventory_items WHERE company_id = $1 ORDER BY row_key FOR UPDATE")
                .bind(company_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("lock_all_rows", e))?;
            lock_head(&mut tx, company_id).await?;
        } else {
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("snapshot", e))?;
        }

        let rows = sqlx::query(&format!(
            "SELECT {ROW_COLUMNS} FROM inventory_items WHERE company_id = $1"
        ))
        .bind(company_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_rows", e))?;
        let mut projected = BTreeMap::new();
        for row in &rows {
            let item = decode_item(company_id, row)?;
            projected.insert(item.key, item);
        }

        let history = sqlx::query("SELECT sequence, recorded_at, payload FROM stock_moves WHERE company_id = $1 ORDER BY sequence")
            .bind(company_id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_moves", e))?
            .iter()
            .map(|row| decode_move(row).map(|m| m.to_envelope()))
            .collect::<Result<Vec<_>, _>>()?;
        let (projection, _) =
            ProjectionRunner::rebuild_from_scratch(company_id, StockProjection::default, &history)
                .map_err(|e| LedgerError::Storage(format!("ledger replay failed: {e}")))?;

        let holds = load_holds(&mut tx, company_id, None).await?;
        let held = plan::held_per_row(&holds);

        let mut keys: BTreeSet<StockKey> = projected.keys().copied().collect();
        keys.extend(projection.keys().copied());
        keys.extend(held.keys().copied());

        let mut report = ReconciliationReport::default();
        for key in keys {
            let ledger_on_hand = projection.on_hand(&key);
            let held_reserved = held.get(&key).copied().unwrap_or(Decimal::ZERO);
            let (warehouse_id, current) = match projected.get(&key) {
                Some(row) => (row.warehouse_id, (row.qty_on_hand, row.qty_reserved)),
                None => (
                    self.locations.location(ctx, key.location_id)?.warehouse_id,
                    (Decimal::ZERO, Decimal::ZERO),
                ),
            };
            report.checked += 1;
            let Some(drift) = plan::drift(key, warehouse_id, current, ledger_on_hand, held_reserved) else {
                continue;
            };
            report.drifts.push(drift);

            if repair {
                let fixed = InventoryItem::empty(company_id, warehouse_id, key)
                    .with_quantities(ledger_on_hand, held_reserved);
                upsert_row(&mut tx, &fixed).await?;
            }
        }
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

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
}

impl InventoryLedger for PostgresLedger {
    fn append_with(
        &self,
        ctx: &CompanyContext,
        batch: LedgerBatch,
        on_commit: &mut CommitHook<'_>,
    ) -> Result<Committed, LedgerError> {
        self.block_on(PostgresLedger::append_with(self, ctx, batch, on_commit))
    }

    fn reserve(
        &self,
        ctx: &CompanyContext,
        request: &HoldRequest,
        on_allocated: &mut AllocationHook<'_>,
    ) -> Result<Vec<AllocationLine>, LedgerError> {
        self.block_on(PostgresLedger::reserve(self, ctx, request, on_allocated))
    }

    fn item(&self, ctx: &CompanyContext, key: &StockKey) -> Result<Option<InventoryItem>, LedgerError> {
        self.block_on(PostgresLedger::item(self, ctx, key))
    }

    fn items(&self, ctx: &CompanyContext, warehouse_id: WarehouseId) -> Result<Vec<InventoryItem>, LedgerError> {
        self.block_on(PostgresLedger::items(self, ctx, warehouse_id))
    }

    fn availability(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
        selector: &StockSelector,
    ) -> Result<Availability, LedgerError> {
        self.block_on(PostgresLedger::availability(self, ctx, warehouse_id, selector))
    }

    fn moves(&self, ctx: &CompanyContext, filter: &MoveFilter) -> Result<Vec<RecordedMove>, LedgerError> {
        self.block_on(PostgresLedger::moves(self, ctx, filter))
    }

    fn reconcile(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, LedgerError> {
        self.block_on(PostgresLedger::reconcile(self, ctx))
    }

    fn rebuild(&self, ctx: &CompanyContext) -> Result<ReconciliationReport, LedgerError> {
        self.block_on(PostgresLedger::rebuild(self, ctx))
    }
}

fn row_key(key: &StockKey) -> Result<String, LedgerError> {
    serde_json::to_string(key).map_err(|e| LedgerError::Storage(format!("failed to encode stock key: {e}")))
}

fn decode_item(company_id: CompanyId, row: &PgRow) -> Result<InventoryItem, LedgerError> {
    let Json(key): Json<StockKey> = row.try_get("stock_key").map_err(|e| map_sqlx_error("decode_row", e))?;
    let warehouse_id: Uuid = row.try_get("warehouse_id").map_err(|e| map_sqlx_error("decode_row", e))?;
    let on_hand: Decimal = row.try_get("qty_on_hand").map_err(|e| map_sqlx_error("decode_row", e))?;
    let reserved: Decimal = row.try_get("qty_reserved").map_err(|e| map_sqlx_error("decode_row", e))?;
    Ok(InventoryItem::empty(company_id, WarehouseId::from_uuid(warehouse_id), key).with_quantities(on_hand, reserved))
}

fn decode_move(row: &PgRow) -> Result<RecordedMove, LedgerError> {
    let sequence: i64 = row.try_get("sequence").map_err(|e| map_sqlx_error("decode_move", e))?;
    let recorded_at: DateTime<Utc> = row.try_get("recorded_at").map_err(|e| map_sqlx_error("decode_move", e))?;
    let Json(stock_move): Json<StockMove> = row.try_get("payload").map_err(|e| map_sqlx_error("decode_move", e))?;
    Ok(RecordedMove {
        sequence: sequence as u64,
        recorded_at,
        stock_move,
    })
}

/// Insert an empty row for every key not stored yet, in key order.
async fn ensure_rows(
    tx: &mut Transaction<'_, Postgres>,
    company_id: CompanyId,
    keys: &BTreeMap<StockKey, WarehouseId>,
) -> Result<(), LedgerError> {
    for (key, warehouse_id) in keys {
        sqlx::query(
            r#"
            INSERT INTO inventory_items (
                company_id, row_key, warehouse_id, location_id, product_id, variant_id, stock_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (company_id, row_key) DO NOTHING
            "#,
        )
        .bind(company_id.as_uuid())
        .bind(row_key(key)?)
        .bind(warehouse_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(key.product.product_id.as_uuid())
        .bind(key.product.variant_id.map(|v| *v.as_uuid()))
        .bind(Json(*key))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("ensure_row", e))?;
    }
    Ok(())
}

async fn lock_rows<'a>(
    tx: &mut Transaction<'_, Postgres>,
    company_id: CompanyId,
    keys: impl IntoIterator<Item = &'a StockKey>,
) -> Result<BTreeMap<StockKey, InventoryItem>, LedgerError> {
    let row_keys = keys.into_iter().map(row_key).collect::<Result<Vec<_>, _>>()?;
    if row_keys.is_empty() {
        return Ok(BTreeMap::new());
    }
    let rows = sqlx::query(&format!(
        "SELECT {ROW_COLUMNS} FROM inventory_items
         WHERE company_id = $1 AND row_key = ANY($2)
         ORDER BY row_key
         FOR UPDATE"
    ))
    .bind(company_id.as_uuid())
    .bind(&row_keys)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_rows", e))?;

    let mut out = BTreeMap::new();
    for row in &rows {
        let item = decode_item(company_id, row)?;
        out.insert(item.key, item);
    }
    Ok(out)
}

async fn lock_holds(
    tx: &mut Transaction<'_, Postgres>,
    company_id: CompanyId,
    reservations: &BTreeSet<Uuid>,
) -> Result<Holds, LedgerError> {
    if reservations.is_empty() {
        return Ok(Holds::new());
    }
    let ids: Vec<Uuid> = reservations.iter().copied().collect();
    load_holds(tx, company_id, Some(&ids)).await
}

async fn load_holds(
    tx: &mut Transaction<'_, Postgres>,
    company_id: CompanyId,
    reservations: Option<&[Uuid]>,
) -> Result<Holds, LedgerError> {
    let rows = match reservations {
        Some(ids) => sqlx::query(
            "SELECT reservation_id, stock_key, qty FROM reservation_holds
             WHERE company_id = $1 AND reservation_id = ANY($2)
             ORDER BY reservation_id, row_key
             FOR UPDATE",
        )
        .bind(company_id.as_uuid())
        .bind(ids)
        .fetch_all(&mut **tx)
        .await,
        None => sqlx::query("SELECT reservation_id, stock_key, qty FROM reservation_holds WHERE company_id = $1")
            .bind(company_id.as_uuid())
            .fetch_all(&mut **tx)
            .await,
    }
    .map_err(|e| map_sqlx_error("load_holds", e))?;

    let mut holds = Holds::new();
    for row in &rows {
        let reservation_id: Uuid = row.try_get("reservation_id").map_err(|e| map_sqlx_error("decode_hold", e))?;
        let Json(key): Json<StockKey> = row.try_get("stock_key").map_err(|e| map_sqlx_error("decode_hold", e))?;
        let qty: Decimal = row.try_get("qty").map_err(|e| map_sqlx_error("decode_hold", e))?;
        holds.entry(reservation_id.into()).or_default().insert(key, qty);
    }
    Ok(holds)
}

/// Replace the stored holds of every reservation in `holds`.
async fn write_holds(
    tx: &mut Transaction<'_, Postgres>,
    company_id: CompanyId,
    holds: &Holds,
) -> Result<(), LedgerError> {
    for (reservation_id, lines) in holds {
        sqlx::query("DELETE FROM reservation_holds WHERE company_id = $1 AND reservation_id = $2")
            .bind(company_id.as_uuid())
            .bind(reservation_id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("clear_holds", e))?;
        for (key, qty) in lines {
            sqlx::query(
                "INSERT INTO reservation_holds (company_id, reservation_id, row_key, stock_key, qty)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(company_id.as_uuid())
            .bind(reservation_id.as_uuid())
            .bind(row_key(key)?)
            .bind(Json(*key))
            .bind(*qty)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_hold", e))?;
        }
    }
    Ok(())
}

/// Lock the company head and return its last sequence.
async fn lock_head(tx: &mut Transaction<'_, Postgres>, company_id: CompanyId) -> Result<u64, LedgerError> {
    sqlx::query("INSERT INTO ledger_heads (company_id) VALUES ($1) ON CONFLICT (company_id) DO NOTHING")
        .bind(company_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("ensure_head", e))?;
    let last: i64 = sqlx::query_scalar("SELECT last_sequence FROM ledger_heads WHERE company_id = $1 FOR UPDATE")
        .bind(company_id.as_uuid())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_head", e))?;
    Ok(last as u64)
}

async fn insert_move(tx: &mut Transaction<'_, Postgres>, recorded: &RecordedMove) -> Result<(), LedgerError> {
    let m = &recorded.stock_move;
    sqlx::query(
        r#"
        INSERT INTO stock_moves (
            company_id, sequence, move_id, kind, warehouse_id, from_location, to_location,
            product_id, variant_id, lot_id, serial_id, ref_type, ref_id, qty,
            occurred_at, recorded_at, payload
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(m.company_id.as_uuid())
    .bind(recorded.sequence as i64)
    .bind(m.id.as_uuid())
    .bind(m.kind.as_str())
    .bind(m.warehouse_id.as_uuid())
    .bind(m.from_location.map(|id| *id.as_uuid()))
    .bind(m.to_location.map(|id| *id.as_uuid()))
    .bind(m.product.product_id.as_uuid())
    .bind(m.product.variant_id.map(|id| *id.as_uuid()))
    .bind(m.tracking.lot().map(|id| *id.as_uuid()))
    .bind(m.tracking.serial().map(|id| *id.as_uuid()))
    .bind(m.reference.map(|r| r.ref_type()))
    .bind(m.reference.map(|r| r.ref_id()))
    .bind(m.qty)
    .bind(m.occurred_at)
    .bind(recorded.recorded_at)
    .bind(Json(m.clone()))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_move", e))?;
    Ok(())
}

async fn update_row(tx: &mut Transaction<'_, Postgres>, row: &InventoryItem) -> Result<(), LedgerError> {
    sqlx::query(
        "UPDATE inventory_items SET qty_on_hand = $3, qty_reserved = $4, updated_at = NOW()
         WHERE company_id = $1 AND row_key = $2",
    )
    .bind(row.company_id.as_uuid())
    .bind(row_key(&row.key)?)
    .bind(row.qty_on_hand)
    .bind(row.qty_reserved)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_row", e))?;
    Ok(())
}

async fn upsert_row(tx: &mut Transaction<'_, Postgres>, row: &InventoryItem) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO inventory_items (
            company_id, row_key, warehouse_id, location_id, product_id, variant_id, stock_key,
            qty_on_hand, qty_reserved
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (company_id, row_key)
        DO UPDATE SET
            qty_on_hand = EXCLUDED.qty_on_hand,
            qty_reserved = EXCLUDED.qty_reserved,
            updated_at = NOW()
        "#,
    )
    .bind(row.company_id.as_uuid())
    .bind(row_key(&row.key)?)
    .bind(row.warehouse_id.as_uuid())
    .bind(row.key.location_id.as_uuid())
    .bind(row.key.product.product_id.as_uuid())
    .bind(row.key.product.variant_id.map(|v| *v.as_uuid()))
    .bind(Json(row.key))
    .bind(row.qty_on_hand)
    .bind(row.qty_reserved)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("upsert_row", e))?;
    Ok(())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => LedgerError::Conflict(msg),
                Some("23514") => {
                    error!(operation, "database check rejected the change");
                    LedgerError::InvariantViolation(msg)
                }
                _ => LedgerError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => LedgerError::Storage(format!("connection pool closed in {operation}")),
        other => LedgerError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use stockledger_core::AggregateRoot;
    use stockledger_inventory::{
        AllocationPolicy, LocationId, LocationType, MoveType, OrderId, OrderItemId, ProductId,
        ProductRef, ReservationId, Tracking,
    };

    use super::*;
    use crate::config::EngineConfig;
    use crate::service::{InventoryService, ReserveOutcome};
    use crate::services::ReserveRequest;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    struct Fixture {
        ctx: CompanyContext,
        ledger: PostgresLedger,
        locations: Arc<LocationRegistry>,
        identities: Arc<IdentityRegistry>,
        warehouse_id: WarehouseId,
        pick: LocationId,
        product: ProductRef,
    }

    async fn fixture() -> Fixture {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let config = PostgresConfig {
            url: Some(url),
            max_connections: 4,
        };
        let locations = Arc::new(LocationRegistry::new());
        let identities = Arc::new(IdentityRegistry::new());
        let ledger = PostgresLedger::connect(&config, locations.clone(), identities.clone(), 4)
            .await
            .unwrap();
        ledger.migrate().await.unwrap();

        let ctx = CompanyContext::new(CompanyId::new());
        let warehouse_id = WarehouseId::new();
        locations.add_warehouse(&ctx, warehouse_id, "W1", "Main").unwrap();
        let pick = LocationId::new();
        locations
            .add_location(&ctx, warehouse_id, pick, "A-01", LocationType::Pick)
            .unwrap();
        Fixture {
            ctx,
            ledger,
            locations,
            identities,
            warehouse_id,
            pick,
            product: ProductRef::product(ProductId::new()),
        }
    }

    fn adjustment(f: &Fixture, qty: Decimal) -> StockMove {
        StockMove::new(
            f.ctx.company_id(),
            MoveType::Adjustment,
            f.warehouse_id,
            f.product,
            Tracking::Untracked,
            qty,
            Utc::now(),
        )
        .to_location(f.pick)
    }

    #[test]
    #[ignore = "needs DATABASE_URL"]
    fn appends_number_moves_and_reject_overdraws() {
        runtime().block_on(async {
            let f = fixture().await;
            let first = f
                .ledger
                .append(&f.ctx, LedgerBatch::new().with_moves([adjustment(&f, dec!(5))]))
                .await
                .unwrap();
            assert_eq!(first.moves[0].sequence, 1);

            let err = f
                .ledger
                .append(&f.ctx, LedgerBatch::new().with_moves([adjustment(&f, dec!(-6))]))
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvariantViolation(_)));

            let key = StockKey::new(f.pick, f.product, Tracking::Untracked);
            let row = f.ledger.item(&f.ctx, &key).await.unwrap().unwrap();
            assert_eq!(row.qty_on_hand, dec!(5));
            assert_eq!(f.ledger.moves(&f.ctx, &MoveFilter::All).await.unwrap().len(), 1);
        });
    }

    #[test]
    #[ignore = "needs DATABASE_URL"]
    fn holds_survive_a_rebuild() {
        runtime().block_on(async {
            let f = fixture().await;
            f.ledger
                .append(&f.ctx, LedgerBatch::new().with_moves([adjustment(&f, dec!(10))]))
                .await
                .unwrap();
            let request = HoldRequest {
                reservation_id: ReservationId::new(),
                warehouse_id: f.warehouse_id,
                selector: StockSelector::any(f.product),
                qty: dec!(4),
                policy: AllocationPolicy::LocationOrder,
                as_of: Utc::now().date_naive(),
                skip_expired: true,
            };
            f.ledger.reserve(&f.ctx, &request, &mut |_| Ok(())).await.unwrap();

            let availability = f
                .ledger
                .availability(&f.ctx, f.warehouse_id, &StockSelector::any(f.product))
                .await
                .unwrap();
            assert_eq!(availability.available, dec!(6));

            let report = f.ledger.rebuild(&f.ctx).await.unwrap();
            assert!(report.is_consistent());
            assert_eq!(f.ledger.reconcile(&f.ctx).await.unwrap(), report);
        });
    }

    #[test]
    #[ignore = "needs DATABASE_URL"]
    fn the_workflow_services_run_on_postgres() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let f = runtime.block_on(fixture());
        let service = InventoryService::new(
            EngineConfig::default(),
            Arc::new(f.ledger.clone()),
            f.locations.clone(),
            f.identities.clone(),
        );

        service.ledger().append_move(&f.ctx, adjustment(&f, dec!(10))).unwrap();
        let outcome = service
            .reserve_stock(
                &f.ctx,
                ReserveRequest {
                    order_id: OrderId::new(),
                    order_item_id: OrderItemId::new(),
                    warehouse_id: f.warehouse_id,
                    selector: StockSelector::any(f.product),
                    qty: dec!(4),
                },
            )
            .unwrap();
        let ReserveOutcome::Reserved { reservation_id } = outcome else {
            panic!("ten on hand should cover four");
        };
        let availability = service
            .get_availability(&f.ctx, f.warehouse_id, &StockSelector::any(f.product))
            .unwrap();
        assert_eq!(availability.available, dec!(6));

        let wave = service
            .plan_wave(&f.ctx, f.warehouse_id, &[reservation_id], None)
            .unwrap();
        service
            .complete_task(&f.ctx, *wave.id(), wave.tasks()[0].id, dec!(4))
            .unwrap();

        let key = StockKey::new(f.pick, f.product, Tracking::Untracked);
        let row = service.ledger().item(&f.ctx, &key).unwrap().unwrap();
        assert_eq!((row.qty_on_hand, row.qty_reserved), (dec!(6), dec!(0)));
        assert!(service.reconcile(&f.ctx).unwrap().is_consistent());
    }
}
