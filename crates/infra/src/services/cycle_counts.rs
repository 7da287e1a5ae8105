use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use stockledger_core::{CompanyContext, ExpectedVersion};
use stockledger_inventory::cycle_count::{CreateCycleCount, CycleCount, CycleCountCommand};
use stockledger_inventory::CycleCountId;

use super::{decide, ensure_company, ensure_in_warehouse};
use crate::error::LedgerError;
use crate::ledger::{InventoryLedger, LedgerBatch};
use crate::registry::{IdentityRegistry, LocationRegistry};
use crate::store::DocumentStore;

/// Physical counts, reconciled against the rows at the moment they post.
#[derive(Debug)]
pub struct CycleCountService<L> {
    ledger: Arc<L>,
    locations: Arc<LocationRegistry>,
    identities: Arc<IdentityRegistry>,
    counts: DocumentStore<CycleCount>,
}

impl<L> CycleCountService<L>
where
    L: InventoryLedger,
{
    pub fn new(ledger: Arc<L>, locations: Arc<LocationRegistry>, identities: Arc<IdentityRegistry>) -> Self {
        Self {
            ledger,
            locations,
            identities,
            counts: DocumentStore::new("cycle count"),
        }
    }

    #[instrument(skip(self, ctx, command), fields(company_id = %ctx.company_id(), count_id = %command.count_id))]
    pub fn create(&self, ctx: &CompanyContext, command: CreateCycleCount) -> Result<CycleCount, LedgerError> {
        ensure_company(ctx, command.company_id, "cycle count")?;
        self.locations.warehouse(ctx, command.warehouse_id)?;
        for item in &command.items {
            let location = self.locations.location(ctx, item.location_id)?;
            ensure_in_warehouse(&location, command.warehouse_id)?;
            self.identities
                .ensure_tracking(ctx, item.product.product_id, item.tracking)?;
        }

        let count_id = command.count_id;
        let (count, _) = decide(&CycleCount::empty(count_id), &CycleCountCommand::Create(command))?;
        self.counts.insert(ctx, count.clone())?;
        Ok(count)
    }

    /// Post the count: every item is compared with its row under the row lock
    /// and the difference becomes an adjustment move in the same batch.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn post(&self, ctx: &CompanyContext, count_id: CycleCountId) -> Result<CycleCount, LedgerError> {
        let company_id = ctx.company_id();
        let occurred_at = Utc::now();
        self.counts
            .update(ctx, &count_id, ExpectedVersion::Any, |count| {
                let (posted, events) = decide(count, &CycleCountCommand::Post { company_id, occurred_at })?;
                let lines = events.iter().flat_map(|e| e.count_lines().iter().copied());

                let mut recorded = None;
                let committed = self.ledger.append_with(
                    ctx,
                    LedgerBatch::new().with_counts(lines),
                    &mut |committed| {
                        let command = CycleCountCommand::RecordVariances {
                            company_id,
                            variances: committed.counts.clone(),
                            occurred_at,
                        };
                        let (next, _) = decide(&posted, &command)?;
                        recorded = Some(next);
                        Ok(())
                    },
                )?;
                let next = recorded
                    .ok_or_else(|| LedgerError::Storage("cycle count variances were not recorded".into()))?;

                info!(
                    count_id = %count_id,
                    adjustments = committed.moves.len(),
                    "cycle count posted"
                );
                *count = next;
                Ok(count.clone())
            })
    }

    pub fn get(&self, ctx: &CompanyContext, count_id: CycleCountId) -> Result<CycleCount, LedgerError> {
        self.counts.get(ctx, &count_id)
    }
}
