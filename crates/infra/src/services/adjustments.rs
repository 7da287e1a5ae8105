use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use stockledger_core::{CompanyContext, ExpectedVersion};
use stockledger_inventory::adjustment::{Adjustment, AdjustmentCommand, CreateAdjustment};
use stockledger_inventory::AdjustmentId;

use super::{decide, ensure_company, ensure_in_warehouse};
use crate::error::LedgerError;
use crate::ledger::{Committed, InventoryLedger, LedgerBatch};
use crate::registry::{IdentityRegistry, LocationRegistry};
use crate::store::DocumentStore;

/// Manual signed corrections of on-hand stock.
#[derive(Debug)]
pub struct AdjustmentService<L> {
    ledger: Arc<L>,
    locations: Arc<LocationRegistry>,
    identities: Arc<IdentityRegistry>,
    adjustments: DocumentStore<Adjustment>,
}

impl<L> AdjustmentService<L>
where
    L: InventoryLedger,
{
    pub fn new(ledger: Arc<L>, locations: Arc<LocationRegistry>, identities: Arc<IdentityRegistry>) -> Self {
        Self {
            ledger,
            locations,
            identities,
            adjustments: DocumentStore::new("adjustment"),
        }
    }

    #[instrument(skip(self, ctx, command), fields(company_id = %ctx.company_id(), adjustment_id = %command.adjustment_id))]
    pub fn create(&self, ctx: &CompanyContext, command: CreateAdjustment) -> Result<Adjustment, LedgerError> {
        ensure_company(ctx, command.company_id, "adjustment")?;
        self.locations.warehouse(ctx, command.warehouse_id)?;
        for item in &command.items {
            let location = self.locations.location(ctx, item.location_id)?;
            ensure_in_warehouse(&location, command.warehouse_id)?;
            self.identities
                .ensure_tracking(ctx, item.product.product_id, item.tracking)?;
        }

        let adjustment_id = command.adjustment_id;
        let (adjustment, _) = decide(&Adjustment::empty(adjustment_id), &AdjustmentCommand::Create(command))?;
        self.adjustments.insert(ctx, adjustment.clone())?;
        Ok(adjustment)
    }

    /// Append one adjustment move per non-zero item. Posting twice is a conflict.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn post(
        &self,
        ctx: &CompanyContext,
        adjustment_id: AdjustmentId,
    ) -> Result<(Adjustment, Committed), LedgerError> {
        let command = AdjustmentCommand::Post {
            company_id: ctx.company_id(),
            occurred_at: Utc::now(),
        };
        self.adjustments
            .update(ctx, &adjustment_id, ExpectedVersion::Any, |adjustment| {
                let (next, events) = decide(adjustment, &command)?;
                let moves = events.iter().flat_map(|e| e.moves().iter().cloned());
                let committed = self.ledger.append(ctx, LedgerBatch::new().with_moves(moves))?;

                info!(
                    adjustment_id = %adjustment_id,
                    moves = committed.moves.len(),
                    "adjustment posted"
                );
                *adjustment = next;
                Ok((adjustment.clone(), committed))
            })
    }

    pub fn get(&self, ctx: &CompanyContext, adjustment_id: AdjustmentId) -> Result<Adjustment, LedgerError> {
        self.adjustments.get(ctx, &adjustment_id)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use stockledger_core::{AggregateRoot, CompanyId};
    use stockledger_inventory::adjustment::{AdjustmentItem, AdjustmentStatus};
    use stockledger_inventory::{AdjustmentItemId, LocationId, Tracking};

    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::services::testkit::Kit;

    fn service(kit: &Kit) -> AdjustmentService<InMemoryLedger> {
        AdjustmentService::new(kit.ledger.clone(), kit.locations.clone(), kit.identities.clone())
    }

    fn command(kit: &Kit, items: &[(LocationId, Decimal)]) -> CreateAdjustment {
        CreateAdjustment {
            company_id: kit.ctx.company_id(),
            adjustment_id: AdjustmentId::new(),
            warehouse_id: kit.warehouse_id,
            items: items
                .iter()
                .map(|(location_id, delta)| AdjustmentItem {
                    id: AdjustmentItemId::new(),
                    location_id: *location_id,
                    product: kit.product,
                    tracking: Tracking::Untracked,
                    delta: *delta,
                    reason: "damaged".into(),
                })
                .collect(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn posting_applies_signed_deltas_once() {
        let kit = Kit::new();
        let service = service(&kit);
        kit.stock(kit.pick_a, dec!(10));

        let adjustment = service
            .create(&kit.ctx, command(&kit, &[(kit.pick_a, dec!(-3)), (kit.bulk_b, dec!(5)), (kit.bulk_b, dec!(0))]))
            .unwrap();
        assert_eq!(adjustment.status(), AdjustmentStatus::Draft);

        let adjustment_id = *adjustment.id();
        let (posted, committed) = service.post(&kit.ctx, adjustment_id).unwrap();
        assert_eq!(posted.status(), AdjustmentStatus::Posted);
        assert_eq!(committed.moves.len(), 2);
        assert_eq!(kit.on_hand(kit.pick_a), dec!(7));
        assert_eq!(kit.on_hand(kit.bulk_b), dec!(5));

        assert!(matches!(service.post(&kit.ctx, adjustment_id), Err(LedgerError::Conflict(_))));
        assert_eq!(kit.on_hand(kit.pick_a), dec!(7));
    }

    #[test]
    fn a_negative_delta_beyond_on_hand_writes_nothing() {
        let kit = Kit::new();
        let service = service(&kit);
        kit.stock(kit.pick_a, dec!(2));
        kit.stock(kit.bulk_b, dec!(2));

        let command = command(&kit, &[(kit.bulk_b, dec!(-1)), (kit.pick_a, dec!(-3))]);
        let adjustment_id = command.adjustment_id;
        service.create(&kit.ctx, command).unwrap();

        let err = service.post(&kit.ctx, adjustment_id).unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
        assert_eq!(service.get(&kit.ctx, adjustment_id).unwrap().status(), AdjustmentStatus::Draft);
        assert_eq!(kit.on_hand(kit.bulk_b), dec!(2));
        assert_eq!(kit.on_hand(kit.pick_a), dec!(2));
    }

    #[test]
    fn commands_for_another_company_are_rejected() {
        let kit = Kit::new();
        let service = service(&kit);
        let other = CompanyContext::new(CompanyId::new());

        let err = service.create(&other, command(&kit, &[(kit.pick_a, dec!(1))])).unwrap_err();
        assert!(matches!(err, LedgerError::TenantIsolation(_)));
    }
}
