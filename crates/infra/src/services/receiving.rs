use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use stockledger_core::{AggregateRoot, CompanyContext, ExpectedVersion};
use stockledger_inventory::receipt::{
    CreateReceipt, PutAwayQty, Receipt, ReceiptCommand, ReceiptEvent, ReceiveQty,
};
use stockledger_inventory::{LocationId, LocationType, ReceiptId, ReceiptItemId};

use super::{decide, ensure_company, ensure_in_warehouse};
use crate::config::ReceivingConfig;
use crate::error::LedgerError;
use crate::ledger::{InventoryLedger, LedgerBatch};
use crate::registry::{IdentityRegistry, LocationRegistry};
use crate::store::DocumentStore;

/// Receipts: goods received into an inbound location, then put away.
#[derive(Debug)]
pub struct ReceivingService<L> {
    ledger: Arc<L>,
    locations: Arc<LocationRegistry>,
    identities: Arc<IdentityRegistry>,
    receipts: DocumentStore<Receipt>,
    config: ReceivingConfig,
}

impl<L> ReceivingService<L>
where
    L: InventoryLedger,
{
    pub fn new(
        ledger: Arc<L>,
        locations: Arc<LocationRegistry>,
        identities: Arc<IdentityRegistry>,
        config: ReceivingConfig,
    ) -> Self {
        Self {
            ledger,
            locations,
            identities,
            receipts: DocumentStore::new("receipt"),
            config,
        }
    }

    #[instrument(skip(self, ctx, command), fields(company_id = %ctx.company_id(), receipt_id = %command.receipt_id))]
    pub fn create(&self, ctx: &CompanyContext, command: CreateReceipt) -> Result<Receipt, LedgerError> {
        ensure_company(ctx, command.company_id, "receipt")?;
        let inbound = self.locations.location(ctx, command.inbound_location)?;
        ensure_in_warehouse(&inbound, command.warehouse_id)?;
        inbound.ensure_kind(&[LocationType::Inbound])?;
        for item in &command.items {
            self.identities
                .ensure_tracking(ctx, item.product.product_id, item.tracking)?;
        }

        let receipt_id = command.receipt_id;
        let (receipt, _) = decide(&Receipt::empty(receipt_id), &ReceiptCommand::Create(command))?;
        self.receipts.insert(ctx, receipt.clone())?;
        info!(items = receipt.items().len(), "receipt created");
        Ok(receipt)
    }

    /// Receive `qty` of one item into the receipt's inbound location.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn receive(
        &self,
        ctx: &CompanyContext,
        receipt_id: ReceiptId,
        item_id: ReceiptItemId,
        qty: Decimal,
    ) -> Result<Receipt, LedgerError> {
        let command = ReceiptCommand::Receive(ReceiveQty {
            company_id: ctx.company_id(),
            item_id,
            qty,
            allow_over_receipt: self.config.allow_over_receipt,
            occurred_at: Utc::now(),
        });
        self.execute(ctx, receipt_id, &command)
    }

    /// Move received stock into storage; `qty: None` moves everything still
    /// waiting in the inbound location.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn putaway(
        &self,
        ctx: &CompanyContext,
        receipt_id: ReceiptId,
        item_id: ReceiptItemId,
        to_location: LocationId,
        qty: Option<Decimal>,
    ) -> Result<Receipt, LedgerError> {
        let command = ReceiptCommand::PutAway(PutAwayQty {
            company_id: ctx.company_id(),
            item_id,
            to_location,
            qty,
            occurred_at: Utc::now(),
        });
        self.execute(ctx, receipt_id, &command)
    }

    pub fn get(&self, ctx: &CompanyContext, receipt_id: ReceiptId) -> Result<Receipt, LedgerError> {
        self.receipts.get(ctx, &receipt_id)
    }

    fn execute(
        &self,
        ctx: &CompanyContext,
        receipt_id: ReceiptId,
        command: &ReceiptCommand,
    ) -> Result<Receipt, LedgerError> {
        self.receipts
            .update(ctx, &receipt_id, ExpectedVersion::Any, |receipt| {
                let (next, events) = decide(receipt, command)?;
                let moves = events.iter().filter_map(ReceiptEvent::stock_move).cloned();
                self.ledger.append(ctx, LedgerBatch::new().with_moves(moves))?;

                if next.status() != receipt.status() {
                    info!(
                        receipt_id = %receipt.id(),
                        status = next.status().as_str(),
                        "receipt status changed"
                    );
                }
                *receipt = next;
                Ok(receipt.clone())
            })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use stockledger_inventory::receipt::{NewReceiptItem, ReceiptItemStatus, ReceiptStatus};
    use stockledger_inventory::{MoveType, Tracking};

    use super::*;
    use crate::ledger::{InMemoryLedger, MoveFilter};
    use crate::services::testkit::Kit;

    fn service(kit: &Kit, allow_over_receipt: bool) -> ReceivingService<InMemoryLedger> {
        ReceivingService::new(
            kit.ledger.clone(),
            kit.locations.clone(),
            kit.identities.clone(),
            ReceivingConfig { allow_over_receipt },
        )
    }

    fn create(kit: &Kit, service: &ReceivingService<InMemoryLedger>, expected: Decimal) -> (ReceiptId, ReceiptItemId) {
        let receipt_id = ReceiptId::new();
        let item_id = ReceiptItemId::new();
        service
            .create(
                &kit.ctx,
                CreateReceipt {
                    company_id: kit.ctx.company_id(),
                    receipt_id,
                    warehouse_id: kit.warehouse_id,
                    inbound_location: kit.inbound,
                    items: vec![NewReceiptItem {
                        item_id,
                        product: kit.product,
                        tracking: Tracking::Untracked,
                        qty_expected: expected,
                    }],
                    occurred_at: Utc::now(),
                },
            )
            .unwrap();
        (receipt_id, item_id)
    }

    #[test]
    fn partial_receipts_accumulate_up_to_the_expected_quantity() {
        let kit = Kit::new();
        let service = service(&kit, false);
        let (receipt_id, item_id) = create(&kit, &service, dec!(20));

        let receipt = service.receive(&kit.ctx, receipt_id, item_id, dec!(12)).unwrap();
        assert_eq!(receipt.item(item_id).unwrap().status(), ReceiptItemStatus::PartiallyReceived);
        assert_eq!(receipt.status(), ReceiptStatus::Draft);

        let receipt = service.receive(&kit.ctx, receipt_id, item_id, dec!(8)).unwrap();
        assert_eq!(receipt.item(item_id).unwrap().qty_received, dec!(20));
        assert_eq!(receipt.status(), ReceiptStatus::Received);

        let err = service.receive(&kit.ctx, receipt_id, item_id, dec!(1)).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let moves = kit
            .ledger
            .moves(&kit.ctx, &MoveFilter::ByDocument { ref_type: "receipt", ref_id: receipt_id.into() })
            .unwrap();
        let qtys: Vec<_> = moves.iter().map(|m| (m.stock_move.kind, m.stock_move.qty)).collect();
        assert_eq!(qtys, vec![(MoveType::Receipt, dec!(12)), (MoveType::Receipt, dec!(8))]);
        assert_eq!(kit.on_hand(kit.inbound), dec!(20));
    }

    #[test]
    fn over_receipt_is_allowed_only_when_configured() {
        let kit = Kit::new();
        let service = service(&kit, true);
        let (receipt_id, item_id) = create(&kit, &service, dec!(5));

        let receipt = service.receive(&kit.ctx, receipt_id, item_id, dec!(7)).unwrap();
        assert_eq!(receipt.item(item_id).unwrap().qty_received, dec!(7));
    }

    #[test]
    fn putaway_relocates_in_parts_and_closes_the_receipt() {
        let kit = Kit::new();
        let service = service(&kit, false);
        let (receipt_id, item_id) = create(&kit, &service, dec!(10));
        service.receive(&kit.ctx, receipt_id, item_id, dec!(10)).unwrap();

        service
            .putaway(&kit.ctx, receipt_id, item_id, kit.pick_a, Some(dec!(4)))
            .unwrap();
        let receipt = service
            .putaway(&kit.ctx, receipt_id, item_id, kit.bulk_b, None)
            .unwrap();

        assert_eq!(receipt.status(), ReceiptStatus::Putaway);
        assert_eq!(kit.on_hand(kit.inbound), dec!(0));
        assert_eq!(kit.on_hand(kit.pick_a), dec!(4));
        assert_eq!(kit.on_hand(kit.bulk_b), dec!(6));
    }

    #[test]
    fn putaway_into_a_staging_location_is_rejected_untouched() {
        let kit = Kit::new();
        let service = service(&kit, false);
        let (receipt_id, item_id) = create(&kit, &service, dec!(3));
        let before = service.receive(&kit.ctx, receipt_id, item_id, dec!(3)).unwrap();

        let err = service
            .putaway(&kit.ctx, receipt_id, item_id, kit.staging, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(service.get(&kit.ctx, receipt_id).unwrap(), before);
        assert_eq!(kit.on_hand(kit.inbound), dec!(3));
    }

    #[test]
    fn receipts_must_target_an_inbound_location() {
        let kit = Kit::new();
        let service = service(&kit, false);
        let err = service
            .create(
                &kit.ctx,
                CreateReceipt {
                    company_id: kit.ctx.company_id(),
                    receipt_id: ReceiptId::new(),
                    warehouse_id: kit.warehouse_id,
                    inbound_location: kit.pick_a,
                    items: vec![NewReceiptItem {
                        item_id: ReceiptItemId::new(),
                        product: kit.product,
                        tracking: Tracking::Untracked,
                        qty_expected: dec!(1),
                    }],
                    occurred_at: Utc::now(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
