use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use stockledger_core::{AggregateRoot, CompanyContext, ExpectedVersion};
use stockledger_inventory::transfer::{
    CreateTransfer, TransferCommand, TransferLine, TransferOrder, TransferRoute,
};
use stockledger_inventory::{LocationId, LocationType, TransferOrderId};

use super::decide;
use crate::error::LedgerError;
use crate::ledger::{InventoryLedger, LedgerBatch};
use crate::registry::{IdentityRegistry, LocationRegistry};
use crate::store::DocumentStore;

const STORAGE_KINDS: [LocationType; 3] = [LocationType::Pick, LocationType::Bulk, LocationType::Buffer];

/// Inter-warehouse transfers through the destination's transit location.
#[derive(Debug)]
pub struct TransferService<L> {
    ledger: Arc<L>,
    locations: Arc<LocationRegistry>,
    identities: Arc<IdentityRegistry>,
    transfers: DocumentStore<TransferOrder>,
}

impl<L> TransferService<L>
where
    L: InventoryLedger,
{
    pub fn new(ledger: Arc<L>, locations: Arc<LocationRegistry>, identities: Arc<IdentityRegistry>) -> Self {
        Self {
            ledger,
            locations,
            identities,
            transfers: DocumentStore::new("transfer order"),
        }
    }

    #[instrument(skip(self, ctx, lines), fields(company_id = %ctx.company_id(), lines = lines.len()))]
    pub fn create(
        &self,
        ctx: &CompanyContext,
        source_location: LocationId,
        destination_location: LocationId,
        lines: Vec<TransferLine>,
    ) -> Result<TransferOrder, LedgerError> {
        let source = self.locations.location(ctx, source_location)?;
        source.ensure_active()?;
        source.ensure_kind(&STORAGE_KINDS)?;
        let destination = self.locations.location(ctx, destination_location)?;
        destination.ensure_active()?;
        destination.ensure_kind(&STORAGE_KINDS)?;
        for line in &lines {
            self.identities
                .ensure_tracking(ctx, line.product.product_id, line.tracking)?;
        }
        let transit = self.locations.transit_location(ctx, destination.warehouse_id)?;

        let transfer_id = TransferOrderId::new();
        let command = TransferCommand::Create(CreateTransfer {
            company_id: ctx.company_id(),
            transfer_id,
            route: TransferRoute {
                source_warehouse: source.warehouse_id,
                source_location,
                destination_warehouse: destination.warehouse_id,
                transit_location: transit.id,
                destination_location,
            },
            lines,
            occurred_at: Utc::now(),
        });
        let (transfer, _) = decide(&TransferOrder::empty(transfer_id), &command)?;
        self.transfers.insert(ctx, transfer.clone())?;
        info!(transfer_id = %transfer_id, "transfer order created");
        Ok(transfer)
    }

    /// Move every line from the source location into transit.
    pub fn ship(&self, ctx: &CompanyContext, transfer_id: TransferOrderId) -> Result<TransferOrder, LedgerError> {
        let command = TransferCommand::Ship {
            company_id: ctx.company_id(),
            occurred_at: Utc::now(),
        };
        self.execute(ctx, transfer_id, &command)
    }

    /// Move every line out of transit into the destination location.
    pub fn receive(&self, ctx: &CompanyContext, transfer_id: TransferOrderId) -> Result<TransferOrder, LedgerError> {
        let command = TransferCommand::Receive {
            company_id: ctx.company_id(),
            occurred_at: Utc::now(),
        };
        self.execute(ctx, transfer_id, &command)
    }

    /// Only a draft transfer can be cancelled.
    pub fn cancel(&self, ctx: &CompanyContext, transfer_id: TransferOrderId) -> Result<TransferOrder, LedgerError> {
        let command = TransferCommand::Cancel {
            company_id: ctx.company_id(),
            occurred_at: Utc::now(),
        };
        self.execute(ctx, transfer_id, &command)
    }

    pub fn get(&self, ctx: &CompanyContext, transfer_id: TransferOrderId) -> Result<TransferOrder, LedgerError> {
        self.transfers.get(ctx, &transfer_id)
    }

    #[instrument(skip(self, ctx, command), fields(company_id = %ctx.company_id()))]
    fn execute(
        &self,
        ctx: &CompanyContext,
        transfer_id: TransferOrderId,
        command: &TransferCommand,
    ) -> Result<TransferOrder, LedgerError> {
        self.transfers
            .update(ctx, &transfer_id, ExpectedVersion::Any, |transfer| {
                let (next, events) = decide(transfer, command)?;
                let moves = events.iter().flat_map(|e| e.moves().iter().cloned());
                self.ledger.append(ctx, LedgerBatch::new().with_moves(moves))?;

                info!(
                    transfer_id = %transfer.id(),
                    status = next.status().as_str(),
                    "transfer order advanced"
                );
                *transfer = next;
                Ok(transfer.clone())
            })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use stockledger_inventory::transfer::TransferStatus;
    use stockledger_inventory::{StockKey, Tracking, WarehouseId};

    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::services::testkit::Kit;

    struct Setup {
        kit: Kit,
        service: TransferService<InMemoryLedger>,
        remote_pick: LocationId,
    }

    fn setup() -> Setup {
        let kit = Kit::new();
        let remote = WarehouseId::new();
        kit.locations.add_warehouse(&kit.ctx, remote, "W2", "Overflow").unwrap();
        let remote_pick = LocationId::new();
        kit.locations
            .add_location(&kit.ctx, remote, remote_pick, "R-01", LocationType::Pick)
            .unwrap();
        let service = TransferService::new(kit.ledger.clone(), kit.locations.clone(), kit.identities.clone());
        Setup {
            kit,
            service,
            remote_pick,
        }
    }

    fn line(kit: &Kit, qty: Decimal) -> TransferLine {
        TransferLine {
            product: kit.product,
            tracking: Tracking::Untracked,
            qty,
        }
    }

    #[test]
    fn stock_travels_through_transit_into_the_destination() {
        let s = setup();
        s.kit.stock(s.kit.pick_a, dec!(10));
        let transfer = s
            .service
            .create(&s.kit.ctx, s.kit.pick_a, s.remote_pick, vec![line(&s.kit, dec!(4))])
            .unwrap();
        let transit = transfer.route().transit_location;

        let shipped = s.service.ship(&s.kit.ctx, *transfer.id()).unwrap();
        assert_eq!(shipped.status(), TransferStatus::InTransit);
        assert_eq!(s.kit.on_hand(s.kit.pick_a), dec!(6));
        assert_eq!(s.kit.on_hand(transit), dec!(4));

        let received = s.service.receive(&s.kit.ctx, *transfer.id()).unwrap();
        assert_eq!(received.status(), TransferStatus::Received);
        assert_eq!(s.kit.on_hand(transit), dec!(0));
        let key = StockKey::new(s.remote_pick, s.kit.product, Tracking::Untracked);
        let row = s.kit.ledger.item(&s.kit.ctx, &key).unwrap().unwrap();
        assert_eq!(row.qty_on_hand, dec!(4));
    }

    #[test]
    fn shipping_more_than_on_hand_leaves_the_transfer_in_draft() {
        let s = setup();
        s.kit.stock(s.kit.pick_a, dec!(2));
        let transfer = s
            .service
            .create(&s.kit.ctx, s.kit.pick_a, s.remote_pick, vec![line(&s.kit, dec!(3))])
            .unwrap();

        let err = s.service.ship(&s.kit.ctx, *transfer.id()).unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
        assert_eq!(s.service.get(&s.kit.ctx, *transfer.id()).unwrap().status(), TransferStatus::Draft);
        assert_eq!(s.kit.on_hand(s.kit.pick_a), dec!(2));
    }

    #[test]
    fn only_draft_transfers_can_be_cancelled() {
        let s = setup();
        s.kit.stock(s.kit.pick_a, dec!(5));
        let shipped = s
            .service
            .create(&s.kit.ctx, s.kit.pick_a, s.remote_pick, vec![line(&s.kit, dec!(1))])
            .unwrap();
        s.service.ship(&s.kit.ctx, *shipped.id()).unwrap();
        assert!(matches!(
            s.service.cancel(&s.kit.ctx, *shipped.id()),
            Err(LedgerError::Conflict(_))
        ));

        let draft = s
            .service
            .create(&s.kit.ctx, s.kit.pick_a, s.remote_pick, vec![line(&s.kit, dec!(1))])
            .unwrap();
        let cancelled = s.service.cancel(&s.kit.ctx, *draft.id()).unwrap();
        assert_eq!(cancelled.status(), TransferStatus::Cancelled);
        assert_eq!(s.kit.on_hand(s.kit.pick_a), dec!(4));
    }

    #[test]
    fn transfers_within_one_warehouse_are_rejected() {
        let s = setup();
        let err = s
            .service
            .create(&s.kit.ctx, s.kit.pick_a, s.kit.bulk_b, vec![line(&s.kit, dec!(1))])
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
