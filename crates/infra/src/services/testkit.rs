//! Shared fixture for the service tests: one warehouse with a location of each
//! kind and one untracked product.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use stockledger_core::{CompanyContext, CompanyId};
use stockledger_inventory::{
    LocationId, LocationType, MoveType, ProductId, ProductRef, StockKey, StockMove, Tracking,
    WarehouseId,
};

use crate::ledger::{InMemoryLedger, InventoryLedger};
use crate::registry::{IdentityRegistry, LocationRegistry};

pub(crate) struct Kit {
    pub ctx: CompanyContext,
    pub locations: Arc<LocationRegistry>,
    pub identities: Arc<IdentityRegistry>,
    pub ledger: Arc<InMemoryLedger>,
    pub warehouse_id: WarehouseId,
    pub inbound: LocationId,
    pub pick_a: LocationId,
    pub bulk_b: LocationId,
    pub staging: LocationId,
    pub outbound: LocationId,
    pub product: ProductRef,
}

impl Kit {
    pub fn new() -> Self {
        let ctx = CompanyContext::new(CompanyId::new());
        let locations = Arc::new(LocationRegistry::new());
        let identities = Arc::new(IdentityRegistry::new());
        let ledger = Arc::new(InMemoryLedger::new(locations.clone(), identities.clone(), 4));

        let warehouse_id = WarehouseId::new();
        locations.add_warehouse(&ctx, warehouse_id, "W1", "Main").unwrap();
        let add = |code: &str, kind: LocationType| {
            let id = LocationId::new();
            locations.add_location(&ctx, warehouse_id, id, code, kind).unwrap();
            id
        };
        let inbound = add("IN", LocationType::Inbound);
        let pick_a = add("A-01", LocationType::Pick);
        let bulk_b = add("B-01", LocationType::Bulk);
        let staging = add("STAGE", LocationType::Staging);
        let outbound = add("OUT", LocationType::Outbound);

        Self {
            ctx,
            locations,
            identities,
            ledger,
            warehouse_id,
            inbound,
            pick_a,
            bulk_b,
            staging,
            outbound,
            product: ProductRef::product(ProductId::new()),
        }
    }

    /// Put `qty` of the product on hand at `location` with an adjustment.
    pub fn stock(&self, location: LocationId, qty: Decimal) {
        let stock_move = StockMove::new(
            self.ctx.company_id(),
            MoveType::Adjustment,
            self.warehouse_id,
            self.product,
            Tracking::Untracked,
            qty,
            Utc::now(),
        )
        .to_location(location);
        self.ledger.append_move(&self.ctx, stock_move).unwrap();
    }

    pub fn on_hand(&self, location: LocationId) -> Decimal {
        let key = StockKey::new(location, self.product, Tracking::Untracked);
        self.ledger
            .item(&self.ctx, &key)
            .unwrap()
            .map(|row| row.qty_on_hand)
            .unwrap_or_default()
    }
}
