use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use rust_decimal::Decimal;
use stockledger_core::{CompanyContext, CompanyId};
use stockledger_infra::{
    EngineConfig, InventoryLedger, InventoryService, LedgerBatch, ReserveOutcome, ReserveRequest,
};
use stockledger_inventory::{
    LocationId, LocationType, MoveType, OrderId, OrderItemId, ProductId, ProductRef, StockMove,
    StockSelector, Tracking, WarehouseId,
};

struct Bench {
    ctx: CompanyContext,
    service: InventoryService,
    warehouse_id: WarehouseId,
    locations: Vec<LocationId>,
    product: ProductRef,
}

/// One warehouse with `location_count` pick faces holding `per_location` each.
fn setup(location_count: usize, per_location: i64) -> Bench {
    let ctx = CompanyContext::new(CompanyId::new());
    let service = InventoryService::in_memory(EngineConfig::default());
    let warehouse_id = WarehouseId::new();
    service.locations().add_warehouse(&ctx, warehouse_id, "W1", "Main").unwrap();
    let product = ProductRef::product(ProductId::new());

    let mut locations = Vec::with_capacity(location_count);
    for i in 0..location_count {
        let id = LocationId::new();
        service
            .locations()
            .add_location(&ctx, warehouse_id, id, &format!("A-{i:03}"), LocationType::Pick)
            .unwrap();
        locations.push(id);
    }
    let bench = Bench {
        ctx,
        service,
        warehouse_id,
        locations,
        product,
    };
    if per_location > 0 {
        let batch = LedgerBatch::new().with_moves(
            bench
                .locations
                .iter()
                .map(|loc| adjustment(&bench, *loc, Decimal::from(per_location))),
        );
        bench.service.ledger().append(&bench.ctx, batch).unwrap();
    }
    bench
}

fn adjustment(bench: &Bench, location: LocationId, qty: Decimal) -> StockMove {
    StockMove::new(
        bench.ctx.company_id(),
        MoveType::Adjustment,
        bench.warehouse_id,
        bench.product,
        Tracking::Untracked,
        qty,
        Utc::now(),
    )
    .to_location(location)
}

fn request(bench: &Bench, qty: i64) -> ReserveRequest {
    ReserveRequest {
        order_id: OrderId::new(),
        order_item_id: OrderItemId::new(),
        warehouse_id: bench.warehouse_id,
        selector: StockSelector::any(bench.product),
        qty: Decimal::from(qty),
    }
}

fn bench_reservation_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("reservation_latency");
    group.sample_size(500);

    for location_count in [1, 10, 100].iter() {
        group.bench_with_input(
            BenchmarkId::new("reserve_then_release", location_count),
            location_count,
            |b, &count| {
                let bench = setup(count, 1_000_000);
                b.iter(|| {
                    let outcome = bench.service.reserve_stock(&bench.ctx, request(&bench, 3)).unwrap();
                    if let ReserveOutcome::Reserved { reservation_id } = black_box(outcome) {
                        bench.service.release_reservation(&bench.ctx, reservation_id).unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_throughput");

    for batch_size in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("batch_append", batch_size),
            batch_size,
            |b, &size| {
                let bench = setup(size, 0);
                b.iter(|| {
                    let batch = LedgerBatch::new().with_moves(
                        bench
                            .locations
                            .iter()
                            .map(|loc| adjustment(&bench, *loc, Decimal::ONE)),
                    );
                    black_box(bench.service.ledger().append(&bench.ctx, batch).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_rebuild_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild_speed");

    for move_count in [100, 1_000, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("rebuild_from_ledger", move_count),
            move_count,
            |b, &count| {
                let bench = setup(10, 0);
                for i in 0..count {
                    let location = bench.locations[i % bench.locations.len()];
                    bench
                        .service
                        .ledger()
                        .append_move(&bench.ctx, adjustment(&bench, location, Decimal::ONE))
                        .unwrap();
                }

                b.iter(|| {
                    black_box(bench.service.rebuild(&bench.ctx).unwrap());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_reservation_latency,
    bench_append_throughput,
    bench_rebuild_speed
);
criterion_main!(benches);
