//! The inventory ledger: append-only stock moves plus the row projection they
//! maintain.

pub mod in_memory;
pub(crate) mod plan;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use r#trait::{
    Availability, Committed, Drift, HoldRequest, InventoryLedger, LedgerBatch, MoveFilter,
    ReconciliationReport, RecordedMove,
};
