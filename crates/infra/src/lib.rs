//! Infrastructure layer: the stock ledger engines, registries, workflow
//! services and the `InventoryService` facade.

pub mod config;
pub mod error;
pub mod ledger;
pub mod projection;
pub mod registry;
pub mod service;
pub mod services;
pub mod store;

pub use config::EngineConfig;
pub use error::{LedgerError, ServiceError};
pub use ledger::{
    Availability, Committed, Drift, InMemoryLedger, InventoryLedger, LedgerBatch, MoveFilter,
    PostgresLedger, ReconciliationReport, RecordedMove,
};
pub use service::{InventoryService, ReserveOutcome};
pub use services::ReserveRequest;
