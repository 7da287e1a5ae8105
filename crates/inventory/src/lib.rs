//! Warehouse inventory domain.
//!
//! Pure, deterministic business rules (no IO, no storage): the location graph,
//! lot/serial identities, the `StockMove` ledger entry, the `InventoryItem`
//! projection row and the workflow aggregates that emit moves.

pub mod adjustment;
pub mod allocation;
pub mod cycle_count;
pub mod identity;
pub mod ids;
pub mod item;
pub mod location;
pub mod movement;
pub mod picking;
pub mod receipt;
pub mod reservation;
pub mod shipment;
pub mod transfer;

pub use allocation::{AllocationCandidate, AllocationLine, AllocationPolicy, allocate};
pub use identity::{Lot, ProductRef, Serial, StockKey, StockSelector, Tracking};
pub use ids::*;
pub use item::{InventoryItem, RowDelta};
pub use location::{Location, LocationType, Warehouse};
pub use movement::{MoveRef, MoveType, StockMove};
pub use reservation::{HoldDelta, Reservation, ReservationStatus};
