//! Company-scoped reference data the ledger validates moves against.

pub mod identities;
pub mod locations;

pub use identities::IdentityRegistry;
pub use locations::{LocationRegistry, TRANSIT_CODE};
