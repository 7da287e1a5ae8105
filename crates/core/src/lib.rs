//! `stockledger-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod context;
pub mod error;
pub mod id;
pub mod quantity;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use context::CompanyContext;
pub use error::{DomainError, DomainResult};
pub use id::CompanyId;

#[doc(hidden)]
pub use uuid as __uuid;
