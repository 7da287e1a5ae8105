//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts, stock shortfalls). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed move shape, quantity mismatch).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant would be violated (e.g. negative on-hand).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflict occurred (e.g. stale version, document already posted).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Not enough available stock to satisfy a request.
    ///
    /// This is an expected business outcome, not a fault.
    #[error("insufficient stock: requested {requested}, available {available} (short {shortfall})")]
    InsufficientStock {
        requested: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn insufficient(requested: Decimal, available: Decimal) -> Self {
        let available = available.max(Decimal::ZERO);
        Self::InsufficientStock {
            requested,
            available,
            shortfall: (requested - available).max(Decimal::ZERO),
        }
    }
}
