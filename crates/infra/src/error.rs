//! Infrastructure error model.

use rust_decimal::Decimal;
use thiserror::Error;

use stockledger_core::DomainError;

/// Failure of a ledger, registry or store call.
///
/// Deterministic domain failures map one-to-one from [`DomainError`]; the
/// remaining variants belong to the data-access boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("insufficient stock: requested {requested}, available {available} (short {shortfall})")]
    InsufficientStock {
        requested: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// A record carried a company other than the caller's context.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Lock poisoning, database failures and other storage faults.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub(crate) fn poisoned(what: &str) -> Self {
        LedgerError::Storage(format!("{what} lock poisoned"))
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::InvariantViolation(msg) => LedgerError::InvariantViolation(msg),
            DomainError::NotFound(msg) => LedgerError::NotFound(msg),
            DomainError::Conflict(msg) => LedgerError::Conflict(msg),
            DomainError::InsufficientStock {
                requested,
                available,
                shortfall,
            } => LedgerError::InsufficientStock {
                requested,
                available,
                shortfall,
            },
        }
    }
}

/// Error surfaced by [`crate::InventoryService`] to the calling layers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Reconciliation found projection rows that disagree with the ledger.
    #[error("consistency drift detected on {rows} row(s)")]
    ConsistencyDrift { rows: usize },
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        ServiceError::Ledger(value.into())
    }
}

impl ServiceError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Ledger(e) => match e {
                LedgerError::Validation(_) => "validation_error",
                LedgerError::InvariantViolation(_) => "invariant_violation",
                LedgerError::InsufficientStock { .. } => "insufficient_stock",
                LedgerError::NotFound(_) => "not_found",
                LedgerError::TenantIsolation(_) => "tenant_isolation",
                LedgerError::Conflict(_) => "conflict",
                LedgerError::Storage(_) => "storage_error",
            },
            ServiceError::ConsistencyDrift { .. } => "consistency_drift",
        }
    }

    /// Whether operators must be alerted rather than the caller corrected.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            ServiceError::Ledger(LedgerError::InvariantViolation(_))
                | ServiceError::Ledger(LedgerError::Storage(_))
                | ServiceError::ConsistencyDrift { .. }
        )
    }
}
