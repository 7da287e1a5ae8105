//! Fixed-point quantity checks.
//!
//! Quantities are `rust_decimal::Decimal`; floating point never reaches the ledger.

use rust_decimal::Decimal;

use crate::error::{DomainError, DomainResult};

/// Default maximum number of decimal places accepted on a quantity.
pub const DEFAULT_MAX_SCALE: u32 = 4;

/// Reject quantities with more than `max_scale` significant decimal places.
pub fn ensure_scale(qty: Decimal, max_scale: u32, what: &str) -> DomainResult<()> {
    if qty.normalize().scale() > max_scale {
        return Err(DomainError::validation(format!(
            "{what} has more than {max_scale} decimal places: {qty}"
        )));
    }
    Ok(())
}

/// Require `qty > 0`.
pub fn ensure_positive(qty: Decimal, what: &str) -> DomainResult<()> {
    if qty <= Decimal::ZERO {
        return Err(DomainError::validation(format!("{what} must be positive, got {qty}")));
    }
    Ok(())
}

/// Require `qty >= 0`.
pub fn ensure_non_negative(qty: Decimal, what: &str) -> DomainResult<()> {
    if qty < Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "{what} cannot be negative, got {qty}"
        )));
    }
    Ok(())
}
