//! Workflow services.
//!
//! Every service follows the same pipeline for a document command:
//!
//! ```text
//! lock document -> decide on a copy -> append moves/holds to the ledger -> swap in the copy
//! ```
//!
//! The document stays locked for the whole call, so the stored document and the
//! ledger change together: if the append fails, the document is left untouched.

pub mod adjustments;
mod claims;
pub mod cycle_counts;
pub mod picking;
pub mod receiving;
pub mod reservations;
pub mod shipping;
pub mod transfers;

#[cfg(test)]
pub(crate) mod testkit;

pub use adjustments::AdjustmentService;
pub use cycle_counts::CycleCountService;
pub use picking::PickingService;
pub use receiving::ReceivingService;
pub use reservations::{ReservationManager, ReserveRequest};
pub use shipping::ShippingService;
pub use transfers::TransferService;

use stockledger_core::{Aggregate, CompanyContext, CompanyId, DomainError};
use stockledger_events::execute;
use stockledger_inventory::{Location, WarehouseId};

use crate::error::LedgerError;

/// Run `command` against a copy of `doc`, returning the next state and the events.
pub(crate) fn decide<A>(doc: &A, command: &A::Command) -> Result<(A, Vec<A::Event>), LedgerError>
where
    A: Aggregate<Error = DomainError> + Clone,
{
    let mut next = doc.clone();
    let events = execute(&mut next, command)?;
    Ok((next, events))
}

/// Reject commands carrying a company other than the caller's.
pub(crate) fn ensure_company(ctx: &CompanyContext, company_id: CompanyId, what: &str) -> Result<(), LedgerError> {
    if company_id != ctx.company_id() {
        return Err(LedgerError::TenantIsolation(format!(
            "{what} belongs to company {company_id}, caller is {}",
            ctx.company_id()
        )));
    }
    Ok(())
}

pub(crate) fn ensure_in_warehouse(location: &Location, warehouse_id: WarehouseId) -> Result<(), LedgerError> {
    if location.warehouse_id != warehouse_id {
        return Err(LedgerError::Validation(format!(
            "location {} is outside warehouse {warehouse_id}",
            location.code
        )));
    }
    Ok(())
}
