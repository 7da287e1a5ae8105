use stockledger_core::CompanyId;

use crate::EventEnvelope;

/// Marks types that belong to exactly one company.
///
/// Infrastructure uses this at the data-access boundary to reject records whose
/// company does not match the caller's `CompanyContext`.
pub trait CompanyScoped {
    fn company_id(&self) -> CompanyId;
}

impl<E> CompanyScoped for EventEnvelope<E> {
    fn company_id(&self) -> CompanyId {
        self.company_id()
    }
}
