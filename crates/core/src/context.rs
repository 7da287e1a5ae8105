use uuid::Uuid;

use crate::id::CompanyId;

/// Company context for a call into the inventory core.
///
/// Every registry, store and ledger call takes one; queries are always filtered by
/// `company_id`. The correlation id only ties log lines together.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CompanyContext {
    company_id: CompanyId,
    correlation_id: Uuid,
}

impl CompanyContext {
    pub fn new(company_id: CompanyId) -> Self {
        Self {
            company_id,
            correlation_id: Uuid::now_v7(),
        }
    }

    pub fn with_correlation(company_id: CompanyId, correlation_id: Uuid) -> Self {
        Self {
            company_id,
            correlation_id,
        }
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}
