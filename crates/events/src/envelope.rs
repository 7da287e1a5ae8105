use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::CompanyId;

/// Envelope for an event, containing company + stream metadata.
///
/// Notes:
/// - **Multi-tenancy** is enforced here via `company_id`.
/// - **Append-only**: `sequence_number` is monotonically increasing per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    company_id: CompanyId,
    stream: String,

    /// Monotonically increasing position in the stream (starts at 1).
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        company_id: CompanyId,
        stream: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            company_id,
            stream: stream.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
