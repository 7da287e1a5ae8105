use chrono::{DateTime, Utc};

/// A recorded fact: a stock move or a workflow document transition.
///
/// Never edited once written. A correction is a new event (for stock, a
/// compensating move).
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, e.g. `stock.move.receipt` or `inventory.receipt.received`.
    fn event_type(&self) -> &'static str;

    /// Payload schema version; bumped when the serialized shape changes.
    fn version(&self) -> u32 {
        1
    }

    /// Business time, as reported by the caller. The ledger adds its own
    /// `recorded_at` on append.
    fn occurred_at(&self) -> DateTime<Utc>;
}
