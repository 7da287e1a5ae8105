//! Process-wide logging setup for the stock ledger.

pub mod tracing;

pub use self::tracing::LogFormat;

/// Install the global subscriber with the format named by
/// `STOCKLEDGER_LOG_FORMAT` (JSON unless set to `pretty`).
///
/// Calling it again is a no-op.
pub fn init() {
    tracing::init();
}
