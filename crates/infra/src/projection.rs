//! On-hand totals replayed from the ledger.
//!
//! This is the reference the row projection is checked against: `rebuild`
//! and `reconcile` replay the company's moves through [`StockProjection`] and
//! compare the result with the live rows.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use stockledger_events::{EventEnvelope, Projection};
use stockledger_inventory::{StockKey, StockMove};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockProjection {
    on_hand: BTreeMap<StockKey, Decimal>,
}

impl StockProjection {
    /// Signed sum of every replayed move touching `key`.
    pub fn on_hand(&self, key: &StockKey) -> Decimal {
        self.on_hand.get(key).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn keys(&self) -> impl Iterator<Item = &StockKey> {
        self.on_hand.keys()
    }

    pub fn len(&self) -> usize {
        self.on_hand.len()
    }

    pub fn is_empty(&self) -> bool {
        self.on_hand.is_empty()
    }
}

impl Projection for StockProjection {
    type Ev = StockMove;

    fn apply(&mut self, envelope: &EventEnvelope<StockMove>) {
        for (key, delta) in envelope.payload().row_deltas() {
            *self.on_hand.entry(key).or_insert(Decimal::ZERO) += delta;
        }
    }
}
