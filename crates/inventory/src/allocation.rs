//! Allocation policy: which rows a reservation draws from.

use std::cmp::Ordering;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult};

use crate::identity::StockKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Earliest lot expiry first; untracked and undated rows last.
    #[default]
    FifoByExpiry,
    /// Location code order, independent of lots.
    LocationOrder,
}

/// A row that may contribute to a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationCandidate {
    pub key: StockKey,
    pub location_code: String,
    pub available: Decimal,
    pub expires_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub key: StockKey,
    pub qty: Decimal,
}

fn by_location(a: &AllocationCandidate, b: &AllocationCandidate) -> Ordering {
    a.location_code
        .cmp(&b.location_code)
        .then_with(|| a.key.cmp(&b.key))
}

fn by_expiry(a: &AllocationCandidate, b: &AllocationCandidate) -> Ordering {
    match (a.expires_on, b.expires_on) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| by_location(a, b))
}

/// Deterministic candidate order under `policy`.
pub fn order_candidates(candidates: &mut [AllocationCandidate], policy: AllocationPolicy) {
    match policy {
        AllocationPolicy::FifoByExpiry => candidates.sort_by(by_expiry),
        AllocationPolicy::LocationOrder => candidates.sort_by(by_location),
    }
}

/// Split `qty` over the candidates, all or nothing.
///
/// Returns `InsufficientStock` with the shortfall when the candidates cannot
/// cover `qty`; no partial allocation is produced.
pub fn allocate(
    mut candidates: Vec<AllocationCandidate>,
    qty: Decimal,
    policy: AllocationPolicy,
) -> DomainResult<Vec<AllocationLine>> {
    if qty <= Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "allocation quantity must be positive, got {qty}"
        )));
    }

    candidates.retain(|c| c.available > Decimal::ZERO);
    let total: Decimal = candidates.iter().map(|c| c.available).sum();
    if total < qty {
        return Err(DomainError::insufficient(qty, total));
    }

    order_candidates(&mut candidates, policy);

    let mut remaining = qty;
    let mut lines = Vec::new();
    for c in candidates {
        if remaining.is_zero() {
            break;
        }
        let take = c.available.min(remaining);
        lines.push(AllocationLine { key: c.key, qty: take });
        remaining -= take;
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ProductRef, Tracking};
    use crate::ids::{LocationId, LotId, ProductId};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn candidate(code: &str, available: Decimal, expires_on: Option<NaiveDate>) -> AllocationCandidate {
        let tracking = match expires_on {
            Some(_) => Tracking::Lot(LotId::new()),
            None => Tracking::Untracked,
        };
        AllocationCandidate {
            key: StockKey::new(
                LocationId::new(),
                ProductRef::product(ProductId::new()),
                tracking,
            ),
            location_code: code.to_string(),
            available,
            expires_on,
        }
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    #[test]
    fn fifo_draws_from_earliest_expiry_first() {
        let late = candidate("A-01", dec!(5), Some(date(9, 1)));
        let early = candidate("B-01", dec!(3), Some(date(3, 1)));
        let undated = candidate("A-00", dec!(10), None);

        let lines = allocate(
            vec![late.clone(), undated.clone(), early.clone()],
            dec!(6),
            AllocationPolicy::FifoByExpiry,
        )
        .unwrap();

        assert_eq!(
            lines,
            vec![
                AllocationLine { key: early.key, qty: dec!(3) },
                AllocationLine { key: late.key, qty: dec!(3) },
            ]
        );
    }

    #[test]
    fn location_order_ignores_expiry() {
        let a = candidate("A-01", dec!(2), Some(date(9, 1)));
        let b = candidate("B-01", dec!(5), Some(date(1, 1)));
        let lines = allocate(vec![b.clone(), a.clone()], dec!(4), AllocationPolicy::LocationOrder).unwrap();
        assert_eq!(lines[0].key, a.key);
        assert_eq!(lines[0].qty, dec!(2));
        assert_eq!(lines[1].key, b.key);
        assert_eq!(lines[1].qty, dec!(2));
    }

    #[test]
    fn shortfall_is_reported_without_partial_allocation() {
        let err = allocate(
            vec![candidate("A", dec!(4), None)],
            dec!(5),
            AllocationPolicy::FifoByExpiry,
        )
        .unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                requested: dec!(5),
                available: dec!(4),
                shortfall: dec!(1),
            }
        );
    }

    proptest! {
        #[test]
        fn allocation_covers_exactly_the_request(
            avail in proptest::collection::vec(0i64..20, 1..8),
            qty in 1i64..100,
        ) {
            let candidates: Vec<_> = avail
                .iter()
                .enumerate()
                .map(|(i, a)| candidate(&format!("L{i:02}"), Decimal::from(*a), None))
                .collect();
            let total: i64 = avail.iter().sum();
            let qty = Decimal::from(qty);

            match allocate(candidates.clone(), qty, AllocationPolicy::LocationOrder) {
                Ok(lines) => {
                    let sum: Decimal = lines.iter().map(|l| l.qty).sum();
                    prop_assert_eq!(sum, qty);
                    for line in &lines {
                        let c = candidates.iter().find(|c| c.key == line.key).unwrap();
                        prop_assert!(line.qty > Decimal::ZERO);
                        prop_assert!(line.qty <= c.available);
                    }
                }
                Err(DomainError::InsufficientStock { shortfall, .. }) => {
                    prop_assert!(Decimal::from(total) < qty);
                    prop_assert_eq!(shortfall, qty - Decimal::from(total));
                }
                Err(other) => prop_assert!(false, "unexpected error {other:?}"),
            }
        }
    }
}
