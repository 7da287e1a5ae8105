//! Per-company exclusive claims, taken before a document is written so two
//! concurrent callers cannot both pass an "is it free?" check.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Mutex;

use stockledger_core::{CompanyContext, CompanyId};

use crate::error::LedgerError;

#[derive(Debug)]
pub(crate) struct Claims<K, V> {
    what: &'static str,
    held: Mutex<HashMap<(CompanyId, K), V>>,
}

impl<K, V> Claims<K, V>
where
    K: Copy + Eq + Hash + Display,
    V: Copy + Eq + Display,
{
    pub(crate) fn new(what: &'static str) -> Self {
        Self {
            what,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn claim(&self, ctx: &CompanyContext, key: K, owner: V) -> Result<(), LedgerError> {
        self.claim_all(ctx, [key], owner)
    }

    /// Claim every key for `owner`, or none of them.
    pub(crate) fn claim_all(
        &self,
        ctx: &CompanyContext,
        keys: impl IntoIterator<Item = K>,
        owner: V,
    ) -> Result<(), LedgerError> {
        let keys: Vec<K> = keys.into_iter().collect();
        let company_id = ctx.company_id();
        let mut held = self.lock()?;
        for key in &keys {
            if let Some(existing) = held.get(&(company_id, *key)) {
                return Err(LedgerError::Conflict(format!(
                    "{} {key} is already taken by {existing}",
                    self.what
                )));
            }
        }
        for key in keys {
            held.insert((company_id, key), owner);
        }
        Ok(())
    }

    /// Drop the claims `owner` holds on `keys`; claims of other owners stay.
    pub(crate) fn release(
        &self,
        ctx: &CompanyContext,
        keys: impl IntoIterator<Item = K>,
        owner: V,
    ) -> Result<(), LedgerError> {
        let company_id = ctx.company_id();
        let mut held = self.lock()?;
        for key in keys {
            if held.get(&(company_id, key)) == Some(&owner) {
                held.remove(&(company_id, key));
            }
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(CompanyId, K), V>>, LedgerError> {
        self.held
            .lock()
            .map_err(|_| LedgerError::poisoned(self.what))
    }
}

#[cfg(test)]
mod tests {
    use stockledger_inventory::{PickTaskId, ShipmentId};

    use super::*;

    #[test]
    fn a_partly_taken_set_claims_nothing() {
        let ctx = CompanyContext::new(CompanyId::new());
        let claims = Claims::new("pick task");
        let (a, b) = (PickTaskId::new(), PickTaskId::new());
        let (first, second) = (ShipmentId::new(), ShipmentId::new());

        claims.claim(&ctx, a, first).unwrap();
        let err = claims.claim_all(&ctx, [b, a], second).unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));

        // b was not taken by the failed call
        claims.claim(&ctx, b, second).unwrap();
    }

    #[test]
    fn only_the_owner_releases_and_companies_are_separate() {
        let ctx = CompanyContext::new(CompanyId::new());
        let other = CompanyContext::new(CompanyId::new());
        let claims = Claims::new("pick task");
        let task = PickTaskId::new();
        let owner = ShipmentId::new();

        claims.claim(&ctx, task, owner).unwrap();
        claims.claim(&other, task, ShipmentId::new()).unwrap();

        claims.release(&ctx, [task], ShipmentId::new()).unwrap();
        assert!(claims.claim(&ctx, task, ShipmentId::new()).is_err());

        claims.release(&ctx, [task], owner).unwrap();
        assert!(claims.claim(&ctx, task, ShipmentId::new()).is_ok());
    }
}
