use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use stockledger_core::{AggregateRoot, CompanyContext, CompanyId, ExpectedVersion};

use crate::error::LedgerError;

/// In-memory, company-isolated store of workflow documents (receipts, waves, ...).
///
/// Each document sits behind its own mutex: commands against one document are
/// serialized, commands against different documents run in parallel. A caller
/// holding the document lock while appending to the ledger gets the document and
/// the ledger changing together.
#[derive(Debug)]
pub struct DocumentStore<D>
where
    D: AggregateRoot,
{
    kind: &'static str,
    inner: RwLock<HashMap<(CompanyId, D::Id), Arc<Mutex<D>>>>,
}

impl<D> DocumentStore<D>
where
    D: AggregateRoot + Clone,
{
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, ctx: &CompanyContext, doc: D) -> Result<(), LedgerError> {
        let key = (ctx.company_id(), doc.id().clone());
        let mut map = self.inner.write().map_err(|_| LedgerError::poisoned(self.kind))?;
        if map.contains_key(&key) {
            return Err(LedgerError::Conflict(format!(
                "{} {:?} already exists",
                self.kind, key.1
            )));
        }
        map.insert(key, Arc::new(Mutex::new(doc)));
        Ok(())
    }

    /// Run `f` with exclusive access to one document.
    pub fn update<T>(
        &self,
        ctx: &CompanyContext,
        id: &D::Id,
        expected: ExpectedVersion,
        f: impl FnOnce(&mut D) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let slot = self.slot(ctx, id)?;
        let mut doc = slot.lock().map_err(|_| LedgerError::poisoned(self.kind))?;
        expected.check(doc.version())?;
        f(&mut *doc)
    }

    pub fn get(&self, ctx: &CompanyContext, id: &D::Id) -> Result<D, LedgerError> {
        let slot = self.slot(ctx, id)?;
        let doc = slot.lock().map_err(|_| LedgerError::poisoned(self.kind))?;
        Ok(doc.clone())
    }

    pub fn list(&self, ctx: &CompanyContext) -> Result<Vec<D>, LedgerError> {
        self.find(ctx, |_| true)
    }

    pub fn find(&self, ctx: &CompanyContext, pred: impl Fn(&D) -> bool) -> Result<Vec<D>, LedgerError> {
        let slots: Vec<_> = {
            let map = self.inner.read().map_err(|_| LedgerError::poisoned(self.kind))?;
            map.iter()
                .filter(|((company_id, _), _)| *company_id == ctx.company_id())
                .map(|(_, slot)| slot.clone())
                .collect()
        };

        let mut out = Vec::new();
        for slot in slots {
            let doc = slot.lock().map_err(|_| LedgerError::poisoned(self.kind))?;
            if pred(&*doc) {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }

    fn slot(&self, ctx: &CompanyContext, id: &D::Id) -> Result<Arc<Mutex<D>>, LedgerError> {
        self.inner
            .read()
            .map_err(|_| LedgerError::poisoned(self.kind))?
            .get(&(ctx.company_id(), id.clone()))
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("{} {:?}", self.kind, id)))
    }
}
