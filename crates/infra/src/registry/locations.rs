use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{info, instrument};

use stockledger_core::{CompanyContext, CompanyId};
use stockledger_inventory::{Location, LocationId, LocationType, Warehouse, WarehouseId};

use crate::error::LedgerError;

/// Code of the virtual in-transit location created per warehouse.
pub const TRANSIT_CODE: &str = "TRANSIT";

#[derive(Debug, Clone)]
struct Entry {
    location: Location,
    referenced: bool,
}

/// Warehouses and their typed locations.
///
/// A location becomes immutable once any move references it; the ledger marks
/// references through [`LocationRegistry::with_references`].
#[derive(Debug, Default)]
pub struct LocationRegistry {
    warehouses: RwLock<HashMap<(CompanyId, WarehouseId), Warehouse>>,
    locations: RwLock<HashMap<(CompanyId, LocationId), Entry>>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn add_warehouse(
        &self,
        ctx: &CompanyContext,
        id: WarehouseId,
        code: &str,
        name: &str,
    ) -> Result<Warehouse, LedgerError> {
        let company_id = ctx.company_id();
        let warehouse = Warehouse::new(company_id, id, code, name)?;

        let mut map = self
            .warehouses
            .write()
            .map_err(|_| LedgerError::poisoned("warehouses"))?;
        if map.contains_key(&(company_id, id)) {
            return Err(LedgerError::Conflict(format!("warehouse {id} already exists")));
        }
        if map
            .values()
            .any(|w| w.company_id == company_id && w.code == warehouse.code)
        {
            return Err(LedgerError::Conflict(format!(
                "warehouse code {} is already used",
                warehouse.code
            )));
        }
        map.insert((company_id, id), warehouse.clone());
        info!(warehouse_id = %id, code = %warehouse.code, "warehouse added");
        Ok(warehouse)
    }

    pub fn warehouse(&self, ctx: &CompanyContext, id: WarehouseId) -> Result<Warehouse, LedgerError> {
        self.warehouses
            .read()
            .map_err(|_| LedgerError::poisoned("warehouses"))?
            .get(&(ctx.company_id(), id))
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("warehouse {id}")))
    }

    /// Add a physical location. Transit locations are created by
    /// [`LocationRegistry::transit_location`] only.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn add_location(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
        id: LocationId,
        code: &str,
        kind: LocationType,
    ) -> Result<Location, LedgerError> {
        if kind == LocationType::Transit {
            return Err(LedgerError::Validation(
                "transit locations are managed by the registry".into(),
            ));
        }
        self.insert_location(ctx, warehouse_id, id, code, kind)
    }

    fn insert_location(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
        id: LocationId,
        code: &str,
        kind: LocationType,
    ) -> Result<Location, LedgerError> {
        self.warehouse(ctx, warehouse_id)?;
        let company_id = ctx.company_id();
        let location = Location::new(company_id, warehouse_id, id, code, kind)?;

        let mut map = self
            .locations
            .write()
            .map_err(|_| LedgerError::poisoned("locations"))?;
        if map.contains_key(&(company_id, id)) {
            return Err(LedgerError::Conflict(format!("location {id} already exists")));
        }
        if code_taken(&map, company_id, warehouse_id, &location.code, None) {
            return Err(LedgerError::Conflict(format!(
                "location code {} is already used in warehouse {warehouse_id}",
                location.code
            )));
        }
        map.insert(
            (company_id, id),
            Entry {
                location: location.clone(),
                referenced: false,
            },
        );
        Ok(location)
    }

    pub fn location(&self, ctx: &CompanyContext, id: LocationId) -> Result<Location, LedgerError> {
        self.locations
            .read()
            .map_err(|_| LedgerError::poisoned("locations"))?
            .get(&(ctx.company_id(), id))
            .map(|e| e.location.clone())
            .ok_or_else(|| LedgerError::NotFound(format!("location {id}")))
    }

    /// Locations of a warehouse, ordered by code.
    pub fn locations(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<Location>, LedgerError> {
        let map = self
            .locations
            .read()
            .map_err(|_| LedgerError::poisoned("locations"))?;
        let mut out: Vec<_> = map
            .iter()
            .filter(|((c, _), e)| *c == ctx.company_id() && e.location.warehouse_id == warehouse_id)
            .map(|(_, e)| e.location.clone())
            .collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    /// The warehouse's virtual transit location, created on first use.
    pub fn transit_location(
        &self,
        ctx: &CompanyContext,
        warehouse_id: WarehouseId,
    ) -> Result<Location, LedgerError> {
        let existing = self
            .locations(ctx, warehouse_id)?
            .into_iter()
            .find(|l| l.kind == LocationType::Transit);
        if let Some(location) = existing {
            return Ok(location);
        }
        match self.insert_location(ctx, warehouse_id, LocationId::new(), TRANSIT_CODE, LocationType::Transit) {
            // lost a race against another caller creating it
            Err(LedgerError::Conflict(_)) => self
                .locations(ctx, warehouse_id)?
                .into_iter()
                .find(|l| l.kind == LocationType::Transit)
                .ok_or_else(|| LedgerError::Conflict(format!(
                    "location code {TRANSIT_CODE} is taken in warehouse {warehouse_id}"
                ))),
            other => other,
        }
    }

    /// Re-code or re-type a location that no move references yet.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn update_location(
        &self,
        ctx: &CompanyContext,
        id: LocationId,
        code: Option<&str>,
        kind: Option<LocationType>,
    ) -> Result<Location, LedgerError> {
        let company_id = ctx.company_id();
        let code = code
            .map(stockledger_inventory::location::normalize_code)
            .transpose()?;
        if kind == Some(LocationType::Transit) {
            return Err(LedgerError::Validation(
                "transit locations are managed by the registry".into(),
            ));
        }

        let mut map = self
            .locations
            .write()
            .map_err(|_| LedgerError::poisoned("locations"))?;
        let (warehouse_id, referenced) = match map.get(&(company_id, id)) {
            Some(e) => (e.location.warehouse_id, e.referenced),
            None => return Err(LedgerError::NotFound(format!("location {id}"))),
        };
        if referenced {
            return Err(LedgerError::Conflict(format!(
                "location {id} is referenced by stock moves and cannot change"
            )));
        }
        if let Some(code) = &code {
            if code_taken(&map, company_id, warehouse_id, code, Some(id)) {
                return Err(LedgerError::Conflict(format!(
                    "location code {code} is already used in warehouse {warehouse_id}"
                )));
            }
        }

        let entry = map
            .get_mut(&(company_id, id))
            .ok_or_else(|| LedgerError::NotFound(format!("location {id}")))?;
        if entry.location.kind == LocationType::Transit {
            return Err(LedgerError::Validation(
                "transit locations are managed by the registry".into(),
            ));
        }
        if let Some(code) = code {
            entry.location.code = code;
        }
        if let Some(kind) = kind {
            entry.location.kind = kind;
        }
        Ok(entry.location.clone())
    }

    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id()))]
    pub fn deactivate_location(&self, ctx: &CompanyContext, id: LocationId) -> Result<(), LedgerError> {
        let mut map = self
            .locations
            .write()
            .map_err(|_| LedgerError::poisoned("locations"))?;
        let entry = map
            .get_mut(&(ctx.company_id(), id))
            .ok_or_else(|| LedgerError::NotFound(format!("location {id}")))?;
        if entry.referenced {
            return Err(LedgerError::Conflict(format!(
                "location {id} is referenced by stock moves and cannot be deactivated"
            )));
        }
        entry.location.active = false;
        Ok(())
    }

    pub fn is_referenced(&self, ctx: &CompanyContext, id: LocationId) -> Result<bool, LedgerError> {
        self.locations
            .read()
            .map_err(|_| LedgerError::poisoned("locations"))?
            .get(&(ctx.company_id(), id))
            .map(|e| e.referenced)
            .ok_or_else(|| LedgerError::NotFound(format!("location {id}")))
    }

    /// Run `commit` while no location in `snapshots` can change, then mark them
    /// referenced.
    ///
    /// Fails with `Conflict` if any location no longer matches its snapshot.
    /// `commit` must not call back into this registry.
    pub(crate) fn with_references<T>(
        &self,
        company_id: CompanyId,
        snapshots: &[Location],
        commit: impl FnOnce() -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut map = self
            .locations
            .write()
            .map_err(|_| LedgerError::poisoned("locations"))?;
        for snapshot in snapshots {
            match map.get(&(company_id, snapshot.id)) {
                Some(e) if e.location == *snapshot => {}
                _ => {
                    return Err(LedgerError::Conflict(format!(
                        "location {} changed while the move was being recorded",
                        snapshot.code
                    )));
                }
            }
        }

        let out = commit()?;

        for snapshot in snapshots {
            if let Some(e) = map.get_mut(&(company_id, snapshot.id)) {
                e.referenced = true;
            }
        }
        Ok(out)
    }
}

fn code_taken(
    map: &HashMap<(CompanyId, LocationId), Entry>,
    company_id: CompanyId,
    warehouse_id: WarehouseId,
    code: &str,
    except: Option<LocationId>,
) -> bool {
    map.iter().any(|((c, id), e)| {
        *c == company_id
            && e.location.warehouse_id == warehouse_id
            && e.location.code == code
            && Some(*id) != except
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (LocationRegistry, CompanyContext, WarehouseId) {
        let registry = LocationRegistry::new();
        let ctx = CompanyContext::new(CompanyId::new());
        let wh = WarehouseId::new();
        registry.add_warehouse(&ctx, wh, "main", "Main").unwrap();
        (registry, ctx, wh)
    }

    #[test]
    fn codes_are_unique_per_warehouse() {
        let (registry, ctx, wh) = setup();
        registry
            .add_location(&ctx, wh, LocationId::new(), "a-01", LocationType::Pick)
            .unwrap();
        let err = registry
            .add_location(&ctx, wh, LocationId::new(), "A-01", LocationType::Bulk)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));

        let other = WarehouseId::new();
        registry.add_warehouse(&ctx, other, "second", "Second").unwrap();
        assert!(registry
            .add_location(&ctx, other, LocationId::new(), "A-01", LocationType::Pick)
            .is_ok());
    }

    #[test]
    fn other_companies_cannot_see_locations() {
        let (registry, ctx, wh) = setup();
        let id = LocationId::new();
        registry.add_location(&ctx, wh, id, "A-01", LocationType::Pick).unwrap();

        let stranger = CompanyContext::new(CompanyId::new());
        assert!(matches!(
            registry.location(&stranger, id).unwrap_err(),
            LedgerError::NotFound(_)
        ));
    }

    #[test]
    fn referenced_locations_are_frozen() {
        let (registry, ctx, wh) = setup();
        let id = LocationId::new();
        let loc = registry.add_location(&ctx, wh, id, "A-01", LocationType::Pick).unwrap();

        registry
            .update_location(&ctx, id, Some("A-02"), Some(LocationType::Bulk))
            .unwrap();
        let loc2 = registry.location(&ctx, id).unwrap();
        assert_ne!(loc, loc2);

        // stale snapshot is rejected
        let err = registry
            .with_references(ctx.company_id(), &[loc], || Ok(()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));

        registry
            .with_references(ctx.company_id(), &[loc2], || Ok(()))
            .unwrap();
        assert!(registry.is_referenced(&ctx, id).unwrap());
        assert!(registry.update_location(&ctx, id, Some("A-03"), None).is_err());
        assert!(registry.deactivate_location(&ctx, id).is_err());
    }

    #[test]
    fn transit_location_is_created_once() {
        let (registry, ctx, wh) = setup();
        let first = registry.transit_location(&ctx, wh).unwrap();
        let second = registry.transit_location(&ctx, wh).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.kind, LocationType::Transit);
        assert_eq!(first.code, TRANSIT_CODE);
    }

    #[test]
    fn failed_commit_does_not_mark_references() {
        let (registry, ctx, wh) = setup();
        let id = LocationId::new();
        let loc = registry.add_location(&ctx, wh, id, "A-01", LocationType::Pick).unwrap();
        let result: Result<(), _> = registry.with_references(ctx.company_id(), &[loc], || {
            Err(LedgerError::Validation("hook failed".into()))
        });
        assert!(result.is_err());
        assert!(!registry.is_referenced(&ctx, id).unwrap());
    }
}
