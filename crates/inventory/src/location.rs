//! Location graph: warehouses and their typed locations (reference data).

use serde::{Deserialize, Serialize};

use stockledger_core::{CompanyId, DomainError, DomainResult};

use crate::ids::{LocationId, WarehouseId};

/// Kind of a storage location inside a warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    Inbound,
    Pick,
    Bulk,
    Buffer,
    Staging,
    Outbound,
    /// Virtual location holding stock between two warehouses.
    Transit,
}

impl LocationType {
    pub fn as_str(self) -> &'static str {
        match self {
            LocationType::Inbound => "inbound",
            LocationType::Pick => "pick",
            LocationType::Bulk => "bulk",
            LocationType::Buffer => "buffer",
            LocationType::Staging => "staging",
            LocationType::Outbound => "outbound",
            LocationType::Transit => "transit",
        }
    }

    /// Stock in these locations counts towards `available`.
    pub fn is_sellable(self) -> bool {
        matches!(self, LocationType::Pick | LocationType::Bulk | LocationType::Buffer)
    }

    pub fn is_putaway_target(self) -> bool {
        self.is_sellable()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
}

impl Warehouse {
    pub fn new(
        company_id: CompanyId,
        id: WarehouseId,
        code: &str,
        name: impl Into<String>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id,
            company_id,
            code: normalize_code(code)?,
            name: name.into(),
        })
    }
}

/// A typed location, identified by a warehouse-scoped code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub company_id: CompanyId,
    pub warehouse_id: WarehouseId,
    pub code: String,
    pub kind: LocationType,
    pub active: bool,
}

impl Location {
    pub fn new(
        company_id: CompanyId,
        warehouse_id: WarehouseId,
        id: LocationId,
        code: &str,
        kind: LocationType,
    ) -> DomainResult<Self> {
        Ok(Self {
            id,
            company_id,
            warehouse_id,
            code: normalize_code(code)?,
            kind,
            active: true,
        })
    }

    pub fn ensure_active(&self) -> DomainResult<()> {
        if !self.active {
            return Err(DomainError::validation(format!(
                "location {} is inactive",
                self.code
            )));
        }
        Ok(())
    }

    pub fn ensure_kind(&self, expected: &[LocationType]) -> DomainResult<()> {
        if !expected.contains(&self.kind) {
            let names: Vec<_> = expected.iter().map(|k| k.as_str()).collect();
            return Err(DomainError::validation(format!(
                "location {} is {}, expected one of [{}]",
                self.code,
                self.kind.as_str(),
                names.join(", ")
            )));
        }
        Ok(())
    }
}

/// Codes are trimmed, upper-cased and must be non-empty.
pub fn normalize_code(code: &str) -> DomainResult<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(DomainError::validation("code cannot be empty"));
    }
    if code.chars().any(char::is_whitespace) {
        return Err(DomainError::validation(format!(
            "code cannot contain whitespace: {code:?}"
        )));
    }
    Ok(code.to_uppercase())
}
