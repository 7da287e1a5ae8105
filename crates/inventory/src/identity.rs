//! Product identities: product/variant references and lot/serial traceability.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockledger_core::{CompanyId, DomainError, DomainResult};

use crate::ids::{LocationId, LotId, ProductId, SerialId, VariantId};

/// A product, optionally narrowed to one variant.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ProductRef {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
}

impl ProductRef {
    pub fn product(product_id: ProductId) -> Self {
        Self {
            product_id,
            variant_id: None,
        }
    }

    pub fn variant(product_id: ProductId, variant_id: VariantId) -> Self {
        Self {
            product_id,
            variant_id: Some(variant_id),
        }
    }
}

/// Traceability qualifier of a stock quantity.
///
/// A closed set: a quantity is either untracked, belongs to one lot, or is one
/// serialized unit.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Tracking {
    #[default]
    Untracked,
    Lot(LotId),
    Serial(SerialId),
}

impl Tracking {
    pub fn lot(&self) -> Option<LotId> {
        match self {
            Tracking::Lot(id) => Some(*id),
            _ => None,
        }
    }

    pub fn serial(&self) -> Option<SerialId> {
        match self {
            Tracking::Serial(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, Tracking::Serial(_))
    }
}

/// Key of one projection row: (location, product, variant?, lot?, serial?).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub location_id: LocationId,
    pub product: ProductRef,
    pub tracking: Tracking,
}

impl StockKey {
    pub fn new(location_id: LocationId, product: ProductRef, tracking: Tracking) -> Self {
        Self {
            location_id,
            product,
            tracking,
        }
    }
}

/// Which rows a reservation or availability query looks at.
///
/// Without a pin, every tracking variant of the product counts.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockSelector {
    pub product: ProductRef,
    pub pin: Option<Tracking>,
}

impl StockSelector {
    pub fn any(product: ProductRef) -> Self {
        Self { product, pin: None }
    }

    pub fn pinned(product: ProductRef, tracking: Tracking) -> Self {
        Self {
            product,
            pin: Some(tracking),
        }
    }

    pub fn matches(&self, key: &StockKey) -> bool {
        key.product == self.product && self.pin.is_none_or(|pin| pin == key.tracking)
    }
}

/// A manufactured batch of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub lot_number: String,
    pub manufactured_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
}

impl Lot {
    pub fn new(
        company_id: CompanyId,
        product_id: ProductId,
        id: LotId,
        lot_number: &str,
        manufactured_on: Option<NaiveDate>,
        expires_on: Option<NaiveDate>,
    ) -> DomainResult<Self> {
        let lot_number = lot_number.trim();
        if lot_number.is_empty() {
            return Err(DomainError::validation("lot number cannot be empty"));
        }
        if let (Some(made), Some(expires)) = (manufactured_on, expires_on) {
            if expires < made {
                return Err(DomainError::validation(format!(
                    "lot {lot_number} expires ({expires}) before it was manufactured ({made})"
                )));
            }
        }
        Ok(Self {
            id,
            company_id,
            product_id,
            lot_number: lot_number.to_string(),
            manufactured_on,
            expires_on,
        })
    }

    /// A lot expiring on `as_of` is still usable that day.
    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        self.expires_on.is_some_and(|d| d < as_of)
    }
}

/// A single traceable unit of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Serial {
    pub id: SerialId,
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub serial_number: String,
    pub lot_id: Option<LotId>,
}

impl Serial {
    pub fn new(
        company_id: CompanyId,
        product_id: ProductId,
        id: SerialId,
        serial_number: &str,
        lot_id: Option<LotId>,
    ) -> DomainResult<Self> {
        let serial_number = serial_number.trim();
        if serial_number.is_empty() {
            return Err(DomainError::validation("serial number cannot be empty"));
        }
        Ok(Self {
            id,
            company_id,
            product_id,
            serial_number: serial_number.to_string(),
            lot_id,
        })
    }
}
