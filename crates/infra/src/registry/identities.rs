use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;
use tracing::{info, instrument};

use stockledger_core::{CompanyContext, CompanyId};
use stockledger_inventory::{Lot, LotId, ProductId, Serial, SerialId, Tracking};

use crate::error::LedgerError;

/// Lots and serials, unique per (company, product, number).
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    lots: RwLock<HashMap<(CompanyId, LotId), Lot>>,
    serials: RwLock<HashMap<(CompanyId, SerialId), Serial>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, ctx, lot), fields(company_id = %ctx.company_id(), lot_id = %lot.id))]
    pub fn register_lot(&self, ctx: &CompanyContext, lot: Lot) -> Result<Lot, LedgerError> {
        ensure_company(ctx, lot.company_id)?;
        let mut map = self.lots.write().map_err(|_| LedgerError::poisoned("lots"))?;
        if map.contains_key(&(lot.company_id, lot.id)) {
            return Err(LedgerError::Conflict(format!("lot {} already exists", lot.id)));
        }
        let duplicate = map.values().any(|l| {
            l.company_id == lot.company_id
                && l.product_id == lot.product_id
                && l.lot_number == lot.lot_number
        });
        if duplicate {
            return Err(LedgerError::Conflict(format!(
                "lot number {} already exists for product {}",
                lot.lot_number, lot.product_id
            )));
        }
        map.insert((lot.company_id, lot.id), lot.clone());
        info!(lot_number = %lot.lot_number, "lot registered");
        Ok(lot)
    }

    #[instrument(skip(self, ctx, serial), fields(company_id = %ctx.company_id(), serial_id = %serial.id))]
    pub fn register_serial(&self, ctx: &CompanyContext, serial: Serial) -> Result<Serial, LedgerError> {
        ensure_company(ctx, serial.company_id)?;
        if let Some(lot_id) = serial.lot_id {
            let lot = self.lot(ctx, lot_id)?;
            if lot.product_id != serial.product_id {
                return Err(LedgerError::Validation(format!(
                    "serial {} and lot {} belong to different products",
                    serial.serial_number, lot.lot_number
                )));
            }
        }

        let mut map = self
            .serials
            .write()
            .map_err(|_| LedgerError::poisoned("serials"))?;
        if map.contains_key(&(serial.company_id, serial.id)) {
            return Err(LedgerError::Conflict(format!("serial {} already exists", serial.id)));
        }
        let duplicate = map.values().any(|s| {
            s.company_id == serial.company_id
                && s.product_id == serial.product_id
                && s.serial_number == serial.serial_number
        });
        if duplicate {
            return Err(LedgerError::Conflict(format!(
                "serial number {} already exists for product {}",
                serial.serial_number, serial.product_id
            )));
        }
        map.insert((serial.company_id, serial.id), serial.clone());
        info!(serial_number = %serial.serial_number, "serial registered");
        Ok(serial)
    }

    pub fn lot(&self, ctx: &CompanyContext, id: LotId) -> Result<Lot, LedgerError> {
        self.lots
            .read()
            .map_err(|_| LedgerError::poisoned("lots"))?
            .get(&(ctx.company_id(), id))
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("lot {id}")))
    }

    pub fn serial(&self, ctx: &CompanyContext, id: SerialId) -> Result<Serial, LedgerError> {
        self.serials
            .read()
            .map_err(|_| LedgerError::poisoned("serials"))?
            .get(&(ctx.company_id(), id))
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("serial {id}")))
    }

    /// Check that `tracking` names an identity of `product_id` in this company.
    pub fn ensure_tracking(
        &self,
        ctx: &CompanyContext,
        product_id: ProductId,
        tracking: Tracking,
    ) -> Result<(), LedgerError> {
        let owner = match tracking {
            Tracking::Untracked => return Ok(()),
            Tracking::Lot(id) => self.lot(ctx, id)?.product_id,
            Tracking::Serial(id) => self.serial(ctx, id)?.product_id,
        };
        if owner != product_id {
            return Err(LedgerError::Validation(format!(
                "tracking identity belongs to product {owner}, not {product_id}"
            )));
        }
        Ok(())
    }

    /// Expiry date of the tracked quantity; serials inherit their lot's.
    pub fn expiry(&self, ctx: &CompanyContext, tracking: Tracking) -> Result<Option<NaiveDate>, LedgerError> {
        match tracking {
            Tracking::Untracked => Ok(None),
            Tracking::Lot(id) => Ok(self.lot(ctx, id)?.expires_on),
            Tracking::Serial(id) => match self.serial(ctx, id)?.lot_id {
                Some(lot_id) => Ok(self.lot(ctx, lot_id)?.expires_on),
                None => Ok(None),
            },
        }
    }
}

fn ensure_company(ctx: &CompanyContext, found: CompanyId) -> Result<(), LedgerError> {
    if found != ctx.company_id() {
        return Err(LedgerError::TenantIsolation(format!(
            "record belongs to company {found}, caller is {}",
            ctx.company_id()
        )));
    }
    Ok(())
}
