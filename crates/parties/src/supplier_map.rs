//! Learned supplier item code → internal item links.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::TenantId;
use stockledger_products::StockItem;

use crate::supplier::SupplierId;

/// Longest supplier description kept on a mapping.
pub const MAX_DESCRIPTION_LEN: usize = 120;

/// Unique key of a mapping: one internal item per (tenant, supplier, code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupplierMapKey {
    pub tenant_id: TenantId,
    pub supplier: SupplierId,
    pub supplier_sku: String,
}

impl SupplierMapKey {
    pub fn new(tenant_id: TenantId, supplier: SupplierId, supplier_sku: &str) -> Self {
        Self {
            tenant_id,
            supplier,
            supplier_sku: supplier_sku.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierProductMap {
    key: SupplierMapKey,
    item: StockItem,
    supplier_barcode: Option<String>,
    supplier_description: Option<String>,
    last_cost: Option<Decimal>,
    last_purchase: Option<NaiveDate>,
    total_purchased: Decimal,
    is_active: bool,
    updated_at: DateTime<Utc>,
}

impl SupplierProductMap {
    pub fn new(key: SupplierMapKey, item: StockItem, now: DateTime<Utc>) -> Self {
        Self {
            key,
            item,
            supplier_barcode: None,
            supplier_description: None,
            last_cost: None,
            last_purchase: None,
            total_purchased: Decimal::ZERO,
            is_active: true,
            updated_at: now,
        }
    }

    /// Remember how the supplier labels the item.
    pub fn describe(&mut self, barcode: Option<&str>, description: Option<&str>) {
        if let Some(b) = barcode.map(str::trim).filter(|b| !b.is_empty()) {
            self.supplier_barcode = Some(b.to_string());
        }
        if let Some(d) = description.map(str::trim).filter(|d| !d.is_empty()) {
            self.supplier_description = Some(d.chars().take(MAX_DESCRIPTION_LEN).collect());
        }
    }

    /// Fold one received line into the purchase history.
    pub fn record_purchase(
        &mut self,
        unit_cost: Decimal,
        quantity: Decimal,
        on: NaiveDate,
        now: DateTime<Utc>,
    ) {
        self.last_cost = Some(unit_cost);
        self.last_purchase = Some(on);
        self.total_purchased += quantity;
        self.updated_at = now;
    }

    /// Point the mapping at a different item (manual correction) and reactivate it.
    pub fn relink(&mut self, item: StockItem, now: DateTime<Utc>) {
        self.item = item;
        self.is_active = true;
        self.updated_at = now;
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.updated_at = now;
    }

    pub fn key(&self) -> &SupplierMapKey {
        &self.key
    }

    pub fn item(&self) -> StockItem {
        self.item
    }

    pub fn supplier_barcode(&self) -> Option<&str> {
        self.supplier_barcode.as_deref()
    }

    pub fn supplier_description(&self) -> Option<&str> {
        self.supplier_description.as_deref()
    }

    pub fn last_cost(&self) -> Option<Decimal> {
        self.last_cost
    }

    pub fn last_purchase(&self) -> Option<NaiveDate> {
        self.last_purchase
    }

    pub fn total_purchased(&self) -> Decimal {
        self.total_purchased
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Read port over stored mappings, used by the matcher.
pub trait SupplierMapIndex: Send + Sync {
    /// Active mapping for the key, if any.
    fn lookup(&self, key: &SupplierMapKey) -> Option<SupplierProductMap>;
}

impl<S> SupplierMapIndex for Arc<S>
where
    S: SupplierMapIndex + ?Sized,
{
    fn lookup(&self, key: &SupplierMapKey) -> Option<SupplierProductMap> {
        (**self).lookup(key)
    }
}
