use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use stockledger_core::TenantId;
use stockledger_parties::{SupplierId, SupplierMapIndex, SupplierMapKey};
use stockledger_products::{Catalog, StockItem};

use crate::barcode::usable_barcode;

/// A line item as the supplier describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalItem {
    pub supplier: Option<SupplierId>,
    pub supplier_sku: Option<String>,
    pub barcode: Option<String>,
    pub description: String,
}

impl ExternalItem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            supplier: None,
            supplier_sku: None,
            barcode: None,
            description: description.into(),
        }
    }

    pub fn from_supplier(mut self, supplier: SupplierId) -> Self {
        self.supplier = Some(supplier);
        self
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.supplier_sku = Some(sku.into());
        self
    }

    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        self.barcode = Some(barcode.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchTier {
    Gold,
    Silver,
    Bronze,
    None,
}

impl MatchTier {
    pub fn confidence(self) -> Decimal {
        match self {
            MatchTier::Gold => Decimal::ONE,
            MatchTier::Silver => Decimal::new(95, 2),
            MatchTier::Bronze => Decimal::new(70, 2),
            MatchTier::None => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub tier: MatchTier,
    pub confidence: Decimal,
    pub item: Option<StockItem>,
}

impl MatchResult {
    fn hit(tier: MatchTier, item: StockItem) -> Self {
        Self {
            tier,
            confidence: tier.confidence(),
            item: Some(item),
        }
    }

    pub fn none() -> Self {
        Self {
            tier: MatchTier::None,
            confidence: Decimal::ZERO,
            item: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.item.is_some()
    }
}

/// Pure read-side matcher over a catalog and the learned supplier mappings.
#[derive(Debug, Clone)]
pub struct MatchEngine<C, M> {
    catalog: C,
    mappings: M,
}

impl<C, M> MatchEngine<C, M>
where
    C: Catalog,
    M: SupplierMapIndex,
{
    pub fn new(catalog: C, mappings: M) -> Self {
        Self { catalog, mappings }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Run the tiers in order; the first hit wins.
    pub fn match_item(&self, tenant_id: TenantId, external: &ExternalItem) -> MatchResult {
        if let Some(item) = self.by_barcode(tenant_id, external) {
            debug!(%tenant_id, %item, "gold match by barcode");
            return MatchResult::hit(MatchTier::Gold, item);
        }
        if let Some(item) = self.by_supplier_map(tenant_id, external) {
            debug!(%tenant_id, %item, "silver match by supplier mapping");
            return MatchResult::hit(MatchTier::Silver, item);
        }
        if let Some(item) = self.by_sku(tenant_id, external) {
            debug!(%tenant_id, %item, "bronze match by sku");
            return MatchResult::hit(MatchTier::Bronze, item);
        }
        MatchResult::none()
    }

    fn by_barcode(&self, tenant_id: TenantId, external: &ExternalItem) -> Option<StockItem> {
        let code = usable_barcode(external.barcode.as_deref())?;
        self.catalog.find_by_barcode(tenant_id, code)
    }

    fn by_supplier_map(&self, tenant_id: TenantId, external: &ExternalItem) -> Option<StockItem> {
        let supplier = external.supplier?;
        let sku = external.supplier_sku.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let mapping = self
            .mappings
            .lookup(&SupplierMapKey::new(tenant_id, supplier, sku))
            .filter(|m| m.is_active())?;
        // A mapping to an item that can no longer hold stock is stale.
        self.catalog
            .resolve(tenant_id, &mapping.item())
            .ok()
            .map(|entry| entry.item)
    }

    fn by_sku(&self, tenant_id: TenantId, external: &ExternalItem) -> Option<StockItem> {
        let sku = external.supplier_sku.as_deref()?;
        self.catalog.find_by_sku(tenant_id, sku)
    }
}
