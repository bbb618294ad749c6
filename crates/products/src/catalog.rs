//! Read-only catalog port plus an in-memory implementation for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, TenantId};

use crate::product::{normalize_sku, Product, ProductId, StockItem, Variant, VariantId};

/// Flattened view of a stock-holding item, as the ledger and matcher see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub item: StockItem,
    pub sku: String,
    pub barcode: Option<String>,
    pub label: String,
    pub active: bool,
}

/// What the ledger needs from the product catalog.
///
/// Lookups are tenant-scoped; an id from another tenant is simply absent.
pub trait Catalog: Send + Sync {
    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<Product>;

    fn variant(&self, tenant_id: TenantId, id: VariantId) -> Option<Variant>;

    /// Every stock-holding item of the tenant (standalone products and variants).
    fn entries(&self, tenant_id: TenantId) -> Vec<CatalogEntry>;

    /// Exact barcode lookup among active items. Variants are checked before
    /// standalone products; family parents never match.
    fn find_by_barcode(&self, tenant_id: TenantId, barcode: &str) -> Option<StockItem> {
        let entries = self.entries(tenant_id);
        let hit = |want_variant: bool| {
            entries.iter().find(|e| {
                e.active
                    && e.item.variant_id().is_some() == want_variant
                    && e.barcode.as_deref() == Some(barcode)
            })
        };
        hit(true).or_else(|| hit(false)).map(|e| e.item)
    }

    /// Lookup by normalized SKU among active items, variants first.
    fn find_by_sku(&self, tenant_id: TenantId, sku: &str) -> Option<StockItem> {
        let wanted = normalize_sku(sku);
        if wanted.is_empty() {
            return None;
        }
        let entries = self.entries(tenant_id);
        let hit = |want_variant: bool| {
            entries.iter().find(|e| {
                e.active && e.item.variant_id().is_some() == want_variant && normalize_sku(&e.sku) == wanted
            })
        };
        hit(true).or_else(|| hit(false)).map(|e| e.item)
    }

    /// Resolve an item for posting: it must exist in the tenant, be active,
    /// hold stock itself and (for variants) belong to the named family.
    fn resolve(&self, tenant_id: TenantId, item: &StockItem) -> DomainResult<CatalogEntry> {
        match *item {
            StockItem::Standalone { product } => {
                let p = self
                    .product(tenant_id, product)
                    .ok_or_else(|| DomainError::not_found(format!("product {product}")))?;
                if !p.holds_stock() {
                    return Err(DomainError::invariant(format!(
                        "product {} is a variant family; post against one of its variants",
                        p.sku()
                    )));
                }
                if !p.is_active() {
                    return Err(DomainError::invariant(format!("product {} is inactive", p.sku())));
                }
                Ok(CatalogEntry {
                    item: *item,
                    sku: p.sku().to_string(),
                    barcode: p.barcode().map(str::to_string),
                    label: p.name().to_string(),
                    active: true,
                })
            }
            StockItem::Variant { family, variant } => {
                let v = self
                    .variant(tenant_id, variant)
                    .ok_or_else(|| DomainError::not_found(format!("variant {variant}")))?;
                if v.family() != family {
                    return Err(DomainError::invariant(format!(
                        "variant {} does not belong to product {family}",
                        v.sku()
                    )));
                }
                let parent = self
                    .product(tenant_id, family)
                    .ok_or_else(|| DomainError::not_found(format!("product {family}")))?;
                if !v.is_active() || !parent.is_active() {
                    return Err(DomainError::invariant(format!("variant {} is inactive", v.sku())));
                }
                Ok(CatalogEntry {
                    item: *item,
                    sku: v.sku().to_string(),
                    barcode: v.barcode().map(str::to_string),
                    label: v.label(parent.name()),
                    active: true,
                })
            }
        }
    }
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<Product> {
        (**self).product(tenant_id, id)
    }

    fn variant(&self, tenant_id: TenantId, id: VariantId) -> Option<Variant> {
        (**self).variant(tenant_id, id)
    }

    fn entries(&self, tenant_id: TenantId) -> Vec<CatalogEntry> {
        (**self).entries(tenant_id)
    }

    fn find_by_barcode(&self, tenant_id: TenantId, barcode: &str) -> Option<StockItem> {
        (**self).find_by_barcode(tenant_id, barcode)
    }

    fn find_by_sku(&self, tenant_id: TenantId, sku: &str) -> Option<StockItem> {
        (**self).find_by_sku(tenant_id, sku)
    }

    fn resolve(&self, tenant_id: TenantId, item: &StockItem) -> DomainResult<CatalogEntry> {
        (**self).resolve(tenant_id, item)
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<(TenantId, ProductId), Product>>,
    variants: RwLock<HashMap<(TenantId, VariantId), Variant>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a product. SKUs are unique per tenant (after normalization).
    pub fn add_product(&self, product: Product) -> DomainResult<StockItem> {
        let tenant_id = product.tenant_id();
        let wanted = normalize_sku(product.sku());
        if self
            .entries(tenant_id)
            .iter()
            .any(|e| normalize_sku(&e.sku) == wanted)
        {
            return Err(DomainError::duplicate(format!("sku {}", product.sku())));
        }
        let mut products = self
            .products
            .write()
            .map_err(|_| DomainError::conflict("catalog lock poisoned"))?;
        if products
            .values()
            .any(|p| p.tenant_id() == tenant_id && normalize_sku(p.sku()) == wanted)
        {
            return Err(DomainError::duplicate(format!("sku {}", product.sku())));
        }
        let item = StockItem::standalone(product.id_typed());
        products.insert((tenant_id, product.id_typed()), product);
        Ok(item)
    }

    /// Add a variant to an existing family.
    pub fn add_variant(&self, variant: Variant) -> DomainResult<StockItem> {
        let tenant_id = variant.tenant_id();
        if self.product(tenant_id, variant.family()).is_none() {
            return Err(DomainError::not_found(format!("product {}", variant.family())));
        }
        let wanted = normalize_sku(variant.sku());
        if self
            .entries(tenant_id)
            .iter()
            .any(|e| normalize_sku(&e.sku) == wanted)
        {
            return Err(DomainError::duplicate(format!("sku {}", variant.sku())));
        }
        let item = variant.stock_item();
        self.variants
            .write()
            .map_err(|_| DomainError::conflict("catalog lock poisoned"))?
            .insert((tenant_id, variant.id_typed()), variant);
        Ok(item)
    }

    /// Replace a stored product (status changes, barcode edits).
    pub fn update_product(&self, product: Product) -> DomainResult<()> {
        let mut products = self
            .products
            .write()
            .map_err(|_| DomainError::conflict("catalog lock poisoned"))?;
        let key = (product.tenant_id(), product.id_typed());
        if !products.contains_key(&key) {
            return Err(DomainError::not_found(format!("product {}", product.id_typed())));
        }
        products.insert(key, product);
        Ok(())
    }
}

impl Catalog for InMemoryCatalog {
    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<Product> {
        self.products.read().ok()?.get(&(tenant_id, id)).cloned()
    }

    fn variant(&self, tenant_id: TenantId, id: VariantId) -> Option<Variant> {
        self.variants.read().ok()?.get(&(tenant_id, id)).cloned()
    }

    fn entries(&self, tenant_id: TenantId) -> Vec<CatalogEntry> {
        let (products, variants) = match (self.products.read(), self.variants.read()) {
            (Ok(p), Ok(v)) => (p, v),
            _ => return vec![],
        };

        let mut out: Vec<CatalogEntry> = products
            .values()
            .filter(|p| p.tenant_id() == tenant_id && p.holds_stock())
            .map(|p| CatalogEntry {
                item: StockItem::standalone(p.id_typed()),
                sku: p.sku().to_string(),
                barcode: p.barcode().map(str::to_string),
                label: p.name().to_string(),
                active: p.is_active(),
            })
            .collect();

        out.extend(
            variants
                .values()
                .filter(|v| v.tenant_id() == tenant_id)
                .filter_map(|v| {
                    let parent = products.get(&(tenant_id, v.family()))?;
                    Some(CatalogEntry {
                        item: v.stock_item(),
                        sku: v.sku().to_string(),
                        barcode: v.barcode().map(str::to_string),
                        label: v.label(parent.name()),
                        active: v.is_active() && parent.is_active(),
                    })
                }),
        );

        // Stable order for deterministic suggestion ranking.
        out.sort_by(|a, b| a.sku.cmp(&b.sku));
        out
    }
}
