use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, DomainError, DomainResult, Entity, TenantId};

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Variant identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(pub AggregateId);

impl VariantId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for VariantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

/// `Simple` products hold stock themselves; `Variable` products are family
/// parents whose stock lives on their variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductKind {
    Simple,
    Variable,
}

/// The thing a balance is kept for: a standalone product or one variant of a
/// family. Family parents are never a `StockItem`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StockItem {
    Standalone { product: ProductId },
    Variant { family: ProductId, variant: VariantId },
}

impl StockItem {
    pub fn standalone(product: ProductId) -> Self {
        Self::Standalone { product }
    }

    pub fn variant(family: ProductId, variant: VariantId) -> Self {
        Self::Variant { family, variant }
    }

    /// The product row this item rolls up to.
    pub fn product_id(&self) -> ProductId {
        match self {
            StockItem::Standalone { product } => *product,
            StockItem::Variant { family, .. } => *family,
        }
    }

    pub fn variant_id(&self) -> Option<VariantId> {
        match self {
            StockItem::Standalone { .. } => None,
            StockItem::Variant { variant, .. } => Some(*variant),
        }
    }
}

impl core::fmt::Display for StockItem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StockItem::Standalone { product } => write!(f, "p:{product}"),
            StockItem::Variant { variant, .. } => write!(f, "v:{variant}"),
        }
    }
}

/// Normalized form used for SKU equality: uppercase ASCII alphanumerics only.
///
/// `"ab-12 / x"` and `"AB12X"` normalize to the same value.
pub fn normalize_sku(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    tenant_id: TenantId,
    sku: String,
    barcode: Option<String>,
    name: String,
    kind: ProductKind,
    status: ProductStatus,
    unit: String,
}

impl Product {
    pub fn new(
        tenant_id: TenantId,
        sku: impl Into<String>,
        name: impl Into<String>,
        kind: ProductKind,
    ) -> DomainResult<Self> {
        let sku = sku.into().trim().to_string();
        let name = name.into().trim().to_string();
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(Self {
            id: ProductId::new(AggregateId::new()),
            tenant_id,
            sku,
            barcode: None,
            name,
            kind,
            status: ProductStatus::Active,
            unit: "UN".to_string(),
        })
    }

    pub fn simple(tenant_id: TenantId, sku: impl Into<String>, name: impl Into<String>) -> DomainResult<Self> {
        Self::new(tenant_id, sku, name, ProductKind::Simple)
    }

    pub fn variable(tenant_id: TenantId, sku: impl Into<String>, name: impl Into<String>) -> DomainResult<Self> {
        Self::new(tenant_id, sku, name, ProductKind::Variable)
    }

    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        let barcode = barcode.into().trim().to_string();
        self.barcode = (!barcode.is_empty()).then_some(barcode);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_status(mut self, status: ProductStatus) -> Self {
        self.status = status;
        self
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn barcode(&self) -> Option<&str> {
        self.barcode.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProductKind {
        self.kind
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }

    /// Whether movements may target this product directly.
    pub fn holds_stock(&self) -> bool {
        self.kind == ProductKind::Simple
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// One concrete member of a `Variable` family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    id: VariantId,
    tenant_id: TenantId,
    family: ProductId,
    sku: String,
    barcode: Option<String>,
    attributes: BTreeMap<String, String>,
    is_active: bool,
}

impl Variant {
    pub fn new(family: &Product, sku: impl Into<String>) -> DomainResult<Self> {
        if family.kind() != ProductKind::Variable {
            return Err(DomainError::invariant(format!(
                "product {} is not a variant family",
                family.sku()
            )));
        }
        let sku = sku.into().trim().to_string();
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        Ok(Self {
            id: VariantId::new(AggregateId::new()),
            tenant_id: family.tenant_id(),
            family: family.id_typed(),
            sku,
            barcode: None,
            attributes: BTreeMap::new(),
            is_active: true,
        })
    }

    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        let barcode = barcode.into().trim().to_string();
        self.barcode = (!barcode.is_empty()).then_some(barcode);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn id_typed(&self) -> VariantId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn family(&self) -> ProductId {
        self.family
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn barcode(&self) -> Option<&str> {
        self.barcode.as_deref()
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn stock_item(&self) -> StockItem {
        StockItem::variant(self.family, self.id)
    }

    /// "Family name - Blue / M"
    pub fn label(&self, family_name: &str) -> String {
        if self.attributes.is_empty() {
            return format!("{family_name} - {}", self.sku);
        }
        let attrs: Vec<&str> = self.attributes.values().map(String::as_str).collect();
        format!("{family_name} - {}", attrs.join(" / "))
    }
}

impl Entity for Variant {
    type Id = VariantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    #[test]
    fn normalize_sku_keeps_only_uppercase_alphanumerics() {
        assert_eq!(normalize_sku("ab-12 / x"), "AB12X");
        assert_eq!(normalize_sku("  "), "");
    }

    #[test]
    fn product_rejects_blank_sku_and_name() {
        let tenant = test_tenant_id();
        assert!(Product::simple(tenant, " ", "Thread").is_err());
        assert!(Product::simple(tenant, "T-1", "").is_err());
    }

    #[test]
    fn variant_requires_variable_family() {
        let tenant = test_tenant_id();
        let simple = Product::simple(tenant, "T-1", "Thread").unwrap();
        assert!(matches!(
            Variant::new(&simple, "T-1-BLUE"),
            Err(DomainError::InvariantViolation(_))
        ));

        let family = Product::variable(tenant, "SHIRT", "Shirt").unwrap();
        let variant = Variant::new(&family, "SHIRT-BLUE-M")
            .unwrap()
            .with_attribute("color", "Blue")
            .with_attribute("size", "M");
        assert_eq!(variant.family(), family.id_typed());
        assert_eq!(variant.label(family.name()), "Shirt - Blue / M");
        assert_eq!(
            variant.stock_item(),
            StockItem::variant(family.id_typed(), variant.id_typed())
        );
    }

    #[test]
    fn blank_barcode_is_treated_as_absent() {
        let product = Product::simple(test_tenant_id(), "T-1", "Thread")
            .unwrap()
            .with_barcode("  ");
        assert_eq!(product.barcode(), None);
    }
}
