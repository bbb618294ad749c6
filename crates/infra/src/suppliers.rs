//! Supplier records and learned supplier→item mappings.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use stockledger_core::{DomainError, TenantId};
use stockledger_parties::{Supplier, SupplierId, SupplierMapIndex, SupplierMapKey, SupplierProductMap, TaxId};
use stockledger_products::StockItem;
use stockledger_purchasing::DocumentSupplier;

use crate::db::Database;
use crate::read_model::{
    InMemoryTenantStore, PostgresTenantStore, TenantStore, TenantStoreError, TenantStoreResult,
};

#[derive(Debug, Error)]
pub enum SupplierError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] TenantStoreError),
}

/// Suppliers keyed by normalized tax id.
pub struct SupplierDirectory {
    store: Box<dyn TenantStore<TaxId, Supplier>>,
}

impl SupplierDirectory {
    pub fn new(store: impl TenantStore<TaxId, Supplier> + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }

    pub fn postgres(db: Database) -> Self {
        Self::new(PostgresTenantStore::new(db, "suppliers"))
    }

    /// Find the supplier by tax id or create it from the document header.
    /// Two concurrent imports from a new supplier end up with one record.
    pub fn get_or_create(
        &self,
        tenant_id: TenantId,
        header: &DocumentSupplier,
        strict: bool,
        now: DateTime<Utc>,
    ) -> Result<Supplier, SupplierError> {
        let tax_id = if strict {
            TaxId::parse_strict(&header.tax_id)?
        } else {
            TaxId::parse(&header.tax_id)?
        };
        if let Some(existing) = self.store.get(tenant_id, &tax_id)? {
            return Ok(existing);
        }

        let mut candidate = Supplier::new(tenant_id, tax_id.clone(), header.company_name.as_str(), now)?;
        if let Some(trade) = header.trade_name.as_deref().filter(|t| !t.trim().is_empty()) {
            candidate = candidate.with_trade_name(trade);
        }
        let (supplier, created) = self.store.get_or_insert(tenant_id, tax_id, candidate)?;
        if created {
            info!(%tenant_id, supplier_id = %supplier.id_typed(), tax_id = %supplier.tax_id().formatted(), "supplier created from document");
        }
        Ok(supplier)
    }

    pub fn by_tax_id(&self, tenant_id: TenantId, tax_id: &TaxId) -> TenantStoreResult<Option<Supplier>> {
        self.store.get(tenant_id, tax_id)
    }

    pub fn get(&self, tenant_id: TenantId, id: SupplierId) -> Result<Supplier, SupplierError> {
        self.store
            .list(tenant_id)?
            .into_iter()
            .find(|s| s.id_typed() == id)
            .ok_or_else(|| DomainError::not_found(format!("supplier {id}")).into())
    }

    pub fn list(&self, tenant_id: TenantId) -> TenantStoreResult<Vec<Supplier>> {
        let mut all = self.store.list(tenant_id)?;
        all.sort_by(|a, b| a.display_name().cmp(b.display_name()));
        Ok(all)
    }
}

/// One purchase to fold into a mapping.
#[derive(Debug, Clone)]
pub struct LearnMapping<'a> {
    pub tenant_id: TenantId,
    pub supplier: SupplierId,
    pub supplier_sku: &'a str,
    pub item: StockItem,
    pub barcode: Option<&'a str>,
    pub description: Option<&'a str>,
    pub unit_cost: Decimal,
    pub quantity: Decimal,
    pub purchased_on: NaiveDate,
}

/// Learned mappings, consulted by the matcher's silver tier.
pub struct SupplierMaps {
    store: Box<dyn TenantStore<(SupplierId, String), SupplierProductMap>>,
}

impl SupplierMaps {
    pub fn new(store: impl TenantStore<(SupplierId, String), SupplierProductMap> + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }

    pub fn postgres(db: Database) -> Self {
        Self::new(PostgresTenantStore::new(db, "supplier_maps"))
    }

    /// Create or refresh the mapping for a received line. A mapping that
    /// pointed elsewhere (or was deactivated) is relinked to `item`.
    ///
    /// Returns `None` when the line carries no supplier code to key on.
    pub fn learn(
        &self,
        purchase: LearnMapping<'_>,
        now: DateTime<Utc>,
    ) -> TenantStoreResult<Option<SupplierProductMap>> {
        let key = SupplierMapKey::new(purchase.tenant_id, purchase.supplier, purchase.supplier_sku);
        if key.supplier_sku.is_empty() {
            return Ok(None);
        }
        let store_key = (key.supplier, key.supplier_sku.clone());
        let (_, created) = self.store.get_or_insert(
            purchase.tenant_id,
            store_key.clone(),
            SupplierProductMap::new(key.clone(), purchase.item, now),
        )?;

        let mut relinked = false;
        let map = self.store.modify(purchase.tenant_id, &store_key, &mut |map| {
            if map.item() != purchase.item || !map.is_active() {
                map.relink(purchase.item, now);
                relinked = true;
            }
            map.describe(purchase.barcode, purchase.description);
            map.record_purchase(purchase.unit_cost, purchase.quantity, purchase.purchased_on, now);
        })?;
        let Some(map) = map else {
            return Ok(None);
        };

        if created || relinked {
            info!(
                tenant_id = %purchase.tenant_id,
                supplier_id = %purchase.supplier,
                supplier_sku = %key.supplier_sku,
                item = %purchase.item,
                relinked,
                "supplier mapping learned"
            );
        } else {
            debug!(supplier_sku = %key.supplier_sku, "supplier mapping refreshed");
        }
        Ok(Some(map))
    }

    pub fn deactivate(&self, key: &SupplierMapKey, now: DateTime<Utc>) -> Result<(), SupplierError> {
        self.store
            .modify(key.tenant_id, &(key.supplier, key.supplier_sku.clone()), &mut |m| m.deactivate(now))?
            .map(|_| ())
            .ok_or_else(|| DomainError::not_found(format!("mapping {}", key.supplier_sku)).into())
    }

    pub fn for_supplier(
        &self,
        tenant_id: TenantId,
        supplier: SupplierId,
    ) -> TenantStoreResult<Vec<SupplierProductMap>> {
        let mut maps: Vec<_> = self
            .store
            .list(tenant_id)?
            .into_iter()
            .filter(|m| m.key().supplier == supplier)
            .collect();
        maps.sort_by(|a, b| a.key().supplier_sku.cmp(&b.key().supplier_sku));
        Ok(maps)
    }
}

impl SupplierMapIndex for SupplierMaps {
    /// The matcher degrades to the next tier when mappings are unreadable.
    fn lookup(&self, key: &SupplierMapKey) -> Option<SupplierProductMap> {
        match self.store.get(key.tenant_id, &(key.supplier, key.supplier_sku.clone())) {
            Ok(found) => found,
            Err(e) => {
                warn!(tenant_id = %key.tenant_id, supplier_sku = %key.supplier_sku, error = %e, "supplier mapping lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use stockledger_core::AggregateId;
    use stockledger_products::ProductId;

    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn header(tax_id: &str) -> DocumentSupplier {
        DocumentSupplier {
            tax_id: tax_id.into(),
            company_name: "Linhas Corrente Ltda".into(),
            trade_name: Some("Corrente".into()),
        }
    }

    fn purchase<'a>(tenant: TenantId, supplier: SupplierId, sku: &'a str, item: StockItem) -> LearnMapping<'a> {
        LearnMapping {
            tenant_id: tenant,
            supplier,
            supplier_sku: sku,
            item,
            barcode: None,
            description: Some("LINHA AZUL 100M"),
            unit_cost: Decimal::new(250, 2),
            quantity: Decimal::from(10),
            purchased_on: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
        }
    }

    fn test_item() -> StockItem {
        StockItem::standalone(ProductId::new(AggregateId::new()))
    }

    #[test]
    fn formatting_differences_resolve_to_one_supplier() {
        let dir = SupplierDirectory::in_memory();
        let tenant = test_tenant_id();

        let a = dir.get_or_create(tenant, &header("11.222.333/0001-81"), false, Utc::now()).unwrap();
        let b = dir.get_or_create(tenant, &header("11222333000181"), true, Utc::now()).unwrap();

        assert_eq!(a.id_typed(), b.id_typed());
        assert_eq!(a.trade_name(), Some("Corrente"));
        assert_eq!(dir.list(tenant).unwrap().len(), 1);
        assert!(dir.get(tenant, a.id_typed()).is_ok());
        assert!(dir.get(test_tenant_id(), a.id_typed()).is_err());
    }

    #[test]
    fn strict_mode_rejects_bad_check_digits() {
        let dir = SupplierDirectory::in_memory();
        assert!(dir
            .get_or_create(test_tenant_id(), &header("11.222.333/0001-00"), true, Utc::now())
            .is_err());
        assert!(dir
            .get_or_create(test_tenant_id(), &header("11.222.333/0001-00"), false, Utc::now())
            .is_ok());
    }

    #[test]
    fn learning_accumulates_and_relinks() {
        let maps = SupplierMaps::in_memory();
        let tenant = test_tenant_id();
        let supplier = SupplierId::new(AggregateId::new());
        let (first, second) = (test_item(), test_item());

        maps.learn(purchase(tenant, supplier, "LA-100", first), Utc::now()).unwrap().unwrap();
        let map = maps.learn(purchase(tenant, supplier, " LA-100 ", first), Utc::now()).unwrap().unwrap();
        assert_eq!(map.total_purchased(), Decimal::from(20));
        assert_eq!(map.supplier_description(), Some("LINHA AZUL 100M"));

        let map = maps.learn(purchase(tenant, supplier, "LA-100", second), Utc::now()).unwrap().unwrap();
        assert_eq!(map.item(), second);
        assert_eq!(maps.for_supplier(tenant, supplier).unwrap().len(), 1);

        let key = SupplierMapKey::new(tenant, supplier, "LA-100");
        assert_eq!(maps.lookup(&key).map(|m| m.item()), Some(second));
    }

    #[test]
    fn blank_codes_are_not_learned() {
        let maps = SupplierMaps::in_memory();
        let tenant = test_tenant_id();
        let supplier = SupplierId::new(AggregateId::new());
        assert!(maps.learn(purchase(tenant, supplier, "  ", test_item()), Utc::now()).unwrap().is_none());
        assert!(maps.for_supplier(tenant, supplier).unwrap().is_empty());
    }

    #[test]
    fn deactivated_mapping_is_reactivated_by_the_next_purchase() {
        let maps = SupplierMaps::in_memory();
        let tenant = test_tenant_id();
        let supplier = SupplierId::new(AggregateId::new());
        let item = test_item();
        maps.learn(purchase(tenant, supplier, "X", item), Utc::now()).unwrap().unwrap();

        let key = SupplierMapKey::new(tenant, supplier, "X");
        maps.deactivate(&key, Utc::now()).unwrap();
        assert!(!maps.lookup(&key).unwrap().is_active());

        maps.learn(purchase(tenant, supplier, "X", item), Utc::now()).unwrap().unwrap();
        assert!(maps.lookup(&key).unwrap().is_active());
    }
}
