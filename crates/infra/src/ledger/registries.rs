//! Tenant reference data the ledger validates postings against.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use stockledger_core::{DomainError, DomainResult, TenantId};
use stockledger_inventory::{
    AdjustmentPolicy, AdjustmentReason, AdjustmentReasonId, Location, LocationId, LocationRegistry,
    MovementError, NewLocation, NewReason, ScopePolicy,
};

fn poisoned(what: &str) -> DomainError {
    DomainError::conflict(format!("{what} lock poisoned"))
}

/// Locations, adjustment reasons and per-tenant scope policies.
#[derive(Debug)]
pub struct Registries {
    locations: RwLock<LocationRegistry>,
    reasons: RwLock<AdjustmentPolicy>,
    policies: RwLock<HashMap<TenantId, ScopePolicy>>,
    default_policy: ScopePolicy,
}

impl Registries {
    pub fn new(default_policy: ScopePolicy) -> Self {
        Self {
            locations: RwLock::new(LocationRegistry::new()),
            reasons: RwLock::new(AdjustmentPolicy::new()),
            policies: RwLock::new(HashMap::new()),
            default_policy,
        }
    }

    fn locations(&self) -> DomainResult<RwLockReadGuard<'_, LocationRegistry>> {
        self.locations.read().map_err(|_| poisoned("location registry"))
    }

    fn locations_mut(&self) -> DomainResult<RwLockWriteGuard<'_, LocationRegistry>> {
        self.locations.write().map_err(|_| poisoned("location registry"))
    }

    fn reasons(&self) -> DomainResult<RwLockReadGuard<'_, AdjustmentPolicy>> {
        self.reasons.read().map_err(|_| poisoned("adjustment policy"))
    }

    fn reasons_mut(&self) -> DomainResult<RwLockWriteGuard<'_, AdjustmentPolicy>> {
        self.reasons.write().map_err(|_| poisoned("adjustment policy"))
    }

    // Locations

    pub fn register_location(&self, new: NewLocation) -> DomainResult<Location> {
        let location = self.locations_mut()?.register(new)?;
        info!(tenant_id = %location.tenant_id(), code = location.code(), "location registered");
        Ok(location)
    }

    pub fn location(&self, tenant_id: TenantId, id: LocationId) -> DomainResult<Location> {
        self.locations()?.get(tenant_id, id).cloned()
    }

    pub fn location_by_code(&self, tenant_id: TenantId, code: &str) -> DomainResult<Location> {
        self.locations()?
            .by_code(tenant_id, code)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("location code {code}")))
    }

    pub fn locations_for(&self, tenant_id: TenantId) -> DomainResult<Vec<Location>> {
        Ok(self.locations()?.list(tenant_id).into_iter().cloned().collect())
    }

    pub fn child_locations(&self, tenant_id: TenantId, id: LocationId) -> DomainResult<Vec<Location>> {
        Ok(self.locations()?.children(tenant_id, id).into_iter().cloned().collect())
    }

    pub fn reparent_location(
        &self,
        tenant_id: TenantId,
        id: LocationId,
        parent: Option<LocationId>,
    ) -> DomainResult<()> {
        self.locations_mut()?.reparent(tenant_id, id, parent)
    }

    pub fn set_default_location(&self, tenant_id: TenantId, id: LocationId) -> DomainResult<()> {
        self.locations_mut()?.set_default(tenant_id, id)
    }

    pub fn default_location(&self, tenant_id: TenantId) -> DomainResult<Option<Location>> {
        Ok(self.locations()?.default_for(tenant_id).cloned())
    }

    /// The tenant's default location, provisioned on first use.
    pub fn ensure_default_location(&self, tenant_id: TenantId) -> DomainResult<Location> {
        if let Some(existing) = self.default_location(tenant_id)? {
            return Ok(existing);
        }
        let location = self.locations_mut()?.ensure_default(tenant_id)?;
        info!(%tenant_id, code = location.code(), "default location provisioned");
        Ok(location)
    }

    pub fn deactivate_location(&self, tenant_id: TenantId, id: LocationId) -> DomainResult<()> {
        self.locations_mut()?.deactivate(tenant_id, id)
    }

    pub fn location_path(&self, tenant_id: TenantId, id: LocationId) -> DomainResult<String> {
        self.locations()?.full_path(tenant_id, id)
    }

    /// A location movements may be posted to.
    pub fn postable_location(&self, tenant_id: TenantId, id: LocationId) -> Result<Location, MovementError> {
        let location = self.location(tenant_id, id)?;
        if !location.is_active() {
            return Err(MovementError::invalid(format!(
                "location {} is inactive",
                location.code()
            )));
        }
        Ok(location)
    }

    // Adjustment reasons

    pub fn seed_adjustment_reasons(&self, tenant_id: TenantId) -> DomainResult<Vec<AdjustmentReason>> {
        Ok(self.reasons_mut()?.seed_defaults(tenant_id))
    }

    pub fn add_adjustment_reason(&self, tenant_id: TenantId, new: NewReason) -> DomainResult<AdjustmentReason> {
        self.reasons_mut()?.add(tenant_id, new)
    }

    pub fn deactivate_adjustment_reason(&self, tenant_id: TenantId, id: AdjustmentReasonId) -> DomainResult<()> {
        self.reasons_mut()?.deactivate(tenant_id, id)
    }

    pub fn adjustment_reason_by_code(&self, tenant_id: TenantId, code: &str) -> DomainResult<AdjustmentReason> {
        self.reasons()?
            .by_code(tenant_id, code)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("adjustment reason {code}")))
    }

    pub fn adjustment_reasons(&self, tenant_id: TenantId) -> DomainResult<Vec<AdjustmentReason>> {
        Ok(self.reasons()?.list(tenant_id).into_iter().cloned().collect())
    }

    pub fn validate_adjustment(
        &self,
        tenant_id: TenantId,
        reason: Option<AdjustmentReasonId>,
        note: Option<&str>,
    ) -> Result<AdjustmentReason, MovementError> {
        self.reasons()?.validate(tenant_id, reason, note).cloned()
    }

    // Scope policy

    pub fn set_scope_policy(&self, tenant_id: TenantId, policy: ScopePolicy) -> DomainResult<()> {
        self.policies
            .write()
            .map_err(|_| poisoned("scope policy"))?
            .insert(tenant_id, policy);
        info!(%tenant_id, ?policy, "scope policy updated");
        Ok(())
    }

    pub fn scope_policy(&self, tenant_id: TenantId) -> DomainResult<ScopePolicy> {
        Ok(self
            .policies
            .read()
            .map_err(|_| poisoned("scope policy"))?
            .get(&tenant_id)
            .copied()
            .unwrap_or(self.default_policy))
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new(ScopePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use stockledger_inventory::{ExpiredBatchPolicy, LocationKind};

    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    #[test]
    fn inactive_locations_are_not_postable() {
        let reg = Registries::default();
        let tenant = test_tenant_id();
        reg.ensure_default_location(tenant).unwrap();
        let dock = reg
            .register_location(NewLocation::new(tenant, "dock", "Dock", LocationKind::Warehouse))
            .unwrap();

        assert!(reg.postable_location(tenant, dock.id_typed()).is_ok());
        reg.deactivate_location(tenant, dock.id_typed()).unwrap();
        assert!(matches!(
            reg.postable_location(tenant, dock.id_typed()),
            Err(MovementError::InvalidMovement(_))
        ));
        assert!(reg.postable_location(test_tenant_id(), dock.id_typed()).is_err());
    }

    #[test]
    fn ensure_default_is_idempotent() {
        let reg = Registries::default();
        let tenant = test_tenant_id();
        let first = reg.ensure_default_location(tenant).unwrap();
        let second = reg.ensure_default_location(tenant).unwrap();
        assert_eq!(first.id_typed(), second.id_typed());
        assert_eq!(reg.locations_for(tenant).unwrap().len(), 1);
    }

    #[test]
    fn tenants_fall_back_to_the_default_policy() {
        let reg = Registries::new(ScopePolicy::default().with_negative_stock(true));
        let tenant = test_tenant_id();
        assert!(reg.scope_policy(tenant).unwrap().allow_negative_stock);

        let strict = ScopePolicy::default().with_expired_batches(ExpiredBatchPolicy::Block);
        reg.set_scope_policy(tenant, strict).unwrap();
        assert_eq!(reg.scope_policy(tenant).unwrap(), strict);
    }

    #[test]
    fn seeded_reasons_validate_notes() {
        let reg = Registries::default();
        let tenant = test_tenant_id();
        reg.seed_adjustment_reasons(tenant).unwrap();
        let theft = reg.adjustment_reason_by_code(tenant, "theft").unwrap();

        assert!(matches!(
            reg.validate_adjustment(tenant, Some(theft.id_typed()), None),
            Err(MovementError::AdjustmentNoteRequired { .. })
        ));
        assert!(reg
            .validate_adjustment(tenant, Some(theft.id_typed()), Some("shelf 3"))
            .is_ok());
    }
}
