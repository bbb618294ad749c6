//! Location hierarchy.
//!
//! Locations form a per-tenant forest (warehouse > aisle > shelf). The
//! registry keeps them in an arena with id and code indexes; parent links are
//! plain ids, so every re-parent walks the chain to refuse cycles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, DomainError, DomainResult, Entity, TenantId};

/// Code given to the location provisioned by `ensure_default`.
pub const DEFAULT_LOCATION_CODE: &str = "MAIN";

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub AggregateId);

impl LocationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LocationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationKind {
    Store,
    Warehouse,
    Shelf,
    Display,
    Transit,
    Quarantine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    id: LocationId,
    tenant_id: TenantId,
    code: String,
    name: String,
    kind: LocationKind,
    parent: Option<LocationId>,
    address: Option<String>,
    is_active: bool,
    is_default: bool,
    allows_negative: bool,
}

impl Location {
    pub fn id_typed(&self) -> LocationId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LocationKind {
        self.kind
    }

    pub fn parent(&self) -> Option<LocationId> {
        self.parent
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn allows_negative(&self) -> bool {
        self.allows_negative
    }
}

impl Entity for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLocation {
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    pub kind: LocationKind,
    pub parent: Option<LocationId>,
    pub address: Option<String>,
    pub allows_negative: bool,
    pub is_default: bool,
}

impl NewLocation {
    pub fn new(
        tenant_id: TenantId,
        code: impl Into<String>,
        name: impl Into<String>,
        kind: LocationKind,
    ) -> Self {
        Self {
            tenant_id,
            code: code.into(),
            name: name.into(),
            kind,
            parent: None,
            address: None,
            allows_negative: false,
            is_default: false,
        }
    }

    pub fn under(mut self, parent: LocationId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn allowing_negative(mut self) -> Self {
        self.allows_negative = true;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Default, Clone)]
pub struct LocationRegistry {
    nodes: Vec<Location>,
    by_id: HashMap<LocationId, usize>,
    by_code: HashMap<(TenantId, String), usize>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, new: NewLocation) -> DomainResult<Location> {
        let code = normalize_code(&new.code);
        if code.is_empty() {
            return Err(DomainError::validation("location code cannot be empty"));
        }
        if new.name.trim().is_empty() {
            return Err(DomainError::validation("location name cannot be empty"));
        }
        if self.by_code.contains_key(&(new.tenant_id, code.clone())) {
            return Err(DomainError::duplicate(format!("location code {code}")));
        }
        if let Some(parent) = new.parent {
            self.get(new.tenant_id, parent)?;
        }

        let location = Location {
            id: LocationId::new(AggregateId::new()),
            tenant_id: new.tenant_id,
            code: code.clone(),
            name: new.name.trim().to_string(),
            kind: new.kind,
            parent: new.parent,
            address: new.address,
            is_active: true,
            is_default: false,
            allows_negative: new.allows_negative,
        };
        let id = location.id;
        let idx = self.nodes.len();
        self.nodes.push(location);
        self.by_id.insert(id, idx);
        self.by_code.insert((new.tenant_id, code), idx);

        if new.is_default {
            self.set_default(new.tenant_id, id)?;
        }
        self.get(new.tenant_id, id).cloned()
    }

    pub fn get(&self, tenant_id: TenantId, id: LocationId) -> DomainResult<&Location> {
        self.by_id
            .get(&id)
            .map(|&idx| &self.nodes[idx])
            .filter(|l| l.tenant_id == tenant_id)
            .ok_or_else(|| DomainError::not_found(format!("location {id}")))
    }

    pub fn by_code(&self, tenant_id: TenantId, code: &str) -> Option<&Location> {
        self.by_code
            .get(&(tenant_id, normalize_code(code)))
            .map(|&idx| &self.nodes[idx])
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<&Location> {
        self.nodes.iter().filter(|l| l.tenant_id == tenant_id).collect()
    }

    pub fn children(&self, tenant_id: TenantId, id: LocationId) -> Vec<&Location> {
        self.nodes
            .iter()
            .filter(|l| l.tenant_id == tenant_id && l.parent == Some(id))
            .collect()
    }

    /// Move `id` under `parent` (or to the root with `None`).
    ///
    /// Refuses self-parenting and any parent that is already a descendant.
    pub fn reparent(
        &mut self,
        tenant_id: TenantId,
        id: LocationId,
        parent: Option<LocationId>,
    ) -> DomainResult<()> {
        self.get(tenant_id, id)?;
        if let Some(p) = parent {
            if p == id {
                return Err(DomainError::invariant("a location cannot be its own parent"));
            }
            self.get(tenant_id, p)?;
            if self.ancestors(p).any(|a| a == id) {
                return Err(DomainError::invariant(format!(
                    "moving {id} under {p} would create a cycle"
                )));
            }
        }
        let idx = self.by_id[&id];
        self.nodes[idx].parent = parent;
        Ok(())
    }

    /// Walk up from `start` (inclusive). Bounded by the arena size so a
    /// corrupted chain cannot loop forever.
    fn ancestors(&self, start: LocationId) -> impl Iterator<Item = LocationId> + '_ {
        let mut next = Some(start);
        let mut steps = 0usize;
        std::iter::from_fn(move || {
            let current = next?;
            steps += 1;
            if steps > self.nodes.len() {
                return None;
            }
            next = self.by_id.get(&current).and_then(|&i| self.nodes[i].parent);
            Some(current)
        })
    }

    /// Mark `id` as the tenant's default, clearing any previous default.
    pub fn set_default(&mut self, tenant_id: TenantId, id: LocationId) -> DomainResult<()> {
        if !self.get(tenant_id, id)?.is_active {
            return Err(DomainError::invariant("an inactive location cannot be the default"));
        }
        for node in self.nodes.iter_mut().filter(|l| l.tenant_id == tenant_id) {
            node.is_default = node.id == id;
        }
        Ok(())
    }

    pub fn default_for(&self, tenant_id: TenantId) -> Option<&Location> {
        self.nodes
            .iter()
            .find(|l| l.tenant_id == tenant_id && l.is_default)
    }

    /// Return the tenant's default location, provisioning `MAIN` when none
    /// exists (reusing an existing `MAIN` code if present).
    pub fn ensure_default(&mut self, tenant_id: TenantId) -> DomainResult<Location> {
        if let Some(existing) = self.default_for(tenant_id) {
            return Ok(existing.clone());
        }
        if let Some(main) = self.by_code(tenant_id, DEFAULT_LOCATION_CODE).map(|l| l.id) {
            self.set_default(tenant_id, main)?;
            return self.get(tenant_id, main).cloned();
        }
        self.register(
            NewLocation::new(tenant_id, DEFAULT_LOCATION_CODE, "Main location", LocationKind::Store)
                .as_default(),
        )
    }

    /// Soft-deactivate. The default location must be replaced first.
    pub fn deactivate(&mut self, tenant_id: TenantId, id: LocationId) -> DomainResult<()> {
        if self.get(tenant_id, id)?.is_default {
            return Err(DomainError::invariant("the default location cannot be deactivated"));
        }
        let idx = self.by_id[&id];
        self.nodes[idx].is_active = false;
        Ok(())
    }

    /// "Warehouse > Aisle A > Shelf 1"
    pub fn full_path(&self, tenant_id: TenantId, id: LocationId) -> DomainResult<String> {
        self.get(tenant_id, id)?;
        let mut names: Vec<&str> = self
            .ancestors(id)
            .filter_map(|a| self.by_id.get(&a).map(|&i| self.nodes[i].name.as_str()))
            .collect();
        names.reverse();
        Ok(names.join(" > "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn warehouse_tree(reg: &mut LocationRegistry, tenant: TenantId) -> (LocationId, LocationId, LocationId) {
        let wh = reg
            .register(NewLocation::new(tenant, "wh", "Warehouse", LocationKind::Warehouse))
            .unwrap()
            .id_typed();
        let aisle = reg
            .register(NewLocation::new(tenant, "A", "Aisle A", LocationKind::Shelf).under(wh))
            .unwrap()
            .id_typed();
        let shelf = reg
            .register(NewLocation::new(tenant, "A1", "Shelf 1", LocationKind::Shelf).under(aisle))
            .unwrap()
            .id_typed();
        (wh, aisle, shelf)
    }

    #[test]
    fn codes_are_unique_per_tenant_and_case_insensitive() {
        let mut reg = LocationRegistry::new();
        let tenant = test_tenant_id();
        reg.register(NewLocation::new(tenant, "wh", "Warehouse", LocationKind::Warehouse))
            .unwrap();

        assert!(matches!(
            reg.register(NewLocation::new(tenant, "WH ", "Other", LocationKind::Store)),
            Err(DomainError::Duplicate(_))
        ));
        assert!(reg
            .register(NewLocation::new(test_tenant_id(), "WH", "Warehouse", LocationKind::Store))
            .is_ok());
        assert_eq!(reg.by_code(tenant, "Wh").unwrap().name(), "Warehouse");
    }

    #[test]
    fn full_path_joins_ancestor_names() {
        let mut reg = LocationRegistry::new();
        let tenant = test_tenant_id();
        let (_, _, shelf) = warehouse_tree(&mut reg, tenant);

        assert_eq!(
            reg.full_path(tenant, shelf).unwrap(),
            "Warehouse > Aisle A > Shelf 1"
        );
    }

    #[test]
    fn reparent_rejects_cycles_and_self_parenting() {
        let mut reg = LocationRegistry::new();
        let tenant = test_tenant_id();
        let (wh, aisle, shelf) = warehouse_tree(&mut reg, tenant);

        assert!(reg.reparent(tenant, wh, Some(wh)).is_err());
        assert!(matches!(
            reg.reparent(tenant, wh, Some(shelf)),
            Err(DomainError::InvariantViolation(_))
        ));
        reg.reparent(tenant, shelf, Some(wh)).unwrap();
        assert_eq!(reg.children(tenant, wh).len(), 2);
        assert_eq!(reg.children(tenant, aisle).len(), 0);
    }

    #[test]
    fn parent_must_belong_to_the_same_tenant() {
        let mut reg = LocationRegistry::new();
        let foreign = reg
            .register(NewLocation::new(test_tenant_id(), "X", "X", LocationKind::Store))
            .unwrap()
            .id_typed();
        let result = reg.register(
            NewLocation::new(test_tenant_id(), "Y", "Y", LocationKind::Shelf).under(foreign),
        );
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }

    #[test]
    fn only_one_default_per_tenant() {
        let mut reg = LocationRegistry::new();
        let tenant = test_tenant_id();
        let a = reg
            .register(NewLocation::new(tenant, "A", "A", LocationKind::Store).as_default())
            .unwrap();
        let b = reg
            .register(NewLocation::new(tenant, "B", "B", LocationKind::Store).as_default())
            .unwrap();

        let defaults: Vec<_> = reg.list(tenant).into_iter().filter(|l| l.is_default()).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id_typed(), b.id_typed());
        assert!(!reg.get(tenant, a.id_typed()).unwrap().is_default());
    }

    #[test]
    fn ensure_default_provisions_main_once() {
        let mut reg = LocationRegistry::new();
        let tenant = test_tenant_id();
        let first = reg.ensure_default(tenant).unwrap();
        let second = reg.ensure_default(tenant).unwrap();

        assert_eq!(first.code(), DEFAULT_LOCATION_CODE);
        assert_eq!(first.id_typed(), second.id_typed());
        assert_eq!(reg.list(tenant).len(), 1);
    }

    #[test]
    fn default_cannot_be_deactivated() {
        let mut reg = LocationRegistry::new();
        let tenant = test_tenant_id();
        let main = reg.ensure_default(tenant).unwrap();
        assert!(reg.deactivate(tenant, main.id_typed()).is_err());

        let other = reg
            .register(NewLocation::new(tenant, "B", "B", LocationKind::Transit))
            .unwrap();
        reg.deactivate(tenant, other.id_typed()).unwrap();
        assert!(!reg.get(tenant, other.id_typed()).unwrap().is_active());
        assert!(reg.set_default(tenant, other.id_typed()).is_err());
    }
}
