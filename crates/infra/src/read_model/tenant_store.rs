use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use stockledger_core::TenantId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantStoreError {
    /// A writer panicked while holding the lock; the contents are suspect.
    #[error("tenant store lock poisoned")]
    Poisoned,

    #[error("tenant store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("tenant store record unreadable: {0}")]
    Codec(String),
}

pub type TenantStoreResult<T> = Result<T, TenantStoreError>;

/// Tenant-isolated key/value store for import-side records (suppliers,
/// mappings, batches, pending associations).
///
/// Every operation is atomic with respect to the others; `get_or_insert`
/// and `modify` are the primitives callers build check-then-act on.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> TenantStoreResult<Option<V>>;

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> TenantStoreResult<()>;

    /// Insert `value` unless the key is taken. Returns the stored value and
    /// whether this call inserted it.
    fn get_or_insert(&self, tenant_id: TenantId, key: K, value: V) -> TenantStoreResult<(V, bool)>;

    /// Mutate the stored value in place. Returns the value after `f`, or
    /// `None` when the key is absent.
    fn modify(
        &self,
        tenant_id: TenantId,
        key: &K,
        f: &mut dyn FnMut(&mut V),
    ) -> TenantStoreResult<Option<V>>;

    fn remove(&self, tenant_id: TenantId, key: &K) -> TenantStoreResult<Option<V>>;

    fn list(&self, tenant_id: TenantId) -> TenantStoreResult<Vec<V>>;

    fn clear_tenant(&self, tenant_id: TenantId) -> TenantStoreResult<()>;
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> TenantStoreResult<Option<V>> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> TenantStoreResult<()> {
        (**self).upsert(tenant_id, key, value)
    }

    fn get_or_insert(&self, tenant_id: TenantId, key: K, value: V) -> TenantStoreResult<(V, bool)> {
        (**self).get_or_insert(tenant_id, key, value)
    }

    fn modify(
        &self,
        tenant_id: TenantId,
        key: &K,
        f: &mut dyn FnMut(&mut V),
    ) -> TenantStoreResult<Option<V>> {
        (**self).modify(tenant_id, key, f)
    }

    fn remove(&self, tenant_id: TenantId, key: &K) -> TenantStoreResult<Option<V>> {
        (**self).remove(tenant_id, key)
    }

    fn list(&self, tenant_id: TenantId) -> TenantStoreResult<Vec<V>> {
        (**self).list(tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) -> TenantStoreResult<()> {
        (**self).clear_tenant(tenant_id)
    }
}

/// In-memory tenant-isolated store.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<HashMap<(TenantId, K), V>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> TenantStoreResult<Option<V>> {
        let map = self.inner.read().map_err(|_| TenantStoreError::Poisoned)?;
        Ok(map.get(&(tenant_id, key.clone())).cloned())
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> TenantStoreResult<()> {
        let mut map = self.inner.write().map_err(|_| TenantStoreError::Poisoned)?;
        map.insert((tenant_id, key), value);
        Ok(())
    }

    fn get_or_insert(&self, tenant_id: TenantId, key: K, value: V) -> TenantStoreResult<(V, bool)> {
        let mut map = self.inner.write().map_err(|_| TenantStoreError::Poisoned)?;
        Ok(match map.entry((tenant_id, key)) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(e) => (e.insert(value).clone(), true),
        })
    }

    fn modify(
        &self,
        tenant_id: TenantId,
        key: &K,
        f: &mut dyn FnMut(&mut V),
    ) -> TenantStoreResult<Option<V>> {
        let mut map = self.inner.write().map_err(|_| TenantStoreError::Poisoned)?;
        Ok(map.get_mut(&(tenant_id, key.clone())).map(|value| {
            f(value);
            value.clone()
        }))
    }

    fn remove(&self, tenant_id: TenantId, key: &K) -> TenantStoreResult<Option<V>> {
        let mut map = self.inner.write().map_err(|_| TenantStoreError::Poisoned)?;
        Ok(map.remove(&(tenant_id, key.clone())))
    }

    fn list(&self, tenant_id: TenantId) -> TenantStoreResult<Vec<V>> {
        let map = self.inner.read().map_err(|_| TenantStoreError::Poisoned)?;
        Ok(map
            .iter()
            .filter_map(|((t, _k), v)| if *t == tenant_id { Some(v.clone()) } else { None })
            .collect())
    }

    fn clear_tenant(&self, tenant_id: TenantId) -> TenantStoreResult<()> {
        let mut map = self.inner.write().map_err(|_| TenantStoreError::Poisoned)?;
        map.retain(|(t, _k), _v| *t != tenant_id);
        Ok(())
    }
}
