//! Tenant-isolated record storage for the import side.

pub mod postgres;
pub mod tenant_store;

pub use postgres::PostgresTenantStore;
pub use tenant_store::{InMemoryTenantStore, TenantStore, TenantStoreError, TenantStoreResult};
