//! Per-line deduplication for supplier documents.
//!
//! A line is identified by (tenant, document key, line number). An import
//! claims a line before touching the ledger and marks it done afterwards;
//! a failed line releases its claim so a later import can retry it.

use serde::{Deserialize, Serialize};

use stockledger_core::TenantId;

use crate::db::Database;
use crate::read_model::{InMemoryTenantStore, PostgresTenantStore, TenantStore, TenantStoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineState {
    Claimed,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// This caller owns the line now.
    Acquired,
    /// An earlier import finished it.
    AlreadyDone,
    /// Another import is processing it right now.
    InProgress,
}

pub struct LineLog {
    store: Box<dyn TenantStore<(String, u32), LineState>>,
}

impl LineLog {
    pub fn new(store: impl TenantStore<(String, u32), LineState> + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }

    pub fn postgres(db: Database) -> Self {
        Self::new(PostgresTenantStore::new(db, "import_lines"))
    }

    pub fn claim(&self, tenant_id: TenantId, document_key: &str, line: u32) -> TenantStoreResult<Claim> {
        let (state, acquired) = self
            .store
            .get_or_insert(tenant_id, (document_key.to_string(), line), LineState::Claimed)?;
        Ok(match (acquired, state) {
            (true, _) => Claim::Acquired,
            (false, LineState::Done) => Claim::AlreadyDone,
            (false, LineState::Claimed) => Claim::InProgress,
        })
    }

    pub fn complete(&self, tenant_id: TenantId, document_key: &str, line: u32) -> TenantStoreResult<()> {
        self.store
            .upsert(tenant_id, (document_key.to_string(), line), LineState::Done)
    }

    pub fn release(&self, tenant_id: TenantId, document_key: &str, line: u32) -> TenantStoreResult<()> {
        self.store.remove(tenant_id, &(document_key.to_string(), line)).map(|_| ())
    }

    pub fn state(
        &self,
        tenant_id: TenantId,
        document_key: &str,
        line: u32,
    ) -> TenantStoreResult<Option<LineState>> {
        self.store.get(tenant_id, &(document_key.to_string(), line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_lifecycle() {
        let log = LineLog::in_memory();
        let tenant = TenantId::new();

        assert_eq!(log.claim(tenant, "DOC", 1).unwrap(), Claim::Acquired);
        assert_eq!(log.claim(tenant, "DOC", 1).unwrap(), Claim::InProgress);
        log.complete(tenant, "DOC", 1).unwrap();
        assert_eq!(log.claim(tenant, "DOC", 1).unwrap(), Claim::AlreadyDone);

        assert_eq!(log.claim(tenant, "DOC", 2).unwrap(), Claim::Acquired);
        log.release(tenant, "DOC", 2).unwrap();
        assert_eq!(log.state(tenant, "DOC", 2).unwrap(), None);
        assert_eq!(log.claim(tenant, "DOC", 2).unwrap(), Claim::Acquired);
    }

    #[test]
    fn same_document_key_is_independent_per_tenant() {
        let log = LineLog::in_memory();
        let (a, b) = (TenantId::new(), TenantId::new());
        log.claim(a, "DOC", 1).unwrap();
        log.complete(a, "DOC", 1).unwrap();
        assert_eq!(log.claim(b, "DOC", 1).unwrap(), Claim::Acquired);
    }
}
