use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use stockledger_core::TenantId;
use stockledger_purchasing::{
    ImportBatch, ImportBatchId, ImportDomainError, LineOutcome, PendingAssociation,
    PendingAssociationId, PendingStatus,
};

use crate::imports::line_log::LineLog;
use crate::db::Database;
use crate::read_model::{InMemoryTenantStore, PostgresTenantStore, TenantStore, TenantStoreResult};

/// Everything the import side persists: batches, the pending review queue,
/// the per-line dedup log and the in-flight resolution claims.
pub struct ImportState {
    batches: Arc<dyn TenantStore<ImportBatchId, ImportBatch>>,
    pending: Arc<dyn TenantStore<PendingAssociationId, PendingAssociation>>,
    lines: LineLog,
    resolving: Mutex<HashSet<PendingAssociationId>>,
}

impl ImportState {
    pub fn new(
        batches: Arc<dyn TenantStore<ImportBatchId, ImportBatch>>,
        pending: Arc<dyn TenantStore<PendingAssociationId, PendingAssociation>>,
        lines: LineLog,
    ) -> Self {
        Self {
            batches,
            pending,
            lines,
            resolving: Mutex::new(HashSet::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryTenantStore::new()),
            Arc::new(InMemoryTenantStore::new()),
            LineLog::in_memory(),
        )
    }

    /// Batches, review queue and line log kept in `tenant_records`.
    pub fn postgres(db: Database) -> Self {
        Self::new(
            Arc::new(PostgresTenantStore::new(db.clone(), "import_batches")),
            Arc::new(PostgresTenantStore::new(db.clone(), "pending_associations")),
            LineLog::postgres(db),
        )
    }

    pub fn lines(&self) -> &LineLog {
        &self.lines
    }

    pub fn insert_batch(&self, batch: ImportBatch) -> TenantStoreResult<()> {
        self.batches.upsert(batch.tenant_id(), batch.id_typed(), batch)
    }

    pub fn batch(&self, tenant_id: TenantId, id: ImportBatchId) -> TenantStoreResult<Option<ImportBatch>> {
        self.batches.get(tenant_id, &id)
    }

    /// Batches of the tenant, oldest first.
    pub fn batches(&self, tenant_id: TenantId) -> TenantStoreResult<Vec<ImportBatch>> {
        let mut all = self.batches.list(tenant_id)?;
        all.sort_by_key(|b| (b.created_at(), b.id_typed().0));
        Ok(all)
    }

    /// Apply `f` to the stored batch atomically. `Ok(None)` when the batch
    /// is unknown.
    pub fn update_batch<T>(
        &self,
        tenant_id: TenantId,
        id: ImportBatchId,
        f: impl FnOnce(&mut ImportBatch) -> Result<T, ImportDomainError>,
    ) -> TenantStoreResult<Option<Result<T, ImportDomainError>>> {
        let mut f = Some(f);
        let mut out = None;
        self.batches.modify(tenant_id, &id, &mut |batch| {
            if let Some(f) = f.take() {
                out = Some(f(batch));
            }
        })?;
        Ok(out)
    }

    pub fn insert_pending(&self, pending: PendingAssociation) -> TenantStoreResult<()> {
        self.pending.upsert(pending.tenant_id(), pending.id_typed(), pending)
    }

    pub fn pending(
        &self,
        tenant_id: TenantId,
        id: PendingAssociationId,
    ) -> TenantStoreResult<Option<PendingAssociation>> {
        self.pending.get(tenant_id, &id)
    }

    pub fn update_pending<T>(
        &self,
        tenant_id: TenantId,
        id: PendingAssociationId,
        f: impl FnOnce(&mut PendingAssociation) -> Result<T, ImportDomainError>,
    ) -> TenantStoreResult<Option<Result<T, ImportDomainError>>> {
        let mut f = Some(f);
        let mut out = None;
        self.pending.modify(tenant_id, &id, &mut |pending| {
            if let Some(f) = f.take() {
                out = Some(f(pending));
            }
        })?;
        Ok(out)
    }

    /// The review queue: open items, oldest first.
    pub fn open_pending(&self, tenant_id: TenantId) -> TenantStoreResult<Vec<PendingAssociation>> {
        let mut open: Vec<_> = self
            .pending
            .list(tenant_id)?
            .into_iter()
            .filter(|p| p.status() == PendingStatus::Pending)
            .collect();
        open.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.document_key().cmp(b.document_key()))
                .then_with(|| a.line_number().cmp(&b.line_number()))
        });
        Ok(open)
    }

    /// The open review item raised for one document line, if any.
    pub fn open_pending_for_line(
        &self,
        tenant_id: TenantId,
        document_key: &str,
        line_number: u32,
    ) -> TenantStoreResult<Option<PendingAssociation>> {
        Ok(self.pending.list(tenant_id)?.into_iter().find(|p| {
            p.status() == PendingStatus::Pending
                && p.document_key() == document_key
                && p.line_number() == line_number
        }))
    }

    /// Batches whose lines wait on the review item `id`, including reimports
    /// of the document that raised it.
    pub fn batches_waiting_on(
        &self,
        tenant_id: TenantId,
        id: PendingAssociationId,
    ) -> TenantStoreResult<Vec<ImportBatchId>> {
        Ok(self
            .batches(tenant_id)?
            .into_iter()
            .filter(|b| {
                b.lines()
                    .iter()
                    .any(|l| l.outcome == LineOutcome::Pending { pending: id })
            })
            .map(|b| b.id_typed())
            .collect())
    }

    pub fn pending_for_batch(
        &self,
        tenant_id: TenantId,
        batch: ImportBatchId,
    ) -> TenantStoreResult<Vec<PendingAssociation>> {
        let mut items: Vec<_> = self
            .pending
            .list(tenant_id)?
            .into_iter()
            .filter(|p| p.batch() == batch)
            .collect();
        items.sort_by_key(|p| p.line_number());
        Ok(items)
    }

    /// Claim the right to resolve `id`. `None` while another resolution of
    /// the same item holds it.
    pub(crate) fn begin_resolution(&self, id: PendingAssociationId) -> Option<ResolutionClaim<'_>> {
        let mut held = self.resolving.lock().unwrap_or_else(|p| p.into_inner());
        if !held.insert(id) {
            return None;
        }
        Some(ResolutionClaim { state: self, id })
    }
}

pub(crate) struct ResolutionClaim<'a> {
    state: &'a ImportState,
    id: PendingAssociationId,
}

impl Drop for ResolutionClaim<'_> {
    fn drop(&mut self) {
        let mut held = self.state.resolving.lock().unwrap_or_else(|p| p.into_inner());
        held.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use stockledger_core::AggregateId;
    use stockledger_parties::SupplierId;

    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    #[test]
    fn update_batch_runs_once_and_reports_missing() {
        let state = ImportState::in_memory();
        let tenant = test_tenant_id();
        let batch = ImportBatch::new(tenant, "DOC-1", None, Utc::now());
        let id = batch.id_typed();
        state.insert_batch(batch).unwrap();

        let supplier = SupplierId::new(AggregateId::new());
        let started = state.update_batch(tenant, id, |b| b.start(supplier, Utc::now()));
        assert!(matches!(started, Ok(Some(Ok(())))));
        let again = state.update_batch(tenant, id, |b| b.start(supplier, Utc::now()));
        assert!(matches!(again, Ok(Some(Err(ImportDomainError::BatchTransition { .. })))));

        let missing = ImportBatchId::new(AggregateId::new());
        assert!(state.update_batch(tenant, missing, |_| Ok(())).unwrap().is_none());
        assert!(state.batch(test_tenant_id(), id).unwrap().is_none());
    }

    #[test]
    fn resolution_claim_is_exclusive_until_dropped() {
        let state = ImportState::in_memory();
        let id = PendingAssociationId::new(AggregateId::new());

        let claim = state.begin_resolution(id);
        assert!(claim.is_some());
        assert!(state.begin_resolution(id).is_none());
        drop(claim);
        assert!(state.begin_resolution(id).is_some());
    }
}
