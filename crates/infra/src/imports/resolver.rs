//! Human resolution of the pending review queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use stockledger_core::{TenantId, UserId};
use stockledger_events::EventBus;
use stockledger_inventory::{LocationId, MovementSource, StockMovement};
use stockledger_products::{Catalog, StockItem};
use stockledger_purchasing::{ImportBatchId, ImportStatus, PendingAssociation, PendingAssociationId};

use crate::error::{LedgerError, ResolveError};
use crate::imports::orchestrator::{line_idempotency_key, ImportOrchestrator};
use crate::imports::state::ImportState;
use crate::jobs::{retry_transient, RetryPolicy};
use crate::ledger::{CreateMovement, LedgerEngine, LedgerEnvelope, LedgerStore};
use crate::suppliers::{LearnMapping, SupplierMaps};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvePending {
    pub tenant_id: TenantId,
    pub pending: PendingAssociationId,
    pub item: StockItem,
    pub actor: UserId,
    /// Learn a supplier mapping so the next document matches directly.
    pub create_mapping: bool,
    /// Overrides the location the import would have used.
    pub location: Option<LocationId>,
}

impl ResolvePending {
    pub fn new(tenant_id: TenantId, pending: PendingAssociationId, item: StockItem, actor: UserId) -> Self {
        Self {
            tenant_id,
            pending,
            item,
            actor,
            create_mapping: true,
            location: None,
        }
    }

    pub fn without_mapping(mut self) -> Self {
        self.create_mapping = false;
        self
    }

    pub fn at(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub pending: PendingAssociation,
    /// The receipt posted for the line; `None` when ignored.
    pub movement: Option<StockMovement>,
    /// Status of the originating batch after this item closed.
    pub batch_status: Option<ImportStatus>,
}

pub struct PendingResolver<S, C, B> {
    ledger: Arc<LedgerEngine<S, C, B>>,
    maps: Arc<SupplierMaps>,
    state: Arc<ImportState>,
    retry: RetryPolicy,
}

impl<S, C, B> PendingResolver<S, C, B>
where
    S: LedgerStore,
    C: Catalog,
    B: EventBus<LedgerEnvelope>,
{
    pub fn new(
        ledger: Arc<LedgerEngine<S, C, B>>,
        maps: Arc<SupplierMaps>,
        state: Arc<ImportState>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            maps,
            state,
            retry,
        }
    }

    /// The review queue of the tenant, oldest first.
    pub fn list_open(&self, tenant_id: TenantId) -> Result<Vec<PendingAssociation>, ResolveError> {
        Ok(self.state.open_pending(tenant_id)?)
    }

    /// Link the line to an item that already existed and receive it.
    #[instrument(skip(self, req), fields(tenant_id = %req.tenant_id, pending = %req.pending), err)]
    pub fn resolve_with_existing(&self, req: ResolvePending) -> Result<Resolution, ResolveError> {
        self.resolve(req, false)
    }

    /// Link the line to an item the caller just created for it and receive it.
    #[instrument(skip(self, req), fields(tenant_id = %req.tenant_id, pending = %req.pending), err)]
    pub fn resolve_with_new_product(&self, req: ResolvePending) -> Result<Resolution, ResolveError> {
        self.resolve(req, true)
    }

    /// Dismiss the line without touching stock.
    #[instrument(skip(self), err)]
    pub fn ignore(
        &self,
        tenant_id: TenantId,
        id: PendingAssociationId,
        actor: UserId,
    ) -> Result<Resolution, ResolveError> {
        let _claim = self.state.begin_resolution(id).ok_or(ResolveError::InFlight(id))?;
        let now = Utc::now();
        let pending = self
            .state
            .update_pending(tenant_id, id, |p| {
                p.ignore(actor, now)?;
                Ok(p.clone())
            })?
            .ok_or(ResolveError::NotFound(id))??;
        let batch_status = self.close_on_batches(&pending, now);
        info!(pending = %id, "pending item ignored");
        Ok(Resolution {
            pending,
            movement: None,
            batch_status,
        })
    }

    fn resolve(&self, req: ResolvePending, created: bool) -> Result<Resolution, ResolveError> {
        let id = req.pending;
        let _claim = self.state.begin_resolution(id).ok_or(ResolveError::InFlight(id))?;
        let pending = self
            .state
            .pending(req.tenant_id, id)?
            .ok_or(ResolveError::NotFound(id))?;
        pending.ensure_open()?;

        let cmd = CreateMovement::receipt(req.tenant_id, req.actor, req.item, pending.quantity())
            .at(req.location.unwrap_or(pending.location()))
            .with_cost(pending.unit_cost())
            .from_document(pending.supplier(), pending.document_key())
            .with_source(MovementSource::Import)
            .with_idempotency_key(line_idempotency_key(pending.document_key(), pending.line_number()));
        let movement = retry_transient(
            &self.retry,
            || self.ledger.create_movement(cmd.clone()),
            LedgerError::is_transient,
        )?;

        let now = Utc::now();
        let movement_id = movement.id();
        let pending = self
            .state
            .update_pending(req.tenant_id, id, |p| {
                if created {
                    p.create(req.item, movement_id, req.actor, now)?;
                } else {
                    p.link(req.item, movement_id, req.actor, now)?;
                }
                Ok(p.clone())
            })?
            .ok_or(ResolveError::NotFound(id))??;

        if req.create_mapping {
            self.learn(&pending, req.item, now);
        }
        let batch_status = self.close_on_batches(&pending, now);

        info!(
            pending = %id,
            item = %req.item,
            movement = %movement_id,
            status = ?pending.status(),
            "pending item resolved"
        );
        Ok(Resolution {
            pending,
            movement: Some(movement),
            batch_status,
        })
    }

    fn learn(&self, pending: &PendingAssociation, item: StockItem, now: DateTime<Utc>) {
        let Some(sku) = pending.supplier_sku() else {
            return;
        };
        let learned = self.maps.learn(
            LearnMapping {
                tenant_id: pending.tenant_id(),
                supplier: pending.supplier(),
                supplier_sku: sku,
                item,
                barcode: pending.barcode(),
                description: Some(pending.description()),
                unit_cost: pending.unit_cost(),
                quantity: pending.quantity(),
                purchased_on: pending.issued_on(),
            },
            now,
        );
        if let Err(e) = learned {
            warn!(pending = %pending.id_typed(), error = %e, "supplier mapping not learned");
        }
    }

    /// Close the item on the batch that raised it and on every reimport
    /// batch waiting on it. Returns the originating batch's status.
    fn close_on_batches(&self, pending: &PendingAssociation, now: DateTime<Utc>) -> Option<ImportStatus> {
        let tenant_id = pending.tenant_id();
        let origin = pending.batch();
        match self.state.batches_waiting_on(tenant_id, pending.id_typed()) {
            Ok(waiting) => {
                for batch in waiting.into_iter().filter(|b| *b != origin) {
                    self.close_on_batch(tenant_id, batch, now);
                }
            }
            Err(e) => warn!(pending = %pending.id_typed(), error = %e, "reimport batches not updated"),
        }
        self.close_on_batch(tenant_id, origin, now)
    }

    /// The item is terminal either way; a batch that cannot be updated only
    /// costs the status bookkeeping.
    fn close_on_batch(&self, tenant_id: TenantId, batch: ImportBatchId, now: DateTime<Utc>) -> Option<ImportStatus> {
        match self.state.update_batch(tenant_id, batch, |b| b.pending_closed(now)) {
            Ok(Some(Ok(status))) => {
                if status != ImportStatus::PendingReview {
                    info!(%batch, ?status, "import batch left review");
                }
                Some(status)
            }
            Ok(Some(Err(e))) => {
                warn!(%batch, error = %e, "batch status not updated");
                None
            }
            Err(e) => {
                warn!(%batch, error = %e, "batch status not updated");
                None
            }
            Ok(None) => {
                warn!(%batch, "batch of pending item not found");
                None
            }
        }
    }
}

impl<S, C, B> ImportOrchestrator<S, C, B>
where
    S: LedgerStore,
    C: Catalog + Clone,
    B: EventBus<LedgerEnvelope>,
{
    /// A resolver sharing this orchestrator's ledger, mappings and state.
    pub fn resolver(&self) -> PendingResolver<S, C, B> {
        PendingResolver::new(
            self.ledger().clone(),
            self.maps().clone(),
            self.state().clone(),
            self.config().retry.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use stockledger_core::AggregateId;
    use stockledger_events::InMemoryEventBus;
    use stockledger_matching::MatchTier;
    use stockledger_parties::{SupplierMapIndex, SupplierMapKey};
    use stockledger_products::{InMemoryCatalog, Product, ProductId};
    use stockledger_purchasing::{DocumentLine, DocumentSupplier, LineOutcome, PendingStatus, SupplierDocument};

    use super::*;
    use crate::config::{ImportConfig, LedgerConfig};
    use crate::imports::orchestrator::{ImportReport, ImportRequest};
    use crate::jobs::CancellationToken;
    use crate::ledger::InMemoryLedgerStore;
    use crate::suppliers::SupplierDirectory;

    type TestOrchestrator =
        ImportOrchestrator<InMemoryLedgerStore, Arc<InMemoryCatalog>, Arc<InMemoryEventBus<LedgerEnvelope>>>;

    struct Fixture {
        tenant: TenantId,
        actor: UserId,
        catalog: Arc<InMemoryCatalog>,
        importer: TestOrchestrator,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        let ledger = Arc::new(LedgerEngine::new(
            InMemoryLedgerStore::new(),
            catalog.clone(),
            Arc::new(InMemoryEventBus::new()),
            LedgerConfig::default(),
        ));
        Fixture {
            tenant: TenantId::new(),
            actor: UserId::new(),
            catalog,
            importer: ImportOrchestrator::new(
                ledger,
                Arc::new(SupplierDirectory::in_memory()),
                Arc::new(SupplierMaps::in_memory()),
                Arc::new(ImportState::in_memory()),
                ImportConfig::default().with_retry(RetryPolicy::no_retry()),
            ),
        }
    }

    fn document(key: &str, lines: Vec<DocumentLine>) -> SupplierDocument {
        SupplierDocument {
            key: key.into(),
            number: None,
            issued_on: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
            supplier: DocumentSupplier {
                tax_id: "11222333000181".into(),
                company_name: "Aviamentos Sul".into(),
                trade_name: None,
            },
            lines,
        }
    }

    impl Fixture {
        fn import(&self, doc: SupplierDocument) -> ImportReport {
            self.importer
                .import(ImportRequest::new(self.tenant, self.actor, doc), &CancellationToken::new())
                .unwrap()
        }

        fn product(&self, sku: &str) -> StockItem {
            self.catalog
                .add_product(Product::simple(self.tenant, sku, format!("Botao {sku}")).unwrap())
                .unwrap()
        }
    }

    fn unmatched(line: u32, sku: &str) -> DocumentLine {
        DocumentLine::new(line, "BOTAO MADREPEROLA 12MM", Decimal::from(50), Decimal::new(15, 2)).with_sku(sku)
    }

    #[test]
    fn resolving_posts_the_receipt_and_settles_the_batch() {
        let f = fixture();
        let report = f.import(document("DOC-9", vec![unmatched(1, "BT-12")]));
        assert_eq!(report.status, ImportStatus::PendingReview);
        let resolver = f.importer.resolver();
        let pending = resolver.list_open(f.tenant).unwrap()[0].id_typed();

        let item = f.product("BOT-12");
        let resolution = resolver
            .resolve_with_existing(ResolvePending::new(f.tenant, pending, item, f.actor))
            .unwrap();

        assert_eq!(resolution.pending.status(), PendingStatus::Linked);
        assert_eq!(resolution.batch_status, Some(ImportStatus::Completed));
        let movement = resolution.movement.unwrap();
        assert_eq!(movement.quantity(), Decimal::from(50));
        assert_eq!(movement.location(), report.location);
        assert!(resolver.list_open(f.tenant).unwrap().is_empty());
        assert_eq!(
            f.importer.state().batch(f.tenant, report.batch).unwrap().unwrap().status(),
            ImportStatus::Completed
        );
    }

    #[test]
    fn resolution_with_mapping_makes_the_next_import_match_silver() {
        let f = fixture();
        f.import(document("DOC-1", vec![unmatched(1, "BT-12")]));
        let resolver = f.importer.resolver();
        let pending = resolver.list_open(f.tenant).unwrap()[0].id_typed();
        let item = f.product("BOT-12");
        resolver
            .resolve_with_new_product(ResolvePending::new(f.tenant, pending, item, f.actor))
            .unwrap();

        let next = f.import(document("DOC-2", vec![unmatched(1, "BT-12")]));
        assert_eq!(next.status, ImportStatus::Completed);
        let batch = f.importer.state().batch(f.tenant, next.batch).unwrap().unwrap();
        assert!(matches!(
            batch.lines()[0].outcome,
            LineOutcome::Posted { tier: MatchTier::Silver, .. }
        ));
    }

    #[test]
    fn learned_mapping_keeps_the_document_issue_date() {
        let f = fixture();
        let report = f.import(document("DOC-1", vec![unmatched(1, "BT-12")]));
        let resolver = f.importer.resolver();
        let pending = resolver.list_open(f.tenant).unwrap()[0].id_typed();
        let item = f.product("BOT-12");
        resolver
            .resolve_with_existing(ResolvePending::new(f.tenant, pending, item, f.actor))
            .unwrap();

        let mapping = f
            .importer
            .maps()
            .lookup(&SupplierMapKey::new(f.tenant, report.supplier, "BT-12"))
            .unwrap();
        assert_eq!(mapping.last_purchase(), NaiveDate::from_ymd_opt(2026, 5, 4));
    }

    #[test]
    fn reimport_waits_on_the_open_item_and_settles_with_it() {
        let f = fixture();
        let first = f.import(document("DOC-1", vec![unmatched(1, "BT-12")]));
        let second = f.import(document("DOC-1", vec![unmatched(1, "BT-12")]));
        assert_eq!(second.status, ImportStatus::PendingReview);
        assert_eq!(second.pending, first.pending);
        assert_eq!(f.importer.resolver().list_open(f.tenant).unwrap().len(), 1);

        let item = f.product("BOT-12");
        let resolution = f
            .importer
            .resolver()
            .resolve_with_existing(ResolvePending::new(f.tenant, first.pending[0], item, f.actor))
            .unwrap();

        assert_eq!(resolution.batch_status, Some(ImportStatus::Completed));
        let state = f.importer.state();
        assert_eq!(state.batch(f.tenant, first.batch).unwrap().unwrap().status(), ImportStatus::Completed);
        assert_eq!(state.batch(f.tenant, second.batch).unwrap().unwrap().status(), ImportStatus::Completed);
        assert_eq!(
            f.importer.ledger().balance(f.tenant, item, first.location).unwrap().quantity(),
            Decimal::from(50)
        );
    }

    #[test]
    fn terminal_items_cannot_be_resolved_again() {
        let f = fixture();
        f.import(document("DOC-1", vec![unmatched(1, "BT-12"), unmatched(2, "BT-14")]));
        let resolver = f.importer.resolver();
        let open = resolver.list_open(f.tenant).unwrap();
        let first = open[0].id_typed();

        let ignored = resolver.ignore(f.tenant, first, f.actor).unwrap();
        assert_eq!(ignored.pending.status(), PendingStatus::Ignored);
        assert_eq!(ignored.batch_status, Some(ImportStatus::PendingReview));

        let item = f.product("BOT-12");
        let err = resolver
            .resolve_with_existing(ResolvePending::new(f.tenant, first, item, f.actor))
            .unwrap_err();
        assert!(matches!(err, ResolveError::AlreadyResolved(PendingStatus::Ignored)));
        assert!(matches!(
            resolver.ignore(f.tenant, first, f.actor),
            Err(ResolveError::AlreadyResolved(_))
        ));
    }

    #[test]
    fn unknown_and_in_flight_items_are_refused() {
        let f = fixture();
        f.import(document("DOC-1", vec![unmatched(1, "BT-12")]));
        let resolver = f.importer.resolver();
        let pending = resolver.list_open(f.tenant).unwrap()[0].id_typed();
        let item = f.product("BOT-12");

        let other_tenant = ResolvePending::new(TenantId::new(), pending, item, f.actor);
        assert!(matches!(
            resolver.resolve_with_existing(other_tenant),
            Err(ResolveError::NotFound(_))
        ));

        let claim = f.importer.state().begin_resolution(pending);
        assert!(matches!(
            resolver.resolve_with_existing(ResolvePending::new(f.tenant, pending, item, f.actor)),
            Err(ResolveError::InFlight(_))
        ));
        drop(claim);
        assert!(resolver
            .resolve_with_existing(ResolvePending::new(f.tenant, pending, item, f.actor))
            .is_ok());
    }

    #[test]
    fn ledger_rejection_leaves_the_item_open() {
        let f = fixture();
        f.import(document("DOC-1", vec![unmatched(1, "BT-12")]));
        let resolver = f.importer.resolver();
        let pending = resolver.list_open(f.tenant).unwrap()[0].id_typed();

        let missing = StockItem::standalone(ProductId::new(AggregateId::new()));
        let err = resolver
            .resolve_with_existing(ResolvePending::new(f.tenant, pending, missing, f.actor))
            .unwrap_err();
        assert!(matches!(err, ResolveError::Ledger(_)));
        assert_eq!(resolver.list_open(f.tenant).unwrap().len(), 1);
    }
}
