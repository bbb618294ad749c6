//! Supplier document import.
//!
//! ```text
//! validate doc ─▶ supplier get-or-create ─▶ PROCESSING ─▶ destination
//!     └─ per line: cancelled? ─▶ claim ─▶ validate ─▶ match
//!                    hit  ─▶ post IN (retry transient) ─▶ learn mapping ─▶ complete
//!                    miss ─▶ pending association + suggestions ─▶ complete
//! ─▶ settle batch
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use stockledger_core::{TenantId, UserId};
use stockledger_events::EventBus;
use stockledger_inventory::{LocationId, MovementId, MovementSource, StockMovement};
use stockledger_matching::{suggest, MatchEngine};
use stockledger_parties::SupplierId;
use stockledger_products::{Catalog, StockItem};
use stockledger_purchasing::{
    DocumentLine, ImportBatch, ImportBatchId, ImportCounts, ImportDomainError, ImportStatus, LineOutcome,
    PendingAssociation, PendingAssociationId, PendingOrigin, SupplierDocument,
};

use crate::config::ImportConfig;
use crate::error::{ImportError, LedgerError};
use crate::imports::line_log::Claim;
use crate::imports::state::ImportState;
use crate::jobs::{retry_transient, CancellationToken};
use crate::ledger::{CreateMovement, LedgerEngine, LedgerEnvelope, LedgerStore};
use crate::read_model::TenantStoreResult;
use crate::suppliers::{LearnMapping, SupplierDirectory, SupplierError, SupplierMaps};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub tenant_id: TenantId,
    pub actor: UserId,
    pub document: SupplierDocument,
    /// Destination; falls back to the configured code, then the scope default.
    pub location: Option<LocationId>,
}

impl ImportRequest {
    pub fn new(tenant_id: TenantId, actor: UserId, document: SupplierDocument) -> Self {
        Self {
            tenant_id,
            actor,
            document,
            location: None,
        }
    }

    pub fn into_location(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineError {
    pub line_number: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub batch: ImportBatchId,
    pub status: ImportStatus,
    pub supplier: SupplierId,
    pub location: LocationId,
    pub counts: ImportCounts,
    pub movements: Vec<MovementId>,
    pub pending: Vec<PendingAssociationId>,
    pub errors: Vec<LineError>,
    pub cancelled: bool,
}

struct LineContext<'a> {
    tenant_id: TenantId,
    actor: UserId,
    batch: ImportBatchId,
    document: &'a SupplierDocument,
    supplier: SupplierId,
    location: LocationId,
    now: DateTime<Utc>,
}

pub struct ImportOrchestrator<S, C, B> {
    ledger: Arc<LedgerEngine<S, C, B>>,
    matcher: MatchEngine<C, Arc<SupplierMaps>>,
    suppliers: Arc<SupplierDirectory>,
    maps: Arc<SupplierMaps>,
    state: Arc<ImportState>,
    config: ImportConfig,
}

impl<S, C, B> ImportOrchestrator<S, C, B>
where
    S: LedgerStore,
    C: Catalog + Clone,
    B: EventBus<LedgerEnvelope>,
{
    pub fn new(
        ledger: Arc<LedgerEngine<S, C, B>>,
        suppliers: Arc<SupplierDirectory>,
        maps: Arc<SupplierMaps>,
        state: Arc<ImportState>,
        config: ImportConfig,
    ) -> Self {
        let matcher = MatchEngine::new(ledger.catalog().clone(), maps.clone());
        Self {
            ledger,
            matcher,
            suppliers,
            maps,
            state,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerEngine<S, C, B>> {
        &self.ledger
    }

    pub fn state(&self) -> &Arc<ImportState> {
        &self.state
    }

    pub fn suppliers(&self) -> &Arc<SupplierDirectory> {
        &self.suppliers
    }

    pub fn maps(&self) -> &Arc<SupplierMaps> {
        &self.maps
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Import one document. Document-level failures return an error and
    /// leave the batch in `ERROR`; line-level failures are reported on the
    /// batch. Cancellation is observed between lines only.
    #[instrument(
        skip(self, request, cancel),
        fields(tenant_id = %request.tenant_id, document_key = %request.document.key),
        err
    )]
    pub fn import(&self, request: ImportRequest, cancel: &CancellationToken) -> Result<ImportReport, ImportError> {
        let ImportRequest {
            tenant_id,
            actor,
            document,
            location,
        } = request;
        let now = Utc::now();

        let batch = ImportBatch::new(tenant_id, document.key.clone(), document.number.clone(), now);
        let batch_id = batch.id_typed();
        self.state.insert_batch(batch)?;

        if let Err(e) = document.validate() {
            let reason = e.to_string();
            self.fail_batch(tenant_id, batch_id, &reason)?;
            return Err(ImportError::MalformedDocument { batch: batch_id, reason });
        }

        let supplier = match self
            .suppliers
            .get_or_create(tenant_id, &document.supplier, self.config.strict_tax_ids, now)
        {
            Ok(s) => s.id_typed(),
            Err(SupplierError::Domain(e)) => {
                let reason = e.to_string();
                self.fail_batch(tenant_id, batch_id, &reason)?;
                return Err(ImportError::SupplierUnresolvable { batch: batch_id, reason });
            }
            Err(SupplierError::Store(e)) => {
                self.fail_batch(tenant_id, batch_id, &e.to_string())?;
                return Err(e.into());
            }
        };
        self.with_batch(tenant_id, batch_id, |b| b.start(supplier, now))?;

        let location = match self.destination(tenant_id, location) {
            Ok(id) => id,
            Err(reason) => {
                self.fail_batch(tenant_id, batch_id, &reason)?;
                return Err(ImportError::Destination { batch: batch_id, reason });
            }
        };

        let ctx = LineContext {
            tenant_id,
            actor,
            batch: batch_id,
            document: &document,
            supplier,
            location,
            now,
        };
        let mut report = ImportReport {
            batch: batch_id,
            status: ImportStatus::Processing,
            supplier,
            location,
            counts: ImportCounts::default(),
            movements: Vec::new(),
            pending: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
        };

        for line in &document.lines {
            if cancel.is_cancelled() {
                info!(line_number = line.line_number, "import cancelled between lines");
                self.with_batch(tenant_id, batch_id, |b| {
                    b.mark_cancelled();
                    Ok(())
                })?;
                report.cancelled = true;
                break;
            }

            let outcome = self.process_line(&ctx, line);
            debug!(line_number = line.line_number, ?outcome, "line processed");
            match &outcome {
                LineOutcome::Posted { movement, .. } => report.movements.push(*movement),
                LineOutcome::Pending { pending } => report.pending.push(*pending),
                LineOutcome::Failed { error } => report.errors.push(LineError {
                    line_number: line.line_number,
                    error: error.clone(),
                }),
                LineOutcome::Skipped => {}
            }
            self.with_batch(tenant_id, batch_id, |b| {
                b.record(line.line_number, outcome);
                Ok(())
            })?;
        }

        let (status, counts) = self.with_batch(tenant_id, batch_id, |b| {
            let status = b.settle(Utc::now())?;
            Ok((status, b.counts()))
        })?;
        report.status = status;
        report.counts = counts;

        info!(
            batch = %batch_id,
            ?status,
            posted = counts.posted,
            pending = counts.pending,
            failed = counts.failed,
            skipped = counts.skipped,
            "import batch settled"
        );
        Ok(report)
    }

    /// Import-state failures fail the line instead of skipping it.
    fn process_line(&self, ctx: &LineContext<'_>, line: &DocumentLine) -> LineOutcome {
        self.try_line(ctx, line).unwrap_or_else(|e| {
            warn!(line_number = line.line_number, error = %e, "import state failed while processing line");
            LineOutcome::Failed {
                error: format!("line {}: {e}", line.line_number),
            }
        })
    }

    fn try_line(&self, ctx: &LineContext<'_>, line: &DocumentLine) -> TenantStoreResult<LineOutcome> {
        let key = ctx.document.key.as_str();
        match self.state.lines().claim(ctx.tenant_id, key, line.line_number)? {
            Claim::Acquired => {}
            // A line still waiting in review keeps this batch waiting too.
            Claim::AlreadyDone => {
                return Ok(
                    match self.state.open_pending_for_line(ctx.tenant_id, key, line.line_number)? {
                        Some(pending) => LineOutcome::Pending {
                            pending: pending.id_typed(),
                        },
                        None => LineOutcome::Skipped,
                    },
                );
            }
            Claim::InProgress => return Ok(LineOutcome::Skipped),
        }

        if let Err(error) = line.validate() {
            self.release_line(ctx, line);
            return Ok(LineOutcome::Failed { error });
        }

        let matched = self
            .matcher
            .match_item(ctx.tenant_id, &line.external_item(ctx.supplier));
        let outcome = match matched.item {
            Some(item) => match self.post_line(ctx, line, item) {
                Ok(movement) => {
                    self.learn(ctx, line, item);
                    LineOutcome::Posted {
                        movement: movement.id(),
                        tier: matched.tier,
                    }
                }
                Err(e) => {
                    warn!(line_number = line.line_number, error = %e, "line could not be posted");
                    self.release_line(ctx, line);
                    return Ok(LineOutcome::Failed {
                        error: format!("line {}: {e}", line.line_number),
                    });
                }
            },
            None => {
                let suggestions = suggest(
                    self.matcher.catalog(),
                    ctx.tenant_id,
                    &line.description,
                    self.config.suggestion_limit,
                );
                let pending = PendingAssociation::from_line(
                    PendingOrigin {
                        tenant_id: ctx.tenant_id,
                        batch: ctx.batch,
                        document_key: key,
                        document_number: ctx.document.number.as_deref(),
                        issued_on: ctx.document.issued_on,
                        supplier: ctx.supplier,
                        location: ctx.location,
                    },
                    line,
                    suggestions,
                    ctx.now,
                );
                let id = pending.id_typed();
                if let Err(e) = self.state.insert_pending(pending) {
                    self.release_line(ctx, line);
                    return Err(e);
                }
                LineOutcome::Pending { pending: id }
            }
        };
        // The outcome already happened; a lost mark only weakens dedup.
        if let Err(e) = self.state.lines().complete(ctx.tenant_id, key, line.line_number) {
            warn!(line_number = line.line_number, error = %e, "line could not be marked done");
        }
        Ok(outcome)
    }

    fn release_line(&self, ctx: &LineContext<'_>, line: &DocumentLine) {
        let key = ctx.document.key.as_str();
        if let Err(e) = self.state.lines().release(ctx.tenant_id, key, line.line_number) {
            warn!(line_number = line.line_number, error = %e, "line claim could not be released");
        }
    }

    fn post_line(&self, ctx: &LineContext<'_>, line: &DocumentLine, item: StockItem) -> Result<StockMovement, LedgerError> {
        let cmd = CreateMovement::receipt(ctx.tenant_id, ctx.actor, item, line.quantity)
            .at(ctx.location)
            .with_cost(line.unit_cost)
            .from_document(ctx.supplier, ctx.document.key.as_str())
            .with_source(MovementSource::Import)
            .with_idempotency_key(line_idempotency_key(&ctx.document.key, line.line_number));
        retry_transient(
            &self.config.retry,
            || self.ledger.create_movement(cmd.clone()),
            LedgerError::is_transient,
        )
    }

    fn learn(&self, ctx: &LineContext<'_>, line: &DocumentLine, item: StockItem) {
        let Some(sku) = line.supplier_sku.as_deref() else {
            return;
        };
        let learned = self.maps.learn(
            LearnMapping {
                tenant_id: ctx.tenant_id,
                supplier: ctx.supplier,
                supplier_sku: sku,
                item,
                barcode: line.barcode.as_deref(),
                description: Some(line.description.as_str()),
                unit_cost: line.unit_cost,
                quantity: line.quantity,
                purchased_on: ctx.document.issued_on,
            },
            ctx.now,
        );
        if let Err(e) = learned {
            warn!(line_number = line.line_number, error = %e, "supplier mapping not learned");
        }
    }

    fn destination(&self, tenant_id: TenantId, requested: Option<LocationId>) -> Result<LocationId, String> {
        let registries = self.ledger.registries();
        if let Some(id) = requested {
            return registries
                .postable_location(tenant_id, id)
                .map(|l| l.id_typed())
                .map_err(|e| e.to_string());
        }
        if let Some(code) = self.config.default_location.as_deref() {
            let location = registries
                .location_by_code(tenant_id, code)
                .map_err(|e| e.to_string())?;
            return registries
                .postable_location(tenant_id, location.id_typed())
                .map(|l| l.id_typed())
                .map_err(|e| e.to_string());
        }
        registries
            .ensure_default_location(tenant_id)
            .map(|l| l.id_typed())
            .map_err(|e| e.to_string())
    }

    fn with_batch<T>(
        &self,
        tenant_id: TenantId,
        id: ImportBatchId,
        f: impl FnOnce(&mut ImportBatch) -> Result<T, ImportDomainError>,
    ) -> Result<T, ImportError> {
        match self.state.update_batch(tenant_id, id, f)? {
            Some(result) => Ok(result?),
            None => Err(ImportError::Store(format!("import batch {id} disappeared"))),
        }
    }

    fn fail_batch(&self, tenant_id: TenantId, id: ImportBatchId, reason: &str) -> Result<(), ImportError> {
        warn!(batch = %id, reason, "document rejected");
        self.with_batch(tenant_id, id, |b| b.fail(reason, Utc::now()))
    }
}

/// Ledger idempotency key of a document line.
pub fn line_idempotency_key(document_key: &str, line_number: u32) -> String {
    format!("{document_key}:{line_number}")
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use stockledger_events::InMemoryEventBus;
    use stockledger_inventory::{LocationKind, NewLocation};
    use stockledger_matching::MatchTier;
    use stockledger_products::{InMemoryCatalog, Product};
    use stockledger_purchasing::{DocumentSupplier, PendingStatus};

    use super::*;
    use crate::config::LedgerConfig;
    use crate::jobs::RetryPolicy;
    use crate::ledger::InMemoryLedgerStore;

    type TestOrchestrator =
        ImportOrchestrator<InMemoryLedgerStore, Arc<InMemoryCatalog>, Arc<InMemoryEventBus<LedgerEnvelope>>>;

    struct Fixture {
        tenant: TenantId,
        actor: UserId,
        catalog: Arc<InMemoryCatalog>,
        importer: TestOrchestrator,
    }

    fn fixture_with(config: ImportConfig) -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        let ledger = Arc::new(LedgerEngine::new(
            InMemoryLedgerStore::new(),
            catalog.clone(),
            Arc::new(InMemoryEventBus::new()),
            LedgerConfig::default(),
        ));
        let importer = ImportOrchestrator::new(
            ledger,
            Arc::new(SupplierDirectory::in_memory()),
            Arc::new(SupplierMaps::in_memory()),
            Arc::new(ImportState::in_memory()),
            config,
        );
        Fixture {
            tenant: TenantId::new(),
            actor: UserId::new(),
            catalog,
            importer,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ImportConfig::default().with_retry(RetryPolicy::no_retry()))
    }

    fn document(key: &str, lines: Vec<DocumentLine>) -> SupplierDocument {
        SupplierDocument {
            key: key.into(),
            number: Some("4512".into()),
            issued_on: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
            supplier: DocumentSupplier {
                tax_id: "11.222.333/0001-81".into(),
                company_name: "Linhas Corrente Ltda".into(),
                trade_name: None,
            },
            lines,
        }
    }

    impl Fixture {
        fn product(&self, sku: &str, barcode: Option<&str>) -> StockItem {
            let mut product = Product::simple(self.tenant, sku, format!("Linha {sku}")).unwrap();
            if let Some(code) = barcode {
                product = product.with_barcode(code);
            }
            self.catalog.add_product(product).unwrap()
        }

        fn run(&self, doc: SupplierDocument) -> Result<ImportReport, ImportError> {
            self.importer
                .import(ImportRequest::new(self.tenant, self.actor, doc), &CancellationToken::new())
        }

        fn on_hand(&self, item: StockItem) -> Decimal {
            self.importer.ledger().total_balance(self.tenant, item).unwrap().quantity
        }
    }

    #[test]
    fn matched_lines_are_posted_and_unmatched_go_to_review() {
        let f = fixture();
        let blue = f.product("LA-100", Some("7891234567895"));
        let red = f.product("LV-200", None);

        let report = f
            .run(document(
                "DOC-1",
                vec![
                    DocumentLine::new(1, "LINHA AZUL", Decimal::from(10), Decimal::new(250, 2))
                        .with_barcode("7891234567895")
                        .with_sku("X-1"),
                    DocumentLine::new(2, "LINHA VERMELHA", Decimal::from(4), Decimal::from(3)).with_sku("lv 200"),
                    DocumentLine::new(3, "AGULHA 90", Decimal::from(2), Decimal::ONE).with_sku("AG-90"),
                ],
            ))
            .unwrap();

        assert_eq!(report.status, ImportStatus::PendingReview);
        assert_eq!(report.counts.posted, 2);
        assert_eq!(report.counts.pending, 1);
        assert_eq!(report.movements.len(), 2);
        assert_eq!(f.on_hand(blue), Decimal::from(10));
        assert_eq!(f.on_hand(red), Decimal::from(4));

        let batch = f.importer.state().batch(f.tenant, report.batch).unwrap().unwrap();
        let tiers: Vec<_> = batch
            .lines()
            .iter()
            .filter_map(|l| match &l.outcome {
                LineOutcome::Posted { tier, .. } => Some(*tier),
                _ => None,
            })
            .collect();
        assert_eq!(tiers, vec![MatchTier::Gold, MatchTier::Bronze]);

        let queue = f.importer.state().open_pending(f.tenant).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].line_number(), 3);
        assert_eq!(queue[0].status(), PendingStatus::Pending);
        assert_eq!(queue[0].location(), report.location);
    }

    #[test]
    fn learned_mapping_matches_silver_on_the_next_document() {
        let f = fixture();
        let blue = f.product("LA-100", Some("7891234567895"));
        f.run(document(
            "DOC-1",
            vec![DocumentLine::new(1, "LINHA AZUL", Decimal::from(1), Decimal::ONE)
                .with_barcode("7891234567895")
                .with_sku("FORN-77")],
        ))
        .unwrap();

        let report = f
            .run(document(
                "DOC-2",
                vec![DocumentLine::new(1, "LINHA AZUL", Decimal::from(5), Decimal::ONE).with_sku("FORN-77")],
            ))
            .unwrap();
        assert_eq!(report.status, ImportStatus::Completed);
        let batch = f.importer.state().batch(f.tenant, report.batch).unwrap().unwrap();
        assert!(matches!(
            batch.lines()[0].outcome,
            LineOutcome::Posted { tier: MatchTier::Silver, .. }
        ));
        assert_eq!(f.on_hand(blue), Decimal::from(6));
    }

    #[test]
    fn reimport_skips_processed_lines_and_retries_failed_ones() {
        let f = fixture();
        let blue = f.product("LA-100", None);
        let lines = vec![
            DocumentLine::new(1, "LINHA AZUL", Decimal::from(3), Decimal::ONE).with_sku("LA-100"),
            DocumentLine::new(2, "LINHA AZUL", Decimal::ZERO, Decimal::ONE).with_sku("LA-100"),
        ];
        let first = f.run(document("DOC-1", lines.clone())).unwrap();
        assert_eq!(first.status, ImportStatus::Partial);
        assert_eq!(first.errors.len(), 1);
        assert_eq!(first.errors[0].line_number, 2);

        let second = f.run(document("DOC-1", lines)).unwrap();
        assert_eq!(second.counts.skipped, 1);
        assert_eq!(second.counts.failed, 1);
        assert_ne!(first.batch, second.batch);
        assert_eq!(f.on_hand(blue), Decimal::from(3));
        assert_eq!(
            f.importer.ledger().movements_for_document(f.tenant, "DOC-1").unwrap().len(),
            1
        );
    }

    #[test]
    fn malformed_document_fails_the_batch() {
        let f = fixture();
        let err = f.run(document("DOC-1", vec![])).unwrap_err();
        let ImportError::MalformedDocument { batch, .. } = err else {
            panic!("expected malformed document, got {err:?}");
        };
        let batch = f.importer.state().batch(f.tenant, batch).unwrap().unwrap();
        assert_eq!(batch.status(), ImportStatus::Error);
        assert!(!batch.errors().is_empty());
    }

    #[test]
    fn strict_tax_ids_reject_bad_suppliers() {
        let f = fixture_with(ImportConfig::default().with_strict_tax_ids(true));
        let mut doc = document(
            "DOC-1",
            vec![DocumentLine::new(1, "LINHA", Decimal::ONE, Decimal::ONE)],
        );
        doc.supplier.tax_id = "11.222.333/0001-00".into();
        assert!(matches!(f.run(doc), Err(ImportError::SupplierUnresolvable { .. })));
    }

    #[test]
    fn configured_location_code_is_the_destination() {
        let f = fixture_with(ImportConfig::default().with_default_location("REC"));
        let dock = f
            .importer
            .ledger()
            .registries()
            .register_location(NewLocation::new(f.tenant, "REC", "Receiving", LocationKind::Warehouse))
            .unwrap();
        let item = f.product("LA-100", None);

        let report = f
            .run(document(
                "DOC-1",
                vec![DocumentLine::new(1, "LINHA", Decimal::from(2), Decimal::ONE).with_sku("LA-100")],
            ))
            .unwrap();
        assert_eq!(report.location, dock.id_typed());
        let balance = f.importer.ledger().balance(f.tenant, item, dock.id_typed()).unwrap();
        assert_eq!(balance.quantity(), Decimal::from(2));
    }

    #[test]
    fn unknown_location_code_rejects_the_document() {
        let f = fixture_with(ImportConfig::default().with_default_location("NOPE"));
        let err = f
            .run(document(
                "DOC-1",
                vec![DocumentLine::new(1, "LINHA", Decimal::ONE, Decimal::ONE)],
            ))
            .unwrap_err();
        assert!(matches!(err, ImportError::Destination { .. }));
    }

    #[test]
    fn cancellation_before_the_first_line_leaves_an_error_batch() {
        let f = fixture();
        f.product("LA-100", None);
        let token = CancellationToken::new();
        token.cancel();
        let report = f
            .importer
            .import(
                ImportRequest::new(
                    f.tenant,
                    f.actor,
                    document(
                        "DOC-1",
                        vec![DocumentLine::new(1, "LINHA", Decimal::ONE, Decimal::ONE).with_sku("LA-100")],
                    ),
                ),
                &token,
            )
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.status, ImportStatus::Error);
        assert_eq!(report.counts.total, 0);
    }
}
