//! The single entry point for writing stock.
//!
//! Every quantity change goes through [`LedgerEngine::create_movement`] (or
//! [`LedgerEngine::transfer`]), which validates, locks the affected balances,
//! lets the balance aggregate decide, commits balance and movement together
//! and only then publishes.
//!
//! ```text
//! validate ─▶ lock ─▶ idempotency replay? ─▶ StockBalance::record ─▶ commit ─▶ unlock ─▶ publish
//! ```

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use stockledger_core::{AggregateRoot, TenantId, UserId};
use stockledger_events::EventBus;
use stockledger_inventory::{
    AdjustmentReasonId, BalanceKey, BatchInfo, BatchLot, LocationId, MovementError, MovementId,
    MovementKind, MovementSource, RecordMovement, ScopePolicy, StockBalance, StockMovement,
};
use stockledger_parties::SupplierId;
use stockledger_products::{Catalog, StockItem};

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::ledger::events::{LedgerEnvelope, LedgerEvent};
use crate::ledger::locks::BalanceLocks;
use crate::ledger::registries::Registries;
use crate::ledger::store::{ItemTotal, LedgerCommit, LedgerStore};

/// Request to post one non-transfer movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMovement {
    pub tenant_id: TenantId,
    pub actor: UserId,
    pub kind: MovementKind,
    pub item: StockItem,
    pub location: Option<LocationId>,
    /// Amount for IN/OUT; the counted target for ADJ.
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub batch: Option<BatchInfo>,
    pub reason: Option<AdjustmentReasonId>,
    pub note: Option<String>,
    pub supplier: Option<SupplierId>,
    pub document_key: Option<String>,
    pub source: MovementSource,
    /// Permit this posting to drive the balance negative.
    pub allow_negative: bool,
    /// Ask to consume an expired batch; only honored where the scope allows.
    pub override_expiry: bool,
    /// Replaying a key returns the movement first posted under it.
    pub idempotency_key: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl CreateMovement {
    pub fn new(tenant_id: TenantId, actor: UserId, kind: MovementKind, item: StockItem, quantity: Decimal) -> Self {
        Self {
            tenant_id,
            actor,
            kind,
            item,
            location: None,
            quantity,
            unit_cost: None,
            batch: None,
            reason: None,
            note: None,
            supplier: None,
            document_key: None,
            source: MovementSource::Manual,
            allow_negative: false,
            override_expiry: false,
            idempotency_key: None,
            occurred_at: None,
        }
    }

    pub fn receipt(tenant_id: TenantId, actor: UserId, item: StockItem, quantity: Decimal) -> Self {
        Self::new(tenant_id, actor, MovementKind::In, item, quantity)
    }

    pub fn withdrawal(tenant_id: TenantId, actor: UserId, item: StockItem, quantity: Decimal) -> Self {
        Self::new(tenant_id, actor, MovementKind::Out, item, quantity)
    }

    pub fn adjustment(tenant_id: TenantId, actor: UserId, item: StockItem, counted: Decimal) -> Self {
        Self::new(tenant_id, actor, MovementKind::Adjustment, item, counted)
    }

    pub fn at(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_batch(mut self, batch: BatchInfo) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_reason(mut self, reason: AdjustmentReasonId, note: Option<&str>) -> Self {
        self.reason = Some(reason);
        self.note = note.map(str::to_string);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn from_document(mut self, supplier: SupplierId, document_key: impl Into<String>) -> Self {
        self.supplier = Some(supplier);
        self.document_key = Some(document_key.into());
        self
    }

    pub fn with_source(mut self, source: MovementSource) -> Self {
        self.source = source;
        self
    }

    pub fn allowing_negative(mut self) -> Self {
        self.allow_negative = true;
        self
    }

    pub fn overriding_expiry(mut self) -> Self {
        self.override_expiry = true;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }
}

/// A lot that expires inside the queried window (or already has).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiringLot {
    pub item: StockItem,
    pub location: LocationId,
    pub lot: BatchLot,
    pub expired: bool,
}

pub struct LedgerEngine<S, C, B> {
    store: S,
    catalog: C,
    bus: B,
    registries: Registries,
    locks: BalanceLocks,
    config: LedgerConfig,
}

impl<S, C, B> LedgerEngine<S, C, B>
where
    S: LedgerStore,
    C: Catalog,
    B: EventBus<LedgerEnvelope>,
{
    pub fn new(store: S, catalog: C, bus: B, config: LedgerConfig) -> Self {
        Self {
            store,
            catalog,
            bus,
            registries: Registries::new(config.default_policy),
            locks: BalanceLocks::new(),
            config,
        }
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(crate) fn locks(&self) -> &BalanceLocks {
        &self.locks
    }

    pub fn set_scope_policy(&self, tenant_id: TenantId, policy: ScopePolicy) -> Result<(), LedgerError> {
        Ok(self.registries.set_scope_policy(tenant_id, policy)?)
    }

    pub fn scope_policy(&self, tenant_id: TenantId) -> Result<ScopePolicy, LedgerError> {
        Ok(self.registries.scope_policy(tenant_id)?)
    }

    /// Validate, lock, decide, commit, publish.
    ///
    /// Every rejection happens before anything is written. A replayed
    /// idempotency key returns the original movement unchanged.
    #[instrument(
        skip(self, cmd),
        fields(tenant_id = %cmd.tenant_id, kind = %cmd.kind, item = %cmd.item),
        err
    )]
    pub fn create_movement(&self, cmd: CreateMovement) -> Result<StockMovement, LedgerError> {
        let location_id = cmd.location.ok_or(MovementError::LocationRequired)?;
        if cmd.kind.is_transfer_leg() {
            return Err(MovementError::invalid("transfer legs are posted through transfer").into());
        }
        if cmd.kind == MovementKind::Adjustment {
            self.registries
                .validate_adjustment(cmd.tenant_id, cmd.reason, cmd.note.as_deref())?;
        }
        let location = self.registries.postable_location(cmd.tenant_id, location_id)?;
        self.catalog.resolve(cmd.tenant_id, &cmd.item)?;
        let rules = self.registries.scope_policy(cmd.tenant_id)?.posting_rules(
            location.allows_negative(),
            cmd.allow_negative,
            cmd.override_expiry,
        )?;

        let key = BalanceKey::new(cmd.tenant_id, cmd.item, location_id);
        let guard = self.locks.acquire(&[key], self.config.lock_timeout)?;

        if let Some(idem) = cmd.idempotency_key.as_deref() {
            if let Some(existing) = self.store.find_by_idempotency_key(cmd.tenant_id, idem)? {
                if !replays(&existing, &key, cmd.kind, cmd.quantity) {
                    warn!(movement_id = %existing.id(), idempotency_key = idem, "idempotency key reused for a different movement");
                    return Err(MovementError::invalid(format!(
                        "idempotency key {idem:?} already used by movement {}",
                        existing.id()
                    ))
                    .into());
                }
                debug!(movement_id = %existing.id(), idempotency_key = idem, "replayed idempotent posting");
                return Ok(existing);
            }
        }

        let mut balance = self.store.balance(&key)?.unwrap_or_else(|| StockBalance::empty(key));
        let expected = balance.version();
        let movement = balance.record(&RecordMovement {
            movement_id: MovementId::generate(),
            key,
            kind: cmd.kind,
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            batch: cmd.batch,
            reason: cmd.reason,
            note: cmd.note,
            supplier: cmd.supplier,
            document_key: cmd.document_key,
            source: cmd.source,
            actor: cmd.actor,
            paired_movement: None,
            idempotency_key: cmd.idempotency_key,
            rules,
            occurred_at: cmd.occurred_at.unwrap_or_else(Utc::now),
        })?;

        self.store.commit(LedgerCommit {
            balances: vec![(balance, expected)],
            movements: vec![movement.clone()],
        })?;
        drop(guard);

        info!(
            movement_id = %movement.id(),
            location = %location.code(),
            delta = %movement.delta(),
            balance_after = %movement.balance_after(),
            "movement posted"
        );
        self.publish(LedgerEvent::MovementPosted {
            movement: movement.clone(),
        });
        Ok(movement)
    }

    /// Publication failures are logged; the commit already happened.
    pub(crate) fn publish(&self, event: LedgerEvent) {
        let envelope = event.into_envelope();
        let stream = envelope.stream().to_string();
        if let Err(e) = self.bus.publish(envelope) {
            warn!(stream = %stream, error = ?e, "failed to publish ledger event");
        }
    }

    // Queries

    /// Balance of one item at one location; zero if it never moved.
    pub fn balance(&self, tenant_id: TenantId, item: StockItem, location: LocationId) -> Result<StockBalance, LedgerError> {
        let key = BalanceKey::new(tenant_id, item, location);
        Ok(self.store.balance(&key)?.unwrap_or_else(|| StockBalance::empty(key)))
    }

    /// Item-wide quantity and blended cost across locations.
    pub fn total_balance(&self, tenant_id: TenantId, item: StockItem) -> Result<ItemTotal, LedgerError> {
        Ok(self.store.item_total(tenant_id, item)?)
    }

    pub fn balances_by_location(&self, tenant_id: TenantId, item: StockItem) -> Result<Vec<StockBalance>, LedgerError> {
        Ok(self.store.balances_for_item(tenant_id, item)?)
    }

    pub fn history(&self, tenant_id: TenantId, item: StockItem, location: LocationId) -> Result<Vec<StockMovement>, LedgerError> {
        Ok(self.store.history(&BalanceKey::new(tenant_id, item, location))?)
    }

    pub fn movement(&self, tenant_id: TenantId, id: MovementId) -> Result<Option<StockMovement>, LedgerError> {
        Ok(self.store.movement(tenant_id, id)?)
    }

    pub fn movements_for_document(&self, tenant_id: TenantId, document_key: &str) -> Result<Vec<StockMovement>, LedgerError> {
        Ok(self.store.movements_for_document(tenant_id, document_key)?)
    }

    /// Lots with stock left that expire on or before `as_of + within_days`,
    /// soonest first.
    pub fn expiring_batches(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        within_days: i64,
    ) -> Result<Vec<ExpiringLot>, LedgerError> {
        let horizon = as_of + ChronoDuration::days(within_days.max(0));
        let mut lots: Vec<ExpiringLot> = self
            .store
            .balances(tenant_id)?
            .into_iter()
            .flat_map(|b| {
                let key = b.key();
                b.lots()
                    .filter(|l| l.remaining > Decimal::ZERO)
                    .filter(|l| l.expires_on.is_some_and(|e| e <= horizon))
                    .map(|l| ExpiringLot {
                        item: key.item,
                        location: key.location,
                        expired: l.is_expired_on(as_of),
                        lot: l.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        lots.sort_by(|a, b| {
            a.lot
                .expires_on
                .cmp(&b.lot.expires_on)
                .then_with(|| a.lot.number.cmp(&b.lot.number))
        });
        Ok(lots)
    }

    /// quantity × average cost across every location of the item.
    pub fn valuation(&self, tenant_id: TenantId, item: StockItem) -> Result<Decimal, LedgerError> {
        Ok(self.store.item_total(tenant_id, item)?.valuation)
    }
}

/// A stored movement answers a retried request only when both describe the
/// same posting. Adjustments carry the counted target, recorded as
/// `balance_after`.
fn replays(existing: &StockMovement, key: &BalanceKey, kind: MovementKind, quantity: Decimal) -> bool {
    let same_quantity = match kind {
        MovementKind::Adjustment => existing.balance_after() == quantity,
        _ => existing.quantity() == quantity,
    };
    existing.tenant_id() == key.tenant_id
        && existing.item() == key.item
        && existing.location() == key.location
        && existing.kind() == kind
        && same_quantity
}
