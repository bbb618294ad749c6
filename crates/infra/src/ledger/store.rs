//! Ledger persistence boundary.
//!
//! The store keeps balances and the append-only movement log side by side
//! and writes both in one atomic commit: a movement is never visible without
//! the balance it produced, and vice versa.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{AggregateRoot, ExpectedVersion, TenantId};
use stockledger_inventory::balance::COST_SCALE;
use stockledger_inventory::{BalanceKey, LocationId, MovementId, StockBalance, StockMovement};
use stockledger_products::StockItem;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("balance {key} moved (expected version {expected}, found {actual})")]
    VersionConflict { key: String, expected: u64, actual: u64 },

    #[error("idempotency key {0:?} already used")]
    DuplicateIdempotencyKey(String),

    /// A concurrent writer got there first (unique key taken, row moved).
    #[error("concurrent write: {0}")]
    Conflict(String),

    #[error("stored ledger record unreadable: {0}")]
    Codec(String),

    #[error("ledger store lock poisoned")]
    Poisoned,

    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
}

/// One atomic write: every balance is stored at its new state (guarded by
/// the version it was loaded at) together with the movements that produced it.
#[derive(Debug, Clone, Default)]
pub struct LedgerCommit {
    pub balances: Vec<(StockBalance, u64)>,
    pub movements: Vec<StockMovement>,
}

/// Item-wide aggregate across every location of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTotal {
    pub tenant_id: TenantId,
    pub item: StockItem,
    pub quantity: Decimal,
    pub valuation: Decimal,
    /// valuation / quantity, or zero when nothing is on hand.
    pub avg_unit_cost: Decimal,
}

impl ItemTotal {
    pub fn empty(tenant_id: TenantId, item: StockItem) -> Self {
        Self {
            tenant_id,
            item,
            quantity: Decimal::ZERO,
            valuation: Decimal::ZERO,
            avg_unit_cost: Decimal::ZERO,
        }
    }

    /// Totals from summed quantity and valuation.
    pub fn from_sums(tenant_id: TenantId, item: StockItem, quantity: Decimal, valuation: Decimal) -> Self {
        let mut total = Self::empty(tenant_id, item);
        total.shift(quantity, valuation);
        total
    }

    fn shift(&mut self, quantity: Decimal, valuation: Decimal) {
        self.quantity += quantity;
        self.valuation += valuation;
        self.avg_unit_cost = if self.quantity > Decimal::ZERO {
            (self.valuation / self.quantity).round_dp(COST_SCALE)
        } else {
            Decimal::ZERO
        };
    }
}

pub trait LedgerStore: Send + Sync {
    /// Current state of a balance; `None` if it never moved.
    fn balance(&self, key: &BalanceKey) -> Result<Option<StockBalance>, StoreError>;

    /// Apply a commit atomically or not at all.
    fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError>;

    fn movement(&self, tenant_id: TenantId, id: MovementId) -> Result<Option<StockMovement>, StoreError>;

    fn find_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<StockMovement>, StoreError>;

    /// Movements of one balance in sequence order.
    fn history(&self, key: &BalanceKey) -> Result<Vec<StockMovement>, StoreError>;

    fn movements_for_document(
        &self,
        tenant_id: TenantId,
        document_key: &str,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// Every balance of the item, one per location that ever held it.
    fn balances_for_item(&self, tenant_id: TenantId, item: StockItem) -> Result<Vec<StockBalance>, StoreError>;

    fn balances(&self, tenant_id: TenantId) -> Result<Vec<StockBalance>, StoreError>;

    fn item_total(&self, tenant_id: TenantId, item: StockItem) -> Result<ItemTotal, StoreError>;
}

impl<S> LedgerStore for std::sync::Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn balance(&self, key: &BalanceKey) -> Result<Option<StockBalance>, StoreError> {
        (**self).balance(key)
    }

    fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        (**self).commit(commit)
    }

    fn movement(&self, tenant_id: TenantId, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        (**self).movement(tenant_id, id)
    }

    fn find_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<StockMovement>, StoreError> {
        (**self).find_by_idempotency_key(tenant_id, key)
    }

    fn history(&self, key: &BalanceKey) -> Result<Vec<StockMovement>, StoreError> {
        (**self).history(key)
    }

    fn movements_for_document(
        &self,
        tenant_id: TenantId,
        document_key: &str,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements_for_document(tenant_id, document_key)
    }

    fn balances_for_item(&self, tenant_id: TenantId, item: StockItem) -> Result<Vec<StockBalance>, StoreError> {
        (**self).balances_for_item(tenant_id, item)
    }

    fn balances(&self, tenant_id: TenantId) -> Result<Vec<StockBalance>, StoreError> {
        (**self).balances(tenant_id)
    }

    fn item_total(&self, tenant_id: TenantId, item: StockItem) -> Result<ItemTotal, StoreError> {
        (**self).item_total(tenant_id, item)
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<BalanceKey, StockBalance>,
    /// Append-only, in commit order.
    movements: Vec<StockMovement>,
    by_id: HashMap<(TenantId, MovementId), usize>,
    by_balance: HashMap<BalanceKey, Vec<usize>>,
    by_document: HashMap<(TenantId, String), Vec<usize>>,
    by_idempotency: HashMap<(TenantId, String), usize>,
    item_locations: HashMap<(TenantId, StockItem), BTreeSet<LocationId>>,
    totals: HashMap<(TenantId, StockItem), ItemTotal>,
}

impl LedgerState {
    fn check(&self, commit: &LedgerCommit) -> Result<(), StoreError> {
        for (balance, expected) in &commit.balances {
            let key = balance.key();
            let actual = self.balances.get(&key).map(|b| b.version()).unwrap_or(0);
            if !ExpectedVersion::Exact(*expected).matches(actual) {
                return Err(StoreError::VersionConflict {
                    key: key.to_string(),
                    expected: *expected,
                    actual,
                });
            }
        }
        let mut seen = BTreeSet::new();
        for m in &commit.movements {
            if let Some(k) = m.idempotency_key() {
                if self.by_idempotency.contains_key(&(m.tenant_id(), k.to_string()))
                    || !seen.insert(k)
                {
                    return Err(StoreError::DuplicateIdempotencyKey(k.to_string()));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, commit: LedgerCommit) {
        for (balance, _) in commit.balances {
            let key = balance.key();
            let (old_qty, old_value) = self
                .balances
                .get(&key)
                .map(|b| (b.quantity(), b.valuation()))
                .unwrap_or((Decimal::ZERO, Decimal::ZERO));
            self.totals
                .entry((key.tenant_id, key.item))
                .or_insert_with(|| ItemTotal::empty(key.tenant_id, key.item))
                .shift(balance.quantity() - old_qty, balance.valuation() - old_value);
            self.item_locations
                .entry((key.tenant_id, key.item))
                .or_default()
                .insert(key.location);
            self.balances.insert(key, balance);
        }

        for m in commit.movements {
            let idx = self.movements.len();
            let tenant = m.tenant_id();
            self.by_id.insert((tenant, m.id()), idx);
            self.by_balance
                .entry(BalanceKey::new(tenant, m.item(), m.location()))
                .or_default()
                .push(idx);
            if let Some(doc) = m.document_key() {
                self.by_document.entry((tenant, doc.to_string())).or_default().push(idx);
            }
            if let Some(k) = m.idempotency_key() {
                self.by_idempotency.insert((tenant, k.to_string()), idx);
            }
            self.movements.push(m);
        }
    }

    fn collect(&self, indexes: Option<&Vec<usize>>) -> Vec<StockMovement> {
        indexes
            .map(|ix| ix.iter().map(|&i| self.movements[i].clone()).collect())
            .unwrap_or_default()
    }
}

/// In-memory ledger store.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
    #[cfg(test)]
    fail_next_commit: std::sync::atomic::AtomicBool,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail after validation, before any write.
    #[cfg(test)]
    pub(crate) fn fail_next_commit(&self) {
        self.fail_next_commit
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerState>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn balance(&self, key: &BalanceKey) -> Result<Option<StockBalance>, StoreError> {
        Ok(self.read()?.balances.get(key).cloned())
    }

    fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        state.check(&commit)?;

        #[cfg(test)]
        if self
            .fail_next_commit
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }

        state.apply(commit);
        Ok(())
    }

    fn movement(&self, tenant_id: TenantId, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        let state = self.read()?;
        Ok(state
            .by_id
            .get(&(tenant_id, id))
            .map(|&i| state.movements[i].clone()))
    }

    fn find_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<StockMovement>, StoreError> {
        let state = self.read()?;
        Ok(state
            .by_idempotency
            .get(&(tenant_id, key.to_string()))
            .map(|&i| state.movements[i].clone()))
    }

    fn history(&self, key: &BalanceKey) -> Result<Vec<StockMovement>, StoreError> {
        let state = self.read()?;
        Ok(state.collect(state.by_balance.get(key)))
    }

    fn movements_for_document(
        &self,
        tenant_id: TenantId,
        document_key: &str,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let state = self.read()?;
        Ok(state.collect(state.by_document.get(&(tenant_id, document_key.to_string()))))
    }

    fn balances_for_item(&self, tenant_id: TenantId, item: StockItem) -> Result<Vec<StockBalance>, StoreError> {
        let state = self.read()?;
        let Some(locations) = state.item_locations.get(&(tenant_id, item)) else {
            return Ok(vec![]);
        };
        Ok(locations
            .iter()
            .filter_map(|&loc| state.balances.get(&BalanceKey::new(tenant_id, item, loc)).cloned())
            .collect())
    }

    fn balances(&self, tenant_id: TenantId) -> Result<Vec<StockBalance>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<StockBalance> = state
            .balances
            .values()
            .filter(|b| b.key().tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.key());
        Ok(out)
    }

    fn item_total(&self, tenant_id: TenantId, item: StockItem) -> Result<ItemTotal, StoreError> {
        Ok(self
            .read()?
            .totals
            .get(&(tenant_id, item))
            .cloned()
            .unwrap_or_else(|| ItemTotal::empty(tenant_id, item)))
    }
}
