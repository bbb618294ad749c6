//! Balance aggregate: one stream per (tenant, item, location).
//!
//! `handle` decides a single movement against the current balance and returns
//! the movement it would record; `apply` folds it into quantity, weighted
//! average cost and batch lots. The caller holds the balance lock between the
//! two and commits the movement atomically.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateRoot, TenantId, UserId};
use stockledger_events::Event;
use stockledger_parties::SupplierId;
use stockledger_products::StockItem;

use crate::adjustment::AdjustmentReasonId;
use crate::error::MovementError;
use crate::location::LocationId;
use crate::movement::{BatchInfo, MovementId, MovementKind, MovementParts, MovementSource, StockMovement};
use crate::policy::PostingRules;

/// Decimal places kept on the weighted average unit cost.
pub const COST_SCALE: u32 = 4;

/// Identity of a balance row. Ordered so multi-key lock acquisition can be
/// done in a deterministic order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub tenant_id: TenantId,
    pub item: StockItem,
    pub location: LocationId,
}

impl BalanceKey {
    pub fn new(tenant_id: TenantId, item: StockItem, location: LocationId) -> Self {
        Self {
            tenant_id,
            item,
            location,
        }
    }
}

impl core::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.item, self.location)
    }
}

/// Remaining quantity of one received batch at this location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLot {
    pub number: String,
    pub manufactured_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
    pub remaining: Decimal,
}

impl BatchLot {
    pub fn is_expired_on(&self, date: NaiveDate) -> bool {
        self.expires_on.is_some_and(|e| e < date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    key: BalanceKey,
    quantity: Decimal,
    avg_unit_cost: Decimal,
    lots: BTreeMap<String, BatchLot>,
    last_movement: Option<MovementId>,
    version: u64,
}

impl StockBalance {
    /// Zero balance for a key that has never moved.
    pub fn empty(key: BalanceKey) -> Self {
        Self {
            key,
            quantity: Decimal::ZERO,
            avg_unit_cost: Decimal::ZERO,
            lots: BTreeMap::new(),
            last_movement: None,
            version: 0,
        }
    }

    pub fn key(&self) -> BalanceKey {
        self.key
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn avg_unit_cost(&self) -> Decimal {
        self.avg_unit_cost
    }

    /// quantity × average cost
    pub fn valuation(&self) -> Decimal {
        self.quantity * self.avg_unit_cost
    }

    pub fn lots(&self) -> impl Iterator<Item = &BatchLot> {
        self.lots.values()
    }

    pub fn lot(&self, number: &str) -> Option<&BatchLot> {
        self.lots.get(number)
    }

    pub fn last_movement(&self) -> Option<MovementId> {
        self.last_movement
    }
}

impl AggregateRoot for StockBalance {
    type Id = BalanceKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: record one movement against this balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub movement_id: MovementId,
    pub key: BalanceKey,
    pub kind: MovementKind,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub batch: Option<BatchInfo>,
    pub reason: Option<AdjustmentReasonId>,
    pub note: Option<String>,
    pub supplier: Option<SupplierId>,
    pub document_key: Option<String>,
    pub source: MovementSource,
    pub actor: UserId,
    pub paired_movement: Option<MovementId>,
    pub idempotency_key: Option<String>,
    pub rules: PostingRules,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceEvent {
    MovementRecorded(StockMovement),
}

impl BalanceEvent {
    pub fn movement(&self) -> &StockMovement {
        match self {
            BalanceEvent::MovementRecorded(m) => m,
        }
    }

    pub fn into_movement(self) -> StockMovement {
        match self {
            BalanceEvent::MovementRecorded(m) => m,
        }
    }
}

impl Event for BalanceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BalanceEvent::MovementRecorded(_) => "inventory.movement.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.movement().occurred_at()
    }
}

/// `(q0·c0 + qi·ci) / (q0 + qi)` with a non-positive existing quantity
/// contributing nothing.
pub fn weighted_average(
    existing_qty: Decimal,
    existing_cost: Decimal,
    incoming_qty: Decimal,
    incoming_cost: Decimal,
) -> Decimal {
    let q0 = existing_qty.max(Decimal::ZERO);
    let total = q0 + incoming_qty;
    if total <= Decimal::ZERO {
        return incoming_cost;
    }
    ((q0 * existing_cost + incoming_qty * incoming_cost) / total).round_dp(COST_SCALE)
}

impl Aggregate for StockBalance {
    type Command = RecordMovement;
    type Event = BalanceEvent;
    type Error = MovementError;

    fn apply(&mut self, event: &Self::Event) {
        let BalanceEvent::MovementRecorded(m) = event;

        self.quantity = m.balance_after();
        self.avg_unit_cost = m.avg_cost_after();
        self.last_movement = Some(m.id());

        if let Some(batch) = m.batch() {
            if m.kind().is_receipt() {
                let lot = self.lots.entry(batch.number.clone()).or_insert_with(|| BatchLot {
                    number: batch.number.clone(),
                    manufactured_on: batch.manufactured_on,
                    expires_on: batch.expires_on,
                    remaining: Decimal::ZERO,
                });
                lot.remaining += m.quantity();
                if batch.expires_on.is_some() {
                    lot.expires_on = batch.expires_on;
                }
            } else if m.kind().is_withdrawal() {
                let drained = match self.lots.get_mut(&batch.number) {
                    Some(lot) => {
                        lot.remaining -= m.quantity();
                        lot.remaining <= Decimal::ZERO
                    }
                    None => false,
                };
                if drained {
                    self.lots.remove(&batch.number);
                }
            }
        }
        self.trim_lots_to_quantity();

        // +1 per applied movement; equals the movement's stream sequence.
        self.version += 1;
    }

    fn handle(&self, cmd: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if cmd.key != self.key {
            return Err(MovementError::invalid("movement targets a different balance"));
        }
        if cmd.unit_cost.is_some_and(|c| c < Decimal::ZERO) {
            return Err(MovementError::invalid("unit cost cannot be negative"));
        }

        let delta = match cmd.kind {
            MovementKind::Adjustment => {
                if cmd.quantity < Decimal::ZERO {
                    return Err(MovementError::invalid(
                        "adjustment target balance cannot be negative",
                    ));
                }
                cmd.quantity - self.quantity
            }
            kind => {
                if cmd.quantity <= Decimal::ZERO {
                    return Err(MovementError::invalid("quantity must be positive"));
                }
                if kind.is_withdrawal() { -cmd.quantity } else { cmd.quantity }
            }
        };

        let balance_after = self.quantity + delta;
        if delta < Decimal::ZERO && balance_after < Decimal::ZERO && !cmd.rules.allow_negative {
            return Err(MovementError::InsufficientStock {
                available: self.quantity,
                requested: -delta,
            });
        }

        if cmd.kind.is_withdrawal() {
            if let Some(batch) = &cmd.batch {
                self.check_batch_withdrawal(cmd, batch)?;
            }
        }

        let avg_cost_after = match (cmd.kind.is_receipt(), cmd.unit_cost) {
            (true, Some(cost)) => weighted_average(self.quantity, self.avg_unit_cost, cmd.quantity, cost),
            _ => self.avg_unit_cost,
        };

        let quantity = if cmd.kind == MovementKind::Adjustment { delta } else { cmd.quantity };

        let movement = StockMovement::from(MovementParts {
            id: cmd.movement_id,
            tenant_id: cmd.key.tenant_id,
            item: cmd.key.item,
            location: cmd.key.location,
            kind: cmd.kind,
            quantity,
            balance_before: self.quantity,
            balance_after,
            unit_cost: cmd.unit_cost,
            avg_cost_after,
            batch: cmd.batch.clone(),
            reason: cmd.reason,
            note: cmd.note.clone(),
            supplier: cmd.supplier,
            document_key: cmd.document_key.clone(),
            source: cmd.source,
            actor: cmd.actor,
            paired_movement: cmd.paired_movement,
            idempotency_key: cmd.idempotency_key.clone(),
            sequence: self.version + 1,
            occurred_at: cmd.occurred_at,
        });

        Ok(vec![BalanceEvent::MovementRecorded(movement)])
    }
}

impl StockBalance {
    /// Lots never hold more than the balance. Withdrawals that name no batch
    /// and downward adjustments drain the excess first-expiry-first-out;
    /// lots without an expiry go last.
    fn trim_lots_to_quantity(&mut self) {
        let on_hand = self.quantity.max(Decimal::ZERO);
        let mut excess = self.lots.values().map(|l| l.remaining).sum::<Decimal>() - on_hand;
        if excess <= Decimal::ZERO {
            return;
        }

        let mut order: Vec<(bool, Option<NaiveDate>, String)> = self
            .lots
            .values()
            .map(|l| (l.expires_on.is_none(), l.expires_on, l.number.clone()))
            .collect();
        order.sort();

        for (_, _, number) in order {
            if excess <= Decimal::ZERO {
                break;
            }
            let Some(lot) = self.lots.get_mut(&number) else { continue };
            let taken = lot.remaining.min(excess);
            lot.remaining -= taken;
            excess -= taken;
            if lot.remaining <= Decimal::ZERO {
                self.lots.remove(&number);
            }
        }
    }

    fn check_batch_withdrawal(&self, cmd: &RecordMovement, batch: &BatchInfo) -> Result<(), MovementError> {
        let lot = self.lots.get(&batch.number);
        let expires_on = lot.and_then(|l| l.expires_on).or(batch.expires_on);
        let today = cmd.occurred_at.date_naive();

        if let Some(expired_on) = expires_on.filter(|e| *e < today) {
            if cmd.rules.block_expired {
                return Err(MovementError::ExpiredBatch {
                    batch: batch.number.clone(),
                    expired_on,
                });
            }
        }

        if let Some(lot) = lot {
            if lot.remaining < cmd.quantity && !cmd.rules.allow_negative {
                return Err(MovementError::InsufficientStock {
                    available: lot.remaining,
                    requested: cmd.quantity,
                });
            }
        }
        Ok(())
    }

    /// Decide and apply in one step; returns the recorded movement.
    pub fn record(&mut self, cmd: &RecordMovement) -> Result<StockMovement, MovementError> {
        let events = self.handle(cmd)?;
        for e in &events {
            self.apply(e);
        }
        events
            .into_iter()
            .next()
            .map(BalanceEvent::into_movement)
            .ok_or_else(|| MovementError::invalid("no movement recorded"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockledger_core::AggregateId;
    use stockledger_products::ProductId;

    fn test_key() -> BalanceKey {
        BalanceKey::new(
            TenantId::new(),
            StockItem::standalone(ProductId::new(AggregateId::new())),
            LocationId::new(AggregateId::new()),
        )
    }

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn dec(n: i64) -> Decimal {
        Decimal::from(n)
    }

    fn cmd(key: BalanceKey, kind: MovementKind, quantity: Decimal) -> RecordMovement {
        RecordMovement {
            movement_id: MovementId::generate(),
            key,
            kind,
            quantity,
            unit_cost: None,
            batch: None,
            reason: None,
            note: None,
            supplier: None,
            document_key: None,
            source: MovementSource::Manual,
            actor: UserId::new(),
            paired_movement: None,
            idempotency_key: None,
            rules: PostingRules::default(),
            occurred_at: test_time(),
        }
    }

    fn receipt(key: BalanceKey, qty: i64, cost: i64) -> RecordMovement {
        RecordMovement {
            unit_cost: Some(dec(cost)),
            ..cmd(key, MovementKind::In, dec(qty))
        }
    }

    #[test]
    fn receipts_recompute_weighted_average() {
        let key = test_key();
        let mut balance = StockBalance::empty(key);

        balance.record(&receipt(key, 10, 10)).unwrap();
        let m = balance.record(&receipt(key, 10, 20)).unwrap();

        assert_eq!(balance.quantity(), dec(20));
        assert_eq!(balance.avg_unit_cost(), dec(15));
        assert_eq!(m.balance_before(), dec(10));
        assert_eq!(m.sequence(), 2);
        assert_eq!(balance.version(), 2);
    }

    #[test]
    fn withdrawals_leave_average_cost_untouched() {
        let key = test_key();
        let mut balance = StockBalance::empty(key);
        balance.record(&receipt(key, 10, 12)).unwrap();

        balance.record(&cmd(key, MovementKind::Out, dec(4))).unwrap();

        assert_eq!(balance.quantity(), dec(6));
        assert_eq!(balance.avg_unit_cost(), dec(12));
    }

    #[test]
    fn out_beyond_balance_is_insufficient_stock() {
        let key = test_key();
        let mut balance = StockBalance::empty(key);
        balance.record(&receipt(key, 3, 1)).unwrap();

        let err = balance.handle(&cmd(key, MovementKind::Out, dec(5))).unwrap_err();
        assert_eq!(
            err,
            MovementError::InsufficientStock {
                available: dec(3),
                requested: dec(5)
            }
        );
    }

    #[test]
    fn negative_balance_when_rules_allow_it() {
        let key = test_key();
        let balance = StockBalance::empty(key);
        let mut out = cmd(key, MovementKind::Out, dec(2));
        out.rules.allow_negative = true;

        let events = balance.handle(&out).unwrap();
        assert_eq!(events[0].movement().balance_after(), dec(-2));
    }

    #[test]
    fn adjustment_records_signed_delta_to_absolute_target() {
        let key = test_key();
        let mut balance = StockBalance::empty(key);
        balance.record(&receipt(key, 10, 5)).unwrap();

        let m = balance
            .record(&cmd(key, MovementKind::Adjustment, dec(7)))
            .unwrap();

        assert_eq!(m.quantity(), dec(-3));
        assert_eq!(m.balance_after(), dec(7));
        assert_eq!(balance.avg_unit_cost(), dec(5));
    }

    #[test]
    fn non_positive_quantity_is_invalid() {
        let key = test_key();
        let balance = StockBalance::empty(key);
        assert!(matches!(
            balance.handle(&cmd(key, MovementKind::In, Decimal::ZERO)),
            Err(MovementError::InvalidMovement(_))
        ));
        assert!(matches!(
            balance.handle(&cmd(key, MovementKind::Adjustment, dec(-1))),
            Err(MovementError::InvalidMovement(_))
        ));
    }

    #[test]
    fn expired_batch_withdrawal_is_blocked_by_default() {
        let key = test_key();
        let mut balance = StockBalance::empty(key);
        let expired_on = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let mut inbound = receipt(key, 5, 2);
        inbound.batch = Some(BatchInfo::new("L1").expiring(expired_on));
        balance.record(&inbound).unwrap();

        let mut out = cmd(key, MovementKind::Out, dec(1));
        out.batch = Some(BatchInfo::new("L1"));
        assert_eq!(
            balance.handle(&out).unwrap_err(),
            MovementError::ExpiredBatch {
                batch: "L1".into(),
                expired_on
            }
        );

        out.rules.block_expired = false;
        balance.record(&out).unwrap();
        assert_eq!(balance.lot("L1").unwrap().remaining, dec(4));
    }

    #[test]
    fn batch_expiring_today_is_still_usable() {
        let key = test_key();
        let mut balance = StockBalance::empty(key);
        let mut inbound = receipt(key, 5, 2);
        inbound.batch = Some(BatchInfo::new("L2").expiring(test_time().date_naive()));
        balance.record(&inbound).unwrap();

        let mut out = cmd(key, MovementKind::Out, dec(5));
        out.batch = Some(BatchInfo::new("L2"));
        balance.record(&out).unwrap();
        assert!(balance.lot("L2").is_none());
    }

    #[test]
    fn unbatched_withdrawals_drain_lots_first_expiry_first() {
        let key = test_key();
        let mut balance = StockBalance::empty(key);
        let soon = NaiveDate::from_ymd_opt(2026, 3, 12).unwrap();
        let later = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        for (number, expires) in [("L2", later), ("L1", soon)] {
            let mut inbound = receipt(key, 5, 2);
            inbound.batch = Some(BatchInfo::new(number).expiring(expires));
            balance.record(&inbound).unwrap();
        }

        balance.record(&cmd(key, MovementKind::Out, dec(7))).unwrap();
        assert!(balance.lot("L1").is_none());
        assert_eq!(balance.lot("L2").unwrap().remaining, dec(3));

        balance.record(&cmd(key, MovementKind::Adjustment, Decimal::ZERO)).unwrap();
        assert_eq!(balance.quantity(), Decimal::ZERO);
        assert_eq!(balance.lots().count(), 0);
    }

    #[test]
    fn unbatched_stock_is_withdrawn_before_touching_lots() {
        let key = test_key();
        let mut balance = StockBalance::empty(key);
        balance.record(&receipt(key, 4, 2)).unwrap();
        let mut inbound = receipt(key, 5, 2);
        inbound.batch = Some(BatchInfo::new("L1"));
        balance.record(&inbound).unwrap();

        balance.record(&cmd(key, MovementKind::Out, dec(4))).unwrap();
        assert_eq!(balance.lot("L1").unwrap().remaining, dec(5));

        balance.record(&cmd(key, MovementKind::Out, dec(1))).unwrap();
        assert_eq!(balance.lot("L1").unwrap().remaining, dec(4));
    }

    #[test]
    fn foreign_key_is_rejected() {
        let balance = StockBalance::empty(test_key());
        assert!(balance.handle(&receipt(test_key(), 1, 1)).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        In(u32, u32),
        InLot(u32),
        Out(u32),
        Adj(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..500, 0u32..1_000).prop_map(|(q, c)| Op::In(q, c)),
            (1u32..500).prop_map(Op::InLot),
            (1u32..500).prop_map(Op::Out),
            (0u32..800).prop_map(Op::Adj),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        /// Each movement starts where the previous one ended, the balance
        /// never goes negative without permission, and sequences are dense.
        #[test]
        fn movement_chain_is_consistent(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let key = test_key();
            let mut balance = StockBalance::empty(key);
            let mut history: Vec<StockMovement> = Vec::new();

            for op in ops {
                let c = match op {
                    Op::In(q, cost) => RecordMovement { unit_cost: Some(Decimal::from(cost)), ..cmd(key, MovementKind::In, Decimal::from(q)) },
                    Op::InLot(q) => RecordMovement { batch: Some(BatchInfo::new(format!("P{}", q % 3))), ..cmd(key, MovementKind::In, Decimal::from(q)) },
                    Op::Out(q) => cmd(key, MovementKind::Out, Decimal::from(q)),
                    Op::Adj(q) => cmd(key, MovementKind::Adjustment, Decimal::from(q)),
                };
                match balance.record(&c) {
                    Ok(m) => history.push(m),
                    Err(MovementError::InsufficientStock { .. }) => {}
                    Err(e) => prop_assert!(false, "unexpected error: {e}"),
                }
                prop_assert!(balance.quantity() >= Decimal::ZERO);
                let in_lots: Decimal = balance.lots().map(|l| l.remaining).sum();
                prop_assert!(in_lots <= balance.quantity());
            }

            let mut expected = Decimal::ZERO;
            for (i, m) in history.iter().enumerate() {
                prop_assert_eq!(m.balance_before(), expected);
                prop_assert_eq!(m.balance_after(), m.balance_before() + m.delta());
                prop_assert_eq!(m.sequence(), i as u64 + 1);
                expected = m.balance_after();
            }
            prop_assert_eq!(expected, balance.quantity());
        }

        /// Receipts only: the average stays within the range of costs seen.
        #[test]
        fn average_cost_is_bounded_by_receipt_costs(receipts in prop::collection::vec((1u32..1_000, 0u32..10_000), 1..30)) {
            let key = test_key();
            let mut balance = StockBalance::empty(key);
            let min = receipts.iter().map(|r| r.1).min().unwrap_or(0);
            let max = receipts.iter().map(|r| r.1).max().unwrap_or(0);

            for (q, c) in receipts {
                balance.record(&receipt(key, q as i64, c as i64)).unwrap();
            }

            prop_assert!(balance.avg_unit_cost() >= Decimal::from(min) - Decimal::new(1, 4));
            prop_assert!(balance.avg_unit_cost() <= Decimal::from(max) + Decimal::new(1, 4));
        }
    }
}
