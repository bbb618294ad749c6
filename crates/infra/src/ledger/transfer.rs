//! Two-legged transfers between locations.
//!
//! Both balances are locked together, the outbound leg is decided first and
//! the two legs are committed in one write. Either both exist or neither does.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockledger_core::{AggregateRoot, TenantId, UserId};
use stockledger_events::EventBus;
use stockledger_inventory::{
    BalanceKey, BatchInfo, LocationId, MovementError, MovementId, MovementKind, MovementSource,
    PostingRules, RecordMovement, StockBalance, StockMovement,
};
use stockledger_products::{Catalog, StockItem};

use crate::error::LedgerError;
use crate::ledger::engine::LedgerEngine;
use crate::ledger::events::{LedgerEnvelope, LedgerEvent};
use crate::ledger::store::{LedgerCommit, LedgerStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub tenant_id: TenantId,
    pub actor: UserId,
    pub item: StockItem,
    pub quantity: Decimal,
    pub from: LocationId,
    pub to: LocationId,
    /// Move stock of one specific batch.
    pub batch: Option<BatchInfo>,
    /// Why the stock moved; recorded as the note of both legs.
    pub reason: Option<String>,
    pub allow_negative: bool,
    pub override_expiry: bool,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl TransferStock {
    pub fn new(
        tenant_id: TenantId,
        actor: UserId,
        item: StockItem,
        quantity: Decimal,
        from: LocationId,
        to: LocationId,
    ) -> Self {
        Self {
            tenant_id,
            actor,
            item,
            quantity,
            from,
            to,
            batch: None,
            reason: None,
            allow_negative: false,
            override_expiry: false,
            occurred_at: None,
        }
    }

    pub fn with_batch(mut self, batch: BatchInfo) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// The two committed legs, each pointing at the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub out: StockMovement,
    pub inbound: StockMovement,
}

impl<S, C, B> LedgerEngine<S, C, B>
where
    S: LedgerStore,
    C: Catalog,
    B: EventBus<LedgerEnvelope>,
{
    #[instrument(
        skip(self, cmd),
        fields(tenant_id = %cmd.tenant_id, item = %cmd.item, from = %cmd.from, to = %cmd.to),
        err
    )]
    pub fn transfer(&self, cmd: TransferStock) -> Result<TransferReceipt, LedgerError> {
        if cmd.from == cmd.to {
            return Err(MovementError::invalid("transfer origin and destination are the same location").into());
        }
        if cmd.quantity <= Decimal::ZERO {
            return Err(MovementError::invalid("transfer quantity must be positive").into());
        }
        let origin = self.registries().postable_location(cmd.tenant_id, cmd.from)?;
        let destination = self.registries().postable_location(cmd.tenant_id, cmd.to)?;
        self.catalog().resolve(cmd.tenant_id, &cmd.item)?;
        let out_rules = self.registries().scope_policy(cmd.tenant_id)?.posting_rules(
            origin.allows_negative(),
            cmd.allow_negative,
            cmd.override_expiry,
        )?;

        let out_key = BalanceKey::new(cmd.tenant_id, cmd.item, cmd.from);
        let in_key = BalanceKey::new(cmd.tenant_id, cmd.item, cmd.to);
        let guard = self
            .locks()
            .acquire(&[out_key, in_key], self.config().lock_timeout)?;

        let mut out_balance = self.store().balance(&out_key)?.unwrap_or_else(|| StockBalance::empty(out_key));
        let mut in_balance = self.store().balance(&in_key)?.unwrap_or_else(|| StockBalance::empty(in_key));
        let (out_version, in_version) = (out_balance.version(), in_balance.version());

        let out_id = MovementId::generate();
        let in_id = MovementId::generate();
        let occurred_at = cmd.occurred_at.unwrap_or_else(Utc::now);
        // The receiving side inherits the lot's dates as the origin knows them.
        let batch = cmd.batch.map(|b| match out_balance.lot(&b.number) {
            Some(lot) => BatchInfo {
                number: b.number,
                manufactured_on: b.manufactured_on.or(lot.manufactured_on),
                expires_on: b.expires_on.or(lot.expires_on),
            },
            None => b,
        });
        let origin_cost = out_balance.avg_unit_cost();

        let leg = |id: MovementId,
                   key: BalanceKey,
                   kind: MovementKind,
                   paired: MovementId,
                   unit_cost: Option<Decimal>,
                   rules: PostingRules| RecordMovement {
            movement_id: id,
            key,
            kind,
            quantity: cmd.quantity,
            unit_cost,
            batch: batch.clone(),
            reason: None,
            note: cmd.reason.clone(),
            supplier: None,
            document_key: None,
            source: MovementSource::Manual,
            actor: cmd.actor,
            paired_movement: Some(paired),
            idempotency_key: None,
            rules,
            occurred_at,
        };

        let out = out_balance.record(&leg(out_id, out_key, MovementKind::TransferOut, in_id, None, out_rules))?;
        let inbound = in_balance.record(&leg(
            in_id,
            in_key,
            MovementKind::TransferIn,
            out_id,
            Some(origin_cost),
            PostingRules::default(),
        ))?;

        self.store().commit(LedgerCommit {
            balances: vec![(out_balance, out_version), (in_balance, in_version)],
            movements: vec![out.clone(), inbound.clone()],
        })?;
        drop(guard);

        info!(
            out_id = %out.id(),
            in_id = %inbound.id(),
            origin = origin.code(),
            destination = destination.code(),
            quantity = %cmd.quantity,
            "transfer posted"
        );
        self.publish(LedgerEvent::TransferPosted {
            out: out.clone(),
            inbound: inbound.clone(),
        });
        Ok(TransferReceipt { out, inbound })
    }
}
