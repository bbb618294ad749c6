//! The immutable movement record.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, TenantId, UserId};
use stockledger_parties::SupplierId;
use stockledger_products::StockItem;

use crate::adjustment::AdjustmentReasonId;
use crate::location::LocationId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(pub AggregateId);

impl MovementId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
    /// Quantity on the request is the absolute target balance.
    #[serde(rename = "ADJ")]
    Adjustment,
    #[serde(rename = "TRANSFER_OUT")]
    TransferOut,
    #[serde(rename = "TRANSFER_IN")]
    TransferIn,
}

impl MovementKind {
    pub fn is_transfer_leg(self) -> bool {
        matches!(self, MovementKind::TransferOut | MovementKind::TransferIn)
    }

    pub fn is_withdrawal(self) -> bool {
        matches!(self, MovementKind::Out | MovementKind::TransferOut)
    }

    pub fn is_receipt(self) -> bool {
        matches!(self, MovementKind::In | MovementKind::TransferIn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::In => "IN",
            MovementKind::Out => "OUT",
            MovementKind::Adjustment => "ADJ",
            MovementKind::TransferOut => "TRANSFER_OUT",
            MovementKind::TransferIn => "TRANSFER_IN",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementSource {
    #[default]
    Manual,
    Import,
    Count,
    Api,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub number: String,
    pub manufactured_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
}

impl BatchInfo {
    pub fn new(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            manufactured_on: None,
            expires_on: None,
        }
    }

    pub fn expiring(mut self, on: NaiveDate) -> Self {
        self.expires_on = Some(on);
        self
    }

    pub fn manufactured(mut self, on: NaiveDate) -> Self {
        self.manufactured_on = Some(on);
        self
    }
}

/// One committed line of the ledger. Never edited after commit; corrections
/// are new movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    id: MovementId,
    tenant_id: TenantId,
    item: StockItem,
    location: LocationId,
    kind: MovementKind,
    /// As requested for IN/OUT/transfer legs; the signed delta applied for ADJ.
    quantity: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    unit_cost: Option<Decimal>,
    avg_cost_after: Decimal,
    batch: Option<BatchInfo>,
    reason: Option<AdjustmentReasonId>,
    note: Option<String>,
    supplier: Option<SupplierId>,
    document_key: Option<String>,
    source: MovementSource,
    actor: UserId,
    paired_movement: Option<MovementId>,
    idempotency_key: Option<String>,
    sequence: u64,
    occurred_at: DateTime<Utc>,
}

/// Field bag the balance aggregate fills in; keeps construction crate-private.
pub(crate) struct MovementParts {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub item: StockItem,
    pub location: LocationId,
    pub kind: MovementKind,
    pub quantity: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub unit_cost: Option<Decimal>,
    pub avg_cost_after: Decimal,
    pub batch: Option<BatchInfo>,
    pub reason: Option<AdjustmentReasonId>,
    pub note: Option<String>,
    pub supplier: Option<SupplierId>,
    pub document_key: Option<String>,
    pub source: MovementSource,
    pub actor: UserId,
    pub paired_movement: Option<MovementId>,
    pub idempotency_key: Option<String>,
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
}

impl From<MovementParts> for StockMovement {
    fn from(p: MovementParts) -> Self {
        Self {
            id: p.id,
            tenant_id: p.tenant_id,
            item: p.item,
            location: p.location,
            kind: p.kind,
            quantity: p.quantity,
            balance_before: p.balance_before,
            balance_after: p.balance_after,
            unit_cost: p.unit_cost,
            avg_cost_after: p.avg_cost_after,
            batch: p.batch,
            reason: p.reason,
            note: p.note,
            supplier: p.supplier,
            document_key: p.document_key,
            source: p.source,
            actor: p.actor,
            paired_movement: p.paired_movement,
            idempotency_key: p.idempotency_key,
            sequence: p.sequence,
            occurred_at: p.occurred_at,
        }
    }
}

impl StockMovement {
    pub fn id(&self) -> MovementId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn item(&self) -> StockItem {
        self.item
    }

    pub fn location(&self) -> LocationId {
        self.location
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// Signed change this movement applied to its balance.
    pub fn delta(&self) -> Decimal {
        self.balance_after - self.balance_before
    }

    pub fn balance_before(&self) -> Decimal {
        self.balance_before
    }

    pub fn balance_after(&self) -> Decimal {
        self.balance_after
    }

    pub fn unit_cost(&self) -> Option<Decimal> {
        self.unit_cost
    }

    pub fn avg_cost_after(&self) -> Decimal {
        self.avg_cost_after
    }

    pub fn batch(&self) -> Option<&BatchInfo> {
        self.batch.as_ref()
    }

    pub fn reason(&self) -> Option<AdjustmentReasonId> {
        self.reason
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn supplier(&self) -> Option<SupplierId> {
        self.supplier
    }

    pub fn document_key(&self) -> Option<&str> {
        self.document_key.as_deref()
    }

    pub fn source(&self) -> MovementSource {
        self.source
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }

    pub fn paired_movement(&self) -> Option<MovementId> {
        self.paired_movement
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    /// 1-based position in the (item, location) balance stream.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
