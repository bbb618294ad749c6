//! Review queue entries for lines no tier could link.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, TenantId, UserId};
use stockledger_inventory::{LocationId, MovementId};
use stockledger_matching::MatchSuggestion;
use stockledger_parties::SupplierId;
use stockledger_products::StockItem;

use crate::batch::ImportBatchId;
use crate::document::DocumentLine;
use crate::error::ImportDomainError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingAssociationId(pub AggregateId);

impl PendingAssociationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PendingAssociationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// `PENDING → LINKED | CREATED | IGNORED`; the three targets are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingStatus {
    Pending,
    Linked,
    Created,
    Ignored,
}

impl PendingStatus {
    pub fn can_transition_to(self, to: PendingStatus) -> bool {
        self == PendingStatus::Pending && to != PendingStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAssociation {
    id: PendingAssociationId,
    tenant_id: TenantId,
    batch: ImportBatchId,
    document_key: String,
    document_number: Option<String>,
    /// Issue date of the document; the purchase date of a learned mapping.
    issued_on: NaiveDate,
    line_number: u32,
    supplier: SupplierId,
    /// Where the import would have received the goods.
    location: LocationId,
    supplier_sku: Option<String>,
    barcode: Option<String>,
    description: String,
    quantity: Decimal,
    unit_cost: Decimal,
    unit: String,
    suggestions: Vec<MatchSuggestion>,
    best_score: Decimal,
    status: PendingStatus,
    resolved_item: Option<StockItem>,
    movement: Option<MovementId>,
    resolved_by: Option<UserId>,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

/// Where the pending line came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrigin<'a> {
    pub tenant_id: TenantId,
    pub batch: ImportBatchId,
    pub document_key: &'a str,
    pub document_number: Option<&'a str>,
    pub issued_on: NaiveDate,
    pub supplier: SupplierId,
    pub location: LocationId,
}

impl PendingAssociation {
    pub fn from_line(
        origin: PendingOrigin<'_>,
        line: &DocumentLine,
        suggestions: Vec<MatchSuggestion>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let best_score = suggestions
            .iter()
            .map(|s| s.score)
            .max()
            .unwrap_or(Decimal::ZERO);
        Self {
            id: PendingAssociationId::new(AggregateId::new()),
            tenant_id: origin.tenant_id,
            batch: origin.batch,
            document_key: origin.document_key.to_string(),
            document_number: origin.document_number.map(str::to_string),
            issued_on: origin.issued_on,
            line_number: line.line_number,
            supplier: origin.supplier,
            location: origin.location,
            supplier_sku: line.supplier_sku.clone(),
            barcode: line.barcode.clone(),
            description: line.description.clone(),
            quantity: line.quantity,
            unit_cost: line.unit_cost,
            unit: line.normalized_unit(),
            suggestions,
            best_score,
            status: PendingStatus::Pending,
            resolved_item: None,
            movement: None,
            resolved_by: None,
            resolved_at: None,
            created_at,
        }
    }

    fn transition(
        &mut self,
        to: PendingStatus,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), ImportDomainError> {
        if !self.status.can_transition_to(to) {
            return Err(ImportDomainError::AlreadyResolved(self.status));
        }
        self.status = to;
        self.resolved_by = Some(actor);
        self.resolved_at = Some(now);
        Ok(())
    }

    /// Check a transition without performing it.
    pub fn ensure_open(&self) -> Result<(), ImportDomainError> {
        if self.status == PendingStatus::Pending {
            Ok(())
        } else {
            Err(ImportDomainError::AlreadyResolved(self.status))
        }
    }

    /// Linked to an item that already existed.
    pub fn link(
        &mut self,
        item: StockItem,
        movement: MovementId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), ImportDomainError> {
        self.transition(PendingStatus::Linked, actor, now)?;
        self.resolved_item = Some(item);
        self.movement = Some(movement);
        Ok(())
    }

    /// Linked to an item created for this line.
    pub fn create(
        &mut self,
        item: StockItem,
        movement: MovementId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), ImportDomainError> {
        self.transition(PendingStatus::Created, actor, now)?;
        self.resolved_item = Some(item);
        self.movement = Some(movement);
        Ok(())
    }

    pub fn ignore(&mut self, actor: UserId, now: DateTime<Utc>) -> Result<(), ImportDomainError> {
        self.transition(PendingStatus::Ignored, actor, now)
    }

    pub fn id_typed(&self) -> PendingAssociationId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn batch(&self) -> ImportBatchId {
        self.batch
    }

    pub fn document_key(&self) -> &str {
        &self.document_key
    }

    pub fn document_number(&self) -> Option<&str> {
        self.document_number.as_deref()
    }

    pub fn issued_on(&self) -> NaiveDate {
        self.issued_on
    }

    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    pub fn supplier(&self) -> SupplierId {
        self.supplier
    }

    pub fn location(&self) -> LocationId {
        self.location
    }

    pub fn supplier_sku(&self) -> Option<&str> {
        self.supplier_sku.as_deref()
    }

    pub fn barcode(&self) -> Option<&str> {
        self.barcode.as_deref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn suggestions(&self) -> &[MatchSuggestion] {
        &self.suggestions
    }

    pub fn best_score(&self) -> Decimal {
        self.best_score
    }

    pub fn status(&self) -> PendingStatus {
        self.status
    }

    pub fn resolved_item(&self) -> Option<StockItem> {
        self.resolved_item
    }

    pub fn movement(&self) -> Option<MovementId> {
        self.movement
    }

    pub fn resolved_by(&self) -> Option<UserId> {
        self.resolved_by
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
