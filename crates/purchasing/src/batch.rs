//! Import batch lifecycle.
//!
//! ```text
//! PENDING ──▶ PROCESSING ──▶ COMPLETED | PARTIAL | ERROR | PENDING_REVIEW
//!    │                                                      │
//!    └──▶ ERROR                      COMPLETED | PARTIAL ◀──┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, TenantId};
use stockledger_inventory::MovementId;
use stockledger_matching::MatchTier;
use stockledger_parties::SupplierId;

use crate::error::ImportDomainError;
use crate::pending::PendingAssociationId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportBatchId(pub AggregateId);

impl ImportBatchId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ImportBatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Partial,
    Error,
    PendingReview,
}

impl ImportStatus {
    pub fn can_transition_to(self, to: ImportStatus) -> bool {
        use ImportStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Error)
                | (Processing, Completed)
                | (Processing, Partial)
                | (Processing, Error)
                | (Processing, PendingReview)
                | (PendingReview, Completed)
                | (PendingReview, Partial)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportStatus::Completed | ImportStatus::Partial | ImportStatus::Error
        )
    }
}

/// What happened to one document line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LineOutcome {
    Posted { movement: MovementId, tier: MatchTier },
    Pending { pending: PendingAssociationId },
    Failed { error: String },
    /// Already processed by an earlier import of the same document.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    pub line_number: u32,
    pub outcome: LineOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub total: usize,
    pub posted: usize,
    pub pending: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBatch {
    id: ImportBatchId,
    tenant_id: TenantId,
    document_key: String,
    document_number: Option<String>,
    supplier: Option<SupplierId>,
    status: ImportStatus,
    lines: Vec<LineRecord>,
    open_pending: usize,
    cancelled: bool,
    errors: Vec<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl ImportBatch {
    pub fn new(
        tenant_id: TenantId,
        document_key: impl Into<String>,
        document_number: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ImportBatchId::new(AggregateId::new()),
            tenant_id,
            document_key: document_key.into(),
            document_number,
            supplier: None,
            status: ImportStatus::Pending,
            lines: Vec::new(),
            open_pending: 0,
            cancelled: false,
            errors: Vec::new(),
            created_at,
            completed_at: None,
        }
    }

    fn transition(&mut self, to: ImportStatus, now: DateTime<Utc>) -> Result<(), ImportDomainError> {
        if !self.status.can_transition_to(to) {
            return Err(ImportDomainError::BatchTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    pub fn start(&mut self, supplier: SupplierId, now: DateTime<Utc>) -> Result<(), ImportDomainError> {
        self.transition(ImportStatus::Processing, now)?;
        self.supplier = Some(supplier);
        Ok(())
    }

    /// Reject the whole document.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), ImportDomainError> {
        self.errors.push(error.into());
        self.transition(ImportStatus::Error, now)
    }

    pub fn record(&mut self, line_number: u32, outcome: LineOutcome) {
        match &outcome {
            LineOutcome::Pending { .. } => self.open_pending += 1,
            LineOutcome::Failed { error } => self.errors.push(error.clone()),
            _ => {}
        }
        self.lines.push(LineRecord {
            line_number,
            outcome,
        });
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Close the processing phase and pick the terminal (or review) status.
    /// Open pending items hold the batch in review even when cancelled.
    pub fn settle(&mut self, now: DateTime<Utc>) -> Result<ImportStatus, ImportDomainError> {
        let counts = self.counts();
        let succeeded = counts.posted + counts.pending + counts.skipped;
        let next = if self.open_pending > 0 {
            ImportStatus::PendingReview
        } else if self.cancelled {
            if succeeded > 0 { ImportStatus::Partial } else { ImportStatus::Error }
        } else if counts.failed > 0 && succeeded > 0 {
            ImportStatus::Partial
        } else if counts.failed > 0 {
            ImportStatus::Error
        } else {
            ImportStatus::Completed
        };
        self.transition(next, now)?;
        Ok(next)
    }

    /// One pending item of this batch reached a terminal state. Leaves review
    /// once none remain open.
    pub fn pending_closed(&mut self, now: DateTime<Utc>) -> Result<ImportStatus, ImportDomainError> {
        self.open_pending = self.open_pending.saturating_sub(1);
        if self.open_pending == 0 && self.status == ImportStatus::PendingReview {
            let next = if self.cancelled || self.counts().failed > 0 {
                ImportStatus::Partial
            } else {
                ImportStatus::Completed
            };
            self.transition(next, now)?;
        }
        Ok(self.status)
    }

    pub fn counts(&self) -> ImportCounts {
        let mut c = ImportCounts {
            total: self.lines.len(),
            ..ImportCounts::default()
        };
        for line in &self.lines {
            match line.outcome {
                LineOutcome::Posted { .. } => c.posted += 1,
                LineOutcome::Pending { .. } => c.pending += 1,
                LineOutcome::Failed { .. } => c.failed += 1,
                LineOutcome::Skipped => c.skipped += 1,
            }
        }
        c
    }

    pub fn id_typed(&self) -> ImportBatchId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn document_key(&self) -> &str {
        &self.document_key
    }

    pub fn document_number(&self) -> Option<&str> {
        self.document_number.as_deref()
    }

    pub fn supplier(&self) -> Option<SupplierId> {
        self.supplier
    }

    pub fn status(&self) -> ImportStatus {
        self.status
    }

    pub fn lines(&self) -> &[LineRecord] {
        &self.lines
    }

    pub fn open_pending(&self) -> usize {
        self.open_pending
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}
