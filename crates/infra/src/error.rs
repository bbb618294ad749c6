//! Error types surfaced by the ledger and import services.

use thiserror::Error;

use stockledger_core::DomainError;
use stockledger_inventory::MovementError;
use stockledger_purchasing::{ImportBatchId, ImportDomainError, PendingAssociationId, PendingStatus};

use crate::ledger::StoreError;
use crate::read_model::TenantStoreError;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The request was rejected before anything was written.
    #[error(transparent)]
    Validation(#[from] MovementError),

    #[error("timed out after {waited_ms}ms waiting for balance {key}")]
    LockTimeout { key: String, waited_ms: u64 },

    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("ledger store failure: {0}")]
    Store(String),
}

impl LedgerError {
    /// Worth retrying with backoff: nothing was written and the cause is
    /// contention, not the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::LockTimeout { .. } | LedgerError::Conflict(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, LedgerError::Validation(_))
    }
}

impl From<DomainError> for LedgerError {
    fn from(e: DomainError) -> Self {
        LedgerError::Validation(MovementError::from(e))
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VersionConflict { .. }
            | StoreError::DuplicateIdempotencyKey(_)
            | StoreError::Conflict(_) => LedgerError::Conflict(e.to_string()),
            StoreError::Poisoned | StoreError::Unavailable(_) | StoreError::Codec(_) => {
                LedgerError::Store(e.to_string())
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    /// Document-level rejection; the batch was recorded as `ERROR`.
    #[error("document rejected (batch {batch}): {reason}")]
    MalformedDocument { batch: ImportBatchId, reason: String },

    #[error("supplier could not be resolved (batch {batch}): {reason}")]
    SupplierUnresolvable { batch: ImportBatchId, reason: String },

    #[error("no usable destination location (batch {batch}): {reason}")]
    Destination { batch: ImportBatchId, reason: String },

    #[error("import batch state: {0}")]
    Batch(#[from] ImportDomainError),

    #[error("import state unavailable: {0}")]
    Store(String),
}

impl From<TenantStoreError> for ImportError {
    fn from(e: TenantStoreError) -> Self {
        ImportError::Store(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("pending association {0} not found")]
    NotFound(PendingAssociationId),

    #[error("pending association already resolved as {0:?}")]
    AlreadyResolved(PendingStatus),

    #[error("pending association {0} is being resolved by another request")]
    InFlight(PendingAssociationId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("import state unavailable: {0}")]
    Store(String),
}

impl From<TenantStoreError> for ResolveError {
    fn from(e: TenantStoreError) -> Self {
        ResolveError::Store(e.to_string())
    }
}

impl From<ImportDomainError> for ResolveError {
    fn from(e: ImportDomainError) -> Self {
        match e {
            ImportDomainError::AlreadyResolved(status) => ResolveError::AlreadyResolved(status),
            other => ResolveError::Store(other.to_string()),
        }
    }
}
