use thiserror::Error;

use crate::batch::ImportStatus;
use crate::pending::PendingStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImportDomainError {
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("import batch cannot move from {from:?} to {to:?}")]
    BatchTransition { from: ImportStatus, to: ImportStatus },

    #[error("pending item already resolved as {0:?}")]
    AlreadyResolved(PendingStatus),
}
