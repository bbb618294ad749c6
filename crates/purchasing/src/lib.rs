//! Supplier document import domain.
//!
//! The parsed document, the import batch lifecycle and the pending review
//! queue. Transition tables are explicit: any move not listed is refused.

pub mod batch;
pub mod document;
pub mod error;
pub mod pending;

pub use batch::{ImportBatch, ImportBatchId, ImportCounts, ImportStatus, LineOutcome, LineRecord};
pub use document::{normalize_unit, DocumentLine, DocumentSupplier, SupplierDocument};
pub use error::ImportDomainError;
pub use pending::{PendingAssociation, PendingAssociationId, PendingOrigin, PendingStatus};
