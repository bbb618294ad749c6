//! `stockledger-core`: shared building blocks for the ledger domain.
//!
//! Pure types only: identifiers, the domain error model and the aggregate
//! contract. No storage or IO lives here.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
