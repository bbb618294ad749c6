//! Inventory ledger domain.
//!
//! Pure decision logic for stock movements: locations, adjustment reasons,
//! the per-(item, location) balance aggregate and the validation taxonomy.
//! Locking, persistence and publication are the infra crate's job.

pub mod adjustment;
pub mod balance;
pub mod error;
pub mod location;
pub mod movement;
pub mod policy;

pub use adjustment::{AdjustmentPolicy, AdjustmentReason, AdjustmentReasonId, ImpactType, NewReason};
pub use balance::{BalanceEvent, BalanceKey, BatchLot, RecordMovement, StockBalance};
pub use error::MovementError;
pub use location::{Location, LocationId, LocationKind, LocationRegistry, NewLocation};
pub use movement::{BatchInfo, MovementId, MovementKind, MovementSource, StockMovement};
pub use policy::{ExpiredBatchPolicy, PostingRules, ScopePolicy};
