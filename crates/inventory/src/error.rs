//! Validation taxonomy for stock movements.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use stockledger_core::DomainError;

/// Why a movement was rejected. Every variant is deterministic: retrying the
/// same request against the same state fails the same way.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MovementError {
    #[error("a location is required")]
    LocationRequired,

    #[error("adjustments require a reason")]
    AdjustmentReasonRequired,

    #[error("adjustment reason {code} requires a note")]
    AdjustmentNoteRequired { code: String },

    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: Decimal, requested: Decimal },

    #[error("batch {batch} expired on {expired_on}")]
    ExpiredBatch { batch: String, expired_on: NaiveDate },

    #[error("invalid movement: {0}")]
    InvalidMovement(String),
}

impl MovementError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidMovement(msg.into())
    }
}

/// Unknown, inactive or cross-tenant references surface as invalid movements.
impl From<DomainError> for MovementError {
    fn from(value: DomainError) -> Self {
        Self::InvalidMovement(value.to_string())
    }
}
