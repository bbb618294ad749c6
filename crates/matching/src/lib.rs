//! Tiered matching of supplier document lines against the catalog.
//!
//! GOLD (barcode) → SILVER (learned supplier mapping) → BRONZE (normalized
//! SKU) → NONE. The first tier that hits wins; a miss never links anything
//! and leaves the line for human review, where `suggest` ranks candidates.

pub mod barcode;
pub mod engine;
pub mod suggest;

pub use barcode::usable_barcode;
pub use engine::{ExternalItem, MatchEngine, MatchResult, MatchTier};
pub use suggest::{suggest, suggested_name, MatchSuggestion};
