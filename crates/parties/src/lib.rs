//! Suppliers and what they call our products.
//!
//! Pure domain values: tax id normalization/validation, the supplier record
//! and the supplier→item mapping learned from imports.

pub mod supplier;
pub mod supplier_map;
pub mod tax_id;

pub use supplier::{ContactInfo, Supplier, SupplierId};
pub use supplier_map::{SupplierMapIndex, SupplierMapKey, SupplierProductMap};
pub use tax_id::TaxId;
