//! Catalog collaborator for the ledger.
//!
//! The ledger only reads from the catalog: it resolves which item a movement
//! targets and whether it can hold stock. Catalog maintenance (pricing,
//! categories, media) lives elsewhere.

pub mod catalog;
pub mod product;

pub use catalog::{Catalog, CatalogEntry, InMemoryCatalog};
pub use product::{
    normalize_sku, Product, ProductId, ProductKind, ProductStatus, StockItem, Variant, VariantId,
};
