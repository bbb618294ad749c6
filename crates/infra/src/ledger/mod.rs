//! Stock ledger service: balances, movements, transfers.
//!
//! `StockBalance` (inventory crate) decides; this module supplies the
//! locking, the atomic store and publication around it.

pub mod engine;
pub mod events;
pub mod locks;
pub mod postgres;
pub mod registries;
pub mod store;
pub mod transfer;

pub use engine::{CreateMovement, ExpiringLot, LedgerEngine};
pub use events::{LedgerEnvelope, LedgerEvent};
pub use locks::{BalanceGuard, BalanceLocks};
pub use postgres::PostgresLedgerStore;
pub use registries::Registries;
pub use store::{InMemoryLedgerStore, ItemTotal, LedgerCommit, LedgerStore, StoreError};
pub use transfer::{TransferReceipt, TransferStock};
