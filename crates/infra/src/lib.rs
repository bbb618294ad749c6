//! Services over the domain crates: the stock ledger, supplier document
//! import, the review queue and the worker pool that runs imports.

pub mod config;
pub mod db;
pub mod error;
pub mod imports;
pub mod jobs;
pub mod ledger;
pub mod read_model;
pub mod suppliers;


pub use config::{ConfigError, DatabaseConfig, ImportConfig, LedgerConfig, StockLedgerConfig, WorkerConfig};
pub use db::{Database, DatabaseError};
pub use error::{ImportError, LedgerError, ResolveError};
pub use imports::{
    ImportOrchestrator, ImportReport, ImportRequest, ImportState, PendingResolver, Resolution,
    ResolvePending,
};
pub use jobs::{CancellationToken, ImportTicket, ImportWorkerPool, RetryPolicy, WorkerError};
pub use ledger::{
    CreateMovement, InMemoryLedgerStore, LedgerEngine, LedgerEvent, LedgerStore, PostgresLedgerStore,
    TransferReceipt, TransferStock,
};
pub use read_model::{InMemoryTenantStore, PostgresTenantStore, TenantStore, TenantStoreError};
pub use suppliers::{SupplierDirectory, SupplierError, SupplierMaps};
