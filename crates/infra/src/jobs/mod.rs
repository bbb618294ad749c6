//! Background import workers, cancellation and transient-failure retry.
//!
//! - `ImportWorkerPool`: named threads draining a shared queue
//! - `ImportTicket`: cancel or wait on one submitted document
//! - `RetryPolicy`: fixed, linear or exponential backoff with jitter

pub mod cancel;
pub mod retry;
pub mod workers;

pub use cancel::CancellationToken;
pub use retry::{retry_transient, BackoffStrategy, RetryPolicy};
pub use workers::{ImportTicket, ImportWorkerPool, JobId, PoolStats, WorkerError};
