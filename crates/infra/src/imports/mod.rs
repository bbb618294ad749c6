//! Supplier document import: batches, per-line dedup, matching, the
//! pending review queue and its resolution.

pub mod line_log;
pub mod orchestrator;
pub mod resolver;
pub mod state;

pub use line_log::{Claim, LineLog, LineState};
pub use orchestrator::{line_idempotency_key, ImportOrchestrator, ImportReport, ImportRequest, LineError};
pub use resolver::{PendingResolver, Resolution, ResolvePending};
pub use state::ImportState;
