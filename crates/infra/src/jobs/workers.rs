//! Worker threads draining a shared queue of import jobs.
//!
//! Different documents import in parallel; each document is processed by
//! exactly one worker. The submitter keeps an [`ImportTicket`] to cancel the
//! job or wait for its report.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stockledger_events::EventBus;
use stockledger_products::Catalog;

use crate::config::WorkerConfig;
use crate::error::ImportError;
use crate::imports::{ImportOrchestrator, ImportReport, ImportRequest};
use crate::jobs::cancel::CancellationToken;
use crate::ledger::{LedgerEnvelope, LedgerStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("worker pool is shut down")]
    ShutDown,

    #[error("import job was dropped before it reported")]
    Disconnected,

    #[error(transparent)]
    Import(#[from] ImportError),
}

type JobResult = Result<ImportReport, ImportError>;

struct QueuedImport {
    id: JobId,
    request: ImportRequest,
    cancel: CancellationToken,
    reply: mpsc::Sender<JobResult>,
}

/// Handle to one submitted import.
#[derive(Debug)]
pub struct ImportTicket {
    id: JobId,
    cancel: CancellationToken,
    result: mpsc::Receiver<JobResult>,
}

impl ImportTicket {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Stop after the line being processed; lines already posted stay.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the worker reports.
    pub fn wait(self) -> Result<ImportReport, WorkerError> {
        match self.result.recv() {
            Ok(result) => Ok(result?),
            Err(_) => Err(WorkerError::Disconnected),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub running: usize,
}

pub struct ImportWorkerPool {
    sender: Option<mpsc::Sender<QueuedImport>>,
    workers: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<PoolStats>>,
    name: String,
}

impl ImportWorkerPool {
    pub fn spawn<S, C, B>(
        importer: Arc<ImportOrchestrator<S, C, B>>,
        config: WorkerConfig,
    ) -> Result<Self, WorkerError>
    where
        S: LedgerStore + 'static,
        C: Catalog + Clone + 'static,
        B: EventBus<LedgerEnvelope> + 'static,
    {
        if config.workers == 0 {
            return Err(WorkerError::NoWorkers);
        }
        let (sender, receiver) = mpsc::channel::<QueuedImport>();
        let queue = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(Mutex::new(PoolStats::default()));

        let mut pool = Self {
            sender: Some(sender),
            workers: Vec::with_capacity(config.workers),
            stats: stats.clone(),
            name: config.name.clone(),
        };
        for n in 0..config.workers {
            let name = format!("{}-{n}", config.name);
            let importer = importer.clone();
            let queue = queue.clone();
            let stats = stats.clone();
            // On error `pool` drops here, which closes the queue and joins
            // the workers already started.
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&name, &importer, &queue, &stats))?;
            pool.workers.push(handle);
        }
        info!(pool = %config.name, workers = config.workers, "import worker pool started");
        Ok(pool)
    }

    pub fn submit(&self, request: ImportRequest) -> Result<ImportTicket, WorkerError> {
        let sender = self.sender.as_ref().ok_or(WorkerError::ShutDown)?;
        let (reply, result) = mpsc::channel();
        let id = JobId::new();
        let cancel = CancellationToken::new();
        sender
            .send(QueuedImport {
                id,
                request,
                cancel: cancel.clone(),
                reply,
            })
            .map_err(|_| WorkerError::ShutDown)?;
        lock(&self.stats).submitted += 1;
        debug!(pool = %self.name, job_id = %id, "import job queued");
        Ok(ImportTicket { id, cancel, result })
    }

    pub fn stats(&self) -> PoolStats {
        lock(&self.stats).clone()
    }

    /// Stop accepting work, let queued jobs finish and join the workers.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.sender.take().is_none() && self.workers.is_empty() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!(pool = %self.name, "import worker panicked");
            }
        }
        info!(pool = %self.name, "import worker pool stopped");
    }
}

impl Drop for ImportWorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(stats: &Mutex<PoolStats>) -> std::sync::MutexGuard<'_, PoolStats> {
    stats.lock().unwrap_or_else(|p| p.into_inner())
}

fn worker_loop<S, C, B>(
    name: &str,
    importer: &ImportOrchestrator<S, C, B>,
    queue: &Mutex<mpsc::Receiver<QueuedImport>>,
    stats: &Mutex<PoolStats>,
) where
    S: LedgerStore,
    C: Catalog + Clone,
    B: EventBus<LedgerEnvelope>,
{
    info!(worker = %name, "import worker started");
    loop {
        let next = {
            let rx = queue.lock().unwrap_or_else(|p| p.into_inner());
            rx.recv()
        };
        // Closed queue: the pool is shutting down.
        let Ok(job) = next else { break };

        debug!(worker = %name, job_id = %job.id, document_key = %job.request.document.key, "import job claimed");
        lock(stats).running += 1;
        let result = importer.import(job.request, &job.cancel);
        {
            let mut s = lock(stats);
            s.running = s.running.saturating_sub(1);
            match &result {
                Ok(_) => s.completed += 1,
                Err(_) => s.failed += 1,
            }
        }
        if job.reply.send(result).is_err() {
            debug!(worker = %name, job_id = %job.id, "ticket dropped before the report");
        }
    }
    info!(worker = %name, "import worker stopped");
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use stockledger_core::{TenantId, UserId};
    use stockledger_events::InMemoryEventBus;
    use stockledger_products::{InMemoryCatalog, Product};
    use stockledger_purchasing::{DocumentLine, DocumentSupplier, ImportStatus, SupplierDocument};

    use super::*;
    use crate::config::{ImportConfig, LedgerConfig};
    use crate::imports::ImportState;
    use crate::ledger::{InMemoryLedgerStore, LedgerEngine};
    use crate::suppliers::{SupplierDirectory, SupplierMaps};

    fn document(key: &str) -> SupplierDocument {
        SupplierDocument {
            key: key.into(),
            number: None,
            issued_on: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            supplier: DocumentSupplier {
                tax_id: "11222333000181".into(),
                company_name: "Aviamentos Sul".into(),
                trade_name: None,
            },
            lines: vec![DocumentLine::new(1, "ZIPER 20CM", Decimal::from(3), Decimal::ONE).with_sku("ZP-20")],
        }
    }

    #[test]
    fn pool_processes_documents_and_reports_back() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let tenant = TenantId::new();
        let item = catalog
            .add_product(Product::simple(tenant, "ZP-20", "Ziper 20cm").unwrap())
            .unwrap();
        let ledger = Arc::new(LedgerEngine::new(
            InMemoryLedgerStore::new(),
            catalog,
            Arc::new(InMemoryEventBus::new()),
            LedgerConfig::default(),
        ));
        let importer = Arc::new(ImportOrchestrator::new(
            ledger.clone(),
            Arc::new(SupplierDirectory::in_memory()),
            Arc::new(SupplierMaps::in_memory()),
            Arc::new(ImportState::in_memory()),
            ImportConfig::default(),
        ));
        let pool = ImportWorkerPool::spawn(importer, WorkerConfig::default().with_workers(2)).unwrap();

        let actor = UserId::new();
        let tickets: Vec<_> = (0..6)
            .map(|n| {
                pool.submit(ImportRequest::new(tenant, actor, document(&format!("DOC-{n}"))))
                    .unwrap()
            })
            .collect();
        for ticket in tickets {
            let report = ticket.wait().unwrap();
            assert_eq!(report.status, ImportStatus::Completed);
        }

        assert_eq!(ledger.total_balance(tenant, item).unwrap().quantity, Decimal::from(18));
        let stats = pool.stats();
        assert_eq!(stats.submitted, 6);
        assert_eq!(stats.completed, 6);
        pool.shutdown();
    }

    #[test]
    fn zero_workers_is_rejected() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let ledger = Arc::new(LedgerEngine::new(
            InMemoryLedgerStore::new(),
            catalog,
            Arc::new(InMemoryEventBus::new()),
            LedgerConfig::default(),
        ));
        let importer = Arc::new(ImportOrchestrator::new(
            ledger,
            Arc::new(SupplierDirectory::in_memory()),
            Arc::new(SupplierMaps::in_memory()),
            Arc::new(ImportState::in_memory()),
            ImportConfig::default(),
        ));
        assert!(matches!(
            ImportWorkerPool::spawn(importer, WorkerConfig::default().with_workers(0)),
            Err(WorkerError::NoWorkers)
        ));
    }
}
