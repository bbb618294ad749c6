//! Postgres connection shared by the persistent stores.
//!
//! The ledger and import services are synchronous, so the pool is paired
//! with a small runtime of its own that drives every query to completion.

use std::future::Future;
use std::sync::Arc;

use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::config::DatabaseConfig;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("no database url configured")]
    NotConfigured,

    #[error("failed to start database runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_balances (
    tenant_id   UUID        NOT NULL,
    item_key    TEXT        NOT NULL,
    location_id UUID        NOT NULL,
    version     BIGINT      NOT NULL CHECK (version > 0),
    quantity    NUMERIC     NOT NULL,
    valuation   NUMERIC     NOT NULL,
    state       JSONB       NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (tenant_id, item_key, location_id)
);

CREATE TABLE IF NOT EXISTS stock_movements (
    position        BIGSERIAL   PRIMARY KEY,
    movement_id     UUID        NOT NULL,
    tenant_id       UUID        NOT NULL,
    item_key        TEXT        NOT NULL,
    location_id     UUID        NOT NULL,
    sequence_number BIGINT      NOT NULL,
    document_key    TEXT        NULL,
    idempotency_key TEXT        NULL,
    payload         JSONB       NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    CONSTRAINT stock_movements_id UNIQUE (tenant_id, movement_id),
    CONSTRAINT stock_movements_sequence UNIQUE (tenant_id, item_key, location_id, sequence_number)
);

CREATE UNIQUE INDEX IF NOT EXISTS stock_movements_idempotency
    ON stock_movements (tenant_id, idempotency_key)
    WHERE idempotency_key IS NOT NULL;

CREATE INDEX IF NOT EXISTS stock_movements_document
    ON stock_movements (tenant_id, document_key)
    WHERE document_key IS NOT NULL;

CREATE TABLE IF NOT EXISTS tenant_records (
    tenant_id  UUID        NOT NULL,
    namespace  TEXT        NOT NULL,
    record_key TEXT        NOT NULL,
    payload    JSONB       NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (tenant_id, namespace, record_key)
);
"#;

/// Pool plus the runtime that drives it. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
    runtime: Arc<Runtime>,
}

impl Database {
    pub fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = config.url.as_deref().ok_or(DatabaseError::NotConfigured)?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("stockledger-pg")
            .enable_all()
            .build()?;
        let pool = runtime.block_on(
            PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout)
                .connect(url),
        )?;
        info!(max_connections = config.max_connections, "connected to postgres");
        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    /// Create the ledger and record tables when missing.
    pub fn ensure_schema(&self) -> Result<(), DatabaseError> {
        self.block_on(sqlx::raw_sql(SCHEMA).execute(&self.pool))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `fut` to completion. Must not be called from inside a tokio
    /// runtime.
    pub(crate) fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

/// Name of the unique constraint `err` violated, if that is what happened.
pub(crate) fn violated_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            Some(db_err.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

/// Test database from `STOCKLEDGER_TEST_DATABASE_URL`; `None` skips the test.
#[cfg(test)]
pub(crate) fn test_database() -> Option<Database> {
    let url = std::env::var("STOCKLEDGER_TEST_DATABASE_URL").ok()?;
    let db = Database::connect(&DatabaseConfig::default().with_url(url).with_max_connections(4))
        .expect("test database reachable");
    db.ensure_schema().expect("schema created");
    Some(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connecting_without_a_url_is_refused() {
        let err = Database::connect(&DatabaseConfig::default()).unwrap_err();
        assert!(matches!(err, DatabaseError::NotConfigured));
    }
}
