//! Postgres-backed ledger store.
//!
//! Balances live in `stock_balances` (one row per tenant, item and location,
//! carrying the full balance state as JSON) and movements in the append-only
//! `stock_movements` table. A commit is one transaction:
//!
//! 1. lock every touched balance row with `SELECT ... FOR UPDATE`
//! 2. compare its version with the version the engine loaded
//! 3. insert or version-guarded update of each balance
//! 4. insert the movements
//!
//! ## Error mapping
//!
//! | Failure | StoreError |
//! |---------|------------|
//! | stored version differs from the expected one | `VersionConflict` |
//! | unique violation on `stock_movements_idempotency` | `DuplicateIdempotencyKey` |
//! | any other unique violation (`23505`) | `Conflict` |
//! | row state that does not decode | `Codec` |
//! | pool closed, network, other database errors | `Unavailable` |

use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;

use stockledger_core::{AggregateRoot, ExpectedVersion, TenantId};
use stockledger_inventory::{BalanceKey, MovementId, StockBalance, StockMovement};
use stockledger_products::StockItem;

use crate::db::{violated_constraint, Database};
use crate::ledger::store::{ItemTotal, LedgerCommit, LedgerStore, StoreError};

const IDEMPOTENCY_CONSTRAINT: &str = "stock_movements_idempotency";

/// Ledger store over a shared [`Database`].
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    db: Database,
}

impl PostgresLedgerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn commit_tx(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for (balance, expected) in &commit.balances {
            let key = balance.key();
            let current = lock_balance(&mut tx, &key).await?;
            let actual = current.unwrap_or(0);
            if !ExpectedVersion::Exact(*expected).matches(actual) {
                tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(StoreError::VersionConflict {
                    key: key.to_string(),
                    expected: *expected,
                    actual,
                });
            }
            if current.is_some() {
                update_balance(&mut tx, balance, *expected).await?;
            } else {
                insert_balance(&mut tx, balance).await?;
            }
        }

        for movement in &commit.movements {
            insert_movement(&mut tx, movement).await?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn fetch_movements(
        &self,
        operation: &str,
        sql: &str,
        tenant_id: TenantId,
        arg: &str,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(tenant_id.as_uuid())
            .bind(arg)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(|row| decode(row, "payload")).collect()
    }
}

impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(tenant_id = %key.tenant_id, balance = %key), err)]
    fn balance(&self, key: &BalanceKey) -> Result<Option<StockBalance>, StoreError> {
        self.db.block_on(async {
            let row = sqlx::query(
                r#"
                SELECT state
                FROM stock_balances
                WHERE tenant_id = $1 AND item_key = $2 AND location_id = $3
                "#,
            )
            .bind(key.tenant_id.as_uuid())
            .bind(key.item.to_string())
            .bind(key.location.0.as_uuid())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("load_balance", e))?;
            row.map(|r| decode(&r, "state")).transpose()
        })
    }

    #[instrument(
        skip(self, commit),
        fields(balances = commit.balances.len(), movements = commit.movements.len()),
        err
    )]
    fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        if commit.balances.is_empty() && commit.movements.is_empty() {
            return Ok(());
        }
        self.db.block_on(self.commit_tx(commit))
    }

    fn movement(&self, tenant_id: TenantId, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        self.db.block_on(async {
            let row = sqlx::query(
                r#"
                SELECT payload
                FROM stock_movements
                WHERE tenant_id = $1 AND movement_id = $2
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(id.0.as_uuid())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("load_movement", e))?;
            row.map(|r| decode(&r, "payload")).transpose()
        })
    }

    fn find_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<StockMovement>, StoreError> {
        self.db.block_on(async {
            let row = sqlx::query(
                r#"
                SELECT payload
                FROM stock_movements
                WHERE tenant_id = $1 AND idempotency_key = $2
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(key)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("find_by_idempotency_key", e))?;
            row.map(|r| decode(&r, "payload")).transpose()
        })
    }

    fn history(&self, key: &BalanceKey) -> Result<Vec<StockMovement>, StoreError> {
        self.db.block_on(async {
            let rows = sqlx::query(
                r#"
                SELECT payload
                FROM stock_movements
                WHERE tenant_id = $1 AND item_key = $2 AND location_id = $3
                ORDER BY sequence_number ASC
                "#,
            )
            .bind(key.tenant_id.as_uuid())
            .bind(key.item.to_string())
            .bind(key.location.0.as_uuid())
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("load_history", e))?;
            rows.iter().map(|row| decode(row, "payload")).collect()
        })
    }

    fn movements_for_document(
        &self,
        tenant_id: TenantId,
        document_key: &str,
    ) -> Result<Vec<StockMovement>, StoreError> {
        self.db.block_on(self.fetch_movements(
            "movements_for_document",
            r#"
            SELECT payload
            FROM stock_movements
            WHERE tenant_id = $1 AND document_key = $2
            ORDER BY position ASC
            "#,
            tenant_id,
            document_key,
        ))
    }

    fn balances_for_item(&self, tenant_id: TenantId, item: StockItem) -> Result<Vec<StockBalance>, StoreError> {
        self.db.block_on(async {
            let rows = sqlx::query(
                r#"
                SELECT state
                FROM stock_balances
                WHERE tenant_id = $1 AND item_key = $2
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(item.to_string())
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("balances_for_item", e))?;
            let mut balances = rows
                .iter()
                .map(|row| decode::<StockBalance>(row, "state"))
                .collect::<Result<Vec<_>, _>>()?;
            balances.sort_by_key(|b| b.key());
            Ok(balances)
        })
    }

    fn balances(&self, tenant_id: TenantId) -> Result<Vec<StockBalance>, StoreError> {
        self.db.block_on(async {
            let rows = sqlx::query("SELECT state FROM stock_balances WHERE tenant_id = $1")
                .bind(tenant_id.as_uuid())
                .fetch_all(self.db.pool())
                .await
                .map_err(|e| map_sqlx_error("balances", e))?;
            let mut balances = rows
                .iter()
                .map(|row| decode::<StockBalance>(row, "state"))
                .collect::<Result<Vec<_>, _>>()?;
            balances.sort_by_key(|b| b.key());
            Ok(balances)
        })
    }

    fn item_total(&self, tenant_id: TenantId, item: StockItem) -> Result<ItemTotal, StoreError> {
        self.db.block_on(async {
            let row = sqlx::query(
                r#"
                SELECT
                    COALESCE(SUM(quantity), 0) AS quantity,
                    COALESCE(SUM(valuation), 0) AS valuation
                FROM stock_balances
                WHERE tenant_id = $1 AND item_key = $2
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(item.to_string())
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("item_total", e))?;
            let quantity: Decimal = row
                .try_get("quantity")
                .map_err(|e| StoreError::Codec(format!("quantity: {e}")))?;
            let valuation: Decimal = row
                .try_get("valuation")
                .map_err(|e| StoreError::Codec(format!("valuation: {e}")))?;
            Ok(ItemTotal::from_sums(tenant_id, item, quantity, valuation))
        })
    }
}

/// Row-lock the balance and return its stored version, `None` if it was
/// never written.
async fn lock_balance(tx: &mut Transaction<'_, Postgres>, key: &BalanceKey) -> Result<Option<u64>, StoreError> {
    let version: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT version
        FROM stock_balances
        WHERE tenant_id = $1 AND item_key = $2 AND location_id = $3
        FOR UPDATE
        "#,
    )
    .bind(key.tenant_id.as_uuid())
    .bind(key.item.to_string())
    .bind(key.location.0.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_balance", e))?;
    Ok(version.map(|v| v as u64))
}

async fn insert_balance(tx: &mut Transaction<'_, Postgres>, balance: &StockBalance) -> Result<(), StoreError> {
    let key = balance.key();
    sqlx::query(
        r#"
        INSERT INTO stock_balances (
            tenant_id,
            item_key,
            location_id,
            version,
            quantity,
            valuation,
            state
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(key.tenant_id.as_uuid())
    .bind(key.item.to_string())
    .bind(key.location.0.as_uuid())
    .bind(balance.version() as i64)
    .bind(balance.quantity())
    .bind(balance.valuation())
    .bind(encode(balance)?)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        // Two first postings to the same balance: the loser sees the row
        // the winner inserted.
        if violated_constraint(&e).is_some() {
            StoreError::Conflict(format!("balance {key} created concurrently"))
        } else {
            map_sqlx_error("insert_balance", e)
        }
    })?;
    Ok(())
}

async fn update_balance(
    tx: &mut Transaction<'_, Postgres>,
    balance: &StockBalance,
    expected: u64,
) -> Result<(), StoreError> {
    let key = balance.key();
    let result = sqlx::query(
        r#"
        UPDATE stock_balances
        SET version = $4,
            quantity = $5,
            valuation = $6,
            state = $7,
            updated_at = NOW()
        WHERE tenant_id = $1 AND item_key = $2 AND location_id = $3 AND version = $8
        "#,
    )
    .bind(key.tenant_id.as_uuid())
    .bind(key.item.to_string())
    .bind(key.location.0.as_uuid())
    .bind(balance.version() as i64)
    .bind(balance.quantity())
    .bind(balance.valuation())
    .bind(encode(balance)?)
    .bind(expected as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_balance", e))?;
    if result.rows_affected() != 1 {
        return Err(StoreError::Conflict(format!("balance {key} moved during commit")));
    }
    Ok(())
}

async fn insert_movement(tx: &mut Transaction<'_, Postgres>, movement: &StockMovement) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            movement_id,
            tenant_id,
            item_key,
            location_id,
            sequence_number,
            document_key,
            idempotency_key,
            payload,
            occurred_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(movement.id().0.as_uuid())
    .bind(movement.tenant_id().as_uuid())
    .bind(movement.item().to_string())
    .bind(movement.location().0.as_uuid())
    .bind(movement.sequence() as i64)
    .bind(movement.document_key())
    .bind(movement.idempotency_key())
    .bind(encode(movement)?)
    .bind(movement.occurred_at())
    .execute(&mut **tx)
    .await
    .map_err(|e| match violated_constraint(&e) {
        Some(constraint) if constraint == IDEMPOTENCY_CONSTRAINT => StoreError::DuplicateIdempotencyKey(
            movement.idempotency_key().unwrap_or_default().to_string(),
        ),
        Some(constraint) => StoreError::Conflict(format!(
            "movement {} violates {constraint}",
            movement.id()
        )),
        None => map_sqlx_error("insert_movement", e),
    })?;
    Ok(())
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(row: &PgRow, column: &str) -> Result<T, StoreError> {
    let value: serde_json::Value = row
        .try_get(column)
        .map_err(|e| StoreError::Codec(format!("{column}: {e}")))?;
    serde_json::from_value(value).map_err(|e| StoreError::Codec(format!("{column}: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            if db_err.code().as_deref() == Some("23505") {
                StoreError::Conflict(msg)
            } else {
                StoreError::Unavailable(msg)
            }
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {operation}")),
        other => StoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}
