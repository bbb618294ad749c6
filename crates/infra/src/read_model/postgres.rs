//! Postgres-backed tenant store.
//!
//! Every record type shares the `tenant_records` table, partitioned by a
//! namespace per store. Keys are stored as their JSON text and values as
//! JSONB, so any serde type can be kept without a table of its own.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::postgres::PgRow;

use stockledger_core::TenantId;

use super::tenant_store::{TenantStore, TenantStoreError, TenantStoreResult};
use crate::db::Database;

pub struct PostgresTenantStore<K, V> {
    db: Database,
    namespace: &'static str,
    _records: PhantomData<fn() -> (K, V)>,
}

impl<K, V> PostgresTenantStore<K, V> {
    pub fn new(db: Database, namespace: &'static str) -> Self {
        Self {
            db,
            namespace,
            _records: PhantomData,
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }
}

impl<K, V> PostgresTenantStore<K, V>
where
    K: Serialize,
    V: Serialize + DeserializeOwned,
{
    async fn select(&self, tenant_id: TenantId, record_key: &str) -> TenantStoreResult<Option<V>> {
        let row = sqlx::query(
            r#"
            SELECT payload
            FROM tenant_records
            WHERE tenant_id = $1 AND namespace = $2 AND record_key = $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(self.namespace)
        .bind(record_key)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| map_sqlx_error("select_record", e))?;
        row.map(|r| decode(&r)).transpose()
    }

    async fn modify_tx(
        &self,
        tenant_id: TenantId,
        record_key: &str,
        f: &mut dyn FnMut(&mut V),
    ) -> TenantStoreResult<Option<V>> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let row = sqlx::query(
            r#"
            SELECT payload
            FROM tenant_records
            WHERE tenant_id = $1 AND namespace = $2 AND record_key = $3
            FOR UPDATE
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(self.namespace)
        .bind(record_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_record", e))?;
        let Some(row) = row else {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(None);
        };

        let mut value: V = decode(&row)?;
        f(&mut value);
        sqlx::query(
            r#"
            UPDATE tenant_records
            SET payload = $4, updated_at = NOW()
            WHERE tenant_id = $1 AND namespace = $2 AND record_key = $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(self.namespace)
        .bind(record_key)
        .bind(encode(&value)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_record", e))?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(Some(value))
    }
}

impl<K, V> TenantStore<K, V> for PostgresTenantStore<K, V>
where
    K: Serialize + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> TenantStoreResult<Option<V>> {
        let record_key = record_key(key)?;
        self.db.block_on(self.select(tenant_id, &record_key))
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> TenantStoreResult<()> {
        let record_key = record_key(&key)?;
        let payload = encode(&value)?;
        self.db.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO tenant_records (tenant_id, namespace, record_key, payload)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tenant_id, namespace, record_key)
                DO UPDATE SET
                    payload = EXCLUDED.payload,
                    updated_at = NOW()
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(self.namespace)
            .bind(&record_key)
            .bind(payload)
            .execute(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("upsert_record", e))?;
            Ok(())
        })
    }

    fn get_or_insert(&self, tenant_id: TenantId, key: K, value: V) -> TenantStoreResult<(V, bool)> {
        let record_key = record_key(&key)?;
        let payload = encode(&value)?;
        self.db.block_on(async {
            let inserted = sqlx::query(
                r#"
                INSERT INTO tenant_records (tenant_id, namespace, record_key, payload)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tenant_id, namespace, record_key) DO NOTHING
                RETURNING payload
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(self.namespace)
            .bind(&record_key)
            .bind(payload)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("insert_record", e))?;
            if inserted.is_some() {
                return Ok((value, true));
            }
            match self.select(tenant_id, &record_key).await? {
                Some(existing) => Ok((existing, false)),
                None => Err(TenantStoreError::Unavailable(format!(
                    "{} record {record_key} removed while inserting",
                    self.namespace
                ))),
            }
        })
    }

    fn modify(
        &self,
        tenant_id: TenantId,
        key: &K,
        f: &mut dyn FnMut(&mut V),
    ) -> TenantStoreResult<Option<V>> {
        let record_key = record_key(key)?;
        self.db.block_on(self.modify_tx(tenant_id, &record_key, f))
    }

    fn remove(&self, tenant_id: TenantId, key: &K) -> TenantStoreResult<Option<V>> {
        let record_key = record_key(key)?;
        self.db.block_on(async {
            let row = sqlx::query(
                r#"
                DELETE FROM tenant_records
                WHERE tenant_id = $1 AND namespace = $2 AND record_key = $3
                RETURNING payload
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(self.namespace)
            .bind(&record_key)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("delete_record", e))?;
            row.map(|r| decode(&r)).transpose()
        })
    }

    fn list(&self, tenant_id: TenantId) -> TenantStoreResult<Vec<V>> {
        self.db.block_on(async {
            let rows = sqlx::query(
                r#"
                SELECT payload
                FROM tenant_records
                WHERE tenant_id = $1 AND namespace = $2
                ORDER BY record_key ASC
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(self.namespace)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("list_records", e))?;
            rows.iter().map(decode).collect()
        })
    }

    fn clear_tenant(&self, tenant_id: TenantId) -> TenantStoreResult<()> {
        self.db.block_on(async {
            sqlx::query("DELETE FROM tenant_records WHERE tenant_id = $1 AND namespace = $2")
                .bind(tenant_id.as_uuid())
                .bind(self.namespace)
                .execute(self.db.pool())
                .await
                .map_err(|e| map_sqlx_error("clear_tenant", e))?;
            Ok(())
        })
    }
}

fn record_key<K: Serialize>(key: &K) -> TenantStoreResult<String> {
    serde_json::to_string(key).map_err(|e| TenantStoreError::Codec(e.to_string()))
}

fn encode<V: Serialize>(value: &V) -> TenantStoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| TenantStoreError::Codec(e.to_string()))
}

fn decode<V: DeserializeOwned>(row: &PgRow) -> TenantStoreResult<V> {
    let payload: serde_json::Value = row
        .try_get("payload")
        .map_err(|e| TenantStoreError::Codec(e.to_string()))?;
    serde_json::from_value(payload).map_err(|e| TenantStoreError::Codec(e.to_string()))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> TenantStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            TenantStoreError::Unavailable(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => TenantStoreError::Unavailable(format!("connection pool closed in {operation}")),
        other => TenantStoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}
