//! AttributeStorage implementation for SQLite
//!
//! Rows are written with `INSERT ... ON CONFLICT DO UPDATE` so an upsert is
//! a single atomic statement; the unique constraint on
//! (modelable_id, modelable_type, key) is the serialization point for
//! concurrent writers targeting the same key.

use crate::connection::SqlitePool;
use crate::error::{SqliteError, SqliteResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use serde_json::Value;
use sidetable_core::{AttributeError, AttributeRecord, AttributeResult, AttributeStorage, OwnerRef};
use std::collections::BTreeMap;
use tracing::debug;

/// SQLite implementation of [`AttributeStorage`]
#[derive(Clone)]
pub struct SqliteAttributeStore {
    pool: SqlitePool,
}

impl SqliteAttributeStore {
    /// Create a new store over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Flush a change set and run the host row write in one transaction
    ///
    /// Upserts every entry of `changes` for `owner`, then invokes
    /// `host_save` on the same transaction (this is where the caller writes
    /// the host entity's own row), then commits. A failure in either half
    /// rolls back both: the host row is never committed with its soft
    /// fields dropped, and no side rows survive a failed host save.
    pub async fn synchronize_within<T, F>(
        &self,
        owner: OwnerRef,
        changes: BTreeMap<String, Value>,
        host_save: F,
    ) -> AttributeResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            pool.with_connection_mut(|conn| {
                let tx = conn.transaction()?;
                for (key, value) in &changes {
                    upsert_in(&tx, &owner, key, value)?;
                }
                let out = host_save(&tx).map_err(SqliteError::from)?;
                tx.commit()?;
                debug!(owner = %owner, count = changes.len(), "synchronized soft attributes");
                Ok(out)
            })
        })
        .await
        .map_err(|e| AttributeError::backend(e.to_string()))?
        .map_err(Into::into)
    }

    /// Remove an owner's attribute rows and run the host deletion in one
    /// transaction
    ///
    /// The cascade-delete policy for owner deletion: the polymorphic
    /// reference cannot carry a SQL foreign key, so the host's delete
    /// routine wraps its own row removal with this call and no orphan rows
    /// are left behind.
    pub async fn delete_within<T, F>(&self, owner: OwnerRef, host_delete: F) -> AttributeResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            pool.with_connection_mut(|conn| {
                let tx = conn.transaction()?;
                delete_in(&tx, &owner)?;
                let out = host_delete(&tx).map_err(SqliteError::from)?;
                tx.commit()?;
                Ok(out)
            })
        })
        .await
        .map_err(|e| AttributeError::backend(e.to_string()))?
        .map_err(Into::into)
    }
}

#[async_trait]
impl AttributeStorage for SqliteAttributeStore {
    async fn load_attributes(&self, owner: &OwnerRef) -> AttributeResult<BTreeMap<String, Value>> {
        let pool = self.pool.clone();
        let owner = owner.clone();

        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, value FROM attributes
                     WHERE modelable_id = ?1 AND modelable_type = ?2",
                )?;

                let mut attributes = BTreeMap::new();
                let mut rows = stmt.query(params![owner.id, owner.kind])?;
                while let Some(row) = rows.next()? {
                    let key: String = row.get(0)?;
                    let raw: String = row.get(1)?;
                    let value = serde_json::from_str(&raw)
                        .map_err(|e| SqliteError::Serialization(e.to_string()))?;
                    attributes.insert(key, value);
                }

                Ok(attributes)
            })
        })
        .await
        .map_err(|e| AttributeError::backend(e.to_string()))?
        .map_err(Into::into)
    }

    async fn attribute_records(&self, owner: &OwnerRef) -> AttributeResult<Vec<AttributeRecord>> {
        let pool = self.pool.clone();
        let owner = owner.clone();

        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, modelable_id, modelable_type, key, value, created_at, updated_at
                     FROM attributes
                     WHERE modelable_id = ?1 AND modelable_type = ?2
                     ORDER BY key",
                )?;

                let records = stmt
                    .query_map(params![owner.id, owner.kind], row_to_record)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(records)
            })
        })
        .await
        .map_err(|e| AttributeError::backend(e.to_string()))?
        .map_err(Into::into)
    }

    async fn upsert_attribute(
        &self,
        owner: &OwnerRef,
        key: &str,
        value: &Value,
    ) -> AttributeResult<()> {
        let pool = self.pool.clone();
        let owner = owner.clone();
        let key = key.to_string();
        let value = value.clone();

        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| upsert_in(conn, &owner, &key, &value))
        })
        .await
        .map_err(|e| AttributeError::backend(e.to_string()))?
        .map_err(Into::into)
    }

    async fn synchronize(
        &self,
        owner: &OwnerRef,
        changes: &BTreeMap<String, Value>,
    ) -> AttributeResult<usize> {
        let owner = owner.clone();
        let changes = changes.clone();
        let count = changes.len();

        self.synchronize_within(owner, changes, |_tx| Ok(()))
            .await?;
        Ok(count)
    }

    async fn delete_attributes(&self, owner: &OwnerRef) -> AttributeResult<usize> {
        let pool = self.pool.clone();
        let owner = owner.clone();

        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| delete_in(conn, &owner))
        })
        .await
        .map_err(|e| AttributeError::backend(e.to_string()))?
        .map_err(Into::into)
    }
}

/// Upsert one (owner, key) row on any connection-like handle
///
/// `created_at` is set on first insert only; conflicts overwrite the value
/// and bump `updated_at`, matching key exactly and never duplicating.
fn upsert_in(conn: &Connection, owner: &OwnerRef, key: &str, value: &Value) -> SqliteResult<()> {
    let payload =
        serde_json::to_string(value).map_err(|e| SqliteError::Serialization(e.to_string()))?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        r#"
        INSERT INTO attributes (modelable_id, modelable_type, key, value, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        ON CONFLICT(modelable_id, modelable_type, key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
        params![owner.id, owner.kind, key, payload, now],
    )?;

    Ok(())
}

fn delete_in(conn: &Connection, owner: &OwnerRef) -> SqliteResult<usize> {
    let deleted = conn.execute(
        "DELETE FROM attributes WHERE modelable_id = ?1 AND modelable_type = ?2",
        params![owner.id, owner.kind],
    )?;
    Ok(deleted)
}

/// Convert a database row to an AttributeRecord
fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AttributeRecord> {
    let id: i64 = row.get(0)?;
    let modelable_id: i64 = row.get(1)?;
    let modelable_type: String = row.get(2)?;
    let key: String = row.get(3)?;
    let raw: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    let value = serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(AttributeRecord {
        id,
        owner: OwnerRef::new(modelable_type, modelable_id),
        key,
        value,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
