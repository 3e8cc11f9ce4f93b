//! `SQLite` implementation of [`AgentStoreStorage`], the per-agent key/value tier.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::Row;
use std::time::Duration;

use crate::domain_types::{AgentId, MemoryKey};

use super::database::{DatabaseConnection, StorageError, StorageResult};
use super::traits::AgentStoreStorage;

/// `SQLite`-backed per-agent key/value store.
pub struct SqliteAgentStoreStorage {
    connection: DatabaseConnection,
}

impl SqliteAgentStoreStorage {
    /// Wraps an already-initialized connection.
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Database {
        message: e.to_string(),
    }
}

fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl AgentStoreStorage for SqliteAgentStoreStorage {
    async fn get(&self, agent_id: AgentId, key: &MemoryKey) -> StorageResult<Option<Value>> {
        let row = sqlx::query(
            "SELECT value, expires_at FROM agent_store WHERE agent_id = ?1 AND key = ?2",
        )
        .bind(agent_id.to_string())
        .bind(key.to_string())
        .fetch_optional(self.connection.pool())
        .await
        .map_err(db_err)?;

        let Some(row) = row else { return Ok(None) };
        let expires_at: Option<i64> = row.try_get("expires_at").map_err(db_err)?;
        if let Some(ts) = expires_at {
            if from_ts(ts) <= Utc::now() {
                return Ok(None);
            }
        }
        let raw: String = row.try_get("value").map_err(db_err)?;
        let value = serde_json::from_str(&raw).map_err(|e| StorageError::Database {
            message: format!("invalid agent store value json: {e}"),
        })?;
        Ok(Some(value))
    }

    async fn set(
        &self,
        agent_id: AgentId,
        key: &MemoryKey,
        value: Value,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        let now = Utc::now();
        let expires_at = ttl.map(|d| to_ts(now + chrono::Duration::from_std(d).unwrap_or_default()));
        let raw = serde_json::to_string(&value).map_err(|e| StorageError::Database {
            message: format!("failed to serialize agent store value: {e}"),
        })?;
        sqlx::query(
            r"
            INSERT INTO agent_store (agent_id, key, value, expires_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(agent_id, key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            ",
        )
        .bind(agent_id.to_string())
        .bind(key.to_string())
        .bind(raw)
        .bind(expires_at)
        .bind(to_ts(now))
        .execute(self.connection.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, agent_id: AgentId, key: &MemoryKey) -> StorageResult<()> {
        sqlx::query("DELETE FROM agent_store WHERE agent_id = ?1 AND key = ?2")
            .bind(agent_id.to_string())
            .bind(key.to_string())
            .execute(self.connection.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn exists(&self, agent_id: AgentId, key: &MemoryKey) -> StorageResult<bool> {
        Ok(self.get(agent_id, key).await?.is_some())
    }

    async fn keys(&self, agent_id: AgentId) -> StorageResult<Vec<MemoryKey>> {
        let now = to_ts(Utc::now());
        let rows = sqlx::query(
            "SELECT key FROM agent_store WHERE agent_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        )
        .bind(agent_id.to_string())
        .bind(now)
        .fetch_all(self.connection.pool())
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let raw: String = row.try_get("key").map_err(db_err)?;
                MemoryKey::try_new(raw).map_err(|e| StorageError::Database {
                    message: format!("invalid memory key in database: {e}"),
                })
            })
            .collect()
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM agent_store WHERE expires_at IS NOT NULL AND expires_at <= ?1")
            .bind(to_ts(now))
            .execute(self.connection.pool())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn clear_agent(&self, agent_id: AgentId) -> StorageResult<()> {
        sqlx::query("DELETE FROM agent_store WHERE agent_id = ?1")
            .bind(agent_id.to_string())
            .execute(self.connection.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
