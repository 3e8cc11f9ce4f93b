//! `SQLite` implementation of [`KnowledgeBaseStorage`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;

use crate::domain_types::MemoryKey;

use super::database::{DatabaseConnection, StorageError, StorageResult};
use super::traits::{KnowledgeBaseEntry, KnowledgeBaseStorage};

/// `SQLite`-backed global knowledge base persistence.
pub struct SqliteKnowledgeBaseStorage {
    connection: DatabaseConnection,
}

impl SqliteKnowledgeBaseStorage {
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

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> StorageResult<KnowledgeBaseEntry> {
    let key: String = row.try_get("key").map_err(db_err)?;
    let value: String = row.try_get("value").map_err(db_err)?;
    let category: Option<String> = row.try_get("category").map_err(db_err)?;
    let public_read: i64 = row.try_get("public_read").map_err(db_err)?;
    let public_write: i64 = row.try_get("public_write").map_err(db_err)?;
    let expires_at: Option<i64> = row.try_get("expires_at").map_err(db_err)?;

    Ok(KnowledgeBaseEntry {
        key: MemoryKey::try_new(key).map_err(|e| StorageError::Database {
            message: format!("invalid memory key in database: {e}"),
        })?,
        value: serde_json::from_str(&value).map_err(|e| StorageError::Database {
            message: format!("invalid knowledge base value json: {e}"),
        })?,
        category,
        public_read: public_read != 0,
        public_write: public_write != 0,
        expires_at: expires_at.map(from_ts),
    })
}

#[async_trait]
impl KnowledgeBaseStorage for SqliteKnowledgeBaseStorage {
    async fn get(&self, key: &MemoryKey) -> StorageResult<Option<KnowledgeBaseEntry>> {
        let row = sqlx::query("SELECT * FROM knowledge_base WHERE key = ?1")
            .bind(key.to_string())
            .fetch_optional(self.connection.pool())
            .await
            .map_err(db_err)?;
        let Some(row) = row else { return Ok(None) };
        let entry = row_to_entry(&row)?;
        if entry.expires_at.is_some_and(|ts| ts <= Utc::now()) {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, entry: KnowledgeBaseEntry) -> StorageResult<()> {
        let now = to_ts(Utc::now());
        let raw = serde_json::to_string(&entry.value).map_err(|e| StorageError::Database {
            message: format!("failed to serialize knowledge base value: {e}"),
        })?;
        sqlx::query(
            r"
            INSERT INTO knowledge_base (
                key, value, category, public_read, public_write, expires_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                category = excluded.category,
                public_read = excluded.public_read,
                public_write = excluded.public_write,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            ",
        )
        .bind(entry.key.to_string())
        .bind(raw)
        .bind(entry.category)
        .bind(i64::from(entry.public_read))
        .bind(i64::from(entry.public_write))
        .bind(entry.expires_at.map(to_ts))
        .bind(now)
        .execute(self.connection.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, key: &MemoryKey) -> StorageResult<()> {
        sqlx::query("DELETE FROM knowledge_base WHERE key = ?1")
            .bind(key.to_string())
            .execute(self.connection.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM knowledge_base WHERE expires_at IS NOT NULL AND expires_at <= ?1")
            .bind(to_ts(now))
            .execute(self.connection.pool())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
