//! `SQLite` implementation of [`ChatSessionStorage`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::Row;

use crate::domain_types::{AgentId, RoomId, UserId, MAX_HISTORY_SIZE};

use super::database::{DatabaseConnection, StorageError, StorageResult};
use super::traits::{ChatSession, ChatSessionStorage, HistoryMessage};

/// `SQLite`-backed per-conversation session persistence.
pub struct SqliteChatSessionStorage {
    connection: DatabaseConnection,
}

impl SqliteChatSessionStorage {
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

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> StorageResult<ChatSession> {
    let agent_id: String = row.try_get("agent_id").map_err(db_err)?;
    let user_id: String = row.try_get("user_id").map_err(db_err)?;
    let room_id: String = row.try_get("room_id").map_err(db_err)?;
    let context: String = row.try_get("context").map_err(db_err)?;
    let message_history: String = row.try_get("message_history").map_err(db_err)?;
    let message_count: i64 = row.try_get("message_count").map_err(db_err)?;
    let last_message_at: Option<i64> = row.try_get("last_message_at").map_err(db_err)?;

    Ok(ChatSession {
        agent_id: AgentId::parse(&agent_id).map_err(|e| StorageError::Database {
            message: format!("invalid agent id in database: {e}"),
        })?,
        user_id: UserId::try_new(user_id).map_err(|e| StorageError::Database {
            message: format!("invalid user id in database: {e}"),
        })?,
        room_id: RoomId::try_new(room_id).map_err(|e| StorageError::Database {
            message: format!("invalid room id in database: {e}"),
        })?,
        context: serde_json::from_str(&context).map_err(|e| StorageError::Database {
            message: format!("invalid context json: {e}"),
        })?,
        message_history: serde_json::from_str(&message_history).map_err(|e| StorageError::Database {
            message: format!("invalid message history json: {e}"),
        })?,
        message_count: u64::try_from(message_count).unwrap_or(0),
        last_message_at: last_message_at.map(from_ts),
    })
}

#[async_trait]
impl ChatSessionStorage for SqliteChatSessionStorage {
    async fn find_session(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> StorageResult<Option<ChatSession>> {
        let row = sqlx::query(
            "SELECT * FROM chat_sessions WHERE agent_id = ?1 AND user_id = ?2 AND room_id = ?3",
        )
        .bind(agent_id.to_string())
        .bind(user_id.to_string())
        .bind(room_id.to_string())
        .fetch_optional(self.connection.pool())
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn update_context(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
        context: Value,
    ) -> StorageResult<()> {
        let now = to_ts(Utc::now());
        let existing = self.find_session(agent_id, user_id, room_id).await?;
        let merged = match existing {
            Some(session) => merge_json(session.context, context),
            None => context,
        };
        let raw = serde_json::to_string(&merged).map_err(|e| StorageError::Database {
            message: format!("failed to serialize context: {e}"),
        })?;
        sqlx::query(
            r"
            INSERT INTO chat_sessions (agent_id, user_id, room_id, context, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(agent_id, user_id, room_id) DO UPDATE SET
                context = excluded.context,
                updated_at = excluded.updated_at
            ",
        )
        .bind(agent_id.to_string())
        .bind(user_id.to_string())
        .bind(room_id.to_string())
        .bind(raw)
        .bind(now)
        .execute(self.connection.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn add_message(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
        message: HistoryMessage,
    ) -> StorageResult<ChatSession> {
        let mut tx = self.connection.pool().begin().await.map_err(db_err)?;

        let row = sqlx::query(
            "SELECT context, message_history FROM chat_sessions WHERE agent_id = ?1 AND user_id = ?2 AND room_id = ?3",
        )
        .bind(agent_id.to_string())
        .bind(user_id.to_string())
        .bind(room_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let (context, mut history): (String, Vec<HistoryMessage>) = match row {
            Some(row) => {
                let context: String = row.try_get("context").map_err(db_err)?;
                let raw_history: String = row.try_get("message_history").map_err(db_err)?;
                let history: Vec<HistoryMessage> = serde_json::from_str(&raw_history)
                    .map_err(|e| StorageError::Database {
                        message: format!("invalid message history json: {e}"),
                    })?;
                (context, history)
            }
            None => ("{}".to_string(), Vec::new()),
        };

        history.push(message.clone());
        if history.len() > MAX_HISTORY_SIZE {
            let overflow = history.len() - MAX_HISTORY_SIZE;
            history.drain(0..overflow);
        }
        let message_count = i64::try_from(history.len()).unwrap_or(i64::MAX);
        let history_json = serde_json::to_string(&history).map_err(|e| StorageError::Database {
            message: format!("failed to serialize message history: {e}"),
        })?;
        let now = to_ts(Utc::now());

        sqlx::query(
            r"
            INSERT INTO chat_sessions (
                agent_id, user_id, room_id, context, message_history,
                message_count, last_message_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7)
            ON CONFLICT(agent_id, user_id, room_id) DO UPDATE SET
                message_history = excluded.message_history,
                message_count = excluded.message_count,
                last_message_at = excluded.last_message_at,
                updated_at = excluded.updated_at
            ",
        )
        .bind(agent_id.to_string())
        .bind(user_id.to_string())
        .bind(room_id.to_string())
        .bind(&context)
        .bind(&history_json)
        .bind(message_count)
        .bind(to_ts(message.timestamp))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "UPDATE agents SET messages_handled = messages_handled + 1, last_active_at = ?1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(now)
        .bind(agent_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(ChatSession {
            agent_id,
            user_id: user_id.clone(),
            room_id: room_id.clone(),
            context: serde_json::from_str(&context).unwrap_or(Value::Null),
            message_history: history,
            message_count: u64::try_from(message_count).unwrap_or(0),
            last_message_at: Some(message.timestamp),
        })
    }

    async fn find_stale_sessions(&self, stale_after: DateTime<Utc>) -> StorageResult<Vec<ChatSession>> {
        let rows = sqlx::query(
            "SELECT * FROM chat_sessions WHERE last_message_at IS NOT NULL AND last_message_at <= ?1",
        )
        .bind(to_ts(stale_after))
        .fetch_all(self.connection.pool())
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_session).collect()
    }

    async fn delete_session(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> StorageResult<()> {
        sqlx::query("DELETE FROM chat_sessions WHERE agent_id = ?1 AND user_id = ?2 AND room_id = ?3")
            .bind(agent_id.to_string())
            .bind(user_id.to_string())
            .bind(room_id.to_string())
            .execute(self.connection.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

fn merge_json(mut base: Value, patch: Value) -> Value {
    if let (Value::Object(base_map), Value::Object(patch_map)) = (&mut base, patch) {
        for (key, value) in patch_map {
            base_map.insert(key, value);
        }
        base
    } else {
        base
    }
}
