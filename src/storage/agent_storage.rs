//! `SQLite` implementation of [`AgentStorage`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use tracing::instrument;

use crate::agent::{AgentRecord, AgentState};
use crate::domain_types::{AgentId, AgentName, BotClassId, HomeserverUrl, MessagesHandled};

use super::database::{DatabaseConnection, StorageError, StorageResult};
use super::traits::AgentStorage;

/// `SQLite`-backed agent registry persistence.
pub struct SqliteAgentStorage {
    connection: DatabaseConnection,
}

impl SqliteAgentStorage {
    /// Wraps an already-initialized connection (migrations already applied).
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }
}

fn parse_state(raw: &str) -> StorageResult<AgentState> {
    match raw {
        "offline" => Ok(AgentState::Offline),
        "connecting" => Ok(AgentState::Connecting),
        "online_idle" => Ok(AgentState::OnlineIdle),
        "online_busy" => Ok(AgentState::OnlineBusy),
        "paused" => Ok(AgentState::Paused),
        "error" => Ok(AgentState::Error),
        other => Err(StorageError::Database {
            message: format!("unknown agent state in database: {other}"),
        }),
    }
}

fn to_timestamp(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_timestamp(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> StorageResult<AgentRecord> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let name: String = row.try_get("name").map_err(db_err)?;
    let homeserver: String = row.try_get("homeserver").map_err(db_err)?;
    let username: String = row.try_get("username").map_err(db_err)?;
    let bot_class: String = row.try_get("bot_class").map_err(db_err)?;
    let state: String = row.try_get("state").map_err(db_err)?;
    let access_token: Option<String> = row.try_get("access_token").map_err(db_err)?;
    let encrypted_password: Option<String> = row.try_get("encrypted_password").map_err(db_err)?;
    let settings: String = row.try_get("settings").map_err(db_err)?;
    let last_sync_token: Option<String> = row.try_get("last_sync_token").map_err(db_err)?;
    let last_active_at: Option<i64> = row.try_get("last_active_at").map_err(db_err)?;
    let messages_handled: i64 = row.try_get("messages_handled").map_err(db_err)?;

    Ok(AgentRecord {
        id: AgentId::parse(&id).map_err(|e| StorageError::Database {
            message: format!("invalid agent id in database: {e}"),
        })?,
        name: AgentName::try_new(name).map_err(|e| StorageError::Database {
            message: format!("invalid agent name in database: {e}"),
        })?,
        homeserver: HomeserverUrl::try_new(homeserver).map_err(|e| StorageError::Database {
            message: format!("invalid homeserver url in database: {e}"),
        })?,
        username,
        bot_class: BotClassId::try_new(bot_class).map_err(|e| StorageError::Database {
            message: format!("invalid bot class in database: {e}"),
        })?,
        state: parse_state(&state)?,
        access_token,
        encrypted_password,
        settings: serde_json::from_str(&settings).map_err(|e| StorageError::Database {
            message: format!("invalid settings json in database: {e}"),
        })?,
        last_sync_token,
        last_active_at: last_active_at.map(from_timestamp),
        messages_handled: MessagesHandled::try_new(u64::try_from(messages_handled).unwrap_or(0))
            .unwrap_or_default(),
    })
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Database {
        message: e.to_string(),
    }
}

#[async_trait]
impl AgentStorage for SqliteAgentStorage {
    #[instrument(skip(self, record))]
    async fn upsert_agent(&self, record: &AgentRecord) -> StorageResult<()> {
        let now = to_timestamp(Utc::now());
        let settings = serde_json::to_string(&record.settings).map_err(|e| StorageError::Database {
            message: format!("failed to serialize settings: {e}"),
        })?;
        sqlx::query(
            r"
            INSERT INTO agents (
                id, name, homeserver, username, bot_class, state,
                access_token, encrypted_password, settings,
                last_sync_token, last_active_at, messages_handled,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                homeserver = excluded.homeserver,
                username = excluded.username,
                bot_class = excluded.bot_class,
                state = excluded.state,
                access_token = excluded.access_token,
                encrypted_password = excluded.encrypted_password,
                settings = excluded.settings,
                last_sync_token = excluded.last_sync_token,
                last_active_at = excluded.last_active_at,
                messages_handled = excluded.messages_handled,
                updated_at = excluded.updated_at
            ",
        )
        .bind(record.id.to_string())
        .bind(record.name.to_string())
        .bind(record.homeserver.to_string())
        .bind(&record.username)
        .bind(record.bot_class.to_string())
        .bind(record.state.to_string())
        .bind(&record.access_token)
        .bind(&record.encrypted_password)
        .bind(settings)
        .bind(&record.last_sync_token)
        .bind(record.last_active_at.map(to_timestamp))
        .bind(i64::try_from(record.messages_handled.as_u64()).unwrap_or(i64::MAX))
        .bind(now)
        .execute(self.connection.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_agent(&self, id: AgentId) -> StorageResult<Option<AgentRecord>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(self.connection.pool())
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_live_agents(&self) -> StorageResult<Vec<AgentRecord>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE state != 'offline'")
            .fetch_all(self.connection.pool())
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn find_all_agents(&self) -> StorageResult<Vec<AgentRecord>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY name")
            .fetch_all(self.connection.pool())
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn update_state(&self, id: AgentId, state: AgentState) -> StorageResult<()> {
        sqlx::query("UPDATE agents SET state = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(state.to_string())
            .bind(to_timestamp(Utc::now()))
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update_sync_token(&self, id: AgentId, token: Option<&str>) -> StorageResult<()> {
        sqlx::query("UPDATE agents SET last_sync_token = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(token)
            .bind(to_timestamp(Utc::now()))
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn record_message_handled(&self, id: AgentId, at: DateTime<Utc>) -> StorageResult<()> {
        sqlx::query(
            "UPDATE agents SET messages_handled = messages_handled + 1, last_active_at = ?1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(to_timestamp(at))
        .bind(id.to_string())
        .execute(self.connection.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_agent(&self, id: AgentId) -> StorageResult<()> {
        sqlx::query("DELETE FROM agents WHERE id = ?1")
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
