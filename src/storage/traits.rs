//! Persistent storage traits backing the agent, agent-store, chat-session,
//! and knowledge-base data model (§3).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::agent::{AgentRecord, AgentState};
use crate::domain_types::{AgentId, MemoryKey, RoomId, UserId};

use super::database::StorageResult;

/// A single message recorded in a chat session's history.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HistoryMessage {
    /// Matrix event id of the message
    pub event_id: String,
    /// Sender mxid
    pub sender: String,
    /// Message content (the `m.room.message` event content)
    pub content: Value,
    /// When the message was received
    pub timestamp: DateTime<Utc>,
}

/// A persisted per-conversation session.
#[derive(Debug, Clone)]
pub struct ChatSession {
    /// Owning agent
    pub agent_id: AgentId,
    /// Other participant
    pub user_id: UserId,
    /// Room the conversation takes place in
    pub room_id: RoomId,
    /// Free-form conversation-scoped state
    pub context: Value,
    /// Ordered message history, capped at `MAX_HISTORY_SIZE`
    pub message_history: Vec<HistoryMessage>,
    /// Count of messages in `message_history`
    pub message_count: u64,
    /// Timestamp of the most recent message
    pub last_message_at: Option<DateTime<Utc>>,
}

/// A persisted knowledge-base entry.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseEntry {
    /// Unique key
    pub key: MemoryKey,
    /// Stored value
    pub value: Value,
    /// Optional grouping category
    pub category: Option<String>,
    /// Whether any agent may read this entry
    pub public_read: bool,
    /// Whether any agent may overwrite this entry
    pub public_write: bool,
    /// Expiry, after which the reaper deletes the row
    pub expires_at: Option<DateTime<Utc>>,
}

/// Persistence for [`AgentRecord`]s: the `agents` table.
#[async_trait]
pub trait AgentStorage: Send + Sync {
    /// Inserts or fully replaces an agent record.
    async fn upsert_agent(&self, record: &AgentRecord) -> StorageResult<()>;

    /// Loads an agent by id.
    async fn find_agent(&self, id: AgentId) -> StorageResult<Option<AgentRecord>>;

    /// Loads every agent whose `state` is not `offline`, for start-all.
    async fn find_live_agents(&self) -> StorageResult<Vec<AgentRecord>>;

    /// Loads every agent record, for the `/status` probe and CLI `status`.
    async fn find_all_agents(&self) -> StorageResult<Vec<AgentRecord>>;

    /// Persists a new lifecycle state.
    async fn update_state(&self, id: AgentId, state: AgentState) -> StorageResult<()>;

    /// Persists the `/sync` resumption token.
    async fn update_sync_token(&self, id: AgentId, token: Option<&str>) -> StorageResult<()>;

    /// Atomically increments `messages_handled` and stamps `last_active_at`.
    async fn record_message_handled(&self, id: AgentId, at: DateTime<Utc>) -> StorageResult<()>;

    /// Deletes an agent record (operator-initiated only).
    async fn delete_agent(&self, id: AgentId) -> StorageResult<()>;
}

/// Persistence for per-agent key/value entries with optional TTL: the
/// `agent_store` table, keyed by `agent_memory/<agent_id>/<key>`.
#[async_trait]
pub trait AgentStoreStorage: Send + Sync {
    /// Reads a value, if present and not expired.
    async fn get(&self, agent_id: AgentId, key: &MemoryKey) -> StorageResult<Option<Value>>;

    /// Writes a value, optionally with a `ttl`.
    async fn set(
        &self,
        agent_id: AgentId,
        key: &MemoryKey,
        value: Value,
        ttl: Option<std::time::Duration>,
    ) -> StorageResult<()>;

    /// Deletes a value.
    async fn delete(&self, agent_id: AgentId, key: &MemoryKey) -> StorageResult<()>;

    /// Whether a non-expired value exists under `key`.
    async fn exists(&self, agent_id: AgentId, key: &MemoryKey) -> StorageResult<bool>;

    /// Lists non-expired keys for an agent.
    async fn keys(&self, agent_id: AgentId) -> StorageResult<Vec<MemoryKey>>;

    /// Deletes every row whose `expires_at` has passed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> StorageResult<u64>;

    /// Deletes every entry for an agent (used when an agent is destroyed).
    async fn clear_agent(&self, agent_id: AgentId) -> StorageResult<()>;
}

/// Persistence for [`ChatSession`]s: the `chat_sessions` table.
#[async_trait]
pub trait ChatSessionStorage: Send + Sync {
    /// Loads a session, if one exists for this (agent, user, room) triple.
    async fn find_session(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> StorageResult<Option<ChatSession>>;

    /// Merge-writes `context` into the session, creating it if absent.
    async fn update_context(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
        context: Value,
    ) -> StorageResult<()>;

    /// Appends `message` to the session's history, truncating to
    /// `MAX_HISTORY_SIZE` and bumping `message_count`/`last_message_at` in
    /// the same transaction, creating the session if absent.
    async fn add_message(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
        message: HistoryMessage,
    ) -> StorageResult<ChatSession>;

    /// Loads sessions whose `last_message_at` is older than `stale_after`.
    async fn find_stale_sessions(
        &self,
        stale_after: DateTime<Utc>,
    ) -> StorageResult<Vec<ChatSession>>;

    /// Deletes a session outright (used by the reaper for stale sessions).
    async fn delete_session(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> StorageResult<()>;
}

/// Persistence for [`KnowledgeBaseEntry`]s: the global `knowledge_base` table.
#[async_trait]
pub trait KnowledgeBaseStorage: Send + Sync {
    /// Reads an entry, if present and not expired.
    async fn get(&self, key: &MemoryKey) -> StorageResult<Option<KnowledgeBaseEntry>>;

    /// Writes an entry, replacing any existing value at `key`.
    async fn set(&self, entry: KnowledgeBaseEntry) -> StorageResult<()>;

    /// Deletes an entry.
    async fn delete(&self, key: &MemoryKey) -> StorageResult<()>;

    /// Deletes every row whose `expires_at` has passed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> StorageResult<u64>;
}
