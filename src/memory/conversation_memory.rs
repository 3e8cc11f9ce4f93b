//! Per-conversation memory tier (component D), keyed by
//! `conversation/<agent_id>/<user_id>/<room_id>/{context,recent_messages}`.

use std::sync::Arc;

use serde_json::Value;

use crate::cache::Cache;
use crate::domain_types::{AgentId, RoomId, UserId};
use crate::storage::{ChatSession, ChatSessionStorage, HistoryMessage, StorageResult};

fn context_cache_key(agent_id: AgentId, user_id: &UserId, room_id: &RoomId) -> String {
    format!("conversation/{agent_id}/{user_id}/{room_id}/context")
}

fn recent_messages_cache_key(agent_id: AgentId, user_id: &UserId, room_id: &RoomId) -> String {
    format!("conversation/{agent_id}/{user_id}/{room_id}/recent_messages")
}

/// Per-conversation memory, backed by [`ChatSessionStorage`] with a
/// [`Cache`] layer in front of the frequently-read context and history.
pub struct ConversationMemory {
    store: Arc<dyn ChatSessionStorage>,
    cache: Arc<dyn Cache>,
}

impl ConversationMemory {
    /// Builds a conversation memory tier over `store`.
    pub fn new(store: Arc<dyn ChatSessionStorage>, cache: Arc<dyn Cache>) -> Self {
        Self { store, cache }
    }

    /// Reads the conversation's free-form context, if a session exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store lookup fails.
    pub async fn context(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> StorageResult<Option<Value>> {
        let cache_key = context_cache_key(agent_id, user_id, room_id);
        if let Some(bytes) = self.cache.read(&cache_key).await {
            if let Ok(value) = serde_json::from_slice(&bytes) {
                return Ok(Some(value));
            }
        }
        let session = self.store.find_session(agent_id, user_id, room_id).await?;
        if let Some(session) = &session {
            if let Ok(bytes) = serde_json::to_vec(&session.context) {
                self.cache.write(&cache_key, bytes, None).await;
            }
        }
        Ok(session.map(|s| s.context))
    }

    /// Merge-writes `patch` into the conversation's context.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store write fails.
    pub async fn update_context(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
        patch: Value,
    ) -> StorageResult<()> {
        self.store.update_context(agent_id, user_id, room_id, patch).await?;
        self.cache.delete(&context_cache_key(agent_id, user_id, room_id)).await;
        Ok(())
    }

    /// Appends a message, truncating history and bumping counters, and
    /// invalidates the cached `recent_messages` view.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store write fails.
    pub async fn add_message(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
        message: HistoryMessage,
    ) -> StorageResult<ChatSession> {
        let session = self.store.add_message(agent_id, user_id, room_id, message).await?;
        self.cache
            .delete(&recent_messages_cache_key(agent_id, user_id, room_id))
            .await;
        Ok(session)
    }

    /// Reads the most recent messages, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store lookup fails.
    pub async fn recent_messages(
        &self,
        agent_id: AgentId,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> StorageResult<Vec<HistoryMessage>> {
        let cache_key = recent_messages_cache_key(agent_id, user_id, room_id);
        if let Some(bytes) = self.cache.read(&cache_key).await {
            if let Ok(history) = serde_json::from_slice(&bytes) {
                return Ok(history);
            }
        }
        let session = self.store.find_session(agent_id, user_id, room_id).await?;
        let history = session.map(|s| s.message_history).unwrap_or_default();
        if let Ok(bytes) = serde_json::to_vec(&history) {
            self.cache.write(&cache_key, bytes, None).await;
        }
        Ok(history)
    }

    /// Deletes a conversation entirely (used by the reaper for stale sessions).
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store delete fails.
    pub async fn delete(&self, agent_id: AgentId, user_id: &UserId, room_id: &RoomId) -> StorageResult<()> {
        self.store.delete_session(agent_id, user_id, room_id).await?;
        self.cache.delete(&context_cache_key(agent_id, user_id, room_id)).await;
        self.cache
            .delete(&recent_messages_cache_key(agent_id, user_id, room_id))
            .await;
        Ok(())
    }
}
