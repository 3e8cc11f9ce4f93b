//! Global shared knowledge base (component D), gated by the `public_read`
//! and `public_write` permission fields on each entry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::domain_types::{EventType, MemoryKey, RoomId, UserId};
use crate::matrix::MatrixEvent;
use crate::router::{Router, RouterEvent};
use crate::storage::{KnowledgeBaseEntry, KnowledgeBaseStorage, StorageResult};

/// Default time-to-live applied by [`KnowledgeBase::broadcast`].
pub const DEFAULT_BROADCAST_TTL: Duration = Duration::from_secs(5 * 60);

/// Event type used for the synthetic router events `broadcast` emits.
pub const BROADCAST_EVENT_TYPE: &str = "conclave.knowledge_base.broadcast";

/// Global key/value store shared across every agent in the process.
pub struct KnowledgeBase {
    store: Arc<dyn KnowledgeBaseStorage>,
    router: Arc<Router>,
}

impl KnowledgeBase {
    /// Builds a knowledge base over `store`, using `router` for broadcasts.
    pub fn new(store: Arc<dyn KnowledgeBaseStorage>, router: Arc<Router>) -> Self {
        Self { store, router }
    }

    /// Reads an entry without any permission check (privileged/system callers).
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store lookup fails.
    pub async fn get(&self, key: &MemoryKey) -> StorageResult<Option<KnowledgeBaseEntry>> {
        self.store.get(key).await
    }

    /// Reads an entry on behalf of an agent, honoring `public_read`.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store lookup fails.
    pub async fn get_for_agent(&self, key: &MemoryKey) -> StorageResult<Option<KnowledgeBaseEntry>> {
        let entry = self.store.get(key).await?;
        Ok(entry.filter(|e| e.public_read))
    }

    /// Writes an entry without any permission check (privileged/system callers).
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store write fails.
    pub async fn set(&self, entry: KnowledgeBaseEntry) -> StorageResult<()> {
        self.store.set(entry).await
    }

    /// Writes `value` at `key` on behalf of an agent: permitted when the
    /// entry doesn't exist yet, or when the existing entry's
    /// `public_write` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store read/write fails, or if the
    /// write is not permitted.
    pub async fn set_for_agent(&self, key: &MemoryKey, value: Value) -> StorageResult<()> {
        let existing = self.store.get(key).await?;
        let permitted = existing.as_ref().is_none_or(|e| e.public_write);
        if !permitted {
            warn!(%key, "knowledge base write rejected: not public_write");
            return Ok(());
        }
        let entry = KnowledgeBaseEntry {
            key: key.clone(),
            value,
            category: existing.as_ref().and_then(|e| e.category.clone()),
            public_read: existing.as_ref().map_or(true, |e| e.public_read),
            public_write: existing.as_ref().map_or(true, |e| e.public_write),
            expires_at: existing.and_then(|e| e.expires_at),
        };
        self.store.set(entry).await
    }

    /// Deletes an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store delete fails.
    pub async fn delete(&self, key: &MemoryKey) -> StorageResult<()> {
        self.store.delete(key).await
    }

    /// Sets `value` at `key` (TTL defaulting to 5 minutes) then broadcasts a
    /// synthetic event through the router so every agent observes the
    /// update, bypassing normal route matching.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store write fails.
    pub async fn broadcast(&self, key: &MemoryKey, value: Value, ttl: Option<Duration>) -> StorageResult<()> {
        let ttl = ttl.unwrap_or(DEFAULT_BROADCAST_TTL);
        let entry = KnowledgeBaseEntry {
            key: key.clone(),
            value: value.clone(),
            category: None,
            public_read: true,
            public_write: true,
            expires_at: Some(Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default()),
        };
        self.store.set(entry).await?;

        let event = RouterEvent {
            room_id: None::<RoomId>,
            event_type: EventType::try_new(BROADCAST_EVENT_TYPE).expect("static event type is valid"),
            user_id: None::<UserId>,
            event: MatrixEvent {
                event_type: EventType::try_new(BROADCAST_EVENT_TYPE).expect("static event type is valid"),
                event_id: None,
                sender: placeholder_system_user(),
                origin_server_ts: None,
                content: serde_json::json!({"key": key.to_string(), "value": value}),
                state_key: None,
                room_id: None,
            },
        };
        self.router.broadcast_event(event).await;
        Ok(())
    }
}

fn placeholder_system_user() -> UserId {
    UserId::try_new("@conclave:system").expect("static system user id is valid")
}
