//! The listener state machine and `/sync` loop bound to one agent
//! (component F).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cache::Cache;
use crate::domain_types::{AgentId, EventType, RoomId, UserId};
use crate::error::ConclaveError;
use crate::http::TransportError;
use crate::matrix::{MatrixApi, MatrixApiError, MatrixEvent, SyncResponse};
use crate::router::{Router, RouterEvent};
use crate::storage::AgentStorage;

use super::room::Room;

/// `client_cache` mode: how aggressively rooms and users are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCacheMode {
    /// No room or user is materialized; every lookup goes straight to the API
    None,
    /// Rooms are materialized on demand; users are never cached
    Some,
    /// Rooms and users are both cached and kept fresh by state events
    All,
}

/// State of the listener driving this client's `/sync` loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not yet started, or fully stopped
    Idle,
    /// Actively syncing
    Listening,
    /// Stop requested; draining the in-flight sync before going idle
    Stopping,
}

/// Tuning for the `/sync` loop's timeout and retry/backoff behavior.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Long-poll timeout passed to each `/sync` call
    pub timeout: Duration,
    /// Consecutive `TimeoutError`s tolerated before surfacing the failure
    pub allow_sync_retry: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Upper bound the doubling backoff is capped at
    pub max_backoff: Duration,
    /// Sleep between successive successful syncs
    pub sync_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            allow_sync_retry: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            sync_interval: Duration::ZERO,
        }
    }
}

/// Hooks the bot layer implements to observe dispatched `/sync` events.
///
/// Matches the dispatch contract in the client and sync loop design: presence,
/// invite, leave, and per-room timeline/state/ephemeral events each get their
/// own hook, invoked in the order events appear in the `/sync` response.
#[async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// A presence event, independent of any room.
    async fn on_presence_event(&self, event: &MatrixEvent);
    /// An event in a room this client has been invited to but not joined.
    async fn on_invite_event(&self, room_id: &RoomId, event: &MatrixEvent);
    /// An event in a room this client has just left.
    async fn on_leave_event(&self, room_id: &RoomId, event: &MatrixEvent);
    /// A timeline event in a joined room (also routed via the event router).
    async fn on_event(&self, room_id: &RoomId, event: &MatrixEvent);
    /// A state event in a joined room, after the room cache has observed it.
    async fn on_state_event(&self, room_id: &RoomId, event: &MatrixEvent);
    /// An ephemeral event (typing, read receipts) in a joined room.
    async fn on_ephemeral_event(&self, room_id: &RoomId, event: &MatrixEvent);
}

/// Read-only access to a client's materialized rooms, used by bots that need
/// room state (member counts, power levels) without owning the client.
#[async_trait]
pub trait RoomLookup: Send + Sync {
    /// Returns (materializing if necessary) the room object for `room_id`.
    async fn room(&self, room_id: &RoomId) -> Arc<Room>;
    /// Ids of every room currently tracked in the client's cache.
    fn joined_room_ids(&self) -> Vec<RoomId>;
}

/// One agent's connection to a homeserver: owns exactly one `/sync` loop
/// (per the concurrency model, a client is pinned to its agent for the
/// agent's lifetime once created).
pub struct Client {
    agent_id: AgentId,
    matrix: Arc<MatrixApi>,
    own_user_id: RwLock<Option<UserId>>,
    state: RwLock<ListenerState>,
    cache_mode: ClientCacheMode,
    cache: Arc<dyn Cache>,
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    router: Arc<Router>,
    agent_storage: Arc<dyn AgentStorage>,
    sync_config: SyncConfig,
    stop_token: CancellationToken,
}

impl Client {
    /// Builds a client for `agent_id`, not yet listening.
    pub fn new(
        agent_id: AgentId,
        matrix: Arc<MatrixApi>,
        cache: Arc<dyn Cache>,
        cache_mode: ClientCacheMode,
        router: Arc<Router>,
        agent_storage: Arc<dyn AgentStorage>,
        sync_config: SyncConfig,
    ) -> Self {
        Self {
            agent_id,
            matrix,
            own_user_id: RwLock::new(None),
            state: RwLock::new(ListenerState::Idle),
            cache_mode,
            cache,
            rooms: RwLock::new(HashMap::new()),
            router,
            agent_storage,
            sync_config,
            stop_token: CancellationToken::new(),
        }
    }

    /// Records this client's own mxid, used for the `ignore_own` dispatch check.
    pub fn set_own_user_id(&self, user_id: UserId) {
        *self.own_user_id.write().expect("lock poisoned") = Some(user_id);
    }

    /// This client's own mxid, if known (set after login completes).
    pub fn own_user_id(&self) -> Option<UserId> {
        self.own_user_id.read().expect("lock poisoned").clone()
    }

    /// Current listener state.
    pub fn state(&self) -> ListenerState {
        *self.state.read().expect("lock poisoned")
    }

    /// Requests a graceful stop; observed at the next suspension point in the
    /// sync loop.
    pub fn stop_listener(&self) {
        *self.state.write().expect("lock poisoned") = ListenerState::Stopping;
        self.stop_token.cancel();
    }

    /// The token the sync loop observes at each suspension point.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    fn materialize_room(&self, room_id: &RoomId) -> Arc<Room> {
        let mut rooms = self.rooms.write().expect("lock poisoned");
        Arc::clone(rooms.entry(room_id.clone()).or_insert_with(|| {
            Arc::new(Room::new(room_id.clone(), Arc::clone(&self.matrix), Arc::clone(&self.cache)))
        }))
    }

    /// Runs the `/sync` loop until stopped or an unrecoverable error occurs.
    ///
    /// # Errors
    ///
    /// Returns an error once `allow_sync_retry` consecutive timeouts have
    /// been exhausted, or on any non-timeout sync failure.
    #[instrument(skip(self, handler), fields(agent_id = %self.agent_id))]
    pub async fn run(
        &self,
        handler: Arc<dyn SyncEventHandler>,
        initial_sync_token: Option<String>,
    ) -> Result<(), ConclaveError> {
        *self.state.write().expect("lock poisoned") = ListenerState::Listening;
        let mut since = initial_sync_token;
        let mut failures: u32 = 0;
        let mut backoff = self.sync_config.initial_backoff;

        loop {
            if self.stop_token.is_cancelled() {
                break;
            }

            let timeout_ms = u64::try_from(self.sync_config.timeout.as_millis()).unwrap_or(u64::MAX);
            let outcome = tokio::select! {
                () = self.stop_token.cancelled() => None,
                result = self.matrix.sync(timeout_ms, since.as_deref()) => Some(result),
            };
            let Some(result) = outcome else { break };

            match result {
                Ok(response) => {
                    failures = 0;
                    backoff = self.sync_config.initial_backoff;
                    self.dispatch(&response, &handler).await;
                    since = Some(response.next_batch.clone());
                    if let Err(e) = self.agent_storage.update_sync_token(self.agent_id, since.as_deref()).await {
                        warn!(error = %e, "failed to persist sync token");
                    }
                    if !self.sync_config.sync_interval.is_zero() {
                        tokio::select! {
                            () = self.stop_token.cancelled() => break,
                            () = tokio::time::sleep(self.sync_config.sync_interval) => {}
                        }
                    }
                }
                Err(MatrixApiError::Transport(TransportError::TimeoutError(_))) => {
                    failures += 1;
                    if failures > self.sync_config.allow_sync_retry {
                        *self.state.write().expect("lock poisoned") = ListenerState::Idle;
                        return Err(ConclaveError::MatrixApi(MatrixApiError::Transport(
                            TransportError::TimeoutError("sync retry budget exhausted".to_string()),
                        )));
                    }
                    warn!(failures, ?backoff, "sync timed out, backing off");
                    tokio::select! {
                        () = self.stop_token.cancelled() => break,
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.sync_config.max_backoff);
                }
                Err(other) => {
                    *self.state.write().expect("lock poisoned") = ListenerState::Idle;
                    return Err(ConclaveError::MatrixApi(other));
                }
            }
        }

        *self.state.write().expect("lock poisoned") = ListenerState::Idle;
        Ok(())
    }

    async fn dispatch(&self, response: &SyncResponse, handler: &Arc<dyn SyncEventHandler>) {
        for event in &response.presence.events {
            handler.on_presence_event(event).await;
        }

        for (room_id, room_events) in &response.rooms.invite {
            if self.cache_mode != ClientCacheMode::None {
                self.materialize_room(room_id);
            }
            for event in room_events.state.iter().chain(room_events.timeline.iter()) {
                handler.on_invite_event(room_id, event).await;
            }
        }

        for (room_id, room_events) in &response.rooms.leave {
            for event in room_events.state.iter().chain(room_events.timeline.iter()) {
                handler.on_leave_event(room_id, event).await;
            }
            self.rooms.write().expect("lock poisoned").remove(room_id);
        }

        for (room_id, room_events) in &response.rooms.join {
            let room = (self.cache_mode != ClientCacheMode::None).then(|| self.materialize_room(room_id));

            for event in &room_events.timeline {
                handler.on_event(room_id, event).await;
                self.router.dispatch_event(RouterEvent {
                    room_id: Some(room_id.clone()),
                    event_type: event.event_type.clone(),
                    user_id: Some(event.sender.clone()),
                    event: event.clone(),
                });
            }
            for event in &room_events.state {
                if let Some(room) = &room {
                    room.apply_state_event(event).await;
                }
                handler.on_state_event(room_id, event).await;
            }
            for event in &room_events.ephemeral {
                handler.on_ephemeral_event(room_id, event).await;
            }
            for event in &room_events.account_data {
                if let Some(room) = &room {
                    room.set_account_data(event.event_type.clone(), event.content.clone());
                }
            }
        }

        debug!(next_batch = %response.next_batch, "dispatched sync response");
    }
}

#[async_trait]
impl RoomLookup for Client {
    async fn room(&self, room_id: &RoomId) -> Arc<Room> {
        self.materialize_room(room_id)
    }

    fn joined_room_ids(&self) -> Vec<RoomId> {
        self.rooms.read().expect("lock poisoned").keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRegistry;
    use crate::cache::MemoryCache;
    use crate::http::{HttpTransport, TransportConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_client() -> Client {
        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let matrix = Arc::new(MatrixApi::new(transport));
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let router = Arc::new(Router::new(16, Arc::new(AgentRegistry::new())));
        let agent_storage: Arc<dyn AgentStorage> = Arc::new(NullAgentStorage);
        Client::new(
            AgentId::generate(),
            matrix,
            cache,
            ClientCacheMode::All,
            router,
            agent_storage,
            SyncConfig::default(),
        )
    }

    struct NullAgentStorage;

    #[async_trait]
    impl AgentStorage for NullAgentStorage {
        async fn upsert_agent(&self, _record: &crate::agent::AgentRecord) -> crate::storage::StorageResult<()> {
            Ok(())
        }
        async fn find_agent(&self, _id: AgentId) -> crate::storage::StorageResult<Option<crate::agent::AgentRecord>> {
            Ok(None)
        }
        async fn find_live_agents(&self) -> crate::storage::StorageResult<Vec<crate::agent::AgentRecord>> {
            Ok(Vec::new())
        }
        async fn find_all_agents(&self) -> crate::storage::StorageResult<Vec<crate::agent::AgentRecord>> {
            Ok(Vec::new())
        }
        async fn update_state(&self, _id: AgentId, _state: crate::agent::AgentState) -> crate::storage::StorageResult<()> {
            Ok(())
        }
        async fn update_sync_token(&self, _id: AgentId, _token: Option<&str>) -> crate::storage::StorageResult<()> {
            Ok(())
        }
        async fn record_message_handled(
            &self,
            _id: AgentId,
            _at: chrono::DateTime<chrono::Utc>,
        ) -> crate::storage::StorageResult<()> {
            Ok(())
        }
        async fn delete_agent(&self, _id: AgentId) -> crate::storage::StorageResult<()> {
            Ok(())
        }
    }

    struct CountingHandler {
        events: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SyncEventHandler for CountingHandler {
        async fn on_presence_event(&self, _event: &MatrixEvent) {}
        async fn on_invite_event(&self, _room_id: &RoomId, _event: &MatrixEvent) {}
        async fn on_leave_event(&self, _room_id: &RoomId, _event: &MatrixEvent) {}
        async fn on_event(&self, _room_id: &RoomId, _event: &MatrixEvent) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_state_event(&self, _room_id: &RoomId, _event: &MatrixEvent) {}
        async fn on_ephemeral_event(&self, _room_id: &RoomId, _event: &MatrixEvent) {}
    }

    fn sample_event() -> MatrixEvent {
        MatrixEvent {
            event_type: EventType::try_new("m.room.message").unwrap(),
            event_id: None,
            sender: UserId::try_new("@bob:example.org").unwrap(),
            origin_server_ts: Some(0),
            content: serde_json::Value::Null,
            state_key: None,
            room_id: Some(RoomId::try_new("!r:example.org").unwrap()),
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_timeline_events_in_order() {
        let client = test_client();
        let room_id = RoomId::try_new("!r:example.org").unwrap();
        let mut rooms = crate::matrix::SyncRooms::default();
        let mut events = crate::matrix::RoomEvents::default();
        events.timeline.push(sample_event());
        events.timeline.push(sample_event());
        rooms.join.insert(room_id, events);
        let response = SyncResponse {
            next_batch: "s1".to_string(),
            rooms,
            presence: crate::matrix::PresenceSection::default(),
        };

        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn SyncEventHandler> = Arc::new(CountingHandler { events: Arc::clone(&count) });
        client.dispatch(&response, &handler).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_listener_cancels_token() {
        let client = test_client();
        assert!(!client.stop_token().is_cancelled());
        client.stop_listener();
        assert!(client.stop_token().is_cancelled());
        assert_eq!(client.state(), ListenerState::Stopping);
    }
}
