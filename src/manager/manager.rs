//! Supervises every agent's lifecycle: start-all, individual start/stop/
//! pause/resume/restart, the health-check monitor, and the expiry reaper
//! (component K).
//!
//! Grounded on the orchestration shape of `AgentLifecycleManager` in the
//! teacher: one long-lived owner holding the registry, storage, and router,
//! spawning one task per agent and a sibling monitor task that restarts dead
//! ones, all observing a shared [`CancellationToken`] for shutdown.
//!
//! Methods that spawn tasks capturing the manager itself (`start_all`, the
//! monitor, the reaper) take `self: &Arc<Self>`; callers are expected to hold
//! an `Arc<AgentManager>` for the daemon's lifetime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::agent::{AgentLifecycleEvent, AgentRecord, AgentRegistry, RegistryEntry};
use crate::cache::Cache;
use crate::client::{Client, ClientCacheMode, RoomLookup, SyncConfig};
use crate::command::Dispatcher;
use crate::config::ManagerConfig;
use crate::domain_types::{AgentId, UserId};
use crate::http::{HttpTransport, TransportConfig};
use crate::matrix::{MatrixApi, MatrixApiError};
use crate::memory::{ConversationMemory, Reaper};
use crate::router::Router;
use crate::storage::AgentStorage;

use super::bot::StandardBot;
use super::client_pool::ClientPool;
use super::error::ManagerError;
use super::factory::BotFactory;

/// Shared infrastructure every agent's client and bot are built against.
pub struct ManagerDeps {
    /// Persisted agent records
    pub agent_storage: Arc<dyn AgentStorage>,
    /// Event router every client's sync loop dispatches timeline events into
    pub router: Arc<Router>,
    /// Shared room/user cache
    pub cache: Arc<dyn Cache>,
    /// Maps `bot_class` to a command registry
    pub bot_factory: Arc<dyn BotFactory>,
    /// Per-conversation history tier
    pub conversation_memory: Arc<ConversationMemory>,
    /// Expiry sweep for agent-store, knowledge-base, and stale sessions
    pub reaper: Arc<Reaper>,
}

/// Owns the set of running agents: starts them, restarts crashed ones,
/// pauses/resumes/stops them on request, and runs the background monitor
/// and reaper tasks.
pub struct AgentManager {
    config: ManagerConfig,
    agent_storage: Arc<dyn AgentStorage>,
    agent_registry: Arc<AgentRegistry>,
    router: Arc<Router>,
    cache: Arc<dyn Cache>,
    bot_factory: Arc<dyn BotFactory>,
    conversation_memory: Arc<ConversationMemory>,
    reaper: Arc<Reaper>,
    client_pool: ClientPool,
    stop_token: CancellationToken,
    monitor_handle: AsyncMutex<Option<JoinHandle<()>>>,
    reaper_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl AgentManager {
    /// Builds a manager over `deps`, not yet running anything.
    pub fn new(config: ManagerConfig, deps: ManagerDeps) -> Self {
        let max_clients = config.max_clients_per_homeserver;
        let agent_registry = deps.router.registry();
        Self {
            config,
            agent_storage: deps.agent_storage,
            agent_registry,
            router: deps.router,
            cache: deps.cache,
            bot_factory: deps.bot_factory,
            conversation_memory: deps.conversation_memory,
            reaper: deps.reaper,
            client_pool: ClientPool::new(max_clients),
            stop_token: CancellationToken::new(),
            monitor_handle: AsyncMutex::new(None),
            reaper_handle: AsyncMutex::new(None),
        }
    }

    /// The registry of currently-running agents, for the probe/status surface.
    pub fn agent_registry(&self) -> Arc<AgentRegistry> {
        Arc::clone(&self.agent_registry)
    }

    /// Loads every non-offline agent and starts it, spacing launches by
    /// `agent_startup_delay`, then starts the monitor and reaper tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent store cannot be read.
    pub async fn start_all(self: &Arc<Self>) -> Result<(), ManagerError> {
        self.start_shard(0, 1, None).await
    }

    /// Loads every non-offline agent assigned to this shard by round-robin
    /// over ids, starts them, then starts the monitor and reaper tasks.
    ///
    /// Round-robin sharding needs a stable total order over agent ids, so
    /// records are sorted by id before the `% total_workers` split; this
    /// means shard membership only depends on the id set, not load order.
    ///
    /// `allowed` restricts the set to the named agents (the CLI's
    /// `--agents a,b,c` filter) when given; `None` means every live agent is
    /// eligible.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent store cannot be read.
    #[instrument(skip(self, allowed))]
    pub async fn start_shard(
        self: &Arc<Self>,
        worker_index: usize,
        total_workers: usize,
        allowed: Option<&[crate::domain_types::AgentName]>,
    ) -> Result<(), ManagerError> {
        let mut records = self.agent_storage.find_live_agents().await?;
        if let Some(allowed) = allowed {
            records.retain(|r| allowed.contains(&r.name));
        }
        records.sort_by_key(|r| r.id);
        let shard: Vec<_> = records
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % total_workers.max(1) == worker_index)
            .map(|(_, r)| r)
            .collect();

        for (i, record) in shard.into_iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    () = self.stop_token.cancelled() => break,
                    () = tokio::time::sleep(self.config.agent_startup_delay) => {}
                }
            }
            let id = record.id;
            if let Err(e) = self.start_agent(record).await {
                warn!(agent = %id, error = %e, "failed to start agent during start-all");
            }
        }

        *self.monitor_handle.lock().await = Some(self.spawn_monitor());
        *self.reaper_handle.lock().await = Some(self.spawn_reaper());
        Ok(())
    }

    fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let stop_token = self.stop_token.clone();
        let interval = self.config.agent_health_check_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = stop_token.cancelled() => break,
                    _ = ticker.tick() => manager.monitor_tick().await,
                }
            }
        })
    }

    /// One health-check sweep: warns on agents idle past the configured
    /// threshold and restarts any agent whose driving task has died.
    async fn monitor_tick(self: &Arc<Self>) {
        for record in self.agent_registry.snapshot_records() {
            if let Some(last_active) = record.last_active_at {
                let idle_for = chrono::Utc::now() - last_active;
                let threshold = chrono::Duration::from_std(self.config.inactive_warning_threshold).unwrap_or_default();
                if idle_for > threshold {
                    warn!(agent = %record.name, idle_seconds = idle_for.num_seconds(), "agent inactive past warning threshold");
                }
            }
        }

        for id in self.agent_registry.dead_ids() {
            let Some(entry) = self.agent_registry.unregister(id) else { continue };
            warn!(agent = %id, "agent task found dead by monitor, restarting");
            let mut record = entry.record;
            if let Ok(next) = record.transition(AgentLifecycleEvent::EncounterError) {
                if let Err(e) = self.agent_storage.update_state(id, next).await {
                    warn!(agent = %id, error = %e, "failed to persist crash state before restart");
                }
            }
            if let Err(e) = self.start_agent(record).await {
                warn!(agent = %id, error = %e, "monitor-driven restart failed");
            }
        }
    }

    fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let reaper = Arc::clone(&self.reaper);
        let stop_token = self.stop_token.clone();
        tokio::spawn(async move { reaper.run(stop_token).await })
    }

    /// Starts one agent: acquires a client, authenticates, registers it, and
    /// spawns its sync loop. Idempotent: if `record.id` is already
    /// registered this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the homeserver transport cannot be built, login
    /// fails, or the agent's `bot_class` has no registered constructor.
    #[instrument(skip(self, record), fields(agent = %record.name))]
    pub async fn start_agent(&self, mut record: AgentRecord) -> Result<(), ManagerError> {
        if self.agent_registry.contains(record.id) {
            return Ok(());
        }

        self.apply_transition(&mut record, AgentLifecycleEvent::Connect).await?;

        let homeserver = record.homeserver.clone();
        let transport_config = TransportConfig { homeserver: homeserver.clone(), ..TransportConfig::default() };
        let matrix = self
            .client_pool
            .acquire_and_build(&homeserver, || async {
                HttpTransport::new(transport_config).map(|t| Arc::new(MatrixApi::new(t)))
            })
            .await
            .map_err(MatrixApiError::from)?;

        let own_user_id = self.authenticate(&matrix, &mut record).await?;

        let command_registry = self.bot_factory.build(&record.bot_class)?;

        let client = Arc::new(Client::new(
            record.id,
            Arc::clone(&matrix),
            Arc::clone(&self.cache),
            ClientCacheMode::All,
            Arc::clone(&self.router),
            Arc::clone(&self.agent_storage),
            SyncConfig::default(),
        ));
        client.set_own_user_id(own_user_id.clone());

        let dispatcher = Dispatcher::new(Arc::clone(&command_registry));
        let bot = Arc::new(StandardBot::new(
            record.id,
            record.name.clone(),
            own_user_id,
            Arc::clone(&matrix),
            Arc::clone(&client) as Arc<dyn RoomLookup>,
            dispatcher,
            command_registry,
            Arc::clone(&self.agent_registry),
            Arc::clone(&self.agent_storage),
            Arc::clone(&self.conversation_memory),
        ));

        self.apply_transition(&mut record, AgentLifecycleEvent::ConnectionEstablished).await?;

        let stop_token = client.stop_token();
        let initial_sync_token = record.last_sync_token.clone();
        let agent_id = record.id;
        let agent_registry = Arc::clone(&self.agent_registry);
        let agent_storage = Arc::clone(&self.agent_storage);

        let task = tokio::spawn(async move {
            let result = client.run(bot, initial_sync_token).await;
            if let Err(e) = &result {
                warn!(agent = %agent_id, error = %e, "agent sync loop exited with an error");
            }
            // An operator-driven pause/stop already unregistered and
            // transitioned this agent's record before cancelling its token;
            // `unregister` here is a no-op in that case, not a double
            // transition.
            if let Some(entry) = agent_registry.unregister(agent_id) {
                let mut record = entry.record;
                let event = if result.is_err() {
                    AgentLifecycleEvent::EncounterError
                } else {
                    AgentLifecycleEvent::Disconnect
                };
                if let Ok(next) = record.transition(event) {
                    if let Err(e) = agent_storage.update_state(agent_id, next).await {
                        warn!(agent = %agent_id, error = %e, "failed to persist exit-path state");
                    }
                }
            }
        });

        self.agent_storage.upsert_agent(&record).await?;
        self.agent_registry.register(
            record.id,
            RegistryEntry { record, task, stop_token, started_at: std::time::Instant::now() },
        );
        Ok(())
    }

    async fn authenticate(&self, matrix: &MatrixApi, record: &mut AgentRecord) -> Result<UserId, ManagerError> {
        if let Some(token) = &record.access_token {
            matrix.set_access_token(Some(token.clone()));
            let who = matrix.whoami().await.map_err(ManagerError::MatrixApi)?;
            let user_id = who.get("user_id").and_then(|v| v.as_str()).unwrap_or(&record.username);
            return UserId::try_new(user_id).map_err(|e| ManagerError::InvalidTransition(e.to_string()));
        }

        let password = record.encrypted_password.clone().ok_or_else(|| {
            ManagerError::InvalidTransition(format!("agent {} has neither access_token nor password", record.name))
        })?;
        let login = matrix.login(&record.username, &password).await.map_err(ManagerError::MatrixApi)?;
        let token = login.get("access_token").and_then(|v| v.as_str()).map(str::to_string);
        matrix.set_access_token(token.clone());
        record.access_token = token;
        let user_id = login.get("user_id").and_then(|v| v.as_str()).unwrap_or(&record.username);
        UserId::try_new(user_id).map_err(|e| ManagerError::InvalidTransition(e.to_string()))
    }

    async fn apply_transition(&self, record: &mut AgentRecord, event: AgentLifecycleEvent) -> Result<(), ManagerError> {
        let next = record.transition(event).map_err(ManagerError::InvalidTransition)?;
        self.agent_storage.update_state(record.id, next).await?;
        Ok(())
    }

    /// Signals `id`'s sync loop to stop and waits (up to `self`'s configured
    /// `shutdown_timeout`) for it to unregister itself, force-aborting the
    /// task if it doesn't.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotRunning`] if `id` has no registered entry.
    #[instrument(skip(self))]
    pub async fn stop_agent(&self, id: AgentId) -> Result<(), ManagerError> {
        self.request_stop(id, self.config.shutdown_timeout).await
    }

    async fn request_stop(&self, id: AgentId, grace_period: Duration) -> Result<(), ManagerError> {
        let token = self.agent_registry.stop_token(id).ok_or(ManagerError::NotRunning(id))?;
        token.cancel();

        let waited = tokio::time::timeout(grace_period, async {
            while self.agent_registry.contains(id) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if waited.is_err() {
            if let Some(entry) = self.agent_registry.unregister(id) {
                warn!(agent = %id, "force-aborting unresponsive agent task");
                entry.task.abort();
            }
        }
        Ok(())
    }

    /// Suspends a running agent: stops its sync loop and marks it `paused`
    /// rather than `offline`, so a later [`AgentManager::resume_agent`] call
    /// restarts it without an operator re-specifying it.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotRunning`] if `id` is not registered, or a
    /// storage error if persisting the new state fails.
    #[instrument(skip(self))]
    pub async fn pause_agent(&self, id: AgentId) -> Result<(), ManagerError> {
        let entry = self.agent_registry.unregister(id).ok_or(ManagerError::NotRunning(id))?;
        entry.stop_token.cancel();
        let mut record = entry.record;
        let next = record.transition(AgentLifecycleEvent::Pause).map_err(ManagerError::InvalidTransition)?;
        self.agent_storage.update_state(id, next).await?;
        Ok(())
    }

    /// Resumes a paused agent by reloading its record and starting it again.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::AgentNotFound`] if no such agent is persisted,
    /// or whatever [`AgentManager::start_agent`] returns.
    #[instrument(skip(self))]
    pub async fn resume_agent(&self, id: AgentId) -> Result<(), ManagerError> {
        let record = self.agent_storage.find_agent(id).await?.ok_or(ManagerError::AgentNotFound(id))?;
        self.start_agent(record).await
    }

    /// Stops and restarts an agent, reloading its record from storage.
    ///
    /// # Errors
    ///
    /// Returns whatever [`AgentManager::stop_agent`] or
    /// [`AgentManager::start_agent`] returns.
    #[instrument(skip(self))]
    pub async fn restart_agent(&self, id: AgentId) -> Result<(), ManagerError> {
        if self.agent_registry.contains(id) {
            self.stop_agent(id).await?;
        }
        let record = self.agent_storage.find_agent(id).await?.ok_or(ManagerError::AgentNotFound(id))?;
        self.start_agent(record).await
    }

    /// Stops every registered agent and halts the monitor and reaper tasks.
    pub async fn stop_all(&self) {
        self.stop_token.cancel();

        let ids = self.agent_registry.ids();
        let grace_period = self.config.shutdown_timeout;
        let stops = ids.into_iter().map(|id| self.request_stop(id, grace_period));
        futures::future::join_all(stops).await;

        if let Some(handle) = self.monitor_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.reaper_handle.lock().await.take() {
            handle.abort();
        }
        info!("agent manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::domain_types::{AgentName, BotClassId, HomeserverUrl, MessagesHandled};
    use crate::memory::ConversationMemory;
    use crate::storage::{ChatSession, HistoryMessage, KnowledgeBaseEntry, StorageResult};
    use async_trait::async_trait;
    use serde_json::Value;

    struct NullStorage;

    #[async_trait]
    impl AgentStorage for NullStorage {
        async fn upsert_agent(&self, _record: &AgentRecord) -> StorageResult<()> {
            Ok(())
        }
        async fn find_agent(&self, _id: AgentId) -> StorageResult<Option<AgentRecord>> {
            Ok(None)
        }
        async fn find_live_agents(&self) -> StorageResult<Vec<AgentRecord>> {
            Ok(Vec::new())
        }
        async fn find_all_agents(&self) -> StorageResult<Vec<AgentRecord>> {
            Ok(Vec::new())
        }
        async fn update_state(&self, _id: AgentId, _state: crate::agent::AgentState) -> StorageResult<()> {
            Ok(())
        }
        async fn update_sync_token(&self, _id: AgentId, _token: Option<&str>) -> StorageResult<()> {
            Ok(())
        }
        async fn record_message_handled(&self, _id: AgentId, _at: chrono::DateTime<chrono::Utc>) -> StorageResult<()> {
            Ok(())
        }
        async fn delete_agent(&self, _id: AgentId) -> StorageResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl crate::storage::AgentStoreStorage for NullStorage {
        async fn get(&self, _agent_id: AgentId, _key: &crate::domain_types::MemoryKey) -> StorageResult<Option<Value>> {
            Ok(None)
        }
        async fn set(
            &self,
            _agent_id: AgentId,
            _key: &crate::domain_types::MemoryKey,
            _value: Value,
            _ttl: Option<Duration>,
        ) -> StorageResult<()> {
            Ok(())
        }
        async fn delete(&self, _agent_id: AgentId, _key: &crate::domain_types::MemoryKey) -> StorageResult<()> {
            Ok(())
        }
        async fn exists(&self, _agent_id: AgentId, _key: &crate::domain_types::MemoryKey) -> StorageResult<bool> {
            Ok(false)
        }
        async fn keys(&self, _agent_id: AgentId) -> StorageResult<Vec<crate::domain_types::MemoryKey>> {
            Ok(Vec::new())
        }
        async fn delete_expired(&self, _now: chrono::DateTime<chrono::Utc>) -> StorageResult<u64> {
            Ok(0)
        }
        async fn clear_agent(&self, _agent_id: AgentId) -> StorageResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl crate::storage::ChatSessionStorage for NullStorage {
        async fn find_session(
            &self,
            _agent_id: AgentId,
            _user_id: &UserId,
            _room_id: &crate::domain_types::RoomId,
        ) -> StorageResult<Option<ChatSession>> {
            Ok(None)
        }
        async fn update_context(
            &self,
            _agent_id: AgentId,
            _user_id: &UserId,
            _room_id: &crate::domain_types::RoomId,
            _context: Value,
        ) -> StorageResult<()> {
            Ok(())
        }
        async fn add_message(
            &self,
            agent_id: AgentId,
            user_id: &UserId,
            room_id: &crate::domain_types::RoomId,
            _message: HistoryMessage,
        ) -> StorageResult<ChatSession> {
            Ok(ChatSession {
                agent_id,
                user_id: user_id.clone(),
                room_id: room_id.clone(),
                context: Value::Null,
                message_history: Vec::new(),
                message_count: 0,
                last_message_at: None,
            })
        }
        async fn find_stale_sessions(&self, _stale_after: chrono::DateTime<chrono::Utc>) -> StorageResult<Vec<ChatSession>> {
            Ok(Vec::new())
        }
        async fn delete_session(
            &self,
            _agent_id: AgentId,
            _user_id: &UserId,
            _room_id: &crate::domain_types::RoomId,
        ) -> StorageResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl crate::storage::KnowledgeBaseStorage for NullStorage {
        async fn get(&self, _key: &crate::domain_types::MemoryKey) -> StorageResult<Option<KnowledgeBaseEntry>> {
            Ok(None)
        }
        async fn set(&self, _entry: KnowledgeBaseEntry) -> StorageResult<()> {
            Ok(())
        }
        async fn delete(&self, _key: &crate::domain_types::MemoryKey) -> StorageResult<()> {
            Ok(())
        }
        async fn delete_expired(&self, _now: chrono::DateTime<chrono::Utc>) -> StorageResult<u64> {
            Ok(0)
        }
    }

    fn sample_record(id: AgentId) -> AgentRecord {
        AgentRecord {
            id,
            name: AgentName::try_new("test-agent").unwrap(),
            homeserver: HomeserverUrl::try_new("https://matrix.example.org").unwrap(),
            username: "@bot:example.org".to_string(),
            bot_class: BotClassId::try_new("standard").unwrap(),
            state: crate::agent::AgentState::Offline,
            access_token: None,
            encrypted_password: None,
            settings: Value::Object(serde_json::Map::new()),
            last_sync_token: None,
            last_active_at: None,
            messages_handled: MessagesHandled::default(),
        }
    }

    fn test_manager() -> Arc<AgentManager> {
        let storage: Arc<dyn AgentStorage> = Arc::new(NullStorage);
        let agent_store: Arc<dyn crate::storage::AgentStoreStorage> = Arc::new(NullStorage);
        let chat_sessions: Arc<dyn crate::storage::ChatSessionStorage> = Arc::new(NullStorage);
        let knowledge_base: Arc<dyn crate::storage::KnowledgeBaseStorage> = Arc::new(NullStorage);
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let agent_registry = Arc::new(AgentRegistry::new());
        let router = Arc::new(Router::with_default_queue(Arc::clone(&agent_registry)));
        let reaper = Arc::new(Reaper::new(
            agent_store,
            Arc::clone(&chat_sessions),
            knowledge_base,
            Duration::from_secs(3600),
            Duration::from_secs(86_400),
        ));
        let conversation_memory = Arc::new(ConversationMemory::new(chat_sessions, Arc::clone(&cache)));
        Arc::new(AgentManager::new(
            ManagerConfig::default(),
            ManagerDeps {
                agent_storage: storage,
                router,
                cache,
                bot_factory: Arc::new(super::super::factory::DefaultBotFactory::default()),
                conversation_memory,
                reaper,
            },
        ))
    }

    #[tokio::test]
    async fn starting_an_agent_with_no_credentials_is_rejected() {
        let manager = test_manager();
        let id = AgentId::generate();
        let err = manager.start_agent(sample_record(id)).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidTransition(_)));
        assert!(!manager.agent_registry().contains(id));
    }

    #[tokio::test]
    async fn stopping_an_unregistered_agent_is_not_running() {
        let manager = test_manager();
        let err = manager.stop_agent(AgentId::generate()).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotRunning(_)));
    }

    #[tokio::test]
    async fn resuming_an_unknown_agent_is_not_found() {
        let manager = test_manager();
        let err = manager.resume_agent(AgentId::generate()).await.unwrap_err();
        assert!(matches!(err, ManagerError::AgentNotFound(_)));
    }
}
