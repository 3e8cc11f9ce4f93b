//! Prefix stripping, parsing, permission checks, and handler invocation,
//! wired together into one dispatch entry point (component H).

use std::sync::Arc;

use tracing::warn;

use crate::agent::{AgentLifecycleEvent, AgentRegistry};
use crate::domain_types::AgentId;
use crate::storage::AgentStorage;

use super::registry::CommandRegistry;
use super::tokenizer;
use super::types::{CommandContext, CommandError, CommandInvocation};

/// Default set of characters recognized as a command prefix.
pub const DEFAULT_PREFIXES: &[char] = &['!', '/'];

/// Strips a prefix, tokenizes, looks up, permission-checks, and invokes a
/// command handler, coordinating the surrounding `online_idle`/`online_busy`
/// bookkeeping around the call.
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    prefixes: Vec<char>,
    ignore_own: bool,
    reply_on_error: bool,
}

impl Dispatcher {
    /// Builds a dispatcher over `registry` using the default prefixes, with
    /// `ignore_own` and `reply_on_error` both enabled.
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry, prefixes: DEFAULT_PREFIXES.to_vec(), ignore_own: true, reply_on_error: true }
    }

    /// Overrides the recognized command prefixes.
    #[must_use]
    pub fn with_prefixes(mut self, prefixes: Vec<char>) -> Self {
        self.prefixes = prefixes;
        self
    }

    /// Sets whether messages from the agent's own mxid are ignored.
    #[must_use]
    pub fn with_ignore_own(mut self, ignore_own: bool) -> Self {
        self.ignore_own = ignore_own;
        self
    }

    /// Sets whether a failed dispatch produces a reply describing the error.
    #[must_use]
    pub fn with_reply_on_error(mut self, reply_on_error: bool) -> Self {
        self.reply_on_error = reply_on_error;
        self
    }

    /// Whether messages from the agent's own mxid should be skipped.
    pub fn ignore_own(&self) -> bool {
        self.ignore_own
    }

    /// Whether a dispatch failure should produce an in-room error reply.
    pub fn reply_on_error(&self) -> bool {
        self.reply_on_error
    }

    /// Parses `body` (a raw message body, not yet stripped) into an
    /// invocation, or `None` if it doesn't start with a recognized prefix or
    /// tokenizes to nothing.
    pub fn parse(&self, body: &str) -> Option<CommandInvocation> {
        let stripped = tokenizer::strip_prefix(body, &self.prefixes)?;
        CommandInvocation::parse(stripped)
    }

    /// Looks up, permission-checks, and runs the command named by
    /// `invocation`, coordinating the agent's `online_idle`/`online_busy`
    /// transition around the handler call.
    ///
    /// Does not itself bump `messages_handled`: the conversation memory's
    /// `add_message` is the single place that counter is incremented (see
    /// `StandardBot::handle_message`), so this only runs the handler and the
    /// lifecycle bookkeeping around it.
    ///
    /// # Errors
    ///
    /// Returns the lookup, permission, or handler failure. When
    /// `reply_on_error` is set the caller should still relay the error's
    /// `Display` text back to the room; it is not swallowed here.
    pub async fn dispatch(
        &self,
        invocation: &CommandInvocation,
        ctx: &CommandContext,
        agent_registry: &AgentRegistry,
        agent_storage: &dyn AgentStorage,
    ) -> Result<String, CommandError> {
        let spec = self
            .registry
            .get(&invocation.name)
            .ok_or_else(|| CommandError::UnknownCommand(invocation.name.clone()))?;

        if !spec.visibility.allows(ctx) {
            return Err(CommandError::NotPermitted(invocation.name.clone()));
        }

        self.begin_processing(ctx.agent_id, agent_registry, agent_storage).await;
        let result = spec.handler.handle(invocation, ctx).await;
        self.finish_processing(ctx.agent_id, agent_registry, agent_storage).await;
        result
    }

    async fn begin_processing(&self, agent_id: AgentId, agent_registry: &AgentRegistry, agent_storage: &dyn AgentStorage) {
        self.apply_lifecycle_event(agent_id, AgentLifecycleEvent::StartProcessing, agent_registry, agent_storage)
            .await;
    }

    async fn finish_processing(&self, agent_id: AgentId, agent_registry: &AgentRegistry, agent_storage: &dyn AgentStorage) {
        self.apply_lifecycle_event(agent_id, AgentLifecycleEvent::FinishProcessing, agent_registry, agent_storage)
            .await;
    }

    async fn apply_lifecycle_event(
        &self,
        agent_id: AgentId,
        event: AgentLifecycleEvent,
        agent_registry: &AgentRegistry,
        agent_storage: &dyn AgentStorage,
    ) {
        let next = agent_registry.with_record_mut(agent_id, |record| record.transition(event).ok()).flatten();
        if let Some(state) = next {
            if let Err(e) = agent_storage.update_state(agent_id, state).await {
                warn!(error = %e, "failed to persist agent state transition");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentRecord, AgentState, RegistryEntry};
    use crate::command::builtins::register_builtins;
    use crate::domain_types::{AgentName, BotClassId, HomeserverUrl, MessagesHandled, RoomId, UserId};
    use crate::storage::StorageResult;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    struct NullAgentStorage;

    #[async_trait]
    impl AgentStorage for NullAgentStorage {
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
        async fn update_state(&self, _id: AgentId, _state: AgentState) -> StorageResult<()> {
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

    fn sample_record(id: AgentId) -> AgentRecord {
        AgentRecord {
            id,
            name: AgentName::try_new("bot").unwrap(),
            homeserver: HomeserverUrl::try_new("https://matrix.example.org").unwrap(),
            username: "@bot:example.org".to_string(),
            bot_class: BotClassId::try_new("echo").unwrap(),
            state: AgentState::OnlineIdle,
            access_token: None,
            encrypted_password: None,
            settings: Value::Object(serde_json::Map::new()),
            last_sync_token: None,
            last_active_at: None,
            messages_handled: MessagesHandled::default(),
        }
    }

    fn registered_agent(agent_registry: &AgentRegistry, id: AgentId) {
        agent_registry.register(
            id,
            RegistryEntry {
                record: sample_record(id),
                task: tokio::spawn(async { std::future::pending::<()>().await }),
                stop_token: CancellationToken::new(),
                started_at: Instant::now(),
            },
        );
    }

    #[tokio::test]
    async fn dispatch_unknown_command_is_rejected() {
        let registry = Arc::new(CommandRegistry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let agent_registry = AgentRegistry::new();
        let storage = NullAgentStorage;
        let agent_id = AgentId::generate();
        registered_agent(&agent_registry, agent_id);

        let invocation = dispatcher.parse("!nope").unwrap();
        let ctx = CommandContext {
            agent_id,
            agent_name: AgentName::try_new("bot").unwrap(),
            room_id: RoomId::try_new("!r:example.org").unwrap(),
            sender: UserId::try_new("@alice:example.org").unwrap(),
            is_direct_message: false,
            is_admin: false,
            registry,
            agent_registry: Arc::new(AgentRegistry::new()),
            joined_rooms: Vec::new(),
        };

        let err = dispatcher.dispatch(&invocation, &ctx, &agent_registry, &storage).await.unwrap_err();
        assert!(matches!(err, CommandError::UnknownCommand(_)));
    }

    #[tokio::test]
    async fn dispatch_runs_handler_and_returns_its_reply() {
        let registry = Arc::new(CommandRegistry::new());
        register_builtins(&registry);
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let agent_registry = AgentRegistry::new();
        let storage = NullAgentStorage;
        let agent_id = AgentId::generate();
        registered_agent(&agent_registry, agent_id);

        let invocation = dispatcher.parse("!ping").unwrap();
        let ctx = CommandContext {
            agent_id,
            agent_name: AgentName::try_new("bot").unwrap(),
            room_id: RoomId::try_new("!r:example.org").unwrap(),
            sender: UserId::try_new("@alice:example.org").unwrap(),
            is_direct_message: false,
            is_admin: false,
            registry,
            agent_registry: Arc::new(AgentRegistry::new()),
            joined_rooms: Vec::new(),
        };

        let reply = dispatcher.dispatch(&invocation, &ctx, &agent_registry, &storage).await.unwrap();
        assert_eq!(reply, "pong");
    }

    #[tokio::test]
    async fn dispatch_rejects_admin_command_for_non_admin() {
        let registry = Arc::new(CommandRegistry::new());
        register_builtins(&registry);
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let agent_registry = AgentRegistry::new();
        let storage = NullAgentStorage;
        let agent_id = AgentId::generate();
        registered_agent(&agent_registry, agent_id);

        let invocation = dispatcher.parse("!rooms").unwrap();
        let ctx = CommandContext {
            agent_id,
            agent_name: AgentName::try_new("bot").unwrap(),
            room_id: RoomId::try_new("!r:example.org").unwrap(),
            sender: UserId::try_new("@alice:example.org").unwrap(),
            is_direct_message: false,
            is_admin: false,
            registry,
            agent_registry: Arc::new(AgentRegistry::new()),
            joined_rooms: Vec::new(),
        };

        let err = dispatcher.dispatch(&invocation, &ctx, &agent_registry, &storage).await.unwrap_err();
        assert!(matches!(err, CommandError::NotPermitted(_)));
    }

    #[test]
    fn parse_ignores_bodies_without_a_prefix() {
        let registry = Arc::new(CommandRegistry::new());
        let dispatcher = Dispatcher::new(registry);
        assert!(dispatcher.parse("just chatting, not a command").is_none());
    }
}
