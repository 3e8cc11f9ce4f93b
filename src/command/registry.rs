//! Registered commands and their lookup table (component H).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::types::{CommandContext, CommandError, Visibility};

/// A command handler, invoked with the parsed invocation's positional
/// arguments and flags plus the dispatch context.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Runs the command, returning the text reply to send back to the room.
    async fn handle(
        &self,
        invocation: &super::types::CommandInvocation,
        ctx: &CommandContext,
    ) -> Result<String, CommandError>;
}

/// A registered command: its handler, visibility, and help text.
pub struct CommandSpec {
    /// Canonical, lower-cased name this command is registered under
    pub name: String,
    /// One-line description shown by the `help` command
    pub description: String,
    /// Who may invoke this command
    pub visibility: Visibility,
    /// The handler invoked on a match
    pub handler: Arc<dyn CommandHandler>,
}

impl CommandSpec {
    /// Builds a spec with `Visibility::Any`.
    pub fn new(name: impl Into<String>, description: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        Self { name: name.into(), description: description.into(), visibility: Visibility::Any, handler }
    }

    /// Sets this spec's visibility selector.
    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Table of commands an agent understands, keyed by lower-cased name.
#[derive(Default)]
pub struct CommandRegistry {
    specs: RwLock<HashMap<String, Arc<CommandSpec>>>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `spec`, replacing any prior registration under the same name.
    pub fn register(&self, spec: CommandSpec) {
        self.specs.write().expect("lock poisoned").insert(spec.name.clone(), Arc::new(spec));
    }

    /// Looks up the spec registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<CommandSpec>> {
        self.specs.read().expect("lock poisoned").get(name).cloned()
    }

    /// Specs visible to `ctx`, sorted by name, for `help` output.
    pub fn list_visible(&self, ctx: &CommandContext) -> Vec<Arc<CommandSpec>> {
        let mut specs: Vec<Arc<CommandSpec>> = self
            .specs
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|spec| spec.visibility.allows(ctx))
            .cloned()
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRegistry;
    use crate::domain_types::{AgentId, AgentName, RoomId, UserId};

    struct NoOpHandler;

    #[async_trait]
    impl CommandHandler for NoOpHandler {
        async fn handle(
            &self,
            _invocation: &super::super::types::CommandInvocation,
            _ctx: &CommandContext,
        ) -> Result<String, CommandError> {
            Ok("ok".to_string())
        }
    }

    fn ctx(registry: Arc<CommandRegistry>, is_admin: bool) -> CommandContext {
        CommandContext {
            agent_id: AgentId::generate(),
            agent_name: AgentName::try_new("bot").unwrap(),
            room_id: RoomId::try_new("!r:example.org").unwrap(),
            sender: UserId::try_new("@alice:example.org").unwrap(),
            is_direct_message: false,
            is_admin,
            registry,
            agent_registry: Arc::new(AgentRegistry::new()),
            joined_rooms: Vec::new(),
        }
    }

    #[test]
    fn list_visible_hides_admin_commands_from_non_admins() {
        let registry = Arc::new(CommandRegistry::new());
        registry.register(CommandSpec::new("ping", "pong", Arc::new(NoOpHandler)));
        registry.register(
            CommandSpec::new("rooms", "list rooms", Arc::new(NoOpHandler)).with_visibility(Visibility::Admin),
        );

        let non_admin = ctx(Arc::clone(&registry), false);
        let names: Vec<String> = registry.list_visible(&non_admin).iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["ping"]);

        let admin = ctx(registry, true);
        let names: Vec<String> = admin.registry.list_visible(&admin).iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["ping", "rooms"]);
    }

    #[test]
    fn get_returns_none_for_unregistered_name() {
        let registry = CommandRegistry::new();
        assert!(registry.get("nope").is_none());
    }
}
