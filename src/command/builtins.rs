//! Built-in commands every agent registers by default (component H).

use async_trait::async_trait;

use super::registry::{CommandHandler, CommandRegistry, CommandSpec};
use super::types::{CommandContext, CommandError, CommandInvocation, Visibility};

/// Lists the commands visible to the caller in the current context.
pub struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    async fn handle(&self, _invocation: &CommandInvocation, ctx: &CommandContext) -> Result<String, CommandError> {
        let specs = ctx.registry.list_visible(ctx);
        if specs.is_empty() {
            return Ok("No commands available.".to_string());
        }
        let lines: Vec<String> = specs.iter().map(|spec| format!("{}: {}", spec.name, spec.description)).collect();
        Ok(lines.join("\n"))
    }
}

/// Liveness check; always replies `pong`.
pub struct PingCommand;

#[async_trait]
impl CommandHandler for PingCommand {
    async fn handle(&self, _invocation: &CommandInvocation, _ctx: &CommandContext) -> Result<String, CommandError> {
        Ok("pong".to_string())
    }
}

/// Reports the running crate version.
pub struct VersionCommand;

#[async_trait]
impl CommandHandler for VersionCommand {
    async fn handle(&self, _invocation: &CommandInvocation, _ctx: &CommandContext) -> Result<String, CommandError> {
        Ok(format!("conclave {}", env!("CARGO_PKG_VERSION")))
    }
}

/// Reports this agent's own name, state, and message count.
pub struct StatusCommand;

#[async_trait]
impl CommandHandler for StatusCommand {
    async fn handle(&self, _invocation: &CommandInvocation, ctx: &CommandContext) -> Result<String, CommandError> {
        let records = ctx.agent_registry.snapshot_records();
        match records.into_iter().find(|r| r.id == ctx.agent_id) {
            Some(record) => Ok(format!(
                "{} is {} ({} messages handled)",
                record.name, record.state, record.messages_handled
            )),
            None => Ok(format!("{} has no registry entry", ctx.agent_name)),
        }
    }
}

/// Reports the current UTC time.
pub struct TimeCommand;

#[async_trait]
impl CommandHandler for TimeCommand {
    async fn handle(&self, _invocation: &CommandInvocation, _ctx: &CommandContext) -> Result<String, CommandError> {
        Ok(chrono::Utc::now().to_rfc3339())
    }
}

/// Echoes back its positional arguments, joined by a space.
pub struct EchoCommand;

#[async_trait]
impl CommandHandler for EchoCommand {
    async fn handle(&self, invocation: &CommandInvocation, _ctx: &CommandContext) -> Result<String, CommandError> {
        Ok(invocation.positional.join(" "))
    }
}

/// Lists rooms the dispatching client currently tracks. Admin-only.
pub struct RoomsCommand;

#[async_trait]
impl CommandHandler for RoomsCommand {
    async fn handle(&self, _invocation: &CommandInvocation, ctx: &CommandContext) -> Result<String, CommandError> {
        if ctx.joined_rooms.is_empty() {
            return Ok("Not currently in any rooms.".to_string());
        }
        let lines: Vec<String> = ctx.joined_rooms.iter().map(ToString::to_string).collect();
        Ok(lines.join("\n"))
    }
}

/// Registers the standard built-in commands into `registry`.
pub fn register_builtins(registry: &CommandRegistry) {
    registry.register(CommandSpec::new("help", "List available commands", std::sync::Arc::new(HelpCommand)));
    registry.register(CommandSpec::new("ping", "Check that the agent is responding", std::sync::Arc::new(PingCommand)));
    registry.register(CommandSpec::new("version", "Show the running version", std::sync::Arc::new(VersionCommand)));
    registry.register(CommandSpec::new("status", "Show this agent's lifecycle state", std::sync::Arc::new(StatusCommand)));
    registry.register(CommandSpec::new("time", "Show the current UTC time", std::sync::Arc::new(TimeCommand)));
    registry.register(CommandSpec::new("echo", "Echo back the given text", std::sync::Arc::new(EchoCommand)));
    registry.register(
        CommandSpec::new("rooms", "List rooms this agent has joined", std::sync::Arc::new(RoomsCommand))
            .with_visibility(Visibility::Admin),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRegistry;
    use crate::domain_types::{AgentId, AgentName, RoomId, UserId};
    use std::sync::Arc;

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

    #[tokio::test]
    async fn ping_replies_pong() {
        let registry = Arc::new(CommandRegistry::new());
        let invocation = CommandInvocation::parse("ping").unwrap();
        let reply = PingCommand.handle(&invocation, &ctx(registry, false)).await.unwrap();
        assert_eq!(reply, "pong");
    }

    #[tokio::test]
    async fn echo_joins_positional_args() {
        let registry = Arc::new(CommandRegistry::new());
        let invocation = CommandInvocation::parse("echo hello there").unwrap();
        let reply = EchoCommand.handle(&invocation, &ctx(registry, false)).await.unwrap();
        assert_eq!(reply, "hello there");
    }

    #[tokio::test]
    async fn help_lists_registered_commands() {
        let registry = Arc::new(CommandRegistry::new());
        register_builtins(&registry);
        let invocation = CommandInvocation::parse("help").unwrap();
        let reply = HelpCommand.handle(&invocation, &ctx(Arc::clone(&registry), false)).await.unwrap();
        assert!(reply.contains("ping: Check that the agent is responding"));
        assert!(!reply.contains("rooms:"));
    }
}
