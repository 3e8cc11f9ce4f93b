//! Parsed command shape, flag values, visibility selectors, dispatch
//! context, and errors (component H).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::agent::AgentRegistry;
use crate::domain_types::{AgentId, AgentName, RoomId, UserId};

use super::registry::CommandRegistry;
use super::tokenizer;

/// The value of a parsed `--flag` or `-f` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    /// A bare `--flag` or bundled `-abc` short flag
    Bool(bool),
    /// A `--flag=value` token
    Text(String),
}

/// A parsed command invocation: lower-cased name, positional arguments, and
/// flags, in the order `crate::command::tokenizer` and this module's parser
/// produce them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Lower-cased command name (first token)
    pub name: String,
    /// Non-flag tokens, in order
    pub positional: Vec<String>,
    /// Parsed `--key=value` / `--key` / `-abc` flags
    pub flags: BTreeMap<String, FlagValue>,
}

impl CommandInvocation {
    /// Parses a raw message body (already stripped of its bot/command
    /// prefix) into an invocation. Returns `None` if the body is empty after
    /// tokenizing.
    pub fn parse(body: &str) -> Option<Self> {
        let tokens = tokenizer::tokenize(body);
        Self::from_tokens(tokens)
    }

    /// Builds an invocation from already-tokenized input.
    pub fn from_tokens(tokens: Vec<String>) -> Option<Self> {
        let mut iter = tokens.into_iter();
        let name = iter.next()?.to_lowercase();
        let mut positional = Vec::new();
        let mut flags = BTreeMap::new();

        for token in iter {
            if let Some(rest) = token.strip_prefix("--") {
                match rest.split_once('=') {
                    Some((key, value)) => {
                        flags.insert(key.to_string(), FlagValue::Text(value.to_string()));
                    }
                    None => {
                        flags.insert(rest.to_string(), FlagValue::Bool(true));
                    }
                }
            } else if let Some(rest) = token.strip_prefix('-') {
                if rest.is_empty() {
                    positional.push(token);
                } else {
                    for c in rest.chars() {
                        flags.insert(c.to_string(), FlagValue::Bool(true));
                    }
                }
            } else {
                positional.push(token);
            }
        }

        Some(Self { name, positional, flags })
    }

    /// Re-formats this invocation into a canonical command string. Flag
    /// order is unspecified (kept sorted by key here for determinism) but
    /// the set of positional args and flags round-trips through
    /// [`CommandInvocation::parse`].
    pub fn formatted_command(&self) -> String {
        let mut parts = vec![self.name.clone()];
        for p in &self.positional {
            if p.chars().any(char::is_whitespace) {
                parts.push(format!("\"{p}\""));
            } else {
                parts.push(p.clone());
            }
        }
        for (key, value) in &self.flags {
            match value {
                FlagValue::Bool(true) => parts.push(format!("--{key}")),
                FlagValue::Bool(false) => parts.push(format!("--{key}=false")),
                FlagValue::Text(v) => parts.push(format!("--{key}={v}")),
            }
        }
        parts.join(" ")
    }
}

/// Visibility selector controlling who may invoke a registered command.
#[derive(Clone)]
pub enum Visibility {
    /// Anyone in any room
    Any,
    /// Only in a one-to-one direct message
    DirectMessageOnly,
    /// Only room admins (power level ≥ 100)
    Admin,
    /// A custom predicate over the dispatch context
    Custom(Arc<dyn Fn(&CommandContext) -> bool + Send + Sync>),
}

impl fmt::Debug for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::DirectMessageOnly => write!(f, "DirectMessageOnly"),
            Self::Admin => write!(f, "Admin"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Visibility {
    /// Whether `ctx` satisfies this selector.
    pub fn allows(&self, ctx: &CommandContext) -> bool {
        match self {
            Self::Any => true,
            Self::DirectMessageOnly => ctx.is_direct_message,
            Self::Admin => ctx.is_admin,
            Self::Custom(predicate) => predicate(ctx),
        }
    }
}

/// Context a handler and visibility selector see for one dispatched command.
#[derive(Clone)]
pub struct CommandContext {
    /// The agent this command was dispatched to
    pub agent_id: AgentId,
    /// That agent's name, for reply formatting
    pub agent_name: AgentName,
    /// Room the triggering message was sent in
    pub room_id: RoomId,
    /// Sender of the triggering message
    pub sender: UserId,
    /// Whether `room_id` is a one-to-one conversation
    pub is_direct_message: bool,
    /// Whether `sender` is an admin in `room_id`
    pub is_admin: bool,
    /// The registry this command was looked up in, for `help`
    pub registry: Arc<CommandRegistry>,
    /// The process-local agent registry, for `status`
    pub agent_registry: Arc<AgentRegistry>,
    /// Rooms the dispatching client currently tracks, for `rooms`
    pub joined_rooms: Vec<RoomId>,
}

/// Errors surfaced by command parsing and dispatch.
#[derive(Debug, Error, Clone)]
pub enum CommandError {
    /// No command is registered under this name
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The visibility selector rejected this invocation
    #[error("not permitted: {0}")]
    NotPermitted(String),

    /// The handler itself returned an error
    #[error("command failed: {0}")]
    HandlerFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_and_flags() {
        let invocation = CommandInvocation::parse(r#"echo --loud --name=bob -ab "hi there""#).unwrap();
        assert_eq!(invocation.name, "echo");
        assert_eq!(invocation.positional, vec!["hi there"]);
        assert_eq!(invocation.flags.get("loud"), Some(&FlagValue::Bool(true)));
        assert_eq!(invocation.flags.get("name"), Some(&FlagValue::Text("bob".to_string())));
        assert_eq!(invocation.flags.get("a"), Some(&FlagValue::Bool(true)));
        assert_eq!(invocation.flags.get("b"), Some(&FlagValue::Bool(true)));
    }

    #[test]
    fn command_name_is_lowercased() {
        let invocation = CommandInvocation::parse("ECHO hi").unwrap();
        assert_eq!(invocation.name, "echo");
    }

    #[test]
    fn round_trips_through_formatted_command() {
        let original = CommandInvocation::parse(r#"echo "hi there" --loud --name=bob"#).unwrap();
        let formatted = original.formatted_command();
        let reparsed = CommandInvocation::parse(&formatted).unwrap();
        assert_eq!(original.name, reparsed.name);
        assert_eq!(original.positional, reparsed.positional);
        assert_eq!(original.flags, reparsed.flags);
    }

    #[test]
    fn empty_body_parses_to_none() {
        assert!(CommandInvocation::parse("   ").is_none());
    }
}
