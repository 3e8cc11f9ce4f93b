//! Maps a persisted `bot_class` string to a command-registry constructor
//! (component K), replacing the dynamic class lookup the redesign notes
//! call out: a registry of constructor functions, validated at agent-record
//! save time instead of resolved at runtime from a free-form string.

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::{register_builtins, CommandRegistry};
use crate::domain_types::BotClassId;

use super::error::ManagerError;

/// A constructor producing the command registry for one bot class.
pub type BotConstructor = fn() -> CommandRegistry;

/// Resolves a `bot_class` identifier to the command registry an agent of
/// that class should dispatch through.
pub trait BotFactory: Send + Sync {
    /// Builds the command registry for `bot_class`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::UnknownBotClass`] if no constructor is
    /// registered under this name.
    fn build(&self, bot_class: &BotClassId) -> Result<Arc<CommandRegistry>, ManagerError>;

    /// Whether `bot_class` has a registered constructor. Agent records
    /// should be validated against this before being saved.
    fn is_known(&self, bot_class: &BotClassId) -> bool;
}

/// The default [`BotFactory`]: a static table of bot-class name to
/// constructor function, seeded with the `standard` class.
pub struct DefaultBotFactory {
    constructors: HashMap<String, BotConstructor>,
}

impl DefaultBotFactory {
    /// Builds an empty factory with no registered classes.
    pub fn new() -> Self {
        Self { constructors: HashMap::new() }
    }

    /// Registers `constructor` under `bot_class`, replacing any prior entry.
    #[must_use]
    pub fn with_class(mut self, bot_class: impl Into<String>, constructor: BotConstructor) -> Self {
        self.constructors.insert(bot_class.into(), constructor);
        self
    }
}

impl Default for DefaultBotFactory {
    fn default() -> Self {
        Self::new().with_class("standard", standard_bot_registry)
    }
}

impl BotFactory for DefaultBotFactory {
    fn build(&self, bot_class: &BotClassId) -> Result<Arc<CommandRegistry>, ManagerError> {
        let ctor = self
            .constructors
            .get(&bot_class.to_string())
            .ok_or_else(|| ManagerError::UnknownBotClass(bot_class.to_string()))?;
        Ok(Arc::new(ctor()))
    }

    fn is_known(&self, bot_class: &BotClassId) -> bool {
        self.constructors.contains_key(&bot_class.to_string())
    }
}

/// The `standard` bot class: every built-in command and nothing else.
fn standard_bot_registry() -> CommandRegistry {
    let registry = CommandRegistry::new();
    register_builtins(&registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_factory_knows_the_standard_class() {
        let factory = DefaultBotFactory::default();
        let class = BotClassId::try_new("standard").unwrap();
        assert!(factory.is_known(&class));
        assert!(factory.build(&class).is_ok());
    }

    #[test]
    fn unknown_class_is_rejected() {
        let factory = DefaultBotFactory::default();
        let class = BotClassId::try_new("nonexistent").unwrap();
        assert!(!factory.is_known(&class));
        assert!(matches!(factory.build(&class), Err(ManagerError::UnknownBotClass(_))));
    }
}
