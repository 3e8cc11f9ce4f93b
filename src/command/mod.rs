//! Command parsing and dispatch: turning a chat message into a handler
//! invocation and a reply (component H).

mod builtins;
mod dispatcher;
mod registry;
mod tokenizer;
mod types;

pub use builtins::{register_builtins, EchoCommand, HelpCommand, PingCommand, RoomsCommand, StatusCommand, TimeCommand, VersionCommand};
pub use dispatcher::{Dispatcher, DEFAULT_PREFIXES};
pub use registry::{CommandHandler, CommandRegistry, CommandSpec};
pub use tokenizer::{strip_prefix, tokenize};
pub use types::{CommandContext, CommandError, CommandInvocation, FlagValue, Visibility};
