//! Shared domain types for the Conclave multi-agent runtime
//!
//! These strongly-typed values prevent primitive obsession across the
//! storage, routing, and client layers: a `RoomId` can never be confused
//! with a `UserId` even though both are newtypes over `String`.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an agent record
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct AgentId(Uuid);

impl AgentId {
    /// Creates a new random agent ID
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Parses an agent ID from its string representation
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self::new(Uuid::parse_str(s)?))
    }
}

/// Unique, human-assigned name of an agent
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct AgentName(String);

/// Identifier of the handler module a bot instantiates (the `bot_class`)
#[nutype(
    validate(len_char_min = 1, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct BotClassId(String);

/// Base URL of a Matrix homeserver, e.g. `https://matrix.example.org`
#[nutype(
    validate(predicate = |url| url.starts_with("http://") || url.starts_with("https://")),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct HomeserverUrl(String);

/// A Matrix room identifier, e.g. `!abcdef:example.org`
#[nutype(
    validate(predicate = |id| id.starts_with('!') && id.contains(':')),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct RoomId(String);

/// A Matrix user identifier, e.g. `@alice:example.org`
#[nutype(
    validate(predicate = |id| id.starts_with('@') && id.contains(':')),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct UserId(String);

/// A Matrix event identifier, e.g. `$abcdef`
#[nutype(
    validate(len_char_min = 1),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct EventId(String);

/// A Matrix event type string, e.g. `m.room.message`
#[nutype(
    validate(len_char_min = 1),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct EventType(String);

/// Key in the agent memory / knowledge base key-value stores
#[nutype(
    validate(len_char_min = 1, len_char_max = 512),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct MemoryKey(String);

/// Non-negative, monotonically non-decreasing count of messages handled by an agent
#[nutype(
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0
)]
pub struct MessagesHandled(u64);

impl MessagesHandled {
    /// Returns the next count after one more handled message
    #[must_use]
    pub fn increment(self) -> Self {
        Self::new(self.into_inner() + 1)
    }

    /// Returns the raw count
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Number of connections held open in the `SQLite` connection pool
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10
)]
pub struct ConnectionPoolSize(usize);

impl ConnectionPoolSize {
    /// Gets the value as usize
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Maximum number of entries retained in a chat session's message history
pub const MAX_HISTORY_SIZE: usize = 20;

/// Size of a client's per-room rolling event buffer, absent explicit configuration
pub const DEFAULT_EVENT_HISTORY_LIMIT: usize = 10;
