//! Matrix event and `/sync` response schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain_types::{EventId, EventType, RoomId, UserId};

/// A single Matrix event as it appears in a `/sync` response.
///
/// `state_key` is present only for state events; its absence distinguishes
/// timeline message events from state events sharing the same `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub event_id: Option<EventId>,
    pub sender: UserId,
    pub origin_server_ts: Option<i64>,
    pub content: Value,
    pub state_key: Option<String>,
    pub room_id: Option<RoomId>,
}

impl MatrixEvent {
    /// Whether this event carries a `state_key` and therefore mutates room state.
    pub fn is_state_event(&self) -> bool {
        self.state_key.is_some()
    }
}

/// An invited, joined, or left room's event slice within a `/sync` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomEvents {
    #[serde(default)]
    pub timeline: Vec<MatrixEvent>,
    #[serde(default)]
    pub state: Vec<MatrixEvent>,
    #[serde(default)]
    pub ephemeral: Vec<MatrixEvent>,
    #[serde(default)]
    pub account_data: Vec<MatrixEvent>,
}

/// The `rooms` section of a `/sync` response, keyed by room id per membership kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncRooms {
    #[serde(default)]
    pub join: std::collections::HashMap<RoomId, RoomEvents>,
    #[serde(default)]
    pub invite: std::collections::HashMap<RoomId, RoomEvents>,
    #[serde(default)]
    pub leave: std::collections::HashMap<RoomId, RoomEvents>,
}

/// A decoded `/sync` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: SyncRooms,
    #[serde(default)]
    pub presence: PresenceSection,
}

/// The `presence` section of a `/sync` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceSection {
    #[serde(default)]
    pub events: Vec<MatrixEvent>,
}
