//! Persisted agent record and its lifecycle state machine (component I).
//!
//! Grounded on the shape of `domain::agent_lifecycle::AgentLifecycleState`:
//! an enum of named states, a `valid_transitions`/`can_transition_to` pair,
//! and a `Display` impl used for logging and the `/status` probe endpoint.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain_types::{AgentId, AgentName, BotClassId, HomeserverUrl, MessagesHandled};

/// Lifecycle state of a running or stopped agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Not connected; no task running
    Offline,
    /// Acquiring a client and authenticating
    Connecting,
    /// Connected, sync loop idle between handlers
    OnlineIdle,
    /// Connected, currently inside a command handler
    OnlineBusy,
    /// Deliberately suspended by an operator
    Paused,
    /// Crashed or otherwise failed
    Error,
}

/// An event driving the agent lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentLifecycleEvent {
    /// Begin acquiring a client
    Connect,
    /// Client acquired, authenticated, sync loop about to start
    ConnectionEstablished,
    /// A command handler has started running
    StartProcessing,
    /// A command handler has finished running
    FinishProcessing,
    /// Sync loop has stopped, agent is no longer connected
    Disconnect,
    /// An unrecoverable error occurred
    EncounterError,
    /// Operator requested suspension
    Pause,
    /// Operator requested resumption
    Resume,
}

impl AgentState {
    /// Returns every state this state may transition to on some event.
    pub fn valid_transitions(&self) -> Vec<Self> {
        match self {
            Self::Offline => vec![Self::Connecting, Self::Error],
            Self::Connecting => vec![Self::OnlineIdle, Self::Offline, Self::Error],
            Self::OnlineIdle => vec![Self::OnlineBusy, Self::Offline, Self::Paused, Self::Error],
            Self::OnlineBusy => vec![Self::OnlineIdle, Self::Offline, Self::Paused, Self::Error],
            Self::Paused => vec![Self::Connecting, Self::Error],
            // `EncounterError` applies from any state, including `Error`
            // itself, per `apply` below; this self-loop keeps
            // `can_transition_to` agreeing with what `apply` actually does.
            Self::Error => vec![Self::Connecting, Self::Error],
        }
    }

    /// Whether transitioning to `next` is permitted from this state.
    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Applies `event`, returning the resulting state.
    ///
    /// # Errors
    ///
    /// Returns `None` if `event` is not valid from the current state.
    pub fn apply(&self, event: AgentLifecycleEvent) -> Option<Self> {
        let next = match (self, event) {
            (Self::Offline | Self::Error | Self::Paused, AgentLifecycleEvent::Connect) => {
                Self::Connecting
            }
            (Self::Connecting, AgentLifecycleEvent::ConnectionEstablished) => Self::OnlineIdle,
            (Self::OnlineIdle, AgentLifecycleEvent::StartProcessing) => Self::OnlineBusy,
            (Self::OnlineBusy, AgentLifecycleEvent::FinishProcessing) => Self::OnlineIdle,
            (Self::Connecting | Self::OnlineIdle | Self::OnlineBusy, AgentLifecycleEvent::Disconnect) => {
                Self::Offline
            }
            (_, AgentLifecycleEvent::EncounterError) => Self::Error,
            (Self::OnlineIdle | Self::OnlineBusy, AgentLifecycleEvent::Pause) => Self::Paused,
            (Self::Paused, AgentLifecycleEvent::Resume) => Self::Connecting,
            _ => return None,
        };
        debug_assert!(self.can_transition_to(next));
        Some(next)
    }

    /// Whether the agent is considered live for start-all purposes.
    pub fn is_live(&self) -> bool {
        *self != Self::Offline
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Offline => "offline",
            Self::Connecting => "connecting",
            Self::OnlineIdle => "online_idle",
            Self::OnlineBusy => "online_busy",
            Self::Paused => "paused",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A persisted agent, as stored in and restored from the `agents` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique identifier
    pub id: AgentId,
    /// Unique, human-assigned name
    pub name: AgentName,
    /// Homeserver this agent connects to
    pub homeserver: HomeserverUrl,
    /// Matrix username (localpart or full mxid, handler-specific)
    pub username: String,
    /// Handler module identifier
    pub bot_class: BotClassId,
    /// Current lifecycle state
    pub state: AgentState,
    /// Cached access token, if login has already happened once
    pub access_token: Option<String>,
    /// Encrypted password, used to log in when no access token is cached
    pub encrypted_password: Option<String>,
    /// Free-form per-agent configuration
    pub settings: Value,
    /// Sync token to resume from on restart
    pub last_sync_token: Option<String>,
    /// Timestamp of the agent's last transition into `online_idle`
    pub last_active_at: Option<DateTime<Utc>>,
    /// Monotonically non-decreasing count of messages handled
    pub messages_handled: MessagesHandled,
}

impl AgentRecord {
    /// Applies `event` to this record's state, updating `last_active_at`
    /// when the transition lands on `online_idle`.
    ///
    /// # Errors
    ///
    /// Returns an error describing the rejected transition when `event` is
    /// not valid from the current state.
    pub fn transition(&mut self, event: AgentLifecycleEvent) -> Result<AgentState, String> {
        match self.state.apply(event) {
            Some(next) => {
                if next == AgentState::OnlineIdle {
                    self.last_active_at = Some(Utc::now());
                }
                self.state = next;
                Ok(next)
            }
            None => Err(format!(
                "cannot apply {event:?} to agent {} in state {}",
                self.name, self.state
            )),
        }
    }

    /// Records one more handled message.
    pub fn record_message_handled(&mut self) {
        self.messages_handled = self.messages_handled.increment();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transition_table_matches_spec() {
        assert!(AgentState::Offline.can_transition_to(AgentState::Connecting));
        assert!(AgentState::Connecting.can_transition_to(AgentState::OnlineIdle));
        assert!(AgentState::OnlineIdle.can_transition_to(AgentState::OnlineBusy));
        assert!(AgentState::OnlineBusy.can_transition_to(AgentState::OnlineIdle));
        assert!(AgentState::Paused.can_transition_to(AgentState::Connecting));
        assert!(!AgentState::Offline.can_transition_to(AgentState::OnlineIdle));
        assert!(!AgentState::Paused.can_transition_to(AgentState::OnlineIdle));
    }

    #[test]
    fn any_state_can_encounter_error() {
        for state in [
            AgentState::Offline,
            AgentState::Connecting,
            AgentState::OnlineIdle,
            AgentState::OnlineBusy,
            AgentState::Paused,
            AgentState::Error,
        ] {
            assert_eq!(
                state.apply(AgentLifecycleEvent::EncounterError),
                Some(AgentState::Error)
            );
        }
    }

    #[test]
    fn transition_to_online_idle_stamps_last_active_at() {
        let mut record = sample_record();
        record.state = AgentState::Connecting;
        assert!(record.last_active_at.is_none());
        record
            .transition(AgentLifecycleEvent::ConnectionEstablished)
            .expect("connecting -> online_idle is valid");
        assert!(record.last_active_at.is_some());
    }

    #[test]
    fn invalid_transition_is_rejected_with_message() {
        let mut record = sample_record();
        let err = record
            .transition(AgentLifecycleEvent::StartProcessing)
            .unwrap_err();
        assert!(err.contains("cannot apply"));
    }

    #[test]
    fn record_message_handled_is_monotonic() {
        let mut record = sample_record();
        assert_eq!(record.messages_handled.as_u64(), 0);
        record.record_message_handled();
        record.record_message_handled();
        assert_eq!(record.messages_handled.as_u64(), 2);
    }

    fn sample_record() -> AgentRecord {
        AgentRecord {
            id: AgentId::generate(),
            name: AgentName::try_new("test-agent").unwrap(),
            homeserver: HomeserverUrl::try_new("https://matrix.example.org").unwrap(),
            username: "@bot:example.org".to_string(),
            bot_class: BotClassId::try_new("echo").unwrap(),
            state: AgentState::Offline,
            access_token: None,
            encrypted_password: None,
            settings: Value::Object(serde_json::Map::new()),
            last_sync_token: None,
            last_active_at: None,
            messages_handled: MessagesHandled::default(),
        }
    }
}
