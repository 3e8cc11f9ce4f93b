//! The default [`SyncEventHandler`] wiring command dispatch, conversation
//! memory, and in-room replies together for one agent (component K).
//!
//! Built after its [`Client`](crate::client::Client) to break the
//! construction-order cycle between the two: the client is built first
//! (without a handler), implements [`RoomLookup`] itself, and is handed to
//! this bot as `Arc<dyn RoomLookup>`; only then is `client.run(bot, ...)`
//! called.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::agent::AgentRegistry;
use crate::client::{RoomLookup, SyncEventHandler};
use crate::command::{CommandContext, CommandRegistry, Dispatcher};
use crate::domain_types::{AgentId, AgentName, EventType, RoomId, UserId};
use crate::matrix::{MatrixApi, MatrixEvent};
use crate::memory::ConversationMemory;
use crate::storage::{AgentStorage, HistoryMessage};

/// Wires the command dispatcher to a running agent's sync events: parses
/// message events into commands, runs them, records conversation history,
/// and relays the reply back into the room.
pub struct StandardBot {
    agent_id: AgentId,
    agent_name: AgentName,
    own_user_id: UserId,
    matrix: Arc<MatrixApi>,
    rooms: Arc<dyn RoomLookup>,
    dispatcher: Dispatcher,
    registry: Arc<CommandRegistry>,
    agent_registry: Arc<AgentRegistry>,
    agent_storage: Arc<dyn AgentStorage>,
    conversation_memory: Arc<ConversationMemory>,
}

impl StandardBot {
    /// Builds a bot for `agent_id`, dispatching through `registry` via
    /// `dispatcher`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: AgentId,
        agent_name: AgentName,
        own_user_id: UserId,
        matrix: Arc<MatrixApi>,
        rooms: Arc<dyn RoomLookup>,
        dispatcher: Dispatcher,
        registry: Arc<CommandRegistry>,
        agent_registry: Arc<AgentRegistry>,
        agent_storage: Arc<dyn AgentStorage>,
        conversation_memory: Arc<ConversationMemory>,
    ) -> Self {
        Self {
            agent_id,
            agent_name,
            own_user_id,
            matrix,
            rooms,
            dispatcher,
            registry,
            agent_registry,
            agent_storage,
            conversation_memory,
        }
    }

    fn message_body(event: &MatrixEvent) -> Option<&str> {
        if event.content.get("msgtype")?.as_str()? != "m.text" {
            return None;
        }
        event.content.get("body")?.as_str()
    }

    async fn is_direct_message(&self, room_id: &RoomId) -> bool {
        match self.rooms.room(room_id).await.joined_members().await {
            Ok(members) => members.len() == 2,
            Err(e) => {
                warn!(error = %e, "failed to read joined members for DM check");
                false
            }
        }
    }

    async fn is_admin(&self, room_id: &RoomId, sender: &UserId) -> bool {
        self.rooms
            .room(room_id)
            .await
            .power_levels()
            .is_some_and(|levels| levels.is_admin(sender))
    }

    async fn handle_message(&self, room_id: &RoomId, event: &MatrixEvent) {
        if self.dispatcher.ignore_own() && event.sender == self.own_user_id {
            return;
        }
        let Some(body) = Self::message_body(event) else { return };
        let Some(invocation) = self.dispatcher.parse(body) else { return };

        let ctx = CommandContext {
            agent_id: self.agent_id,
            agent_name: self.agent_name.clone(),
            room_id: room_id.clone(),
            sender: event.sender.clone(),
            is_direct_message: self.is_direct_message(room_id).await,
            is_admin: self.is_admin(room_id, &event.sender).await,
            registry: Arc::clone(&self.registry),
            agent_registry: Arc::clone(&self.agent_registry),
            joined_rooms: self.rooms.joined_room_ids(),
        };

        let result = self
            .dispatcher
            .dispatch(&invocation, &ctx, &self.agent_registry, self.agent_storage.as_ref())
            .await;

        let reply = match result {
            Ok(reply) => {
                if let Some(event_id) = &event.event_id {
                    let history = HistoryMessage {
                        event_id: event_id.to_string(),
                        sender: event.sender.to_string(),
                        content: event.content.clone(),
                        timestamp: chrono::Utc::now(),
                    };
                    if let Err(e) = self
                        .conversation_memory
                        .add_message(self.agent_id, &event.sender, room_id, history)
                        .await
                    {
                        warn!(error = %e, "failed to record conversation history");
                    }
                }
                Some(reply)
            }
            Err(e) => {
                warn!(agent = %self.agent_name, error = %e, "command dispatch failed");
                self.dispatcher.reply_on_error().then(|| e.to_string())
            }
        };

        if let Some(reply) = reply {
            let event_type = EventType::try_new("m.room.message").expect("literal event type is valid");
            let content = json!({"msgtype": "m.text", "body": reply});
            if let Err(e) = self.matrix.send_message_event(room_id, &event_type, content).await {
                warn!(agent = %self.agent_name, error = %e, "failed to send command reply");
            }
        }
    }
}

#[async_trait]
impl SyncEventHandler for StandardBot {
    async fn on_presence_event(&self, _event: &MatrixEvent) {}

    async fn on_invite_event(&self, _room_id: &RoomId, _event: &MatrixEvent) {}

    async fn on_leave_event(&self, _room_id: &RoomId, _event: &MatrixEvent) {}

    async fn on_event(&self, room_id: &RoomId, event: &MatrixEvent) {
        if event.event_type.to_string() == "m.room.message" {
            self.handle_message(room_id, event).await;
        }
    }

    async fn on_state_event(&self, _room_id: &RoomId, _event: &MatrixEvent) {}

    async fn on_ephemeral_event(&self, _room_id: &RoomId, _event: &MatrixEvent) {}
}
