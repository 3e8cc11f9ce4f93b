//! Route and event types for the event router (component G).

use std::sync::Arc;

use crate::domain_types::{AgentId, EventType, RoomId, UserId};
use crate::matrix::MatrixEvent;

use super::traits::RouteHandler;

/// Opaque identifier for a registered route, assigned at registration time.
pub type RouteId = u64;

/// An event dispatched through the router: the underlying Matrix event plus
/// the fields routes match against.
#[derive(Debug, Clone)]
pub struct RouterEvent {
    /// Room the event occurred in, if any (absent for e.g. presence events)
    pub room_id: Option<RoomId>,
    /// Matrix event type, e.g. `m.room.message`
    pub event_type: EventType,
    /// Event sender
    pub user_id: Option<UserId>,
    /// The underlying Matrix event
    pub event: MatrixEvent,
}

impl RouterEvent {
    /// Whether `route` should receive this event: every filter the route
    /// specifies must equal the event's corresponding field, and unset
    /// filters act as wildcards.
    pub fn matches(&self, route: &Route) -> bool {
        if let Some(room_id) = &route.room_id {
            if self.room_id.as_ref() != Some(room_id) {
                return false;
            }
        }
        if let Some(event_type) = &route.event_type {
            if &self.event_type != event_type {
                return false;
            }
        }
        if let Some(user_id) = &route.user_id {
            if self.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        true
    }
}

/// A registered route: an optional set of field filters bound to a handler
/// owned by one agent.
#[derive(Clone)]
pub struct Route {
    /// Registration identity, used to unregister later
    pub id: RouteId,
    /// The agent this route delivers to; must resolve to a currently
    /// registered bot at delivery time
    pub agent_id: AgentId,
    /// Room filter, or wildcard if unset
    pub room_id: Option<RoomId>,
    /// Event type filter, or wildcard if unset
    pub event_type: Option<EventType>,
    /// Sender filter, or wildcard if unset
    pub user_id: Option<UserId>,
    /// Higher priority routes are delivered first
    pub priority: i32,
    /// Order this route was registered in, used to break priority ties
    pub(super) sequence: u64,
    /// The handler invoked for matching events
    pub handler: Arc<dyn RouteHandler>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("agent_id", &self.agent_id)
            .field("room_id", &self.room_id)
            .field("event_type", &self.event_type)
            .field("user_id", &self.user_id)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Parameters for registering a new route, before an id and sequence are assigned.
pub struct RouteSpec {
    /// The agent this route delivers to
    pub agent_id: AgentId,
    /// Room filter, or wildcard if unset
    pub room_id: Option<RoomId>,
    /// Event type filter, or wildcard if unset
    pub event_type: Option<EventType>,
    /// Sender filter, or wildcard if unset
    pub user_id: Option<UserId>,
    /// Higher priority routes are delivered first
    pub priority: i32,
    /// The handler invoked for matching events
    pub handler: Arc<dyn RouteHandler>,
}
