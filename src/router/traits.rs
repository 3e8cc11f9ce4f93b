//! Errors and the handler trait for the event router (component G).

use thiserror::Error;

use crate::domain_types::AgentId;

/// Errors surfaced by [`super::Router`] operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A route referenced an agent id with no corresponding registry entry
    #[error("agent not registered: {0}")]
    AgentNotRegistered(AgentId),

    /// The bounded event queue was full when a dispatch was attempted
    #[error("event queue full, dropping event")]
    QueueFull,

    /// A route was referenced by id that the router does not recognize
    #[error("route not found: {0}")]
    RouteNotFound(u64),

    /// The router's worker task is not running
    #[error("router is not started")]
    NotStarted,
}

/// A handler bound to one or more [`super::Route`]s.
///
/// Implementations are invoked inside an isolated error boundary: a panic
/// or error from one handler must never prevent delivery to other routes.
#[async_trait::async_trait]
pub trait RouteHandler: Send + Sync {
    /// Handles one matched event.
    async fn handle(&self, event: &super::RouterEvent);
}
