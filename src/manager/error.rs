//! Errors surfaced by the agent manager (component K).

use thiserror::Error;

use crate::domain_types::AgentId;
use crate::matrix::MatrixApiError;
use crate::storage::StorageError;

/// Errors surfaced by [`super::AgentManager`] operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No agent record exists for this id
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// `start_agent` was called for an agent already in the registry
    #[error("agent already running: {0}")]
    AlreadyRunning(AgentId),

    /// A stop/pause/resume was requested for an agent with no registry entry
    #[error("agent not running: {0}")]
    NotRunning(AgentId),

    /// An agent record named a `bot_class` the factory has no constructor for
    #[error("unknown bot class: {0}")]
    UnknownBotClass(String),

    /// The requested lifecycle transition is not valid from the agent's current state
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    /// A persistence operation failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Authenticating or otherwise calling the homeserver failed
    #[error("matrix api error: {0}")]
    MatrixApi(#[from] MatrixApiError),
}
