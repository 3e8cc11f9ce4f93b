//! Crate-wide error type for Conclave
//!
//! Each layer (transport, matrix API, storage, router, lifecycle) defines
//! its own error enum; this type composes them at the boundaries the
//! coordinator and command dispatcher actually cross.

use thiserror::Error;

use crate::domain_types::AgentId;
use crate::http::TransportError;
use crate::matrix::MatrixApiError;
use crate::router::RouterError;
use crate::storage::StorageError;

/// Top-level error type for Conclave operations
#[derive(Error, Debug)]
pub enum ConclaveError {
    /// An agent referenced by id does not exist in the registry or store
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// An agent lifecycle transition was attempted that the state machine forbids
    #[error("invalid agent state transition: {0}")]
    InvalidTransition(String),

    /// The HTTP transport underneath the Matrix client failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The Matrix API returned an error response
    #[error("matrix api error: {0}")]
    MatrixApi(#[from] MatrixApiError),

    /// A storage operation failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The event router failed to accept or deliver an event
    #[error("router error: {0}")]
    Router(#[from] RouterError),

    /// Generic configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure unrelated to the Matrix transport (e.g. pidfile, logfile)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Command parsing or dispatch failed
    #[error("command error: {0}")]
    Command(#[from] crate::command::CommandError),

    /// The agent manager could not complete a lifecycle operation
    #[error("manager error: {0}")]
    Manager(#[from] crate::manager::ManagerError),

    /// The daemon coordinator hit an unrecoverable condition
    #[error("coordinator error: {0}")]
    Coordinator(#[from] crate::coordinator::CoordinatorError),
}

/// Convenience result alias for fallible Conclave operations
pub type ConclaveResult<T> = Result<T, ConclaveError>;
