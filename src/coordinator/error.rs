//! Errors surfaced by the daemon coordinator (component L).

use thiserror::Error;

/// Errors surfaced by [`super::Coordinator`] operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A filesystem or process operation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker process could not be spawned
    #[error("failed to spawn worker: {0}")]
    WorkerSpawnFailed(String),

    /// The probe HTTP server could not bind its configured address
    #[error("failed to bind probe server: {0}")]
    ProbeBindFailed(String),

    /// `start` was called on a coordinator already running
    #[error("coordinator already running")]
    AlreadyRunning,

    /// `stop`/`reload` was requested but the coordinator isn't running
    #[error("coordinator not running")]
    NotRunning,
}
