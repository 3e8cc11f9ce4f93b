//! Error classification for the Matrix API façade

use thiserror::Error;

use crate::http::TransportError;

/// Errors surfaced by [`super::MatrixApi`] methods.
///
/// Transport-level failures are classified by HTTP status into the
/// taxonomy from the error handling design: 401/403/404/409/429 get named
/// variants, everything else falls back to the generic `RequestError`.
#[derive(Error, Debug, Clone)]
pub enum MatrixApiError {
    /// 401 — missing or invalid access token
    #[error("not authorized: {message}")]
    NotAuthorized {
        /// Matrix `errcode`
        code: String,
        /// Human readable message
        message: String,
    },

    /// 403 — authenticated but not permitted
    #[error("forbidden: {message}")]
    Forbidden {
        /// Matrix `errcode`
        code: String,
        /// Human readable message
        message: String,
    },

    /// 404 — resource does not exist
    #[error("not found: {message}")]
    NotFound {
        /// Matrix `errcode`
        code: String,
        /// Human readable message
        message: String,
    },

    /// 409 — conflicting state (e.g. room alias already taken)
    #[error("conflict: {message}")]
    Conflict {
        /// Matrix `errcode`
        code: String,
        /// Human readable message
        message: String,
    },

    /// 429 — rate limited past the transport's own retry budget
    #[error("too many requests: {message}")]
    TooManyRequests {
        /// Matrix `errcode`
        code: String,
        /// Human readable message
        message: String,
    },

    /// Any other non-2xx response with a parsed error body
    #[error("request failed ({status}): {message}")]
    RequestError {
        /// HTTP status code
        status: u16,
        /// Matrix `errcode`
        code: String,
        /// Human readable message
        message: String,
    },

    /// The underlying transport failed before a response was received
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl MatrixApiError {
    /// Classifies a [`TransportError`] into the named error taxonomy.
    pub fn classify(err: TransportError) -> Self {
        match err {
            TransportError::RequestError {
                status,
                code,
                message,
                ..
            } => match status {
                401 => Self::NotAuthorized { code, message },
                403 => Self::Forbidden { code, message },
                404 => Self::NotFound { code, message },
                409 => Self::Conflict { code, message },
                429 => Self::TooManyRequests { code, message },
                _ => Self::RequestError {
                    status,
                    code,
                    message,
                },
            },
            other => Self::Transport(other),
        }
    }
}
