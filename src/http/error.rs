//! Error types for the HTTP transport layer

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by [`super::HttpTransport::request`]
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The underlying socket/TLS connection could not be established or was reset
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// The request did not complete within the configured timeout
    #[error("timeout error: {0}")]
    TimeoutError(String),

    /// The server returned a well-formed JSON error body
    #[error("request error {status}: {code} - {message}")]
    RequestError {
        /// HTTP status code
        status: u16,
        /// Matrix `errcode` (or a synthesized code for non-Matrix failures)
        code: String,
        /// Human readable message from the error body
        message: String,
        /// Any additional fields present in the error body
        data: Value,
    },
}

impl TransportError {
    /// The HTTP status code carried by a [`TransportError::RequestError`], if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error represents a rate-limit (429) response
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }
}
