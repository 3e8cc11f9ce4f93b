//! Persistent HTTP transport used by the Matrix API façade.
//!
//! Functional core / imperative shell split, in the manner of
//! `crate::database`: [`TransportConfig`] validation and the retry/backoff
//! decisions are pure; connecting, sending, and sleeping are the shell.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::TransportError;
use crate::domain_types::HomeserverUrl;

/// How the transport acquires a connection for each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// One pooled connection shared (behind a mutex-free, internally-pooled
    /// `reqwest::Client`) across every caller.
    Shared,
    /// A fresh client per concurrency unit (per sync-loop task), useful when
    /// callers need independent connection state (e.g. distinct proxies).
    PerUnit,
}

/// Configuration for [`HttpTransport`].
///
/// Changing `timeout`, `proxy`, `homeserver`, or `verify_ssl` after
/// construction closes and rebuilds the underlying connection pool, per the
/// transport contract.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL requests are resolved against
    pub homeserver: HomeserverUrl,
    /// Per-request timeout
    pub timeout: Duration,
    /// Optional HTTP(S) proxy URL
    pub proxy: Option<String>,
    /// Whether to verify TLS certificates
    pub verify_ssl: bool,
    /// Connection acquisition strategy
    pub connection_mode: ConnectionMode,
    /// Maximum consecutive 429 retries before surfacing `RequestError`
    pub max_rate_limit_retries: u32,
    /// Backoff used when a 429 response carries no `retry_after_ms`
    pub default_retry_backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            homeserver: HomeserverUrl::try_new("https://matrix.example.org".to_string())
                .expect("default homeserver URL is valid"),
            timeout: Duration::from_secs(30),
            proxy: None,
            verify_ssl: true,
            connection_mode: ConnectionMode::Shared,
            max_rate_limit_retries: 10,
            default_retry_backoff: Duration::from_millis(1000),
        }
    }
}

/// The decoded result of a single HTTP call.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Raw response body bytes
    pub body_bytes: Vec<u8>,
    /// Body parsed as JSON, if the response `Content-Type` ends in `json`
    pub parsed: Option<Value>,
}

/// Persistent HTTP client with retry, 429 honoring, JSON encode/decode,
/// bearer auth, timeouts, and proxy support.
pub struct HttpTransport {
    config: RwLock<TransportConfig>,
    client: RwLock<reqwest::Client>,
    access_token: RwLock<Option<String>>,
}

impl HttpTransport {
    /// Builds a new transport from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError::ConnectionError`] if the underlying
    /// connection pool cannot be constructed (e.g. an invalid proxy URL).
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = Self::build_client(&config)?;
        Ok(Self {
            config: RwLock::new(config),
            client: RwLock::new(client),
            access_token: RwLock::new(None),
        })
    }

    fn build_client(config: &TransportConfig) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl);

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| TransportError::ConnectionError(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| TransportError::ConnectionError(format!("failed to build client: {e}")))
    }

    /// Sets (or clears) the bearer token injected into subsequent requests.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().expect("lock poisoned") = token;
    }

    /// Updates the timeout and rebuilds the connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be rebuilt.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        self.reconfigure(|c| c.timeout = timeout)
    }

    /// Updates the proxy and rebuilds the connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be rebuilt.
    pub fn set_proxy(&self, proxy: Option<String>) -> Result<(), TransportError> {
        self.reconfigure(|c| c.proxy = proxy.clone())
    }

    /// Updates the homeserver base URL and rebuilds the connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be rebuilt.
    pub fn set_homeserver(&self, homeserver: HomeserverUrl) -> Result<(), TransportError> {
        self.reconfigure(|c| c.homeserver = homeserver.clone())
    }

    /// Updates whether TLS certificates are verified and rebuilds the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be rebuilt.
    pub fn set_verify_ssl(&self, verify_ssl: bool) -> Result<(), TransportError> {
        self.reconfigure(|c| c.verify_ssl = verify_ssl)
    }

    fn reconfigure(&self, mutate: impl FnOnce(&mut TransportConfig)) -> Result<(), TransportError> {
        let mut config = self.config.write().expect("lock poisoned");
        mutate(&mut config);
        let rebuilt = Self::build_client(&config)?;
        *self.client.write().expect("lock poisoned") = rebuilt;
        Ok(())
    }

    fn client_for_request(&self) -> Result<reqwest::Client, TransportError> {
        let config = self.config.read().expect("lock poisoned");
        match config.connection_mode {
            ConnectionMode::Shared => Ok(self.client.read().expect("lock poisoned").clone()),
            ConnectionMode::PerUnit => Self::build_client(&config),
        }
    }

    /// Issues a single HTTP request, transparently retrying 429 responses.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionError`] or
    /// [`TransportError::TimeoutError`] for transport-level failures, or
    /// [`TransportError::RequestError`] for a well-formed error response
    /// (including a 429 that exhausted its retry budget).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
        headers: &HashMap<String, String>,
        skip_auth: bool,
    ) -> Result<HttpResponse, TransportError> {
        let max_retries = self.config.read().expect("lock poisoned").max_rate_limit_retries;
        let mut attempt = 0u32;
        loop {
            let result = self.send_once(method.clone(), path, query, body.clone(), headers, skip_auth).await;
            match result {
                Ok(response) if response.status == 429 => {
                    attempt += 1;
                    if attempt > max_retries {
                        return Err(Self::request_error_from_response(&response));
                    }
                    let sleep_for = Self::retry_after(&response, &self.config.read().expect("lock poisoned"));
                    warn!(attempt, ?sleep_for, "rate limited, retrying");
                    tokio::time::sleep(sleep_for).await;
                }
                other => return other,
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
        headers: &HashMap<String, String>,
        skip_auth: bool,
    ) -> Result<HttpResponse, TransportError> {
        let client = self.client_for_request()?;
        let base = self.config.read().expect("lock poisoned").homeserver.clone();
        let url = format!("{base}{path}");

        let mut request = client.request(method, &url).query(query);

        if let Some(value) = &body {
            request = request
                .header("content-type", "application/json")
                .body(value.to_string());
        } else {
            request = request
                .header("content-type", "application/json")
                .body("null");
        }

        for (name, value) in headers {
            request = request.header(name, value);
        }

        if !skip_auth {
            if let Some(token) = self.access_token.read().expect("lock poisoned").clone() {
                request = request.bearer_auth(token);
            }
        }

        debug!(url, skip_auth, "sending matrix http request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::TimeoutError(e.to_string())
            } else {
                TransportError::ConnectionError(e.to_string())
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?
            .to_vec();

        if status.is_success() && body_bytes.is_empty() {
            return Err(TransportError::ConnectionError("empty body".to_string()));
        }

        if status.as_u16() == 504 {
            return Err(TransportError::TimeoutError(format!(
                "gateway timeout calling {path}"
            )));
        }
        if status.is_server_error() {
            return Err(TransportError::ConnectionError(format!(
                "server error {status} calling {path}"
            )));
        }

        let parsed = if content_type.trim_end().ends_with("json") {
            serde_json::from_slice(&body_bytes).ok()
        } else {
            None
        };

        let http_response = HttpResponse {
            status: status.as_u16(),
            body_bytes,
            parsed,
        };

        if !status.is_success() && status != StatusCode::TOO_MANY_REQUESTS {
            return Err(Self::request_error_from_response(&http_response));
        }

        Ok(http_response)
    }

    fn request_error_from_response(response: &HttpResponse) -> TransportError {
        let body = response.parsed.clone().unwrap_or(Value::Null);
        let code = body
            .get("errcode")
            .and_then(Value::as_str)
            .unwrap_or("M_UNKNOWN")
            .to_string();
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();

        TransportError::RequestError {
            status: response.status,
            code,
            message,
            data: body,
        }
    }

    /// Determines how long to sleep before retrying a 429 response: the
    /// server-advertised `retry_after_ms` (optionally nested under `error`)
    /// takes precedence over the configured default backoff.
    fn retry_after(response: &HttpResponse, config: &TransportConfig) -> Duration {
        let body = response.parsed.as_ref();
        let millis = body
            .and_then(|b| b.get("retry_after_ms"))
            .or_else(|| body.and_then(|b| b.get("error")).and_then(|e| e.get("retry_after_ms")))
            .and_then(Value::as_u64);

        millis.map_or(config.default_retry_backoff, Duration::from_millis)
    }
}
