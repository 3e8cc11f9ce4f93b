//! The daemon's health/status/metrics HTTP surface (component L).
//!
//! Grounded on the teacher's `server.rs`: an `axum::Router` built by a pure
//! `create_router`-equivalent function and served with
//! `serve_with_graceful_shutdown`'s cancellation-token pattern.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use crate::storage::AgentStorage;

use super::metrics;

/// Whether the coordinator is accepting work or winding down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Normal operation
    Running,
    /// Graceful shutdown in progress; `/health` now reports 503
    Stopping,
}

/// Shared, atomically-updated run state the probe server reads on every request.
#[derive(Clone)]
pub struct RunStateHandle(Arc<AtomicU8>);

impl RunStateHandle {
    /// Builds a handle initialized to [`RunState::Running`].
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(0)))
    }

    /// Flips the state to [`RunState::Stopping`]; `/health` starts returning 503.
    pub fn mark_stopping(&self) {
        self.0.store(1, Ordering::SeqCst);
    }

    fn get(&self) -> RunState {
        if self.0.load(Ordering::SeqCst) == 0 {
            RunState::Running
        } else {
            RunState::Stopping
        }
    }
}

impl Default for RunStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Agent counts by lifecycle state, as queried fresh from the shared
/// database (workers hold the live in-process registries; the parent
/// coordinator only ever sees agents through the persistent store).
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentCounts {
    /// Agents in `offline`
    pub offline: u64,
    /// Agents in `connecting`
    pub connecting: u64,
    /// Agents in `online_idle`
    pub online_idle: u64,
    /// Agents in `online_busy`
    pub online_busy: u64,
    /// Agents in `paused`
    pub paused: u64,
    /// Agents in `error`
    pub error: u64,
}

impl AgentCounts {
    /// Sum across every lifecycle state.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.offline + self.connecting + self.online_idle + self.online_busy + self.paused + self.error
    }

    /// `online_idle` and `online_busy` combined, per the `/status` JSON contract's `online` field.
    #[must_use]
    pub fn online(&self) -> u64 {
        self.online_idle + self.online_busy
    }

    pub(crate) async fn query(storage: &dyn AgentStorage) -> Self {
        let mut counts = Self::default();
        let Ok(records) = storage.find_all_agents().await else { return counts };
        for record in &records {
            match record.state {
                crate::agent::AgentState::Offline => counts.offline += 1,
                crate::agent::AgentState::Connecting => counts.connecting += 1,
                crate::agent::AgentState::OnlineIdle => counts.online_idle += 1,
                crate::agent::AgentState::OnlineBusy => counts.online_busy += 1,
                crate::agent::AgentState::Paused => counts.paused += 1,
                crate::agent::AgentState::Error => counts.error += 1,
            }
        }
        counts
    }
}

/// Shared state backing every probe handler.
#[derive(Clone)]
pub struct ProbeState {
    run_state: RunStateHandle,
    started_at: Instant,
    workers: usize,
    agent_storage: Arc<dyn AgentStorage>,
}

impl ProbeState {
    /// Builds the probe's shared state.
    #[must_use]
    pub fn new(run_state: RunStateHandle, started_at: Instant, workers: usize, agent_storage: Arc<dyn AgentStorage>) -> Self {
        Self { run_state, started_at, workers, agent_storage }
    }
}

/// Builds the axum router serving `/health`, `/status`, `/metrics`.
///
/// Any other path falls through to axum's default 404, satisfying the
/// "any other path ⇒ 404" contract without an explicit fallback handler.
#[must_use]
pub fn router(state: ProbeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

async fn health(State(state): State<ProbeState>) -> impl IntoResponse {
    match state.run_state.get() {
        RunState::Running => (StatusCode::OK, "ok"),
        RunState::Stopping => (StatusCode::SERVICE_UNAVAILABLE, "stopping"),
    }
}

#[derive(Serialize)]
struct StatusAgents {
    total: u64,
    online: u64,
    connecting: u64,
    error: u64,
    offline: u64,
    paused: u64,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime: u64,
    workers: usize,
    agents: StatusAgents,
}

async fn status(State(state): State<ProbeState>) -> impl IntoResponse {
    let counts = AgentCounts::query(state.agent_storage.as_ref()).await;
    let body = StatusResponse {
        status: match state.run_state.get() {
            RunState::Running => "running",
            RunState::Stopping => "stopping",
        },
        uptime: state.started_at.elapsed().as_secs(),
        workers: state.workers,
        agents: StatusAgents {
            total: counts.total(),
            online: counts.online(),
            connecting: counts.connecting,
            error: counts.error,
            offline: counts.offline,
            paused: counts.paused,
        },
    };
    Json(body)
}

async fn metrics_text(State(state): State<ProbeState>) -> impl IntoResponse {
    let counts = AgentCounts::query(state.agent_storage.as_ref()).await;
    let up = matches!(state.run_state.get(), RunState::Running);
    let body = metrics::render(up, state.started_at.elapsed().as_secs(), state.workers, &counts);
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    struct EmptyStorage;

    #[async_trait]
    impl AgentStorage for EmptyStorage {
        async fn upsert_agent(&self, _record: &crate::agent::AgentRecord) -> crate::storage::StorageResult<()> {
            Ok(())
        }
        async fn find_agent(&self, _id: crate::domain_types::AgentId) -> crate::storage::StorageResult<Option<crate::agent::AgentRecord>> {
            Ok(None)
        }
        async fn find_live_agents(&self) -> crate::storage::StorageResult<Vec<crate::agent::AgentRecord>> {
            Ok(Vec::new())
        }
        async fn find_all_agents(&self) -> crate::storage::StorageResult<Vec<crate::agent::AgentRecord>> {
            Ok(Vec::new())
        }
        async fn update_state(&self, _id: crate::domain_types::AgentId, _state: crate::agent::AgentState) -> crate::storage::StorageResult<()> {
            Ok(())
        }
        async fn update_sync_token(&self, _id: crate::domain_types::AgentId, _token: Option<&str>) -> crate::storage::StorageResult<()> {
            Ok(())
        }
        async fn record_message_handled(&self, _id: crate::domain_types::AgentId, _at: chrono::DateTime<chrono::Utc>) -> crate::storage::StorageResult<()> {
            Ok(())
        }
        async fn delete_agent(&self, _id: crate::domain_types::AgentId) -> crate::storage::StorageResult<()> {
            Ok(())
        }
    }

    fn test_state() -> ProbeState {
        ProbeState::new(RunStateHandle::new(), Instant::now(), 2, Arc::new(EmptyStorage))
    }

    async fn spawn_test_server(state: ProbeState) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        addr
    }

    #[tokio::test]
    async fn health_is_ok_while_running_and_503_while_stopping() {
        let run_state = RunStateHandle::new();
        let state = ProbeState::new(run_state.clone(), Instant::now(), 1, Arc::new(EmptyStorage));
        let addr = spawn_test_server(state).await;
        let client = reqwest::Client::new();

        let res = timeout(Duration::from_secs(1), client.get(format!("http://{addr}/health")).send())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        run_state.mark_stopping();
        let res = timeout(Duration::from_secs(1), client.get(format!("http://{addr}/health")).send())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let addr = spawn_test_server(test_state()).await;
        let res = reqwest::get(format!("http://{addr}/nope")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_reports_empty_agent_counts() {
        let addr = spawn_test_server(test_state()).await;
        let res = reqwest::get(format!("http://{addr}/status")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_contains_expected_names() {
        let addr = spawn_test_server(test_state()).await;
        let res = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let text = res.text().await.unwrap();
        assert!(text.contains("activematrix_up"));
        assert!(text.contains("activematrix_workers 2"));
    }
}
