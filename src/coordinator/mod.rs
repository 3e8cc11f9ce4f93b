//! The daemon coordinator (component L): spawns and supervises worker
//! processes, serves the probe HTTP server, and reacts to Unix signals.
//!
//! Grounded on the teacher's `server.rs` for the probe server lifecycle and
//! `rest_api.rs` for the JSON response shapes, generalized from "one process"
//! to "one coordinator fronting N re-exec'd worker processes" per the
//! forked-worker-sharding redesign note.

mod error;
mod metrics;
mod probe;
mod signals;
mod worker;

pub use error::CoordinatorError;
pub use probe::{AgentCounts, ProbeState, RunStateHandle};
pub use signals::DaemonSignal;
pub use worker::{WorkerExit, WorkerHandle};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CoordinatorConfig;
use crate::logging::LogReopenHandle;
use crate::storage::AgentStorage;

/// Supervises the worker fleet and the probe server for the lifetime of the
/// daemon process. Constructed once by `main` in parent mode; never run
/// inside a worker process.
pub struct Coordinator {
    config: CoordinatorConfig,
    exe: PathBuf,
    extra_worker_args: Vec<String>,
    agent_storage: Arc<dyn AgentStorage>,
    run_state: RunStateHandle,
    started_at: Instant,
    log_handle: LogReopenHandle,
}

impl Coordinator {
    /// Builds a coordinator. `exe` is the binary re-exec'd for each worker
    /// (normally `std::env::current_exe()`); `extra_worker_args` are forwarded
    /// verbatim to every worker (e.g. `--config <path>`). `log_handle` lets a
    /// `SIGUSR1` reopen the coordinator's own log file; pass `None` when
    /// logging to stdout.
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        exe: PathBuf,
        extra_worker_args: Vec<String>,
        agent_storage: Arc<dyn AgentStorage>,
        log_handle: LogReopenHandle,
    ) -> Self {
        Self {
            config,
            exe,
            extra_worker_args,
            agent_storage,
            run_state: RunStateHandle::new(),
            started_at: Instant::now(),
            log_handle,
        }
    }

    /// Runs the coordinator to completion: spawns the worker fleet, serves
    /// the probe HTTP endpoint, and reacts to signals until a `Shutdown`
    /// signal (or `SIGHUP` reload) brings everything down.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe server cannot bind or a worker cannot
    /// be spawned.
    pub async fn run(self) -> Result<(), CoordinatorError> {
        let total_workers = self.config.workers.into_inner();
        let (exit_tx, mut exit_rx) = mpsc::channel(total_workers.max(1));
        let mut workers = self.spawn_all_workers(total_workers, &exit_tx)?;

        let probe_shutdown = CancellationToken::new();
        let probe_task = self.spawn_probe_server(total_workers, probe_shutdown.clone()).await?;

        let mut signal_rx = signals::listen();

        loop {
            tokio::select! {
                Some(signal) = signal_rx.recv() => {
                    match signal {
                        DaemonSignal::Shutdown => {
                            info!("shutdown signal received");
                            break;
                        }
                        DaemonSignal::Reload => {
                            info!(worker_indices = ?workers.iter().map(WorkerHandle::index).collect::<Vec<_>>(), "reload signal received, restarting worker fleet");
                            for worker in &workers {
                                let _ = worker.stop();
                            }
                            drain_expected_exits(&mut exit_rx, workers.len()).await;
                            workers = self.spawn_all_workers(total_workers, &exit_tx)?;
                        }
                        DaemonSignal::ReopenLogs => {
                            info!("log reopen signal received");
                            if let Some(handle) = &self.log_handle {
                                if let Err(err) = handle.reopen() {
                                    warn!(%err, "failed to reopen log file");
                                }
                            }
                            for worker in &workers {
                                let _ = worker.reopen_logs();
                            }
                        }
                        DaemonSignal::DumpState => {
                            let counts = AgentCounts::query(self.agent_storage.as_ref()).await;
                            info!(
                                worker_indices = ?workers.iter().map(WorkerHandle::index).collect::<Vec<_>>(),
                                worker_pids = ?workers.iter().map(WorkerHandle::pid).collect::<Vec<_>>(),
                                agents_total = counts.total(),
                                agents_online = counts.online(),
                                uptime_seconds = self.started_at.elapsed().as_secs(),
                                "diagnostic state dump"
                            );
                        }
                    }
                }
                Some(exit) = exit_rx.recv() => {
                    workers.retain(|w| w.pid() != exit.pid);
                    if exit.requested {
                        info!(worker_index = exit.index, "worker stopped as requested");
                    } else {
                        warn!(worker_index = exit.index, "worker crashed, respawning");
                        if let Ok(handle) = worker::spawn(&self.exe, exit.index, total_workers, &self.extra_worker_args, exit_tx.clone()) {
                            workers.push(handle);
                        }
                    }
                }
            }
        }

        self.run_state.mark_stopping();
        self.shutdown(workers, &mut exit_rx).await;
        probe_shutdown.cancel();
        let _ = probe_task.await;
        Ok(())
    }

    fn spawn_all_workers(
        &self,
        total_workers: usize,
        exit_tx: &mpsc::Sender<WorkerExit>,
    ) -> Result<Vec<WorkerHandle>, CoordinatorError> {
        (0..total_workers.max(1))
            .map(|index| worker::spawn(&self.exe, index, total_workers.max(1), &self.extra_worker_args, exit_tx.clone()))
            .collect()
    }

    async fn spawn_probe_server(
        &self,
        total_workers: usize,
        shutdown: CancellationToken,
    ) -> Result<tokio::task::JoinHandle<()>, CoordinatorError> {
        let addr = format!("{}:{}", self.config.probe_host, self.config.probe_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| CoordinatorError::ProbeBindFailed(format!("{addr}: {e}")))?;
        let state = ProbeState::new(self.run_state.clone(), self.started_at, total_workers, Arc::clone(&self.agent_storage));
        let router = probe::router(state);
        Ok(tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            });
            if let Err(err) = server.await {
                warn!(%err, "probe server exited with error");
            }
        }))
    }

    async fn shutdown(&self, workers: Vec<WorkerHandle>, exit_rx: &mut mpsc::Receiver<WorkerExit>) {
        for worker in &workers {
            let _ = worker.stop();
        }
        let grace = self.config.shutdown_timeout;
        let remaining = workers.len();
        if tokio::time::timeout(grace, drain_expected_exits(exit_rx, remaining)).await.is_err() {
            warn!("workers did not exit within the shutdown grace period, killing");
            for worker in &workers {
                let _ = worker.kill();
            }
        }
    }
}

async fn drain_expected_exits(exit_rx: &mut mpsc::Receiver<WorkerExit>, mut remaining: usize) {
    while remaining > 0 {
        if exit_rx.recv().await.is_none() {
            break;
        }
        remaining -= 1;
    }
}
