//! Child worker-process management.
//!
//! Workers are full re-executions of the current binary in `--worker-index`
//! mode (`std::env::current_exe`), not threads: the spec calls for forked
//! processes sharing no memory, with all cross-worker coordination flowing
//! through the database and the shared cache. `tokio::process::Child::wait`
//! needs exclusive ownership of the child, which can't coexist with sending
//! it signals from elsewhere, so each handle keeps only the `pid` and hands
//! the `Child` itself to a dedicated monitor task that owns `wait()` and
//! reports back over an `mpsc` channel.

use std::process::Stdio;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::coordinator::error::CoordinatorError;

/// A worker process's exit, reported by its monitor task.
#[derive(Debug)]
pub struct WorkerExit {
    /// Index of the worker that exited (stable for the coordinator's lifetime).
    pub index: usize,
    /// OS process id, for log correlation.
    pub pid: u32,
    /// Whether the exit was requested (`stop` was called) rather than a crash.
    pub requested: bool,
}

/// A handle to one running worker process.
pub struct WorkerHandle {
    index: usize,
    pid: u32,
    stopping: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl WorkerHandle {
    /// The worker's shard index, stable for the coordinator's lifetime.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The worker's OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Sends `SIGTERM`, marking the exit as requested so the coordinator's
    /// respawn loop does not treat it as a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered (the process is
    /// already gone, or the caller lacks permission).
    pub fn stop(&self) -> Result<(), CoordinatorError> {
        self.stopping.store(true, std::sync::atomic::Ordering::SeqCst);
        self.send_signal(Signal::SIGTERM)
    }

    /// Sends `SIGKILL` after a grace period has elapsed without exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    pub fn kill(&self) -> Result<(), CoordinatorError> {
        self.send_signal(Signal::SIGKILL)
    }

    /// Sends `SIGUSR1`, telling the worker to reopen its own log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    pub fn reopen_logs(&self) -> Result<(), CoordinatorError> {
        self.send_signal(Signal::SIGUSR1)
    }

    fn send_signal(&self, signal: Signal) -> Result<(), CoordinatorError> {
        let pid = Pid::from_raw(i32::try_from(self.pid).unwrap_or(i32::MAX));
        kill(pid, signal)
            .map_err(|e| CoordinatorError::WorkerSpawnFailed(format!("signal {signal:?} to pid {}: {e}", self.pid)))
    }
}

/// Spawns a single worker process running `exe` with the given
/// `--worker-index`/`--worker-count` pair, plus any extra args (e.g. a
/// forwarded `--config` path). The worker inherits stdout/stderr so its logs
/// interleave with the coordinator's own.
///
/// # Errors
///
/// Returns an error if the process fails to spawn.
pub fn spawn(
    exe: &std::path::Path,
    index: usize,
    total_workers: usize,
    extra_args: &[String],
    exits: mpsc::Sender<WorkerExit>,
) -> Result<WorkerHandle, CoordinatorError> {
    let mut command = Command::new(exe);
    command
        .arg("--worker-index")
        .arg(index.to_string())
        .arg("--worker-count")
        .arg(total_workers.to_string())
        .args(extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(false);

    let child: Child = command
        .spawn()
        .map_err(|e| CoordinatorError::WorkerSpawnFailed(format!("worker {index}: {e}")))?;
    let pid = child.id().ok_or_else(|| {
        CoordinatorError::WorkerSpawnFailed(format!("worker {index}: process exited before pid was observable"))
    })?;

    let stopping = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    spawn_monitor(index, pid, child, stopping.clone(), exits);

    info!(worker_index = index, pid, "spawned worker process");
    Ok(WorkerHandle { index, pid, stopping })
}

fn spawn_monitor(
    index: usize,
    pid: u32,
    mut child: Child,
    stopping: std::sync::Arc<std::sync::atomic::AtomicBool>,
    exits: mpsc::Sender<WorkerExit>,
) {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => {
                if status.success() {
                    info!(worker_index = index, pid, "worker exited cleanly");
                } else {
                    warn!(worker_index = index, pid, ?status, "worker exited with failure");
                }
            }
            Err(err) => warn!(worker_index = index, pid, %err, "failed to wait on worker process"),
        }
        let requested = stopping.load(std::sync::atomic::Ordering::SeqCst);
        let _ = exits.send(WorkerExit { index, pid, requested }).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_stop_a_real_process() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = spawn(std::path::Path::new("/bin/sleep"), 0, 1, &["5".to_string()], tx).unwrap();
        assert_eq!(handle.index(), 0);
        assert!(handle.pid() > 0);
        handle.stop().unwrap();
        let exit = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for worker exit")
            .expect("channel closed");
        assert_eq!(exit.index, 0);
        assert!(exit.requested);
    }
}
