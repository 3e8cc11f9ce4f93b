//! Unix signal handling for the daemon coordinator (self-pipe pattern).
//!
//! `tokio::signal::unix` streams are fed into one `mpsc` channel so the
//! coordinator's main loop can `select!` over a single receiver instead of
//! juggling one stream per signal, mirroring the single-worker-task shape of
//! `crate::router::Router::start`.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// A signal the coordinator reacts to, collapsed from the raw Unix set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// `SIGTERM` / `SIGINT`: begin graceful shutdown.
    Shutdown,
    /// `SIGHUP`: reload configuration and restart workers.
    Reload,
    /// `SIGUSR1`: reopen the log file (for log rotation).
    ReopenLogs,
    /// `SIGUSR2`: dump internal diagnostic state to the log.
    DumpState,
}

/// Spawns one task per signal kind, forwarding onto a shared channel.
///
/// The returned receiver yields signals in arrival order; if the coordinator
/// is slow to drain it, duplicate deliveries of the same signal coalesce
/// naturally since each listener task loops independently rather than
/// queuing unboundedly.
#[must_use]
pub fn listen() -> mpsc::Receiver<DaemonSignal> {
    let (tx, rx) = mpsc::channel(16);
    spawn_listener(tx.clone(), SignalKind::terminate(), DaemonSignal::Shutdown);
    spawn_listener(tx.clone(), SignalKind::interrupt(), DaemonSignal::Shutdown);
    spawn_listener(tx.clone(), SignalKind::hangup(), DaemonSignal::Reload);
    spawn_listener(tx.clone(), SignalKind::user_defined1(), DaemonSignal::ReopenLogs);
    spawn_listener(tx, SignalKind::user_defined2(), DaemonSignal::DumpState);
    rx
}

fn spawn_listener(tx: mpsc::Sender<DaemonSignal>, kind: SignalKind, mapped: DaemonSignal) {
    tokio::spawn(async move {
        let Ok(mut stream) = signal(kind) else {
            tracing::error!(?kind, "failed to register signal handler");
            return;
        };
        while stream.recv().await.is_some() {
            if tx.send(mapped).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listen_delivers_sigterm_as_shutdown() {
        let mut rx = listen();
        let pid = nix::unistd::getpid();
        nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM).unwrap();
        let received = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for signal")
            .expect("channel closed");
        assert_eq!(received, DaemonSignal::Shutdown);
    }
}
