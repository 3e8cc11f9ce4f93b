//! Conclave - a multi-agent Matrix chatbot runtime.
//!
//! This binary runs in one of two modes, selected by the presence of
//! `--worker-index`:
//!
//! - **Coordinator** (no `--worker-index`): re-execs itself once per
//!   configured worker, serves the probe HTTP endpoint, and supervises the
//!   fleet until a shutdown or reload signal arrives.
//! - **Worker** (`--worker-index <n> --worker-count <n>`): opens the shared
//!   database, starts its shard of agents, and runs until its parent sends
//!   `SIGTERM`.
//!
//! Normally launched via `conclave-cli`, which owns the pidfile and signal
//! plumbing described in the CLI surface; this binary also accepts those
//! flags directly for running in the foreground.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use conclave::cache::MemoryCache;
use conclave::config::Settings;
use conclave::config::WorkerCount;
use conclave::coordinator::Coordinator;
use conclave::logging::LogReopenHandle;
use conclave::manager::{AgentManager, DefaultBotFactory, ManagerDeps};
use conclave::memory::{ConversationMemory, Reaper};
use conclave::router::Router;
use conclave::storage::{
    DatabaseConfig, DatabaseConnection, DatabasePath, SqliteAgentStorage, SqliteAgentStoreStorage,
    SqliteChatSessionStorage, SqliteKnowledgeBaseStorage,
};
use tracing::{error, info, warn};

/// Conclave daemon.
#[derive(Parser, Debug)]
#[command(name = "conclave", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to a TOML settings file; defaults are used for anything it omits.
    #[arg(long, default_value = "conclave.toml")]
    config: PathBuf,

    /// Override the configured worker-process count.
    #[arg(long)]
    workers: Option<usize>,

    /// Override the probe server's bind port.
    #[arg(long)]
    probe_port: Option<u16>,

    /// Override the probe server's bind host.
    #[arg(long)]
    probe_host: Option<String>,

    /// Write the coordinator's pid here and remove it on clean exit.
    #[arg(long)]
    pidfile: Option<PathBuf>,

    /// Append logs to this file instead of stdout; reopened on `SIGUSR1`.
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Restrict this process to the named agents (comma-separated).
    #[arg(long, value_delimiter = ',')]
    agents: Vec<String>,

    /// Internal: this process is worker `N` of `--worker-count`, not the coordinator.
    #[arg(long, hide = true)]
    worker_index: Option<usize>,

    /// Internal: total worker count, required alongside `--worker-index`.
    #[arg(long, hide = true, default_value_t = 1)]
    worker_count: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_handle = conclave::logging::init(args.logfile.as_deref())?;

    let mut settings = Settings::load_from_file(&args.config).context("loading configuration")?;
    if let Some(workers) = args.workers {
        settings.coordinator.workers =
            WorkerCount::try_new(workers).map_err(|e| anyhow::anyhow!("invalid --workers {workers}: {e}"))?;
    }
    if let Some(port) = args.probe_port {
        settings.coordinator.probe_port = port;
    }
    if let Some(host) = &args.probe_host {
        settings.coordinator.probe_host.clone_from(host);
    }

    match args.worker_index {
        Some(index) => run_worker(settings, index, args.worker_count, &args.agents, log_handle).await,
        None => run_coordinator(settings, &args, log_handle).await,
    }
}

async fn build_manager(settings: &Settings) -> Result<Arc<AgentManager>> {
    let db_path = DatabasePath::new(settings.database_path.clone())
        .map_err(|e| anyhow::anyhow!("invalid database_path {:?}: {e}", settings.database_path))?;
    let db_config = DatabaseConfig::new(db_path);
    let connection = DatabaseConnection::initialize(db_config).await.context("initializing database")?;

    let agent_storage: Arc<SqliteAgentStorage> = Arc::new(SqliteAgentStorage::new(connection.clone()));
    let agent_store: Arc<SqliteAgentStoreStorage> = Arc::new(SqliteAgentStoreStorage::new(connection.clone()));
    let chat_sessions: Arc<SqliteChatSessionStorage> = Arc::new(SqliteChatSessionStorage::new(connection.clone()));
    let knowledge_base: Arc<SqliteKnowledgeBaseStorage> = Arc::new(SqliteKnowledgeBaseStorage::new(connection));

    let cache = Arc::new(MemoryCache::new());
    let router = Arc::new(Router::with_default_queue(Arc::new(conclave::agent::AgentRegistry::new())));
    router.start().await.context("starting event router")?;

    let conversation_memory = Arc::new(ConversationMemory::new(chat_sessions.clone(), cache.clone()));
    let reaper = Arc::new(Reaper::new(
        agent_store,
        chat_sessions,
        knowledge_base,
        settings.memory.memory_cleanup_interval,
        settings.memory.conversation_stale_after,
    ));

    let bot_factory = Arc::new(DefaultBotFactory::default());

    let deps = ManagerDeps {
        agent_storage,
        router,
        cache,
        bot_factory,
        conversation_memory,
        reaper,
    };
    Ok(Arc::new(AgentManager::new(settings.manager.clone(), deps)))
}

async fn run_worker(
    settings: Settings,
    index: usize,
    total_workers: usize,
    agents: &[String],
    log_handle: LogReopenHandle,
) -> Result<()> {
    info!(worker_index = index, total_workers, "starting worker process");
    let manager = build_manager(&settings).await?;

    let allowed: Vec<conclave::domain_types::AgentName> = agents
        .iter()
        .filter_map(|name| conclave::domain_types::AgentName::try_new(name.clone()).ok())
        .collect();
    let filter = if allowed.is_empty() { None } else { Some(allowed.as_slice()) };

    manager.start_shard(index, total_workers.max(1), filter).await.context("starting agent shard")?;

    wait_for_shutdown_or_reopen(log_handle.as_ref()).await;
    info!(worker_index = index, "worker shutting down");
    manager.stop_all().await;
    Ok(())
}

async fn run_coordinator(settings: Settings, args: &Args, log_handle: LogReopenHandle) -> Result<()> {
    let exe = std::env::current_exe().context("resolving current executable")?;
    let mut extra_args = vec!["--config".to_string(), args.config.display().to_string()];
    if !args.agents.is_empty() {
        extra_args.push("--agents".to_string());
        extra_args.push(args.agents.join(","));
    }
    if let Some(logfile) = &args.logfile {
        extra_args.push("--logfile".to_string());
        extra_args.push(logfile.display().to_string());
    }

    let pidfile = args.pidfile.as_deref();
    if let Some(path) = pidfile {
        write_pidfile(path)?;
    }

    let db_path = DatabasePath::new(settings.database_path.clone())
        .map_err(|e| anyhow::anyhow!("invalid database_path {:?}: {e}", settings.database_path))?;
    let connection = DatabaseConnection::initialize(DatabaseConfig::new(db_path))
        .await
        .context("initializing database")?;
    let agent_storage = Arc::new(SqliteAgentStorage::new(connection));

    let coordinator = Coordinator::new(settings.coordinator.clone(), exe, extra_args, agent_storage, log_handle);
    let result = coordinator.run().await;

    if let Some(path) = pidfile {
        if let Err(err) = std::fs::remove_file(path) {
            warn!(%err, pidfile = %path.display(), "failed to remove pidfile");
        }
    }

    if let Err(err) = result {
        error!(%err, "coordinator exited with error");
        return Err(err.into());
    }
    Ok(())
}

fn write_pidfile(path: &std::path::Path) -> Result<()> {
    std::fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("writing pidfile {}", path.display()))
}

/// Waits for `SIGTERM`/`SIGINT` (exit) while reopening the process's own log
/// file whenever the coordinator forwards `SIGUSR1`.
async fn wait_for_shutdown_or_reopen(log_handle: Option<&conclave::logging::ReopenableFile>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    let mut usr1 = signal(SignalKind::user_defined1()).expect("failed to register SIGUSR1 handler");

    loop {
        tokio::select! {
            _ = term.recv() => return,
            _ = int.recv() => return,
            _ = usr1.recv() => {
                info!("reopening log file");
                if let Some(handle) = log_handle {
                    if let Err(err) = handle.reopen() {
                        warn!(%err, "failed to reopen log file");
                    }
                }
            }
        }
    }
}
