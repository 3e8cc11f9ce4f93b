//! Conclave CLI - the operator-facing launcher for the `conclave` daemon.
//!
//! A thin client: it never reimplements daemon internals, it locates the
//! `conclave` binary next to itself, launches it with translated flags,
//! and afterwards talks to it only through a pidfile (for `stop`/`reload`)
//! or the probe HTTP server (for `status`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

/// Conclave CLI.
#[derive(Parser, Debug)]
#[command(name = "conclave-cli", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon.
    Start {
        /// Number of worker processes.
        #[arg(long)]
        workers: Option<usize>,
        /// Probe server port.
        #[arg(long)]
        probe_port: Option<u16>,
        /// Probe server host.
        #[arg(long)]
        probe_host: Option<String>,
        /// Restrict to the named agents.
        #[arg(long, value_delimiter = ',')]
        agents: Vec<String>,
        /// Detach from the controlling terminal and return immediately.
        #[arg(long)]
        daemon: bool,
        /// Where to record the daemon's pid.
        #[arg(long)]
        pidfile: Option<PathBuf>,
        /// Where the daemon should append its logs.
        #[arg(long)]
        logfile: Option<PathBuf>,
        /// Path to a settings file required by the embedding application.
        /// Accepted for compatibility; conclave's own config is `--config`-driven
        /// and does not interpret this flag.
        #[arg(long)]
        require: Option<PathBuf>,
        /// Embedding-application environment name (e.g. `production`).
        /// Accepted for compatibility; ignored by the daemon itself.
        #[arg(long)]
        environment: Option<String>,
        /// Path to the daemon's own TOML settings file.
        #[arg(long, default_value = "conclave.toml")]
        config: PathBuf,
    },
    /// Stop a running daemon.
    Stop {
        #[arg(long, default_value = "conclave.pid")]
        pidfile: PathBuf,
        /// Seconds to wait for graceful exit before sending `SIGKILL`.
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Report the daemon's health and agent counts.
    Status {
        #[arg(long, default_value = "conclave.pid")]
        pidfile: PathBuf,
        #[arg(long, default_value = "127.0.0.1")]
        probe_host: String,
        #[arg(long, default_value_t = 9090)]
        probe_port: u16,
    },
    /// Ask a running daemon to reload (`SIGHUP`).
    Reload {
        #[arg(long, default_value = "conclave.pid")]
        pidfile: PathBuf,
    },
    /// Print the CLI's version.
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let code = match args.command {
        Command::Start {
            workers,
            probe_port,
            probe_host,
            agents,
            daemon,
            pidfile,
            logfile,
            require,
            environment,
            config,
        } => {
            if let Some(path) = &require {
                info!(path = %path.display(), "ignoring --require (embedding-runtime compatibility flag)");
            }
            if let Some(env) = &environment {
                info!(%env, "ignoring --environment (embedding-runtime compatibility flag)");
            }
            start(StartArgs { workers, probe_port, probe_host, agents, daemon, pidfile, logfile, config })
        }
        Command::Stop { pidfile, timeout } => stop(&pidfile, Duration::from_secs(timeout)),
        Command::Status { pidfile, probe_host, probe_port } => status(&pidfile, &probe_host, probe_port).await,
        Command::Reload { pidfile } => reload(&pidfile),
        Command::Version => {
            println!("conclave-cli {}", env!("CARGO_PKG_VERSION"));
            0
        }
    };

    ExitCode::from(code)
}

struct StartArgs {
    workers: Option<usize>,
    probe_port: Option<u16>,
    probe_host: Option<String>,
    agents: Vec<String>,
    daemon: bool,
    pidfile: Option<PathBuf>,
    logfile: Option<PathBuf>,
    config: PathBuf,
}

fn start(args: StartArgs) -> u8 {
    let Ok(daemon_exe) = sibling_daemon_binary() else {
        eprintln!("could not locate the conclave daemon binary next to conclave-cli");
        return 1;
    };

    let mut command = std::process::Command::new(daemon_exe);
    command.arg("--config").arg(&args.config);
    if let Some(workers) = args.workers {
        command.arg("--workers").arg(workers.to_string());
    }
    if let Some(port) = args.probe_port {
        command.arg("--probe-port").arg(port.to_string());
    }
    if let Some(host) = &args.probe_host {
        command.arg("--probe-host").arg(host);
    }
    if !args.agents.is_empty() {
        command.arg("--agents").arg(args.agents.join(","));
    }
    if let Some(pidfile) = &args.pidfile {
        command.arg("--pidfile").arg(pidfile);
    }
    if let Some(logfile) = &args.logfile {
        command.arg("--logfile").arg(logfile);
    }

    if args.daemon {
        command.stdin(std::process::Stdio::null());
        command.stdout(std::process::Stdio::null());
        command.stderr(std::process::Stdio::null());
        match command.spawn() {
            Ok(child) => {
                println!("conclave started, pid={}", child.id());
                0
            }
            Err(err) => {
                eprintln!("failed to start conclave: {err}");
                1
            }
        }
    } else {
        match command.status() {
            Ok(status) => u8::from(!status.success()),
            Err(err) => {
                eprintln!("failed to start conclave: {err}");
                1
            }
        }
    }
}

fn sibling_daemon_binary() -> std::io::Result<PathBuf> {
    let mut path = std::env::current_exe()?;
    path.set_file_name(if cfg!(windows) { "conclave.exe" } else { "conclave" });
    Ok(path)
}

fn stop(pidfile: &Path, timeout: Duration) -> u8 {
    let Some(pid) = read_pidfile(pidfile) else {
        eprintln!("conclave is not running ({} not found or unreadable)", pidfile.display());
        return 1;
    };

    if kill(pid, Signal::SIGTERM).is_err() {
        eprintln!("conclave is not running (stale pidfile {})", pidfile.display());
        let _ = std::fs::remove_file(pidfile);
        return 1;
    }

    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if kill(pid, None).is_err() {
            println!("conclave stopped");
            return 0;
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    warn!(?pid, "conclave did not stop within the timeout, sending SIGKILL");
    let _ = kill(pid, Signal::SIGKILL);
    0
}

fn reload(pidfile: &Path) -> u8 {
    let Some(pid) = read_pidfile(pidfile) else {
        eprintln!("conclave is not running ({} not found or unreadable)", pidfile.display());
        return 1;
    };
    match kill(pid, Signal::SIGHUP) {
        Ok(()) => {
            println!("reload signal sent");
            0
        }
        Err(err) => {
            eprintln!("failed to signal conclave: {err}");
            1
        }
    }
}

async fn status(pidfile: &Path, probe_host: &str, probe_port: u16) -> u8 {
    if read_pidfile(pidfile).is_none() {
        println!("conclave is not running");
        return 1;
    }

    let url = format!("http://{probe_host}:{probe_port}/status");
    match reqwest::get(&url).await {
        Ok(response) if response.status().is_success() => match response.text().await {
            Ok(body) => {
                println!("{body}");
                0
            }
            Err(err) => {
                eprintln!("failed to read status response: {err}");
                1
            }
        },
        Ok(response) => {
            eprintln!("probe server returned {}", response.status());
            1
        }
        Err(err) => {
            eprintln!("could not reach probe server at {url}: {err}");
            1
        }
    }
}

fn read_pidfile(path: &Path) -> Option<Pid> {
    let contents = std::fs::read_to_string(path).ok()?;
    let raw: i32 = contents.trim().parse().ok()?;
    Some(Pid::from_raw(raw))
}
