//! Typed configuration for every component in the daemon, carrying the
//! numeric defaults enumerated in §6 of the specification.
//!
//! Grounded on `storage::database::DatabaseConfig`: `nutype`-validated
//! fields, a `Default` impl seeded with the documented defaults, and
//! `with_*` builder methods rather than a `method_missing`-style settings
//! bag (per the "method missing / proxy for settings" redesign note).

use std::time::Duration;

use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Number of worker processes, or of agent clients per homeserver.
#[nutype(
    validate(greater_or_equal = 1),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 1
)]
pub struct WorkerCount(usize);

/// Settings for the [`crate::manager::AgentManager`] (component K).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Delay between launching successive agents during `start_all`
    pub agent_startup_delay: Duration,
    /// How often the monitor sweep runs
    pub agent_health_check_interval: Duration,
    /// Maximum concurrent clients under construction per homeserver; the
    /// "client pool" semaphore releases its permit immediately after client
    /// construction (rate-limits creation only, per the Open Questions
    /// note), not on client drop.
    pub max_clients_per_homeserver: usize,
    /// An agent idle (no handler invocation) longer than this is flagged by
    /// the monitor, though it is not disconnected.
    pub client_idle_timeout: Duration,
    /// Agents inactive past this long get a warning logged by the monitor
    pub inactive_warning_threshold: Duration,
    /// Grace period given to in-flight handlers/sync loops during stop-all
    pub shutdown_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            agent_startup_delay: Duration::from_secs(2),
            agent_health_check_interval: Duration::from_secs(30),
            max_clients_per_homeserver: 5,
            client_idle_timeout: Duration::from_secs(5 * 60),
            inactive_warning_threshold: Duration::from_secs(5 * 60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ManagerConfig {
    /// Builder: overrides `agent_startup_delay`.
    #[must_use]
    pub fn with_agent_startup_delay(mut self, delay: Duration) -> Self {
        self.agent_startup_delay = delay;
        self
    }

    /// Builder: overrides `agent_health_check_interval`.
    #[must_use]
    pub fn with_agent_health_check_interval(mut self, interval: Duration) -> Self {
        self.agent_health_check_interval = interval;
        self
    }

    /// Builder: overrides `max_clients_per_homeserver`.
    #[must_use]
    pub fn with_max_clients_per_homeserver(mut self, n: usize) -> Self {
        self.max_clients_per_homeserver = n;
        self
    }
}

/// Settings for the per-agent memory/conversation tiers (component D).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum entries retained in a chat session's message history
    pub conversation_history_limit: usize,
    /// Age after which an inactive conversation is reaped
    pub conversation_stale_after: Duration,
    /// Interval between reaper sweeps
    pub memory_cleanup_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            conversation_history_limit: crate::domain_types::MAX_HISTORY_SIZE,
            conversation_stale_after: Duration::from_secs(24 * 60 * 60),
            memory_cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Settings for the [`crate::router::Router`] (component G).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Capacity of the bounded event queue
    pub event_queue_size: usize,
    /// Maximum time a single handler invocation may run before it is
    /// abandoned (the router still logs and moves on to the next route)
    pub event_processing_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            event_queue_size: 1000,
            event_processing_timeout: Duration::from_secs(30),
        }
    }
}

impl RouterConfig {
    /// Builder: overrides `event_queue_size`.
    #[must_use]
    pub fn with_event_queue_size(mut self, size: usize) -> Self {
        self.event_queue_size = size;
        self
    }

    /// Builder: overrides `event_processing_timeout`.
    #[must_use]
    pub fn with_event_processing_timeout(mut self, timeout: Duration) -> Self {
        self.event_processing_timeout = timeout;
        self
    }
}

/// Settings for the [`crate::coordinator::Coordinator`] (component L).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Number of worker processes to shard agents across
    pub workers: WorkerCount,
    /// Upper bound on agents a single worker process will be assigned
    pub max_agents_per_process: usize,
    /// Host the probe HTTP server binds
    pub probe_host: String,
    /// Port the probe HTTP server binds
    pub probe_port: u16,
    /// Grace period given to workers during a graceful shutdown
    pub shutdown_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: WorkerCount::try_new(1).expect("1 is a valid worker count"),
            max_agents_per_process: 10,
            probe_host: "127.0.0.1".to_string(),
            probe_port: 9090,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl CoordinatorConfig {
    /// Builder: overrides `workers`.
    #[must_use]
    pub fn with_workers(mut self, workers: WorkerCount) -> Self {
        self.workers = workers;
        self
    }

    /// Builder: overrides the probe server's bind host/port.
    #[must_use]
    pub fn with_probe_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.probe_host = host.into();
        self.probe_port = port;
        self
    }
}

/// Root settings aggregate, the union of every component's configuration
/// plus the ambient options in §6 (`agent_log_level`, `log_agent_events`)
/// that don't belong to any one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the SQLite database file
    pub database_path: String,
    /// Agent manager settings (component K)
    pub manager: ManagerConfig,
    /// Memory/conversation tier settings (component D)
    pub memory: MemoryConfig,
    /// Event router settings (component G)
    pub router: RouterConfig,
    /// Daemon coordinator settings (component L)
    pub coordinator: CoordinatorConfig,
    /// Log level applied to agent-scoped tracing spans
    pub agent_log_level: String,
    /// Whether to emit a debug span for every dispatched event
    pub log_agent_events: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: "conclave.db".to_string(),
            manager: ManagerConfig::default(),
            memory: MemoryConfig::default(),
            router: RouterConfig::default(),
            coordinator: CoordinatorConfig::default(),
            agent_log_level: "info".to_string(),
            log_agent_events: false,
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file, falling back to [`Settings::default`]
    /// for any field the file omits.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, crate::error::ConclaveError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| crate::error::ConclaveError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_spec_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.manager.agent_startup_delay, Duration::from_secs(2));
        assert_eq!(settings.coordinator.max_agents_per_process, 10);
        assert_eq!(settings.manager.agent_health_check_interval, Duration::from_secs(30));
        assert_eq!(settings.memory.conversation_history_limit, 20);
        assert_eq!(settings.memory.conversation_stale_after, Duration::from_secs(86_400));
        assert_eq!(settings.memory.memory_cleanup_interval, Duration::from_secs(3600));
        assert_eq!(settings.router.event_queue_size, 1000);
        assert_eq!(settings.router.event_processing_timeout, Duration::from_secs(30));
        assert_eq!(settings.manager.max_clients_per_homeserver, 5);
        assert_eq!(settings.manager.client_idle_timeout, Duration::from_secs(300));
        assert!(!settings.log_agent_events);
        assert_eq!(settings.coordinator.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from_file(std::path::Path::new("/nonexistent/conclave.toml")).unwrap();
        assert_eq!(settings.database_path, "conclave.db");
    }
}
