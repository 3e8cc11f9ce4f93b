//! # Conclave - A Multi-Agent Matrix Chatbot Runtime
//!
//! Conclave hosts many long-lived bot agents against Matrix homeservers from
//! a single daemon: each agent owns a `/sync` loop, a command dispatcher, and
//! a slice of shared conversation memory, all coordinated through a
//! persistent SQLite store and an in-process cache.
//!
//! ## Architecture
//!
//! Conclave follows a "functional core, imperative shell" architecture
//! throughout the storage and transport layers, with one typed error enum
//! and one typed configuration struct per component:
//!
//! ```no_run
//! use conclave::config::Settings;
//! use conclave::storage::{DatabaseConfig, DatabaseConnection, DatabasePath};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = Settings::load_from_file(std::path::Path::new("conclave.toml"))?;
//! let path = DatabasePath::new(&settings.database_path)?;
//! let connection = DatabaseConnection::initialize(DatabaseConfig::new(path)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Components
//!
//! - [`http`] / [`matrix`]: HTTP transport and the Matrix client-server API façade
//! - [`cache`]: in-process cache tier shared by memory and the client's room/user cache
//! - [`client`]: per-agent `/sync` loop, listener state machine, room and user caches
//! - [`router`]: priority-ordered event routing from synced events to agent handlers
//! - [`command`]: message tokenizing, command dispatch, and the built-in command set
//! - [`agent`]: agent records, the lifecycle state machine, and the process-local registry
//! - [`manager`]: agent supervision - start/stop/pause/resume, health monitoring, bot-class resolution
//! - [`memory`]: per-agent key/value storage, conversation history, the knowledge base, and the reaper
//! - [`storage`]: SQLite-backed persistence for all of the above
//! - [`coordinator`]: worker-process supervision, the probe HTTP server, and signal handling
//! - [`logging`]: `tracing` subscriber setup, including reopenable `--logfile` output

pub use crate::agent::*;
pub use crate::config::*;
pub use crate::domain_types::*;
pub use crate::error::*;

pub mod agent;
pub mod cache;
pub mod client;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod domain_types;
pub mod error;
pub mod http;
pub mod logging;
pub mod manager;
pub mod matrix;
pub mod memory;
pub mod router;
pub mod storage;

// Common imports
pub use ::tracing::{debug, error, info, instrument, warn};
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use thiserror::Error;
