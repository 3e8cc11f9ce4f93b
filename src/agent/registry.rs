//! Process-local registry of running agents.
//!
//! Per the concurrency model, all mutations go through one lock; read
//! selectors clone the current snapshot and iterate outside it so a slow
//! consumer never blocks a writer (mirrors the router's copy-on-write route
//! list in `crate::router::Router`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain_types::AgentId;

use super::record::AgentRecord;

/// A running agent's bookkeeping: its live record mirror, the task driving
/// its sync loop, and the token used to request a graceful stop.
pub struct RegistryEntry {
    /// In-memory mirror of the persisted agent record
    pub record: AgentRecord,
    /// Handle to the task running this agent's sync loop
    pub task: JoinHandle<()>,
    /// Token observed by the sync loop at every suspension point
    pub stop_token: CancellationToken,
    /// When this entry was registered
    pub started_at: Instant,
}

impl RegistryEntry {
    /// Whether the driving task has already finished (crashed or exited).
    pub fn is_dead(&self) -> bool {
        self.task.is_finished()
    }
}

/// Shared, process-local table of currently-running agents.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    entries: Arc<RwLock<HashMap<AgentId, RegistryEntry>>>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly-started agent, replacing any prior entry for the same id.
    pub fn register(&self, id: AgentId, entry: RegistryEntry) {
        self.entries.write().expect("lock poisoned").insert(id, entry);
    }

    /// Removes an agent from the registry, returning its entry if present.
    pub fn unregister(&self, id: AgentId) -> Option<RegistryEntry> {
        self.entries.write().expect("lock poisoned").remove(&id)
    }

    /// Whether `id` currently has a registered entry.
    pub fn contains(&self, id: AgentId) -> bool {
        self.entries.read().expect("lock poisoned").contains_key(&id)
    }

    /// Number of currently-registered agents.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Whether the registry has no registered agents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots the current agent ids, releasing the lock before returning.
    pub fn ids(&self) -> Vec<AgentId> {
        self.entries.read().expect("lock poisoned").keys().copied().collect()
    }

    /// Snapshots the current agent records, releasing the lock before returning.
    ///
    /// Callers that need to act on many agents (monitor sweep, `/status`)
    /// should use this rather than holding the lock while iterating.
    pub fn snapshot_records(&self) -> Vec<AgentRecord> {
        self.entries
            .read()
            .expect("lock poisoned")
            .values()
            .map(|e| e.record.clone())
            .collect()
    }

    /// Ids of entries whose driving task has already finished.
    pub fn dead_ids(&self) -> Vec<AgentId> {
        self.entries
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|(_, entry)| entry.is_dead())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Applies `mutate` to the record of `id`, if registered.
    pub fn with_record_mut<R>(&self, id: AgentId, mutate: impl FnOnce(&mut AgentRecord) -> R) -> Option<R> {
        let mut guard = self.entries.write().expect("lock poisoned");
        guard.get_mut(&id).map(|entry| mutate(&mut entry.record))
    }

    /// The stop token of a registered agent's scheduling unit, for signaling
    /// a graceful stop without removing the entry outright.
    pub fn stop_token(&self, id: AgentId) -> Option<CancellationToken> {
        self.entries.read().expect("lock poisoned").get(&id).map(|e| e.stop_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::record::AgentState;
    use crate::domain_types::{AgentName, BotClassId, HomeserverUrl, MessagesHandled};
    use serde_json::Value;

    fn sample_record(id: AgentId) -> AgentRecord {
        AgentRecord {
            id,
            name: AgentName::try_new("test-agent").unwrap(),
            homeserver: HomeserverUrl::try_new("https://matrix.example.org").unwrap(),
            username: "@bot:example.org".to_string(),
            bot_class: BotClassId::try_new("echo").unwrap(),
            state: AgentState::Offline,
            access_token: None,
            encrypted_password: None,
            settings: Value::Object(serde_json::Map::new()),
            last_sync_token: None,
            last_active_at: None,
            messages_handled: MessagesHandled::default(),
        }
    }

    #[tokio::test]
    async fn register_then_unregister_round_trips() {
        let registry = AgentRegistry::new();
        let id = AgentId::generate();
        let token = CancellationToken::new();
        let task = tokio::spawn(async {});
        registry.register(
            id,
            RegistryEntry {
                record: sample_record(id),
                task,
                stop_token: token,
                started_at: Instant::now(),
            },
        );
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);
        let removed = registry.unregister(id);
        assert!(removed.is_some());
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn dead_ids_reports_finished_tasks() {
        let registry = AgentRegistry::new();
        let id = AgentId::generate();
        let task = tokio::spawn(async {});
        while !task.is_finished() {
            tokio::task::yield_now().await;
        }
        registry.register(
            id,
            RegistryEntry {
                record: sample_record(id),
                task,
                stop_token: CancellationToken::new(),
                started_at: Instant::now(),
            },
        );
        tokio::task::yield_now().await;
        assert!(registry.dead_ids().contains(&id));
    }
}
