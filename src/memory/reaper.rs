//! Scheduled expiry sweep for agent-store entries, stale chat sessions, and
//! expired knowledge-base entries (component D).
//!
//! Runs on a configurable interval (default one hour); a failed sweep is
//! logged and never takes down the process, matching the resilience
//! discipline the monitor task in `crate::manager` applies to agent crashes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::storage::{AgentStoreStorage, ChatSessionStorage, KnowledgeBaseStorage};

/// Default interval between reaper sweeps.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default age after which an inactive conversation is considered stale.
pub const DEFAULT_CONVERSATION_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Deletes expired agent-store entries, expired knowledge-base entries, and
/// chat sessions inactive past `conversation_stale_after`.
pub struct Reaper {
    agent_store: Arc<dyn AgentStoreStorage>,
    chat_sessions: Arc<dyn ChatSessionStorage>,
    knowledge_base: Arc<dyn KnowledgeBaseStorage>,
    interval: Duration,
    conversation_stale_after: Duration,
}

impl Reaper {
    /// Builds a reaper with the given sweep interval and staleness window.
    pub fn new(
        agent_store: Arc<dyn AgentStoreStorage>,
        chat_sessions: Arc<dyn ChatSessionStorage>,
        knowledge_base: Arc<dyn KnowledgeBaseStorage>,
        interval: Duration,
        conversation_stale_after: Duration,
    ) -> Self {
        Self {
            agent_store,
            chat_sessions,
            knowledge_base,
            interval,
            conversation_stale_after,
        }
    }

    /// Runs one sweep immediately, logging (but not propagating) failures.
    pub async fn sweep_once(&self) {
        let now = Utc::now();

        match self.agent_store.delete_expired(now).await {
            Ok(count) if count > 0 => info!(count, "reaped expired agent store entries"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to reap agent store entries"),
        }

        match self.knowledge_base.delete_expired(now).await {
            Ok(count) if count > 0 => info!(count, "reaped expired knowledge base entries"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to reap knowledge base entries"),
        }

        let stale_before = now
            - chrono::Duration::from_std(self.conversation_stale_after).unwrap_or_default();
        match self.chat_sessions.find_stale_sessions(stale_before).await {
            Ok(sessions) => {
                for session in &sessions {
                    if let Err(e) = self
                        .chat_sessions
                        .delete_session(session.agent_id, &session.user_id, &session.room_id)
                        .await
                    {
                        error!(error = %e, "failed to reap stale chat session");
                    }
                }
                if !sessions.is_empty() {
                    info!(count = sessions.len(), "reaped stale chat sessions");
                }
            }
            Err(e) => error!(error = %e, "failed to list stale chat sessions"),
        }
    }

    /// Runs sweeps on `interval` until `stop` is cancelled.
    pub async fn run(&self, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
    }
}
