//! Per-agent key/value memory tier (component D), keyed by
//! `agent_memory/<agent_id>/<key>` in the shared cache.
//!
//! Write-through discipline: writes go to the persistent store first, then
//! (on success) to the cache; reads check the cache, falling back to the
//! store and repopulating the cache on a miss; deletes remove from the
//! store then the cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::Cache;
use crate::domain_types::{AgentId, MemoryKey};
use crate::storage::{AgentStoreStorage, StorageResult};

fn cache_key(agent_id: AgentId, key: &MemoryKey) -> String {
    format!("agent_memory/{agent_id}/{key}")
}

/// Per-agent key/value memory, backed by [`AgentStoreStorage`] with a
/// [`Cache`] read-through/write-through layer in front of it.
pub struct AgentMemory {
    store: Arc<dyn AgentStoreStorage>,
    cache: Arc<dyn Cache>,
}

impl AgentMemory {
    /// Builds a memory tier over `store`, using `cache` as its front layer.
    pub fn new(store: Arc<dyn AgentStoreStorage>, cache: Arc<dyn Cache>) -> Self {
        Self { store, cache }
    }

    /// Reads a value, checking the cache before falling back to the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store lookup fails.
    pub async fn get(&self, agent_id: AgentId, key: &MemoryKey) -> StorageResult<Option<Value>> {
        let cache_key = cache_key(agent_id, key);
        if let Some(bytes) = self.cache.read(&cache_key).await {
            if let Ok(value) = serde_json::from_slice(&bytes) {
                return Ok(Some(value));
            }
        }
        let value = self.store.get(agent_id, key).await?;
        if let Some(value) = &value {
            if let Ok(bytes) = serde_json::to_vec(value) {
                self.cache.write(&cache_key, bytes, None).await;
            }
        }
        Ok(value)
    }

    /// Writes a value to the store, then the cache, with an optional TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store write fails; the cache is
    /// left untouched in that case.
    pub async fn set(
        &self,
        agent_id: AgentId,
        key: &MemoryKey,
        value: Value,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        self.store.set(agent_id, key, value.clone(), ttl).await?;
        if let Ok(bytes) = serde_json::to_vec(&value) {
            self.cache.write(&cache_key(agent_id, key), bytes, ttl).await;
        }
        Ok(())
    }

    /// Deletes a value from the store, then the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store delete fails.
    pub async fn delete(&self, agent_id: AgentId, key: &MemoryKey) -> StorageResult<()> {
        self.store.delete(agent_id, key).await?;
        self.cache.delete(&cache_key(agent_id, key)).await;
        Ok(())
    }

    /// Whether a value exists for `key`, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store lookup fails.
    pub async fn exists(&self, agent_id: AgentId, key: &MemoryKey) -> StorageResult<bool> {
        Ok(self.get(agent_id, key).await?.is_some())
    }

    /// Lists the agent's currently non-expired keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store lookup fails.
    pub async fn keys(&self, agent_id: AgentId) -> StorageResult<Vec<MemoryKey>> {
        self.store.keys(agent_id).await
    }

    /// Loads every non-expired key/value pair for an agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store lookup fails.
    pub async fn all(&self, agent_id: AgentId) -> StorageResult<Vec<(MemoryKey, Value)>> {
        let keys = self.keys(agent_id).await?;
        let mut pairs = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(agent_id, &key).await? {
                pairs.push((key, value));
            }
        }
        Ok(pairs)
    }

    /// Deletes every entry for an agent, store then cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store delete fails.
    pub async fn clear(&self, agent_id: AgentId) -> StorageResult<()> {
        self.store.clear_agent(agent_id).await?;
        self.cache.delete_matching(&format!("agent_memory/{agent_id}/*")).await;
        Ok(())
    }

    /// Memoizes the result of `compute`: returns the cached/stored value if
    /// present, otherwise runs `compute`, stores the result with `ttl`, and
    /// returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store read or write fails.
    pub async fn remember<F, Fut>(
        &self,
        agent_id: AgentId,
        key: &MemoryKey,
        ttl: Option<Duration>,
        compute: F,
    ) -> StorageResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Value>,
    {
        if let Some(value) = self.get(agent_id, key).await? {
            return Ok(value);
        }
        let value = compute().await;
        self.set(agent_id, key, value.clone(), ttl).await?;
        Ok(value)
    }

    /// Adds `n` to the numeric value at `key` (treating an absent or
    /// non-numeric value as zero), returning the new total.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store read or write fails.
    pub async fn increment(&self, agent_id: AgentId, key: &MemoryKey, n: i64) -> StorageResult<i64> {
        let current = self.get(agent_id, key).await?.and_then(|v| v.as_i64()).unwrap_or(0);
        let next = current + n;
        self.set(agent_id, key, Value::from(next), None).await?;
        Ok(next)
    }

    /// Appends `value` to the list stored at `key`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store read or write fails.
    pub async fn push(&self, agent_id: AgentId, key: &MemoryKey, value: Value) -> StorageResult<()> {
        let mut list = self.get(agent_id, key).await?.and_then(|v| v.as_array().cloned()).unwrap_or_default();
        list.push(value);
        self.set(agent_id, key, Value::Array(list), None).await
    }

    /// Removes the first occurrence of `value` from the list stored at
    /// `key`. A no-op if the key is absent or not a list.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store read or write fails.
    pub async fn pull(&self, agent_id: AgentId, key: &MemoryKey, value: &Value) -> StorageResult<()> {
        let Some(mut list) = self.get(agent_id, key).await?.and_then(|v| v.as_array().cloned()) else {
            return Ok(());
        };
        if let Some(pos) = list.iter().position(|v| v == value) {
            list.remove(pos);
        }
        self.set(agent_id, key, Value::Array(list), None).await
    }
}
