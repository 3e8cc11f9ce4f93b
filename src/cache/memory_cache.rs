//! In-process, `DashMap`-backed [`super::Cache`] implementation.
//!
//! Grounded on the `DashMap`-backed throughput tracker in the router: a
//! concurrent map needs no external locking for independent key access.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::Cache;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| Instant::now() >= t)
    }
}

/// Process-local cache backend. Used directly in single-worker deployments
/// and as the room/user cache behind [`crate::client::Client`].
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    /// Builds an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn glob_matches(pattern: &str, key: &str) -> bool {
        match pattern.split_once('*') {
            None => pattern == key,
            Some((prefix, suffix)) => key.starts_with(prefix) && key.ends_with(suffix),
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn read(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    async fn write(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries.insert(key.to_string(), Entry { value, expires_at });
    }

    async fn exist(&self, key: &str) -> bool {
        self.read(key).await.is_some()
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn delete_matching(&self, pattern: &str) {
        let keys: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| Self::glob_matches(pattern, k))
            .collect();
        for key in keys {
            self.entries.remove(&key);
        }
    }

    async fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let cache = MemoryCache::new();
        cache.write("k", b"v".to_vec(), None).await;
        assert_eq!(cache.read("k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let cache = MemoryCache::new();
        cache.write("k", b"v".to_vec(), Some(Duration::from_millis(1))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.read("k").await, None);
        assert!(!cache.exist("k").await);
    }

    #[tokio::test]
    async fn delete_matching_uses_glob_pattern() {
        let cache = MemoryCache::new();
        cache.write("agent_memory/a1/foo", b"1".to_vec(), None).await;
        cache.write("agent_memory/a1/bar", b"2".to_vec(), None).await;
        cache.write("agent_memory/a2/foo", b"3".to_vec(), None).await;

        cache.delete_matching("agent_memory/a1/*").await;

        assert!(!cache.exist("agent_memory/a1/foo").await);
        assert!(!cache.exist("agent_memory/a1/bar").await);
        assert!(cache.exist("agent_memory/a2/foo").await);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let cache = MemoryCache::new();
        cache.write("a", b"1".to_vec(), None).await;
        cache.write("b", b"2".to_vec(), None).await;
        cache.clear().await;
        assert!(!cache.exist("a").await);
        assert!(!cache.exist("b").await);
    }
}
