//! In-process cache tier shared by the memory layer and the client's
//! room/user cache (component C).

mod memory_cache;

pub use memory_cache::MemoryCache;

use async_trait::async_trait;
use std::time::Duration;

/// Interface every cache backend implements: read/write/exist/delete, a
/// pattern-based bulk delete, and a full clear.
///
/// `deleteMatching` uses a `*`-glob-style pattern (`agent_memory/<id>/*`).
/// Backends that cannot satisfy it directly should track keys written and
/// filter client-side, per the concurrency model's fallback note.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Reads a raw cached value.
    async fn read(&self, key: &str) -> Option<Vec<u8>>;

    /// Writes a raw value, optionally with a TTL after which it expires.
    async fn write(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>);

    /// Whether a non-expired value exists under `key`.
    async fn exist(&self, key: &str) -> bool;

    /// Deletes a single key.
    async fn delete(&self, key: &str);

    /// Deletes every key matching a `*`-glob pattern.
    async fn delete_matching(&self, pattern: &str);

    /// Removes every entry.
    async fn clear(&self);
}
