//! Per-homeserver client creation limiter.
//!
//! Resolves the Open Question on client-pool semantics in the design notes:
//! the semaphore here rate-limits concurrent client *construction*, not
//! concurrent client *lifetime*. The permit is acquired, the client is
//! built, and the permit is dropped before the client's first use — a
//! homeserver that answers logins slowly cannot be hammered with a start-all
//! burst, but once a client exists it runs for as long as its agent does,
//! unbounded by this pool.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Semaphore;

use crate::domain_types::HomeserverUrl;

/// Limits concurrent client construction per homeserver.
pub struct ClientPool {
    semaphores: RwLock<HashMap<HomeserverUrl, Arc<Semaphore>>>,
    permits: usize,
}

impl ClientPool {
    /// Builds a pool allowing `permits` concurrent constructions per homeserver.
    pub fn new(permits: usize) -> Self {
        Self { semaphores: RwLock::new(HashMap::new()), permits: permits.max(1) }
    }

    fn semaphore_for(&self, homeserver: &HomeserverUrl) -> Arc<Semaphore> {
        if let Some(s) = self.semaphores.read().expect("lock poisoned").get(homeserver) {
            return Arc::clone(s);
        }
        let mut guard = self.semaphores.write().expect("lock poisoned");
        Arc::clone(
            guard
                .entry(homeserver.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.permits))),
        )
    }

    /// Runs `build` under this homeserver's creation limit, releasing the
    /// permit as soon as `build` completes rather than holding it for the
    /// constructed value's lifetime.
    pub async fn acquire_and_build<T, F, Fut>(&self, homeserver: &HomeserverUrl, build: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let semaphore = self.semaphore_for(homeserver);
        let _permit = semaphore.acquire().await.expect("semaphore is never closed");
        build().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_are_serialized_to_the_permit_count() {
        let pool = ClientPool::new(1);
        let homeserver = HomeserverUrl::try_new("https://matrix.example.org").unwrap();
        let first = pool.acquire_and_build(&homeserver, || async { 1 }).await;
        let second = pool.acquire_and_build(&homeserver, || async { 2 }).await;
        assert_eq!(first + second, 3);
    }

    #[tokio::test]
    async fn distinct_homeservers_get_independent_semaphores() {
        let pool = ClientPool::new(1);
        let a = HomeserverUrl::try_new("https://a.example.org").unwrap();
        let b = HomeserverUrl::try_new("https://b.example.org").unwrap();
        assert!(!Arc::ptr_eq(&pool.semaphore_for(&a), &pool.semaphore_for(&b)));
    }
}
