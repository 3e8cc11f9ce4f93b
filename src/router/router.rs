//! Priority-ordered event router (component G).
//!
//! Registered routes are copy-on-write, per the concurrency model: reads
//! clone the current `Vec<Route>` and iterate outside the lock, so a slow
//! handler never blocks a concurrent registration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::agent::AgentRegistry;

use super::domain_types::{Route, RouteId, RouteSpec, RouterEvent};
use super::traits::RouterError;

/// Default capacity of the router's bounded event queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Priority-ordered, single-worker event router.
pub struct Router {
    routes: RwLock<Vec<Route>>,
    next_route_id: AtomicU64,
    next_sequence: AtomicU64,
    sender: RwLock<Option<mpsc::Sender<RouterEvent>>>,
    receiver: Mutex<Option<mpsc::Receiver<RouterEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<AgentRegistry>,
}

impl Router {
    /// Builds a router with the given bounded queue capacity, backed by
    /// `registry` for the "agent still registered" delivery check.
    pub fn new(queue_size: usize, registry: Arc<AgentRegistry>) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size);
        Self {
            routes: RwLock::new(Vec::new()),
            next_route_id: AtomicU64::new(1),
            next_sequence: AtomicU64::new(0),
            sender: RwLock::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
            registry,
        }
    }

    /// The agent registry this router checks before delivering a route.
    ///
    /// The agent manager reuses this same registry rather than keeping a
    /// second one of its own, since a route whose agent isn't registered
    /// here is silently dropped by [`Router::deliver_one`].
    pub fn registry(&self) -> Arc<AgentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Builds a router with the default queue capacity.
    pub fn with_default_queue(registry: Arc<AgentRegistry>) -> Self {
        Self::new(DEFAULT_QUEUE_SIZE, registry)
    }

    /// Registers a new route, maintaining the priority-descending,
    /// registration-order-stable ordering invariant.
    pub fn register_route(&self, spec: RouteSpec) -> RouteId {
        let id = self.next_route_id.fetch_add(1, Ordering::Relaxed);
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let route = Route {
            id,
            agent_id: spec.agent_id,
            room_id: spec.room_id,
            event_type: spec.event_type,
            user_id: spec.user_id,
            priority: spec.priority,
            sequence,
            handler: spec.handler,
        };

        let mut routes = self.routes.write().expect("lock poisoned");
        routes.push(route);
        routes.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
        id
    }

    /// Removes a route by id. Returns an error if no such route exists.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::RouteNotFound`] when `id` is unknown.
    pub fn unregister_route(&self, id: RouteId) -> Result<(), RouterError> {
        let mut routes = self.routes.write().expect("lock poisoned");
        let before = routes.len();
        routes.retain(|r| r.id != id);
        if routes.len() == before {
            return Err(RouterError::RouteNotFound(id));
        }
        Ok(())
    }

    /// Snapshots the current routes for read-only iteration outside the lock.
    fn snapshot_routes(&self) -> Vec<Route> {
        self.routes.read().expect("lock poisoned").clone()
    }

    /// Enqueues an event for delivery. Drops the newest event and logs a
    /// warning if the bounded queue is full; a no-op once [`Router::stop`]
    /// has closed the queue.
    pub fn dispatch_event(&self, event: RouterEvent) {
        let Some(sender) = self.sender.read().expect("lock poisoned").clone() else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(event) {
            warn!("router queue full, dropping event");
        }
    }

    /// Delivers `event` to every currently-registered route, bypassing
    /// field matching entirely.
    pub async fn broadcast_event(&self, event: RouterEvent) {
        let routes = self.snapshot_routes();
        for route in &routes {
            Self::deliver_one(&self.registry, route, &event).await;
        }
    }

    async fn deliver_one(registry: &AgentRegistry, route: &Route, event: &RouterEvent) {
        if !registry.contains(route.agent_id) {
            debug!(agent_id = %route.agent_id, "skipping route for unregistered agent");
            return;
        }
        let handler = route.handler.clone();
        let event = event.clone();
        let agent_id = route.agent_id;
        // Each handler invocation is an isolated error boundary: a panicking
        // handler must not prevent delivery to other routes.
        let result = tokio::spawn(async move {
            handler.handle(&event).await;
        })
        .await;
        if let Err(join_err) = result {
            error!(agent_id = %agent_id, error = %join_err, "route handler panicked");
        }
    }

    /// Spawns the single worker task that pops events from the queue and
    /// delivers them to every matching route in priority order.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotStarted`] if called twice without an
    /// intervening [`Router::stop`].
    pub async fn start(self: &Arc<Self>) -> Result<(), RouterError> {
        let mut worker_guard = self.worker.lock().await;
        if worker_guard.is_some() {
            return Ok(());
        }
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or(RouterError::NotStarted)?;

        let router = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let routes = router.snapshot_routes();
                for route in &routes {
                    if event.matches(route) {
                        Self::deliver_one(&router.registry, route, &event).await;
                    }
                }
            }
            debug!("router worker exiting: queue closed");
        });
        *worker_guard = Some(handle);
        Ok(())
    }

    /// Closes the queue and joins the worker task.
    pub async fn stop(&self) {
        // Taking the sender out and dropping it closes the channel; recv()
        // then returns None and the worker task exits its loop. Clearing the
        // field (rather than cloning and dropping a copy) is what actually
        // drops the last sender, since the worker's receiver has no sender
        // clone of its own.
        let sender = self.sender.write().expect("lock poisoned").take();
        drop(sender);
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{AgentId, EventId, EventType, RoomId, UserId};
    use crate::matrix::MatrixEvent;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl super::super::traits::RouteHandler for CountingHandler {
        async fn handle(&self, _event: &RouterEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_event(event_type: &str) -> RouterEvent {
        RouterEvent {
            room_id: Some(RoomId::try_new("!room:example.org").unwrap()),
            event_type: EventType::try_new(event_type).unwrap(),
            user_id: Some(UserId::try_new("@alice:example.org").unwrap()),
            event: MatrixEvent {
                event_type: EventType::try_new(event_type).unwrap(),
                event_id: Some(EventId::try_new("$1").unwrap()),
                sender: UserId::try_new("@alice:example.org").unwrap(),
                origin_server_ts: Some(0),
                content: Value::Null,
                state_key: None,
                room_id: Some(RoomId::try_new("!room:example.org").unwrap()),
            },
        }
    }

    #[tokio::test]
    async fn matching_route_is_delivered_and_non_matching_is_skipped() {
        let registry = Arc::new(AgentRegistry::new());
        let router = Arc::new(Router::new(16, Arc::clone(&registry)));
        router.start().await.unwrap();

        let agent_id = AgentId::generate();
        let count = Arc::new(AtomicUsize::new(0));
        router.register_route(RouteSpec {
            agent_id,
            room_id: None,
            event_type: Some(EventType::try_new("m.room.message").unwrap()),
            user_id: None,
            priority: 0,
            handler: Arc::new(CountingHandler { count: Arc::clone(&count) }),
        });

        // Route references an agent id the registry doesn't know about, so
        // delivery is skipped even though the event matches.
        router.dispatch_event(sample_event("m.room.message"));
        router.dispatch_event(sample_event("m.room.member"));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn routes_sorted_by_priority_then_registration_order() {
        let registry = Arc::new(AgentRegistry::new());
        let router = Router::new(16, registry);
        let agent_id = AgentId::generate();
        let handler = Arc::new(CountingHandler { count: Arc::new(AtomicUsize::new(0)) });

        let low = router.register_route(RouteSpec {
            agent_id,
            room_id: None,
            event_type: None,
            user_id: None,
            priority: 0,
            handler: handler.clone(),
        });
        let high = router.register_route(RouteSpec {
            agent_id,
            room_id: None,
            event_type: None,
            user_id: None,
            priority: 10,
            handler: handler.clone(),
        });
        let also_low = router.register_route(RouteSpec {
            agent_id,
            room_id: None,
            event_type: None,
            user_id: None,
            priority: 0,
            handler,
        });

        let ids: Vec<RouteId> = router.snapshot_routes().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![high, low, also_low]);
    }

    #[tokio::test]
    async fn unregister_unknown_route_errors() {
        let registry = Arc::new(AgentRegistry::new());
        let router = Router::new(16, registry);
        let err = router.unregister_route(999).unwrap_err();
        assert!(matches!(err, RouterError::RouteNotFound(999)));
    }
}
