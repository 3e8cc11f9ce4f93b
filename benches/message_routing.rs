//! Event router performance benchmarks.
//!
//! Measures route registration and dispatch throughput across varying
//! route-table sizes, mirroring the registration/lookup/dispatch shape of
//! the teacher's `message_routing` benchmark group.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conclave::agent::AgentRegistry;
use conclave::domain_types::{AgentId, EventType, UserId};
use conclave::matrix::MatrixEvent;
use conclave::router::{Route, RouteHandler, RouteSpec, Router, RouterEvent};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tokio::runtime::Runtime;

struct CountingHandler(Arc<AtomicU64>);

#[async_trait]
impl RouteHandler for CountingHandler {
    async fn handle(&self, _event: &RouterEvent) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

fn test_event(event_type: &str) -> RouterEvent {
    RouterEvent {
        room_id: None,
        event_type: EventType::try_new(event_type).unwrap(),
        user_id: Some(UserId::try_new("@bench:example.org").unwrap()),
        event: MatrixEvent {
            event_type: EventType::try_new(event_type).unwrap(),
            event_id: None,
            sender: UserId::try_new("@bench:example.org").unwrap(),
            origin_server_ts: None,
            content: json!({}),
            state_key: None,
            room_id: None,
        },
    }
}

fn bench_register_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_route");
    for route_count in [1, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("register", route_count), &route_count, |b, &route_count| {
            b.iter(|| {
                let registry = Arc::new(AgentRegistry::new());
                let router = Router::with_default_queue(registry);
                let hits = Arc::new(AtomicU64::new(0));
                for _ in 0..route_count {
                    let id = router.register_route(RouteSpec {
                        agent_id: AgentId::generate(),
                        room_id: None,
                        event_type: None,
                        user_id: None,
                        priority: 0,
                        handler: Arc::new(CountingHandler(Arc::clone(&hits))),
                    });
                    black_box(id);
                }
            });
        });
    }
    group.finish();
}

fn bench_dispatch_event(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatch_event");
    group.measurement_time(Duration::from_secs(5));

    for route_count in [1, 10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("dispatch", route_count), &route_count, |b, &route_count| {
            b.to_async(&rt).iter(|| async {
                let registry = Arc::new(AgentRegistry::new());
                let router = Arc::new(Router::with_default_queue(registry));
                router.start().await.unwrap();

                let hits = Arc::new(AtomicU64::new(0));
                for _ in 0..route_count {
                    router.register_route(RouteSpec {
                        agent_id: AgentId::generate(),
                        room_id: None,
                        event_type: None,
                        user_id: None,
                        priority: 0,
                        handler: Arc::new(CountingHandler(Arc::clone(&hits))),
                    });
                }

                router.dispatch_event(test_event("m.room.message"));
                tokio::task::yield_now().await;
                black_box(hits.load(Ordering::Relaxed));
                router.stop().await;
            });
        });
    }
    group.finish();
}

fn bench_route_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_matching");

    let event = test_event("m.room.message");
    let route = Route {
        id: 1,
        agent_id: AgentId::generate(),
        room_id: None,
        event_type: Some(EventType::try_new("m.room.message").unwrap()),
        user_id: None,
        priority: 0,
        sequence: 0,
        handler: Arc::new(CountingHandler(Arc::new(AtomicU64::new(0)))),
    };

    group.bench_function("matches", |b| {
        b.iter(|| black_box(event.matches(black_box(&route))));
    });
    group.finish();
}

criterion_group!(benches, bench_register_route, bench_dispatch_event, bench_route_matching);
criterion_main!(benches);
