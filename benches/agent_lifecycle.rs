//! Agent registry and lifecycle state-machine benchmarks.
//!
//! Measures registration/lookup overhead on `AgentRegistry` and the cost of
//! driving `AgentRecord` through its lifecycle transitions, mirroring the
//! teacher's `agent_spawn` benchmark group's focus on spawn/lookup overhead
//! without a real network round-trip.

use std::sync::Arc;
use std::time::Instant;

use conclave::agent::{AgentLifecycleEvent, AgentRegistry, AgentRecord, AgentState, RegistryEntry};
use conclave::domain_types::{AgentId, AgentName, BotClassId, HomeserverUrl, MessagesHandled};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn test_record(index: usize) -> AgentRecord {
    AgentRecord {
        id: AgentId::generate(),
        name: AgentName::try_new(format!("bench-agent-{index}")).unwrap(),
        homeserver: HomeserverUrl::try_new("https://matrix.example.org").unwrap(),
        username: format!("bench{index}"),
        bot_class: BotClassId::try_new("standard").unwrap(),
        state: AgentState::Offline,
        access_token: None,
        encrypted_password: None,
        settings: serde_json::json!({}),
        last_sync_token: None,
        last_active_at: None,
        messages_handled: MessagesHandled::default(),
    }
}

fn bench_registry_register(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("registry_register");

    for agent_count in [1, 10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("register", agent_count), &agent_count, |b, &agent_count| {
            b.to_async(&rt).iter(|| async {
                let registry = AgentRegistry::new();
                for i in 0..agent_count {
                    let record = test_record(i);
                    let id = record.id;
                    let task = tokio::spawn(async {});
                    registry.register(
                        id,
                        RegistryEntry {
                            record,
                            task,
                            stop_token: CancellationToken::new(),
                            started_at: Instant::now(),
                        },
                    );
                }
                black_box(registry.len());
            });
        });
    }
    group.finish();
}

fn bench_registry_lookup(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("registry_lookup");

    for agent_count in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("contains", agent_count), &agent_count, |b, &agent_count| {
            b.to_async(&rt).iter_batched(
                || {
                    rt.block_on(async {
                        let registry = Arc::new(AgentRegistry::new());
                        let mut ids = Vec::with_capacity(agent_count);
                        for i in 0..agent_count {
                            let record = test_record(i);
                            let id = record.id;
                            ids.push(id);
                            let task = tokio::spawn(async {});
                            registry.register(
                                id,
                                RegistryEntry {
                                    record,
                                    task,
                                    stop_token: CancellationToken::new(),
                                    started_at: Instant::now(),
                                },
                            );
                        }
                        (registry, ids)
                    })
                },
                |(registry, ids)| async move {
                    for id in &ids {
                        black_box(registry.contains(*id));
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_lifecycle_transitions(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifecycle_transitions");

    group.bench_function("connect_then_idle_then_offline", |b| {
        b.iter(|| {
            let mut record = test_record(0);
            record.transition(AgentLifecycleEvent::Connect).unwrap();
            record.transition(AgentLifecycleEvent::ConnectionEstablished).unwrap();
            record.transition(AgentLifecycleEvent::Disconnect).unwrap();
            black_box(record.state);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_registry_register, bench_registry_lookup, bench_lifecycle_transitions);
criterion_main!(benches);
