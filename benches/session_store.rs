//! Session benchmarks
//!
//! Measures store operations, room fan-out and rotation cycles at various
//! player counts.
//!
//! Run with: cargo bench --bench session_store

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cat_arena_server::game::constants::room::GLOBAL_ROOM;
use cat_arena_server::game::map::MapEntry;
use cat_arena_server::game::rotation::{MapPool, MapRotation};
use cat_arena_server::game::state::{PlayerPosition, SessionStore};
use cat_arena_server::metrics::Metrics;
use cat_arena_server::net::connection::ConnectionId;
use cat_arena_server::net::hub::{Frame, Outbox, RoomHub};
use cat_arena_server::net::protocol::ServerMessage;
use tokio::sync::mpsc::UnboundedReceiver;

const COUNTS: [usize; 4] = [10, 100, 500, 1000];

const MAP: &str =
    r#"{"objects":[{"prefabId":"cat_spawn","position":{"x":1.0,"y":1.0,"z":0.0}},{"prefabId":"rock","position":{"x":4.0,"y":2.0,"z":0.0}}]}"#;

/// Store and hub with `count` ready players attached to the global room
fn populated(count: usize) -> (Arc<SessionStore>, Arc<RoomHub>, Vec<UnboundedReceiver<Frame>>) {
    let store = Arc::new(SessionStore::new());
    let hub = Arc::new(RoomHub::new(16));
    let mut receivers = Vec::with_capacity(count);

    for i in 0..count {
        let id = ConnectionId::new();
        receivers.push(hub.attach(id));
        store.register_player(id, format!("Cat{}", i)).unwrap();
        store.mark_ready(id).unwrap();
        hub.join_room(id, GLOBAL_ROOM).unwrap();
    }

    (store, hub, receivers)
}

fn drain(receivers: &mut [UnboundedReceiver<Frame>]) {
    for rx in receivers {
        while rx.try_recv().is_ok() {}
    }
}

/// Benchmark join, roster and leave against a populated store
fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");
    group.sample_size(50);

    for count in COUNTS {
        let (store, _hub, _receivers) = populated(count);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("register_remove", count), &count, |b, _| {
            b.iter(|| {
                let id = ConnectionId::new();
                store.register_player(id, "Visitor".to_string()).unwrap();
                black_box(store.remove_player(id));
            })
        });

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("list_players", count), &count, |b, _| {
            b.iter(|| black_box(store.list_players()))
        });
    }
    group.finish();
}

/// Benchmark one movement relayed to the whole room
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    group.sample_size(50);

    for count in COUNTS {
        let (store, hub, mut receivers) = populated(count);
        let mover = store.list_players()[0].id;
        let message = ServerMessage::update_player(mover, PlayerPosition::new(3.0, 4.0, true, false));

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("broadcast_except", count), &count, |b, _| {
            b.iter(|| {
                black_box(hub.broadcast_except(GLOBAL_ROOM, mover, &message));
                drain(&mut receivers);
            })
        });
    }
    group.finish();
}

/// Benchmark a full rotation cycle: swap map, mark everyone dead, broadcast
fn bench_rotation(c: &mut Criterion) {
    let mut group = c.benchmark_group("rotation");
    group.sample_size(30);

    for count in COUNTS {
        let (store, hub, mut receivers) = populated(count);
        let outbox: Arc<dyn Outbox> = hub.clone();
        let pool = MapPool::new(vec![MapEntry::new(1, MAP), MapEntry::new(2, "[]")]);
        let rotation = MapRotation::new(pool, store, outbox, Arc::new(Metrics::new()));

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("run_cycle", count), &count, |b, _| {
            b.iter(|| {
                black_box(rotation.run_cycle());
                drain(&mut receivers);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_store, bench_fan_out, bench_rotation);

criterion_main!(benches);
