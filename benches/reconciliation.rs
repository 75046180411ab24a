//! Performance benchmarks for the sync engine's reconciliation cycle and
//! the temporal store's snapshot/diff operations.
//!
//! Run with: `cargo bench --bench reconciliation`

use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use infra_graph_kernel::store::InMemoryGraphStore;
use infra_graph_kernel::sync::{CancellationToken, SourceScope, StaticDiscoverySource, SyncEngine, SyncOptions};
use infra_graph_kernel::temporal::InMemoryTemporalStore;
use infra_graph_kernel::{GraphStore, ResourceKey, ResourceNode, ResourceStatus, SnapshotTrigger};

fn make_nodes(count: usize) -> Vec<ResourceNode> {
    (0..count)
        .map(|i| {
            let key = ResourceKey {
                provider: "aws".into(),
                account: "1".into(),
                region: "us-east-1".into(),
                resource_type: "ec2-instance".into(),
                native_id: format!("i-{i}"),
            };
            let mut n = ResourceNode::new_discovered(key, format!("instance-{i}"), ResourceStatus::Running, Utc::now());
            n.cost_monthly = Some(10.0 + i as f64 % 7.0);
            n
        })
        .collect()
}

fn scope() -> SourceScope {
    SourceScope { provider: "aws".into(), accounts: vec!["1".into()], regions: vec!["us-east-1".into()] }
}

/// Benchmark a fresh reconciliation cycle (all nodes created) at growing scale.
fn bench_fresh_sync(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fresh_sync");

    for node_count in [10, 100, 1000] {
        group.throughput(Throughput::Elements(node_count as u64));
        group.bench_with_input(BenchmarkId::new("nodes", node_count), &node_count, |b, &count| {
            b.iter_batched(
                || {
                    let store = Arc::new(InMemoryGraphStore::new());
                    let source = Arc::new(StaticDiscoverySource::new("bench-source", scope(), make_nodes(count), vec![], Utc::now()));
                    SyncEngine::new(store, vec![source])
                },
                |engine| {
                    rt.block_on(async {
                        let report = engine.sync(black_box(&SyncOptions::default()), &CancellationToken::new()).await;
                        assert_eq!(report.per_source[0].created, count);
                    })
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Benchmark a no-op resync (every node already present and unchanged).
fn bench_idempotent_resync(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("idempotent_resync");

    for node_count in [10, 100, 1000] {
        let store = Arc::new(InMemoryGraphStore::new());
        let source = Arc::new(StaticDiscoverySource::new("bench-source", scope(), make_nodes(node_count), vec![], Utc::now()));
        let engine = SyncEngine::new(store, vec![source]);
        rt.block_on(engine.sync(&SyncOptions::default(), &CancellationToken::new()));

        group.throughput(Throughput::Elements(node_count as u64));
        group.bench_with_input(BenchmarkId::new("nodes", node_count), &node_count, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let report = engine.sync(black_box(&SyncOptions::default()), &CancellationToken::new()).await;
                    assert_eq!(report.per_source[0].created, 0);
                })
            })
        });
    }

    group.finish();
}

/// Benchmark snapshot creation cost as the graph grows.
fn bench_snapshot_creation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("snapshot_creation");

    for node_count in [10, 100, 1000] {
        group.throughput(Throughput::Elements(node_count as u64));
        group.bench_with_input(BenchmarkId::new("nodes", node_count), &node_count, |b, &count| {
            b.iter_batched(
                || {
                    let store = Arc::new(InMemoryGraphStore::new());
                    rt.block_on(store.upsert_nodes(make_nodes(count))).unwrap();
                    InMemoryTemporalStore::new(store)
                },
                |temporal| {
                    rt.block_on(async {
                        temporal.create_snapshot(black_box(SnapshotTrigger::Sync), None, None).await.unwrap();
                    })
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Benchmark diffing two adjacent snapshots with a fraction of nodes changed.
fn bench_snapshot_diff(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("snapshot_diff");

    for node_count in [10, 100, 1000] {
        let store = Arc::new(InMemoryGraphStore::new());
        let nodes = make_nodes(node_count);
        rt.block_on(store.upsert_nodes(nodes.clone())).unwrap();
        let temporal = InMemoryTemporalStore::new(store.clone());
        let s1 = rt.block_on(temporal.create_snapshot(SnapshotTrigger::Sync, None, None)).unwrap();

        let mut changed = nodes;
        for n in changed.iter_mut().take(node_count / 10 + 1) {
            n.cost_monthly = Some(n.cost_monthly.unwrap_or(0.0) + 100.0);
        }
        rt.block_on(store.upsert_nodes(changed)).unwrap();
        let s2 = rt.block_on(temporal.create_snapshot(SnapshotTrigger::Sync, None, None)).unwrap();

        group.throughput(Throughput::Elements(node_count as u64));
        group.bench_with_input(BenchmarkId::new("nodes", node_count), &node_count, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    temporal.diff_snapshots(black_box(s1.id), black_box(s2.id)).await.unwrap()
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fresh_sync, bench_idempotent_resync, bench_snapshot_creation, bench_snapshot_diff);
criterion_main!(benches);
