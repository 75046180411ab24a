//! Integration tests for the sync engine (C3) against the in-memory
//! graph store (C2): discovery batches reconciled into node/edge upserts
//! and disappearance handling across multiple cycles.

use std::sync::Arc;

use chrono::Utc;

use infra_graph_kernel::sync::{CancellationToken, SourceScope, StaticDiscoverySource, SyncEngine, SyncOptions};
use infra_graph_kernel::{
    DiscoveredVia, Edge, GraphStore, InMemoryGraphStore, RelationshipType, ResourceKey, ResourceNode, ResourceStatus,
};

fn node(provider: &str, native_id: &str, cost: f64) -> ResourceNode {
    let key = ResourceKey {
        provider: provider.into(),
        account: "111".into(),
        region: "us-east-1".into(),
        resource_type: "ec2-instance".into(),
        native_id: native_id.into(),
    };
    let mut n = ResourceNode::new_discovered(key, native_id, ResourceStatus::Running, Utc::now());
    n.cost_monthly = Some(cost);
    n
}

fn scope(provider: &str) -> SourceScope {
    SourceScope { provider: provider.into(), accounts: vec!["111".into()], regions: vec!["us-east-1".into()] }
}

#[tokio::test]
async fn two_providers_reconcile_independently() {
    let store = Arc::new(InMemoryGraphStore::new());
    let aws = Arc::new(StaticDiscoverySource::new("aws-1", scope("aws"), vec![node("aws", "i-1", 12.0)], vec![], Utc::now()));
    let gcp = Arc::new(StaticDiscoverySource::new("gcp-1", scope("gcp"), vec![node("gcp", "vm-1", 8.0)], vec![], Utc::now()));
    let engine = SyncEngine::new(store.clone(), vec![aws, gcp]);

    let report = engine.sync(&SyncOptions::default(), &CancellationToken::new()).await;

    assert_eq!(report.per_source.len(), 2);
    assert!(report.per_source.iter().all(|r| r.created == 1));
    assert_eq!(store.snapshot_nodes().len(), 2);
}

#[tokio::test]
async fn provider_filter_excludes_other_sources() {
    let store = Arc::new(InMemoryGraphStore::new());
    let aws = Arc::new(StaticDiscoverySource::new("aws-1", scope("aws"), vec![node("aws", "i-1", 12.0)], vec![], Utc::now()));
    let gcp = Arc::new(StaticDiscoverySource::new("gcp-1", scope("gcp"), vec![node("gcp", "vm-1", 8.0)], vec![], Utc::now()));
    let engine = SyncEngine::new(store.clone(), vec![aws, gcp]);

    let mut options = SyncOptions::default();
    options.providers = Some(vec!["aws".to_string()]);
    let report = engine.sync(&options, &CancellationToken::new()).await;

    assert_eq!(report.per_source.len(), 1);
    assert_eq!(report.per_source[0].source_id, "aws-1");
}

#[tokio::test]
async fn edge_between_two_discovered_nodes_is_upserted() {
    let store = Arc::new(InMemoryGraphStore::new());
    let a = node("aws", "i-1", 10.0);
    let b = node("aws", "i-2", 5.0);
    let edge = Edge::new(a.id.clone(), b.id.clone(), RelationshipType::DependsOn, 0.9, DiscoveredVia::ApiField);
    let source = Arc::new(StaticDiscoverySource::new("aws-1", scope("aws"), vec![a, b], vec![edge], Utc::now()));
    let engine = SyncEngine::new(store.clone(), vec![source]);

    let report = engine.sync(&SyncOptions::default(), &CancellationToken::new()).await;

    assert_eq!(report.per_source[0].edge_created, 1);
}

#[tokio::test]
async fn node_outside_all_sources_scope_is_never_disappeared() {
    // A node belonging to a different account than any configured source's
    // scope must survive repeated sync cycles untouched.
    let store = Arc::new(InMemoryGraphStore::new());
    let mut out_of_scope = node("aws", "i-legacy", 3.0);
    out_of_scope.key.account = "999".into();
    store.upsert_nodes(vec![out_of_scope.clone()]).await.unwrap();

    let source = Arc::new(StaticDiscoverySource::new("aws-1", scope("aws"), vec![], vec![], Utc::now()));
    let engine = SyncEngine::new(store.clone(), vec![source]);

    let mut options = SyncOptions::default();
    options.disappearance_grace_period = chrono::Duration::zero();
    let report = engine.sync(&options, &CancellationToken::new()).await;

    assert_eq!(report.per_source[0].disappeared, 0);
    let surviving = store.snapshot_nodes();
    assert!(surviving.iter().any(|n| n.id == out_of_scope.id && n.status == ResourceStatus::Running));
}

#[tokio::test]
async fn cancelling_before_discover_returns_cancelled_source_report() {
    let store = Arc::new(InMemoryGraphStore::new());
    let source = Arc::new(StaticDiscoverySource::new("aws-1", scope("aws"), vec![node("aws", "i-1", 1.0)], vec![], Utc::now()));
    let engine = SyncEngine::new(store.clone(), vec![source]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = engine.sync(&SyncOptions::default(), &cancel).await;

    assert!(report.cancelled);
    assert!(report.per_source[0].errors.iter().any(|e| e == "cancelled"));
}
