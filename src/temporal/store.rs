//! In-memory temporal store. Snapshots are kept in a time-ordered
//! `VecDeque`, the same bounded-ordered-version-history shape used by
//! mainstream embedded snapshot managers; node/edge revisions are
//! content-addressed so an unchanged resource is never duplicated across
//! snapshots (§4.3 "Internal representation").

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::canonical::canonical_hash_hex;
use crate::store::GraphStore;
use crate::sync::{CancellationToken, SyncEngine, SyncOptions, SyncReport};
use crate::types::{Edge, EdgeId, NodeId, ResourceNode, Snapshot, SnapshotTrigger};

/// Failures raised by the temporal store. Per §7, C4 errors are always
/// fatal to the current operation — there is no retry path here.
#[derive(Debug, Error)]
pub enum TemporalError {
    #[error("snapshot not found: {0}")]
    NotFound(Uuid),
    #[error("underlying store error: {0}")]
    Store(String),
}

impl From<TemporalError> for crate::error::KernelError {
    fn from(e: TemporalError) -> Self {
        use crate::error::Kind;
        let kind = match &e {
            TemporalError::NotFound(_) => Kind::NotFound,
            TemporalError::Store(_) => Kind::Permanent,
        };
        crate::error::KernelError::with_source(kind, e.to_string(), e)
    }
}

/// Filter for `list_snapshots`.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    pub trigger: Option<SnapshotTrigger>,
    pub provider: Option<String>,
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// One entry in a prune request: snapshots to never drop.
#[derive(Debug, Clone, Default)]
pub struct PruneOptions {
    pub max_snapshots: Option<usize>,
    pub max_age: Option<chrono::Duration>,
    pub protect: Vec<Uuid>,
}

/// One node's state at one historical snapshot.
#[derive(Debug, Clone)]
pub struct NodeHistoryEntry {
    pub snapshot_id: Uuid,
    pub snapshot_timestamp: DateTime<Utc>,
    pub node: ResourceNode,
}

/// One edge's state at one historical snapshot.
#[derive(Debug, Clone)]
pub struct EdgeHistoryEntry {
    pub snapshot_id: Uuid,
    pub snapshot_timestamp: DateTime<Utc>,
    pub edge: Edge,
}

/// A node whose observable fields changed between two snapshots.
#[derive(Debug, Clone)]
pub struct NodeChange {
    pub node_id: NodeId,
    pub changed_fields: Vec<String>,
    pub before: ResourceNode,
    pub after: ResourceNode,
}

/// The result of diffing two snapshots.
#[derive(Debug, Clone, Default)]
pub struct SnapshotDiff {
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
    pub changed_nodes: Vec<NodeChange>,
    pub added_edges: Vec<EdgeId>,
    pub removed_edges: Vec<EdgeId>,
    pub cost_delta: f64,
}

struct SnapshotRecord {
    snapshot: Snapshot,
    node_revisions: BTreeMap<NodeId, String>,
    edge_revisions: BTreeMap<EdgeId, String>,
}

#[derive(Default)]
struct Inner {
    snapshots: VecDeque<SnapshotRecord>,
    node_revision_store: BTreeMap<String, ResourceNode>,
    edge_revision_store: BTreeMap<String, Edge>,
}

fn node_revision_id(node: &ResourceNode) -> String {
    canonical_hash_hex(&(node.id.0.as_str(), node.observable_fields()))
}

fn edge_revision_id(edge: &Edge) -> String {
    canonical_hash_hex(&(edge.id.0.as_str(), edge.confidence.to_bits(), &edge.metadata))
}

/// Append-only, content-addressed snapshot history layered over a
/// `GraphStore`. `create_snapshot` and `prune_snapshots` share one mutex so
/// they are mutually exclusive with each other and with each other's
/// in-flight calls (§4.3 "Concurrency"); reads never take the mutex.
pub struct InMemoryTemporalStore<S: GraphStore> {
    store: std::sync::Arc<S>,
    inner: Mutex<Inner>,
}

impl<S: GraphStore> InMemoryTemporalStore<S> {
    pub fn new(store: std::sync::Arc<S>) -> Self {
        Self { store, inner: Mutex::new(Inner::default()) }
    }

    /// Capture the current store's nodes/edges into a new immutable
    /// revision set. Unchanged nodes reuse their prior revision reference.
    pub async fn create_snapshot(
        &self,
        trigger: SnapshotTrigger,
        label: Option<String>,
        provider_scope: Option<String>,
    ) -> Result<Snapshot, TemporalError>
    where
        S::Error: std::fmt::Display,
    {
        let nodes = self
            .store
            .query_nodes(&crate::store::NodeFilter {
                provider: provider_scope.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| TemporalError::Store(e.to_string()))?;
        let edges = self
            .store
            .query_edges(&crate::store::EdgeFilter::default())
            .await
            .map_err(|e| TemporalError::Store(e.to_string()))?;

        let mut inner = self.inner.lock().await;

        let mut node_revisions = BTreeMap::new();
        let mut total_cost = 0.0;
        for node in &nodes {
            let rev_id = node_revision_id(node);
            inner.node_revision_store.entry(rev_id.clone()).or_insert_with(|| node.clone());
            node_revisions.insert(node.id.clone(), rev_id);
            total_cost += node.cost_monthly.unwrap_or(0.0);
        }

        let mut edge_revisions = BTreeMap::new();
        for edge in &edges {
            let rev_id = edge_revision_id(edge);
            inner.edge_revision_store.entry(rev_id.clone()).or_insert_with(|| edge.clone());
            edge_revisions.insert(edge.id.clone(), rev_id);
        }

        let mut created_at = Utc::now();
        if let Some(last) = inner.snapshots.back() {
            if created_at <= last.snapshot.created_at {
                created_at = last.snapshot.created_at + chrono::Duration::nanoseconds(1);
            }
        }

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            trigger,
            label,
            created_at,
            provider_scope,
            node_count: nodes.len(),
            edge_count: edges.len(),
            total_cost_monthly: total_cost,
        };

        inner.snapshots.push_back(SnapshotRecord {
            snapshot: snapshot.clone(),
            node_revisions,
            edge_revisions,
        });

        Ok(snapshot)
    }

    pub async fn get_snapshot(&self, id: Uuid) -> Option<Snapshot> {
        self.inner
            .lock()
            .await
            .snapshots
            .iter()
            .find(|r| r.snapshot.id == id)
            .map(|r| r.snapshot.clone())
    }

    pub async fn list_snapshots(&self, filter: &SnapshotFilter) -> Vec<Snapshot> {
        let inner = self.inner.lock().await;
        let mut result: Vec<Snapshot> = inner
            .snapshots
            .iter()
            .map(|r| &r.snapshot)
            .filter(|s| filter.trigger.map_or(true, |t| s.trigger == t))
            .filter(|s| filter.provider.is_none() || s.provider_scope == filter.provider)
            .filter(|s| filter.before.map_or(true, |t| s.created_at <= t))
            .filter(|s| filter.after.map_or(true, |t| s.created_at >= t))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        result
    }

    pub async fn get_nodes_at_snapshot(&self, id: Uuid) -> Result<Vec<ResourceNode>, TemporalError> {
        let inner = self.inner.lock().await;
        let record = inner.snapshots.iter().find(|r| r.snapshot.id == id).ok_or(TemporalError::NotFound(id))?;
        Ok(record
            .node_revisions
            .values()
            .filter_map(|rev| inner.node_revision_store.get(rev).cloned())
            .collect())
    }

    pub async fn get_edges_at_snapshot(&self, id: Uuid) -> Result<Vec<Edge>, TemporalError> {
        let inner = self.inner.lock().await;
        let record = inner.snapshots.iter().find(|r| r.snapshot.id == id).ok_or(TemporalError::NotFound(id))?;
        Ok(record
            .edge_revisions
            .values()
            .filter_map(|rev| inner.edge_revision_store.get(rev).cloned())
            .collect())
    }

    pub async fn get_snapshot_at(&self, timestamp: DateTime<Utc>) -> Option<Snapshot> {
        let inner = self.inner.lock().await;
        inner
            .snapshots
            .iter()
            .filter(|r| r.snapshot.created_at <= timestamp)
            .max_by_key(|r| r.snapshot.created_at)
            .map(|r| r.snapshot.clone())
    }

    /// Diff two snapshots. `diff(a, b).addedNodes == diff(b, a).removedNodes`
    /// and `costDelta` is antisymmetric, by construction below.
    pub async fn diff_snapshots(&self, a: Uuid, b: Uuid) -> Result<SnapshotDiff, TemporalError> {
        let inner = self.inner.lock().await;
        let ra = inner.snapshots.iter().find(|r| r.snapshot.id == a).ok_or(TemporalError::NotFound(a))?;
        let rb = inner.snapshots.iter().find(|r| r.snapshot.id == b).ok_or(TemporalError::NotFound(b))?;

        let mut diff = SnapshotDiff::default();
        for (node_id, rev_b) in &rb.node_revisions {
            match ra.node_revisions.get(node_id) {
                None => diff.added_nodes.push(node_id.clone()),
                Some(rev_a) if rev_a != rev_b => {
                    let before = inner.node_revision_store.get(rev_a).cloned();
                    let after = inner.node_revision_store.get(rev_b).cloned();
                    if let (Some(before), Some(after)) = (before, after) {
                        let changed_fields: Vec<String> = before
                            .observable_fields()
                            .iter()
                            .filter(|(k, v)| after.observable_fields().get(*k) != Some(v))
                            .map(|(k, _)| k.to_string())
                            .collect();
                        diff.cost_delta += after.cost_monthly.unwrap_or(0.0) - before.cost_monthly.unwrap_or(0.0);
                        diff.changed_nodes.push(NodeChange { node_id: node_id.clone(), changed_fields, before, after });
                    }
                }
                _ => {}
            }
        }
        for node_id in ra.node_revisions.keys() {
            if !rb.node_revisions.contains_key(node_id) {
                diff.removed_nodes.push(node_id.clone());
            }
        }
        for edge_id in rb.edge_revisions.keys() {
            if !ra.edge_revisions.contains_key(edge_id) {
                diff.added_edges.push(edge_id.clone());
            }
        }
        for edge_id in ra.edge_revisions.keys() {
            if !rb.edge_revisions.contains_key(edge_id) {
                diff.removed_edges.push(edge_id.clone());
            }
        }
        Ok(diff)
    }

    pub async fn get_node_history(&self, node_id: &NodeId, limit: Option<usize>) -> Vec<NodeHistoryEntry> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<NodeHistoryEntry> = inner
            .snapshots
            .iter()
            .rev()
            .filter_map(|r| {
                let rev = r.node_revisions.get(node_id)?;
                let node = inner.node_revision_store.get(rev)?;
                Some(NodeHistoryEntry {
                    snapshot_id: r.snapshot.id,
                    snapshot_timestamp: r.snapshot.created_at,
                    node: node.clone(),
                })
            })
            .collect();
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        entries
    }

    pub async fn get_edge_history(&self, edge_id: &EdgeId, limit: Option<usize>) -> Vec<EdgeHistoryEntry> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<EdgeHistoryEntry> = inner
            .snapshots
            .iter()
            .rev()
            .filter_map(|r| {
                let rev = r.edge_revisions.get(edge_id)?;
                let edge = inner.edge_revision_store.get(rev)?;
                Some(EdgeHistoryEntry {
                    snapshot_id: r.snapshot.id,
                    snapshot_timestamp: r.snapshot.created_at,
                    edge: edge.clone(),
                })
            })
            .collect();
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        entries
    }

    /// Drop oldest snapshots until both `max_snapshots` and `max_age` are
    /// satisfied. Never drops a snapshot in `protect`. Returns the count
    /// pruned. Mutually exclusive with `create_snapshot` via the shared lock.
    pub async fn prune_snapshots(&self, options: &PruneOptions) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut pruned = 0;

        loop {
            let should_prune_for_count = options
                .max_snapshots
                .map_or(false, |max| inner.snapshots.len() > max);
            let should_prune_for_age = options.max_age.map_or(false, |max_age| {
                inner.snapshots.front().map_or(false, |r| now - r.snapshot.created_at > max_age)
            });
            if !should_prune_for_count && !should_prune_for_age {
                break;
            }
            let droppable_index = inner.snapshots.iter().position(|r| !options.protect.contains(&r.snapshot.id));
            match droppable_index {
                Some(idx) => {
                    inner.snapshots.remove(idx);
                    pruned += 1;
                }
                None => break,
            }
        }
        pruned
    }

    /// Convenience combining C3 and C4: run one sync cycle against `engine`,
    /// snapshot the result, then apply retention. The snapshot is labelled
    /// and tagged `SnapshotTrigger::Sync` regardless of how the cycle was
    /// triggered, since it documents a sync outcome either way.
    pub async fn sync_with_snapshot(
        &self,
        engine: &SyncEngine<S>,
        sync_options: &SyncOptions,
        cancel: &CancellationToken,
        label: Option<String>,
        retention: &PruneOptions,
    ) -> Result<(SyncReport, Snapshot), TemporalError>
    where
        S: 'static,
        S::Error: std::fmt::Display,
    {
        let report = engine.sync(sync_options, cancel).await;
        let snapshot = self.create_snapshot(SnapshotTrigger::Sync, label, None).await?;
        self.prune_snapshots(retention).await;
        Ok((report, snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGraphStore;
    use crate::types::{ResourceKey, ResourceStatus};

    fn node(native_id: &str, cost: f64) -> ResourceNode {
        let key = ResourceKey {
            provider: "aws".into(),
            account: "1".into(),
            region: "us-east-1".into(),
            resource_type: "ec2".into(),
            native_id: native_id.into(),
        };
        let mut n = ResourceNode::new_discovered(key, native_id, ResourceStatus::Running, Utc::now());
        n.cost_monthly = Some(cost);
        n
    }

    #[tokio::test]
    async fn fresh_snapshot_reports_aggregate_counts() {
        let store = std::sync::Arc::new(InMemoryGraphStore::new());
        store.upsert_nodes(vec![node("i-1", 10.0)]).await.unwrap();
        let temporal = InMemoryTemporalStore::new(store);
        let snap = temporal.create_snapshot(SnapshotTrigger::Sync, None, None).await.unwrap();
        assert_eq!(snap.node_count, 1);
        assert_eq!(snap.total_cost_monthly, 10.0);
    }

    #[tokio::test]
    async fn diff_reports_cost_delta() {
        let store = std::sync::Arc::new(InMemoryGraphStore::new());
        let n = node("i-1", 10.0);
        let id = n.id.clone();
        store.upsert_nodes(vec![n]).await.unwrap();
        let temporal = InMemoryTemporalStore::new(store.clone());
        let s1 = temporal.create_snapshot(SnapshotTrigger::Sync, None, None).await.unwrap();

        let mut updated = node("i-1", 20.0);
        updated.id = id;
        store.upsert_nodes(vec![updated]).await.unwrap();
        let s2 = temporal.create_snapshot(SnapshotTrigger::Sync, None, None).await.unwrap();

        let diff = temporal.diff_snapshots(s1.id, s2.id).await.unwrap();
        assert_eq!(diff.changed_nodes.len(), 1);
        assert_eq!(diff.changed_nodes[0].changed_fields, vec!["costMonthly".to_string()]);
        assert_eq!(diff.cost_delta, 10.0);

        let reverse = temporal.diff_snapshots(s2.id, s1.id).await.unwrap();
        assert_eq!(reverse.cost_delta, -10.0);
    }

    #[tokio::test]
    async fn snapshot_is_immutable_after_live_mutation() {
        let store = std::sync::Arc::new(InMemoryGraphStore::new());
        let n = node("i-1", 10.0);
        let id = n.id.clone();
        store.upsert_nodes(vec![n]).await.unwrap();
        let temporal = InMemoryTemporalStore::new(store.clone());
        let s1 = temporal.create_snapshot(SnapshotTrigger::Sync, None, None).await.unwrap();

        let mut updated = node("i-1", 999.0);
        updated.id = id;
        store.upsert_nodes(vec![updated]).await.unwrap();

        let nodes = temporal.get_nodes_at_snapshot(s1.id).await.unwrap();
        assert_eq!(nodes[0].cost_monthly, Some(10.0));
    }

    #[tokio::test]
    async fn sync_with_snapshot_runs_sync_snapshots_and_prunes() {
        use crate::sync::{SourceScope, StaticDiscoverySource};

        let store = std::sync::Arc::new(InMemoryGraphStore::new());
        let temporal = InMemoryTemporalStore::new(store.clone());

        // Two prior manual snapshots already at the retention limit.
        temporal.create_snapshot(SnapshotTrigger::Manual, None, None).await.unwrap();
        temporal.create_snapshot(SnapshotTrigger::Manual, None, None).await.unwrap();

        let scope = SourceScope { provider: "aws".into(), accounts: vec!["1".into()], regions: vec!["us-east-1".into()] };
        let source = std::sync::Arc::new(StaticDiscoverySource::new("s1", scope, vec![node("i-1", 5.0)], vec![], Utc::now()));
        let engine = SyncEngine::new(store.clone(), vec![source]);

        let (report, snapshot) = temporal
            .sync_with_snapshot(
                &engine,
                &SyncOptions::default(),
                &CancellationToken::new(),
                Some("cycle-1".into()),
                &PruneOptions { max_snapshots: Some(2), max_age: None, protect: vec![] },
            )
            .await
            .unwrap();

        assert_eq!(report.per_source[0].created, 1);
        assert_eq!(snapshot.label.as_deref(), Some("cycle-1"));
        assert_eq!(temporal.list_snapshots(&SnapshotFilter::default()).await.len(), 2);
    }

    #[tokio::test]
    async fn prune_respects_protect_list() {
        let store = std::sync::Arc::new(InMemoryGraphStore::new());
        let temporal = InMemoryTemporalStore::new(store);
        let s1 = temporal.create_snapshot(SnapshotTrigger::Manual, None, None).await.unwrap();
        let _s2 = temporal.create_snapshot(SnapshotTrigger::Manual, None, None).await.unwrap();
        let _s3 = temporal.create_snapshot(SnapshotTrigger::Manual, None, None).await.unwrap();

        let pruned = temporal
            .prune_snapshots(&PruneOptions { max_snapshots: Some(1), protect: vec![s1.id], ..Default::default() })
            .await;
        assert_eq!(pruned, 1);
        assert!(temporal.get_snapshot(s1.id).await.is_some());
    }
}
