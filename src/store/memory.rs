//! In-memory graph store: `BTreeMap`-backed, deterministic iteration order,
//! guarded by a single `RwLock` so it can be shared behind an `Arc` across
//! the sync engine's serialized writer and concurrent readers.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use regex_lite::Regex;

use super::{
    ChangeFilter, Direction, EdgeFilter, EdgeUpsertResult, GraphStore, NodeFilter, NodeOrderBy,
    StoreError, UpsertOutcome,
};
use crate::types::{ChangeRecord, Edge, EdgeId, NodeId, ResourceNode};

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<NodeId, ResourceNode>,
    edges: BTreeMap<EdgeId, Edge>,
    out_index: BTreeMap<NodeId, BTreeSet<EdgeId>>,
    in_index: BTreeMap<NodeId, BTreeSet<EdgeId>>,
    changes: Vec<ChangeRecord>,
}

/// A `GraphStore` implementation backed by in-process `BTreeMap`s.
/// Used in tests and as the reference implementation the temporal store,
/// drift detector, and governance pipeline are exercised against.
pub struct InMemoryGraphStore {
    inner: RwLock<Inner>,
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Snapshot of all current nodes, ordered by id. Used by the temporal
    /// store when creating a new revision set.
    pub fn snapshot_nodes(&self) -> Vec<ResourceNode> {
        self.inner.read().nodes.values().cloned().collect()
    }

    /// Snapshot of all current edges, ordered by id.
    pub fn snapshot_edges(&self) -> Vec<Edge> {
        self.inner.read().edges.values().cloned().collect()
    }
}

fn merge_node(existing: &mut ResourceNode, incoming: &ResourceNode) -> bool {
    let mut changed = false;
    if existing.name != incoming.name {
        existing.name = incoming.name.clone();
        changed = true;
    }
    if existing.status != incoming.status {
        existing.status = incoming.status;
        changed = true;
    }
    if existing.cost_monthly != incoming.cost_monthly {
        existing.cost_monthly = incoming.cost_monthly;
        changed = true;
    }
    if existing.owner != incoming.owner {
        existing.owner = incoming.owner.clone();
        changed = true;
    }
    for (k, v) in &incoming.tags {
        if existing.tags.get(k) != Some(v) {
            existing.tags.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    for (k, v) in &incoming.metadata {
        if existing.metadata.get(k) != Some(v) {
            existing.metadata.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    existing.last_seen_at = existing.last_seen_at.max(incoming.last_seen_at);
    existing.updated_at = if changed {
        incoming.updated_at.max(existing.updated_at)
    } else {
        existing.updated_at
    };
    changed
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    type Error = StoreError;

    async fn upsert_nodes(
        &self,
        nodes: Vec<ResourceNode>,
    ) -> Result<Vec<(NodeId, UpsertOutcome)>, Self::Error> {
        let mut inner = self.inner.write();
        let mut results = Vec::with_capacity(nodes.len());
        for incoming in nodes {
            match inner.nodes.get_mut(&incoming.id) {
                Some(existing) => {
                    if merge_node(existing, &incoming) {
                        existing.version += 1;
                        results.push((existing.id.clone(), UpsertOutcome::Updated));
                    } else {
                        results.push((existing.id.clone(), UpsertOutcome::Unchanged));
                    }
                }
                None => {
                    let id = incoming.id.clone();
                    inner.nodes.insert(id.clone(), incoming);
                    results.push((id, UpsertOutcome::Created));
                }
            }
        }
        Ok(results)
    }

    async fn upsert_edges(&self, edges: Vec<Edge>) -> Result<Vec<EdgeUpsertResult>, Self::Error> {
        let mut inner = self.inner.write();
        let mut results = Vec::with_capacity(edges.len());
        for edge in edges {
            if !inner.nodes.contains_key(&edge.source) || !inner.nodes.contains_key(&edge.target) {
                results.push(EdgeUpsertResult::MissingEndpoint { edge_id: edge.id });
                continue;
            }
            let outcome = if inner.edges.contains_key(&edge.id) {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Created
            };
            inner
                .out_index
                .entry(edge.source.clone())
                .or_default()
                .insert(edge.id.clone());
            inner
                .in_index
                .entry(edge.target.clone())
                .or_default()
                .insert(edge.id.clone());
            inner.edges.insert(edge.id.clone(), edge);
            results.push(EdgeUpsertResult::Applied(outcome));
        }
        Ok(results)
    }

    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<ResourceNode>, Self::Error> {
        let inner = self.inner.read();
        let name_re = match &filter.name_matches_regex {
            Some(pattern) => {
                Some(Regex::new(pattern).map_err(|e| StoreError::InvalidInput(e.to_string()))?)
            }
            None => None,
        };
        let mut matched: Vec<ResourceNode> = inner
            .nodes
            .values()
            .filter(|n| filter.provider.as_deref().map_or(true, |p| n.key.provider == p))
            .filter(|n| filter.account.as_deref().map_or(true, |a| n.key.account == a))
            .filter(|n| filter.region.as_deref().map_or(true, |r| n.key.region == r))
            .filter(|n| {
                filter
                    .resource_type
                    .as_deref()
                    .map_or(true, |t| n.key.resource_type == t)
            })
            .filter(|n| filter.status.map_or(true, |s| n.status == s))
            .filter(|n| {
                filter
                    .tag_equals
                    .as_ref()
                    .map_or(true, |(k, v)| n.tags.get(k) == Some(v))
            })
            .filter(|n| {
                filter
                    .metadata_equals
                    .as_ref()
                    .map_or(true, |(k, v)| n.metadata.get(k) == Some(v))
            })
            .filter(|n| {
                filter
                    .id_in
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&n.id))
            })
            .filter(|n| name_re.as_ref().map_or(true, |re| re.is_match(&n.name)))
            .cloned()
            .collect();

        match filter.order_by {
            Some(NodeOrderBy::Id) => matched.sort_by(|a, b| a.id.cmp(&b.id)),
            Some(NodeOrderBy::Name) => matched.sort_by(|a, b| a.name.cmp(&b.name)),
            Some(NodeOrderBy::UpdatedAt) => matched.sort_by(|a, b| a.updated_at.cmp(&b.updated_at)),
            None => {}
        }
        Ok(matched)
    }

    async fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>, Self::Error> {
        let inner = self.inner.read();
        Ok(inner
            .edges
            .values()
            .filter(|e| filter.source.as_ref().map_or(true, |s| &e.source == s))
            .filter(|e| filter.target.as_ref().map_or(true, |t| &e.target == t))
            .filter(|e| {
                filter
                    .relationship_type
                    .map_or(true, |t| e.relationship_type == t)
            })
            .filter(|e| filter.min_confidence.map_or(true, |c| e.confidence >= c))
            .cloned()
            .collect())
    }

    async fn get_edges_for_node(
        &self,
        node_id: &NodeId,
        direction: Direction,
    ) -> Result<Vec<Edge>, Self::Error> {
        let inner = self.inner.read();
        let mut ids: BTreeSet<EdgeId> = BTreeSet::new();
        if matches!(direction, Direction::Out | Direction::Both) {
            if let Some(set) = inner.out_index.get(node_id) {
                ids.extend(set.iter().cloned());
            }
        }
        if matches!(direction, Direction::In | Direction::Both) {
            if let Some(set) = inner.in_index.get(node_id) {
                ids.extend(set.iter().cloned());
            }
        }
        Ok(ids.into_iter().filter_map(|id| inner.edges.get(&id).cloned()).collect())
    }

    async fn get_neighbors(
        &self,
        node_id: &NodeId,
        depth: usize,
        direction: Direction,
    ) -> Result<(Vec<ResourceNode>, Vec<Edge>), Self::Error> {
        let inner = self.inner.read();
        let mut visited_nodes: BTreeSet<NodeId> = BTreeSet::new();
        let mut visited_edges: BTreeSet<EdgeId> = BTreeSet::new();
        let mut frontier: Vec<NodeId> = vec![node_id.clone()];
        visited_nodes.insert(node_id.clone());

        for _ in 0..depth {
            let mut next_frontier = Vec::new();
            for current in &frontier {
                let mut ids: BTreeSet<EdgeId> = BTreeSet::new();
                if matches!(direction, Direction::Out | Direction::Both) {
                    if let Some(set) = inner.out_index.get(current) {
                        ids.extend(set.iter().cloned());
                    }
                }
                if matches!(direction, Direction::In | Direction::Both) {
                    if let Some(set) = inner.in_index.get(current) {
                        ids.extend(set.iter().cloned());
                    }
                }
                for edge_id in ids {
                    if let Some(edge) = inner.edges.get(&edge_id) {
                        visited_edges.insert(edge_id.clone());
                        let other = if &edge.source == current {
                            &edge.target
                        } else {
                            &edge.source
                        };
                        if visited_nodes.insert(other.clone()) {
                            next_frontier.push(other.clone());
                        }
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        let nodes = visited_nodes
            .into_iter()
            .filter_map(|id| inner.nodes.get(&id).cloned())
            .collect();
        let edges = visited_edges
            .into_iter()
            .filter_map(|id| inner.edges.get(&id).cloned())
            .collect();
        Ok((nodes, edges))
    }

    async fn append_changes(&self, records: Vec<ChangeRecord>) -> Result<(), Self::Error> {
        let mut inner = self.inner.write();
        inner.changes.extend(records);
        Ok(())
    }

    async fn query_changes(&self, filter: &ChangeFilter) -> Result<Vec<ChangeRecord>, Self::Error> {
        let inner = self.inner.read();
        Ok(inner
            .changes
            .iter()
            .filter(|c| filter.target_id.as_ref().map_or(true, |t| &c.target_id == t))
            .filter(|c| filter.after.map_or(true, |t| c.detected_at >= t))
            .filter(|c| filter.before.map_or(true, |t| c.detected_at <= t))
            .filter(|c| filter.change_type.map_or(true, |t| c.change_type == t))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiscoveredVia, RelationshipType, ResourceKey, ResourceStatus};
    use chrono::Utc;

    fn node(native_id: &str) -> ResourceNode {
        let key = ResourceKey {
            provider: "aws".into(),
            account: "111".into(),
            region: "us-east-1".into(),
            resource_type: "ec2-instance".into(),
            native_id: native_id.into(),
        };
        ResourceNode::new_discovered(key, format!("web-{native_id}"), ResourceStatus::Running, Utc::now())
    }

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let store = InMemoryGraphStore::new();
        let n = node("i-1");
        let id = n.id.clone();
        let outcomes = store.upsert_nodes(vec![n.clone()]).await.unwrap();
        assert_eq!(outcomes[0].1, UpsertOutcome::Created);

        let mut updated = n.clone();
        updated.cost_monthly = Some(42.0);
        let outcomes = store.upsert_nodes(vec![updated]).await.unwrap();
        assert_eq!(outcomes[0].1, UpsertOutcome::Updated);

        let fetched = store
            .query_nodes(&NodeFilter {
                id_in: Some(vec![id]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(fetched[0].version, 2);
    }

    #[tokio::test]
    async fn reupsert_with_same_fields_is_unchanged() {
        let store = InMemoryGraphStore::new();
        let n = node("i-1");
        store.upsert_nodes(vec![n.clone()]).await.unwrap();
        let outcomes = store.upsert_nodes(vec![n]).await.unwrap();
        assert_eq!(outcomes[0].1, UpsertOutcome::Unchanged);
    }

    #[tokio::test]
    async fn edge_with_missing_endpoint_is_rejected() {
        let store = InMemoryGraphStore::new();
        let a = node("i-1");
        store.upsert_nodes(vec![a.clone()]).await.unwrap();
        let edge = Edge::new(
            a.id.clone(),
            NodeId::from_raw("missing"),
            RelationshipType::DependsOn,
            1.0,
            DiscoveredVia::ApiField,
        );
        let results = store.upsert_edges(vec![edge]).await.unwrap();
        assert!(matches!(results[0], EdgeUpsertResult::MissingEndpoint { .. }));
    }

    #[tokio::test]
    async fn get_neighbors_respects_depth() {
        let store = InMemoryGraphStore::new();
        let a = node("i-1");
        let b = node("i-2");
        let c = node("i-3");
        store
            .upsert_nodes(vec![a.clone(), b.clone(), c.clone()])
            .await
            .unwrap();
        store
            .upsert_edges(vec![
                Edge::new(a.id.clone(), b.id.clone(), RelationshipType::DependsOn, 1.0, DiscoveredVia::ApiField),
                Edge::new(b.id.clone(), c.id.clone(), RelationshipType::DependsOn, 1.0, DiscoveredVia::ApiField),
            ])
            .await
            .unwrap();

        let (nodes, _edges) = store.get_neighbors(&a.id, 1, Direction::Out).await.unwrap();
        assert_eq!(nodes.len(), 2);

        let (nodes, _edges) = store.get_neighbors(&a.id, 2, Direction::Out).await.unwrap();
        assert_eq!(nodes.len(), 3);
    }
}
