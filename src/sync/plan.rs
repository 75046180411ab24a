//! Write plan construction: diffs discovery output against previously
//! known, owned state and produces the set of upserts, disappearances,
//! reappearances, and edge removals for one source's cycle (§4.2 step 3).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{ChangeRecord, ChangeType, Edge, EdgeId, NodeId, ResourceNode, ResourceStatus};

/// Per-field differences between a previously stored node and the freshly
/// discovered value for the same id, as `(field, previous, new)` triples.
/// Dotted paths for tags/metadata, top-level names otherwise — mirrors the
/// drift detector's field naming so change records and drift reports agree.
fn diff_fields(stored: &ResourceNode, discovered: &ResourceNode) -> Vec<(String, Option<serde_json::Value>, Option<serde_json::Value>)> {
    let mut diffs = Vec::new();

    if stored.name != discovered.name {
        diffs.push(("name".into(), Some(serde_json::json!(stored.name)), Some(serde_json::json!(discovered.name))));
    }
    if stored.status != discovered.status {
        diffs.push(("status".into(), Some(serde_json::json!(stored.status)), Some(serde_json::json!(discovered.status))));
    }
    if stored.cost_monthly != discovered.cost_monthly {
        diffs.push(("costMonthly".into(), stored.cost_monthly.map(|v| serde_json::json!(v)), discovered.cost_monthly.map(|v| serde_json::json!(v))));
    }
    if stored.owner != discovered.owner {
        diffs.push(("owner".into(), stored.owner.clone().map(|v| serde_json::json!(v)), discovered.owner.clone().map(|v| serde_json::json!(v))));
    }

    let mut tag_keys: BTreeSet<&String> = stored.tags.keys().collect();
    tag_keys.extend(discovered.tags.keys());
    for key in tag_keys {
        let prev = stored.tags.get(key);
        let next = discovered.tags.get(key);
        if prev != next {
            diffs.push((format!("tags.{key}"), prev.map(|v| serde_json::json!(v)), next.map(|v| serde_json::json!(v))));
        }
    }

    let mut meta_keys: BTreeSet<&String> = stored.metadata.keys().collect();
    meta_keys.extend(discovered.metadata.keys());
    for key in meta_keys {
        let prev = stored.metadata.get(key);
        let next = discovered.metadata.get(key);
        if prev != next {
            diffs.push((format!("metadata.{key}"), prev.cloned(), next.cloned()));
        }
    }

    diffs
}

/// The set of mutations computed for one source's discovery cycle, ready
/// to be handed to the serialized writer.
#[derive(Debug, Default)]
pub struct WritePlan {
    /// Nodes to upsert: freshly discovered, or previously terminated and
    /// now reappeared (status already updated to the discovered value).
    pub node_upserts: Vec<ResourceNode>,
    /// Owned stored nodes to mark `terminated` (grace period elapsed).
    pub node_disappearances: Vec<ResourceNode>,
    /// Edges to upsert (all discovered edges).
    pub edge_upserts: Vec<Edge>,
    /// Owned edges no longer discovered; both endpoints were in scope.
    pub edge_removals: Vec<EdgeId>,
    /// Change records for this plan, in (source-timestamp, source-id) order
    /// relative to other plans, nodes-then-edges-then-changes within one.
    pub changes: Vec<ChangeRecord>,
}

/// Build a write plan for one source's cycle.
///
/// `owned_stored_nodes` and `owned_stored_edges` must already be scoped to
/// this source's ownership (provider/account/region) — the engine is
/// responsible for that filtering so a source can never cause disappearance
/// of resources outside its scope (invariant: ownership).
pub fn build_plan(
    discovered_nodes: &[ResourceNode],
    discovered_edges: &[Edge],
    owned_stored_nodes: &[ResourceNode],
    owned_stored_edges: &[Edge],
    grace_period: chrono::Duration,
    now: DateTime<Utc>,
    detection_source: &str,
    correlation_id: Uuid,
) -> WritePlan {
    let mut plan = WritePlan::default();
    let discovered_ids: BTreeSet<NodeId> = discovered_nodes.iter().map(|n| n.id.clone()).collect();
    let stored_by_id: BTreeMap<NodeId, &ResourceNode> =
        owned_stored_nodes.iter().map(|n| (n.id.clone(), n)).collect();

    for node in discovered_nodes {
        match stored_by_id.get(&node.id) {
            Some(existing) if existing.status == ResourceStatus::Terminated => {
                let mut reappeared = node.clone();
                reappeared.discovered_at = existing.discovered_at;
                plan.changes.push(ChangeRecord::lifecycle_event(
                    node.id.clone(),
                    ChangeType::NodeReappeared,
                    now,
                    detection_source,
                    correlation_id,
                ));
                plan.node_upserts.push(reappeared);
            }
            Some(existing) => {
                for (field, previous_value, new_value) in diff_fields(existing, node) {
                    plan.changes.push(ChangeRecord::field_change(
                        node.id.clone(),
                        ChangeType::NodeDrifted,
                        field,
                        previous_value,
                        new_value,
                        now,
                        detection_source,
                        correlation_id,
                    ));
                }
                plan.node_upserts.push(node.clone());
            }
            None => {
                plan.changes.push(ChangeRecord::lifecycle_event(
                    node.id.clone(),
                    ChangeType::NodeCreated,
                    now,
                    detection_source,
                    correlation_id,
                ));
                plan.node_upserts.push(node.clone());
            }
        }
    }

    for stored in owned_stored_nodes {
        if discovered_ids.contains(&stored.id) || stored.status == ResourceStatus::Terminated {
            continue;
        }
        if stored.last_seen_at <= now - grace_period {
            let mut disappeared = stored.clone();
            disappeared.status = ResourceStatus::Terminated;
            disappeared.updated_at = now;
            plan.changes.push(ChangeRecord::lifecycle_event(
                stored.id.clone(),
                ChangeType::NodeDisappeared,
                now,
                detection_source,
                correlation_id,
            ));
            plan.node_disappearances.push(disappeared);
        }
    }

    plan.edge_upserts = discovered_edges.to_vec();
    let discovered_edge_ids: BTreeSet<EdgeId> = discovered_edges.iter().map(|e| e.id.clone()).collect();
    for stored_edge in owned_stored_edges {
        if !discovered_edge_ids.contains(&stored_edge.id) {
            plan.edge_removals.push(stored_edge.id.clone());
            plan.changes.push(ChangeRecord::lifecycle_event(
                stored_edge.source.clone(),
                ChangeType::EdgeRemoved,
                now,
                detection_source,
                correlation_id,
            ));
        }
    }

    plan
}
