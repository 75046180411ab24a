//! Snapshots: immutable, point-in-time revisions of the whole graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What triggered a snapshot's creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotTrigger {
    Manual,
    Sync,
    Scheduled,
    Governance,
}

/// An immutable, named revision of the graph at a point in time.
///
/// `node_count`/`edge_count`/`total_cost_monthly` are aggregate counts over
/// the revision set this snapshot points at (invariant 6); the revision set
/// itself is held by the temporal store, not embedded here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub trigger: SnapshotTrigger,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub provider_scope: Option<String>,
    pub node_count: usize,
    pub edge_count: usize,
    pub total_cost_monthly: f64,
}
