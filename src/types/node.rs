//! Resource nodes: the vertices of the infrastructure graph.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::stable_id;

/// Stable identity of a resource node, derived from its identity tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Wrap a raw id string (used when loading from storage).
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity tuple that determines a node's stable id. Re-observing the
/// same resource (same tuple) always resolves to the same `NodeId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceKey {
    pub provider: String,
    pub account: String,
    pub region: String,
    pub resource_type: String,
    pub native_id: String,
}

impl ResourceKey {
    /// Derive the stable node id for this identity tuple.
    pub fn node_id(&self) -> NodeId {
        NodeId(stable_id("node", self))
    }
}

/// Lifecycle status of a resource node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Running,
    Stopped,
    Pending,
    Terminated,
    Error,
    Unknown,
}

impl ResourceStatus {
    /// Parse a status from its wire string. Unknown strings fall back to `Unknown`.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            "pending" => Self::Pending,
            "terminated" => Self::Terminated,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl Default for ResourceStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Pending => "pending",
            Self::Terminated => "terminated",
            Self::Error => "error",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A single cloud resource in the graph.
///
/// `version` is bumped only by the store's `upsert_nodes`, never set
/// directly, so invariant 3 (monotonic version) cannot be violated by a
/// caller constructing a node by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: NodeId,
    pub key: ResourceKey,
    pub name: String,
    pub status: ResourceStatus,
    pub tags: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub cost_monthly: Option<f64>,
    pub owner: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub version: u64,
}

impl ResourceNode {
    /// Construct a freshly discovered node (version 1, all timestamps equal).
    pub fn new_discovered(
        key: ResourceKey,
        name: impl Into<String>,
        status: ResourceStatus,
        now: DateTime<Utc>,
    ) -> Self {
        let id = key.node_id();
        Self {
            id,
            key,
            name: name.into(),
            status,
            tags: BTreeMap::new(),
            metadata: BTreeMap::new(),
            cost_monthly: None,
            owner: None,
            created_at: None,
            discovered_at: now,
            updated_at: now,
            last_seen_at: now,
            version: 1,
        }
    }

    /// The set of observable fields as `(name, value)` pairs, used by the
    /// store's diffing logic and by the drift detector. `version` and the
    /// three system timestamps are not observable fields.
    pub fn observable_fields(&self) -> BTreeMap<&'static str, serde_json::Value> {
        let mut fields = BTreeMap::new();
        fields.insert("name", serde_json::json!(self.name));
        fields.insert("status", serde_json::json!(self.status.to_string()));
        fields.insert("tags", serde_json::json!(self.tags));
        fields.insert("metadata", serde_json::json!(self.metadata));
        fields.insert("costMonthly", serde_json::json!(self.cost_monthly));
        fields.insert("owner", serde_json::json!(self.owner));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(native_id: &str) -> ResourceKey {
        ResourceKey {
            provider: "aws".into(),
            account: "111".into(),
            region: "us-east-1".into(),
            resource_type: "ec2-instance".into(),
            native_id: native_id.into(),
        }
    }

    #[test]
    fn same_identity_yields_same_id() {
        assert_eq!(key("i-1").node_id(), key("i-1").node_id());
        assert_ne!(key("i-1").node_id(), key("i-2").node_id());
    }

    #[test]
    fn fresh_node_has_equal_timestamps_and_version_one() {
        let now = Utc::now();
        let node = ResourceNode::new_discovered(key("i-1"), "web-1", ResourceStatus::Running, now);
        assert_eq!(node.discovered_at, now);
        assert_eq!(node.updated_at, now);
        assert_eq!(node.last_seen_at, now);
        assert_eq!(node.version, 1);
    }

    #[test]
    fn status_from_str_defaults_unknown() {
        assert_eq!(ResourceStatus::from_str("running"), ResourceStatus::Running);
        assert_eq!(ResourceStatus::from_str("bogus"), ResourceStatus::Unknown);
    }
}
