//! Relationship edges: typed, confidence-scored connections between nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::node::NodeId;
use crate::canonical::stable_id;

/// Stable identity of an edge, derived from `(source, type, target)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub String);

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed vocabulary of relationship types between resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    DependsOn,
    RoutesTo,
    StoresIn,
    EncryptsWith,
    PublishesTo,
    Triggers,
    BacksUp,
    ReplicatesTo,
    PeersWith,
    Uses,
    Contains,
    Secures,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DependsOn => "depends-on",
            Self::RoutesTo => "routes-to",
            Self::StoresIn => "stores-in",
            Self::EncryptsWith => "encrypts-with",
            Self::PublishesTo => "publishes-to",
            Self::Triggers => "triggers",
            Self::BacksUp => "backs-up",
            Self::ReplicatesTo => "replicates-to",
            Self::PeersWith => "peers-with",
            Self::Uses => "uses",
            Self::Contains => "contains",
            Self::Secures => "secures",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provenance label describing how an edge was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveredVia {
    ApiField,
    ConfigScan,
    ArnReference,
    Heuristic,
    UserAsserted,
}

/// A directed, typed relationship between two resource nodes.
///
/// Implements `Ord` over `(source, target, relationship_type)` so edge sets
/// have a canonical iteration order, following the graph store's
/// determinism guarantee for node/edge ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    pub discovered_via: DiscoveredVia,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Edge {
    /// Construct an edge, deriving its stable id from the identity tuple.
    pub fn new(
        source: NodeId,
        target: NodeId,
        relationship_type: RelationshipType,
        confidence: f64,
        discovered_via: DiscoveredVia,
    ) -> Self {
        let identity = (source.0.clone(), relationship_type.as_str(), target.0.clone());
        let id = EdgeId(stable_id("edge", &identity));
        Self {
            id,
            source,
            target,
            relationship_type,
            confidence: confidence.clamp(0.0, 1.0),
            discovered_via,
            metadata: BTreeMap::new(),
        }
    }
}

impl Eq for Edge {}

impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.source, &self.target, self.relationship_type).cmp(&(
            &other.source,
            &other.target,
            other.relationship_type,
        ))
    }
}
