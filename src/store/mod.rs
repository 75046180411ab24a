//! Graph storage backends: durable typed CRUD plus query API over nodes,
//! edges, and change records. The store is the sole authority for current
//! state (§4.1); callers never mutate a `ResourceNode`'s `version` field
//! directly.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{ChangeRecord, ChangeType, Edge, NodeId, RelationshipType, ResourceNode, ResourceStatus};

/// Outcome of upserting a single node or edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Result of upserting one edge: either the outcome, or a rejection because
/// an endpoint is missing from the store.
#[derive(Debug, Clone)]
pub enum EdgeUpsertResult {
    Applied(UpsertOutcome),
    MissingEndpoint { edge_id: crate::types::EdgeId },
}

/// Direction of traversal relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Both,
}

/// Filter for `query_nodes`. All fields are optional; an absent field
/// imposes no constraint. Results are unordered unless `order_by` is set.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub provider: Option<String>,
    pub account: Option<String>,
    pub region: Option<String>,
    pub resource_type: Option<String>,
    pub status: Option<ResourceStatus>,
    pub tag_equals: Option<(String, String)>,
    pub metadata_equals: Option<(String, serde_json::Value)>,
    pub id_in: Option<Vec<NodeId>>,
    pub name_matches_regex: Option<String>,
    pub order_by: Option<NodeOrderBy>,
}

/// Ordering key for `query_nodes` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOrderBy {
    Id,
    Name,
    UpdatedAt,
}

/// Filter for `query_edges`.
#[derive(Debug, Clone, Default)]
pub struct EdgeFilter {
    pub source: Option<NodeId>,
    pub target: Option<NodeId>,
    pub relationship_type: Option<RelationshipType>,
    pub min_confidence: Option<f64>,
}

/// Filter for `query_changes`.
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    pub target_id: Option<NodeId>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub change_type: Option<ChangeType>,
}

/// Storage I/O failure, classified transient or permanent per §4.1.
/// Transient errors are retried by callers (the sync engine's writer);
/// permanent errors abort the enclosing sync cycle.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {message}")]
    Storage { message: String, transient: bool },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Storage { transient: true, .. })
    }
}

impl From<StoreError> for crate::error::KernelError {
    fn from(e: StoreError) -> Self {
        use crate::error::Kind;
        let kind = match &e {
            StoreError::Storage { transient: true, .. } => Kind::Transient,
            StoreError::Storage { transient: false, .. } => Kind::Permanent,
            StoreError::InvalidInput(_) => Kind::InvalidInput,
            StoreError::NotFound(_) => Kind::NotFound,
        };
        crate::error::KernelError::with_source(kind, e.to_string(), e)
    }
}

/// Graph storage contract. Implementations must guarantee deterministic
/// ordering of results and present a single-writer, multi-reader
/// consistency model: mutating calls are serialized by the implementation;
/// reads never block on a write in progress.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + Into<crate::error::KernelError>;

    /// Insert-or-merge a batch of nodes. Scalar fields are replaced;
    /// `tags`/`metadata` are deep-merged. `version` bumps iff an
    /// observable field changed.
    async fn upsert_nodes(
        &self,
        nodes: Vec<ResourceNode>,
    ) -> Result<Vec<(NodeId, UpsertOutcome)>, Self::Error>;

    /// Insert-or-merge a batch of edges. An edge whose endpoints are not
    /// both present is rejected with `MissingEndpoint`; the rest of the
    /// batch still applies.
    async fn upsert_edges(&self, edges: Vec<Edge>) -> Result<Vec<EdgeUpsertResult>, Self::Error>;

    /// Query nodes matching `filter`.
    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<ResourceNode>, Self::Error>;

    /// Query edges matching `filter`.
    async fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>, Self::Error>;

    /// Fetch edges touching `node_id` in the given direction.
    async fn get_edges_for_node(
        &self,
        node_id: &NodeId,
        direction: Direction,
    ) -> Result<Vec<Edge>, Self::Error>;

    /// Bounded BFS from `node_id` out to `depth` hops (0 = just the seed).
    /// Returns the nodes and edges traversed, deduplicated by id.
    async fn get_neighbors(
        &self,
        node_id: &NodeId,
        depth: usize,
        direction: Direction,
    ) -> Result<(Vec<ResourceNode>, Vec<Edge>), Self::Error>;

    /// Append change records. Append-only; never fails on duplicate ids.
    async fn append_changes(&self, records: Vec<ChangeRecord>) -> Result<(), Self::Error>;

    /// Query change records matching `filter`.
    async fn query_changes(&self, filter: &ChangeFilter) -> Result<Vec<ChangeRecord>, Self::Error>;
}

pub use memory::InMemoryGraphStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresGraphStore;
