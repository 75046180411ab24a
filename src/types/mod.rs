//! Core data model: nodes, edges, change records, snapshots, and change
//! requests. See `node`, `edge`, `change`, `snapshot`, `request`.

pub mod change;
pub mod edge;
pub mod node;
pub mod request;
pub mod snapshot;

pub use change::{ChangeRecord, ChangeType, Initiator};
pub use edge::{DiscoveredVia, Edge, EdgeId, RelationshipType};
pub use node::{NodeId, ResourceKey, ResourceNode, ResourceStatus};
pub use request::{
    ApprovalChainTemplate, ApprovalDecision, ApprovalStep, AuditEntry, ChainOrdering,
    ChangeRequest, GovernanceState, InitiatorType,
};
pub use snapshot::{Snapshot, SnapshotTrigger};
