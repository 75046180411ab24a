//! # infra-graph-kernel
//!
//! A multi-cloud infrastructure knowledge graph: discovers resources
//! across cloud providers, stores them as a versioned graph, and layers
//! temporal snapshots, drift detection, anomaly detection, risk scoring,
//! policy evaluation, and change governance on top.
//!
//! ## Core Contract
//!
//! 1. Discovery sources feed a sync engine that reconciles live cloud
//!    state into a single graph store (C2/C3).
//! 2. Every sync cycle can be captured as a content-addressed snapshot in
//!    the temporal store (C4), which also answers node-history and
//!    snapshot-diff queries.
//! 3. Drift and anomaly detectors (C5/C6) read the store and the
//!    snapshot series without mutating either.
//! 4. A proposed change is risk-scored (C7), evaluated against policy
//!    (C8), and driven through an approval workflow (C9) before it is
//!    allowed to execute.
//!
//! ## Architecture
//!
//! ```text
//! DiscoverySource → SyncEngine → GraphStore ←→ InMemoryTemporalStore
//!                                    |                  |
//!                              DriftDetector      AnomalyDetector
//!
//! ChangeRequest → RiskScorer → PolicyBackend → ChangeGovernor → approved/rejected
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same node/edge state → identical content-addressed revision id
//! - Edge ordering and map iteration are canonical (`BTreeMap`/`BTreeSet`)
//! - No public operation panics or throws across its boundary; failures
//!   are classified via [`error::KernelError`]

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

pub mod anomaly;
pub mod canonical;
pub mod drift;
pub mod error;
pub mod governance;
pub mod policy;
pub mod risk;
pub mod store;
pub mod sync;
pub mod temporal;
pub mod types;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use canonical::{canonical_hash, canonical_hash_hex, quantize_f64, to_canonical_bytes, FLOAT_QUANTIZATION_FACTOR};
pub use error::{retry, Kind, KernelError};

pub use types::{
    ApprovalChainTemplate, ApprovalDecision, ApprovalStep, AuditEntry, ChainOrdering, ChangeRecord, ChangeRequest,
    ChangeType, DiscoveredVia, Edge, EdgeId, GovernanceState, Initiator, InitiatorType, NodeId, RelationshipType,
    ResourceKey, ResourceNode, ResourceStatus, Snapshot, SnapshotTrigger,
};

pub use store::{
    ChangeFilter, Direction, EdgeFilter, EdgeUpsertResult, GraphStore, InMemoryGraphStore, NodeFilter, NodeOrderBy,
    StoreError, UpsertOutcome,
};
#[cfg(feature = "postgres")]
pub use store::PostgresGraphStore;

pub use sync::{
    build_plan, CancellationToken, DiscoveryBatch, DiscoveryError, DiscoverySource, SourceScope, SourceSyncReport,
    StaticDiscoverySource, SyncEngine, SyncError, SyncOptions, SyncReport, WritePlan,
};

pub use temporal::{
    EdgeHistoryEntry, InMemoryTemporalStore, NodeChange, NodeHistoryEntry, PruneOptions, SnapshotDiff, SnapshotFilter,
    TemporalError,
};

pub use drift::{detect_drift, DriftConfig, DriftReport, DriftedNode, FieldDrift, Severity};

pub use anomaly::{
    detect_anomalies, Anomaly, AnomalyConfig, AnomalyReport, AnomalyType, DetectFlags,
};

pub use risk::{assess, CommandDescriptor, Environment, OperationCategory, RiskAssessment, RiskConfig, RiskFactor, RiskInput, RiskLevel};

pub use policy::{Condition, FailMode, LocalPolicyBackend, MockPolicyBackend, PolicyAction, PolicyBackend, PolicyEvalResult, PolicyRule, PolicyViolation};
#[cfg(feature = "remote-opa")]
pub use policy::RemotePolicyBackend;

pub use governance::{ApprovalChainTable, ChangeGovernor, GovernanceError};

// Service re-exports (when the service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, AppState, ServiceState};

/// Schema version for all graph kernel types.
/// Increment on breaking changes to any schema type.
pub const GRAPH_KERNEL_SCHEMA_VERSION: &str = "1.0.0";
