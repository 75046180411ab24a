//! Knowledge-graph query-surface service.
//!
//! Exposes sync, snapshot, drift, anomaly, and change-governance
//! operations as a REST API (§4.9).
//!
//! ## Endpoints
//!
//! - `POST /api/sync` - Run one reconciliation cycle
//! - `POST|GET /api/snapshots` - Create or list snapshots
//! - `GET /api/snapshots/diff` - Diff two snapshots
//! - `GET /api/topology` - Query the graph or a node's neighborhood
//! - `GET /api/nodes/:id/history` - A node's historical revisions
//! - `GET /api/drift` - Compare live cloud state against the store
//! - `GET /api/anomalies` - Statistical baselines over the snapshot series
//! - `POST /api/changes` - Submit a proposed change for risk/policy evaluation
//! - `POST /api/changes/:id/approvals` - Record an approval decision
//! - `GET /health`, `/health/live`, `/health/ready` - health probes

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_anomaly_scan_metrics, record_sync_metrics};
pub use routes::{create_router, AppState};
pub use state::ServiceState;
