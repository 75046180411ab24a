//! Axum routes for the knowledge-graph query surface (§4.9).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::anomaly::{self, AnomalyConfig, AnomalyReport};
use crate::drift::{self, DriftReport};
use crate::risk::{CommandDescriptor, OperationCategory};
use crate::store::{EdgeFilter, GraphStore, NodeFilter, PostgresGraphStore};
use crate::sync::{CancellationToken, SyncEngine, SyncOptions, SyncReport};
use crate::temporal::SnapshotFilter;
use crate::types::{
    ApprovalDecision, ChangeRequest, Edge, InitiatorType, NodeId, ResourceNode, Snapshot, SnapshotTrigger,
};

use crate::governance::redaction;

use super::state::ServiceState;

/// Render a change request for the HTTP response with its `parameters`
/// redacted — the policy backend and the audit trail need the raw values,
/// but nothing leaves the service boundary unredacted (§4.8 "redaction at
/// the audit/write boundary").
fn redacted_response(request: &ChangeRequest) -> Json<serde_json::Value> {
    let mut value = serde_json::to_value(request).expect("ChangeRequest always serializes");
    if let Some(parameters) = value.get("parameters").cloned() {
        value["parameters"] = redaction::redact(&parameters);
    }
    Json(value)
}

/// Type alias for the service state backed by `PostgresGraphStore`, the
/// durable backend a production deployment runs against.
pub type AppState = ServiceState<PostgresGraphStore>;

#[derive(Debug, Deserialize)]
struct SyncQuery {
    providers: Option<String>,
}

async fn sync_handler(State(state): State<Arc<AppState>>, Query(query): Query<SyncQuery>) -> Json<SyncReport> {
    let engine = SyncEngine::new(state.store.clone(), state.sources.clone());
    let mut options = SyncOptions::default();
    options.providers = query.providers.map(|p| p.split(',').map(String::from).collect());
    let started = std::time::Instant::now();
    let report = engine.sync(&options, &CancellationToken::new()).await;
    let created: usize = report.per_source.iter().map(|r| r.created).sum();
    let updated: usize = report.per_source.iter().map(|r| r.updated).sum();
    let disappeared: usize = report.per_source.iter().map(|r| r.disappeared).sum();
    super::middleware::record_sync_metrics(report.per_source.len(), created, updated, disappeared, started.elapsed().as_millis() as u64);
    Json(report)
}

#[derive(Debug, Deserialize)]
struct CreateSnapshotRequest {
    trigger: Option<SnapshotTrigger>,
    label: Option<String>,
    provider_scope: Option<String>,
}

async fn create_snapshot_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSnapshotRequest>,
) -> Result<Json<Snapshot>, (StatusCode, String)> {
    state
        .temporal
        .create_snapshot(request.trigger.unwrap_or(SnapshotTrigger::Manual), request.label, request.provider_scope)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn list_snapshots_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Snapshot>> {
    Json(state.temporal.list_snapshots(&SnapshotFilter::default()).await)
}

#[derive(Debug, Deserialize)]
struct DiffQuery {
    from: Uuid,
    to: Uuid,
}

async fn diff_snapshots_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DiffQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .temporal
        .diff_snapshots(query.from, query.to)
        .await
        .map(|diff| {
            Json(serde_json::json!({
                "addedNodes": diff.added_nodes,
                "removedNodes": diff.removed_nodes,
                "changedNodeCount": diff.changed_nodes.len(),
                "addedEdges": diff.added_edges,
                "removedEdges": diff.removed_edges,
                "costDelta": diff.cost_delta,
            }))
        })
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}

#[derive(Debug, Deserialize)]
struct TopologyQuery {
    provider: Option<String>,
    node_id: Option<String>,
    depth: Option<usize>,
}

#[derive(Debug, Serialize)]
struct TopologyResponse {
    nodes: Vec<ResourceNode>,
    edges: Vec<Edge>,
}

async fn topology_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopologyQuery>,
) -> Result<Json<TopologyResponse>, (StatusCode, String)> {
    if let Some(node_id) = query.node_id {
        let (nodes, edges) = state
            .store
            .get_neighbors(&NodeId::from_raw(node_id), query.depth.unwrap_or(1), crate::store::Direction::Both)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        return Ok(Json(TopologyResponse { nodes, edges }));
    }

    let nodes = state
        .store
        .query_nodes(&NodeFilter { provider: query.provider, ..Default::default() })
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let edges = state
        .store
        .query_edges(&EdgeFilter::default())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(TopologyResponse { nodes, edges }))
}

async fn node_history_handler(State(state): State<Arc<AppState>>, Path(node_id): Path<String>) -> impl IntoResponse {
    let entries = state.temporal.get_node_history(&NodeId::from_raw(node_id), None).await;
    Json(
        entries
            .into_iter()
            .map(|e| serde_json::json!({"snapshotId": e.snapshot_id, "snapshotTimestamp": e.snapshot_timestamp, "node": e.node}))
            .collect::<Vec<_>>(),
    )
}

#[derive(Debug, Deserialize)]
struct DriftQuery {
    provider: Option<String>,
}

async fn detect_drift_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DriftQuery>,
) -> Result<Json<DriftReport>, (StatusCode, String)> {
    let stored = state
        .store
        .query_nodes(&NodeFilter { provider: query.provider.clone(), ..Default::default() })
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut live = Vec::new();
    for source in &state.sources {
        if query.provider.as_deref().is_some_and(|p| p != source.scope().provider) {
            continue;
        }
        let batch = source.discover().await;
        live.extend(batch.nodes);
    }

    Ok(Json(drift::detect_drift(&live, &stored, &state.drift_config, Utc::now())))
}

async fn detect_anomalies_handler(State(state): State<Arc<AppState>>) -> Json<AnomalyReport> {
    let report = anomaly::detect_anomalies(&state.temporal, &state.anomaly_config, Utc::now()).await;
    super::middleware::record_anomaly_scan_metrics(report.snapshots_analyzed, report.anomalies.len());
    Json(report)
}

#[derive(Debug, Deserialize)]
struct EvaluateChangeRequest {
    initiator: String,
    initiator_type: InitiatorType,
    target_resource_id: String,
    action: String,
    environment: String,
    category: OperationCategory,
    dangerous: bool,
    resource_names: Vec<String>,
}

async fn evaluate_change_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EvaluateChangeRequest>,
) -> Json<serde_json::Value> {
    let mut request = ChangeRequest::new(
        body.initiator,
        body.initiator_type,
        NodeId::from_raw(body.target_resource_id),
        body.action,
        body.environment,
    );
    request.resource_names = body.resource_names;
    let count = request.resource_names.len().max(1);

    let now = Utc::now();
    let command = CommandDescriptor { category: body.category, dangerous: body.dangerous };
    state.governor.assess_risk(&mut request, &command, count, now);
    state.governor.evaluate_policy(&mut request, now).await;

    let response = redacted_response(&request);
    state.requests.write().unwrap().insert(request.id, request);
    response
}

#[derive(Debug, Deserialize)]
struct SubmitApprovalRequest {
    step_index: usize,
    approver: String,
    approved: bool,
    reason: Option<String>,
}

async fn submit_approval_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<SubmitApprovalRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let mut requests = state.requests.write().unwrap();
    let request = requests.get_mut(&request_id).ok_or((StatusCode::NOT_FOUND, "change request not found".to_string()))?;

    let decision = ApprovalDecision { approver: body.approver, approved: body.approved, reason: body.reason, decided_at: Utc::now() };
    state
        .governor
        .submit_approval(request, body.step_index, decision, Utc::now())
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;

    Ok(redacted_response(request))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let healthy = state.store.is_healthy().await;
    Json(HealthResponse { status: if healthy { "healthy" } else { "degraded" }, version: env!("CARGO_PKG_VERSION") })
}

async fn liveness_handler() -> &'static str {
    "alive"
}

async fn readiness_handler(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    if state.store.is_healthy().await {
        Ok("ready")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Build the Axum router exposing every §4.9 query-surface operation.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/api/sync", post(sync_handler))
        .route("/api/snapshots", post(create_snapshot_handler).get(list_snapshots_handler))
        .route("/api/snapshots/diff", get(diff_snapshots_handler))
        .route("/api/topology", get(topology_handler))
        .route("/api/nodes/:id/history", get(node_history_handler))
        .route("/api/drift", get(detect_drift_handler))
        .route("/api/anomalies", get(detect_anomalies_handler))
        .route("/api/changes", post(evaluate_change_handler))
        .route("/api/changes/:id/approvals", post(submit_approval_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state)
}
