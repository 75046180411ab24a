//! Service middleware and metrics logging.
//!
//! Metrics are emitted as structured tracing events (target
//! `graph_sync::metrics`) rather than a dedicated metrics crate: a log
//! aggregator can build counters and histograms from these events without
//! the service carrying its own metrics registry.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

/// Records request count and latency for every handled request.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "graph_sync::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

/// Replace dynamic path segments (UUIDs) with `:id` so metrics don't
/// fragment by cardinality.
fn normalize_path(path: &str) -> String {
    let uuid_regex =
        regex_lite::Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap();
    uuid_regex.replace_all(path, ":id").to_string()
}

/// Record the outcome of one sync cycle.
pub fn record_sync_metrics(sources: usize, created: usize, updated: usize, disappeared: usize, duration_ms: u64) {
    info!(
        target: "graph_sync::metrics",
        metric_type = "sync",
        sources = sources,
        created = created,
        updated = updated,
        disappeared = disappeared,
        latency_ms = duration_ms,
        "sync_metric"
    );
}

/// Record the outcome of one anomaly scan.
pub fn record_anomaly_scan_metrics(snapshots_analyzed: usize, anomalies_found: usize) {
    info!(
        target: "graph_sync::metrics",
        metric_type = "anomaly_scan",
        snapshots_analyzed = snapshots_analyzed,
        anomalies_found = anomalies_found,
        "anomaly_scan_metric"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_replaces_uuid() {
        let path = "/api/nodes/550e8400-e29b-41d4-a716-446655440000/history";
        assert_eq!(normalize_path(path), "/api/nodes/:id/history");
    }

    #[test]
    fn normalize_path_preserves_regular_path() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
    }
}
