//! Anomaly detector (C6): derives statistical baselines from the snapshot
//! series and flags samples whose z-score exceeds a threshold.

pub mod baseline;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use self::baseline::{compute_baseline, z_score, Baseline};
use crate::drift::Severity;
use crate::store::GraphStore;
use crate::temporal::{InMemoryTemporalStore, SnapshotFilter};
use crate::types::NodeId;

/// Which metric an anomaly was raised against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyType {
    CostSpike,
    TopologyShift,
    StructuralDrift,
    ChurnSpike,
}

/// Which metrics to run. Absent entries default to enabled.
#[derive(Debug, Clone, Copy)]
pub struct DetectFlags {
    pub cost: bool,
    pub topology: bool,
    pub structural: bool,
    pub churn: bool,
}

impl Default for DetectFlags {
    fn default() -> Self {
        Self { cost: true, topology: true, structural: true, churn: true }
    }
}

/// Configuration for one anomaly scan.
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub z_score_threshold: f64,
    pub min_snapshots: usize,
    pub rolling_window: Option<usize>,
    pub detect: DetectFlags,
    pub provider: Option<String>,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self { z_score_threshold: 2.0, min_snapshots: 3, rolling_window: None, detect: DetectFlags::default(), provider: None }
    }
}

/// One detected anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub snapshot_id: Uuid,
    pub actual_value: f64,
    pub expected_value: f64,
    pub z_score: f64,
    pub affected_resources: Vec<NodeId>,
}

/// Result of one anomaly scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub generated_at: DateTime<Utc>,
    pub snapshots_analyzed: usize,
    pub anomalies: Vec<Anomaly>,
    pub baselines: BTreeMap<String, Baseline>,
    pub summary: String,
    pub cost_trend: Vec<f64>,
}

impl AnomalyReport {
    fn empty(now: DateTime<Utc>, snapshots_analyzed: usize) -> Self {
        Self {
            generated_at: now,
            snapshots_analyzed,
            anomalies: Vec::new(),
            baselines: BTreeMap::new(),
            summary: "insufficient snapshot history".into(),
            cost_trend: Vec::new(),
        }
    }
}

/// Severity mapping for a z-score magnitude against `threshold` (§4.5).
fn severity_for_z(abs_z: f64, threshold: f64) -> Option<Severity> {
    if abs_z >= 4.0 {
        Some(Severity::Critical)
    } else if abs_z >= 3.0 {
        Some(Severity::High)
    } else if abs_z >= 2.5 {
        Some(Severity::Medium)
    } else if abs_z >= threshold {
        Some(Severity::Low)
    } else {
        None
    }
}

/// Check the most recent sample in `series` against a baseline computed
/// over the whole series, emitting an anomaly if its z-score clears
/// `threshold`.
fn check_latest(
    metric: &str,
    series: &[f64],
    snapshot_id: Uuid,
    anomaly_type: AnomalyType,
    threshold: f64,
    affected_resources: Vec<NodeId>,
    baselines: &mut BTreeMap<String, Baseline>,
    anomalies: &mut Vec<Anomaly>,
) {
    if series.is_empty() {
        return;
    }
    let baseline = compute_baseline(series);
    let actual = *series.last().unwrap();
    let z = z_score(actual, &baseline);
    baselines.insert(metric.to_string(), baseline);
    if let Some(severity) = severity_for_z(z.abs(), threshold) {
        anomalies.push(Anomaly {
            anomaly_type,
            severity,
            snapshot_id,
            actual_value: actual,
            expected_value: baseline.mean,
            z_score: z,
            affected_resources,
        });
    }
}

/// Run one anomaly scan over the temporal store's snapshot series.
pub async fn detect_anomalies<S: GraphStore>(
    temporal: &InMemoryTemporalStore<S>,
    config: &AnomalyConfig,
    now: DateTime<Utc>,
) -> AnomalyReport {
    let filter = SnapshotFilter { provider: config.provider.clone(), ..Default::default() };
    let mut snapshots = temporal.list_snapshots(&filter).await;
    snapshots.sort_by_key(|s| s.created_at);
    if let Some(window) = config.rolling_window {
        let skip = snapshots.len().saturating_sub(window);
        snapshots = snapshots.split_off(skip);
    }

    if snapshots.len() < config.min_snapshots {
        return AnomalyReport::empty(now, snapshots.len());
    }

    let mut baselines = BTreeMap::new();
    let mut anomalies = Vec::new();
    let latest_id = snapshots.last().unwrap().id;
    let threshold = config.z_score_threshold;

    if config.detect.cost {
        let series: Vec<f64> = snapshots.iter().map(|s| s.total_cost_monthly).collect();
        check_latest("cost", &series, latest_id, AnomalyType::CostSpike, threshold, Vec::new(), &mut baselines, &mut anomalies);
    }

    if config.detect.topology {
        let node_series: Vec<f64> = snapshots.iter().map(|s| s.node_count as f64).collect();
        check_latest("node-count", &node_series, latest_id, AnomalyType::TopologyShift, threshold, Vec::new(), &mut baselines, &mut anomalies);
        let edge_series: Vec<f64> = snapshots.iter().map(|s| s.edge_count as f64).collect();
        check_latest("edge-count", &edge_series, latest_id, AnomalyType::TopologyShift, threshold, Vec::new(), &mut baselines, &mut anomalies);
    }

    if config.detect.structural {
        let ratio_series: Vec<f64> = snapshots
            .iter()
            .map(|s| if s.node_count == 0 { 0.0 } else { s.edge_count as f64 / s.node_count as f64 })
            .collect();
        check_latest(
            "edge-to-node-ratio",
            &ratio_series,
            latest_id,
            AnomalyType::StructuralDrift,
            threshold,
            Vec::new(),
            &mut baselines,
            &mut anomalies,
        );
    }

    if config.detect.churn && snapshots.len() >= 2 {
        let mut churn_series = Vec::with_capacity(snapshots.len() - 1);
        let mut last_affected = Vec::new();
        for pair in snapshots.windows(2) {
            if let Ok(diff) = temporal.diff_snapshots(pair[0].id, pair[1].id).await {
                let churn = (diff.added_nodes.len() + diff.removed_nodes.len()) as f64;
                if pair[1].id == latest_id {
                    last_affected = diff.added_nodes.iter().chain(diff.removed_nodes.iter()).cloned().collect();
                }
                churn_series.push(churn);
            }
        }
        check_latest(
            "churn",
            &churn_series,
            latest_id,
            AnomalyType::ChurnSpike,
            threshold,
            last_affected,
            &mut baselines,
            &mut anomalies,
        );
    }

    let cost_trend = snapshots.iter().map(|s| s.total_cost_monthly).collect();
    let summary = format!("{} anomalies detected across {} snapshots", anomalies.len(), snapshots.len());

    AnomalyReport {
        generated_at: now,
        snapshots_analyzed: snapshots.len(),
        anomalies,
        baselines,
        summary,
        cost_trend,
    }
}
