//! Drift detector (C5): compares live cloud state against the canonical
//! store and classifies the differences. Never mutates the store — that
//! is the sync engine's job.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{NodeId, ResourceNode};

/// Severity of one drifted field, per the static classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// One drifted field on a node: live value observed differs from the
/// value last recorded in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDrift {
    pub field: String,
    pub previous_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub severity: Severity,
}

/// A node with one or more drifted fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftedNode {
    pub node: ResourceNode,
    pub changes: Vec<FieldDrift>,
}

/// Result of one drift scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub drifted_nodes: Vec<DriftedNode>,
    pub disappeared_nodes: Vec<NodeId>,
    pub new_nodes: Vec<ResourceNode>,
    pub scanned_at: DateTime<Utc>,
}

/// The field-sensitivity table driving severity classification, exposed as
/// configuration rather than hard-coded so an operator can widen or narrow
/// it per environment without a code change.
#[derive(Debug, Clone)]
pub struct DriftConfig {
    /// Metadata keys whose change is always security-sensitive
    /// (`high`, or `critical` on a production-tagged resource).
    pub security_sensitive_metadata_keys: BTreeSet<String>,
    /// Tag keys whose change is always sensitive, matched against this
    /// pattern (default `^(Environment|Owner|CostCenter)$`).
    pub sensitive_tag_key_pattern: String,
    /// Tag key/value identifying a resource as production (default
    /// `Environment=production`).
    pub production_tag: (String, String),
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            security_sensitive_metadata_keys: [
                "publiclyAccessible",
                "encrypted",
                "iamRoleBindings",
                "securityGroupRules",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            sensitive_tag_key_pattern: r"^(Environment|Owner|CostCenter)$".into(),
            production_tag: ("Environment".into(), "production".into()),
        }
    }
}

impl DriftConfig {
    fn sensitive_tag_key_regex(&self) -> Regex {
        Regex::new(&self.sensitive_tag_key_pattern).expect("configured pattern is valid regex")
    }

    fn is_production(&self, node: &ResourceNode) -> bool {
        node.tags.get(&self.production_tag.0).map(|v| v.as_str()) == Some(self.production_tag.1.as_str())
    }
}

/// Classify the severity of a single field-level difference per §4.4's
/// deterministic table.
fn classify_severity(field: &str, node: &ResourceNode, config: &DriftConfig) -> Severity {
    let is_prod = config.is_production(node);

    if field == "status" {
        return if is_prod { Severity::Critical } else { Severity::High };
    }

    if let Some(key) = field.strip_prefix("metadata.") {
        if config.security_sensitive_metadata_keys.contains(key) {
            return if is_prod { Severity::Critical } else { Severity::High };
        }
    }

    if let Some(key) = field.strip_prefix("tags.") {
        if config.sensitive_tag_key_regex().is_match(key) {
            return if is_prod { Severity::Critical } else { Severity::High };
        }
    }

    if field == "costMonthly" {
        return Severity::Medium;
    }

    if is_prod {
        return Severity::High;
    }

    Severity::Low
}

/// Diff one live node's observable fields against its stored counterpart,
/// producing a dotted-path `FieldDrift` per changed field (tags and
/// metadata are expanded key-by-key; everything else is a top-level path).
fn diff_node(live: &ResourceNode, stored: &ResourceNode, config: &DriftConfig) -> Vec<FieldDrift> {
    let mut drifts = Vec::new();

    if live.status != stored.status {
        drifts.push(field_drift("status", &stored.status, &live.status, stored, config));
    }
    if live.name != stored.name {
        drifts.push(field_drift("name", &stored.name, &live.name, stored, config));
    }
    if live.owner != stored.owner {
        drifts.push(field_drift("owner", &stored.owner, &live.owner, stored, config));
    }
    if live.cost_monthly != stored.cost_monthly {
        drifts.push(field_drift("costMonthly", &stored.cost_monthly, &live.cost_monthly, stored, config));
    }

    let mut tag_keys: BTreeSet<&String> = stored.tags.keys().collect();
    tag_keys.extend(live.tags.keys());
    for key in tag_keys {
        let prev = stored.tags.get(key);
        let next = live.tags.get(key);
        if prev != next {
            let field = format!("tags.{key}");
            drifts.push(FieldDrift {
                severity: classify_severity(&field, stored, config),
                field,
                previous_value: prev.map(|v| serde_json::json!(v)),
                new_value: next.map(|v| serde_json::json!(v)),
            });
        }
    }

    let mut meta_keys: BTreeSet<&String> = stored.metadata.keys().collect();
    meta_keys.extend(live.metadata.keys());
    for key in meta_keys {
        let prev = stored.metadata.get(key);
        let next = live.metadata.get(key);
        if prev != next {
            let field = format!("metadata.{key}");
            drifts.push(FieldDrift {
                severity: classify_severity(&field, stored, config),
                field,
                previous_value: prev.cloned(),
                new_value: next.cloned(),
            });
        }
    }

    drifts
}

fn field_drift<T: Serialize>(
    field: &str,
    previous: &T,
    new: &T,
    stored: &ResourceNode,
    config: &DriftConfig,
) -> FieldDrift {
    FieldDrift {
        severity: classify_severity(field, stored, config),
        field: field.to_string(),
        previous_value: Some(serde_json::json!(previous)),
        new_value: Some(serde_json::json!(new)),
    }
}

/// Compare `live` (freshly discovered, not yet reconciled) against
/// `stored` (the store's current view, already scoped to the provider
/// filter the caller applied). Produces a `DriftReport` without touching
/// either side.
pub fn detect_drift(live: &[ResourceNode], stored: &[ResourceNode], config: &DriftConfig, now: DateTime<Utc>) -> DriftReport {
    let live_by_id: BTreeMap<&NodeId, &ResourceNode> = live.iter().map(|n| (&n.id, n)).collect();
    let stored_by_id: BTreeMap<&NodeId, &ResourceNode> = stored.iter().map(|n| (&n.id, n)).collect();

    let mut drifted_nodes = Vec::new();
    let mut new_nodes = Vec::new();
    for node in live {
        match stored_by_id.get(&node.id) {
            None => new_nodes.push(node.clone()),
            Some(stored_node) => {
                let changes = diff_node(node, stored_node, config);
                if !changes.is_empty() {
                    drifted_nodes.push(DriftedNode { node: node.clone(), changes });
                }
            }
        }
    }

    let mut disappeared_nodes = Vec::new();
    for node in stored {
        if !live_by_id.contains_key(&node.id) {
            disappeared_nodes.push(node.id.clone());
        }
    }

    DriftReport { drifted_nodes, disappeared_nodes, new_nodes, scanned_at: now }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceKey, ResourceStatus};

    fn key(native_id: &str) -> ResourceKey {
        ResourceKey {
            provider: "aws".into(),
            account: "1".into(),
            region: "us-east-1".into(),
            resource_type: "ec2".into(),
            native_id: native_id.into(),
        }
    }

    fn node(native_id: &str) -> ResourceNode {
        ResourceNode::new_discovered(key(native_id), native_id, ResourceStatus::Running, Utc::now())
    }

    #[test]
    fn status_change_is_high_severity_on_non_production_node() {
        let stored = node("i-1");
        let mut live = stored.clone();
        live.status = ResourceStatus::Stopped;
        let report = detect_drift(&[live], &[stored], &DriftConfig::default(), Utc::now());
        assert_eq!(report.drifted_nodes.len(), 1);
        assert_eq!(report.drifted_nodes[0].changes[0].severity, Severity::High);
    }

    #[test]
    fn status_change_is_critical_on_production_node() {
        let mut stored = node("i-1");
        stored.tags.insert("Environment".into(), "production".into());
        let mut live = stored.clone();
        live.status = ResourceStatus::Stopped;
        let report = detect_drift(&[live], &[stored], &DriftConfig::default(), Utc::now());
        assert_eq!(report.drifted_nodes[0].changes[0].severity, Severity::Critical);
    }

    #[test]
    fn security_sensitive_metadata_change_is_high() {
        let stored = node("i-1");
        let mut live = stored.clone();
        live.metadata.insert("publiclyAccessible".into(), serde_json::json!(true));
        let report = detect_drift(&[live], &[stored], &DriftConfig::default(), Utc::now());
        let drift = &report.drifted_nodes[0].changes[0];
        assert_eq!(drift.field, "metadata.publiclyAccessible");
        assert_eq!(drift.severity, Severity::High);
    }

    #[test]
    fn cost_only_change_is_medium() {
        let mut stored = node("i-1");
        stored.cost_monthly = Some(10.0);
        let mut live = stored.clone();
        live.cost_monthly = Some(20.0);
        let report = detect_drift(&[live], &[stored], &DriftConfig::default(), Utc::now());
        assert_eq!(report.drifted_nodes[0].changes.len(), 1);
        assert_eq!(report.drifted_nodes[0].changes[0].severity, Severity::Medium);
        assert_eq!(report.drifted_nodes[0].changes[0].field, "costMonthly");
    }

    #[test]
    fn unmatched_live_node_is_new_and_unmatched_stored_node_is_disappeared() {
        let stored = node("i-1");
        let fresh = node("i-2");
        let report = detect_drift(&[fresh.clone()], &[stored.clone()], &DriftConfig::default(), Utc::now());
        assert_eq!(report.new_nodes[0].id, fresh.id);
        assert_eq!(report.disappeared_nodes[0], stored.id);
        assert!(report.drifted_nodes.is_empty());
    }

    #[test]
    fn unchanged_node_yields_no_drift() {
        let stored = node("i-1");
        let live = stored.clone();
        let report = detect_drift(&[live], &[stored], &DriftConfig::default(), Utc::now());
        assert!(report.drifted_nodes.is_empty());
    }
}
