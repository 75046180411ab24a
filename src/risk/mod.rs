//! Risk scorer (C7): computes a numeric risk score, categorical level, and
//! contributing factors for a proposed change.

use chrono::{DateTime, Timelike, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Categorical operation kind, used to pick a base operation-type score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationCategory {
    Delete,
    Security,
    Network,
    Migrate,
    Scale,
    Backup,
    Audit,
}

impl OperationCategory {
    fn base_score(self) -> f64 {
        match self {
            Self::Delete => 90.0,
            Self::Security => 85.0,
            Self::Network => 80.0,
            Self::Migrate => 75.0,
            Self::Scale => 50.0,
            Self::Backup => 30.0,
            Self::Audit => 10.0,
        }
    }
}

/// A command descriptor: its category and whether it is intrinsically
/// flagged dangerous (multiplies the operation-type factor by 1.5).
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub category: OperationCategory,
    pub dangerous: bool,
}

/// Target deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
    Development,
    Staging,
    Production,
    DisasterRecovery,
}

impl Environment {
    fn multiplier(self) -> f64 {
        match self {
            Self::Production => 2.0,
            Self::DisasterRecovery => 1.8,
            Self::Staging => 1.2,
            Self::Development => 0.5,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "production" => Self::Production,
            "disaster-recovery" => Self::DisasterRecovery,
            "staging" => Self::Staging,
            _ => Self::Development,
        }
    }
}

/// Categorical label derived from the numeric risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// One contributing factor to the overall risk score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub score: f64,
    pub weight: f64,
}

/// Result of a risk assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_score: f64,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub requires_approval: bool,
}

/// Configurable tunables for the risk model, kept out of code per the
/// spec's repeated "expose as configuration" guidance.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub critical_resource_patterns: Vec<String>,
    pub blackout_window: Option<(u32, u32)>, // (start_hour, end_hour), inclusive-exclusive, UTC
    pub level_thresholds: [(f64, RiskLevel); 4],
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            critical_resource_patterns: vec!["*-prod-*".into(), "*-db-*".into()],
            blackout_window: None,
            level_thresholds: [
                (80.0, RiskLevel::Critical),
                (60.0, RiskLevel::High),
                (40.0, RiskLevel::Medium),
                (20.0, RiskLevel::Low),
            ],
        }
    }
}

fn glob_to_regex(glob: &str) -> Regex {
    let escaped = regex_lite::escape(glob).replace(r"\*", ".*");
    Regex::new(&format!("^{escaped}$")).expect("glob-derived pattern is always valid")
}

/// Input to a single risk assessment.
#[derive(Debug, Clone)]
pub struct RiskInput<'a> {
    pub command: &'a CommandDescriptor,
    pub parameters: &'a BTreeMap<String, serde_json::Value>,
    pub environment: Environment,
    pub resource_names: &'a [String],
    pub resource_count: usize,
    pub now: DateTime<Utc>,
}

fn resource_count_score(count: usize) -> f64 {
    match count {
        0..=1 => 10.0,
        2..=5 => 20.0,
        6..=10 => 40.0,
        11..=20 => 60.0,
        21..=50 => 80.0,
        _ => 100.0,
    }
}

/// Compute a risk assessment for a proposed change. Deterministic for a
/// fixed `now`; callers needing reproducibility must pass an explicit
/// `now` rather than relying on wall-clock time at call sites.
pub fn assess(input: &RiskInput, config: &RiskConfig) -> RiskAssessment {
    let mut factors = Vec::new();

    let env_score = (50.0 * input.environment.multiplier()).min(100.0);
    factors.push(RiskFactor { name: "environment".into(), score: env_score, weight: 1.0 });

    let mut op_score = input.command.category.base_score();
    if input.command.dangerous {
        op_score *= 1.5;
    }
    op_score = op_score.min(100.0);
    factors.push(RiskFactor { name: "operation-type".into(), score: op_score, weight: 1.0 });

    let count_score = resource_count_score(input.resource_count);
    factors.push(RiskFactor { name: "resource-count".into(), score: count_score, weight: 1.0 });

    let patterns: Vec<Regex> = config
        .critical_resource_patterns
        .iter()
        .map(|p| glob_to_regex(p))
        .collect();
    let criticality_score = if input
        .resource_names
        .iter()
        .any(|name| patterns.iter().any(|re| re.is_match(name)))
    {
        90.0
    } else {
        30.0
    };
    factors.push(RiskFactor { name: "resource-criticality".into(), score: criticality_score, weight: 1.0 });

    let in_blackout = config
        .blackout_window
        .map(|(start, end)| {
            let hour = input.now.hour();
            if start <= end {
                hour >= start && hour < end
            } else {
                hour >= start || hour < end
            }
        })
        .unwrap_or(false);
    let time_score = if in_blackout { 70.0 } else { 20.0 };
    factors.push(RiskFactor { name: "time-of-day".into(), score: time_score, weight: 1.0 });

    let weight_sum: f64 = factors.iter().map(|f| f.weight).sum();
    let weighted: f64 = factors.iter().map(|f| f.score * f.weight).sum();
    let overall_score = (weighted / weight_sum).round().clamp(0.0, 100.0);

    let level = config
        .level_thresholds
        .iter()
        .find(|(threshold, _)| overall_score >= *threshold)
        .map(|(_, level)| *level)
        .unwrap_or(RiskLevel::Minimal);

    let requires_approval = matches!(
        (input.environment, level),
        (Environment::Production, RiskLevel::Critical | RiskLevel::High | RiskLevel::Medium)
            | (Environment::Staging, RiskLevel::Critical | RiskLevel::High)
    );

    RiskAssessment { overall_score, level, factors, requires_approval }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_input() -> (CommandDescriptor, BTreeMap<String, serde_json::Value>) {
        (CommandDescriptor { category: OperationCategory::Delete, dangerous: false }, BTreeMap::new())
    }

    #[test]
    fn production_database_delete_is_critical() {
        let (cmd, params) = base_input();
        let input = RiskInput {
            command: &cmd,
            parameters: &params,
            environment: Environment::Production,
            resource_names: &["orders-prod-db".to_string()],
            resource_count: 1,
            now: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        };
        let assessment = assess(&input, &RiskConfig::default());
        assert_eq!(assessment.level, RiskLevel::Critical);
        assert!(assessment.requires_approval);
    }

    #[test]
    fn dev_audit_is_low_risk_and_no_approval() {
        let cmd = CommandDescriptor { category: OperationCategory::Audit, dangerous: false };
        let params = BTreeMap::new();
        let input = RiskInput {
            command: &cmd,
            parameters: &params,
            environment: Environment::Development,
            resource_names: &["sandbox-1".to_string()],
            resource_count: 1,
            now: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        };
        let assessment = assess(&input, &RiskConfig::default());
        assert!(!assessment.requires_approval);
        assert!(matches!(assessment.level, RiskLevel::Minimal | RiskLevel::Low));
    }

    #[test]
    fn overall_score_is_clamped_and_rounded() {
        let cmd = CommandDescriptor { category: OperationCategory::Delete, dangerous: true };
        let params = BTreeMap::new();
        let input = RiskInput {
            command: &cmd,
            parameters: &params,
            environment: Environment::Production,
            resource_names: &["x-prod-y".to_string()],
            resource_count: 200,
            now: Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap(),
        };
        let assessment = assess(&input, &RiskConfig::default());
        assert!(assessment.overall_score <= 100.0);
        assert_eq!(assessment.overall_score.fract(), 0.0);
    }
}
