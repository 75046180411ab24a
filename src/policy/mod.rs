//! OPA evaluator (C8): evaluates a change-request document against a
//! policy set across three interchangeable backends.

pub mod condition;
pub mod local;
pub mod mock;
#[cfg(feature = "remote-opa")]
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use condition::Condition;
pub use local::LocalPolicyBackend;
pub use mock::MockPolicyBackend;
#[cfg(feature = "remote-opa")]
pub use remote::RemotePolicyBackend;

/// What a policy violation asks the governor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Deny,
    RequireApproval,
    Warn,
    Notify,
}

/// How a remote backend's unreachability is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    Open,
    Closed,
}

/// A single in-process rule: `{id, package, severity, action,
/// messageTemplate, condition}` per §4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub package: String,
    pub severity: crate::drift::Severity,
    pub action: PolicyAction,
    pub message_template: String,
    pub condition: Condition,
}

/// One violation raised by an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub rule_id: String,
    pub package: String,
    pub severity: crate::drift::Severity,
    pub action: PolicyAction,
    pub message: String,
}

/// Outcome of one policy evaluation. Never an `Err` — evaluation failures
/// are folded into `ok=false` plus `error`, per the "no operation throws
/// across the public boundary" contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvalResult {
    pub ok: bool,
    pub violations: Vec<PolicyViolation>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl PolicyEvalResult {
    pub fn clean() -> Self {
        Self { ok: true, violations: Vec::new(), duration_ms: 0, error: None }
    }

    pub fn has_deny(&self) -> bool {
        self.violations.iter().any(|v| v.action == PolicyAction::Deny)
    }

    pub fn requires_approval(&self) -> bool {
        self.violations.iter().any(|v| v.action == PolicyAction::RequireApproval)
    }
}

/// A policy evaluation backend. Implementations never panic and never
/// return `Err`; a transport or evaluation failure is surfaced through
/// `PolicyEvalResult::error`.
#[async_trait]
pub trait PolicyBackend: Send + Sync {
    async fn evaluate(&self, document: &serde_json::Value) -> PolicyEvalResult;
}
