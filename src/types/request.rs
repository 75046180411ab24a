//! Change requests and the change-governance state machine's data shapes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node::NodeId;

/// Who submitted a change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitiatorType {
    Human,
    Agent,
    System,
}

/// Governance state machine states. Transitions are forward-only except
/// into `Cancelled`, which may occur from any non-terminal state
/// (invariant 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GovernanceState {
    Pending,
    RiskAssessed,
    PolicyEvaluated,
    AwaitingApproval,
    Approved,
    Rejected,
    Executed,
    Cancelled,
}

impl GovernanceState {
    /// Terminal states admit no further transitions, including cancellation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Executed | Self::Cancelled)
    }
}

/// One step in an approval chain: a required approver count and an
/// optional timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub step_index: usize,
    pub required_approvers: usize,
    pub timeout: Option<chrono::Duration>,
    pub decisions: Vec<ApprovalDecision>,
}

impl ApprovalStep {
    pub fn new(step_index: usize, required_approvers: usize, timeout: Option<chrono::Duration>) -> Self {
        Self {
            step_index,
            required_approvers,
            timeout,
            decisions: Vec::new(),
        }
    }

    /// Whether this step has collected enough approvals to be satisfied.
    pub fn is_satisfied(&self) -> bool {
        self.decisions.iter().filter(|d| d.approved).count() >= self.required_approvers
    }

    /// Whether any recorded decision was a rejection.
    pub fn has_rejection(&self) -> bool {
        self.decisions.iter().any(|d| !d.approved)
    }
}

/// A recorded approval or rejection decision for one approval step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approver: String,
    pub approved: bool,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Whether a chain's steps must complete in order or may complete in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainOrdering {
    Sequential,
    Parallel,
}

/// A template for the approval chain required at a given
/// `(environment, min-risk-level)` pairing, looked up by the governor when
/// a request enters `awaiting-approval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalChainTemplate {
    pub ordering: ChainOrdering,
    pub steps: Vec<(usize, Option<chrono::Duration>)>,
}

/// One immutable audit entry appended on every governance transition.
/// Sensitive parameter values are redacted before this struct is ever
/// persisted (see `governance::redaction`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub from_state: GovernanceState,
    pub to_state: GovernanceState,
    pub reason: String,
}

/// A proposed mutation working its way through the governance pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: Uuid,
    pub initiator: String,
    pub initiator_type: InitiatorType,
    pub target_resource_id: NodeId,
    pub action: String,
    pub environment: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub resource_names: Vec<String>,
    pub risk_score: Option<f64>,
    pub risk_level: Option<String>,
    pub risk_factors: Vec<crate::risk::RiskFactor>,
    pub state: GovernanceState,
    pub violations: Vec<crate::policy::PolicyViolation>,
    pub approval_ordering: ChainOrdering,
    pub approval_chain: Vec<ApprovalStep>,
    pub audit_trail: Vec<AuditEntry>,
    pub rejection_reason: Option<String>,
}

impl ChangeRequest {
    /// Construct a new request in `pending` state.
    pub fn new(
        initiator: impl Into<String>,
        initiator_type: InitiatorType,
        target_resource_id: NodeId,
        action: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            initiator: initiator.into(),
            initiator_type,
            target_resource_id,
            action: action.into(),
            environment: environment.into(),
            parameters: BTreeMap::new(),
            resource_names: Vec::new(),
            risk_score: None,
            risk_level: None,
            risk_factors: Vec::new(),
            state: GovernanceState::Pending,
            violations: Vec::new(),
            approval_ordering: ChainOrdering::Sequential,
            approval_chain: Vec::new(),
            audit_trail: Vec::new(),
            rejection_reason: None,
        }
    }
}
