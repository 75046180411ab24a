//! Change governor (C9): orchestrates risk scoring, policy evaluation, and
//! approval workflow for a proposed mutation.
//!
//! pending → risk-assessed → policy-evaluated → (awaiting-approval |
//! approved) → executed, with `rejected`/`cancelled` reachable per
//! §4.8's state machine.

pub mod redaction;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::policy::{PolicyAction, PolicyBackend, PolicyEvalResult};
use crate::risk::{self, CommandDescriptor, Environment, RiskConfig, RiskInput, RiskLevel};
use crate::types::{ApprovalChainTemplate, ApprovalDecision, ApprovalStep, AuditEntry, ChainOrdering, ChangeRequest, GovernanceState};

/// Errors raised by governor operations. These never abort a request's
/// lifecycle on their own — callers are expected to route them to
/// `rejected` with a recorded reason, per §7 "C9 treats C7/C8 errors
/// according to the configured fail mode".
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: GovernanceState, to: GovernanceState },
    #[error("no approval chain template for (environment={0}, level={1:?})")]
    NoApprovalTemplate(String, RiskLevel),
    #[error("approval step {0} has already closed")]
    StepAlreadyClosed(usize),
}

impl From<GovernanceError> for crate::error::KernelError {
    fn from(e: GovernanceError) -> Self {
        crate::error::KernelError::with_source(crate::error::Kind::InvalidInput, e.to_string(), e)
    }
}

/// Looked up by `(environment, minimum risk level)`. The governor selects
/// the most specific template whose `min_level` is at or below the
/// request's assessed level.
pub type ApprovalChainTable = BTreeMap<(String, RiskLevel), ApprovalChainTemplate>;

/// Drives one change request through the governance pipeline. Holds no
/// per-request state; all state lives on the `ChangeRequest` passed to
/// each call, so a governor instance is shared freely across requests.
#[derive(Clone)]
pub struct ChangeGovernor {
    risk_config: RiskConfig,
    policy: Arc<dyn PolicyBackend>,
    approval_chains: ApprovalChainTable,
}

fn build_document(request: &ChangeRequest) -> serde_json::Value {
    json!({
        "id": request.id,
        "action": request.action,
        "environment": request.environment,
        "initiator": request.initiator,
        "resource": {"id": request.target_resource_id.0, "names": request.resource_names},
        "parameters": request.parameters,
        "risk": {"score": request.risk_score, "level": request.risk_level},
    })
}

fn push_audit(request: &mut ChangeRequest, actor: &str, to: GovernanceState, reason: impl Into<String>, now: DateTime<Utc>) {
    let reason = reason.into();
    tracing::info!(
        request_id = %request.id,
        from = ?request.state,
        to = ?to,
        parameters = %redaction::redact(&json!(request.parameters)),
        "governance transition"
    );
    request.audit_trail.push(AuditEntry { timestamp: now, actor: actor.to_string(), from_state: request.state, to_state: to, reason });
    request.state = to;
}

impl ChangeGovernor {
    pub fn new(risk_config: RiskConfig, policy: Arc<dyn PolicyBackend>, approval_chains: ApprovalChainTable) -> Self {
        Self { risk_config, policy, approval_chains }
    }

    /// `pending -> risk-assessed`. Scores the request with C7 and records
    /// the result on it.
    pub fn assess_risk(&self, request: &mut ChangeRequest, command: &CommandDescriptor, resource_count: usize, now: DateTime<Utc>) {
        let environment = Environment::from_str(&request.environment);
        let input = RiskInput {
            command,
            parameters: &request.parameters,
            environment,
            resource_names: &request.resource_names,
            resource_count,
            now,
        };
        let assessment = risk::assess(&input, &self.risk_config);
        request.risk_score = Some(assessment.overall_score);
        request.risk_level = Some(assessment.level.to_string());
        request.risk_factors = assessment.factors;
        push_audit(request, "system", GovernanceState::RiskAssessed, "risk assessment completed", now);
    }

    /// `risk-assessed -> policy-evaluated`, then immediately resolves to
    /// `rejected`, `awaiting-approval`, or `approved` per §4.8's transition
    /// rules. C8 errors never abort the pipeline: a transport failure
    /// surfaces through `PolicyEvalResult` per the backend's fail mode and
    /// is handled the same as any other violation set.
    pub async fn evaluate_policy(&self, request: &mut ChangeRequest, now: DateTime<Utc>) -> PolicyEvalResult {
        let document = build_document(request);
        let result = self.policy.evaluate(&document).await;
        request.violations = result.violations.clone();
        push_audit(request, "system", GovernanceState::PolicyEvaluated, "policy evaluation completed", now);

        if result.has_deny() {
            let reason = result
                .violations
                .iter()
                .find(|v| v.action == PolicyAction::Deny)
                .map(|v| v.message.clone())
                .unwrap_or_else(|| "policy denied the change".into());
            request.rejection_reason = Some(reason.clone());
            push_audit(request, "system", GovernanceState::Rejected, reason, now);
            return result;
        }

        let level = request.risk_level.as_deref().and_then(parse_level).unwrap_or(RiskLevel::Minimal);
        let risk_requires_approval = matches!(level, RiskLevel::Critical | RiskLevel::High | RiskLevel::Medium);
        if result.requires_approval() || risk_requires_approval {
            match self.start_approval_chain(request, level, now) {
                Ok(()) => {}
                Err(e) => {
                    request.rejection_reason = Some(e.to_string());
                    push_audit(request, "system", GovernanceState::Rejected, e.to_string(), now);
                }
            }
        } else {
            push_audit(request, "system", GovernanceState::Approved, "no approval required", now);
        }

        result
    }

    fn start_approval_chain(&self, request: &mut ChangeRequest, level: RiskLevel, now: DateTime<Utc>) -> Result<(), GovernanceError> {
        let template = self
            .approval_chains
            .iter()
            .filter(|((env, min_level), _)| env == &request.environment && *min_level <= level)
            .max_by_key(|((_, min_level), _)| *min_level)
            .map(|(_, template)| template.clone())
            .ok_or_else(|| GovernanceError::NoApprovalTemplate(request.environment.clone(), level))?;

        request.approval_chain = template
            .steps
            .iter()
            .enumerate()
            .map(|(i, (required, timeout))| ApprovalStep::new(i, *required, *timeout))
            .collect();
        request.approval_ordering = template.ordering;
        push_audit(request, "system", GovernanceState::AwaitingApproval, "awaiting approval", now);
        Ok(())
    }

    /// Record one approver's decision. Sequential chains only accept a
    /// decision for the first step that is neither satisfied nor rejected;
    /// parallel chains accept a decision for any still-open step. The chain's
    /// ordering was fixed once, in `start_approval_chain`, so callers no
    /// longer choose it per call.
    pub fn submit_approval(
        &self,
        request: &mut ChangeRequest,
        step_index: usize,
        decision: ApprovalDecision,
        now: DateTime<Utc>,
    ) -> Result<(), GovernanceError> {
        if request.state != GovernanceState::AwaitingApproval {
            return Err(GovernanceError::InvalidTransition { from: request.state, to: GovernanceState::AwaitingApproval });
        }

        if request.approval_ordering == ChainOrdering::Sequential {
            let current = request
                .approval_chain
                .iter()
                .position(|s| !s.is_satisfied() && !s.has_rejection())
                .unwrap_or(usize::MAX);
            if step_index != current {
                return Err(GovernanceError::StepAlreadyClosed(step_index));
            }
        }

        let step = request
            .approval_chain
            .get_mut(step_index)
            .ok_or(GovernanceError::StepAlreadyClosed(step_index))?;
        if step.is_satisfied() || step.has_rejection() {
            return Err(GovernanceError::StepAlreadyClosed(step_index));
        }
        let approved = decision.approved;
        let approver = decision.approver.clone();
        step.decisions.push(decision);

        if !approved {
            push_audit(request, &approver, GovernanceState::Rejected, format!("step {step_index} rejected"), now);
            return Ok(());
        }

        let all_satisfied = request.approval_chain.iter().all(|s| s.is_satisfied());
        if all_satisfied {
            push_audit(request, &approver, GovernanceState::Approved, "approval chain complete", now);
        }
        Ok(())
    }

    /// `approved -> executed`. The governor does not invoke the applier
    /// itself (§4.8 "no applier is invoked" on denial) — the caller runs
    /// the mutation and then calls this to close out the request.
    pub fn mark_executed(&self, request: &mut ChangeRequest, now: DateTime<Utc>) -> Result<(), GovernanceError> {
        if request.state != GovernanceState::Approved {
            return Err(GovernanceError::InvalidTransition { from: request.state, to: GovernanceState::Executed });
        }
        push_audit(request, "system", GovernanceState::Executed, "change applied", now);
        Ok(())
    }

    /// Cancel a request from any non-terminal state (invariant 7).
    pub fn cancel(&self, request: &mut ChangeRequest, actor: &str, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), GovernanceError> {
        if request.state.is_terminal() {
            return Err(GovernanceError::InvalidTransition { from: request.state, to: GovernanceState::Cancelled });
        }
        push_audit(request, actor, GovernanceState::Cancelled, reason, now);
        Ok(())
    }
}

fn parse_level(s: &str) -> Option<RiskLevel> {
    match s {
        "minimal" => Some(RiskLevel::Minimal),
        "low" => Some(RiskLevel::Low),
        "medium" => Some(RiskLevel::Medium),
        "high" => Some(RiskLevel::High),
        "critical" => Some(RiskLevel::Critical),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{LocalPolicyBackend, MockPolicyBackend, PolicyRule};
    use crate::policy::condition::Condition;
    use crate::risk::OperationCategory;
    use crate::types::{InitiatorType, NodeId};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn base_request(environment: &str) -> ChangeRequest {
        let mut req = ChangeRequest::new("alice", InitiatorType::Human, NodeId::from_raw("n1"), "delete", environment);
        req.resource_names = vec!["orders-prod-db".into()];
        req
    }

    #[tokio::test]
    async fn policy_deny_short_circuits_to_rejected() {
        let rule = PolicyRule {
            id: "deny-delete".into(),
            package: "governance".into(),
            severity: crate::drift::Severity::Critical,
            action: PolicyAction::Deny,
            message_template: "deny {{action}}".into(),
            condition: Condition::FieldEquals { field: "action".into(), value: json!("delete") },
        };
        let backend = Arc::new(LocalPolicyBackend::new(vec![rule]));
        let governor = ChangeGovernor::new(RiskConfig::default(), backend, ApprovalChainTable::new());

        let mut request = base_request("production");
        let cmd = CommandDescriptor { category: OperationCategory::Delete, dangerous: true };
        governor.assess_risk(&mut request, &cmd, 1, now());
        governor.evaluate_policy(&mut request, now()).await;

        assert_eq!(request.state, GovernanceState::Rejected);
        assert!(request.rejection_reason.is_some());
    }

    #[tokio::test]
    async fn high_risk_without_deny_enters_awaiting_approval() {
        let backend = Arc::new(MockPolicyBackend::new());
        let mut chains = ApprovalChainTable::new();
        chains.insert(
            ("production".into(), RiskLevel::Critical),
            ApprovalChainTemplate { ordering: ChainOrdering::Sequential, steps: vec![(1, None)] },
        );
        let governor = ChangeGovernor::new(RiskConfig::default(), backend, chains);

        let mut request = base_request("production");
        let cmd = CommandDescriptor { category: OperationCategory::Delete, dangerous: false };
        governor.assess_risk(&mut request, &cmd, 1, now());
        assert_eq!(request.risk_level.as_deref(), Some("critical"));
        governor.evaluate_policy(&mut request, now()).await;

        assert_eq!(request.state, GovernanceState::AwaitingApproval);
        assert_eq!(request.approval_chain.len(), 1);

        let decision = ApprovalDecision { approver: "bob".into(), approved: true, reason: None, decided_at: now() };
        governor.submit_approval(&mut request, 0, decision, now()).unwrap();
        assert_eq!(request.state, GovernanceState::Approved);

        governor.mark_executed(&mut request, now()).unwrap();
        assert_eq!(request.state, GovernanceState::Executed);
    }

    #[tokio::test]
    async fn low_risk_clean_policy_goes_straight_to_approved() {
        let backend = Arc::new(MockPolicyBackend::new());
        let governor = ChangeGovernor::new(RiskConfig::default(), backend, ApprovalChainTable::new());
        let mut request = base_request("development");
        request.resource_names = vec!["sandbox-1".into()];
        let cmd = CommandDescriptor { category: OperationCategory::Audit, dangerous: false };
        governor.assess_risk(&mut request, &cmd, 1, now());
        governor.evaluate_policy(&mut request, now()).await;
        assert_eq!(request.state, GovernanceState::Approved);
    }

    #[test]
    fn cancel_is_rejected_from_a_terminal_state() {
        let backend = Arc::new(MockPolicyBackend::new());
        let governor = ChangeGovernor::new(RiskConfig::default(), backend, ApprovalChainTable::new());
        let mut request = base_request("development");
        request.state = GovernanceState::Executed;
        let result = governor.cancel(&mut request, "alice", "changed my mind", now());
        assert!(result.is_err());
    }
}
