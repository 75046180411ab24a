//! Integration tests for the change governor (C9) driving risk scoring
//! (C7) and policy evaluation (C8) through a request's full lifecycle,
//! beyond the single-path scenarios already covered in governance::tests.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;

use infra_graph_kernel::governance::{ApprovalChainTable, ChangeGovernor};
use infra_graph_kernel::policy::{MockPolicyBackend, PolicyAction, PolicyEvalResult, PolicyViolation};
use infra_graph_kernel::risk::{CommandDescriptor, OperationCategory, RiskConfig, RiskLevel};
use infra_graph_kernel::{ApprovalChainTemplate, ApprovalDecision, ChainOrdering, ChangeRequest, GovernanceState, InitiatorType, NodeId, Severity};

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn base_request(environment: &str, action: &str) -> ChangeRequest {
    ChangeRequest::new("alice", InitiatorType::Human, NodeId::from_raw("n1"), action, environment)
}

fn require_approval_result() -> PolicyEvalResult {
    PolicyEvalResult {
        ok: true,
        violations: vec![PolicyViolation {
            rule_id: "needs-sign-off".into(),
            package: "governance".into(),
            severity: Severity::Medium,
            action: PolicyAction::RequireApproval,
            message: "scaling in production requires sign-off".into(),
        }],
        duration_ms: 0,
        error: None,
    }
}

#[tokio::test]
async fn policy_require_approval_on_low_risk_change_still_enters_approval_chain() {
    let backend = Arc::new(MockPolicyBackend::new().on(|doc| doc["action"] == "scale", require_approval_result()));
    let mut chains = ApprovalChainTable::new();
    chains.insert(
        ("production".into(), RiskLevel::Minimal),
        ApprovalChainTemplate { ordering: ChainOrdering::Parallel, steps: vec![(1, None), (1, None)] },
    );
    let governor = ChangeGovernor::new(RiskConfig::default(), backend, chains);

    let mut request = base_request("production", "scale");
    let cmd = CommandDescriptor { category: OperationCategory::Scale, dangerous: false };
    governor.assess_risk(&mut request, &cmd, 1, now());
    governor.evaluate_policy(&mut request, now()).await;

    assert_eq!(request.state, GovernanceState::AwaitingApproval);
    assert_eq!(request.approval_chain.len(), 2);
}

#[tokio::test]
async fn parallel_chain_accepts_decisions_out_of_order() {
    let backend = Arc::new(MockPolicyBackend::new().on(|doc| doc["action"] == "scale", require_approval_result()));
    let mut chains = ApprovalChainTable::new();
    chains.insert(
        ("production".into(), RiskLevel::Minimal),
        ApprovalChainTemplate { ordering: ChainOrdering::Parallel, steps: vec![(1, None), (1, None)] },
    );
    let governor = ChangeGovernor::new(RiskConfig::default(), backend, chains);

    let mut request = base_request("production", "scale");
    let cmd = CommandDescriptor { category: OperationCategory::Scale, dangerous: false };
    governor.assess_risk(&mut request, &cmd, 1, now());
    governor.evaluate_policy(&mut request, now()).await;

    // Approve the second step first, then the first — parallel chains
    // don't enforce ordering between steps.
    let decision_b = ApprovalDecision { approver: "bob".into(), approved: true, reason: None, decided_at: now() };
    governor.submit_approval(&mut request, 1, decision_b, now()).unwrap();
    assert_eq!(request.state, GovernanceState::AwaitingApproval);

    let decision_a = ApprovalDecision { approver: "carol".into(), approved: true, reason: None, decided_at: now() };
    governor.submit_approval(&mut request, 0, decision_a, now()).unwrap();
    assert_eq!(request.state, GovernanceState::Approved);
}

#[tokio::test]
async fn sequential_chain_rejection_on_first_step_ends_request() {
    let backend = Arc::new(MockPolicyBackend::new().on(|doc| doc["action"] == "delete", require_approval_result()));
    let mut chains = ApprovalChainTable::new();
    chains.insert(
        ("production".into(), RiskLevel::Minimal),
        ApprovalChainTemplate { ordering: ChainOrdering::Sequential, steps: vec![(1, None), (1, None)] },
    );
    let governor = ChangeGovernor::new(RiskConfig::default(), backend, chains);

    let mut request = base_request("production", "delete");
    let cmd = CommandDescriptor { category: OperationCategory::Delete, dangerous: true };
    governor.assess_risk(&mut request, &cmd, 1, now());
    governor.evaluate_policy(&mut request, now()).await;
    assert_eq!(request.state, GovernanceState::AwaitingApproval);

    let rejection = ApprovalDecision { approver: "bob".into(), approved: false, reason: Some("not now".into()), decided_at: now() };
    governor.submit_approval(&mut request, 0, rejection, now()).unwrap();

    assert_eq!(request.state, GovernanceState::Rejected);
}

#[tokio::test]
async fn cancel_from_awaiting_approval_succeeds_but_not_after() {
    let backend = Arc::new(MockPolicyBackend::new().on(|doc| doc["action"] == "scale", require_approval_result()));
    let mut chains = ApprovalChainTable::new();
    chains.insert(
        ("production".into(), RiskLevel::Minimal),
        ApprovalChainTemplate { ordering: ChainOrdering::Sequential, steps: vec![(1, None)] },
    );
    let governor = ChangeGovernor::new(RiskConfig::default(), backend, chains);

    let mut request = base_request("production", "scale");
    let cmd = CommandDescriptor { category: OperationCategory::Scale, dangerous: false };
    governor.assess_risk(&mut request, &cmd, 1, now());
    governor.evaluate_policy(&mut request, now()).await;
    assert_eq!(request.state, GovernanceState::AwaitingApproval);

    governor.cancel(&mut request, "alice", "no longer needed", now()).unwrap();
    assert_eq!(request.state, GovernanceState::Cancelled);

    let err = governor.cancel(&mut request, "alice", "again", now());
    assert!(err.is_err());
}

#[tokio::test]
async fn evaluated_document_carries_risk_assessment_but_never_the_rejection_reason_prefilled() {
    let backend = Arc::new(MockPolicyBackend::new());
    let governor = ChangeGovernor::new(RiskConfig::default(), backend.clone(), ApprovalChainTable::new());

    let mut request = base_request("development", "audit");
    let cmd = CommandDescriptor { category: OperationCategory::Audit, dangerous: false };
    governor.assess_risk(&mut request, &cmd, 1, now());
    governor.evaluate_policy(&mut request, now()).await;

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["risk"]["level"], json!("minimal"));
    assert!(request.rejection_reason.is_none());
}
