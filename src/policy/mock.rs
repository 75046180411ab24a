//! Test double: returns a pre-registered result for whichever registered
//! predicate first matches the document, and logs every call it receives.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{PolicyBackend, PolicyEvalResult};

type Predicate = Box<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

/// A policy backend driven entirely by test-registered predicates, for
/// exercising the governor without a real rule set or network call.
pub struct MockPolicyBackend {
    registrations: Vec<(Predicate, PolicyEvalResult)>,
    default_result: PolicyEvalResult,
    log: Mutex<Vec<serde_json::Value>>,
}

impl MockPolicyBackend {
    pub fn new() -> Self {
        Self { registrations: Vec::new(), default_result: PolicyEvalResult::clean(), log: Mutex::new(Vec::new()) }
    }

    /// Register a result to return for the first document matching `predicate`.
    pub fn on(mut self, predicate: impl Fn(&serde_json::Value) -> bool + Send + Sync + 'static, result: PolicyEvalResult) -> Self {
        self.registrations.push((Box::new(predicate), result));
        self
    }

    pub fn calls(&self) -> Vec<serde_json::Value> {
        self.log.lock().clone()
    }
}

impl Default for MockPolicyBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyBackend for MockPolicyBackend {
    async fn evaluate(&self, document: &serde_json::Value) -> PolicyEvalResult {
        self.log.lock().push(document.clone());
        self.registrations
            .iter()
            .find(|(predicate, _)| predicate(document))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| self.default_result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::Severity;
    use crate::policy::{PolicyAction, PolicyViolation};
    use serde_json::json;

    #[tokio::test]
    async fn registered_predicate_wins_over_default() {
        let deny = PolicyEvalResult {
            ok: true,
            violations: vec![PolicyViolation {
                rule_id: "r1".into(),
                package: "test".into(),
                severity: Severity::Critical,
                action: PolicyAction::Deny,
                message: "denied".into(),
            }],
            duration_ms: 0,
            error: None,
        };
        let backend = MockPolicyBackend::new().on(|doc| doc["action"] == "delete", deny);
        let result = backend.evaluate(&json!({"action": "delete"})).await;
        assert!(result.has_deny());
        let result = backend.evaluate(&json!({"action": "scale"})).await;
        assert!(!result.has_deny());
        assert_eq!(backend.calls().len(), 2);
    }
}
