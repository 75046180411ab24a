//! In-process policy evaluation over a fixed rule set.

use async_trait::async_trait;

use super::condition::{evaluate, interpolate};
use super::{PolicyBackend, PolicyEvalResult, PolicyRule, PolicyViolation};

/// Evaluates every rule in `rules` against the document and collects every
/// violation; a rule with no matching condition contributes nothing.
pub struct LocalPolicyBackend {
    rules: Vec<PolicyRule>,
}

impl LocalPolicyBackend {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl PolicyBackend for LocalPolicyBackend {
    async fn evaluate(&self, document: &serde_json::Value) -> PolicyEvalResult {
        let started = std::time::Instant::now();
        let violations: Vec<PolicyViolation> = self
            .rules
            .iter()
            .filter(|rule| evaluate(&rule.condition, document))
            .map(|rule| PolicyViolation {
                rule_id: rule.id.clone(),
                package: rule.package.clone(),
                severity: rule.severity,
                action: rule.action,
                message: interpolate(&rule.message_template, document),
            })
            .collect();

        PolicyEvalResult {
            ok: true,
            violations,
            duration_ms: started.elapsed().as_millis() as u64,
            error: None,
        }
    }
}
