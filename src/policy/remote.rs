//! Remote policy evaluation against an external OPA-compatible service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{FailMode, PolicyAction, PolicyBackend, PolicyEvalResult, PolicyViolation};
use crate::drift::Severity;
use crate::error::retry::{with_backoff, BackoffPolicy};
use crate::error::{Kind, KernelError};

#[derive(Debug, Serialize)]
struct RequestBody<'a> {
    input: &'a serde_json::Value,
}

/// The remote service's response is permissively typed per §4.7: `result`
/// may be a bare boolean deny, or a list of violation objects.
#[derive(Debug, Deserialize)]
struct ResponseBody {
    result: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteViolation {
    #[serde(default)]
    rule_id: Option<String>,
    #[serde(default)]
    package: Option<String>,
    #[serde(default)]
    severity: Option<Severity>,
    #[serde(default)]
    action: Option<PolicyAction>,
    #[serde(default)]
    message: Option<String>,
}

/// Configuration for one remote policy service.
#[derive(Debug, Clone)]
pub struct RemotePolicyConfig {
    pub base_url: String,
    pub policy_path: String,
    pub timeout: Duration,
    pub fail_mode: FailMode,
}

/// Calls an external policy service over HTTP. On transport failure,
/// behaves per `fail_mode`: `open` reports no violations with `ok=false`;
/// `closed` synthesizes one critical deny violation.
pub struct RemotePolicyBackend {
    client: reqwest::Client,
    config: RemotePolicyConfig,
}

impl RemotePolicyBackend {
    pub fn new(config: RemotePolicyConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("reqwest client configuration is always valid");
        Self { client, config }
    }

    fn fail_mode_result(&self, started: std::time::Instant, error: String) -> PolicyEvalResult {
        let duration_ms = started.elapsed().as_millis() as u64;
        match self.config.fail_mode {
            FailMode::Open => PolicyEvalResult { ok: false, violations: Vec::new(), duration_ms, error: Some(error) },
            FailMode::Closed => PolicyEvalResult {
                ok: false,
                violations: vec![PolicyViolation {
                    rule_id: "remote-opa-unreachable".into(),
                    package: "governance.failsafe".into(),
                    severity: Severity::Critical,
                    action: PolicyAction::Deny,
                    message: format!("policy backend unreachable, fail-closed: {error}"),
                }],
                duration_ms,
                error: Some(error),
            },
        }
    }
}

fn parse_result(result: serde_json::Value) -> Vec<PolicyViolation> {
    match result {
        serde_json::Value::Bool(true) => vec![PolicyViolation {
            rule_id: "remote".into(),
            package: "remote".into(),
            severity: Severity::Critical,
            action: PolicyAction::Deny,
            message: "remote policy denied the change".into(),
        }],
        serde_json::Value::Bool(false) => Vec::new(),
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<RemoteViolation>(item).ok())
            .map(|v| PolicyViolation {
                rule_id: v.rule_id.unwrap_or_else(|| "remote".into()),
                package: v.package.unwrap_or_else(|| "remote".into()),
                severity: v.severity.unwrap_or(Severity::Medium),
                action: v.action.unwrap_or(PolicyAction::Warn),
                message: v.message.unwrap_or_default(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl RemotePolicyBackend {
    /// One attempt at the remote call. Transport and non-2xx failures are
    /// classified `Transient` so `with_backoff` retries them; a malformed
    /// response body is `Permanent` since a retry won't fix it.
    async fn try_once(&self, url: &str, document: &serde_json::Value) -> Result<Vec<PolicyViolation>, KernelError> {
        let response = self
            .client
            .post(url)
            .json(&RequestBody { input: document })
            .send()
            .await
            .map_err(|e| KernelError::with_source(Kind::Transient, "remote policy request failed", e))?;

        if !response.status().is_success() {
            return Err(KernelError::new(Kind::Transient, format!("remote policy service returned {}", response.status())));
        }

        let body: ResponseBody = response
            .json()
            .await
            .map_err(|e| KernelError::with_source(Kind::Permanent, "remote policy response was not valid JSON", e))?;

        Ok(parse_result(body.result))
    }
}

#[async_trait]
impl PolicyBackend for RemotePolicyBackend {
    async fn evaluate(&self, document: &serde_json::Value) -> PolicyEvalResult {
        let started = std::time::Instant::now();
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), self.config.policy_path.trim_start_matches('/'));

        match with_backoff(BackoffPolicy::default(), || self.try_once(&url, document)).await {
            Ok(violations) => PolicyEvalResult {
                ok: true,
                violations,
                duration_ms: started.elapsed().as_millis() as u64,
                error: None,
            },
            Err(e) => self.fail_mode_result(started, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_boolean_true_becomes_one_deny() {
        let violations = parse_result(serde_json::json!(true));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].action, PolicyAction::Deny);
    }

    #[test]
    fn bare_boolean_false_has_no_violations() {
        assert!(parse_result(serde_json::json!(false)).is_empty());
    }

    #[test]
    fn violation_array_is_parsed() {
        let violations = parse_result(serde_json::json!([
            {"rule_id": "r1", "package": "p", "severity": "high", "action": "warn", "message": "m"}
        ]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule_id, "r1");
    }
}
