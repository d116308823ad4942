//! Policy evaluation for sensitive write actions.

use serde::Serialize;
use serde_json::Value;

use crate::policy::document::{FieldRule, PolicyDocument};

/// Outcome class of a policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Approved,
    NeedsApproval,
    Denied,
}

/// Result of evaluating an action against a tenant's policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub status: PolicyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_steps: Option<Vec<String>>,
}

impl PolicyDecision {
    pub fn approved() -> Self {
        Self {
            status: PolicyStatus::Approved,
            reason: None,
            required_steps: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            status: PolicyStatus::Denied,
            reason: Some(reason.into()),
            required_steps: None,
        }
    }

    pub fn needs_approval(steps: Vec<String>) -> Self {
        Self {
            status: PolicyStatus::NeedsApproval,
            reason: None,
            required_steps: Some(steps),
        }
    }
}

fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn check_field(field: &str, rule: &FieldRule, value: &str) -> Option<PolicyDecision> {
    if rule.deny.iter().any(|v| v == value) {
        return Some(PolicyDecision::denied(format!("{field} not allowed")));
    }
    if rule.needs_approval.iter().any(|v| v == value) {
        return Some(PolicyDecision::needs_approval(rule.approval_steps()));
    }
    match &rule.allow {
        Some(allowed) if !allowed.iter().any(|v| v == value) => {
            Some(PolicyDecision::denied(format!("{field} not allowed")))
        }
        _ => None,
    }
}

/// Evaluate `input` for `action` against `policy`.
///
/// Fields are checked in name order and the first non-approving rule wins.
/// Fields absent from the input, or holding non-scalar values, are not checked.
pub fn evaluate(policy: &PolicyDocument, action: &str, input: &Value) -> PolicyDecision {
    let Some(rules) = policy.rules(action) else {
        return PolicyDecision::approved();
    };

    for (field, rule) in &rules.fields {
        let Some(value) = input.get(field).and_then(field_text) else {
            continue;
        };
        if let Some(decision) = check_field(field, rule, &value) {
            return decision;
        }
    }

    PolicyDecision::approved()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> PolicyDocument {
        serde_json::from_value(json!({
            "escalate_case": {
                "queue": { "allow": ["tier1", "tier2_us"], "needs_approval": ["legal"] }
            },
            "update_case": {
                "priority": { "deny": ["urgent"] }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_escalation_to_allowed_queue() {
        let decision = evaluate(&policy(), "escalate_case", &json!({"id": "c1", "queue": "tier2_us"}));
        assert_eq!(decision, PolicyDecision::approved());
    }

    #[test]
    fn test_escalation_needs_approval() {
        let decision = evaluate(&policy(), "escalate_case", &json!({"id": "c1", "queue": "legal"}));
        assert_eq!(decision.status, PolicyStatus::NeedsApproval);
        assert_eq!(decision.required_steps, Some(vec!["supervisor_approval".to_string()]));
    }

    #[test]
    fn test_escalation_to_other_queue_denied() {
        let decision = evaluate(&policy(), "escalate_case", &json!({"id": "c1", "queue": "exec"}));
        assert_eq!(decision.status, PolicyStatus::Denied);
        assert_eq!(decision.reason.as_deref(), Some("queue not allowed"));
    }

    #[test]
    fn test_denied_priority() {
        let decision = evaluate(&policy(), "update_case", &json!({"id": "c1", "priority": "urgent"}));
        assert_eq!(decision.status, PolicyStatus::Denied);

        let decision = evaluate(&policy(), "update_case", &json!({"id": "c1", "priority": "high"}));
        assert_eq!(decision.status, PolicyStatus::Approved);
    }

    #[test]
    fn test_absent_field_and_ungoverned_action() {
        assert_eq!(evaluate(&policy(), "update_case", &json!({"id": "c1"})).status, PolicyStatus::Approved);
        assert_eq!(evaluate(&policy(), "create_case", &json!({})).status, PolicyStatus::Approved);
        assert!(!policy().governs("create_case"));
        assert!(policy().governs("escalate_case"));
    }

    #[test]
    fn test_custom_required_steps() {
        let policy = PolicyDocument::default().with_action(
            "escalate_case",
            crate::policy::ActionRules::default().with_field(
                "queue",
                FieldRule {
                    needs_approval: vec!["legal".into()],
                    required_steps: Some(vec!["legal_review".into(), "manager_signoff".into()]),
                    ..FieldRule::default()
                },
            ),
        );
        let decision = evaluate(&policy, "escalate_case", &json!({"queue": "legal"}));
        assert_eq!(
            decision.required_steps,
            Some(vec!["legal_review".to_string(), "manager_signoff".to_string()])
        );
    }
}
