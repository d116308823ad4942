//! Per-tenant policy documents.
//!
//! ```json
//! {
//!   "escalate_case": {
//!     "queue": { "allow": ["tier1", "tier2_us"], "needs_approval": ["legal"] }
//!   },
//!   "update_case": {
//!     "priority": { "deny": ["urgent"] }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Steps reported for a needs-approval decision when a rule names none.
pub const DEFAULT_APPROVAL_STEP: &str = "supervisor_approval";

/// Rules for every governed action of one tenant.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PolicyDocument {
    actions: HashMap<String, ActionRules>,
}

/// Field rules for one action, evaluated in field-name order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ActionRules {
    pub fields: BTreeMap<String, FieldRule>,
}

/// Allow/deny/needs-approval lists for one input field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FieldRule {
    /// When present, values outside this list (and outside `needs_approval`) are denied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs_approval: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_steps: Option<Vec<String>>,
}

impl FieldRule {
    /// Steps a caller must complete before a needs-approval value proceeds.
    pub fn approval_steps(&self) -> Vec<String> {
        self.required_steps
            .clone()
            .filter(|steps| !steps.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_APPROVAL_STEP.to_string()])
    }
}

impl PolicyDocument {
    /// Whether `action` has any rules, i.e. the action is policy-gated.
    pub fn governs(&self, action: &str) -> bool {
        self.actions
            .get(action)
            .is_some_and(|rules| !rules.fields.is_empty())
    }

    /// Rules for `action`.
    pub fn rules(&self, action: &str) -> Option<&ActionRules> {
        self.actions.get(action)
    }

    /// Add or replace the rules for `action`.
    pub fn with_action(mut self, action: impl Into<String>, rules: ActionRules) -> Self {
        self.actions.insert(action.into(), rules);
        self
    }
}

impl ActionRules {
    /// Add a rule for `field`.
    pub fn with_field(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.insert(field.into(), rule);
        self
    }
}
