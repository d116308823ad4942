//! Demo CRM provider.
//!
//! Stand-in for a real CRM connector: every action is computed from its
//! input, and generated ids are stable so replays and tests can predict them.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::handlers::{HandlerError, HandlerOutput, InvocationContext, ToolHandler};

/// The CRM actions exposed as tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrmAction {
    LookupCustomer,
    CreateCase,
    AddNote,
    UpdateCase,
    EscalateCase,
}

impl CrmAction {
    pub const ALL: [CrmAction; 5] = [
        CrmAction::LookupCustomer,
        CrmAction::CreateCase,
        CrmAction::AddNote,
        CrmAction::UpdateCase,
        CrmAction::EscalateCase,
    ];

    pub fn tool_name(self) -> &'static str {
        match self {
            CrmAction::LookupCustomer => "crm.lookup_customer",
            CrmAction::CreateCase => "crm.create_case",
            CrmAction::AddNote => "crm.add_note",
            CrmAction::UpdateCase => "crm.update_case",
            CrmAction::EscalateCase => "crm.escalate_case",
        }
    }
}

/// Stable 32-bit rolling hash (`h = h * 31 + c`) rendered in hex.
pub fn stable_id_hash(input: &str) -> String {
    let hash = input
        .encode_utf16()
        .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(u32::from(unit)));
    format!("{hash:x}")
}

/// How confidently a free-form query identifies a customer.
pub fn match_quality(query: &str) -> &'static str {
    if looks_like_phone(query) || query.contains('@') {
        "strong"
    } else if query.chars().count() > 3 {
        "fuzzy"
    } else {
        "none"
    }
}

fn looks_like_phone(query: &str) -> bool {
    let digits = query.strip_prefix('+').unwrap_or(query);
    digits.len() >= 10 && digits.chars().all(|c| c.is_ascii_digit())
}

fn identifiers(query: &str) -> Value {
    if query.contains('@') {
        json!({ "email": query })
    } else if looks_like_phone(query) {
        json!({ "phone": query })
    } else {
        json!({ "customer_number": query })
    }
}

#[derive(Debug, Deserialize)]
struct LookupInput {
    query: String,
}

#[derive(Debug, Deserialize)]
struct CreateCaseInput {
    customer_id: String,
    subject: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddNoteInput {
    case_id: String,
    body: String,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    author: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateCaseInput {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    assigned_queue: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    custom_fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct EscalateCaseInput {
    id: String,
    queue: String,
}

fn parse<T: serde::de::DeserializeOwned>(input: Value) -> Result<T, HandlerError> {
    serde_json::from_value(input).map_err(|e| HandlerError::InvalidInput(e.to_string()))
}

/// Handler for one [`CrmAction`].
#[derive(Debug, Clone, Copy)]
pub struct CrmHandler {
    action: CrmAction,
}

impl CrmHandler {
    pub fn new(action: CrmAction) -> Self {
        Self { action }
    }

    fn lookup_customer(input: LookupInput) -> Value {
        json!({
            "match_quality": match_quality(&input.query),
            "customer": {
                "id": format!("cust_{}", stable_id_hash(&input.query)),
                "identifiers": identifiers(&input.query),
                "primary_contact": { "name": "Unknown", "phones": [], "emails": [] },
                "external_ids": [],
                "attributes": {},
                "entitlements": [],
                "segments": []
            }
        })
    }

    fn create_case(input: CreateCaseInput) -> Value {
        let id = stable_id_hash(&format!("{}:{}", input.customer_id, input.subject));
        json!({
            "case": {
                "id": format!("case_{id}"),
                "subject": input.subject,
                "status": "new",
                "priority": input.priority.unwrap_or_else(|| "normal".to_string()),
                "customer_id": input.customer_id,
                "tags": input.tags,
                "custom_fields": {}
            }
        })
    }

    fn add_note(input: AddNoteInput) -> Value {
        let id = stable_id_hash(&format!("{}:{}", input.case_id, input.body));
        json!({
            "note": {
                "id": format!("note_{id}"),
                "case_id": input.case_id,
                "channel": "voice",
                "body": input.body,
                "visibility": input.visibility.unwrap_or_else(|| "internal".to_string()),
                "author": input.author.unwrap_or_else(|| "system".to_string())
            }
        })
    }

    fn update_case(input: UpdateCaseInput) -> Value {
        let mut case = json!({
            "id": input.id,
            "subject": input.subject.unwrap_or_else(|| "Updated".to_string()),
            "status": input.status.unwrap_or_else(|| "open".to_string()),
            "priority": input.priority.unwrap_or_else(|| "normal".to_string()),
            "customer_id": "unknown",
            "tags": input.tags,
            "custom_fields": input.custom_fields
        });
        if let (Some(queue), Some(obj)) = (input.assigned_queue, case.as_object_mut()) {
            obj.insert("assigned_queue".to_string(), Value::String(queue));
        }
        json!({ "case": case })
    }

    fn escalate_case(input: EscalateCaseInput) -> Value {
        json!({
            "case": {
                "id": input.id,
                "subject": "Escalated",
                "status": "open",
                "priority": "high",
                "customer_id": "unknown",
                "assigned_queue": input.queue,
                "tags": [],
                "custom_fields": { "escalated": true }
            }
        })
    }
}

#[async_trait]
impl ToolHandler for CrmHandler {
    async fn invoke(&self, ctx: &InvocationContext, input: Value) -> Result<HandlerOutput, HandlerError> {
        tracing::debug!(tenant = %ctx.tenant.id, tool = %ctx.tool, "CRM action");
        let payload = match self.action {
            CrmAction::LookupCustomer => Self::lookup_customer(parse(input)?),
            CrmAction::CreateCase => Self::create_case(parse(input)?),
            CrmAction::AddNote => Self::add_note(parse(input)?),
            CrmAction::UpdateCase => Self::update_case(parse(input)?),
            CrmAction::EscalateCase => Self::escalate_case(parse(input)?),
        };
        Ok(HandlerOutput::ok(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::auth::Principal;
    use crate::tenancy::TenantContext;
    use std::sync::Arc;

    fn ctx(tool: &str) -> InvocationContext {
        InvocationContext {
            tenant: Arc::new(TenantContext::with_defaults("demo")),
            tool: tool.to_string(),
            principal: Principal::new("tester", ["case:write"]),
            call_id: None,
            request_id: None,
        }
    }

    #[test]
    fn test_stable_id_hash() {
        assert_eq!(stable_id_hash(""), "0");
        assert_eq!(stable_id_hash("a"), "61");
        assert_eq!(stable_id_hash("ab"), format!("{:x}", 97 * 31 + 98));
        assert_eq!(stable_id_hash("cust_1:X"), stable_id_hash("cust_1:X"));
    }

    #[test]
    fn test_match_quality() {
        assert_eq!(match_quality("+15125550100"), "strong");
        assert_eq!(match_quality("jane@example.com"), "strong");
        assert_eq!(match_quality("jane doe"), "fuzzy");
        assert_eq!(match_quality("abc"), "none");
    }

    #[tokio::test]
    async fn test_create_case_is_deterministic() {
        let handler = CrmHandler::new(CrmAction::CreateCase);
        let input = json!({"customer_id": "cust_1", "subject": "X"});

        let first = handler.invoke(&ctx("crm.create_case"), input.clone()).await.unwrap();
        let second = handler.invoke(&ctx("crm.create_case"), input).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.status, 200);
        let id = first.payload["case"]["id"].as_str().unwrap();
        assert_eq!(id, format!("case_{}", stable_id_hash("cust_1:X")));
        assert_eq!(first.payload["case"]["priority"], "normal");
    }

    #[tokio::test]
    async fn test_escalate_sets_queue() {
        let handler = CrmHandler::new(CrmAction::EscalateCase);
        let out = handler
            .invoke(&ctx("crm.escalate_case"), json!({"id": "case_1", "queue": "tier2_us"}))
            .await
            .unwrap();
        assert_eq!(out.payload["case"]["assigned_queue"], "tier2_us");
        assert_eq!(out.payload["case"]["custom_fields"]["escalated"], true);
    }

    #[tokio::test]
    async fn test_lookup_identifiers() {
        let handler = CrmHandler::new(CrmAction::LookupCustomer);
        let out = handler
            .invoke(&ctx("crm.lookup_customer"), json!({"query": "+15125550100"}))
            .await
            .unwrap();
        assert_eq!(out.payload["match_quality"], "strong");
        assert_eq!(out.payload["customer"]["identifiers"]["phone"], "+15125550100");
    }

    #[tokio::test]
    async fn test_malformed_input_is_rejected() {
        let handler = CrmHandler::new(CrmAction::AddNote);
        let err = handler.invoke(&ctx("crm.add_note"), json!({"case_id": 1})).await;
        assert!(matches!(err, Err(HandlerError::InvalidInput(_))));
    }
}
