//! Append-only log of dispatched write events.
//!
//! Downstream consumers read the durable `outbox` table and mark rows
//! dispatched; the gateway only appends.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::store::StoreError;

/// One dispatched write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxEvent {
    pub tenant: String,
    pub tool: String,
    pub request: Value,
    pub result: Value,
    pub created_at_ms: u64,
}

#[async_trait]
pub trait Outbox: Send + Sync {
    fn name(&self) -> &'static str;

    async fn append(&self, event: &OutboxEvent) -> Result<(), StoreError>;
}

/// In-process outbox, used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    events: Mutex<Vec<OutboxEvent>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event appended so far, oldest first.
    pub async fn events(&self) -> Vec<OutboxEvent> {
        self.events.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }
}

#[async_trait]
impl Outbox for MemoryOutbox {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, event: &OutboxEvent) -> Result<(), StoreError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// Durable outbox (`outbox` table).
#[derive(Debug, Clone)]
pub struct PostgresOutbox {
    pool: PgPool,
}

impl PostgresOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Outbox for PostgresOutbox {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn append(&self, event: &OutboxEvent) -> Result<(), StoreError> {
        let payload = json!({ "request": event.request, "result": event.result });
        sqlx::query(
            r"
insert into outbox (tenant_id, tool, payload)
values ($1, $2, $3)
",
        )
        .bind(&event.tenant)
        .bind(&event.tool)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_outbox_keeps_order() {
        let outbox = MemoryOutbox::new();
        for tool in ["crm.create_case", "crm.add_note"] {
            outbox
                .append(&OutboxEvent {
                    tenant: "demo".into(),
                    tool: tool.into(),
                    request: json!({}),
                    result: json!({}),
                    created_at_ms: 0,
                })
                .await
                .unwrap();
        }
        let tools: Vec<String> = outbox.events().await.into_iter().map(|e| e.tool).collect();
        assert_eq!(tools, vec!["crm.create_case", "crm.add_note"]);
        assert_eq!(outbox.len().await, 2);
    }
}
