//! Lazy loading of tenant and policy documents.
//!
//! Documents are read from `<tenants_dir>/<tenant>.json` and
//! `<policies_dir>/<tenant>.json` on first use and kept for the lifetime of
//! the directory. Misses are remembered too, so an unknown tenant costs one
//! file read per directory. A config reload builds a fresh directory, which
//! is how edited or new documents are picked up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::policy::PolicyDocument;
use crate::tenancy::context::{TenantContext, TenantDocument};

/// Tenant ids are used as file names, so only a safe alphabet is accepted.
pub fn is_valid_tenant_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Remembered misses are forgotten wholesale past this many.
const MAX_REMEMBERED_MISSES: usize = 4096;

/// Tenant and policy lookups backed by JSON files.
#[derive(Debug, Default)]
pub struct TenantDirectory {
    tenants_dir: Option<PathBuf>,
    policies_dir: Option<PathBuf>,
    tenants: DashMap<String, Arc<TenantContext>>,
    policies: DashMap<String, Arc<PolicyDocument>>,
    misses: DashMap<String, ()>,
}

impl TenantDirectory {
    /// Directory reading documents from the given folders.
    pub fn new(tenants_dir: impl Into<PathBuf>, policies_dir: impl Into<PathBuf>) -> Self {
        Self {
            tenants_dir: Some(tenants_dir.into()),
            policies_dir: Some(policies_dir.into()),
            ..Self::default()
        }
    }

    /// Directory that only knows tenants inserted with [`Self::insert_tenant`].
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Register a tenant directly.
    pub fn insert_tenant(&self, tenant: TenantContext) {
        self.misses.remove(&tenant.id);
        self.tenants.insert(tenant.id.clone(), Arc::new(tenant));
    }

    /// Register a tenant's policy directly.
    pub fn insert_policy(&self, tenant: &str, policy: PolicyDocument) {
        self.policies.insert(tenant.to_string(), Arc::new(policy));
    }

    /// Tenants loaded so far.
    pub fn loaded_tenants(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tenants.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Resolve `id`, reading its document on first use.
    ///
    /// Returns `None` for malformed ids, missing documents and documents that
    /// fail to parse.
    pub async fn tenant(&self, id: &str) -> Option<Arc<TenantContext>> {
        if let Some(tenant) = self.tenants.get(id) {
            return Some(Arc::clone(tenant.value()));
        }
        if !is_valid_tenant_id(id) || self.misses.contains_key(id) {
            return None;
        }

        let dir = self.tenants_dir.as_deref()?;
        let Some(doc) = read_document::<TenantDocument>(dir, id, "tenant").await else {
            self.remember_miss(id);
            return None;
        };
        let tenant = Arc::new(TenantContext::from_document(id, &doc));

        tracing::debug!(tenant = %id, "Tenant document loaded");
        let entry = self.tenants.entry(id.to_string()).or_insert(tenant);
        Some(Arc::clone(entry.value()))
    }

    /// Tenant ids that resolved to nothing.
    pub fn remembered_misses(&self) -> usize {
        self.misses.len()
    }

    fn remember_miss(&self, id: &str) {
        if self.misses.len() >= MAX_REMEMBERED_MISSES {
            self.misses.clear();
        }
        self.misses.insert(id.to_string(), ());
    }

    /// The policy for `id`; tenants without a policy file get an empty one.
    pub async fn policy(&self, id: &str) -> Arc<PolicyDocument> {
        if let Some(policy) = self.policies.get(id) {
            return Arc::clone(policy.value());
        }

        let loaded = match (&self.policies_dir, is_valid_tenant_id(id)) {
            (Some(dir), true) => read_document::<PolicyDocument>(dir, id, "policy").await,
            _ => None,
        };
        let policy = Arc::new(loaded.unwrap_or_default());
        let entry = self.policies.entry(id.to_string()).or_insert(policy);
        Arc::clone(entry.value())
    }
}

async fn read_document<T>(dir: &Path, id: &str, kind: &'static str) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    let path = dir.join(format!("{id}.json"));
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = ?path, error = %e, "Failed to read {kind} document");
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(doc) => Some(doc),
        Err(e) => {
            tracing::warn!(path = ?path, error = %e, "Invalid {kind} document");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_tenant_id_alphabet() {
        assert!(is_valid_tenant_id("demo"));
        assert!(is_valid_tenant_id("acme_corp-2"));
        assert!(!is_valid_tenant_id(""));
        assert!(!is_valid_tenant_id("../etc/passwd"));
        assert!(!is_valid_tenant_id("a.b"));
    }

    #[tokio::test]
    async fn test_loads_documents_from_disk() {
        let tenants = tempfile::tempdir().unwrap();
        let policies = tempfile::tempdir().unwrap();
        write(
            tenants.path(),
            "acme.json",
            r#"{"tenant_id": "acme", "circuit_breaker": {"failure_threshold": 2, "reset_ms": 250}}"#,
        );
        write(
            policies.path(),
            "acme.json",
            r#"{"escalate_case": {"queue": {"allow": ["tier1"]}}}"#,
        );

        let directory = TenantDirectory::new(tenants.path(), policies.path());
        let tenant = directory.tenant("acme").await.unwrap();
        assert_eq!(tenant.breaker.threshold, 2);
        assert_eq!(tenant.breaker.reset, Duration::from_millis(250));
        assert!(directory.policy("acme").await.governs("escalate_case"));
        assert_eq!(directory.loaded_tenants(), vec!["acme".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_tenants() {
        let tenants = tempfile::tempdir().unwrap();
        let policies = tempfile::tempdir().unwrap();
        write(tenants.path(), "broken.json", "{not json");

        let directory = TenantDirectory::new(tenants.path(), policies.path());
        assert!(directory.tenant("missing").await.is_none());
        assert!(directory.tenant("broken").await.is_none());
        assert!(directory.tenant("../broken").await.is_none());
        assert!(!directory.policy("missing").await.governs("escalate_case"));
    }

    #[tokio::test]
    async fn test_in_memory_directory() {
        let directory = TenantDirectory::in_memory();
        assert!(directory.tenant("demo").await.is_none());

        directory.insert_tenant(TenantContext::with_defaults("demo"));
        assert_eq!(directory.tenant("demo").await.unwrap().id, "demo");
    }

    #[tokio::test]
    async fn test_misses_are_remembered() {
        let tenants = tempfile::tempdir().unwrap();
        let policies = tempfile::tempdir().unwrap();
        let directory = TenantDirectory::new(tenants.path(), policies.path());

        assert!(directory.tenant("late").await.is_none());
        assert_eq!(directory.remembered_misses(), 1);

        // Not re-read until the next reload.
        write(tenants.path(), "late.json", "{}");
        assert!(directory.tenant("late").await.is_none());
        assert!(TenantDirectory::new(tenants.path(), policies.path())
            .tenant("late")
            .await
            .is_some());

        directory.insert_tenant(TenantContext::with_defaults("late"));
        assert_eq!(directory.remembered_misses(), 0);
        assert_eq!(directory.tenant("late").await.unwrap().id, "late");
    }
}
