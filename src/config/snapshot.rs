//! The immutable per-request view of manifest, registry and tenants.
//!
//! A request loads the current snapshot once and uses it throughout, so a
//! reload never mixes old and new configuration within one call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;

use crate::config::schema::PathsConfig;
use crate::handlers::HandlerSet;
use crate::tenancy::TenantDirectory;
use crate::tools::{ManifestError, RegistryError, ToolManifest, ToolRegistry};

/// Errors raised while building a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("snapshot was built in memory and has no source to reload from")]
    NoSource,
}

/// Compiled tools plus a fresh tenant directory.
#[derive(Debug)]
pub struct ConfigSnapshot {
    pub registry: ToolRegistry,
    pub tenants: TenantDirectory,
    pub version: u64,
    pub loaded_at: SystemTime,
}

/// Atomically swappable holder of the current [`ConfigSnapshot`].
pub struct SnapshotHandle {
    current: ArcSwap<ConfigSnapshot>,
    source: Option<(PathsConfig, HandlerSet)>,
    version: AtomicU64,
}

fn build(paths: &PathsConfig, handlers: &HandlerSet, version: u64) -> Result<ConfigSnapshot, SnapshotError> {
    let manifest = ToolManifest::load(&paths.manifest)?;
    let registry = ToolRegistry::build(&manifest, handlers)?;
    Ok(ConfigSnapshot {
        registry,
        tenants: TenantDirectory::new(&paths.tenants_dir, &paths.policies_dir),
        version,
        loaded_at: SystemTime::now(),
    })
}

impl SnapshotHandle {
    /// Build the first snapshot from disk.
    pub fn load(paths: PathsConfig, handlers: HandlerSet) -> Result<Self, SnapshotError> {
        let snapshot = build(&paths, &handlers, 1)?;
        tracing::info!(tools = snapshot.registry.len(), manifest = ?paths.manifest, "Configuration snapshot loaded");
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            source: Some((paths, handlers)),
            version: AtomicU64::new(1),
        })
    }

    /// A fixed snapshot with no backing files.
    pub fn from_parts(registry: ToolRegistry, tenants: TenantDirectory) -> Self {
        Self {
            current: ArcSwap::from_pointee(ConfigSnapshot {
                registry,
                tenants,
                version: 1,
                loaded_at: SystemTime::now(),
            }),
            source: None,
            version: AtomicU64::new(1),
        }
    }

    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// Rebuild from disk and swap. On failure the current snapshot stays.
    pub fn reload(&self) -> Result<Arc<ConfigSnapshot>, SnapshotError> {
        let (paths, handlers) = self.source.as_ref().ok_or(SnapshotError::NoSource)?;
        let version = self.version.load(Ordering::SeqCst) + 1;

        match build(paths, handlers, version) {
            Ok(snapshot) => {
                self.version.store(version, Ordering::SeqCst);
                let snapshot = Arc::new(snapshot);
                self.current.store(Arc::clone(&snapshot));
                tracing::info!(version, tools = snapshot.registry.len(), "Configuration reloaded");
                Ok(snapshot)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload configuration. Keeping current snapshot.");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn manifest(tools: &[&str]) -> String {
        let tools: Vec<serde_json::Value> = tools
            .iter()
            .map(|name| serde_json::json!({"name": name, "side_effects": "read"}))
            .collect();
        serde_json::json!({ "tools": tools }).to_string()
    }

    fn paths(dir: &std::path::Path) -> PathsConfig {
        fs::create_dir_all(dir.join("tenants")).unwrap();
        fs::create_dir_all(dir.join("policies")).unwrap();
        PathsConfig {
            manifest: dir.join("tools.json"),
            tenants_dir: dir.join("tenants"),
            policies_dir: dir.join("policies"),
            watch: false,
        }
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        fs::write(&paths.manifest, manifest(&["meta.health"])).unwrap();

        let handle = SnapshotHandle::load(paths.clone(), HandlerSet::builtin()).unwrap();
        let before = handle.current();
        assert_eq!(before.registry.names(), vec!["meta.health"]);

        fs::write(&paths.manifest, manifest(&["meta.health", "crm.lookup_customer"])).unwrap();
        handle.reload().unwrap();

        let after = handle.current();
        assert_eq!(after.version, 2);
        assert_eq!(after.registry.len(), 2);
        // In-flight holders keep the snapshot they loaded.
        assert_eq!(before.registry.len(), 1);
    }

    #[test]
    fn test_failed_reload_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        fs::write(&paths.manifest, manifest(&["meta.health"])).unwrap();
        let handle = SnapshotHandle::load(paths.clone(), HandlerSet::builtin()).unwrap();

        fs::write(&paths.manifest, "{ broken").unwrap();
        assert!(handle.reload().is_err());
        assert_eq!(handle.current().version, 1);
        assert_eq!(handle.current().registry.len(), 1);
    }

    #[test]
    fn test_in_memory_snapshot_cannot_reload() {
        let handle = SnapshotHandle::from_parts(ToolRegistry::default(), TenantDirectory::in_memory());
        assert!(matches!(handle.reload(), Err(SnapshotError::NoSource)));
    }
}
