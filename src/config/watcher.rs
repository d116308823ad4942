//! File watcher for hot reload of the manifest and tenant documents.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::config::schema::PathsConfig;
use crate::config::snapshot::SnapshotHandle;

/// Coalescing window for bursts of file events (editors write several times).
const DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches configuration files and signals when a reload is due.
pub struct ConfigWatcher {
    targets: Vec<(PathBuf, RecursiveMode)>,
    change_tx: mpsc::UnboundedSender<()>,
}

impl ConfigWatcher {
    /// Create a watcher for the manifest and the tenant/policy directories.
    ///
    /// Returns the watcher and a receiver of change notifications.
    pub fn new(paths: &PathsConfig) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let targets = vec![
            (paths.manifest.clone(), RecursiveMode::NonRecursive),
            (paths.tenants_dir.clone(), RecursiveMode::NonRecursive),
            (paths.policies_dir.clone(), RecursiveMode::NonRecursive),
        ];
        (Self { targets, change_tx }, change_rx)
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.change_tx.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                        tracing::debug!(paths = ?event.paths, "Config change detected");
                        let _ = tx.send(());
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        for (path, mode) in &self.targets {
            if path.exists() {
                watcher.watch(path, *mode)?;
            } else {
                tracing::warn!(path = ?path, "Config path missing; not watched");
            }
        }

        tracing::info!(targets = self.targets.len(), "Config watcher started");
        Ok(watcher)
    }
}

/// Rebuild the snapshot whenever the watcher reports a change, until shutdown.
pub async fn run_reload_loop(
    snapshots: Arc<SnapshotHandle>,
    mut changes: mpsc::UnboundedReceiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            change = changes.recv() => {
                if change.is_none() {
                    break;
                }
                tokio::time::sleep(DEBOUNCE).await;
                while changes.try_recv().is_ok() {}
                // Failures are logged by `reload`; the current snapshot stays.
                let _ = snapshots.reload();
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Reload loop stopped");
}
