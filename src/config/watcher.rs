//! Mapping document watcher for hot-reload support
//!
//! The watcher only signals; the engine's thread does the actual reload so
//! the binding table is still mutated from one place. A failed reload keeps
//! the previous table.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Wait for writers to finish before signalling
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the mapping document and reports when it changed
pub struct MappingWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<PathBuf>,
}

impl MappingWatcher {
    /// Start watching `path`
    ///
    /// The parent directory is watched rather than the file itself so that
    /// editors replacing the file (write to temp, rename) are still seen.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path: PathBuf = path.into();
        let (tx, rx) = mpsc::channel(10);

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(|name| name.to_os_string());

        // notify callbacks run on their own OS thread, not in Tokio context
        let runtime_handle = tokio::runtime::Handle::current();
        let pending = Arc::new(AtomicBool::new(false));
        let target = path.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let touches_target = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if !touches_target {
                        return;
                    }
                    debug!("Mapping file changed: {:?}", event.paths);

                    // Collapse bursts of events into one signal
                    if pending.swap(true, Ordering::AcqRel) {
                        return;
                    }
                    let tx = tx.clone();
                    let pending = Arc::clone(&pending);
                    let target = target.clone();
                    runtime_handle.spawn(async move {
                        tokio::time::sleep(DEBOUNCE).await;
                        pending.store(false, Ordering::Release);
                        if let Err(e) = tx.send(target).await {
                            error!("Failed to send mapping change: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        watcher
            .watch(Path::new(&dir), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch mapping directory: {}", dir.display()))?;

        info!("Mapping file watcher started for: {}", path.display());

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next change
    /// Returns None if the watcher has been closed
    pub async fn changed(&mut self) -> Option<PathBuf> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::BindingStore;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mapping_watcher_signals_change() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("mappings.json");
        fs::write(&path, r#"{"version": 1, "bindings": []}"#)?;

        let mut watcher = MappingWatcher::new(&path)?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(
            &path,
            r#"{"version": 1, "bindings": [{"id": 1, "kind": "cc", "action_ref": "a"}]}"#,
        )?;

        // Wait for the signal (with timeout)
        let changed = tokio::time::timeout(Duration::from_secs(2), watcher.changed()).await?;

        let changed = changed.expect("watcher channel closed");
        assert_eq!(changed, path);
        let mut store = BindingStore::new();
        assert_eq!(store.load_path(&changed)?, 1);

        Ok(())
    }
}
