//! Configuration file watcher for hot reload.

use crate::config::{load_document, ConfigStore, Settings};
use crate::error::Result;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Reloads the config document into a [`ConfigStore`] whenever it changes.
pub struct ConfigWatcher {
    path: PathBuf,
    store: Arc<ConfigStore>,
}

impl ConfigWatcher {
    pub fn new(path: &Path, store: Arc<ConfigStore>) -> Self {
        Self {
            path: path.to_path_buf(),
            store,
        }
    }

    /// Reads the document and publishes it. On failure the current
    /// snapshot stays in effect.
    pub fn reload(&self) -> Result<Arc<Settings>> {
        let document = load_document(&self.path)?;
        Ok(self.store.apply(&document))
    }

    /// Start watching in the background.
    ///
    /// The parent directory is watched rather than the file itself so that
    /// editors that save by renaming a new file into place are seen too.
    /// The returned watcher must be kept alive for reloads to continue.
    pub fn run(self) -> Result<RecommendedWatcher> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(|name| name.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if !relevant {
                        return;
                    }

                    info!("File change detected {:?} {}", event.kind, self.path.display());
                    match self.reload() {
                        Ok(settings) => info!(
                            debug = settings.debug,
                            filters = settings.filters.len(),
                            "Config reloaded"
                        ),
                        Err(e) => warn!(
                            "Failed to reload config: {}. Keeping current configuration.",
                            e
                        ),
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(path = ?dir, "Config watcher started");
        Ok(watcher)
    }
}
