//! Hot reload of the handler tables.
//!
//! A notify watcher polls the file and hands every change to a [`Reload`]
//! step, which forwards the parsed configuration only when the file content
//! differs from the last accepted version. Editors commonly emit several
//! modify events per save; without the comparison each would re-run the
//! provisioner.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::WhiteboardConfig;

/// Reads the file and decides whether it carries a new configuration.
#[derive(Debug)]
pub struct Reload {
    path: PathBuf,
    last: Option<String>,
}

impl Reload {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            last: None,
        }
    }

    /// Treat `content` as already applied.
    pub fn seed(mut self, content: String) -> Self {
        self.last = Some(content);
        self
    }

    /// `Ok(None)` when the content is unchanged since the last accepted load.
    /// Invalid content is reported and not remembered, so restoring the
    /// applied version afterwards is a no-op.
    pub fn poll(&mut self) -> Result<Option<WhiteboardConfig>, ConfigError> {
        let content = fs::read_to_string(&self.path)?;
        if self.last.as_deref() == Some(content.as_str()) {
            return Ok(None);
        }
        let config = parse_config(&content)?;
        self.last = Some(content);
        Ok(Some(config))
    }
}

/// Watches the configuration file and streams validated changes.
pub struct ConfigWatcher {
    reload: Reload,
    update_tx: mpsc::UnboundedSender<WhiteboardConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<WhiteboardConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let reload = match fs::read_to_string(path) {
            Ok(content) => Reload::new(path).seed(content),
            Err(_) => Reload::new(path),
        };
        (Self { reload, update_tx }, update_rx)
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { reload, update_tx } = self;
        let path = reload.path.clone();
        let reload = Mutex::new(reload);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match reload.lock().poll() {
                        Ok(Some(config)) => {
                            tracing::info!(
                                servlets = config.servlets.len(),
                                filters = config.filters.len(),
                                "Handler tables changed, reprovisioning"
                            );
                            if update_tx.send(config).is_err() {
                                tracing::debug!("Config receiver dropped");
                            }
                        }
                        Ok(None) => tracing::trace!("Config event without content change"),
                        Err(e) => {
                            tracing::error!(error = %e, "Rejected config change, keeping current tables")
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
