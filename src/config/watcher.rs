//! Hot reload of the controller configuration file.
//!
//! The parent directory is watched rather than the file itself, so a file
//! replaced by rename (editors, mounted ConfigMaps) is still picked up.
//! Only files that parse and pass `validate_config` are published. Anything
//! else is logged and the running configuration stays in effect.

use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::ControllerConfig;

/// Publishes each valid revision of one configuration file.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<ControllerConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ControllerConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                updates,
            },
            rx,
        )
    }

    /// Start watching on notify's background thread.
    ///
    /// The returned watcher must be kept alive for events to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, updates } = self;
        let dir = watch_dir(&path);
        let target = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, &target) => {
                    if let Some(config) = reload(&target) {
                        let _ = updates.send(config);
                    }
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(%error, "Config watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Watching configuration file");
        Ok(watcher)
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Whether `event` may have changed the contents of `path`.
fn touches(event: &Event, path: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|changed| changed.file_name() == path.file_name())
}

/// Load `path`, or log why it was refused and return `None`.
fn reload(path: &Path) -> Option<ControllerConfig> {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "Configuration reloaded");
            Some(config)
        }
        Err(ConfigError::Validation(errors)) => {
            for error in &errors {
                tracing::error!(%error, "Invalid configuration");
            }
            tracing::warn!(
                errors = errors.len(),
                "Configuration change rejected, keeping current configuration"
            );
            None
        }
        Err(error) => {
            tracing::error!(%error, "Failed to reload configuration, keeping current configuration");
            None
        }
    }
}
