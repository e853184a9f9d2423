//! Hot reload of the configuration file.
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by writing a temporary file and renaming it over the original
//! are still picked up.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

/// Re-reads the file and decides whether the result is worth forwarding.
#[derive(Debug)]
pub struct Reloader {
    path: PathBuf,
    last: Option<GatewayConfig>,
}

impl Reloader {
    pub fn new(path: &Path, current: Option<GatewayConfig>) -> Self {
        Self {
            path: path.to_path_buf(),
            last: current,
        }
    }

    /// The new configuration, if the file now holds a valid one that differs
    /// from the last forwarded. A broken edit keeps the current configuration.
    pub fn reload(&mut self) -> Option<GatewayConfig> {
        match load_config(&self.path) {
            Ok(config) if self.last.as_ref() == Some(&config) => {
                tracing::debug!(path = %self.path.display(), "config file touched, contents unchanged");
                None
            }
            Ok(config) => {
                self.last = Some(config.clone());
                Some(config)
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "config reload failed; keeping current configuration"
                );
                None
            }
        }
    }
}

/// Watches the configuration file and sends each valid change.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            updates,
        };
        (watcher, rx)
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let file_name: Option<OsString> = self.path.file_name().map(OsString::from);
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let current = load_config(&self.path).ok();
        let mut reloader = Reloader::new(&self.path, current);
        let updates = self.updates;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "config watch error");
                        return;
                    }
                };
                let touches_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(OsString::from) == file_name);
                if !touches_file || !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                if let Some(config) = reloader.reload() {
                    tracing::info!("config file changed; forwarding new configuration");
                    let _ = updates.send(config);
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "watching config file");
        Ok(watcher)
    }
}
