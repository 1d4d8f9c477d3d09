//! Reload requests for the configuration file.
//!
//! File-system notifications and signals never touch the active snapshot
//! directly. They only post a [`ReloadRequest`] on a channel; the run loop
//! drains it between cycles and calls [`ConfigStore::load`]. The channel holds
//! a single pending request, so a burst of editor writes collapses into one
//! reload.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{ConfigError, ConfigResult, ConfigStore};

/// Why a reload was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    /// The configuration file changed on disk.
    FileChanged,
    /// The process received SIGHUP.
    Signal,
}

/// A request to re-read the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadRequest {
    /// What triggered it.
    pub reason: ReloadReason,
}

/// Handle for posting reload requests from other tasks.
#[derive(Debug, Clone)]
pub struct ReloadSender(mpsc::Sender<ReloadRequest>);

impl ReloadSender {
    /// Post a request. Returns `false` if one is already pending.
    pub fn request(&self, reason: ReloadReason) -> bool {
        self.0.try_send(ReloadRequest { reason }).is_ok()
    }
}

/// Receives reload requests for one configuration file.
pub struct ReloadWatcher {
    // None when only manual requests (signals, tests) are wanted.
    watcher: Option<RecommendedWatcher>,
    sender: ReloadSender,
    receiver: mpsc::Receiver<ReloadRequest>,
}

impl ReloadWatcher {
    /// A watcher fed only through [`ReloadWatcher::sender`].
    #[must_use]
    pub fn manual() -> Self {
        let (tx, receiver) = mpsc::channel(1);
        Self {
            watcher: None,
            sender: ReloadSender(tx),
            receiver,
        }
    }

    /// Watch `path` for modifications.
    ///
    /// The parent directory is watched so that editors replacing the file
    /// through a rename are noticed too.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::WatchFailed`] if the watcher cannot be set up.
    pub fn new(path: &Path) -> ConfigResult<Self> {
        let mut this = Self::manual();

        let file_name: OsString = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| ConfigError::ValidationError {
                field: "config".to_string(),
                message: format!("'{}' is not a file path", path.display()),
            })?;
        let directory = watch_directory(path);

        let sender = this.sender.clone();
        let mut watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| {
                let Ok(event) = result else { return };
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                if event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()))
                {
                    debug!(kind = ?event.kind, "Configuration file changed");
                    sender.request(ReloadReason::FileChanged);
                }
            },
        )
        .map_err(|source| ConfigError::WatchFailed {
            path: path.display().to_string(),
            source,
        })?;

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|source| ConfigError::WatchFailed {
                path: directory.display().to_string(),
                source,
            })?;

        info!(path = %path.display(), "Watching configuration for changes");
        this.watcher = Some(watcher);
        Ok(this)
    }

    /// A handle other tasks can use to request a reload.
    #[must_use]
    pub fn sender(&self) -> ReloadSender {
        self.sender.clone()
    }

    /// Take a pending request without waiting.
    pub fn try_next(&mut self) -> Option<ReloadRequest> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the next request.
    pub async fn next(&mut self) -> Option<ReloadRequest> {
        self.receiver.recv().await
    }
}

impl std::fmt::Debug for ReloadWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadWatcher")
            .field("watching", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Watch this store's source file for changes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::WatchFailed`] if the watcher cannot be set up.
    pub fn watch(&self) -> ConfigResult<ReloadWatcher> {
        ReloadWatcher::new(self.source())
    }
}

fn watch_directory(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
