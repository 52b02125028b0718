//! # File watching for frontmatter sources
//!
//! [`FrontmatterWatcher`] turns filesystem notifications below a [`FrontmatterSource`] root
//! into storage paths, and [`forward_external_changes`] feeds them into a
//! [`MetadataManager`] as external updates or deletions.
//!
//! ```rust,no_run
//! use metabind_core::{
//!     config::ManagerConfig,
//!     manager::MetadataManager,
//!     source::{FrontmatterSource, MetadataSource},
//!     watch::{forward_external_changes, FrontmatterWatcher},
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! # async fn run() -> Result<(), metabind_core::MetaBindError> {
//! let source = Arc::new(FrontmatterSource::new("/path/to/vault"));
//! let manager = MetadataManager::new(ManagerConfig::default())?;
//! manager.register_source(source.clone() as Arc<dyn MetadataSource>)?;
//!
//! let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//! let _watcher = FrontmatterWatcher::new(source.root(), Duration::from_millis(300), tx)?;
//! forward_external_changes(manager, source, rx).await;
//! # Ok(())
//! # }
//! ```
//!
//! Writes the manager itself flushes are observed too. They arrive while the item's
//! external write lock is armed, so they are deferred and later reconciled to the same
//! data, which notifies nobody.

use crate::{
    error::MetaBindError,
    manager::MetadataManager,
    source::{frontmatter::FRONTMATTER_STORAGE_TYPE, FrontmatterSource, MetadataSource},
};
use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher},
    DebounceEventResult, Debouncer, FileIdMap,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 300;

fn is_watched_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(true);
    !hidden && path.extension().map(|ext| ext == "md").unwrap_or(false)
}

fn relative_storage_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Watches a directory tree and sends the storage path of every changed markdown file.
///
/// Watching stops when the watcher is dropped.
pub struct FrontmatterWatcher {
    root: PathBuf,
    debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
}

impl FrontmatterWatcher {
    pub fn new<P: AsRef<Path>>(
        root: P,
        debounce: Duration,
        tx: UnboundedSender<String>,
    ) -> Result<FrontmatterWatcher, MetaBindError> {
        let root = root.as_ref().canonicalize()?;
        let event_root = root.clone();
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events.iter() {
                        if !matches!(
                            event.event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            continue;
                        }
                        for path in event.paths.iter().filter(|p| is_watched_file(p)) {
                            let Some(storage_path) = relative_storage_path(&event_root, path)
                            else {
                                continue;
                            };
                            tracing::debug!("[FrontmatterWatcher] {storage_path} changed");
                            if tx.send(storage_path).is_err() {
                                tracing::debug!("[FrontmatterWatcher] Receiver dropped");
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    tracing::error!("Notify debouncer returned errors: {:?}", errors);
                }
            }
        })?;
        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)?;
        tracing::info!("[FrontmatterWatcher] Watching {:?}", root);
        Ok(FrontmatterWatcher { root, debouncer })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn unwatch(mut self) -> Result<(), MetaBindError> {
        self.debouncer.watcher().unwatch(&self.root)?;
        Ok(())
    }
}

/// Apply every storage path received on `rx` to `manager` until the sender side closes.
///
/// Existing files are re-read and reported with
/// [MetadataManager::on_external_update]; missing ones with
/// [MetadataManager::on_external_delete].
pub async fn forward_external_changes(
    manager: MetadataManager,
    source: Arc<FrontmatterSource>,
    mut rx: UnboundedReceiver<String>,
) {
    while let Some(storage_path) = rx.recv().await {
        if let Err(e) = apply_external_change(&manager, &source, &storage_path) {
            tracing::warn!("Could not apply external change of {storage_path}: {e}");
        }
    }
    tracing::debug!("External change channel closed");
}

fn apply_external_change(
    manager: &MetadataManager,
    source: &FrontmatterSource,
    storage_path: &str,
) -> Result<bool, MetaBindError> {
    if !source.file_path(storage_path)?.exists() {
        return manager.on_external_delete(FRONTMATTER_STORAGE_TYPE, storage_path);
    }
    let data = source.read_external(storage_path)?;
    manager.on_external_update(FRONTMATTER_STORAGE_TYPE, storage_path, data)
}
