//! Cached state of one storage location.

use crate::subscription::DirectSubscription;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

/// Identifies a cache item: the storage type plus the key its source resolved the
/// storage path to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub storage_type: String,
    pub storage_path: String,
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}#{}", self.storage_type, self.storage_path)
    }
}

/// One storage location's property tree plus bookkeeping.
///
/// Only the [crate::manager::MetadataManager] mutates cache items once they are handed
/// over by [crate::source::MetadataSource::default_cache_item].
#[derive(Debug)]
pub struct CacheItem {
    pub(crate) data: Value,
    pub(crate) subscriptions: Vec<Arc<DirectSubscription>>,
    /// True iff a local mutation happened since the last successful write-back.
    pub(crate) dirty: bool,
    /// Bumped on every local mutation. A flush only clears `dirty` if the generation it
    /// wrote is still current.
    pub(crate) generation: u64,
    /// Remaining cycles during which external updates are deferred.
    pub(crate) external_write_lock: u32,
    /// An external update was deferred by the write lock and has not been reconciled.
    pub(crate) deferred_external: bool,
    pub(crate) cycles_without_listeners: u32,
}

impl CacheItem {
    pub fn new(data: Value) -> Self {
        CacheItem {
            data,
            subscriptions: Vec::new(),
            dirty: false,
            generation: 0,
            external_write_lock: 0,
            deferred_external: false,
            cycles_without_listeners: 0,
        }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn status(&self) -> CacheItemStatus {
        CacheItemStatus {
            dirty: self.dirty,
            external_write_lock: self.external_write_lock,
            deferred_external: self.deferred_external,
            cycles_without_listeners: self.cycles_without_listeners,
            subscriptions: self.subscriptions.len(),
        }
    }
}

/// A read-only snapshot of a cache item's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheItemStatus {
    pub dirty: bool,
    pub external_write_lock: u32,
    pub deferred_external: bool,
    pub cycles_without_listeners: u32,
    pub subscriptions: usize,
}
