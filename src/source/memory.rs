//! In-process sources: per-path scratch memory and the global bucket.

use super::MetadataSource;
use crate::error::MetaBindError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const MEMORY_STORAGE_TYPE: &str = "memory";
pub const GLOBAL_STORAGE_TYPE: &str = "globalMemory";
/// Cache key of the single [`GlobalSource`] bucket.
pub const GLOBAL_CACHE_KEY: &str = "global";

fn empty_tree() -> Value {
    Value::Object(Map::new())
}

/// Per-path trees kept in process memory.
///
/// Write-backs land in the store, so a path that was evicted from the cache hydrates
/// with its last flushed value on the next subscribe.
#[derive(Debug)]
pub struct MemorySource {
    storage_type: String,
    store: RwLock<BTreeMap<String, Value>>,
}

impl Default for MemorySource {
    fn default() -> Self {
        MemorySource::new(MEMORY_STORAGE_TYPE)
    }
}

impl MemorySource {
    pub fn new(storage_type: &str) -> Self {
        MemorySource {
            storage_type: storage_type.to_string(),
            store: RwLock::new(BTreeMap::new()),
        }
    }

    /// Seed or overwrite the stored tree, as an external editor would.
    pub fn put(&self, storage_path: &str, data: Value) {
        self.store.write().insert(storage_path.to_string(), data);
    }

    pub fn stored(&self, storage_path: &str) -> Option<Value> {
        self.store.read().get(storage_path).cloned()
    }

    pub fn remove(&self, storage_path: &str) -> Option<Value> {
        self.store.write().remove(storage_path)
    }
}

#[async_trait]
impl MetadataSource for MemorySource {
    fn storage_type(&self) -> &str {
        &self.storage_type
    }

    fn read_external(&self, cache_key: &str) -> Result<Value, MetaBindError> {
        Ok(self.stored(cache_key).unwrap_or_else(empty_tree))
    }

    async fn sync_external(&self, cache_key: &str, data: &Value) -> Result<(), MetaBindError> {
        self.put(cache_key, data.clone());
        Ok(())
    }
}

/// A single tree shared by every consumer regardless of storage path.
#[derive(Debug)]
pub struct GlobalSource {
    store: RwLock<Value>,
}

impl Default for GlobalSource {
    fn default() -> Self {
        GlobalSource {
            store: RwLock::new(empty_tree()),
        }
    }
}

impl GlobalSource {
    /// Replace the stored tree, as an external writer would.
    pub fn put(&self, data: Value) {
        *self.store.write() = data;
    }

    pub fn stored(&self) -> Value {
        self.store.read().clone()
    }
}

#[async_trait]
impl MetadataSource for GlobalSource {
    fn storage_type(&self) -> &str {
        GLOBAL_STORAGE_TYPE
    }

    fn cache_key(&self, _storage_path: Option<&str>) -> Result<String, MetaBindError> {
        Ok(GLOBAL_CACHE_KEY.to_string())
    }

    fn read_external(&self, _cache_key: &str) -> Result<Value, MetaBindError> {
        Ok(self.stored())
    }

    async fn sync_external(&self, _cache_key: &str, data: &Value) -> Result<(), MetaBindError> {
        *self.store.write() = data.clone();
        Ok(())
    }
}
