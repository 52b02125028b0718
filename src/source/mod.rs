//! The seam through which concrete storage plugs into the
//! [crate::manager::MetadataManager].
//!
//! A source owns no cache state. It reads the authoritative external snapshot on demand
//! and persists whatever tree the manager hands it. Out-of-band changes are reported by
//! the host through [crate::manager::MetadataManager::on_external_update].

#[cfg(not(target_arch = "wasm32"))]
pub mod frontmatter;
pub mod memory;

#[cfg(not(target_arch = "wasm32"))]
pub use frontmatter::FrontmatterSource;
pub use memory::{GlobalSource, MemorySource};

use crate::{cache::CacheItem, error::MetaBindError};
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// The storage type bind targets use to select this source.
    fn storage_type(&self) -> &str;

    /// Map a bind target's storage path onto the key of its cache item.
    ///
    /// Per-location sources require a path. Sources with a single bucket override this
    /// and ignore it.
    fn cache_key(&self, storage_path: Option<&str>) -> Result<String, MetaBindError> {
        storage_path
            .map(str::to_string)
            .ok_or_else(|| MetaBindError::MissingStoragePath(self.storage_type().to_string()))
    }

    /// Synchronously read the current external state at `cache_key`.
    fn read_external(&self, cache_key: &str) -> Result<Value, MetaBindError>;

    fn default_cache_item(&self, cache_key: &str) -> Result<CacheItem, MetaBindError> {
        Ok(CacheItem::new(self.read_external(cache_key)?))
    }

    /// Persist `data` for `cache_key`. Must tolerate being called with unchanged data.
    async fn sync_external(&self, cache_key: &str, data: &Value) -> Result<(), MetaBindError>;
}
