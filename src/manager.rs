//! MetadataManager: the owner of every cache item.
//!
//! The manager resolves bind targets onto cache items, is the only code that mutates
//! them, and fans changes out to subscriptions. Three paths change cached data:
//!
//! 1. **Local writes** ([`MetadataManager::update_metadata`] and friends) mutate the tree,
//!    mark the item dirty, arm the external write lock and notify every affected
//!    subscription except the writer before returning.
//! 2. **External updates** ([`MetadataManager::on_external_update`]) replace the tree
//!    wholesale unless the write lock is armed, in which case they are deferred.
//! 3. **Cycles** ([`MetadataManager::cycle`]) flush dirty items through their source,
//!    drain write locks, reconcile deferred external updates and evict idle items.
//!
//! No lock is held while listeners, compute or effect functions, `on_delete` callbacks
//! or source I/O run, so all of them may call back into the manager. Notification works
//! on a snapshot of the subscriber list, in registration order, and each subscriber
//! reads its value from the cache right before it is notified. A listener that writes
//! during fan-out therefore never has its write overtaken by the older value.
//!
//! The manager never starts a timer. Hosts call [`MetadataManager::cycle`] on their own
//! schedule, or use [crate::driver::CycleDriver].

use crate::{
    bind_target::BindTargetDeclaration,
    cache::{CacheItem, CacheItemStatus, CacheKey},
    config::ManagerConfig,
    error::{MetaBindError, PropPathError},
    prop_path::PropPath,
    source::MetadataSource,
    subscription::{
        ComputedSubscription, DirectSubscription, EffectSubscription, MetadataSignal, OnDelete,
        Subscription,
    },
};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Weak},
};
use uuid::Uuid;

type Sources = BTreeMap<String, Arc<dyn MetadataSource>>;

pub(crate) struct ManagerShared {
    config: ManagerConfig,
    sources: RwLock<Sources>,
    cache: Mutex<BTreeMap<CacheKey, CacheItem>>,
}

/// What one [`MetadataManager::cycle`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub flushed: usize,
    pub failed: usize,
    pub evicted: usize,
    pub reconciled: usize,
}

struct PendingFlush {
    key: CacheKey,
    source: Arc<dyn MetadataSource>,
    data: Value,
    generation: u64,
}

/// Cheap to clone; clones share the same sources and cache.
///
/// Each instance owns its state, so independent managers can coexist.
#[derive(Clone)]
pub struct MetadataManager {
    shared: Arc<ManagerShared>,
}

impl fmt::Debug for MetadataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataManager")
            .field("config", &self.shared.config)
            .field(
                "sources",
                &self.shared.sources.read().keys().collect::<Vec<_>>(),
            )
            .field("cache_items", &self.shared.cache.lock().len())
            .finish()
    }
}

impl MetadataManager {
    pub fn new(config: ManagerConfig) -> Result<Self, MetaBindError> {
        config.validate()?;
        Ok(MetadataManager {
            shared: Arc::new(ManagerShared {
                config,
                sources: RwLock::new(BTreeMap::new()),
                cache: Mutex::new(BTreeMap::new()),
            }),
        })
    }

    pub fn with_sources<I>(config: ManagerConfig, sources: I) -> Result<Self, MetaBindError>
    where
        I: IntoIterator<Item = Arc<dyn MetadataSource>>,
    {
        let manager = MetadataManager::new(config)?;
        for source in sources {
            manager.register_source(source)?;
        }
        Ok(manager)
    }

    pub(crate) fn from_shared(shared: Arc<ManagerShared>) -> Self {
        MetadataManager { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<ManagerShared> {
        Arc::downgrade(&self.shared)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    pub fn register_source(&self, source: Arc<dyn MetadataSource>) -> Result<(), MetaBindError> {
        let storage_type = source.storage_type().to_string();
        let mut sources = self.shared.sources.write();
        if sources.contains_key(&storage_type) {
            return Err(MetaBindError::DuplicateSource(storage_type));
        }
        tracing::info!("Registered metadata source '{storage_type}'");
        sources.insert(storage_type, source);
        Ok(())
    }

    pub fn source(&self, storage_type: &str) -> Result<Arc<dyn MetadataSource>, MetaBindError> {
        self.shared
            .sources
            .read()
            .get(storage_type)
            .cloned()
            .ok_or_else(|| MetaBindError::UnknownStorageType(storage_type.to_string()))
    }

    fn resolve_path(
        &self,
        storage_type: &str,
        storage_path: Option<&str>,
    ) -> Result<(Arc<dyn MetadataSource>, CacheKey), MetaBindError> {
        let source = self.source(storage_type)?;
        let key = CacheKey {
            storage_type: storage_type.to_string(),
            storage_path: source.cache_key(storage_path)?,
        };
        Ok((source, key))
    }

    fn resolve(
        &self,
        bind_target: &BindTargetDeclaration,
    ) -> Result<(Arc<dyn MetadataSource>, CacheKey), MetaBindError> {
        self.resolve_path(
            &bind_target.storage_type,
            bind_target.storage_path.as_deref(),
        )
    }

    /// Run `f` on the cache item for `key`, creating it from the source first if needed.
    ///
    /// The source is read without the cache lock held. `f` runs under the lock and must
    /// not call out of the manager.
    fn with_cache_item<R>(
        &self,
        source: &dyn MetadataSource,
        key: &CacheKey,
        f: impl FnOnce(&mut CacheItem) -> R,
    ) -> Result<R, MetaBindError> {
        {
            let mut cache = self.shared.cache.lock();
            if let Some(item) = cache.get_mut(key) {
                return Ok(f(item));
            }
        }
        let fresh = source.default_cache_item(&key.storage_path)?;
        let mut cache = self.shared.cache.lock();
        let item = cache.entry(key.clone()).or_insert_with(|| {
            tracing::debug!("Created cache item {key}");
            fresh
        });
        Ok(f(item))
    }

    /// Register `signal` for updates of `bind_target` and hydrate it with the current
    /// value. The signal's listeners are not run for the initial value.
    #[tracing::instrument(skip(self, signal, on_delete), fields(target = %bind_target))]
    pub fn subscribe(
        &self,
        uuid: Uuid,
        signal: MetadataSignal,
        bind_target: BindTargetDeclaration,
        on_delete: Option<OnDelete>,
    ) -> Result<Arc<DirectSubscription>, MetaBindError> {
        let (source, key) = self.resolve(&bind_target)?;
        let subscription = Arc::new(DirectSubscription::new(
            uuid,
            bind_target,
            key.clone(),
            signal,
            on_delete,
            self.downgrade(),
        ));
        self.with_cache_item(source.as_ref(), &key, |item| {
            if item.subscriptions.iter().any(|s| s.uuid() == uuid) {
                return Err(MetaBindError::DuplicateSubscription(uuid));
            }
            let value = subscription.target().storage_prop.get(&item.data).cloned();
            subscription.signal().set(value);
            item.subscriptions.push(subscription.clone());
            item.cycles_without_listeners = 0;
            Ok(())
        })??;
        Ok(subscription)
    }

    /// Derive `output` from `dependencies` with `compute`, optionally persisting the result
    /// at `write_to`. `compute` runs once immediately and again on every dependency change.
    pub fn subscribe_computed<F>(
        &self,
        uuid: Uuid,
        output: MetadataSignal,
        write_to: Option<BindTargetDeclaration>,
        dependencies: Vec<BindTargetDeclaration>,
        compute: F,
        on_delete: Option<OnDelete>,
    ) -> Result<Arc<ComputedSubscription>, MetaBindError>
    where
        F: Fn(&[Option<Value>]) -> Result<Option<Value>, MetaBindError> + Send + Sync + 'static,
    {
        ComputedSubscription::create(
            self,
            uuid,
            output,
            write_to,
            dependencies,
            Box::new(compute),
            on_delete,
        )
    }

    /// Run `effect` once immediately and again on every dependency change.
    pub fn subscribe_effect<F>(
        &self,
        uuid: Uuid,
        dependencies: Vec<BindTargetDeclaration>,
        effect: F,
        on_delete: Option<OnDelete>,
    ) -> Result<Arc<EffectSubscription>, MetaBindError>
    where
        F: Fn(&[Option<Value>]) -> Result<(), MetaBindError> + Send + Sync + 'static,
    {
        EffectSubscription::create(self, uuid, dependencies, Box::new(effect), on_delete)
    }

    pub fn unsubscribe(&self, subscription: &dyn Subscription) {
        subscription.unsubscribe();
    }

    /// Remove a direct subscription from its cache item. No-op if already gone.
    pub(crate) fn remove_subscription(&self, key: &CacheKey, uuid: Uuid) -> bool {
        let mut cache = self.shared.cache.lock();
        let Some(item) = cache.get_mut(key) else {
            return false;
        };
        let before = item.subscriptions.len();
        item.subscriptions.retain(|s| s.uuid() != uuid);
        item.subscriptions.len() != before
    }

    pub fn update_metadata(
        &self,
        bind_target: &BindTargetDeclaration,
        value: Value,
    ) -> Result<(), MetaBindError> {
        self.update_metadata_excluding(bind_target, value, &[])
    }

    /// Write `value`, skipping notification of the subscriptions in `exclude`.
    pub fn update_metadata_excluding(
        &self,
        bind_target: &BindTargetDeclaration,
        value: Value,
        exclude: &[Uuid],
    ) -> Result<(), MetaBindError> {
        self.apply_local_write(bind_target, exclude, |data, prop| prop.set(data, value))
    }

    pub fn delete_metadata(&self, bind_target: &BindTargetDeclaration) -> Result<(), MetaBindError> {
        self.delete_metadata_excluding(bind_target, &[])
    }

    pub fn delete_metadata_excluding(
        &self,
        bind_target: &BindTargetDeclaration,
        exclude: &[Uuid],
    ) -> Result<(), MetaBindError> {
        self.apply_local_write(bind_target, exclude, |data, prop| {
            prop.delete(data);
            Ok(())
        })
    }

    fn apply_local_write(
        &self,
        bind_target: &BindTargetDeclaration,
        exclude: &[Uuid],
        mutate: impl FnOnce(&mut Value, &PropPath) -> Result<(), PropPathError>,
    ) -> Result<(), MetaBindError> {
        let (source, key) = self.resolve(bind_target)?;
        let lock_cycles = self.shared.config.external_write_lock_cycles;
        let written = &bind_target.storage_prop;
        let notifications = self.with_cache_item(source.as_ref(), &key, |item| {
            mutate(&mut item.data, written)?;
            item.dirty = true;
            item.generation += 1;
            item.external_write_lock = lock_cycles;
            Ok::<_, MetaBindError>(
                item.subscriptions
                    .iter()
                    .filter(|s| !s.is_deleted() && !exclude.contains(&s.uuid()))
                    .filter(|s| {
                        let target = s.target();
                        target
                            .storage_prop
                            .affected_by(written, target.listen_to_children)
                    })
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        })??;
        tracing::debug!(
            "Local write to {key} at '{written}' notifies {} subscription(s)",
            notifications.len()
        );
        self.deliver(notifications);
        Ok(())
    }

    /// Read the value at `bind_target`. Never creates a cache item; `Ok(None)` if the
    /// location is not cached or nothing exists at the address.
    pub fn get_metadata(
        &self,
        bind_target: &BindTargetDeclaration,
    ) -> Result<Option<Value>, MetaBindError> {
        let (_, key) = self.resolve(bind_target)?;
        let cache = self.shared.cache.lock();
        Ok(cache
            .get(&key)
            .and_then(|item| bind_target.storage_prop.get(&item.data))
            .cloned())
    }

    /// Report an out-of-band change of a storage location.
    ///
    /// Returns whether the update was applied. Uncached locations are ignored. While the
    /// item's write lock is armed the update is deferred; the cycle that drains the lock
    /// re-reads the source.
    #[tracing::instrument(skip(self, new_data))]
    pub fn on_external_update(
        &self,
        storage_type: &str,
        storage_path: &str,
        new_data: Value,
    ) -> Result<bool, MetaBindError> {
        let (_, key) = self.resolve_path(storage_type, Some(storage_path))?;
        let notifications = {
            let mut cache = self.shared.cache.lock();
            let Some(item) = cache.get_mut(&key) else {
                tracing::debug!("Ignoring external update of uncached {key}");
                return Ok(false);
            };
            if item.external_write_lock > 0 {
                tracing::debug!(
                    "Deferring external update of {key}, write lock has {} cycle(s) left",
                    item.external_write_lock
                );
                item.deferred_external = true;
                return Ok(false);
            }
            let old = std::mem::replace(&mut item.data, new_data);
            item.dirty = false;
            item.deferred_external = false;
            item.subscriptions
                .iter()
                .filter(|s| !s.is_deleted())
                .filter_map(|s| {
                    let prop = &s.target().storage_prop;
                    (prop.get(&old) != prop.get(&item.data)).then(|| s.clone())
                })
                .collect::<Vec<_>>()
        };
        self.deliver(notifications);
        Ok(true)
    }

    /// Report that a storage location no longer exists. Its cache item is dropped and
    /// every subscription on it is deleted, running their `on_delete`.
    pub fn on_external_delete(
        &self,
        storage_type: &str,
        storage_path: &str,
    ) -> Result<bool, MetaBindError> {
        let (_, key) = self.resolve_path(storage_type, Some(storage_path))?;
        let Some(item) = self.shared.cache.lock().remove(&key) else {
            return Ok(false);
        };
        tracing::info!(
            "Storage location {key} was deleted, dropping {} subscription(s)",
            item.subscriptions.len()
        );
        for subscription in item.subscriptions {
            subscription.delete();
        }
        Ok(true)
    }

    /// One maintenance pass over every cache item.
    ///
    /// Write locks count down, dirty items are flushed concurrently, deferred external
    /// updates are reconciled once their lock has drained, and items without subscribers
    /// for more than `idle_cycle_threshold` cycles are evicted. Dirty items are never
    /// evicted. Flush failures are logged and retried on the next cycle.
    pub async fn cycle(&self) -> CycleReport {
        let threshold = self.shared.config.idle_cycle_threshold;
        let mut report = CycleReport::default();
        let (flushes, reconciles) = {
            let sources = self.shared.sources.read();
            let mut cache = self.shared.cache.lock();
            let mut flushes = Vec::new();
            let mut reconciles = Vec::new();
            cache.retain(|key, item| {
                if item.external_write_lock > 0 {
                    item.external_write_lock -= 1;
                }
                if item.subscriptions.is_empty() {
                    item.cycles_without_listeners = item.cycles_without_listeners.saturating_add(1);
                }
                if item.external_write_lock == 0 && item.deferred_external && !item.dirty {
                    reconciles.push(key.clone());
                }
                if item.dirty {
                    match sources.get(&key.storage_type) {
                        Some(source) => flushes.push(PendingFlush {
                            key: key.clone(),
                            source: source.clone(),
                            data: item.data.clone(),
                            generation: item.generation,
                        }),
                        None => tracing::warn!("No source registered to flush {key}"),
                    }
                    return true;
                }
                if item.subscriptions.is_empty() && item.cycles_without_listeners > threshold {
                    tracing::debug!(
                        "Evicting {key} after {} idle cycles",
                        item.cycles_without_listeners
                    );
                    report.evicted += 1;
                    return false;
                }
                true
            });
            (flushes, reconciles)
        };

        for key in reconciles {
            if self.reconcile(&key) {
                report.reconciled += 1;
            }
        }

        let results = join_all(flushes.iter().map(|flush| async move {
            flush
                .source
                .sync_external(&flush.key.storage_path, &flush.data)
                .await
        }))
        .await;

        let mut cache = self.shared.cache.lock();
        for (flush, result) in flushes.iter().zip(results) {
            match result {
                Ok(()) => {
                    report.flushed += 1;
                    if let Some(item) = cache.get_mut(&flush.key) {
                        if item.generation == flush.generation {
                            item.dirty = false;
                        }
                    }
                    tracing::debug!("Flushed {}", flush.key);
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("Failed to sync {}, retrying next cycle: {e}", flush.key);
                }
            }
        }
        report
    }

    /// Re-read a location whose external update was deferred and apply it.
    fn reconcile(&self, key: &CacheKey) -> bool {
        let source = match self.source(&key.storage_type) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("Cannot reconcile {key}: {e}");
                return false;
            }
        };
        match source.read_external(&key.storage_path) {
            Ok(data) => self
                .on_external_update(&key.storage_type, &key.storage_path, data)
                .unwrap_or_else(|e| {
                    tracing::error!("Reconciling {key} failed: {e}");
                    false
                }),
            Err(e) => {
                tracing::error!("Reading {key} for reconciliation failed: {e}");
                false
            }
        }
    }

    pub fn is_cached(&self, storage_type: &str, storage_path: &str) -> bool {
        self.cache_status(storage_type, storage_path).is_some()
    }

    pub fn cache_status(&self, storage_type: &str, storage_path: &str) -> Option<CacheItemStatus> {
        let (_, key) = self.resolve_path(storage_type, Some(storage_path)).ok()?;
        self.shared.cache.lock().get(&key).map(CacheItem::status)
    }

    pub fn cache_len(&self) -> usize {
        self.shared.cache.lock().len()
    }

    /// Notify each subscription with the value its target holds right now. Items removed
    /// in the meantime are skipped; their deletion already tore the subscriptions down.
    fn deliver(&self, subscriptions: Vec<Arc<DirectSubscription>>) {
        for subscription in subscriptions {
            if subscription.is_deleted() {
                continue;
            }
            let value = {
                let cache = self.shared.cache.lock();
                match cache.get(subscription.cache_key()) {
                    Some(item) => subscription.target().storage_prop.get(&item.data).cloned(),
                    None => continue,
                }
            };
            subscription.notify(value);
        }
    }
}
