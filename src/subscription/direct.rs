use super::{MetadataSignal, OnDelete, Subscription};
use crate::{
    bind_target::BindTargetDeclaration,
    cache::CacheKey,
    error::MetaBindError,
    manager::{ManagerShared, MetadataManager},
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Weak,
    },
};
use uuid::Uuid;

/// Binds one target to a caller-owned signal.
pub struct DirectSubscription {
    uuid: Uuid,
    bind_target: BindTargetDeclaration,
    cache_key: CacheKey,
    signal: MetadataSignal,
    deleted: AtomicBool,
    on_delete: Mutex<Option<OnDelete>>,
    manager: Weak<ManagerShared>,
}

impl fmt::Debug for DirectSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectSubscription")
            .field("uuid", &self.uuid)
            .field("bind_target", &self.bind_target)
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

impl DirectSubscription {
    pub(crate) fn new(
        uuid: Uuid,
        bind_target: BindTargetDeclaration,
        cache_key: CacheKey,
        signal: MetadataSignal,
        on_delete: Option<OnDelete>,
        manager: Weak<ManagerShared>,
    ) -> Self {
        DirectSubscription {
            uuid,
            bind_target,
            cache_key,
            signal,
            deleted: AtomicBool::new(false),
            on_delete: Mutex::new(on_delete),
            manager,
        }
    }

    pub fn signal(&self) -> &MetadataSignal {
        &self.signal
    }

    pub fn target(&self) -> &BindTargetDeclaration {
        &self.bind_target
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    /// Write a value produced by this subscription's consumer. Every other affected
    /// subscription is notified; this one is not, since its consumer produced the value.
    ///
    /// The signal is only set once the write succeeded, to whatever the cache holds by
    /// then, which includes writes made by listeners during the fan-out.
    pub fn update(&self, value: Value) -> Result<(), MetaBindError> {
        let manager = self.manager()?;
        manager.update_metadata_excluding(&self.bind_target, value, &[self.uuid])?;
        self.signal.set(manager.get_metadata(&self.bind_target)?);
        Ok(())
    }

    fn manager(&self) -> Result<MetadataManager, MetaBindError> {
        self.manager
            .upgrade()
            .map(MetadataManager::from_shared)
            .ok_or_else(|| MetaBindError::NotFound("metadata manager was dropped".to_string()))
    }

    fn detach(&self) {
        if let Some(shared) = self.manager.upgrade() {
            MetadataManager::from_shared(shared).remove_subscription(&self.cache_key, self.uuid);
        }
    }
}

impl Subscription for DirectSubscription {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn bind_target(&self) -> Option<&BindTargetDeclaration> {
        Some(&self.bind_target)
    }

    fn dependencies(&self) -> Vec<BindTargetDeclaration> {
        vec![self.bind_target.clone()]
    }

    /// Listeners only run when the value actually changed.
    fn notify(&self, value: Option<Value>) {
        if self.is_deleted() {
            return;
        }
        if self.signal.set_if_changed(value) {
            self.signal.notify_listeners();
        }
    }

    fn unsubscribe(&self) {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.detach();
    }

    fn delete(&self) {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.detach();
        let on_delete = self.on_delete.lock().take();
        if let Some(on_delete) = on_delete {
            on_delete();
        }
    }
}
