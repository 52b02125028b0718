use super::{Dependent, DependencySet, OnDelete, Subscription};
use crate::{bind_target::BindTargetDeclaration, error::MetaBindError, manager::MetadataManager};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use uuid::Uuid;

/// Side effect over the current values of all dependencies, in declaration order.
///
/// Runs synchronously on the thread that changed a dependency, without any manager lock
/// held, so it may call back into the manager. Effects that need to await should spawn
/// their own task (or send on a channel) and return.
pub type EffectFn = dyn Fn(&[Option<Value>]) -> Result<(), MetaBindError> + Send + Sync;

/// N-to-0 reaction to bind target changes.
///
/// A failing run is logged and the subscription stays registered; the effect runs again
/// on the next dependency change.
pub struct EffectSubscription {
    uuid: Uuid,
    deleted: AtomicBool,
    dependencies: DependencySet,
    effect: Box<EffectFn>,
    on_delete: Mutex<Option<OnDelete>>,
}

impl fmt::Debug for EffectSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectSubscription")
            .field("uuid", &self.uuid)
            .field("dependencies", &self.dependencies.targets())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

impl EffectSubscription {
    pub(crate) fn create(
        manager: &MetadataManager,
        uuid: Uuid,
        dependencies: Vec<BindTargetDeclaration>,
        effect: Box<EffectFn>,
        on_delete: Option<OnDelete>,
    ) -> Result<Arc<EffectSubscription>, MetaBindError> {
        let subscription = Arc::new(EffectSubscription {
            uuid,
            deleted: AtomicBool::new(false),
            dependencies: DependencySet::new(dependencies, manager),
            effect,
            on_delete: Mutex::new(on_delete),
        });
        DependencySet::attach(&subscription, manager)?;
        subscription.run();
        Ok(subscription)
    }

    pub fn dependency_uuids(&self) -> Vec<Uuid> {
        self.dependencies.uuids()
    }

    /// Runs once per distinct set of dependency values.
    fn run(&self) {
        if self.is_deleted() {
            return;
        }
        let Some(values) = self.dependencies.changed_values() else {
            return;
        };
        if let Err(e) = (self.effect)(&values) {
            tracing::warn!("Effect subscription {} failed: {e}", self.uuid);
        }
    }
}

impl Dependent for EffectSubscription {
    fn dependency_set(&self) -> &DependencySet {
        &self.dependencies
    }

    fn on_dependency_change(&self) {
        self.run();
    }
}

impl Subscription for EffectSubscription {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn bind_target(&self) -> Option<&BindTargetDeclaration> {
        None
    }

    fn dependencies(&self) -> Vec<BindTargetDeclaration> {
        self.dependencies.targets().to_vec()
    }

    fn notify(&self, _value: Option<Value>) {
        self.run();
    }

    fn unsubscribe(&self) {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.dependencies.unsubscribe_all();
    }

    fn delete(&self) {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.dependencies.delete_all();
        let on_delete = self.on_delete.lock().take();
        if let Some(on_delete) = on_delete {
            on_delete();
        }
    }
}
