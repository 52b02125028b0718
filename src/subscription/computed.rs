use super::{Dependent, DependencySet, MetadataSignal, OnDelete, Subscription};
use crate::{
    bind_target::BindTargetDeclaration,
    error::MetaBindError,
    manager::{ManagerShared, MetadataManager},
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};
use uuid::Uuid;

/// Derives one value from the current values of all dependencies, in declaration order.
/// Returning `Ok(None)` clears the output (and deletes the write target, if any).
///
/// Runs synchronously on the thread that changed a dependency, without any manager lock
/// held. It should be a pure function of its inputs; asynchronous work belongs in a task
/// spawned by an [super::EffectFn].
pub type ComputeFn = dyn Fn(&[Option<Value>]) -> Result<Option<Value>, MetaBindError> + Send + Sync;

/// N-to-1 derivation over bind targets.
pub struct ComputedSubscription {
    uuid: Uuid,
    deleted: AtomicBool,
    output: MetadataSignal,
    write_target: Option<BindTargetDeclaration>,
    dependencies: DependencySet,
    compute: Box<ComputeFn>,
    on_delete: Mutex<Option<OnDelete>>,
    manager: Weak<ManagerShared>,
}

impl fmt::Debug for ComputedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedSubscription")
            .field("uuid", &self.uuid)
            .field("write_target", &self.write_target)
            .field("dependencies", &self.dependencies.targets())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

impl ComputedSubscription {
    pub(crate) fn create(
        manager: &MetadataManager,
        uuid: Uuid,
        output: MetadataSignal,
        write_target: Option<BindTargetDeclaration>,
        dependencies: Vec<BindTargetDeclaration>,
        compute: Box<ComputeFn>,
        on_delete: Option<OnDelete>,
    ) -> Result<Arc<ComputedSubscription>, MetaBindError> {
        let subscription = Arc::new(ComputedSubscription {
            uuid,
            deleted: AtomicBool::new(false),
            output,
            write_target,
            dependencies: DependencySet::new(dependencies, manager),
            compute,
            on_delete: Mutex::new(on_delete),
            manager: manager.downgrade(),
        });
        DependencySet::attach(&subscription, manager)?;
        subscription.recompute();
        Ok(subscription)
    }

    pub fn output(&self) -> &MetadataSignal {
        &self.output
    }

    /// Uuids of the internal direct subscriptions, in dependency order.
    pub fn dependency_uuids(&self) -> Vec<Uuid> {
        self.dependencies.uuids()
    }

    /// Recompute from the cached dependency values. A no-op when they equal the inputs of
    /// the previous run, so a write that changes several dependencies computes once.
    fn recompute(&self) {
        if self.is_deleted() {
            return;
        }
        let Some(values) = self.dependencies.changed_values() else {
            return;
        };
        let result = match (self.compute)(&values) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Computed subscription {} failed to compute: {e}", self.uuid);
                return;
            }
        };
        if self.output.set_if_changed(result.clone()) {
            self.output.notify_listeners();
        }
        if let Some(target) = &self.write_target {
            if let Err(e) = self.write_back(target, result) {
                tracing::warn!(
                    "Computed subscription {} could not write to {target}: {e}",
                    self.uuid
                );
            }
        }
    }

    /// Persist the result, keeping this subscription's own dependencies out of the
    /// fan-out so a write target that is also a dependency cannot re-trigger it.
    fn write_back(
        &self,
        target: &BindTargetDeclaration,
        result: Option<Value>,
    ) -> Result<(), MetaBindError> {
        let Some(shared) = self.manager.upgrade() else {
            return Ok(());
        };
        let manager = MetadataManager::from_shared(shared);
        if manager.get_metadata(target)? == result {
            return Ok(());
        }
        let exclude = self.dependencies.uuids();
        match result {
            Some(value) => manager.update_metadata_excluding(target, value, &exclude)?,
            None => manager.delete_metadata_excluding(target, &exclude)?,
        }
        self.dependencies.resync(&manager)
    }
}

impl Dependent for ComputedSubscription {
    fn dependency_set(&self) -> &DependencySet {
        &self.dependencies
    }

    fn on_dependency_change(&self) {
        self.recompute();
    }
}

impl Subscription for ComputedSubscription {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn bind_target(&self) -> Option<&BindTargetDeclaration> {
        self.write_target.as_ref()
    }

    fn dependencies(&self) -> Vec<BindTargetDeclaration> {
        self.dependencies.targets().to_vec()
    }

    fn notify(&self, _value: Option<Value>) {
        self.recompute();
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
