//! Consumer registrations against bind targets.
//!
//! - [`DirectSubscription`]: one bind target, forwards value changes into a caller-owned
//!   [`MetadataSignal`].
//! - [`ComputedSubscription`]: N dependencies, derives one output value and optionally
//!   writes it back.
//! - [`EffectSubscription`]: N dependencies, runs a side effect.
//!
//! Cache items only ever hold [`DirectSubscription`]s. Computed and effect subscriptions
//! own one internal direct subscription per dependency and cascade deletion to them.

pub mod computed;
pub mod direct;
pub mod effect;

pub use computed::{ComputeFn, ComputedSubscription};
pub use direct::DirectSubscription;
pub use effect::{EffectFn, EffectSubscription};

use crate::{
    bind_target::BindTargetDeclaration,
    error::MetaBindError,
    manager::{ManagerShared, MetadataManager},
    signal::Signal,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Signal type carried by subscriptions. `None` means nothing exists at the address.
pub type MetadataSignal = Signal<Option<Value>>;

/// Invoked once when a subscription is deleted, e.g. because its storage location
/// disappeared. Consumers typically unmount in response.
pub type OnDelete = Box<dyn FnOnce() + Send>;

pub trait Subscription: Send + Sync {
    fn uuid(&self) -> Uuid;

    fn is_deleted(&self) -> bool;

    /// The target this subscription writes to, if any.
    fn bind_target(&self) -> Option<&BindTargetDeclaration>;

    fn dependencies(&self) -> Vec<BindTargetDeclaration>;

    /// Deliver a changed value. Computed and effect subscriptions ignore the value and
    /// re-evaluate over all their dependencies.
    fn notify(&self, value: Option<Value>);

    /// Consumer-initiated removal. Does not run `on_delete`. Idempotent.
    fn unsubscribe(&self);

    /// Removal that runs `on_delete`. Idempotent.
    fn delete(&self);
}

/// A subscription that is driven by a [`DependencySet`].
pub(crate) trait Dependent: Subscription + 'static {
    fn dependency_set(&self) -> &DependencySet;

    fn on_dependency_change(&self);
}

/// The internal direct subscriptions owned by a computed or effect subscription.
///
/// The dependency signals only detect change. Inputs are always read from the cache, and
/// the last inputs handed out are remembered so that one write touching several
/// dependencies re-evaluates the parent once.
pub(crate) struct DependencySet {
    targets: Vec<BindTargetDeclaration>,
    subscriptions: Mutex<Vec<Arc<DirectSubscription>>>,
    last_inputs: Mutex<Option<Vec<Option<Value>>>>,
    manager: Weak<ManagerShared>,
}

impl DependencySet {
    pub(crate) fn new(targets: Vec<BindTargetDeclaration>, manager: &MetadataManager) -> Self {
        DependencySet {
            targets,
            subscriptions: Mutex::new(Vec::new()),
            last_inputs: Mutex::new(None),
            manager: manager.downgrade(),
        }
    }

    /// Subscribe one internal direct subscription per target on behalf of `parent`.
    ///
    /// Each dependency's signal re-evaluates the parent on change, and losing any
    /// dependency's storage location deletes the parent. The cache items keep the parent
    /// alive through these callbacks until it is unsubscribed or deleted. If any subscribe
    /// fails, the dependencies created so far are unsubscribed again.
    pub(crate) fn attach<D: Dependent>(
        parent: &Arc<D>,
        manager: &MetadataManager,
    ) -> Result<(), MetaBindError> {
        let set = parent.dependency_set();
        for (idx, target) in set.targets.iter().enumerate() {
            let signal = MetadataSignal::default();
            let on_change = parent.clone();
            signal.register_listener(move |_| {
                on_change.on_dependency_change();
                Ok(())
            });
            let on_lost = parent.clone();
            let on_delete: OnDelete = Box::new(move || on_lost.delete());
            let uuid = dependency_uuid(&parent.uuid(), idx);
            match manager.subscribe(uuid, signal, target.clone(), Some(on_delete)) {
                Ok(subscription) => set.subscriptions.lock().push(subscription),
                Err(e) => {
                    tracing::warn!(
                        "Dependency {idx} ({target}) of subscription {} failed: {e}",
                        parent.uuid()
                    );
                    set.unsubscribe_all();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn targets(&self) -> &[BindTargetDeclaration] {
        &self.targets
    }

    /// Current cached values of every dependency, in declaration order. Falls back to
    /// the dependency signals once the manager is gone.
    pub(crate) fn values(&self) -> Vec<Option<Value>> {
        let manager = self.manager.upgrade().map(MetadataManager::from_shared);
        self.snapshot()
            .iter()
            .map(|subscription| match &manager {
                Some(manager) => manager
                    .get_metadata(subscription.target())
                    .unwrap_or_else(|_| subscription.signal().get()),
                None => subscription.signal().get(),
            })
            .collect()
    }

    /// The current inputs, or `None` if they equal the inputs of the previous call.
    /// The first call always returns the inputs.
    pub(crate) fn changed_values(&self) -> Option<Vec<Option<Value>>> {
        let values = self.values();
        let mut last = self.last_inputs.lock();
        if last.as_ref() == Some(&values) {
            return None;
        }
        *last = Some(values.clone());
        Some(values)
    }

    /// Pull every dependency's current value into its signal without running listeners.
    /// Used after a write whose fan-out skipped these dependencies.
    pub(crate) fn resync(&self, manager: &MetadataManager) -> Result<(), MetaBindError> {
        for subscription in self.snapshot() {
            subscription
                .signal()
                .set(manager.get_metadata(subscription.target())?);
        }
        Ok(())
    }

    pub(crate) fn uuids(&self) -> Vec<Uuid> {
        self.snapshot().iter().map(|s| s.uuid()).collect()
    }

    pub(crate) fn unsubscribe_all(&self) {
        let drained = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in drained {
            subscription.unsubscribe();
        }
    }

    /// Delete every dependency. Their `on_delete` re-enters the parent's `delete`, which
    /// the parent's `deleted` flag turns into a no-op.
    pub(crate) fn delete_all(&self) {
        let drained = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in drained {
            subscription.delete();
        }
    }

    fn snapshot(&self) -> Vec<Arc<DirectSubscription>> {
        self.subscriptions.lock().clone()
    }
}

/// Stable uuid of the `idx`-th internal dependency of `parent`.
pub fn dependency_uuid(parent: &Uuid, idx: usize) -> Uuid {
    Uuid::new_v5(parent, format!("dependency-{idx}").as_bytes())
}
