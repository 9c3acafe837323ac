//! Lifetime managers.
//!
//! A lifetime decides how long a built value is reused:
//! - [`Lifetime::Transient`] builds a new value on every resolve
//! - [`Lifetime::ContainerControlled`] shares one value, owned by the root
//! - [`Lifetime::Hierarchical`] shares one value per resolving container
//! - [`Lifetime::PerResolve`] shares one value within a single outer resolve
//! - [`Lifetime::PerThread`] shares one value per OS thread
//! - [`Lifetime::ExternallyControlled`] reuses a value while someone else
//!   keeps it alive
//!
//! Every registration owns one [`LifetimeManager`]. The resolution
//! pipeline asks it for a cached value, takes its build lock on a miss,
//! asks again, and stores what the rest of the pipeline built. A miss on
//! the second look means this caller builds; a hit means another caller
//! finished first.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::Serialize;
use tracing::trace;

use crate::container::ContainerCore;
use crate::error::{DisposalError, DisposalFailure};
use crate::instance::{Instance, WeakInstance};
use crate::store::LifetimeStore;

/// Built-in lifetimes.
///
/// # Examples
/// ```
/// use sanad_container::lifetime::Lifetime;
///
/// assert!(Lifetime::ContainerControlled.is_cached());
/// assert!(!Lifetime::Transient.is_cached());
/// assert_eq!(Lifetime::PerResolve.to_string(), "PerResolve");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Lifetime {
    /// New value on every resolve. Never cached, never owned.
    ///
    /// # When to use
    /// - Lightweight stateless services
    /// - Objects with mutable state that shouldn't be shared
    Transient,

    /// One value for the whole hierarchy.
    ///
    /// Registered at the root no matter where `register` was called, and
    /// disposed with the root.
    ContainerControlled,

    /// One value per container that resolves it.
    ///
    /// A child resolving the same registration gets its own value, which
    /// is disposed with that child.
    Hierarchical,

    /// One value per outermost resolve call.
    ///
    /// Every edge of one object graph that asks for the type gets the same
    /// value; the next call starts fresh. Not disposed by the container.
    PerResolve,

    /// One value per OS thread. Not disposed by the container.
    PerThread,

    /// Reused only while some other owner keeps it alive.
    ///
    /// The container holds a weak reference and never disposes the value.
    ExternallyControlled,
}

impl Lifetime {
    /// Returns `true` if values built under this lifetime are reused.
    #[inline]
    pub fn is_cached(&self) -> bool {
        !matches!(self, Lifetime::Transient)
    }

    /// Returns `true` if a container disposes values built under this
    /// lifetime.
    #[inline]
    pub fn owns_values(&self) -> bool {
        matches!(self, Lifetime::ContainerControlled | Lifetime::Hierarchical)
    }

    /// Creates a fresh manager implementing this lifetime.
    pub fn manager(self) -> Arc<dyn LifetimeManager> {
        match self {
            Lifetime::Transient => Arc::new(TransientLifetime),
            Lifetime::ContainerControlled => Arc::new(ContainerControlledLifetime::default()),
            Lifetime::Hierarchical => Arc::new(HierarchicalLifetime::default()),
            Lifetime::PerResolve => Arc::new(PerResolveLifetime::default()),
            Lifetime::PerThread => Arc::new(PerThreadLifetime::default()),
            Lifetime::ExternallyControlled => Arc::new(ExternallyControlledLifetime::default()),
        }
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Lifetime::Transient => "Transient",
            Lifetime::ContainerControlled => "ContainerControlled",
            Lifetime::Hierarchical => "Hierarchical",
            Lifetime::PerResolve => "PerResolve",
            Lifetime::PerThread => "PerThread",
            Lifetime::ExternallyControlled => "ExternallyControlled",
        };
        f.write_str(label)
    }
}

/// Unique identity of one container, never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Values shared within one outermost resolve call.
#[derive(Default)]
pub struct PerResolveCache {
    values: Mutex<HashMap<usize, Instance>>,
}

impl PerResolveCache {
    pub fn get(&self, slot: usize) -> Option<Instance> {
        self.values.lock().get(&slot).cloned()
    }

    pub fn insert(&self, slot: usize, value: Instance) {
        self.values.lock().insert(slot, value);
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a lifetime manager can see of the resolve it serves.
#[derive(Clone, Copy)]
pub struct LifetimeScope<'a> {
    container: &'a ContainerCore,
    per_resolve: Option<&'a PerResolveCache>,
}

impl<'a> LifetimeScope<'a> {
    pub(crate) fn new(container: &'a ContainerCore, per_resolve: Option<&'a PerResolveCache>) -> Self {
        Self {
            container,
            per_resolve,
        }
    }

    /// The container the resolve was issued against.
    pub fn container_id(&self) -> ContainerId {
        self.container.id()
    }

    /// Lifetime store of the resolving container.
    pub fn owner(&self) -> &'a LifetimeStore {
        self.container.store()
    }

    /// Lifetime store of the root container.
    pub fn root_owner(&self) -> &'a LifetimeStore {
        self.container.root().store()
    }

    /// The per-call cache, absent outside a resolve call.
    pub fn per_resolve(&self) -> Option<&'a PerResolveCache> {
        self.per_resolve
    }
}

/// Controls reuse and ownership of values built for one registration.
///
/// Implement this to plug in a custom lifetime. Implementations must be
/// safe to share across threads; the resolution pipeline calls them
/// concurrently.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use parking_lot::RwLock;
/// use sanad_container::instance::Instance;
/// use sanad_container::lifetime::{Lifetime, LifetimeManager, LifetimeScope};
///
/// /// Remembers the first value forever, never disposing it.
/// #[derive(Default)]
/// struct Forever(RwLock<Option<Instance>>);
///
/// impl LifetimeManager for Forever {
///     fn kind(&self) -> Lifetime { Lifetime::ContainerControlled }
///     fn get(&self, _: &LifetimeScope<'_>) -> Option<Instance> { self.0.read().clone() }
///     fn set(&self, value: Instance, _: &LifetimeScope<'_>) { *self.0.write() = Some(value); }
/// }
/// ```
pub trait LifetimeManager: Send + Sync {
    /// The built-in lifetime this manager behaves like, for diagnostics and
    /// placement.
    fn kind(&self) -> Lifetime;

    /// Returns the cached value for `scope`, if any.
    fn get(&self, scope: &LifetimeScope<'_>) -> Option<Instance>;

    /// Stores a freshly built value.
    fn set(&self, value: Instance, scope: &LifetimeScope<'_>);

    /// Called once after every build attempt, successful or not.
    fn recover(&self) {}

    /// Lock held between the second `get` and `set`, or `None` if
    /// concurrent builds are acceptable.
    fn build_lock(&self, _scope: &LifetimeScope<'_>) -> Option<Arc<ReentrantMutex<()>>> {
        None
    }

    /// Drops every cached value, disposing the ones this manager owns.
    ///
    /// Called when the registration is replaced.
    fn release(&self) -> Result<(), DisposalError> {
        Ok(())
    }
}

impl fmt::Debug for dyn LifetimeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LifetimeManager({})", self.kind())
    }
}

fn dispose_all(values: impl IntoIterator<Item = Instance>) -> Result<(), DisposalError> {
    let failures: Vec<DisposalFailure> = values
        .into_iter()
        .filter_map(|value| {
            let disposer = value.disposer()?;
            disposer.dispose().err().map(|source| DisposalFailure {
                type_name: disposer.type_name(),
                source,
            })
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(DisposalError { failures })
    }
}

/// Never caches.
#[derive(Debug, Default)]
pub struct TransientLifetime;

impl LifetimeManager for TransientLifetime {
    fn kind(&self) -> Lifetime {
        Lifetime::Transient
    }

    fn get(&self, _scope: &LifetimeScope<'_>) -> Option<Instance> {
        None
    }

    fn set(&self, _value: Instance, _scope: &LifetimeScope<'_>) {}
}

/// One value per registration, owned by the root container.
#[derive(Default)]
pub struct ContainerControlledLifetime {
    value: RwLock<Option<Instance>>,
    lock: Arc<ReentrantMutex<()>>,
}

impl LifetimeManager for ContainerControlledLifetime {
    fn kind(&self) -> Lifetime {
        Lifetime::ContainerControlled
    }

    fn get(&self, _scope: &LifetimeScope<'_>) -> Option<Instance> {
        self.value.read().clone()
    }

    fn set(&self, value: Instance, scope: &LifetimeScope<'_>) {
        if let Some(disposer) = value.disposer() {
            scope.root_owner().own(disposer.clone());
        }
        *self.value.write() = Some(value);
    }

    fn build_lock(&self, _scope: &LifetimeScope<'_>) -> Option<Arc<ReentrantMutex<()>>> {
        Some(self.lock.clone())
    }

    fn release(&self) -> Result<(), DisposalError> {
        dispose_all(self.value.write().take())
    }
}

/// One value per resolving container.
///
/// Both the value and the build lock of a container are dropped when that
/// container is disposed.
#[derive(Default)]
pub struct HierarchicalLifetime {
    values: Arc<DashMap<ContainerId, Instance>>,
    locks: Arc<DashMap<ContainerId, Arc<ReentrantMutex<()>>>>,
}

impl LifetimeManager for HierarchicalLifetime {
    fn kind(&self) -> Lifetime {
        Lifetime::Hierarchical
    }

    fn get(&self, scope: &LifetimeScope<'_>) -> Option<Instance> {
        self.values
            .get(&scope.container_id())
            .map(|entry| entry.value().clone())
    }

    fn set(&self, value: Instance, scope: &LifetimeScope<'_>) {
        let id = scope.container_id();
        let disposer = value.disposer().cloned();
        let type_name = value.ty().type_name();
        self.values.insert(id, value);

        // The owning container forgets the value and disposes it on its way out.
        let values = Arc::downgrade(&self.values);
        scope.owner().on_dispose(type_name, move || {
            if let Some(values) = values.upgrade() {
                values.remove(&id);
            }
            match &disposer {
                Some(disposer) => disposer.dispose(),
                None => Ok(()),
            }
        });
    }

    fn build_lock(&self, scope: &LifetimeScope<'_>) -> Option<Arc<ReentrantMutex<()>>> {
        let id = scope.container_id();
        let (lock, created) = match self.locks.entry(id) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let lock = Arc::new(ReentrantMutex::new(()));
                entry.insert(lock.clone());
                (lock, true)
            }
        };

        // Registered after the shard guard is gone: a disposed owner runs
        // the action at once.
        if created {
            let locks = Arc::downgrade(&self.locks);
            scope.owner().on_dispose(std::any::type_name::<Self>(), move || {
                if let Some(locks) = locks.upgrade() {
                    locks.remove(&id);
                }
                Ok(())
            });
        }
        Some(lock)
    }

    fn release(&self) -> Result<(), DisposalError> {
        let ids: Vec<ContainerId> = self.values.iter().map(|entry| *entry.key()).collect();
        let values = ids
            .into_iter()
            .filter_map(|id| self.values.remove(&id).map(|(_, value)| value));
        let result = dispose_all(values);
        self.locks.clear();
        result
    }
}

/// One value per outermost resolve call.
#[derive(Debug, Default)]
pub struct PerResolveLifetime {
    // Gives every manager a distinct, non-zero address to key the cache by.
    _slot: u8,
}

impl PerResolveLifetime {
    fn slot(&self) -> usize {
        self as *const Self as usize
    }
}

impl LifetimeManager for PerResolveLifetime {
    fn kind(&self) -> Lifetime {
        Lifetime::PerResolve
    }

    fn get(&self, scope: &LifetimeScope<'_>) -> Option<Instance> {
        scope.per_resolve()?.get(self.slot())
    }

    fn set(&self, value: Instance, scope: &LifetimeScope<'_>) {
        match scope.per_resolve() {
            Some(cache) => cache.insert(self.slot(), value),
            None => trace!("PerResolve value built outside a resolve call, not cached"),
        }
    }
}

/// Actions run when the current thread exits.
#[derive(Default)]
struct ThreadExit(RefCell<Vec<Box<dyn FnOnce()>>>);

impl Drop for ThreadExit {
    fn drop(&mut self) {
        for action in self.0.get_mut().drain(..) {
            action();
        }
    }
}

thread_local! {
    static THREAD_EXIT: ThreadExit = ThreadExit::default();
}

/// One value per OS thread.
///
/// A thread's entry is dropped when that thread exits.
#[derive(Default)]
pub struct PerThreadLifetime {
    values: Arc<DashMap<ThreadId, Instance>>,
}

impl LifetimeManager for PerThreadLifetime {
    fn kind(&self) -> Lifetime {
        Lifetime::PerThread
    }

    fn get(&self, _scope: &LifetimeScope<'_>) -> Option<Instance> {
        self.values
            .get(&thread::current().id())
            .map(|entry| entry.value().clone())
    }

    fn set(&self, value: Instance, _scope: &LifetimeScope<'_>) {
        let id = thread::current().id();
        if self.values.insert(id, value).is_some() {
            return;
        }
        let values = Arc::downgrade(&self.values);
        let registered = THREAD_EXIT.try_with(|exit| {
            exit.0.borrow_mut().push(Box::new(move || {
                if let Some(values) = values.upgrade() {
                    values.remove(&id);
                }
            }));
        });
        if registered.is_err() {
            // The thread is already tearing down its locals.
            self.values.remove(&id);
        }
    }

    fn release(&self) -> Result<(), DisposalError> {
        self.values.clear();
        Ok(())
    }
}

/// Weak reference to a value owned elsewhere.
#[derive(Default)]
pub struct ExternallyControlledLifetime {
    value: RwLock<Option<WeakInstance>>,
    lock: Arc<ReentrantMutex<()>>,
}

impl LifetimeManager for ExternallyControlledLifetime {
    fn kind(&self) -> Lifetime {
        Lifetime::ExternallyControlled
    }

    fn get(&self, _scope: &LifetimeScope<'_>) -> Option<Instance> {
        self.value.read().as_ref().and_then(WeakInstance::upgrade)
    }

    fn set(&self, value: Instance, _scope: &LifetimeScope<'_>) {
        *self.value.write() = Some(value.downgrade());
    }

    /// Forgets a reference whose value is gone.
    fn recover(&self) {
        let mut value = self.value.write();
        if value.as_ref().is_some_and(|weak| !weak.is_alive()) {
            *value = None;
        }
    }

    fn build_lock(&self, _scope: &LifetimeScope<'_>) -> Option<Arc<ReentrantMutex<()>>> {
        Some(self.lock.clone())
    }

    fn release(&self) -> Result<(), DisposalError> {
        *self.value.write() = None;
        Ok(())
    }
}
