//! # The Container
//!
//! Owns a registry, a lifetime store, three staged chains and an optional
//! parent, and composes them into register and resolve.
//!
//! # Architecture
//! ```text
//! Container::new()  ── create_child() ──►  child ── create_child() ──► grandchild
//!     │                                      │
//!     ├─ Registry (always)                   ├─ Registry (on first local write)
//!     ├─ LifetimeStore ◄── owns (weak) ──────┤
//!     └─ Pipelines     ◄── linked ───────────┘
//! ```
//!
//! A child reads through to its ancestors until it registers something of
//! its own. ContainerControlled registrations always live at the root.
//!
//! # Examples
//! ```rust
//! use sanad_container::prelude::*;
//! use std::sync::Arc;
//!
//! trait Logger: Send + Sync {
//!     fn log(&self, msg: &str);
//! }
//!
//! struct ConsoleLogger;
//! impl Logger for ConsoleLogger {
//!     fn log(&self, msg: &str) { println!("{msg}"); }
//! }
//!
//! impl Injectable for ConsoleLogger {
//!     fn metadata() -> TypeMetadata<Self> {
//!         TypeMetadata::new().constructor(Constructor::new("new", |_| Ok(ConsoleLogger)))
//!     }
//! }
//!
//! let container = Container::new();
//! container.add_type::<ConsoleLogger>().expect("container is live");
//! container
//!     .register::<dyn Logger>()
//!     .map_to::<ConsoleLogger>(|logger| logger)
//!     .lifetime(Lifetime::ContainerControlled)
//!     .commit()
//!     .expect("Failed to register");
//!
//! let a: Arc<dyn Logger> = container.resolve().expect("Failed to resolve");
//! let b: Arc<dyn Logger> = container.resolve().expect("Failed to resolve");
//! assert!(Arc::ptr_eq(&a, &b));
//! ```

use std::any::type_name;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use sanad_support::rendering::suggest_similar;
use tracing::{debug, info, instrument, trace, warn};

use crate::aspects;
use crate::context::{BuildContext, ResolutionFrame, ResolveCall, ResolverOverride};
use crate::error::{
    ConfigurationError, DisposalError, MissingDependencyError, PathStep, ResolutionError,
    ResolutionFailure, Result, SanadError,
};
use crate::extension::{Extension, ExtensionContext};
use crate::instance::{BoxError, Dispose, Instance};
use crate::key::{DependencyKey, normalize_name};
use crate::lifetime::{ContainerId, Lifetime, LifetimeManager, LifetimeScope};
use crate::metadata::{Injectable, TypeCatalog};
use crate::options::ContainerOptions;
use crate::pipeline::Pipelines;
use crate::registration::{
    ActivationFactory, DisposalPolicy, InjectionMember, MappedType, Placement, RegisterRequest,
    Registration, RegistrationInfo, RegistrationSetup,
};
use crate::registry::Registry;
use crate::store::LifetimeStore;

// ============================================================
// ContainerCore
// ============================================================

/// Shared state behind every [`Container`] handle.
pub(crate) struct ContainerCore {
    id: ContainerId,
    options: Arc<ContainerOptions>,
    parent: Option<Arc<ContainerCore>>,
    registry: OnceCell<Registry>,
    store: LifetimeStore,
    pipelines: Pipelines,
    catalog: Arc<TypeCatalog>,
    disposed: AtomicBool,
}

impl ContainerCore {
    fn new_root(options: ContainerOptions) -> Arc<Self> {
        let pipelines = Pipelines::empty();
        aspects::install_defaults(&pipelines);

        let core = Arc::new(Self {
            id: ContainerId::next(),
            options: Arc::new(options),
            parent: None,
            registry: OnceCell::with_value(Registry::new()),
            store: LifetimeStore::new(),
            pipelines,
            catalog: Arc::new(TypeCatalog::default()),
            disposed: AtomicBool::new(false),
        });
        info!(id = %core.id, max_depth = core.options.max_resolve_depth, "Root container created");
        core
    }

    fn new_child(parent: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(Self {
            id: ContainerId::next(),
            options: parent.options.clone(),
            parent: Some(parent.clone()),
            registry: OnceCell::new(),
            store: LifetimeStore::new(),
            pipelines: parent.pipelines.child(),
            catalog: parent.catalog.clone(),
            disposed: AtomicBool::new(false),
        });
        parent.store.adopt(&child);
        debug!(id = %child.id, parent = %parent.id, "Child container created");
        child
    }

    pub(crate) fn id(&self) -> ContainerId {
        self.id
    }

    pub(crate) fn store(&self) -> &LifetimeStore {
        &self.store
    }

    pub(crate) fn root(&self) -> &ContainerCore {
        let mut current = self;
        while let Some(parent) = &current.parent {
            current = parent;
        }
        current
    }

    pub(crate) fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub(crate) fn pipelines(&self) -> &Pipelines {
        &self.pipelines
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(SanadError::ContainerDisposed)
        } else {
            Ok(())
        }
    }

    /// Self, then each ancestor up to the root.
    fn lineage(&self) -> impl Iterator<Item = &ContainerCore> {
        std::iter::successors(Some(self), |c| c.parent.as_deref())
    }

    /// The registry written by local registrations, created on first use.
    fn local_registry(&self) -> &Registry {
        self.registry.get_or_init(|| {
            debug!(id = %self.id, "Local registry created");
            Registry::new()
        })
    }

    /// Nearest registry in the lineage. The root always has one.
    fn nearest_registry(&self) -> (&ContainerCore, &Registry) {
        for container in self.lineage() {
            if let Some(registry) = container.registry.get() {
                return (container, registry);
            }
        }
        let root = self.root();
        (root, root.local_registry())
    }

    fn find_registration(&self, key: &DependencyKey) -> Option<Arc<Registration>> {
        self.lineage()
            .find_map(|container| container.registry.get().and_then(|r| r.get(key)))
    }

    /// Creates a registration for a catalogued type nobody registered.
    fn implicit_registration(&self, key: &DependencyKey) -> Option<Arc<Registration>> {
        if !self.catalog.contains(key.type_id()) {
            return None;
        }
        let (owner, _) = self.nearest_registry();
        let built = match owner.build_registration(key.clone(), RegisterRequest::default(), true) {
            Ok(built) => built,
            Err(error) => {
                warn!(key = %key, %error, "Implicit registration rejected");
                return None;
            }
        };
        let target = built.target;
        let (_, registry) = target.nearest_registry();
        trace!(key = %key, owner = %target.id, "Implicit registration");
        Some(registry.get_or_add(key, move || built.registration))
    }

    fn build_registration(
        &self,
        key: DependencyKey,
        request: RegisterRequest,
        implicit: bool,
    ) -> std::result::Result<BuiltRegistration<'_>, ConfigurationError> {
        let mut setup = RegistrationSetup::new(key, request);
        self.pipelines.registration().pipeline()(&mut setup)?;

        let target = match setup.placement {
            Placement::Local => self,
            Placement::Root => self.root(),
        };
        let manager = setup
            .manager
            .take()
            .unwrap_or_else(|| Lifetime::Transient.manager());
        let instance = setup.request.instance.take();
        let registration = Registration::new(
            setup.key,
            setup.policies,
            manager,
            target.pipelines.resolution().clone(),
            implicit,
        );
        Ok(BuiltRegistration {
            registration,
            target,
            instance,
        })
    }

    fn register(&self, key: DependencyKey, request: RegisterRequest) -> Result<()> {
        self.ensure_live()?;
        let built = self.build_registration(key, request, false)?;
        let BuiltRegistration {
            registration,
            target,
            instance,
        } = built;

        let registry = target.local_registry();
        let manager = registration.lifetime().clone();

        // A manager carried over from the replaced registration is emptied
        // before it is seeded again.
        let carried = registry
            .get(registration.key())
            .filter(|previous| same_manager(previous.lifetime(), &manager));
        if let Some(previous) = &carried {
            release_replaced(previous);
        }

        if let Some(instance) = instance {
            manager.set(instance, &LifetimeScope::new(target, None));
        }

        let info = registration.info();
        if let Some(previous) = registry.add_or_replace(registration) {
            if !same_manager(previous.lifetime(), &manager) {
                release_replaced(&previous);
            }
        }
        debug!(
            container = %target.id,
            key = %info.type_name,
            name = ?info.name,
            lifetime = %info.lifetime,
            "Registered"
        );
        Ok(())
    }

    /// Resolves `key` below `parent`. Errors travel unwrapped.
    pub(crate) fn resolve_in(
        self: &Arc<Self>,
        call: &ResolveCall,
        key: &DependencyKey,
        parent: Option<&ResolutionFrame<'_>>,
    ) -> std::result::Result<Instance, ResolutionError> {
        if let Some(value) = call.dependency_override(key) {
            trace!(key = %key, "Dependency override");
            return Ok(value);
        }

        let depth = parent.map_or(0, |p| p.depth() + 1);
        if depth >= call.max_depth() {
            let mut path = parent.map(ResolutionFrame::path).unwrap_or_default();
            path.push(PathStep {
                key: key.clone(),
                lifetime: None,
            });
            return Err(ResolutionError::DepthExceeded {
                limit: call.max_depth(),
                path,
            });
        }

        let registration = self
            .find_registration(key)
            .or_else(|| self.implicit_registration(key))
            .ok_or_else(|| self.missing(key, parent))?;

        let frame = ResolutionFrame::new(key.clone(), registration.clone(), parent);
        let mut ctx = BuildContext::new(self, call, &frame);
        registration.handler()(&mut ctx)?;

        ctx.take_existing().ok_or_else(|| ResolutionError::Activation {
            key: key.clone(),
            path: frame.path(),
            source: "resolution pipeline produced no value".into(),
        })
    }

    fn missing(&self, key: &DependencyKey, parent: Option<&ResolutionFrame<'_>>) -> ResolutionError {
        let mut path = parent.map(ResolutionFrame::path).unwrap_or_default();
        path.push(PathStep {
            key: key.clone(),
            lifetime: None,
        });
        ResolutionError::MissingDependency(MissingDependencyError {
            requested: key.clone(),
            required_by: parent.map(|p| p.key().clone()),
            suggestions: self.suggestions(key),
            path,
        })
    }

    /// Registered or catalogued type names that look like `key`'s.
    pub(crate) fn suggestions(&self, key: &DependencyKey) -> Vec<String> {
        let mut names: Vec<&'static str> = self.catalog.type_names();
        for container in self.lineage() {
            if let Some(registry) = container.registry.get() {
                names.extend(registry.registrations().iter().map(|r| r.key().type_name()));
            }
        }
        names.sort_unstable();
        names.dedup();
        suggest_similar(key.type_name(), &names, 3)
    }

    /// Disposes owned values and children, then detaches from the parent.
    pub(crate) fn dispose(&self) -> std::result::Result<(), DisposalError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(id = %self.id, "Disposing container");

        let result = self.store.dispose();
        if let Some(parent) = &self.parent {
            parent.store.release_child(self);
        }
        if let Some(registry) = self.registry.get() {
            registry.clear();
        }
        result
    }
}

impl Drop for ContainerCore {
    fn drop(&mut self) {
        if let Err(error) = self.dispose() {
            warn!(id = %self.id, %error, "Disposal on drop failed");
        }
    }
}

fn same_manager(a: &Arc<dyn LifetimeManager>, b: &Arc<dyn LifetimeManager>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn release_replaced(previous: &Registration) {
    if let Err(error) = previous.lifetime().release() {
        warn!(key = %previous.key(), %error, "Replaced registration failed to release its value");
    }
}

struct BuiltRegistration<'a> {
    registration: Arc<Registration>,
    target: &'a ContainerCore,
    instance: Option<Instance>,
}

// ============================================================
// Container
// ============================================================

/// A handle to one container in a hierarchy.
///
/// Cloning is cheap and yields another handle to the same container.
/// Dropping the last handle disposes the container.
#[derive(Clone)]
pub struct Container {
    core: Arc<ContainerCore>,
}

impl Container {
    /// Creates a root container with default options.
    pub fn new() -> Self {
        Self {
            core: ContainerCore::new_root(ContainerOptions::default()),
        }
    }

    /// Creates a builder for a root container.
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<ContainerCore> {
        &self.core
    }

    pub fn id(&self) -> ContainerId {
        self.core.id
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.core.options
    }

    /// The parent container, if this is a child.
    pub fn parent(&self) -> Option<Container> {
        self.core.parent.clone().map(|core| Container { core })
    }

    /// The staged chains of this container.
    pub fn pipelines(&self) -> &Pipelines {
        &self.core.pipelines
    }

    // ── Registration ──

    /// Starts a registration of `T`.
    pub fn register<T: ?Sized + Send + Sync + 'static>(&self) -> RegisterType<'_, T> {
        RegisterType::new(self)
    }

    /// Adds `T`'s metadata and starts a registration of `T` built by its
    /// own constructors.
    pub fn register_type<T: Injectable>(&self) -> RegisterType<'_, T> {
        self.core.catalog.add::<T>();
        RegisterType::new(self)
    }

    /// Adds `T`'s metadata so it can be built without a registration.
    pub fn add_type<T: Injectable>(&self) -> Result<()> {
        self.core.ensure_live()?;
        self.core.catalog.add::<T>();
        debug!(type_name = type_name::<T>(), "Type metadata added");
        Ok(())
    }

    /// Starts registering an existing value. The container never disposes
    /// it.
    pub fn register_instance<T: ?Sized + Send + Sync + 'static>(&self, value: Arc<T>) -> RegisterInstance<'_> {
        RegisterInstance::new(self, DependencyKey::of::<T>(), Instance::new(value))
    }

    /// Starts registering an existing value that its owner disposes.
    pub fn register_disposable<T: ?Sized + Dispose + 'static>(&self, value: Arc<T>) -> RegisterInstance<'_> {
        RegisterInstance::new(self, DependencyKey::of::<T>(), Instance::disposable(value))
    }

    /// Starts registering a type-erased value under `key`.
    pub fn register_instance_with(&self, key: DependencyKey, instance: Instance) -> RegisterInstance<'_> {
        RegisterInstance::new(self, key, instance)
    }

    /// Applies an extension to this container.
    pub fn add_extension(&self, extension: &dyn Extension) -> Result<()> {
        self.core.ensure_live()?;
        debug!(extension = extension.name(), id = %self.core.id, "Initializing extension");
        extension.initialize(&ExtensionContext::new(self))
    }

    // ── Resolution ──

    /// Resolves the default registration of `T`.
    pub fn resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.resolve_with(None, Vec::new())
    }

    /// Resolves the registration of `T` called `name`.
    pub fn resolve_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.resolve_with(Some(name), Vec::new())
    }

    /// Resolves `T` with overrides applied to this call only.
    pub fn resolve_with<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: Option<&str>,
        overrides: Vec<ResolverOverride>,
    ) -> Result<Arc<T>> {
        let key = DependencyKey::new(crate::key::TypeKey::of::<T>(), name);
        let value = self.resolve_key(&key, overrides)?;
        value.downcast::<T>().ok_or_else(|| {
            let cause = ResolutionError::TypeMismatch {
                key: key.clone(),
                expected: type_name::<T>(),
                actual: value.ty().type_name(),
                path: Vec::new(),
            };
            SanadError::Resolution(ResolutionFailure::new(key, cause))
        })
    }

    /// Resolves `key`. The only place resolution errors are wrapped.
    #[instrument(skip_all, fields(key = %key))]
    pub fn resolve_key(&self, key: &DependencyKey, overrides: Vec<ResolverOverride>) -> Result<Instance> {
        self.core.ensure_live()?;
        let call = ResolveCall::new(overrides, self.core.options.max_resolve_depth);
        self.core.resolve_in(&call, key, None).map_err(|cause| {
            debug!(%cause, "Resolve failed");
            SanadError::Resolution(ResolutionFailure::new(key.clone(), cause))
        })
    }

    /// `true` if the default registration of `T` exists here or in an
    /// ancestor.
    pub fn is_registered<T: ?Sized + 'static>(&self) -> bool {
        self.is_registered_key(&DependencyKey::of::<T>())
    }

    pub fn is_registered_named<T: ?Sized + 'static>(&self, name: &str) -> bool {
        self.is_registered_key(&DependencyKey::named::<T>(name))
    }

    pub fn is_registered_key(&self, key: &DependencyKey) -> bool {
        self.core.find_registration(key).is_some()
    }

    /// Every registration visible from this container; the nearest one
    /// wins for each key.
    pub fn registrations(&self) -> Vec<RegistrationInfo> {
        let mut seen = HashSet::new();
        let mut infos = Vec::new();
        for container in self.core.lineage() {
            let Some(registry) = container.registry.get() else {
                continue;
            };
            for registration in registry.registrations() {
                if seen.insert(registration.key().clone()) {
                    infos.push(registration.info());
                }
            }
        }
        infos
    }

    // ── Hierarchy ──

    /// Creates a child container.
    ///
    /// A child created from a disposed container is disposed immediately.
    pub fn create_child(&self) -> Container {
        Container {
            core: ContainerCore::new_child(&self.core),
        }
    }

    /// Disposes every owned value and child container, once.
    ///
    /// Every disposer runs even when some fail; the failures are reported
    /// together.
    #[instrument(skip_all, fields(id = %self.core.id))]
    pub fn dispose(&self) -> Result<()> {
        self.core.dispose().map_err(SanadError::from)
    }

    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.core.id)
            .field("parent", &self.core.parent.as_ref().map(|p| p.id))
            .field("registry", &self.core.registry.get())
            .field("store", &self.core.store)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ============================================================
// ContainerBuilder
// ============================================================

/// Builds a root [`Container`].
///
/// # Examples
/// ```rust
/// use sanad_container::prelude::*;
///
/// let container = Container::builder().max_resolve_depth(32).build().unwrap();
/// assert_eq!(container.options().max_resolve_depth, 32);
/// ```
pub struct ContainerBuilder {
    options: ContainerOptions,
    extensions: Vec<Box<dyn Extension>>,
}

impl ContainerBuilder {
    fn new() -> Self {
        Self {
            options: ContainerOptions::default(),
            extensions: Vec::new(),
        }
    }

    pub fn options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_resolve_depth(mut self, depth: usize) -> Self {
        self.options = self.options.max_resolve_depth(depth);
        self
    }

    /// Applies `extension` to the root once it is built.
    pub fn extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    #[instrument(skip(self), name = "container_build")]
    pub fn build(self) -> Result<Container> {
        let container = Container {
            core: ContainerCore::new_root(self.options),
        };
        for extension in &self.extensions {
            container.add_extension(extension.as_ref())?;
        }
        Ok(container)
    }
}

// ============================================================
// RegisterType / RegisterInstance
// ============================================================

/// Fluent registration of `T`; takes effect on [`commit`](Self::commit).
#[must_use = "registrations take effect on .commit()"]
pub struct RegisterType<'c, T: ?Sized> {
    container: &'c Container,
    name: Option<Arc<str>>,
    request: RegisterRequest,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<'c, T: ?Sized + Send + Sync + 'static> RegisterType<'c, T> {
    fn new(container: &'c Container) -> Self {
        Self {
            container,
            name: None,
            request: RegisterRequest::default(),
            _marker: PhantomData,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = normalize_name(Some(name));
        self
    }

    /// Resolve `To` instead and convert it with `cast`.
    pub fn map_to<To: ?Sized + Send + Sync + 'static>(
        mut self,
        cast: impl Fn(Arc<To>) -> Arc<T> + Send + Sync + 'static,
    ) -> Self {
        self.request.mapping = Some(MappedType::new::<T, To>(cast));
        self
    }

    /// Build with `factory` instead of a constructor.
    pub fn factory(
        mut self,
        factory: impl Fn(&BuildContext<'_>) -> std::result::Result<Arc<T>, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.request.factory = Some(ActivationFactory::new::<T>(factory));
        self
    }

    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.request.lifetime = Some(lifetime);
        self
    }

    pub fn lifetime_manager(mut self, manager: Arc<dyn LifetimeManager>) -> Self {
        self.request.manager = Some(manager);
        self
    }

    pub fn member(mut self, member: InjectionMember) -> Self {
        self.request.members.push(member);
        self
    }

    pub fn commit(self) -> Result<()> {
        let key = DependencyKey::from_parts(crate::key::TypeKey::of::<T>(), self.name);
        self.container.core.register(key, self.request)
    }
}

impl<T: ?Sized + Dispose + 'static> RegisterType<'_, T> {
    /// Values built by the factory are disposed by their owner.
    pub fn disposable(mut self) -> Self {
        self.request.disposal = Some(DisposalPolicy::of::<T>());
        self
    }
}

/// Fluent registration of an existing value.
#[must_use = "registrations take effect on .commit()"]
pub struct RegisterInstance<'c> {
    container: &'c Container,
    key: DependencyKey,
    request: RegisterRequest,
}

impl<'c> RegisterInstance<'c> {
    fn new(container: &'c Container, key: DependencyKey, instance: Instance) -> Self {
        Self {
            container,
            key,
            request: RegisterRequest {
                instance: Some(instance),
                ..Default::default()
            },
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.key = DependencyKey::new(self.key.ty(), Some(name));
        self
    }

    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.request.lifetime = Some(lifetime);
        self
    }

    pub fn lifetime_manager(mut self, manager: Arc<dyn LifetimeManager>) -> Self {
        self.request.manager = Some(manager);
        self
    }

    pub fn commit(self) -> Result<()> {
        self.container.core.register(self.key, self.request)
    }
}

// ============================================================
// Prelude
// ============================================================

pub mod prelude {
    pub use super::{Container, ContainerBuilder, RegisterInstance, RegisterType};
    pub use crate::context::{BuildContext, ResolveHandler, ResolverOverride};
    pub use crate::error::{Result, SanadError};
    pub use crate::extension::{Extension, ExtensionContext};
    pub use crate::instance::{BoxError, Dispose, Instance};
    pub use crate::key::{DependencyKey, TypeKey};
    pub use crate::lifetime::{Lifetime, LifetimeManager, LifetimeScope};
    pub use crate::metadata::{Constructor, Injectable, TypeMetadata};
    pub use crate::options::ContainerOptions;
    pub use crate::pipeline::{BuildStage, SelectionStage};
    pub use crate::registration::InjectionMember;
}
