//! Registrations and their policies.
//!
//! A [`Registration`] is the record stored in the registry for one
//! `(type, name)` pair: a policy bag, a lifetime manager, and the
//! resolution pipeline it was created under. Policies are plain values
//! keyed by their Rust type; the default pipeline aspects look for the
//! ones defined in this module, and extensions may add their own.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::context::{BuildContext, ResolveHandler};
use crate::error::ConfigurationError;
use crate::instance::{BoxError, Dispose, Disposer, Instance};
use crate::key::{DependencyKey, TypeKey};
use crate::lifetime::{Lifetime, LifetimeManager};
use crate::pipeline::{ResolutionConcern, StagedChain};

/// Policies attached to one registration, at most one per type.
pub type PolicyMap = anymap2::SendSyncAnyMap;

/// Resolve the registration by resolving another type, then converting.
#[derive(Clone)]
pub struct MappedType {
    pub target: TypeKey,
    cast: Arc<dyn Fn(&Instance) -> Option<Instance> + Send + Sync>,
}

impl MappedType {
    /// Maps `From` to `To` using `cast` to turn an `Arc<To>` into an
    /// `Arc<From>`, usually an unsizing coercion.
    pub fn new<From, To>(cast: impl Fn(Arc<To>) -> Arc<From> + Send + Sync + 'static) -> Self
    where
        From: ?Sized + Send + Sync + 'static,
        To: ?Sized + Send + Sync + 'static,
    {
        Self {
            target: TypeKey::of::<To>(),
            cast: Arc::new(move |instance: &Instance| {
                let target = instance.downcast::<To>()?;
                let disposer = instance.disposer().cloned();
                Some(Instance::new(cast(target)).with_disposer(disposer))
            }),
        }
    }

    pub(crate) fn cast(&self, instance: &Instance) -> Option<Instance> {
        (self.cast)(instance)
    }
}

impl fmt::Debug for MappedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedType").field("target", &self.target).finish()
    }
}

type FactoryFn = dyn Fn(&BuildContext<'_>) -> Result<Instance, BoxError> + Send + Sync;

/// Builds the value with user code instead of a constructor.
#[derive(Clone)]
pub struct ActivationFactory(Arc<FactoryFn>);

impl ActivationFactory {
    pub fn new<T: ?Sized + Send + Sync + 'static>(
        factory: impl Fn(&BuildContext<'_>) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(move |ctx: &BuildContext<'_>| factory(ctx).map(Instance::new)))
    }

    pub(crate) fn build(&self, ctx: &BuildContext<'_>) -> Result<Instance, BoxError> {
        (self.0)(ctx)
    }
}

/// Attaches a disposer to values built by a factory.
#[derive(Clone)]
pub struct DisposalPolicy(Arc<dyn Fn(&Instance) -> Option<Arc<Disposer>> + Send + Sync>);

impl DisposalPolicy {
    pub fn of<T: ?Sized + Dispose + 'static>() -> Self {
        Self(Arc::new(|instance: &Instance| {
            let value = instance.downcast::<T>()?;
            Some(Disposer::new(type_name::<T>(), move || value.dispose()))
        }))
    }

    pub(crate) fn attach(&self, instance: Instance) -> Instance {
        if instance.disposer().is_some() {
            return instance;
        }
        let disposer = (self.0)(&instance);
        instance.with_disposer(disposer)
    }
}

/// Select a constructor by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorOverride {
    pub name: &'static str,
}

type InitializerFn = dyn Fn(&Instance, &BuildContext<'_>) -> Result<(), BoxError> + Send + Sync;

/// Runs against a freshly built value.
#[derive(Clone)]
pub struct Initializer {
    pub name: &'static str,
    apply: Arc<InitializerFn>,
}

impl Initializer {
    pub(crate) fn apply(&self, instance: &Instance, ctx: &BuildContext<'_>) -> Result<(), BoxError> {
        (self.apply)(instance, ctx)
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initializer").field("name", &self.name).finish()
    }
}

/// Initializers in registration order.
#[derive(Debug, Clone, Default)]
pub struct Initializers(pub Vec<Initializer>);

/// Extra build instructions passed at registration.
#[derive(Debug, Clone)]
pub enum InjectionMember {
    Constructor(ConstructorOverride),
    Method(Initializer),
}

impl InjectionMember {
    /// Use the constructor called `name`.
    pub fn constructor(name: &'static str) -> Self {
        Self::Constructor(ConstructorOverride { name })
    }

    /// Call `method` on the built value before handing it out.
    pub fn method<T: ?Sized + Send + Sync + 'static>(
        name: &'static str,
        method: impl Fn(&T, &BuildContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self::Method(Initializer {
            name,
            apply: Arc::new(move |instance: &Instance, ctx: &BuildContext<'_>| {
                let value = instance.downcast::<T>().ok_or_else(|| -> BoxError {
                    format!(
                        "initializer {name} expects {}, found {}",
                        type_name::<T>(),
                        instance.ty().type_name()
                    )
                    .into()
                })?;
                method(&value, ctx)
            }),
        })
    }
}

/// Where a registration is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Placement {
    /// The container `register` was called on.
    Local,
    /// The root of the hierarchy.
    Root,
}

/// Everything a caller asked for in one `register` call.
#[derive(Default)]
pub struct RegisterRequest {
    pub mapping: Option<MappedType>,
    pub factory: Option<ActivationFactory>,
    pub lifetime: Option<Lifetime>,
    pub manager: Option<Arc<dyn LifetimeManager>>,
    pub members: Vec<InjectionMember>,
    pub instance: Option<Instance>,
    pub disposal: Option<DisposalPolicy>,
}

/// Working state of the registration pipeline.
pub struct RegistrationSetup {
    pub key: DependencyKey,
    pub request: RegisterRequest,
    pub policies: PolicyMap,
    pub manager: Option<Arc<dyn LifetimeManager>>,
    pub placement: Placement,
}

impl RegistrationSetup {
    pub(crate) fn new(key: DependencyKey, request: RegisterRequest) -> Self {
        Self {
            key,
            request,
            policies: PolicyMap::new(),
            manager: None,
            placement: Placement::Local,
        }
    }
}

pub type RegistrationHandler =
    Arc<dyn Fn(&mut RegistrationSetup) -> Result<(), ConfigurationError> + Send + Sync>;

/// Registry entry for one `(type, name)` pair.
pub struct Registration {
    key: DependencyKey,
    policies: RwLock<PolicyMap>,
    lifetime: Arc<dyn LifetimeManager>,
    pipeline: Arc<StagedChain<ResolutionConcern>>,
    compiled: Mutex<Option<(u64, ResolveHandler)>>,
    implicit: bool,
}

impl Registration {
    pub(crate) fn new(
        key: DependencyKey,
        policies: PolicyMap,
        lifetime: Arc<dyn LifetimeManager>,
        pipeline: Arc<StagedChain<ResolutionConcern>>,
        implicit: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            policies: RwLock::new(policies),
            lifetime,
            pipeline,
            compiled: Mutex::new(None),
            implicit,
        })
    }

    pub fn key(&self) -> &DependencyKey {
        &self.key
    }

    pub fn lifetime(&self) -> &Arc<dyn LifetimeManager> {
        &self.lifetime
    }

    /// Returns a copy of policy `P`, if set.
    pub fn policy<P: Clone + Send + Sync + 'static>(&self) -> Option<P> {
        self.policies.read().get::<P>().cloned()
    }

    pub fn has_policy<P: Send + Sync + 'static>(&self) -> bool {
        self.policies.read().contains::<P>()
    }

    /// Sets policy `P`, returning the previous one.
    pub fn set_policy<P: Send + Sync + 'static>(&self, policy: P) -> Option<P> {
        self.policies.write().insert(policy)
    }

    /// `true` if the container created this registration on first resolve.
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    /// The composed resolution handler, rebuilt when the pipeline changed.
    pub(crate) fn handler(&self) -> ResolveHandler {
        let version = self.pipeline.version();
        let mut compiled = self.compiled.lock();
        if let Some((built_for, handler)) = compiled.as_ref() {
            if *built_for == version {
                return handler.clone();
            }
        }
        let handler = self.pipeline.pipeline();
        *compiled = Some((version, handler.clone()));
        handler
    }

    pub fn info(&self) -> RegistrationInfo {
        let policies = self.policies.read();
        RegistrationInfo {
            type_name: self.key.type_name(),
            name: self.key.name().map(str::to_string),
            lifetime: self.lifetime.kind(),
            mapped_to: policies.get::<MappedType>().map(|m| m.target.type_name()),
            has_factory: policies.contains::<ActivationFactory>(),
            implicit: self.implicit,
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("lifetime", &self.lifetime.kind())
            .field("implicit", &self.implicit)
            .finish()
    }
}

/// Serializable summary of a registration, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationInfo {
    pub type_name: &'static str,
    pub name: Option<String>,
    pub lifetime: Lifetime,
    pub mapped_to: Option<&'static str>,
    pub has_factory: bool,
    pub implicit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Shape: Send + Sync {
        fn sides(&self) -> u32;
    }

    struct Square;

    impl Shape for Square {
        fn sides(&self) -> u32 {
            4
        }
    }

    fn bare(key: DependencyKey) -> Arc<Registration> {
        Registration::new(
            key,
            PolicyMap::new(),
            Lifetime::Transient.manager(),
            StagedChain::root(),
            false,
        )
    }

    #[test]
    fn mapped_type_casts_to_trait_object() {
        let mapping = MappedType::new::<dyn Shape, Square>(|square| square);
        assert_eq!(mapping.target, TypeKey::of::<Square>());

        let mapped = mapping.cast(&Instance::new(Arc::new(Square))).unwrap();
        assert_eq!(mapped.downcast::<dyn Shape>().unwrap().sides(), 4);
        assert!(mapping.cast(&Instance::new(Arc::new(1u8))).is_none());
    }

    #[test]
    fn cast_keeps_identity() {
        let mapping = MappedType::new::<dyn Shape, Square>(|square| square);
        let square = Instance::new(Arc::new(Square));
        assert!(mapping.cast(&square).unwrap().ptr_eq(&square));
    }

    #[test]
    fn policies_are_keyed_by_type() {
        let registration = bare(DependencyKey::of::<Square>());
        assert!(registration.policy::<ConstructorOverride>().is_none());

        registration.set_policy(ConstructorOverride { name: "new" });
        assert_eq!(
            registration.policy::<ConstructorOverride>(),
            Some(ConstructorOverride { name: "new" })
        );
        assert!(!registration.has_policy::<Initializers>());
    }

    #[test]
    fn info_summarizes_policies() {
        let registration = bare(DependencyKey::named::<dyn Shape>("square"));
        registration.set_policy(MappedType::new::<dyn Shape, Square>(|square| square));

        let info = registration.info();
        assert_eq!(info.name.as_deref(), Some("square"));
        assert_eq!(info.lifetime, Lifetime::Transient);
        assert!(info.mapped_to.unwrap().contains("Square"));
        assert!(!info.has_factory);
    }

    #[test]
    fn handler_is_cached_per_pipeline_version() {
        let registration = bare(DependencyKey::of::<Square>());
        let first = registration.handler();
        assert!(Arc::ptr_eq(&first, &registration.handler()));

        registration.pipeline.add(
            Arc::new(|next: ResolveHandler| next),
            crate::pipeline::BuildStage::Setup,
        );
        assert!(!Arc::ptr_eq(&first, &registration.handler()));
    }
}
