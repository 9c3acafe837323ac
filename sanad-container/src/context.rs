//! Resolution context.
//!
//! Every resolve pushes a [`ResolutionFrame`] that borrows its caller's
//! frame, so the chain lives on the stack and never outlives the call that
//! created it. Walking the chain gives the dependency path reported on
//! failure.
//!
//! ```text
//! resolve(UserService)            frame 0
//!   └─ resolve(dyn Repository)    frame 1, parent = 0
//!        └─ resolve(Database)     frame 2, parent = 1
//! ```

use std::fmt;
use std::sync::Arc;

use crate::container::ContainerCore;
use crate::error::{PathStep, ResolutionError};
use crate::instance::Instance;
use crate::key::DependencyKey;
use crate::lifetime::{LifetimeScope, PerResolveCache};
use crate::registration::Registration;

/// A composed resolution handler. Leaves the built value in
/// [`BuildContext::existing`].
pub type ResolveHandler =
    Arc<dyn for<'a> Fn(&mut BuildContext<'a>) -> Result<(), ResolutionError> + Send + Sync>;

/// One request in the chain of nested resolves.
pub struct ResolutionFrame<'a> {
    key: DependencyKey,
    registration: Arc<Registration>,
    parent: Option<&'a ResolutionFrame<'a>>,
    depth: usize,
}

impl<'a> ResolutionFrame<'a> {
    pub(crate) fn new(
        key: DependencyKey,
        registration: Arc<Registration>,
        parent: Option<&'a ResolutionFrame<'a>>,
    ) -> Self {
        let depth = parent.map_or(0, |p| p.depth + 1);
        Self {
            key,
            registration,
            parent,
            depth,
        }
    }

    pub fn key(&self) -> &DependencyKey {
        &self.key
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    pub fn parent(&self) -> Option<&'a ResolutionFrame<'a>> {
        self.parent
    }

    /// 0 for the outermost request.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Path from the outermost request down to this frame.
    pub fn path(&self) -> Vec<PathStep> {
        let mut path = Vec::with_capacity(self.depth + 1);
        let mut frame = Some(self);
        while let Some(f) = frame {
            path.push(PathStep {
                key: f.key.clone(),
                lifetime: Some(f.registration.lifetime().kind()),
            });
            frame = f.parent;
        }
        path.reverse();
        path
    }
}

impl fmt::Debug for ResolutionFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionFrame")
            .field("key", &self.key)
            .field("depth", &self.depth)
            .finish()
    }
}

/// Substitutes a value for part of one resolve call.
#[derive(Debug, Clone)]
pub enum ResolverOverride {
    /// Every request for `key` within the call gets `value`.
    Dependency { key: DependencyKey, value: Instance },
    /// Every constructor parameter called `name` gets `value`.
    Parameter { name: String, value: Instance },
}

impl ResolverOverride {
    /// Overrides the default registration of `T`.
    pub fn dependency<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self::Dependency {
            key: DependencyKey::of::<T>(),
            value: Instance::new(value),
        }
    }

    /// Overrides the registration of `T` called `name`.
    pub fn dependency_named<T: ?Sized + Send + Sync + 'static>(name: &str, value: Arc<T>) -> Self {
        Self::Dependency {
            key: DependencyKey::named::<T>(name),
            value: Instance::new(value),
        }
    }

    /// Overrides constructor parameters called `name`.
    pub fn parameter<T: ?Sized + Send + Sync + 'static>(name: &str, value: Arc<T>) -> Self {
        Self::Parameter {
            name: name.to_string(),
            value: Instance::new(value),
        }
    }
}

/// State shared by every frame of one outermost resolve.
pub(crate) struct ResolveCall {
    overrides: Vec<ResolverOverride>,
    per_resolve: PerResolveCache,
    max_depth: usize,
}

impl ResolveCall {
    pub(crate) fn new(overrides: Vec<ResolverOverride>, max_depth: usize) -> Self {
        Self {
            overrides,
            per_resolve: PerResolveCache::default(),
            max_depth,
        }
    }

    pub(crate) fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub(crate) fn per_resolve(&self) -> &PerResolveCache {
        &self.per_resolve
    }

    pub(crate) fn dependency_override(&self, key: &DependencyKey) -> Option<Instance> {
        self.overrides.iter().find_map(|o| match o {
            ResolverOverride::Dependency { key: k, value } if k == key => Some(value.clone()),
            _ => None,
        })
    }

    pub(crate) fn parameter_override(&self, name: &str) -> Option<Instance> {
        self.overrides.iter().find_map(|o| match o {
            ResolverOverride::Parameter { name: n, value } if n == name => Some(value.clone()),
            _ => None,
        })
    }
}

/// What a resolution handler works on.
///
/// Handlers read the request from the current frame, resolve nested
/// dependencies through [`resolve`](Self::resolve), and leave the built
/// value in [`existing`](Self::existing).
pub struct BuildContext<'a> {
    container: &'a Arc<ContainerCore>,
    call: &'a ResolveCall,
    frame: &'a ResolutionFrame<'a>,
    existing: Option<Instance>,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(
        container: &'a Arc<ContainerCore>,
        call: &'a ResolveCall,
        frame: &'a ResolutionFrame<'a>,
    ) -> Self {
        Self {
            container,
            call,
            frame,
            existing: None,
        }
    }

    /// The key being built.
    pub fn key(&self) -> &DependencyKey {
        &self.frame.key
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.frame.registration
    }

    pub fn frame(&self) -> &'a ResolutionFrame<'a> {
        self.frame
    }

    /// The value built or found so far, if any.
    pub fn existing(&self) -> Option<&Instance> {
        self.existing.as_ref()
    }

    pub fn set_existing(&mut self, value: Instance) {
        self.existing = Some(value);
    }

    pub(crate) fn take_existing(&mut self) -> Option<Instance> {
        self.existing.take()
    }

    /// Dependency path down to this frame.
    pub fn path(&self) -> Vec<PathStep> {
        self.frame.path()
    }

    /// Resolves a nested dependency within the same call.
    pub fn resolve_key(&self, key: &DependencyKey) -> Result<Instance, ResolutionError> {
        self.container.resolve_in(self.call, key, Some(self.frame))
    }

    /// Resolves the default registration of `T` within the same call.
    pub fn resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolutionError> {
        self.resolve_typed(&DependencyKey::of::<T>())
    }

    /// Resolves the registration of `T` called `name` within the same call.
    pub fn resolve_named<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<T>, ResolutionError> {
        self.resolve_typed(&DependencyKey::named::<T>(name))
    }

    /// Parameter override for `name` in this call, if any.
    pub fn parameter_override(&self, name: &str) -> Option<Instance> {
        self.call.parameter_override(name)
    }

    /// What lifetime managers see of this resolve.
    pub fn lifetime_scope(&self) -> LifetimeScope<'a> {
        LifetimeScope::new(self.container, Some(self.call.per_resolve()))
    }

    pub(crate) fn container(&self) -> &'a Arc<ContainerCore> {
        self.container
    }

    fn resolve_typed<T: ?Sized + Send + Sync + 'static>(
        &self,
        key: &DependencyKey,
    ) -> Result<Arc<T>, ResolutionError> {
        let value = self.resolve_key(key)?;
        value
            .downcast::<T>()
            .ok_or_else(|| ResolutionError::TypeMismatch {
                key: key.clone(),
                expected: std::any::type_name::<T>(),
                actual: value.ty().type_name(),
                path: self.path(),
            })
    }
}

impl fmt::Debug for BuildContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("frame", self.frame)
            .field("has_value", &self.existing.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::Lifetime;
    use crate::pipeline::StagedChain;
    use crate::registration::PolicyMap;

    fn registration<T: 'static>(lifetime: Lifetime) -> Arc<Registration> {
        Registration::new(
            DependencyKey::of::<T>(),
            PolicyMap::new(),
            lifetime.manager(),
            StagedChain::root(),
            false,
        )
    }

    #[test]
    fn frames_build_path_top_down() {
        let root = ResolutionFrame::new(
            DependencyKey::of::<String>(),
            registration::<String>(Lifetime::Transient),
            None,
        );
        let child = ResolutionFrame::new(
            DependencyKey::of::<u32>(),
            registration::<u32>(Lifetime::ContainerControlled),
            Some(&root),
        );

        assert_eq!(child.depth(), 1);
        let path = child.path();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].key, DependencyKey::of::<String>());
        assert_eq!(path[1].lifetime, Some(Lifetime::ContainerControlled));
    }

    #[test]
    fn overrides_match_by_key_and_name() {
        let call = ResolveCall::new(
            vec![
                ResolverOverride::dependency_named::<u8>("port", Arc::new(8)),
                ResolverOverride::parameter::<String>("greeting", Arc::new("hi".into())),
            ],
            10,
        );

        assert!(call.dependency_override(&DependencyKey::named::<u8>("port")).is_some());
        assert!(call.dependency_override(&DependencyKey::of::<u8>()).is_none());
        assert!(call.parameter_override("greeting").unwrap().is::<String>());
        assert!(call.parameter_override("farewell").is_none());
    }
}
