//! Constructor metadata.
//!
//! Rust has no runtime reflection, so concrete types describe how they are
//! built by implementing [`Injectable`]: a list of constructors, each with
//! its parameters and an invoke function. The container keeps one
//! [`TypeCatalog`] per hierarchy, and the creation stage selects among the
//! catalogued constructors.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use sanad_container::metadata::{Constructor, Injectable, TypeMetadata};
//!
//! trait Logger: Send + Sync {}
//!
//! struct UserService {
//!     logger: Arc<dyn Logger>,
//!     retries: Option<Arc<u32>>,
//! }
//!
//! impl Injectable for UserService {
//!     fn metadata() -> TypeMetadata<Self> {
//!         TypeMetadata::new().constructor(
//!             Constructor::new("new", |args| {
//!                 Ok(UserService {
//!                     logger: args.get(0)?,
//!                     retries: args.optional(1)?,
//!                 })
//!             })
//!             .param::<dyn Logger>("logger")
//!             .optional::<u32>("retries"),
//!         )
//!     }
//! }
//! ```

use std::any::{TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::context::ResolutionFrame;
use crate::error::ResolutionError;
use crate::instance::{BoxError, Dispose, Disposer, Instance};
use crate::key::{DependencyKey, TypeKey};

/// A concrete type the container can build without a registration.
pub trait Injectable: Sized + Send + Sync + 'static {
    fn metadata() -> TypeMetadata<Self>;
}

/// One constructor parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Name used by parameter overrides.
    pub name: &'static str,
    /// The dependency resolved for this parameter.
    pub key: DependencyKey,
    /// Receives `None` instead of failing when the dependency is missing.
    pub optional: bool,
}

type TypedInvoke<T> = Arc<dyn Fn(&Args<'_>) -> Result<T, BoxError> + Send + Sync>;
type ErasedInvoke = Arc<dyn Fn(&Args<'_>) -> Result<Instance, BoxError> + Send + Sync>;

/// A typed constructor description.
pub struct Constructor<T> {
    name: &'static str,
    parameters: Vec<Parameter>,
    marked: bool,
    invoke: TypedInvoke<T>,
}

impl<T: Send + Sync + 'static> Constructor<T> {
    /// Describes a constructor. Add parameters in call order.
    pub fn new(
        name: &'static str,
        invoke: impl Fn(&Args<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            parameters: Vec::new(),
            marked: false,
            invoke: Arc::new(invoke),
        }
    }

    /// Adds a required parameter resolved by type.
    pub fn param<P: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.push(name, DependencyKey::of::<P>(), false)
    }

    /// Adds a required parameter resolved by type and registration name.
    pub fn param_named<P: ?Sized + 'static>(self, name: &'static str, registration: &str) -> Self {
        self.push(name, DependencyKey::named::<P>(registration), false)
    }

    /// Adds a parameter that is `None` when its dependency is missing.
    pub fn optional<P: ?Sized + 'static>(self, name: &'static str) -> Self {
        self.push(name, DependencyKey::of::<P>(), true)
    }

    /// Marks this constructor as the preferred one.
    pub fn marked(mut self) -> Self {
        self.marked = true;
        self
    }

    fn push(mut self, name: &'static str, key: DependencyKey, optional: bool) -> Self {
        self.parameters.push(Parameter { name, key, optional });
        self
    }
}

/// Everything the container knows about building `T`.
pub struct TypeMetadata<T> {
    constructors: Vec<Constructor<T>>,
    disposer: Option<fn(&T) -> Result<(), BoxError>>,
}

impl<T: Send + Sync + 'static> TypeMetadata<T> {
    pub fn new() -> Self {
        Self {
            constructors: Vec::new(),
            disposer: None,
        }
    }

    pub fn constructor(mut self, constructor: Constructor<T>) -> Self {
        self.constructors.push(constructor);
        self
    }

    fn into_descriptor(self) -> TypeDescriptor {
        let disposer = self.disposer;
        let constructors = self
            .constructors
            .into_iter()
            .map(|c| {
                let invoke = c.invoke;
                let erased: ErasedInvoke = Arc::new(move |args: &Args<'_>| {
                    let value = Arc::new(invoke(args)?);
                    let instance_disposer = disposer.map(|dispose| {
                        let target = value.clone();
                        Disposer::new(type_name::<T>(), move || dispose(&target))
                    });
                    Ok(Instance::new(value).with_disposer(instance_disposer))
                });
                Arc::new(ConstructorInfo {
                    name: c.name,
                    parameters: c.parameters,
                    marked: c.marked,
                    invoke: erased,
                })
            })
            .collect();

        TypeDescriptor {
            ty: TypeKey::of::<T>(),
            constructors,
        }
    }
}

impl<T: Dispose + 'static> TypeMetadata<T> {
    /// Built values are disposed by their owning container.
    pub fn disposable(mut self) -> Self {
        self.disposer = Some(<T as Dispose>::dispose);
        self
    }
}

impl<T: Send + Sync + 'static> Default for TypeMetadata<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A type-erased constructor.
pub struct ConstructorInfo {
    pub name: &'static str,
    pub parameters: Vec<Parameter>,
    pub marked: bool,
    invoke: ErasedInvoke,
}

impl ConstructorInfo {
    pub(crate) fn invoke(&self, args: &Args<'_>) -> Result<Instance, BoxError> {
        (self.invoke)(args)
    }
}

impl fmt::Debug for ConstructorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorInfo")
            .field("name", &self.name)
            .field("parameters", &self.parameters.len())
            .field("marked", &self.marked)
            .finish()
    }
}

/// A type-erased [`TypeMetadata`].
#[derive(Debug)]
pub struct TypeDescriptor {
    pub ty: TypeKey,
    pub constructors: Vec<Arc<ConstructorInfo>>,
}

/// Resolved constructor arguments, in parameter order.
pub struct Args<'a> {
    values: Vec<Option<Instance>>,
    frame: &'a ResolutionFrame<'a>,
}

impl<'a> Args<'a> {
    pub(crate) fn new(values: Vec<Option<Instance>>, frame: &'a ResolutionFrame<'a>) -> Self {
        Self { values, frame }
    }

    /// Returns argument `index` as `Arc<P>`.
    pub fn get<P: ?Sized + 'static>(&self, index: usize) -> Result<Arc<P>, ResolutionError> {
        self.optional(index)?
            .ok_or_else(|| self.mismatch::<P>("nothing"))
    }

    /// Returns argument `index`, `None` if an optional dependency was
    /// missing.
    pub fn optional<P: ?Sized + 'static>(&self, index: usize) -> Result<Option<Arc<P>>, ResolutionError> {
        match self.values.get(index) {
            None => Err(self.mismatch::<P>("no argument")),
            Some(None) => Ok(None),
            Some(Some(value)) => value
                .downcast::<P>()
                .map(Some)
                .ok_or_else(|| self.mismatch::<P>(value.ty().type_name())),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn mismatch<P: ?Sized + 'static>(&self, actual: &'static str) -> ResolutionError {
        ResolutionError::TypeMismatch {
            key: self.frame.key().clone(),
            expected: type_name::<P>(),
            actual,
            path: self.frame.path(),
        }
    }
}

/// Constructor metadata shared by a container hierarchy.
#[derive(Default)]
pub struct TypeCatalog {
    types: DashMap<TypeId, Arc<TypeDescriptor>>,
}

impl TypeCatalog {
    /// Adds `T`'s metadata, replacing any earlier entry.
    pub fn add<T: Injectable>(&self) {
        let descriptor = T::metadata().into_descriptor();
        self.types.insert(TypeId::of::<T>(), Arc::new(descriptor));
    }

    pub fn get(&self, type_id: TypeId) -> Option<Arc<TypeDescriptor>> {
        self.types.get(&type_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.types.contains_key(&type_id)
    }

    /// Names of every catalogued type.
    pub fn type_names(&self) -> Vec<&'static str> {
        self.types.iter().map(|entry| entry.value().ty.type_name()).collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Debug for TypeCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeCatalog").field("types", &self.len()).finish()
    }
}
