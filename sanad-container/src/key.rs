//! Dependency identification keys.
//!
//! A [`DependencyKey`] identifies a registration: a Rust type
//! ([`TypeKey`]) plus an optional name. The empty name and the absent
//! name are the same "default" registration.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identifies a Rust type, sized or not.
///
/// # Examples
/// ```
/// use sanad_container::key::TypeKey;
///
/// trait Logger {}
/// let key = TypeKey::of::<dyn Logger>();
/// assert!(key.type_name().contains("Logger"));
/// ```
#[derive(Clone, Copy)]
pub struct TypeKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl TypeKey {
    /// Creates a key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Returns the [`TypeId`] of this type.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the human-readable type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.type_name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Normalizes a registration name: `""` and `None` both mean "default".
pub fn normalize_name(name: Option<&str>) -> Option<Arc<str>> {
    name.filter(|n| !n.is_empty()).map(Arc::from)
}

/// Uniquely identifies a registration within one container's registry.
///
/// # Examples
/// ```
/// use sanad_container::key::DependencyKey;
///
/// let key = DependencyKey::of::<String>();
/// assert_eq!(key.name(), None);
///
/// let primary = DependencyKey::named::<String>("primary_db");
/// assert_eq!(primary.name(), Some("primary_db"));
///
/// // The empty name is the default registration.
/// assert_eq!(DependencyKey::named::<String>(""), key);
/// ```
#[derive(Clone)]
pub struct DependencyKey {
    ty: TypeKey,
    name: Option<Arc<str>>,
}

impl DependencyKey {
    /// Creates a key for the default registration of `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            ty: TypeKey::of::<T>(),
            name: None,
        }
    }

    /// Creates a named key for type `T`.
    pub fn named<T: ?Sized + 'static>(name: &str) -> Self {
        Self::new(TypeKey::of::<T>(), Some(name))
    }

    /// Creates a key from a [`TypeKey`] and an optional name.
    pub fn new(ty: TypeKey, name: Option<&str>) -> Self {
        Self {
            ty,
            name: normalize_name(name),
        }
    }

    pub(crate) fn from_parts(ty: TypeKey, name: Option<Arc<str>>) -> Self {
        Self { ty, name }
    }

    /// Returns the type part of this key.
    #[inline]
    pub fn ty(&self) -> TypeKey {
        self.ty
    }

    /// Returns the [`TypeId`] of this dependency.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.ty.type_id
    }

    /// Returns the human-readable type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.ty.type_name
    }

    /// Returns the registration name, `None` for the default registration.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn name_arc(&self) -> Option<&Arc<str>> {
        self.name.as_ref()
    }

    /// Returns the same name under another type.
    pub fn with_type(&self, ty: TypeKey) -> Self {
        Self {
            ty,
            name: self.name.clone(),
        }
    }
}

impl PartialEq for DependencyKey {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.name == other.name
    }
}

impl Eq for DependencyKey {}

impl Hash for DependencyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ty.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "DependencyKey({}, name={:?})", self.type_name(), name),
            None => write!(f, "DependencyKey({})", self.type_name()),
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (name={:?})", self.type_name(), name),
            None => write!(f, "{}", self.type_name()),
        }
    }
}
