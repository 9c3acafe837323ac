//! Type-erased resolved values.
//!
//! An [`Instance`] wraps an `Arc<T>` (with `T` possibly unsized, e.g.
//! `dyn Logger`) behind `dyn Any`. Identity is the address of the inner
//! `Arc<T>`, so two instances are "the same object" exactly when the
//! typed handles they yield are `Arc::ptr_eq`.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::key::TypeKey;

/// Boxed error returned by user code (factories, constructors, disposers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Releases resources held by a resolved value.
///
/// Values registered or built as disposable are disposed exactly once by
/// the lifetime store that owns them.
pub trait Dispose: Send + Sync {
    fn dispose(&self) -> Result<(), BoxError>;
}

/// A once-only disposal action for one value.
pub struct Disposer {
    type_name: &'static str,
    done: AtomicBool,
    action: Box<dyn Fn() -> Result<(), BoxError> + Send + Sync>,
}

impl Disposer {
    pub(crate) fn new(
        type_name: &'static str,
        action: impl Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            type_name,
            done: AtomicBool::new(false),
            action: Box::new(action),
        })
    }

    /// Runs the disposal action unless it already ran.
    pub fn dispose(&self) -> Result<(), BoxError> {
        if self.done.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        (self.action)()
    }

    pub fn is_disposed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("type_name", &self.type_name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A resolved value with its type and optional disposer.
#[derive(Clone)]
pub struct Instance {
    value: Arc<dyn Any + Send + Sync>,
    ty: TypeKey,
    addr: usize,
    downgrade: fn(&Instance) -> WeakInstance,
    disposer: Option<Arc<Disposer>>,
}

impl Instance {
    /// Wraps a shared value that the container must never dispose.
    pub fn new<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
        let addr = Arc::as_ptr(&value) as *const () as usize;
        Self {
            value: Arc::new(value),
            ty: TypeKey::of::<T>(),
            addr,
            downgrade: downgrade_arc::<T>,
            disposer: None,
        }
    }

    /// Wraps a value whose [`Dispose`] impl runs when its owner is disposed.
    pub fn disposable<T: ?Sized + Dispose + 'static>(value: Arc<T>) -> Self {
        let target = value.clone();
        let disposer = Disposer::new(std::any::type_name::<T>(), move || target.dispose());
        Self::new(value).with_disposer(Some(disposer))
    }

    pub(crate) fn with_disposer(mut self, disposer: Option<Arc<Disposer>>) -> Self {
        self.disposer = disposer;
        self
    }

    /// Returns the typed handle, or `None` if this is not an `Arc<T>`.
    pub fn downcast<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        self.value.downcast_ref::<Arc<T>>().cloned()
    }

    /// Returns `true` if this instance holds an `Arc<T>`.
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.value.is::<Arc<T>>()
    }

    /// Returns the type this instance was created as.
    pub fn ty(&self) -> TypeKey {
        self.ty
    }

    /// Returns `true` if both instances refer to the same object.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        self.addr == other.addr
    }

    pub fn disposer(&self) -> Option<&Arc<Disposer>> {
        self.disposer.as_ref()
    }

    /// Returns a non-owning observation of this instance.
    pub fn downgrade(&self) -> WeakInstance {
        (self.downgrade)(self)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.ty.type_name())
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("disposable", &self.disposer.is_some())
            .finish()
    }
}

fn downgrade_arc<T: ?Sized + Send + Sync + 'static>(instance: &Instance) -> WeakInstance {
    let weak: Option<Weak<T>> = instance.value.downcast_ref::<Arc<T>>().map(Arc::downgrade);
    WeakInstance {
        upgrade: Arc::new(move || weak.as_ref().and_then(Weak::upgrade).map(Instance::new)),
    }
}

/// Non-owning observation of an [`Instance`].
///
/// Upgrading fails once every strong handle to the value is dropped.
#[derive(Clone)]
pub struct WeakInstance {
    upgrade: Arc<dyn Fn() -> Option<Instance> + Send + Sync>,
}

impl WeakInstance {
    pub fn upgrade(&self) -> Option<Instance> {
        (self.upgrade)()
    }

    pub fn is_alive(&self) -> bool {
        self.upgrade().is_some()
    }
}

impl fmt::Debug for WeakInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakInstance")
            .field("alive", &self.is_alive())
            .finish()
    }
}
