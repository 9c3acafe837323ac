//! Lifetime store: what a container disposes when it goes away.
//!
//! Entries are disposed last-in first-out. Child containers are entries
//! too, so disposal walks the hierarchy depth-first. Every failure is
//! collected; one failing disposer never stops the rest.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::container::ContainerCore;
use crate::error::{DisposalError, DisposalFailure};
use crate::instance::{BoxError, Disposer};

enum Owned {
    Value(Arc<Disposer>),
    Cleanup {
        type_name: &'static str,
        action: Box<dyn FnOnce() -> Result<(), BoxError> + Send>,
    },
    Child(Weak<ContainerCore>),
}

/// Values and child containers owned by one container.
pub struct LifetimeStore {
    entries: Mutex<Vec<Owned>>,
    disposed: AtomicBool,
}

impl LifetimeStore {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Takes ownership of a value's disposer.
    ///
    /// A store that is already disposed runs the disposer immediately.
    pub fn own(&self, disposer: Arc<Disposer>) {
        if let Some(Owned::Value(disposer)) = self.push(Owned::Value(disposer)) {
            if let Err(error) = disposer.dispose() {
                warn!(type_name = disposer.type_name(), %error, "Late disposal failed");
            }
        }
    }

    /// Registers a cleanup action to run when the store is disposed.
    pub fn on_dispose(
        &self,
        type_name: &'static str,
        action: impl FnOnce() -> Result<(), BoxError> + Send + 'static,
    ) {
        let entry = Owned::Cleanup {
            type_name,
            action: Box::new(action),
        };
        if let Some(Owned::Cleanup { type_name, action }) = self.push(entry) {
            if let Err(error) = action() {
                warn!(type_name, %error, "Late cleanup failed");
            }
        }
    }

    pub(crate) fn adopt(&self, child: &Arc<ContainerCore>) {
        if let Some(Owned::Child(child)) = self.push(Owned::Child(Arc::downgrade(child))) {
            if let Some(child) = child.upgrade() {
                if let Err(error) = child.dispose() {
                    warn!(%error, "Child of a disposed container failed to dispose");
                }
            }
        }
    }

    /// Forgets a child that was disposed on its own.
    pub(crate) fn release_child(&self, child: &ContainerCore) {
        let target = child as *const ContainerCore;
        self.entries.lock().retain(|entry| match entry {
            Owned::Child(weak) => weak.strong_count() > 0 && Weak::as_ptr(weak) != target,
            _ => true,
        });
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Disposes every entry in reverse order of addition.
    ///
    /// Only the first call does any work.
    pub(crate) fn dispose(&self) -> Result<(), DisposalError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let entries = std::mem::take(&mut *self.entries.lock());
        debug!(entries = entries.len(), "Disposing lifetime store");

        let mut failures = Vec::new();
        for entry in entries.into_iter().rev() {
            match entry {
                Owned::Value(disposer) => {
                    if let Err(source) = disposer.dispose() {
                        failures.push(DisposalFailure {
                            type_name: disposer.type_name(),
                            source,
                        });
                    }
                }
                Owned::Cleanup { type_name, action } => {
                    if let Err(source) = action() {
                        failures.push(DisposalFailure { type_name, source });
                    }
                }
                Owned::Child(child) => {
                    if let Some(child) = child.upgrade() {
                        if let Err(error) = child.dispose() {
                            failures.extend(error.failures);
                        }
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DisposalError { failures })
        }
    }

    /// Adds an entry, or hands it back if the store is already disposed.
    fn push(&self, entry: Owned) -> Option<Owned> {
        let mut entries = self.entries.lock();
        if self.is_disposed() {
            return Some(entry);
        }
        entries.push(entry);
        None
    }
}

impl fmt::Debug for LifetimeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeStore")
            .field("entries", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
