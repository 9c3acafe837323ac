//! # Sanad
//!
//! An in-process dependency-resolution engine: registrations keyed by type
//! and name, values built through staged pipelines, six lifetimes, and a
//! parent/child container hierarchy with cascading disposal.
//!
//! ```rust
//! use sanad::prelude::*;
//! use std::sync::Arc;
//!
//! struct Clock;
//!
//! let container = Container::new();
//! container
//!     .register::<Clock>()
//!     .factory(|_| Ok(Arc::new(Clock)))
//!     .lifetime(Lifetime::ContainerControlled)
//!     .commit()
//!     .unwrap();
//!
//! let child = container.create_child();
//! let a = container.resolve::<Clock>().unwrap();
//! let b = child.resolve::<Clock>().unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```

pub use sanad_container::*;
pub use sanad_support::*;
