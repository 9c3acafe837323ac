//! Core engine for Sanad: a hierarchical dependency-resolution container.
//!
//! Registrations live in a two-level registry, values are built by staged
//! pipelines, and lifetime managers decide when a built value is reused.

mod aspects;
pub mod container;
pub mod context;
pub mod error;
pub mod extension;
pub mod instance;
pub mod key;
pub mod lifetime;
pub mod metadata;
pub mod options;
pub mod pipeline;
pub mod registration;
pub mod registry;
pub mod selection;
pub mod store;

pub use container::{Container, ContainerBuilder, prelude};
pub use error::{Result, SanadError};
pub use key::DependencyKey;
pub use lifetime::Lifetime;
