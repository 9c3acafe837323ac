//! Error types for Sanad container operations.
//!
//! Registration problems surface synchronously as [`ConfigurationError`].
//! Problems during a resolve travel unwrapped through nested frames as
//! [`ResolutionError`] and are wrapped exactly once, at the outermost call,
//! into a [`ResolutionFailure`].

use std::fmt;

use sanad_support::rendering::{PathLine, render_path, render_path_vertical, shorten_type_name};

use crate::instance::BoxError;
use crate::key::DependencyKey;
use crate::lifetime::Lifetime;

/// Main error type for all Sanad operations.
#[derive(Debug, thiserror::Error)]
pub enum SanadError {
    /// A registration was rejected.
    #[error("{}", .0)]
    Configuration(#[from] ConfigurationError),

    /// A resolve failed; carries the requested key and the inner cause.
    #[error("{}", .0)]
    Resolution(#[from] ResolutionFailure),

    /// One or more owned values failed to dispose.
    #[error("{}", .0)]
    Disposal(#[from] DisposalError),

    /// The container was disposed.
    #[error("Container is disposed. Registering and resolving require a live container")]
    ContainerDisposed,
}

impl SanadError {
    /// Returns the inner resolution cause, if this is a resolution failure.
    pub fn resolution_cause(&self) -> Option<&ResolutionError> {
        match self {
            SanadError::Resolution(failure) => Some(&failure.cause),
            _ => None,
        }
    }
}

/// Invalid registration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// Both a type mapping and a custom factory were configured.
    #[error(
        "Conflicting activation for {key}: mapped to {mapped_to} and given a factory\n  Hint: Use either .map_to() or .factory(), not both"
    )]
    ConflictingActivation {
        key: DependencyKey,
        mapped_to: &'static str,
    },

    /// A registered instance does not hold the registered type.
    #[error("Instance registered as {key} holds a {actual}")]
    InstanceTypeMismatch {
        key: DependencyKey,
        actual: &'static str,
    },

    /// The lifetime can never hand back a registered instance.
    #[error(
        "Cannot register an instance of {key} with a {lifetime} lifetime\n  Hint: Use ContainerControlled, Hierarchical, PerThread or ExternallyControlled"
    )]
    IncompatibleLifetime { key: DependencyKey, lifetime: Lifetime },
}

/// One frame of a dependency path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub key: DependencyKey,
    /// Lifetime of the registration serving this frame, if one was found.
    pub lifetime: Option<Lifetime>,
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = shorten_type_name(self.key.type_name());
        match self.key.name() {
            Some(name) => write!(f, "{short}[{name:?}]"),
            None => f.write_str(&short),
        }
    }
}

fn render_steps(path: &[PathStep]) -> String {
    let labels: Vec<String> = path.iter().map(ToString::to_string).collect();
    render_path(&labels)
}

/// Error raised inside a resolve, before the outermost wrap.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// No registration and no constructible concrete type.
    #[error("{}", .0)]
    MissingDependency(MissingDependencyError),

    /// Two equally eligible constructors and nothing to break the tie.
    #[error("Ambiguous activation of {key}: {reason}\n  Candidates: {}\n  Hint: Mark one constructor or select it with InjectionMember::constructor()", .candidates.join(", "))]
    AmbiguousActivation {
        key: DependencyKey,
        candidates: Vec<&'static str>,
        reason: String,
        path: Vec<PathStep>,
    },

    /// The chosen constructor, factory or initializer failed.
    #[error("Failed to activate {key}: {source}")]
    Activation {
        key: DependencyKey,
        path: Vec<PathStep>,
        #[source]
        source: BoxError,
    },

    /// The dependency chain grew past the configured depth.
    #[error("Resolution depth limit ({limit}) exceeded: {}\n  Hint: Check for a dependency cycle", render_steps(.path))]
    DepthExceeded { limit: usize, path: Vec<PathStep> },

    /// A value of the wrong type reached a typed consumer.
    #[error("Type mismatch for {key}: expected {expected}, found {actual}")]
    TypeMismatch {
        key: DependencyKey,
        expected: &'static str,
        actual: &'static str,
        path: Vec<PathStep>,
    },
}

impl ResolutionError {
    /// Returns the dependency path at the point of failure.
    pub fn path(&self) -> &[PathStep] {
        match self {
            ResolutionError::MissingDependency(e) => &e.path,
            ResolutionError::AmbiguousActivation { path, .. }
            | ResolutionError::Activation { path, .. }
            | ResolutionError::DepthExceeded { path, .. }
            | ResolutionError::TypeMismatch { path, .. } => path,
        }
    }

    /// Wraps a user error as an activation failure.
    ///
    /// A [`ResolutionError`] that travelled through user code as a
    /// [`BoxError`] comes back out unwrapped.
    pub(crate) fn from_user(error: BoxError, key: &DependencyKey, path: Vec<PathStep>) -> Self {
        match error.downcast::<ResolutionError>() {
            Ok(inner) => *inner,
            Err(source) => ResolutionError::Activation {
                key: key.clone(),
                path,
                source,
            },
        }
    }
}

/// A dependency was not registered and cannot be built implicitly.
#[derive(Debug)]
pub struct MissingDependencyError {
    /// The dependency that was requested
    pub requested: DependencyKey,
    /// What required this dependency (if known)
    pub required_by: Option<DependencyKey>,
    /// Similar types that are registered
    pub suggestions: Vec<String>,
    pub path: Vec<PathStep>,
}

impl fmt::Display for MissingDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dependency not registered: {}", self.requested)?;

        if let Some(ref parent) = self.required_by {
            write!(f, "\n  Required by: {parent}")?;
        }

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }

        write!(
            f,
            "\n  Hint: Register {} or add its metadata with .add_type()",
            shorten_type_name(self.requested.type_name())
        )
    }
}

/// The single failure surfaced by an outermost resolve.
#[derive(Debug, thiserror::Error)]
#[error("Failed to resolve {requested}\n  Path: {}\n  Cause: {cause}", render_steps(.path))]
pub struct ResolutionFailure {
    /// The originally requested key
    pub requested: DependencyKey,
    /// Partial dependency path at the failure point
    pub path: Vec<PathStep>,
    #[source]
    pub cause: ResolutionError,
}

impl ResolutionFailure {
    pub(crate) fn new(requested: DependencyKey, cause: ResolutionError) -> Self {
        Self {
            requested,
            path: cause.path().to_vec(),
            cause,
        }
    }

    /// Renders the failing path top-down with lifetimes.
    pub fn explain(&self) -> String {
        let lines: Vec<PathLine> = self
            .path
            .iter()
            .map(|step| PathLine {
                type_name: shorten_type_name(step.key.type_name()),
                lifetime: step
                    .lifetime
                    .map_or_else(|| "unregistered".to_string(), |l| l.to_string()),
                name: step.key.name().map(str::to_string),
            })
            .collect();
        render_path_vertical(&lines)
    }
}

/// A disposer that failed.
#[derive(Debug)]
pub struct DisposalFailure {
    pub type_name: &'static str,
    pub source: BoxError,
}

/// Every disposal failure collected while disposing one container.
#[derive(Debug, thiserror::Error)]
#[error("{} disposal(s) failed: {}", .failures.len(), render_failures(.failures))]
pub struct DisposalError {
    pub failures: Vec<DisposalFailure>,
}

fn render_failures(failures: &[DisposalFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.type_name, f.source))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenient Result type for Sanad operations.
pub type Result<T> = std::result::Result<T, SanadError>;
