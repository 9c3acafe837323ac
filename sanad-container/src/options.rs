//! Container configuration.

use serde::Serialize;

/// Depth at which a resolve is reported as a likely cycle.
pub const DEFAULT_MAX_RESOLVE_DEPTH: usize = 100;

/// Settings shared by a root container and all of its descendants.
///
/// # Examples
/// ```
/// use sanad_container::options::ContainerOptions;
///
/// let options = ContainerOptions::default().max_resolve_depth(32);
/// assert_eq!(options.max_resolve_depth, 32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerOptions {
    /// Nested resolves allowed below one outermost call.
    pub max_resolve_depth: usize,
}

impl ContainerOptions {
    pub fn max_resolve_depth(mut self, depth: usize) -> Self {
        self.max_resolve_depth = depth.max(1);
        self
    }
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            max_resolve_depth: DEFAULT_MAX_RESOLVE_DEPTH,
        }
    }
}
