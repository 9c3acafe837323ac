//! Extension trait: a module of pipeline aspects and registrations.
//!
//! Extensions are the only way to change how a container builds things.
//! They add factories to the container's staged chains and may register
//! whatever those factories rely on.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use sanad_container::prelude::*;
//!
//! /// Logs every build at the outermost stage.
//! struct Audit;
//!
//! impl Extension for Audit {
//!     fn initialize(&self, context: &ExtensionContext<'_>) -> Result<()> {
//!         context.resolution().add(
//!             Arc::new(|next: ResolveHandler| -> ResolveHandler {
//!                 Arc::new(move |ctx: &mut BuildContext<'_>| {
//!                     tracing::info!(key = %ctx.key(), "audit");
//!                     next(ctx)
//!                 })
//!             }),
//!             BuildStage::Setup,
//!         );
//!         Ok(())
//!     }
//! }
//!
//! let container = Container::builder().extension(Audit).build().unwrap();
//! assert_eq!(container.pipelines().resolution().describe()[0], (BuildStage::Setup, 2));
//! ```

use std::sync::Arc;

use crate::container::Container;
use crate::error::Result;
use crate::pipeline::{
    Pipelines, RegistrationConcern, ResolutionConcern, SelectionConcern, StagedChain,
};

/// A unit of pipeline configuration applied to one container.
pub trait Extension: Send + Sync {
    /// Adds factories and registrations to the container in `context`.
    ///
    /// Call before the first resolve on that container.
    fn initialize(&self, context: &ExtensionContext<'_>) -> Result<()>;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// What an extension can reach.
pub struct ExtensionContext<'a> {
    container: &'a Container,
}

impl<'a> ExtensionContext<'a> {
    pub(crate) fn new(container: &'a Container) -> Self {
        Self { container }
    }

    pub fn container(&self) -> &'a Container {
        self.container
    }

    pub fn pipelines(&self) -> &'a Pipelines {
        self.container.pipelines()
    }

    pub fn registration(&self) -> &'a Arc<StagedChain<RegistrationConcern>> {
        self.pipelines().registration()
    }

    pub fn selection(&self) -> &'a Arc<StagedChain<SelectionConcern>> {
        self.pipelines().selection()
    }

    pub fn resolution(&self) -> &'a Arc<StagedChain<ResolutionConcern>> {
        self.pipelines().resolution()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::Lifetime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Settings {
        port: u16,
    }

    struct SettingsModule;

    impl Extension for SettingsModule {
        fn initialize(&self, context: &ExtensionContext<'_>) -> Result<()> {
            context
                .container()
                .register::<Settings>()
                .factory(|_| Ok(Arc::new(Settings { port: 8080 })))
                .lifetime(Lifetime::ContainerControlled)
                .commit()
        }
    }

    #[test]
    fn extension_registers_into_container() {
        let container = Container::new();
        container.add_extension(&SettingsModule).unwrap();
        assert_eq!(container.resolve::<Settings>().unwrap().port, 8080);
    }

    #[test]
    fn extension_has_name() {
        assert!(SettingsModule.name().contains("SettingsModule"));
    }

    struct Counting(Arc<AtomicUsize>);

    impl Extension for Counting {
        fn initialize(&self, context: &ExtensionContext<'_>) -> Result<()> {
            let builds = self.0.clone();
            context.resolution().add(
                Arc::new(move |next: crate::context::ResolveHandler| -> crate::context::ResolveHandler {
                    let builds = builds.clone();
                    Arc::new(move |ctx: &mut crate::context::BuildContext<'_>| {
                        builds.fetch_add(1, Ordering::SeqCst);
                        next(ctx)
                    })
                }),
                crate::pipeline::BuildStage::PostInitialization,
            );
            Ok(())
        }
    }

    #[test]
    fn child_extension_does_not_reach_parent() {
        let builds = Arc::new(AtomicUsize::new(0));
        let parent = Container::new();
        parent
            .register::<u32>()
            .factory(|_| Ok(Arc::new(7)))
            .commit()
            .unwrap();

        let child = parent.create_child();
        child.add_extension(&Counting(builds.clone())).unwrap();

        parent.resolve::<u32>().unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        // The registration lives in the parent, so it runs the parent's chain.
        child.resolve::<u32>().unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        child.register::<u32>().factory(|_| Ok(Arc::new(8))).commit().unwrap();
        assert_eq!(*child.resolve::<u32>().unwrap(), 8);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}
