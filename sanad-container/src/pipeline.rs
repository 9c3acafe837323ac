//! Staged pipeline builder.
//!
//! A [`StagedChain`] holds ordered lists of decorator factories, one list
//! per stage. Each factory has the shape `(next) -> handler`; composing
//! the chain folds the stages from the innermost (last) to the outermost
//! (first) into a single handler that is cached until the chain, or one
//! of its ancestors, changes.
//!
//! ```text
//!   Setup ─► Lifetime ─► TypeMapping ─► Creation ─► Initialization ─► PostInitialization ─► terminal
//! ```
//!
//! Child chains read their parent's factories live: a change in the
//! parent bumps the version of every descendant and drops their cached
//! handler, which is rebuilt on next use.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::context::{BuildContext, ResolveHandler};
use crate::registration::{RegistrationHandler, RegistrationSetup};
use crate::selection::{SelectionHandler, SelectionRequest};

/// Ordered stages of one concern, outermost first.
pub trait Stage: Copy + Eq + Ord + fmt::Debug + Send + Sync + 'static {
    const ALL: &'static [Self];
}

/// A family of handlers composed by one [`StagedChain`].
pub trait Concern: Send + Sync + 'static {
    type Stage: Stage;
    type Handler: Clone + Send + Sync + 'static;

    /// Human-readable name, used in logs.
    const NAME: &'static str;

    /// The innermost handler every composition ends with.
    fn terminal() -> Self::Handler;
}

/// A decorator factory: receives the already composed `next` handler and
/// returns the handler for its own position.
pub type PipelineFactory<C> =
    Arc<dyn Fn(<C as Concern>::Handler) -> <C as Concern>::Handler + Send + Sync>;

/// Stages of the registration and resolution pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum BuildStage {
    Setup,
    Lifetime,
    TypeMapping,
    Creation,
    Initialization,
    PostInitialization,
}

impl Stage for BuildStage {
    const ALL: &'static [Self] = &[
        BuildStage::Setup,
        BuildStage::Lifetime,
        BuildStage::TypeMapping,
        BuildStage::Creation,
        BuildStage::Initialization,
        BuildStage::PostInitialization,
    ];
}

/// Stages of constructor selection, highest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SelectionStage {
    Explicit,
    Marked,
    Heuristic,
}

impl Stage for SelectionStage {
    const ALL: &'static [Self] = &[
        SelectionStage::Explicit,
        SelectionStage::Marked,
        SelectionStage::Heuristic,
    ];
}

/// Registration setup concern.
pub struct RegistrationConcern;

impl Concern for RegistrationConcern {
    type Stage = BuildStage;
    type Handler = RegistrationHandler;
    const NAME: &'static str = "registration";

    fn terminal() -> Self::Handler {
        Arc::new(|_: &mut RegistrationSetup| Ok(()))
    }
}

/// Constructor selection concern.
pub struct SelectionConcern;

impl Concern for SelectionConcern {
    type Stage = SelectionStage;
    type Handler = SelectionHandler;
    const NAME: &'static str = "selection";

    fn terminal() -> Self::Handler {
        Arc::new(|_: &SelectionRequest<'_>| Ok(None))
    }
}

/// Resolution concern.
pub struct ResolutionConcern;

impl Concern for ResolutionConcern {
    type Stage = BuildStage;
    type Handler = ResolveHandler;
    const NAME: &'static str = "resolution";

    fn terminal() -> Self::Handler {
        Arc::new(|_: &mut BuildContext<'_>| Ok(()))
    }
}

struct ChainState<C: Concern> {
    factories: Vec<(C::Stage, PipelineFactory<C>)>,
    composed: Option<C::Handler>,
}

/// One concern's factory lists plus the cached composition.
pub struct StagedChain<C: Concern> {
    parent: Option<Arc<StagedChain<C>>>,
    state: Mutex<ChainState<C>>,
    children: Mutex<Vec<Weak<StagedChain<C>>>>,
    version: AtomicU64,
}

impl<C: Concern> StagedChain<C> {
    /// Creates a chain with no parent and no factories.
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            state: Mutex::new(ChainState {
                factories: Vec::new(),
                composed: None,
            }),
            children: Mutex::new(Vec::new()),
            version: AtomicU64::new(0),
        })
    }

    /// Creates a chain linked to `parent`.
    pub fn child(parent: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(Self {
            parent: Some(parent.clone()),
            state: Mutex::new(ChainState {
                factories: Vec::new(),
                composed: None,
            }),
            children: Mutex::new(Vec::new()),
            version: AtomicU64::new(0),
        });
        let mut children = parent.children.lock();
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child));
        child
    }

    /// Adds a factory at the end of `stage`'s list.
    pub fn add(&self, factory: PipelineFactory<C>, stage: C::Stage) {
        {
            let mut state = self.state.lock();
            state.factories.push((stage, factory));
            self.bump(&mut state);
        }
        debug!(concern = C::NAME, stage = ?stage, "Pipeline factory added");
        self.invalidate_children();
    }

    /// Removes a previously added factory. Returns `false` if it is not
    /// part of this chain's own lists.
    pub fn remove(&self, factory: &PipelineFactory<C>) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let target = Arc::as_ptr(factory) as *const ();
            match state
                .factories
                .iter()
                .position(|(_, f)| Arc::as_ptr(f) as *const () == target)
            {
                Some(index) => {
                    state.factories.remove(index);
                    self.bump(&mut state);
                    true
                }
                None => false,
            }
        };
        if removed {
            debug!(concern = C::NAME, "Pipeline factory removed");
            self.invalidate_children();
        }
        removed
    }

    /// Current version; changes whenever this chain or an ancestor changes.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Composes the effective factories, or `None` if there are none.
    pub fn build_pipeline(&self) -> Option<C::Handler> {
        let factories = self.effective_factories();
        if factories.is_empty() {
            return None;
        }

        let mut handler = C::terminal();
        for stage in C::Stage::ALL.iter().rev() {
            for (_, factory) in factories.iter().rev().filter(|(s, _)| s == stage) {
                handler = factory(handler);
            }
        }
        Some(handler)
    }

    /// Returns the cached composed handler, rebuilding it if invalidated.
    pub fn pipeline(&self) -> C::Handler {
        let version = {
            let state = self.state.lock();
            if let Some(handler) = state.composed.clone() {
                return handler;
            }
            self.version()
        };
        let handler = self.build_pipeline().unwrap_or_else(C::terminal);

        // Only cache a composition nobody invalidated while it was built.
        let mut state = self.state.lock();
        if self.version() == version {
            state.composed = Some(handler.clone());
        }
        handler
    }

    /// Number of effective factories per stage, for diagnostics.
    pub fn describe(&self) -> Vec<(C::Stage, usize)> {
        let factories = self.effective_factories();
        C::Stage::ALL
            .iter()
            .map(|stage| (*stage, factories.iter().filter(|(s, _)| s == stage).count()))
            .collect()
    }

    /// Parent factories first, then this chain's own, in insertion order.
    fn effective_factories(&self) -> Vec<(C::Stage, PipelineFactory<C>)> {
        let mut factories = match &self.parent {
            Some(parent) => parent.effective_factories(),
            None => Vec::new(),
        };
        factories.extend(self.state.lock().factories.iter().cloned());
        factories
    }

    /// Moves to a new version. Callers hold the state lock, so a mutation
    /// and its version change are seen together.
    fn bump(&self, state: &mut ChainState<C>) {
        self.version.fetch_add(1, Ordering::AcqRel);
        state.composed = None;
    }

    fn invalidate(&self) {
        {
            let mut state = self.state.lock();
            self.bump(&mut state);
        }
        self.invalidate_children();
    }

    fn invalidate_children(&self) {
        let children: Vec<Arc<StagedChain<C>>> = {
            let mut children = self.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.iter().filter_map(Weak::upgrade).collect()
        };
        for child in children {
            child.invalidate();
        }
    }
}

impl<C: Concern> fmt::Debug for StagedChain<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedChain")
            .field("concern", &C::NAME)
            .field("version", &self.version())
            .field("stages", &self.describe())
            .finish()
    }
}

/// The three chains owned by one container.
#[derive(Debug)]
pub struct Pipelines {
    registration: Arc<StagedChain<RegistrationConcern>>,
    selection: Arc<StagedChain<SelectionConcern>>,
    resolution: Arc<StagedChain<ResolutionConcern>>,
}

impl Pipelines {
    /// Empty chains with no defaults installed.
    pub(crate) fn empty() -> Self {
        Self {
            registration: StagedChain::root(),
            selection: StagedChain::root(),
            resolution: StagedChain::root(),
        }
    }

    /// Chains linked to `self`, for a child container.
    pub(crate) fn child(&self) -> Self {
        Self {
            registration: StagedChain::child(&self.registration),
            selection: StagedChain::child(&self.selection),
            resolution: StagedChain::child(&self.resolution),
        }
    }

    pub fn registration(&self) -> &Arc<StagedChain<RegistrationConcern>> {
        &self.registration
    }

    pub fn selection(&self) -> &Arc<StagedChain<SelectionConcern>> {
        &self.selection
    }

    pub fn resolution(&self) -> &Arc<StagedChain<ResolutionConcern>> {
        &self.resolution
    }
}
