//! Constructor selection.
//!
//! Selection is its own staged chain. Each strategy either answers or
//! defers to the next one:
//!
//! 1. an explicit [`ConstructorOverride`] on the registration
//! 2. the single constructor marked with [`Constructor::marked`]
//! 3. the constructor with the most parameters
//!
//! [`Constructor::marked`]: crate::metadata::Constructor::marked

use std::sync::Arc;

use crate::key::DependencyKey;
use crate::metadata::{ConstructorInfo, TypeDescriptor};
use crate::pipeline::{PipelineFactory, SelectionConcern, SelectionStage, StagedChain};
use crate::registration::ConstructorOverride;

/// Input to constructor selection.
#[derive(Debug)]
pub struct SelectionRequest<'a> {
    pub key: &'a DependencyKey,
    pub descriptor: &'a TypeDescriptor,
    pub explicit: Option<&'a ConstructorOverride>,
}

/// Why no single constructor could be chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// Several constructors qualify equally.
    Ambiguous {
        candidates: Vec<&'static str>,
        reason: String,
    },
    /// The explicitly requested constructor does not exist.
    UnknownConstructor {
        name: &'static str,
        available: Vec<&'static str>,
    },
}

/// `Ok(None)` means "no opinion": nothing selected, no error.
pub type SelectionHandler = Arc<
    dyn Fn(&SelectionRequest<'_>) -> Result<Option<Arc<ConstructorInfo>>, SelectionError>
        + Send
        + Sync,
>;

fn names(constructors: &[&Arc<ConstructorInfo>]) -> Vec<&'static str> {
    constructors.iter().map(|c| c.name).collect()
}

/// Honors a constructor named on the registration.
pub fn explicit_strategy() -> PipelineFactory<SelectionConcern> {
    Arc::new(|next: SelectionHandler| -> SelectionHandler {
        Arc::new(move |request: &SelectionRequest<'_>| {
            let Some(explicit) = request.explicit else {
                return next(request);
            };
            request
                .descriptor
                .constructors
                .iter()
                .find(|c| c.name == explicit.name)
                .cloned()
                .map(Some)
                .ok_or_else(|| SelectionError::UnknownConstructor {
                    name: explicit.name,
                    available: request.descriptor.constructors.iter().map(|c| c.name).collect(),
                })
        })
    })
}

/// Picks the single marked constructor.
pub fn marked_strategy() -> PipelineFactory<SelectionConcern> {
    Arc::new(|next: SelectionHandler| -> SelectionHandler {
        Arc::new(move |request: &SelectionRequest<'_>| {
            let marked: Vec<&Arc<ConstructorInfo>> = request
                .descriptor
                .constructors
                .iter()
                .filter(|c| c.marked)
                .collect();

            match marked.as_slice() {
                [] => next(request),
                [only] => Ok(Some(Arc::clone(only))),
                _ => Err(SelectionError::Ambiguous {
                    candidates: names(&marked),
                    reason: "more than one constructor is marked".into(),
                }),
            }
        })
    })
}

/// Picks the constructor with the longest parameter list.
pub fn longest_strategy() -> PipelineFactory<SelectionConcern> {
    Arc::new(|next: SelectionHandler| -> SelectionHandler {
        Arc::new(move |request: &SelectionRequest<'_>| {
            let constructors = &request.descriptor.constructors;
            let Some(longest) = constructors.iter().map(|c| c.parameters.len()).max() else {
                return next(request);
            };

            let candidates: Vec<&Arc<ConstructorInfo>> = constructors
                .iter()
                .filter(|c| c.parameters.len() == longest)
                .collect();

            match candidates.as_slice() {
                [only] => Ok(Some(Arc::clone(only))),
                _ => Err(SelectionError::Ambiguous {
                    candidates: names(&candidates),
                    reason: format!("{} constructors take {longest} parameter(s)", candidates.len()),
                }),
            }
        })
    })
}

/// Installs the three default strategies.
pub(crate) fn install_defaults(chain: &StagedChain<SelectionConcern>) {
    chain.add(explicit_strategy(), SelectionStage::Explicit);
    chain.add(marked_strategy(), SelectionStage::Marked);
    chain.add(longest_strategy(), SelectionStage::Heuristic);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Constructor, Injectable, TypeCatalog, TypeMetadata};
    use std::any::TypeId;

    fn descriptor<T: Injectable>() -> Arc<TypeDescriptor> {
        let catalog = TypeCatalog::default();
        catalog.add::<T>();
        catalog.get(TypeId::of::<T>()).unwrap()
    }

    fn select<T: Injectable>(
        explicit: Option<&'static str>,
    ) -> Result<Option<Arc<ConstructorInfo>>, SelectionError> {
        let chain = StagedChain::<SelectionConcern>::root();
        install_defaults(&chain);
        let descriptor = descriptor::<T>();
        let key = DependencyKey::of::<T>();
        let explicit = explicit.map(|name| ConstructorOverride { name });
        chain.pipeline()(&SelectionRequest {
            key: &key,
            descriptor: &descriptor,
            explicit: explicit.as_ref(),
        })
    }

    struct Longest;

    impl Injectable for Longest {
        fn metadata() -> TypeMetadata<Self> {
            TypeMetadata::new()
                .constructor(Constructor::new("empty", |_| Ok(Longest)))
                .constructor(
                    Constructor::new("full", |_| Ok(Longest))
                        .param::<u8>("a")
                        .param::<u16>("b"),
                )
        }
    }

    struct Tied;

    impl Injectable for Tied {
        fn metadata() -> TypeMetadata<Self> {
            TypeMetadata::new()
                .constructor(Constructor::new("left", |_| Ok(Tied)).param::<u8>("a"))
                .constructor(Constructor::new("right", |_| Ok(Tied)).param::<u16>("b"))
        }
    }

    struct Marked;

    impl Injectable for Marked {
        fn metadata() -> TypeMetadata<Self> {
            TypeMetadata::new()
                .constructor(Constructor::new("short", |_| Ok(Marked)).marked())
                .constructor(Constructor::new("long", |_| Ok(Marked)).param::<u8>("a"))
        }
    }

    struct DoubleMarked;

    impl Injectable for DoubleMarked {
        fn metadata() -> TypeMetadata<Self> {
            TypeMetadata::new()
                .constructor(Constructor::new("one", |_| Ok(DoubleMarked)).marked())
                .constructor(Constructor::new("two", |_| Ok(DoubleMarked)).marked())
        }
    }

    struct Bare;

    impl Injectable for Bare {
        fn metadata() -> TypeMetadata<Self> {
            TypeMetadata::new()
        }
    }

    #[test]
    fn longest_constructor_wins() {
        assert_eq!(select::<Longest>(None).unwrap().unwrap().name, "full");
    }

    #[test]
    fn tie_is_ambiguous() {
        let err = select::<Tied>(None).unwrap_err();
        assert_eq!(
            err,
            SelectionError::Ambiguous {
                candidates: vec!["left", "right"],
                reason: "2 constructors take 1 parameter(s)".into(),
            }
        );
    }

    #[test]
    fn marked_beats_longest() {
        assert_eq!(select::<Marked>(None).unwrap().unwrap().name, "short");
    }

    #[test]
    fn two_marked_is_ambiguous() {
        assert!(matches!(
            select::<DoubleMarked>(None),
            Err(SelectionError::Ambiguous { .. })
        ));
    }

    #[test]
    fn explicit_beats_everything() {
        assert_eq!(select::<Tied>(Some("right")).unwrap().unwrap().name, "right");
        assert_eq!(select::<DoubleMarked>(Some("two")).unwrap().unwrap().name, "two");
    }

    #[test]
    fn unknown_explicit_constructor() {
        let err = select::<Longest>(Some("missing")).unwrap_err();
        assert_eq!(
            err,
            SelectionError::UnknownConstructor {
                name: "missing",
                available: vec!["empty", "full"],
            }
        );
    }

    #[test]
    fn no_constructors_selects_nothing() {
        assert!(select::<Bare>(None).unwrap().is_none());
    }
}
