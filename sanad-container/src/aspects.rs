//! Default pipeline aspects.
//!
//! Registration stages turn a [`RegisterRequest`] into policies and a
//! lifetime manager:
//!
//! | Stage | Aspect |
//! |---|---|
//! | Setup | reject conflicting or ill-typed requests |
//! | Lifetime | pick the manager and where the registration lives |
//! | TypeMapping | record the mapping target |
//! | Creation | record factory, disposal and constructor choice |
//! | Initialization | record initializers |
//!
//! Resolution stages build the value:
//!
//! | Stage | Aspect |
//! |---|---|
//! | Setup | trace the request |
//! | Lifetime | return a cached value or build under the manager's lock |
//! | TypeMapping | resolve the mapped type and cast it |
//! | Creation | run the factory or the selected constructor |
//! | Initialization | run initializers |

use std::sync::Arc;

use tracing::trace;

use crate::context::{BuildContext, ResolveHandler};
use crate::error::{ConfigurationError, MissingDependencyError, ResolutionError};
use crate::instance::Instance;
use crate::lifetime::Lifetime;
use crate::metadata::Args;
use crate::pipeline::{
    BuildStage, PipelineFactory, Pipelines, RegistrationConcern, ResolutionConcern,
};
use crate::registration::{
    ActivationFactory, ConstructorOverride, DisposalPolicy, Initializers, InjectionMember,
    MappedType, Placement, RegistrationHandler, RegistrationSetup,
};
use crate::selection::{self, SelectionError, SelectionRequest};

/// Installs every default aspect into a root container's chains.
pub(crate) fn install_defaults(pipelines: &Pipelines) {
    let registration = pipelines.registration();
    registration.add(validation_aspect(), BuildStage::Setup);
    registration.add(lifetime_policy_aspect(), BuildStage::Lifetime);
    registration.add(mapping_policy_aspect(), BuildStage::TypeMapping);
    registration.add(activation_policy_aspect(), BuildStage::Creation);
    registration.add(initializer_policy_aspect(), BuildStage::Initialization);

    selection::install_defaults(pipelines.selection());

    let resolution = pipelines.resolution();
    resolution.add(trace_aspect(), BuildStage::Setup);
    resolution.add(lifetime_aspect(), BuildStage::Lifetime);
    resolution.add(mapping_aspect(), BuildStage::TypeMapping);
    resolution.add(activation_aspect(), BuildStage::Creation);
    resolution.add(initialization_aspect(), BuildStage::Initialization);
}

// ── Registration ──

/// Default lifetime when the request names none.
fn requested_lifetime(setup: &RegistrationSetup) -> Lifetime {
    let request = &setup.request;
    match (&request.manager, request.lifetime) {
        (Some(manager), _) => manager.kind(),
        (None, Some(lifetime)) => lifetime,
        (None, None) if request.instance.is_some() => Lifetime::ContainerControlled,
        (None, None) => Lifetime::Transient,
    }
}

pub fn validation_aspect() -> PipelineFactory<RegistrationConcern> {
    Arc::new(|next: RegistrationHandler| -> RegistrationHandler {
        Arc::new(move |setup: &mut RegistrationSetup| {
            let request = &setup.request;
            if let (Some(mapping), Some(_)) = (&request.mapping, &request.factory) {
                if mapping.target != setup.key.ty() {
                    return Err(ConfigurationError::ConflictingActivation {
                        key: setup.key.clone(),
                        mapped_to: mapping.target.type_name(),
                    });
                }
            }

            if let Some(instance) = &request.instance {
                if instance.ty() != setup.key.ty() {
                    return Err(ConfigurationError::InstanceTypeMismatch {
                        key: setup.key.clone(),
                        actual: instance.ty().type_name(),
                    });
                }
                let lifetime = requested_lifetime(setup);
                if matches!(lifetime, Lifetime::Transient | Lifetime::PerResolve) {
                    return Err(ConfigurationError::IncompatibleLifetime {
                        key: setup.key.clone(),
                        lifetime,
                    });
                }
            }
            next(setup)
        })
    })
}

pub fn lifetime_policy_aspect() -> PipelineFactory<RegistrationConcern> {
    Arc::new(|next: RegistrationHandler| -> RegistrationHandler {
        Arc::new(move |setup: &mut RegistrationSetup| {
            let lifetime = requested_lifetime(setup);
            let manager = setup
                .request
                .manager
                .take()
                .unwrap_or_else(|| lifetime.manager());
            if manager.kind() == Lifetime::ContainerControlled {
                setup.placement = Placement::Root;
            }
            setup.manager = Some(manager);
            next(setup)
        })
    })
}

pub fn mapping_policy_aspect() -> PipelineFactory<RegistrationConcern> {
    Arc::new(|next: RegistrationHandler| -> RegistrationHandler {
        Arc::new(move |setup: &mut RegistrationSetup| {
            if let Some(mapping) = setup.request.mapping.take() {
                // Mapping a type to itself is no mapping.
                if mapping.target != setup.key.ty() {
                    setup.policies.insert(mapping);
                }
            }
            next(setup)
        })
    })
}

pub fn activation_policy_aspect() -> PipelineFactory<RegistrationConcern> {
    Arc::new(|next: RegistrationHandler| -> RegistrationHandler {
        Arc::new(move |setup: &mut RegistrationSetup| {
            if let Some(factory) = setup.request.factory.take() {
                setup.policies.insert::<ActivationFactory>(factory);
            }
            if let Some(disposal) = setup.request.disposal.take() {
                setup.policies.insert::<DisposalPolicy>(disposal);
            }
            let selected = setup.request.members.iter().rev().find_map(|m| match m {
                InjectionMember::Constructor(c) => Some(c.clone()),
                InjectionMember::Method(_) => None,
            });
            if let Some(selected) = selected {
                setup.policies.insert::<ConstructorOverride>(selected);
            }
            next(setup)
        })
    })
}

pub fn initializer_policy_aspect() -> PipelineFactory<RegistrationConcern> {
    Arc::new(|next: RegistrationHandler| -> RegistrationHandler {
        Arc::new(move |setup: &mut RegistrationSetup| {
            let initializers: Vec<_> = setup
                .request
                .members
                .iter()
                .filter_map(|m| match m {
                    InjectionMember::Method(init) => Some(init.clone()),
                    InjectionMember::Constructor(_) => None,
                })
                .collect();
            if !initializers.is_empty() {
                setup.policies.insert(Initializers(initializers));
            }
            next(setup)
        })
    })
}

// ── Resolution ──

pub fn trace_aspect() -> PipelineFactory<ResolutionConcern> {
    Arc::new(|next: ResolveHandler| -> ResolveHandler {
        Arc::new(move |ctx: &mut BuildContext<'_>| {
            trace!(key = %ctx.key(), depth = ctx.frame().depth(), "Building");
            next(ctx)
        })
    })
}

/// Get, lock, get again, build, set. `recover` runs after every attempt.
pub fn lifetime_aspect() -> PipelineFactory<ResolutionConcern> {
    Arc::new(|next: ResolveHandler| -> ResolveHandler {
        Arc::new(move |ctx: &mut BuildContext<'_>| {
            let registration = ctx.registration().clone();
            let manager = registration.lifetime();
            let scope = ctx.lifetime_scope();

            if let Some(cached) = manager.get(&scope) {
                trace!(key = %ctx.key(), "Lifetime cache hit");
                ctx.set_existing(cached);
                return Ok(());
            }

            let lock = manager.build_lock(&scope);
            let _guard = lock.as_ref().map(|lock| lock.lock());

            let result = match manager.get(&scope) {
                Some(cached) => {
                    trace!(key = %ctx.key(), "Built by a concurrent resolve");
                    ctx.set_existing(cached);
                    Ok(())
                }
                None => next(ctx).map(|()| {
                    if let Some(value) = ctx.existing() {
                        manager.set(value.clone(), &scope);
                    }
                }),
            };
            manager.recover();
            result
        })
    })
}

pub fn mapping_aspect() -> PipelineFactory<ResolutionConcern> {
    Arc::new(|next: ResolveHandler| -> ResolveHandler {
        Arc::new(move |ctx: &mut BuildContext<'_>| {
            if ctx.existing().is_none() {
                if let Some(mapping) = ctx.registration().policy::<MappedType>() {
                    let target_key = ctx.key().with_type(mapping.target);
                    trace!(from = %ctx.key(), to = %target_key, "Following type mapping");
                    let target = ctx.resolve_key(&target_key)?;
                    let value = mapping.cast(&target).ok_or_else(|| ResolutionError::TypeMismatch {
                        key: target_key.clone(),
                        expected: mapping.target.type_name(),
                        actual: target.ty().type_name(),
                        path: ctx.path(),
                    })?;
                    ctx.set_existing(value);
                }
            }
            next(ctx)
        })
    })
}

pub fn activation_aspect() -> PipelineFactory<ResolutionConcern> {
    Arc::new(|next: ResolveHandler| -> ResolveHandler {
        Arc::new(move |ctx: &mut BuildContext<'_>| {
            if ctx.existing().is_none() {
                let value = activate(ctx)?;
                ctx.set_existing(value);
            }
            next(ctx)
        })
    })
}

pub fn initialization_aspect() -> PipelineFactory<ResolutionConcern> {
    Arc::new(|next: ResolveHandler| -> ResolveHandler {
        Arc::new(move |ctx: &mut BuildContext<'_>| {
            if let (Some(Initializers(initializers)), Some(value)) = (
                ctx.registration().policy::<Initializers>(),
                ctx.existing().cloned(),
            ) {
                for initializer in &initializers {
                    trace!(key = %ctx.key(), initializer = initializer.name, "Running initializer");
                    initializer
                        .apply(&value, ctx)
                        .map_err(|e| ResolutionError::from_user(e, ctx.key(), ctx.path()))?;
                }
            }
            next(ctx)
        })
    })
}

fn activate(ctx: &BuildContext<'_>) -> Result<Instance, ResolutionError> {
    let registration = ctx.registration();

    if let Some(factory) = registration.policy::<ActivationFactory>() {
        let value = factory
            .build(ctx)
            .map_err(|e| ResolutionError::from_user(e, ctx.key(), ctx.path()))?;
        return Ok(match registration.policy::<DisposalPolicy>() {
            Some(disposal) => disposal.attach(value),
            None => value,
        });
    }

    let container = ctx.container();
    let Some(descriptor) = container.catalog().get(ctx.key().type_id()) else {
        return Err(ResolutionError::MissingDependency(MissingDependencyError {
            requested: ctx.key().clone(),
            required_by: ctx.frame().parent().map(|p| p.key().clone()),
            suggestions: container.suggestions(ctx.key()),
            path: ctx.path(),
        }));
    };

    let explicit = registration.policy::<ConstructorOverride>();
    let select = container.pipelines().selection().pipeline();
    let constructor = select(&SelectionRequest {
        key: ctx.key(),
        descriptor: &descriptor,
        explicit: explicit.as_ref(),
    })
    .map_err(|e| selection_failure(e, ctx))?
    .ok_or_else(|| ResolutionError::Activation {
        key: ctx.key().clone(),
        path: ctx.path(),
        source: format!("{} declares no constructor", ctx.key().type_name()).into(),
    })?;

    trace!(key = %ctx.key(), constructor = constructor.name, "Constructor selected");

    let mut values = Vec::with_capacity(constructor.parameters.len());
    for parameter in &constructor.parameters {
        if let Some(value) = ctx.parameter_override(parameter.name) {
            values.push(Some(value));
            continue;
        }
        match ctx.resolve_key(&parameter.key) {
            Ok(value) => values.push(Some(value)),
            Err(ResolutionError::MissingDependency(e))
                if parameter.optional && e.requested == parameter.key =>
            {
                values.push(None)
            }
            Err(e) => return Err(e),
        }
    }

    constructor
        .invoke(&Args::new(values, ctx.frame()))
        .map_err(|e| ResolutionError::from_user(e, ctx.key(), ctx.path()))
}

fn selection_failure(error: SelectionError, ctx: &BuildContext<'_>) -> ResolutionError {
    match error {
        SelectionError::Ambiguous { candidates, reason } => ResolutionError::AmbiguousActivation {
            key: ctx.key().clone(),
            candidates,
            reason,
            path: ctx.path(),
        },
        SelectionError::UnknownConstructor { name, available } => ResolutionError::Activation {
            key: ctx.key().clone(),
            path: ctx.path(),
            source: format!(
                "no constructor named {name:?}; available: {}",
                available.join(", ")
            )
            .into(),
        },
    }
}
