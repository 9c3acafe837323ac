mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sanad::error::{ConfigurationError, ResolutionError};
use sanad::prelude::*;

trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

struct English;

impl Greeter for English {
    fn greet(&self) -> String {
        "hello".into()
    }
}

impl Injectable for English {
    fn metadata() -> TypeMetadata<Self> {
        TypeMetadata::new().constructor(Constructor::new("new", |_| Ok(English)))
    }
}

struct French;

impl Greeter for French {
    fn greet(&self) -> String {
        "bonjour".into()
    }
}

impl Injectable for French {
    fn metadata() -> TypeMetadata<Self> {
        TypeMetadata::new().constructor(Constructor::new("new", |_| Ok(French)))
    }
}

#[test]
fn registered_instance_and_child_mapping() {
    common::init_tracing();
    let parent = Container::new();
    parent.add_type::<English>().unwrap();
    parent.add_type::<French>().unwrap();

    parent
        .register::<dyn Greeter>()
        .map_to::<English>(|g| g)
        .commit()
        .unwrap();
    let a = parent.resolve::<dyn Greeter>().unwrap();
    let b = parent.resolve::<dyn Greeter>().unwrap();
    assert!(!Arc::ptr_eq(&a, &b));

    let s: Arc<dyn Greeter> = Arc::new(English);
    parent.register_instance(s.clone()).commit().unwrap();
    assert!(Arc::ptr_eq(&parent.resolve::<dyn Greeter>().unwrap(), &s));

    let child = parent.create_child();
    assert!(Arc::ptr_eq(&child.resolve::<dyn Greeter>().unwrap(), &s));

    child
        .register::<dyn Greeter>()
        .map_to::<French>(|g| g)
        .commit()
        .unwrap();
    assert_eq!(child.resolve::<dyn Greeter>().unwrap().greet(), "bonjour");
    assert!(Arc::ptr_eq(&parent.resolve::<dyn Greeter>().unwrap(), &s));
}

#[test]
fn named_mapping_follows_the_name() {
    let container = Container::new();
    container.add_type::<French>().unwrap();
    container
        .register::<dyn Greeter>()
        .named("fr")
        .map_to::<French>(|g| g)
        .lifetime(Lifetime::ContainerControlled)
        .commit()
        .unwrap();

    let greeter = container.resolve_named::<dyn Greeter>("fr").unwrap();
    assert_eq!(greeter.greet(), "bonjour");
    assert!(container.resolve::<dyn Greeter>().is_err());
    assert!(container.is_registered_named::<French>("fr"));
}

#[test]
fn fifty_names_interleaved_with_lookups() {
    let container = Container::new();
    for i in 0..50u32 {
        container
            .register_instance(Arc::new(i))
            .named(&format!("port-{i}"))
            .commit()
            .unwrap();
        for j in 0..=i {
            let value = container.resolve_named::<u32>(&format!("port-{j}")).unwrap();
            assert_eq!(*value, j);
        }
    }
    assert_eq!(container.registrations().len(), 50);
}

struct Config {
    retries: u32,
}

struct Client {
    config: Option<Arc<Config>>,
    endpoint: Arc<String>,
}

impl Injectable for Client {
    fn metadata() -> TypeMetadata<Self> {
        TypeMetadata::new().constructor(
            Constructor::new("new", |args| {
                Ok(Client {
                    config: args.optional(0)?,
                    endpoint: args.get(1)?,
                })
            })
            .optional::<Config>("config")
            .param_named::<String>("endpoint", "endpoint"),
        )
    }
}

#[test]
fn optional_parameter_receives_none_when_missing() {
    let container = Container::new();
    container.add_type::<Client>().unwrap();
    container
        .register_instance(Arc::new("https://api".to_string()))
        .named("endpoint")
        .commit()
        .unwrap();

    let client = container.resolve::<Client>().unwrap();
    assert!(client.config.is_none());
    assert_eq!(*client.endpoint, "https://api");

    container.register_instance(Arc::new(Config { retries: 3 })).commit().unwrap();
    let client = container.resolve::<Client>().unwrap();
    assert_eq!(client.config.as_ref().map(|c| c.retries), Some(3));
}

#[test]
fn parameter_override_replaces_one_argument() {
    let container = Container::new();
    container.add_type::<Client>().unwrap();
    container
        .register_instance(Arc::new("https://api".to_string()))
        .named("endpoint")
        .commit()
        .unwrap();

    let client = container
        .resolve_with::<Client>(
            None,
            vec![ResolverOverride::parameter("endpoint", Arc::new("http://localhost".to_string()))],
        )
        .unwrap();
    assert_eq!(*client.endpoint, "http://localhost");
}

struct Report {
    source: &'static str,
}

impl Injectable for Report {
    fn metadata() -> TypeMetadata<Self> {
        TypeMetadata::new()
            .constructor(
                Constructor::new("from_file", |args| {
                    let _: Arc<String> = args.get(0)?;
                    Ok(Report { source: "file" })
                })
                .param::<String>("path"),
            )
            .constructor(
                Constructor::new("from_config", |args| {
                    let _: Arc<Config> = args.get(0)?;
                    Ok(Report { source: "config" })
                })
                .param::<Config>("config"),
            )
    }
}

#[test]
fn equal_constructors_are_ambiguous() {
    let container = Container::new();
    container.add_type::<Report>().unwrap();
    let err = container.resolve::<Report>().err().unwrap();

    let Some(ResolutionError::AmbiguousActivation { candidates, .. }) = err.resolution_cause() else {
        panic!("expected ambiguity, got {err}");
    };
    assert_eq!(candidates, &vec!["from_file", "from_config"]);
}

#[test]
fn explicit_constructor_breaks_the_tie() {
    let container = Container::new();
    container.register_instance(Arc::new(Config { retries: 1 })).commit().unwrap();
    container
        .register_type::<Report>()
        .member(InjectionMember::constructor("from_config"))
        .commit()
        .unwrap();

    assert_eq!(container.resolve::<Report>().unwrap().source, "config");
}

#[test]
fn unknown_constructor_fails_activation() {
    let container = Container::new();
    container
        .register_type::<Report>()
        .member(InjectionMember::constructor("from_url"))
        .commit()
        .unwrap();

    let err = container.resolve::<Report>().err().unwrap();
    assert!(matches!(err.resolution_cause(), Some(ResolutionError::Activation { .. })));
    assert!(err.to_string().contains("from_url"));
}

#[test]
fn method_members_run_after_construction() {
    struct Counter(AtomicUsize);

    let container = Container::new();
    container
        .register::<Counter>()
        .factory(|_| Ok(Arc::new(Counter(AtomicUsize::new(0)))))
        .member(InjectionMember::method::<Counter>("prime", |counter, _| {
            counter.0.fetch_add(10, Ordering::SeqCst);
            Ok(())
        }))
        .commit()
        .unwrap();

    assert_eq!(container.resolve::<Counter>().unwrap().0.load(Ordering::SeqCst), 10);
}

#[test]
fn mapping_with_factory_is_rejected() {
    let container = Container::new();
    let err = container
        .register::<dyn Greeter>()
        .map_to::<English>(|g| g)
        .factory(|_| Ok(Arc::new(French)))
        .commit()
        .unwrap_err();
    assert!(matches!(
        err,
        SanadError::Configuration(ConfigurationError::ConflictingActivation { .. })
    ));
    assert!(!container.is_registered::<dyn Greeter>());
}

#[test]
fn instance_with_transient_lifetime_is_rejected() {
    let container = Container::new();
    let err = container
        .register_instance(Arc::new(English))
        .lifetime(Lifetime::Transient)
        .commit()
        .unwrap_err();
    assert!(matches!(
        err,
        SanadError::Configuration(ConfigurationError::IncompatibleLifetime { .. })
    ));
}

struct Ping {
    _pong: Arc<Pong>,
}

struct Pong {
    _ping: Arc<Ping>,
}

impl Injectable for Ping {
    fn metadata() -> TypeMetadata<Self> {
        TypeMetadata::new()
            .constructor(Constructor::new("new", |args| Ok(Ping { _pong: args.get(0)? })).param::<Pong>("pong"))
    }
}

impl Injectable for Pong {
    fn metadata() -> TypeMetadata<Self> {
        TypeMetadata::new()
            .constructor(Constructor::new("new", |args| Ok(Pong { _ping: args.get(0)? })).param::<Ping>("ping"))
    }
}

#[test]
fn cycle_hits_the_depth_limit() {
    let container = Container::builder().max_resolve_depth(32).build().unwrap();
    container.add_type::<Ping>().unwrap();
    container.add_type::<Pong>().unwrap();

    let err = container.resolve::<Ping>().err().unwrap();
    let Some(ResolutionError::DepthExceeded { limit, path }) = err.resolution_cause() else {
        panic!("expected depth limit, got {err}");
    };
    assert_eq!(*limit, 32);
    assert_eq!(path.len(), 33);
    assert_eq!(path[0].key, DependencyKey::of::<Ping>());
    assert_eq!(path[1].key, DependencyKey::of::<Pong>());
    assert!(path[32].lifetime.is_none());

    let SanadError::Resolution(failure) = &err else {
        panic!("expected a resolution failure");
    };
    assert_eq!(failure.requested, DependencyKey::of::<Ping>());
    assert!(failure.explain().contains("Ping"));
}

#[test]
fn default_depth_limit_stops_cycles() {
    let handle = std::thread::Builder::new()
        .stack_size(16 * 1024 * 1024)
        .spawn(|| {
            let container = Container::new();
            container.add_type::<Ping>().unwrap();
            container.add_type::<Pong>().unwrap();
            match container.resolve::<Pong>() {
                Err(err) => err.resolution_cause().map(|c| c.path().len()),
                Ok(_) => None,
            }
        })
        .unwrap();
    assert_eq!(handle.join().unwrap(), Some(101));
}

#[test]
fn missing_dependency_suggests_registered_names() {
    struct DatabasePool;
    struct DatabasePoo1;

    let container = Container::new();
    container
        .register::<DatabasePool>()
        .factory(|_| Ok(Arc::new(DatabasePool)))
        .commit()
        .unwrap();

    let err = container.resolve::<DatabasePoo1>().err().unwrap();
    let Some(ResolutionError::MissingDependency(missing)) = err.resolution_cause() else {
        panic!("expected missing dependency, got {err}");
    };
    assert!(missing.suggestions.iter().any(|s| s.contains("DatabasePool")));
}

#[test]
fn failed_build_is_not_cached() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let container = Container::new();
    let counter = attempts.clone();
    container
        .register::<Config>()
        .factory(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("not ready".into())
            } else {
                Ok(Arc::new(Config { retries: 5 }))
            }
        })
        .lifetime(Lifetime::ContainerControlled)
        .commit()
        .unwrap();

    assert!(container.resolve::<Config>().is_err());
    let first = container.resolve::<Config>().unwrap();
    let second = container.resolve::<Config>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
