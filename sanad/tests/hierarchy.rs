mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use sanad::prelude::*;

/// Records its label into a shared log when disposed.
struct Tracked {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Dispose for Tracked {
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        self.log.lock().push(self.label);
        Ok(())
    }
}

fn tracked(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Arc<Tracked> {
    Arc::new(Tracked {
        label,
        log: log.clone(),
    })
}

#[test]
fn child_falls_back_then_shadows() {
    common::init_tracing();
    let parent = Container::new();
    parent.register_instance(Arc::new(String::from("parent"))).commit().unwrap();

    let child = parent.create_child();
    let grandchild = child.create_child();
    assert_eq!(*grandchild.resolve::<String>().unwrap(), "parent");

    child
        .register_instance(Arc::new(String::from("child")))
        .lifetime(Lifetime::Hierarchical)
        .commit()
        .unwrap();
    assert_eq!(*child.resolve::<String>().unwrap(), "child");
    assert_eq!(*parent.resolve::<String>().unwrap(), "parent");
    assert!(child.is_registered::<String>());

    let infos = child.registrations();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].lifetime, Lifetime::Hierarchical);
}

#[test]
fn hierarchical_value_per_container() {
    let builds = Arc::new(AtomicUsize::new(0));
    let parent = Container::new();
    let counter = builds.clone();
    parent
        .register::<Vec<u8>>()
        .factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Vec::new()))
        })
        .lifetime(Lifetime::Hierarchical)
        .commit()
        .unwrap();

    let left = parent.create_child();
    let right = parent.create_child();
    let a = left.resolve::<Vec<u8>>().unwrap();
    let b = right.resolve::<Vec<u8>>().unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &left.resolve::<Vec<u8>>().unwrap()));
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[test]
fn disposing_one_child_leaves_siblings_and_parent() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let parent = Container::new();
    parent.register_disposable(tracked(&log, "root-singleton")).commit().unwrap();

    let factory_log = log.clone();
    parent
        .register::<Tracked>()
        .named("scoped")
        .factory(move |_| Ok(tracked(&factory_log, "scoped")))
        .lifetime(Lifetime::Hierarchical)
        .disposable()
        .commit()
        .unwrap();

    let left = parent.create_child();
    let right = parent.create_child();
    left.resolve_named::<Tracked>("scoped").unwrap();
    right.resolve_named::<Tracked>("scoped").unwrap();

    left.dispose().unwrap();
    assert_eq!(*log.lock(), vec!["scoped"]);
    assert!(left.is_disposed());
    assert!(!right.is_disposed());

    // The sibling still has its own value and keeps resolving it.
    right.resolve_named::<Tracked>("scoped").unwrap();
    assert_eq!(log.lock().len(), 1);

    parent.dispose().unwrap();
    assert!(right.is_disposed());
    assert_eq!(*log.lock(), vec!["scoped", "scoped", "root-singleton"]);
}

#[test]
fn dispose_twice_is_harmless() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container.register_disposable(tracked(&log, "once")).commit().unwrap();

    container.dispose().unwrap();
    container.dispose().unwrap();
    assert_eq!(*log.lock(), vec!["once"]);
}

struct Faulty(&'static str);

impl Dispose for Faulty {
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        Err(format!("{} refused to close", self.0).into())
    }
}

#[test]
fn disposal_failures_are_collected() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container.register_disposable(Arc::new(Faulty("socket"))).named("a").commit().unwrap();
    container.register_disposable(tracked(&log, "healthy")).commit().unwrap();
    container.register_disposable(Arc::new(Faulty("file"))).named("b").commit().unwrap();

    let err = container.dispose().unwrap_err();
    let SanadError::Disposal(disposal) = &err else {
        panic!("expected a disposal error, got {err}");
    };
    assert_eq!(disposal.failures.len(), 2);
    assert_eq!(*log.lock(), vec!["healthy"]);
    assert!(disposal.to_string().contains("socket refused to close"));
}

#[test]
fn replacing_a_singleton_disposes_it_exactly_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container.register_disposable(tracked(&log, "first")).commit().unwrap();
    container.register_disposable(tracked(&log, "second")).commit().unwrap();
    assert_eq!(*log.lock(), vec!["first"]);

    let current = container.resolve::<Tracked>().unwrap();
    assert_eq!(current.label, "second");

    container.dispose().unwrap();
    assert_eq!(*log.lock(), vec!["first", "second"]);
}

#[test]
fn parent_disposal_reaches_every_descendant() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let root = Container::new();
    let child = root.create_child();
    let grandchild = child.create_child();

    for (container, label) in [(&child, "child"), (&grandchild, "grandchild")] {
        let factory_log = log.clone();
        container
            .register::<Tracked>()
            .factory(move |_| Ok(tracked(&factory_log, label)))
            .lifetime(Lifetime::Hierarchical)
            .disposable()
            .commit()
            .unwrap();
        container.resolve::<Tracked>().unwrap();
    }

    // The grandchild was adopted before the child's value was built, so
    // the child's store releases its value first.
    root.dispose().unwrap();
    assert_eq!(*log.lock(), vec!["child", "grandchild"]);
    assert!(grandchild.is_disposed());
    assert!(grandchild.resolve::<Tracked>().is_err());
}

#[test]
fn values_the_container_does_not_own_survive_its_disposal() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    for (label, lifetime) in [
        ("external", Lifetime::ExternallyControlled),
        ("per-thread", Lifetime::PerThread),
        ("per-resolve", Lifetime::PerResolve),
    ] {
        let factory_log = log.clone();
        container
            .register::<Tracked>()
            .named(label)
            .factory(move |_| Ok(tracked(&factory_log, label)))
            .lifetime(lifetime)
            .disposable()
            .commit()
            .unwrap();
    }

    let held: Vec<Arc<Tracked>> = ["external", "per-thread", "per-resolve"]
        .into_iter()
        .map(|name| container.resolve_named::<Tracked>(name).unwrap())
        .collect();

    container.dispose().unwrap();
    assert!(log.lock().is_empty());

    // The caller still owns them and may dispose them itself.
    for value in &held {
        value.dispose().unwrap();
    }
    assert_eq!(*log.lock(), vec!["external", "per-thread", "per-resolve"]);
}

#[test]
fn child_of_disposed_parent_starts_disposed() {
    let parent = Container::new();
    parent.dispose().unwrap();
    let child = parent.create_child();
    assert!(child.is_disposed());
    assert!(matches!(child.resolve::<u8>(), Err(SanadError::ContainerDisposed)));
}
