//! Wires a small service graph, then tears it down.
//!
//! Run with `RUST_LOG=sanad_container=debug cargo run --example basic`.

use std::sync::Arc;

use sanad::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

trait Repository: Send + Sync {
    fn find(&self, id: u32) -> Option<String>;
}

struct Database {
    url: Arc<String>,
}

impl Dispose for Database {
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        info!(url = %self.url, "Closing database");
        Ok(())
    }
}

struct UserRepository {
    db: Arc<Database>,
}

impl Repository for UserRepository {
    fn find(&self, id: u32) -> Option<String> {
        (id == 1).then(|| format!("alice (from {})", self.db.url))
    }
}

impl Injectable for UserRepository {
    fn metadata() -> TypeMetadata<Self> {
        TypeMetadata::new().constructor(
            Constructor::new("new", |args| Ok(UserRepository { db: args.get(0)? }))
                .param::<Database>("db"),
        )
    }
}

struct UserService {
    repo: Arc<dyn Repository>,
}

impl Injectable for UserService {
    fn metadata() -> TypeMetadata<Self> {
        TypeMetadata::new().constructor(
            Constructor::new("new", |args| Ok(UserService { repo: args.get(0)? }))
                .param::<dyn Repository>("repo"),
        )
    }
}

fn main() -> sanad::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let container = Container::new();
    container
        .register_instance(Arc::new(String::from("postgres://localhost/app")))
        .named("db_url")
        .commit()?;
    container
        .register::<Database>()
        .factory(|ctx| {
            Ok(Arc::new(Database {
                url: ctx.resolve_named::<String>("db_url")?,
            }))
        })
        .lifetime(Lifetime::ContainerControlled)
        .disposable()
        .commit()?;
    container.add_type::<UserRepository>()?;
    container
        .register::<dyn Repository>()
        .map_to::<UserRepository>(|repo| repo)
        .commit()?;
    container.register_type::<UserService>().commit()?;

    let request = container.create_child();
    let service = request.resolve::<UserService>()?;
    info!(user = ?service.repo.find(1), "Lookup");

    for registration in container.registrations() {
        info!(
            type_name = registration.type_name,
            name = ?registration.name,
            lifetime = %registration.lifetime,
            "Registered"
        );
    }

    if let Err(err) = container.resolve::<u64>() {
        info!("Expected failure:\n{err}");
    }

    container.dispose()
}
