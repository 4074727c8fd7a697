#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};

use permgraph::{initialize, AccessControlContext, AccessError, PasswordCredentials, Resource};

pub const SYSTEM_PASSWORD: &str = "system-secret";

/// A migrated, initialized store in a temp dir plus a context logged in as
/// the system resource. The temp dir lives as long as the harness.
pub struct Harness {
    pub pool: SqlitePool,
    pub system: AccessControlContext,
    _dir: TempDir,
}

impl Harness {
    /// Fresh unauthenticated context on the same store.
    pub fn anonymous(&self) -> AccessControlContext {
        AccessControlContext::new(self.pool.clone())
    }

    /// Context authenticated as `resource`.
    pub async fn login(&self, resource: &Resource, password: &str) -> Result<AccessControlContext> {
        let mut context = self.anonymous();
        context.authenticate(resource, &PasswordCredentials::new(password)).await?;
        Ok(context)
    }

    /// Create an authenticatable `USER` with external id `name` and password
    /// `<name>-pw` in `domain`.
    pub async fn user(&self, name: &str, domain: &str) -> Result<Resource> {
        let credentials = PasswordCredentials::new(format!("{name}-pw"));
        let resource = self
            .system
            .create_resource("USER", domain, Some(name), Some(&credentials))
            .await?;
        Ok(resource)
    }

    pub async fn document(&self, domain: &str) -> Result<Resource> {
        Ok(self.system.create_resource("DOC", domain, None, None).await?)
    }
}

pub async fn setup() -> Result<Harness> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("permgraph_test.db");
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    assert!(initialize(&pool, &PasswordCredentials::new(SYSTEM_PASSWORD)).await?);

    let mut system = AccessControlContext::new(pool.clone());
    system
        .authenticate(&Resource::system(), &PasswordCredentials::new(SYSTEM_PASSWORD))
        .await?;

    Ok(Harness {
        pool,
        system,
        _dir: dir,
    })
}

/// `setup` plus a small world: classes `USER` (authenticatable) and `DOC`
/// (custom permissions `view`, `edit`), and domains `acme` > `eng` > `infra`
/// and `globex`.
pub async fn setup_world() -> Result<Harness> {
    let harness = setup().await?;
    let system = &harness.system;

    system.create_resource_class("USER", true, false).await?;
    system.create_resource_class("DOC", false, false).await?;
    system.create_resource_permission("DOC", "view").await?;
    system.create_resource_permission("DOC", "edit").await?;

    system.create_domain("acme").await?;
    system.create_child_domain("eng", "acme").await?;
    system.create_child_domain("infra", "eng").await?;
    system.create_domain("globex").await?;

    Ok(harness)
}

pub fn kind_of<T: std::fmt::Debug>(result: Result<T, AccessError>) -> &'static str {
    match result {
        Ok(value) => panic!("expected an error, got {value:?}"),
        Err(err) => err.kind(),
    }
}
