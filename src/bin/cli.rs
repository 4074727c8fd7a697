use sqlx::Row;
use std::collections::HashSet;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde_json::json;
use sqlx::SqlitePool;

use permgraph::{initialize, AccessControlContext, EngineConfig, PasswordCredentials, Resource};

#[derive(Parser, Debug)]
#[command(author, version, about = "permgraph administration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply migrations and seed the system domain and system resource
    Init {
        /// System resource password; falls back to SYSTEM_PASSWORD
        #[arg(long)]
        password: Option<String>,
    },
    /// Create a new empty migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Print the placement and effective domain permissions of a resource
    InspectResource {
        /// Internal resource id
        id: i64,
        /// System resource password; falls back to SYSTEM_PASSWORD
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; fall back to the crate-local `.env` when the
    // binary runs from elsewhere.
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { password } => {
            let config = EngineConfig::from_env()?;
            let credentials = system_credentials(password)?;
            let pool = permgraph::db::init(&config).await?;
            if initialize(&pool, &credentials).await? {
                println!("Initialized access control store");
            } else {
                println!("Access control store already initialized");
            }
        }
        Commands::MakeMigration { name } => {
            let path = make_migration_file(&name)?;
            println!("Created migration: {}", path.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::InspectResource { id, password } => {
            let config = EngineConfig::from_env()?;
            let credentials = system_credentials(password)?;
            let mut context = AccessControlContext::connect(&config).await?;
            context.authenticate(&Resource::system(), &credentials).await?;
            inspect_resource(&context, &Resource::new(id)).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

fn system_credentials(password: Option<String>) -> anyhow::Result<PasswordCredentials> {
    let password = match password {
        Some(password) => password,
        None => std::env::var("SYSTEM_PASSWORD").context("SYSTEM_PASSWORD not set and --password not given")?,
    };
    Ok(PasswordCredentials::new(password))
}

async fn inspect_resource(context: &AccessControlContext, resource: &Resource) -> anyhow::Result<()> {
    let domain = context.get_domain_name_by_resource(resource).await?;
    let class = context.get_resource_class_info_by_resource(resource).await?;
    let domain_permissions = context.get_effective_domain_permissions(resource, &domain).await?;
    let global_permissions = context
        .get_effective_global_resource_permissions(resource, &class.resource_class_name, &domain)
        .await?;
    let domain_create_permissions = context.get_effective_domain_create_permissions(resource).await?;

    let report = json!({
        "resource": resource.id(),
        "domain": domain,
        "resourceClass": class,
        "domainPermissions": sorted(&domain_permissions),
        "globalPermissions": sorted(&global_permissions),
        "domainCreatePermissions": sorted(&domain_create_permissions),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn sorted<T: Display>(items: &HashSet<T>) -> Vec<String> {
    let mut rendered: Vec<String> = items.iter().map(|item| item.to_string()).collect();
    rendered.sort();
    rendered
}

fn make_migration_file(name: &str) -> anyhow::Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let sanitized = sanitize_name(name);
    let filename = format!("{}_{}.sql", timestamp, sanitized);
    let path = Path::new("migrations").join(filename);

    if path.exists() {
        anyhow::bail!("migration already exists: {}", path.display());
    }

    fs::write(&path, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", path.display()))?;

    Ok(path)
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let config = EngineConfig::from_env()?;
    permgraph::db::connect(&config).await
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let tracked = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if tracked.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) {
            "applied"
        } else {
            "pending"
        };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations when running from the repo root, otherwise the
    // crate-local folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
