use std::str::FromStr;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::EngineConfig;

pub(crate) mod row_parsers;
pub(crate) mod sql;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Open the pool described by `config` without touching the schema.
pub async fn connect(config: &EngineConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .context("invalid DATABASE_URL")?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(1)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .context("failed to connect to database")?;

    Ok(pool)
}

/// Open the pool and bring the schema up to date.
pub async fn init(config: &EngineConfig) -> anyhow::Result<SqlitePool> {
    let pool = connect(config).await?;

    MIGRATOR
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}
