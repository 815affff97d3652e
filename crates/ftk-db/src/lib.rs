//! ftk-db
//!
//! PostgreSQL ledger store:
//! - Embedded SQLx migrations (`./migrations`)
//! - Every row is scoped by a `fund` column; one database can hold many ledgers
//! - NUMERIC columns for every decimal (no float columns)
//! - Trade + disposal written in one transaction; writes idempotent by id

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

mod store;

pub use sqlx::PgPool;
pub use store::PgStore;

pub const ENV_DB_URL: &str = "FTK_DATABASE_URL";

/// Pool sizing and timeouts.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// Bound on acquiring a connection, which bounds the connect attempt.
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Read a database URL from the named env var.
pub fn url_from_env(var: &str) -> Result<String> {
    std::env::var(var).with_context(|| format!("missing env var {var}"))
}

/// Connect eagerly. Fails if the server is unreachable.
pub async fn connect(url: &str, settings: &PoolSettings) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Build a pool without connecting. Connection errors surface on first use,
/// which lets a caller probe and degrade instead of failing at startup.
pub fn connect_lazy(url: &str, settings: &PoolSettings) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_lazy(url)
        .context("invalid Postgres connection string")
}

/// Connect to Postgres using FTK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    connect(&url_from_env(ENV_DB_URL)?, &PoolSettings::default()).await
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'ledger_trades'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_ledger_tables: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_ledger_tables: bool,
}

/// Test helper: connect via FTK_DATABASE_URL and migrate.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}
