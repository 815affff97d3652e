//! Database commands. The server comes from config when one is given,
//! otherwise from FTK_DATABASE_URL.

use anyhow::{bail, Result};
use ftk_db::PgPool;
use serde_json::json;

use super::{print_json, ConfigArgs};
use crate::wiring;

async fn pool(config: &ConfigArgs) -> Result<PgPool> {
    if config.paths.is_empty() {
        return ftk_db::connect_from_env().await;
    }
    let loaded = wiring::load_config(&config.paths, config.strict)?;
    match wiring::remote(&loaded.ledger) {
        Some(remote) => wiring::pg_pool(remote),
        None => bail!("storage backend has no database configured"),
    }
}

pub async fn status(config: &ConfigArgs) -> Result<()> {
    let pool = pool(config).await?;
    let s = ftk_db::status(&pool).await?;
    print_json(&json!({
        "db_ok": s.ok,
        "has_ledger_tables": s.has_ledger_tables,
    }))
}

pub async fn migrate(config: &ConfigArgs) -> Result<()> {
    let pool = pool(config).await?;
    ftk_db::migrate(&pool).await?;
    print_json(&json!({ "migrations_applied": true }))
}
