//! Config -> stores -> repository.
//!
//! The store topology is decided once here, from `StorageConfig`. Nothing
//! downstream re-reads config.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ftk_config::{
    report_unused_keys, resolve_database_url, LedgerConfig, LoadedConfig, RemoteConfig,
    StorageConfig, UnusedKeyPolicy,
};
use ftk_db::{PgPool, PgStore, PoolSettings};
use ftk_ledger::{
    DualWriteOptions, DualWriteRepository, LedgerStore, MemoryStore, UnavailableStore,
};
use ftk_local::LocalFileStore;
use tracing::{info, warn};

pub struct Loaded {
    pub loaded: LoadedConfig,
    pub ledger: LedgerConfig,
}

pub fn load_config(paths: &[PathBuf], strict: bool) -> Result<Loaded> {
    if paths.is_empty() {
        bail!("no config given: pass --config <path> (repeatable, merge order)");
    }
    let loaded = ftk_config::load_layered_yaml(paths)?;
    let ledger = LedgerConfig::from_loaded(&loaded)?;

    let policy = if strict {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = report_unused_keys(&loaded.config_json, &ledger.consumed_pointers(), policy)?;
    if !report.is_clean() {
        warn!(keys = ?report.unused_leaf_pointers, "config has keys nothing reads");
    }

    info!(config_hash = %loaded.config_hash, fund = %ledger.fund, "config loaded");
    Ok(Loaded { loaded, ledger })
}

/// Build the stores `cfg` names and open the repository over them.
pub async fn open_repository(cfg: &LedgerConfig) -> Result<DualWriteRepository> {
    let (primary, secondary) = match &cfg.storage {
        StorageConfig::File { local_dir, mirror } => (
            open_local(local_dir, &cfg.fund)?,
            mirror.as_ref().map(|r| pg_store(r, &cfg.fund)).transpose()?,
        ),
        StorageConfig::Database { remote, mirror_dir } => (
            pg_store(remote, &cfg.fund)?,
            mirror_dir.as_ref().map(|d| open_local_mirror(d, &cfg.fund)),
        ),
        StorageConfig::Memory => {
            let memory: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new("memory"));
            (memory, None)
        }
    };

    let options = DualWriteOptions::with_timeout(cfg.secondary_timeout());
    DualWriteRepository::open(primary, secondary, options)
        .await
        .context("failed to open ledger")
}

/// Directory holding the local trade log for this config, if any.
pub fn local_dir(cfg: &LedgerConfig) -> Option<PathBuf> {
    match &cfg.storage {
        StorageConfig::File { local_dir, .. } => Some(local_dir.join(&cfg.fund)),
        StorageConfig::Database { mirror_dir, .. } => {
            mirror_dir.as_ref().map(|d| d.join(&cfg.fund))
        }
        StorageConfig::Memory => None,
    }
}

/// The Postgres server this config talks to, whichever role it plays.
pub fn remote(cfg: &LedgerConfig) -> Option<&RemoteConfig> {
    match &cfg.storage {
        StorageConfig::File { mirror, .. } => mirror.as_ref(),
        StorageConfig::Database { remote, .. } => Some(remote),
        StorageConfig::Memory => None,
    }
}

/// Lazy pool: an unreachable server surfaces at first use, so a secondary
/// can degrade instead of failing startup.
pub fn pg_pool(remote: &RemoteConfig) -> Result<PgPool> {
    let url = resolve_database_url(remote)?;
    let settings = PoolSettings {
        max_connections: remote.max_connections,
        acquire_timeout: remote.timeout(),
    };
    ftk_db::connect_lazy(url.expose(), &settings)
        .with_context(|| format!("database url from {} is not usable", url.env_var))
}

fn pg_store(remote: &RemoteConfig, fund: &str) -> Result<Arc<dyn LedgerStore>> {
    Ok(Arc::new(PgStore::new(pg_pool(remote)?, fund)))
}

fn open_local(root: &Path, fund: &str) -> Result<Arc<dyn LedgerStore>> {
    let store = LocalFileStore::open(root, fund)
        .with_context(|| format!("failed to open local ledger under {}", root.display()))?;
    Ok(Arc::new(store))
}

/// A local mirror that cannot be opened degrades the ledger to single-store
/// instead of failing startup; the placeholder fails its probe.
fn open_local_mirror(root: &Path, fund: &str) -> Arc<dyn LedgerStore> {
    match open_local(root, fund) {
        Ok(store) => store,
        Err(e) => {
            let reason = format!("{e:#}");
            warn!(store = "local", error = %reason, "local mirror unavailable at startup");
            Arc::new(UnavailableStore::new("local", reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftk_ledger::{ReplicationMode, SingleStoreReason};

    #[tokio::test]
    async fn unusable_mirror_dir_degrades_to_single_store() {
        let tmp = tempfile::tempdir().unwrap();
        let not_a_dir = tmp.path().join("plain-file");
        std::fs::write(&not_a_dir, b"x").unwrap();

        let mirror = open_local_mirror(&not_a_dir, "main");
        assert_eq!(mirror.name(), "local");
        assert!(!mirror.test_connection().await);

        let primary: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new("postgres"));
        let repo = DualWriteRepository::open(primary, Some(mirror), DualWriteOptions::default())
            .await
            .unwrap();
        assert_eq!(
            repo.replication_mode(),
            &ReplicationMode::SingleStore {
                reason: SingleStoreReason::SecondaryUnreachable { store: "local" },
            }
        );

        let receipt = repo
            .record(ftk_portfolio::NewTrade::buy(
                "AAPL",
                ftk_portfolio::Decimal::ONE,
                ftk_portfolio::Decimal::TEN,
                chrono::Utc::now(),
            ))
            .await
            .unwrap();
        assert!(receipt.secondary.is_skew());
        assert_eq!(repo.write_skew_markers().await.unwrap().len(), 1);
    }

    #[test]
    fn usable_mirror_dir_opens_the_local_store() {
        let tmp = tempfile::tempdir().unwrap();
        let mirror = open_local_mirror(tmp.path(), "main");
        assert_eq!(mirror.name(), "local");
        assert!(tmp.path().join("main").is_dir());
    }
}
