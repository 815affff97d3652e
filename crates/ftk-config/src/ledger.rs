use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::LoadedConfig;

pub const DEFAULT_DATABASE_URL_ENV: &str = "FTK_DATABASE_URL";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Typed view of the effective config.
///
/// ```yaml
/// fund: main
/// storage:
///   backend: file            # file | database | memory
///   local_dir: ./data
///   mirror:                  # optional remote secondary
///     database_url_env: FTK_DATABASE_URL
///     timeout_ms: 5000
///     max_connections: 5
/// replication:
///   secondary_timeout_ms: 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_fund")]
    pub fund: String,
    pub storage: StorageConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// Store topology, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Local JSON-lines primary, optional Postgres secondary.
    File {
        local_dir: PathBuf,
        #[serde(default)]
        mirror: Option<RemoteConfig>,
    },
    /// Postgres primary, optional local JSON-lines secondary.
    Database {
        remote: RemoteConfig,
        #[serde(default)]
        mirror_dir: Option<PathBuf>,
    },
    /// In-process only; nothing survives the process.
    Memory,
}

/// Where to find a Postgres server. The URL itself lives in the named env
/// var, never in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_database_url_env")]
    pub database_url_env: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_timeout_ms")]
    pub secondary_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            secondary_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

fn default_fund() -> String {
    "main".to_string()
}

fn default_database_url_env() -> String {
    DEFAULT_DATABASE_URL_ENV.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self, at: &str) -> Result<()> {
        if !is_env_var_name(&self.database_url_env) {
            bail!(
                "CONFIG_INVALID {at}/database_url_env: must name an env var \
                 (e.g. {DEFAULT_DATABASE_URL_ENV}), not hold a URL"
            );
        }
        if self.timeout_ms == 0 {
            bail!("CONFIG_INVALID {at}/timeout_ms: must be > 0");
        }
        if self.max_connections == 0 {
            bail!("CONFIG_INVALID {at}/max_connections: must be >= 1");
        }
        Ok(())
    }
}

impl LedgerConfig {
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        let cfg: LedgerConfig = serde_json::from_value(loaded.config_json.clone())
            .context("CONFIG_INVALID: config does not describe a ledger")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn secondary_timeout(&self) -> Duration {
        Duration::from_millis(self.replication.secondary_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.fund.trim().is_empty() {
            bail!("CONFIG_INVALID /fund: must not be empty");
        }
        if self.replication.secondary_timeout_ms == 0 {
            bail!("CONFIG_INVALID /replication/secondary_timeout_ms: must be > 0");
        }
        match &self.storage {
            StorageConfig::File { local_dir, mirror } => {
                if local_dir.as_os_str().is_empty() {
                    bail!("CONFIG_INVALID /storage/local_dir: must not be empty");
                }
                if let Some(m) = mirror {
                    m.validate("/storage/mirror")?;
                }
            }
            StorageConfig::Database { remote, mirror_dir } => {
                remote.validate("/storage/remote")?;
                if mirror_dir.as_ref().is_some_and(|d| d.as_os_str().is_empty()) {
                    bail!("CONFIG_INVALID /storage/mirror_dir: must not be empty");
                }
            }
            StorageConfig::Memory => {}
        }
        Ok(())
    }

    /// JSON pointers this view reads, for the unused-key guard.
    pub fn consumed_pointers(&self) -> Vec<&'static str> {
        let mut out = vec![
            "/fund",
            "/storage/backend",
            "/replication/secondary_timeout_ms",
        ];
        match &self.storage {
            StorageConfig::File { .. } => out.extend([
                "/storage/local_dir",
                "/storage/mirror/database_url_env",
                "/storage/mirror/timeout_ms",
                "/storage/mirror/max_connections",
            ]),
            StorageConfig::Database { .. } => out.extend([
                "/storage/remote/database_url_env",
                "/storage/remote/timeout_ms",
                "/storage/remote/max_connections",
                "/storage/mirror_dir",
            ]),
            StorageConfig::Memory => {}
        }
        out
    }
}

fn is_env_var_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
