//! Database URL resolution.
//!
//! Config stores only the env var NAME. The URL is read once at startup and
//! passed to constructors; errors mention the NAME, never the value, and the
//! resolved value is redacted in `Debug`.

use anyhow::{bail, Result};

use crate::RemoteConfig;

#[derive(Clone)]
pub struct ResolvedDatabaseUrl {
    pub env_var: String,
    url: String,
}

impl ResolvedDatabaseUrl {
    pub fn expose(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for ResolvedDatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedDatabaseUrl")
            .field("env_var", &self.env_var)
            .field("url", &"<REDACTED>")
            .finish()
    }
}

/// Read the URL named by `remote.database_url_env`.
pub fn resolve_database_url(remote: &RemoteConfig) -> Result<ResolvedDatabaseUrl> {
    match std::env::var(&remote.database_url_env) {
        Ok(v) if !v.trim().is_empty() => Ok(ResolvedDatabaseUrl {
            env_var: remote.database_url_env.clone(),
            url: v.trim().to_string(),
        }),
        _ => bail!(
            "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
            remote.database_url_env
        ),
    }
}
