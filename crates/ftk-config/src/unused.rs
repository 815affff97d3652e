//! Unused-key guard.
//!
//! "Consumed pointers" are JSON Pointer prefixes. A leaf under any consumed
//! prefix is consumed; any other leaf is unused. The consumed set comes from
//! the typed view that read the config (`LedgerConfig::consumed_pointers`),
//! so it reflects what the code actually reads, per storage backend.

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Consumed JSON-pointer prefixes used for this analysis (sorted, unique).
    pub consumed_prefixes: Vec<String>,
    /// Unused leaf pointers (sorted).
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Produce an unused-key report.
/// If `policy == Fail`, returns an error when unused keys exist.
pub fn report_unused_keys(
    config_json: &Value,
    consumed: &[&str],
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let consumed_prefixes: BTreeSet<String> = consumed.iter().map(|p| as_pointer(p)).collect();

    let unused: BTreeSet<String> = leaves(config_json)
        .into_iter()
        .map(|(pointer, _)| pointer)
        .filter(|leaf| !consumed_prefixes.iter().any(|p| consumes(p, leaf)))
        .collect();

    let report = UnusedKeyReport {
        consumed_prefixes: consumed_prefixes.into_iter().collect(),
        unused_leaf_pointers: unused.into_iter().collect(),
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        let shown: Vec<&str> = report
            .unused_leaf_pointers
            .iter()
            .take(12)
            .map(String::as_str)
            .collect();
        bail!(
            "CONFIG_UNUSED_KEYS: {} config key(s) nothing reads; remove them or fix \
             their spelling: {shown:?}",
            report.unused_leaf_pointers.len(),
        );
    }

    Ok(report)
}

/// `storage/mirror/` and `/storage/mirror` are the same pointer.
fn as_pointer(p: &str) -> String {
    format!("/{}", p.trim().trim_matches('/'))
}

/// A prefix consumes itself and everything below it, segment-wise:
/// `/storage/mirror` covers `/storage/mirror/timeout_ms` but not `/storage/mirror_dir`.
fn consumes(prefix: &str, leaf: &str) -> bool {
    prefix == "/"
        || leaf
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Every scalar in `v` with its JSON pointer, in key order. Empty objects and
/// arrays contribute nothing.
pub(crate) fn leaves(v: &Value) -> Vec<(String, &Value)> {
    fn walk<'v>(v: &'v Value, path: &mut Vec<String>, out: &mut Vec<(String, &'v Value)>) {
        let children: Vec<(String, &Value)> = match v {
            Value::Object(map) => map
                .iter()
                .map(|(k, c)| (k.replace('~', "~0").replace('/', "~1"), c))
                .collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, c)| (i.to_string(), c))
                .collect(),
            scalar => {
                out.push((format!("/{}", path.join("/")), scalar));
                return;
            }
        };
        for (segment, child) in children {
            path.push(segment);
            walk(child, path, out);
            path.pop();
        }
    }

    let mut out = Vec::new();
    walk(v, &mut Vec::new(), &mut out);
    out
}
