use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ftk_portfolio::{RealizedDisposal, Trade};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// One line of the trade log: a trade, its disposal for a SELL, and the
/// hash chain linking it to the previous line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Zero-based position in the log.
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub trade: Trade,
    pub disposal: Option<RealizedDisposal>,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

impl TradeRecord {
    /// Build the next record and seal it into the chain after `prev`.
    pub fn sealed(
        seq: u64,
        trade: Trade,
        disposal: Option<RealizedDisposal>,
        prev: Option<String>,
    ) -> Result<Self> {
        let mut rec = TradeRecord {
            seq,
            recorded_at: Utc::now(),
            trade,
            disposal,
            hash_prev: prev,
            hash_self: None,
        };
        rec.hash_self = Some(compute_record_hash(&rec)?);
        Ok(rec)
    }
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
pub(crate) fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize ledger record failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// SHA-256 over the canonical JSON of the record WITHOUT `hash_self`.
pub fn compute_record_hash(rec: &TradeRecord) -> Result<String> {
    let mut clone = rec.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyResult {
    Valid { lines: usize },
    /// The chain is broken at the given 1-based line.
    Broken { line: usize, reason: String },
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid { .. })
    }
}

/// Verify the trade log at `path`. A missing file is an empty, valid log.
pub fn verify_trade_log(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(VerifyResult::Valid { lines: 0 });
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("read trade log {:?}", path))?;
    verify_trade_log_str(&content)
}

/// Same checks as [`verify_trade_log`] over in-memory JSONL content.
///
/// Checks, per line: it parses, `hash_prev` links to the previous
/// `hash_self`, `hash_self` matches the content, and `seq` is contiguous.
pub fn verify_trade_log_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut expected_seq = 0u64;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let rec: TradeRecord = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("unparseable record: {e}"),
                })
            }
        };

        if rec.seq != expected_seq {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!("seq gap: expected {expected_seq}, got {}", rec.seq),
            });
        }

        if rec.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, rec.hash_prev
                ),
            });
        }

        let recomputed = compute_record_hash(&rec)?;
        match &rec.hash_self {
            Some(claimed) if *claimed == recomputed => {}
            claimed => {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!(
                        "hash_self mismatch: claimed {:?}, recomputed {}",
                        claimed, recomputed
                    ),
                })
            }
        }

        prev_hash = rec.hash_self;
        expected_seq += 1;
    }

    Ok(VerifyResult::Valid {
        lines: expected_seq as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftk_portfolio::NewTrade;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn chain(n: u64) -> Vec<TradeRecord> {
        let mut prev = None;
        let mut out = Vec::new();
        for seq in 0..n {
            let t = NewTrade::buy("AAPL", dec!(1), dec!(10.50), Utc::now())
                .into_trade(Uuid::new_v4());
            let rec = TradeRecord::sealed(seq, t, None, prev).unwrap();
            prev = rec.hash_self.clone();
            out.push(rec);
        }
        out
    }

    fn render(recs: &[TradeRecord]) -> String {
        recs.iter()
            .map(|r| canonical_json_line(r).unwrap() + "\n")
            .collect()
    }

    #[test]
    fn canonical_line_sorts_keys() {
        let line = canonical_json_line(&serde_json::json!({"b": 1, "a": {"d": 2, "c": 3}})).unwrap();
        assert_eq!(line, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn sealed_chain_verifies() {
        let content = render(&chain(4));
        assert_eq!(
            verify_trade_log_str(&content).unwrap(),
            VerifyResult::Valid { lines: 4 }
        );
    }

    #[test]
    fn dropped_line_is_detected() {
        let mut recs = chain(3);
        recs.remove(1);
        let r = verify_trade_log_str(&render(&recs)).unwrap();
        assert!(matches!(r, VerifyResult::Broken { line: 2, .. }), "{r:?}");
    }

    #[test]
    fn garbage_line_is_broken_not_error() {
        let mut content = render(&chain(1));
        content.push_str("{not json\n");
        let r = verify_trade_log_str(&content).unwrap();
        assert!(matches!(r, VerifyResult::Broken { line: 2, .. }), "{r:?}");
    }
}
