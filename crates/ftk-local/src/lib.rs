//! ftk-local
//!
//! Local JSON-lines ledger store:
//! - One directory per fund
//! - Trade log is append-only and SHA-256 hash chained (tamper evident)
//! - Trade and disposal share one line, so a SELL lands atomically
//! - Canonical JSON (sorted keys) so hashes are stable across writers

mod chain;
mod store;

pub use chain::{
    compute_record_hash, verify_trade_log, verify_trade_log_str, TradeRecord, VerifyResult,
};
pub use store::{LocalFileStore, SNAPSHOTS_FILE, TRADES_FILE, WRITE_SKEW_FILE};
