//! Persistence boundary for ledger backends.
//!
//! This module defines **only** the store trait and the rows it moves. No
//! accounting, no replication policy: a store persists what it is handed and
//! returns it in insertion order. The dual-write repository owns everything else.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ftk_portfolio::{PortfolioSnapshot, RealizedDisposal, Trade};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which kind of row a mirrored write carried.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MirrorKind {
    /// A trade row, plus its disposal for a SELL.
    Trade,
    Snapshot,
}

impl MirrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorKind::Trade => "TRADE",
            MirrorKind::Snapshot => "SNAPSHOT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRADE" => Some(MirrorKind::Trade),
            "SNAPSHOT" => Some(MirrorKind::Snapshot),
            _ => None,
        }
    }
}

impl fmt::Display for MirrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence that a write acknowledged by the primary did not reach the secondary.
///
/// Stored on the primary so the gap survives restarts and can be replayed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSkewMarker {
    /// Trade id for [`MirrorKind::Trade`], snapshot id for [`MirrorKind::Snapshot`].
    pub row_id: Uuid,
    pub kind: MirrorKind,
    pub ticker: Option<String>,
    /// Name of the store that missed the write.
    pub store: String,
    pub recorded_at: DateTime<Utc>,
    pub error: String,
}

/// Ledger persistence contract.
///
/// Implementations must be object-safe (`Arc<dyn LedgerStore>`) and
/// `Send + Sync` so they can be shared across async tasks.
///
/// Writes are idempotent by id: recording a trade or snapshot whose id is
/// already stored is a no-op. Replaying a write-skew gap relies on this.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Short stable name used in logs and markers (e.g. `"local"`, `"postgres"`).
    fn name(&self) -> &'static str;

    /// Persist a trade and, for a SELL, its disposal as one unit.
    async fn record_trade(&self, trade: &Trade, disposal: Option<&RealizedDisposal>)
        -> Result<()>;

    /// Trades in insertion order, optionally filtered by ticker.
    async fn get_trade_history(&self, ticker: Option<&str>) -> Result<Vec<Trade>>;

    /// Disposals in insertion order, optionally filtered by ticker.
    async fn get_realized_disposals(&self, ticker: Option<&str>) -> Result<Vec<RealizedDisposal>>;

    async fn save_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()>;

    /// Snapshots in insertion order.
    async fn get_portfolio_data(&self) -> Result<Vec<PortfolioSnapshot>>;

    async fn get_latest_portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>> {
        Ok(self.get_portfolio_data().await?.pop())
    }

    async fn record_write_skew(&self, marker: &WriteSkewMarker) -> Result<()>;

    /// Close every open marker for `(row_id, kind)`.
    async fn resolve_write_skew(&self, row_id: Uuid, kind: MirrorKind) -> Result<()>;

    /// Open (unresolved) markers in the order they were recorded.
    async fn get_write_skew_markers(&self) -> Result<Vec<WriteSkewMarker>>;

    /// Cheap reachability probe. Never errors; unreachable is `false`.
    async fn test_connection(&self) -> bool;
}

/// Normalize a caller-supplied ticker filter the same way trades are normalized.
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_ascii_uppercase()
}
