//! ftk-portfolio
//!
//! Trade-ledger accounting core:
//! - Trades are the source of truth; lots and P&L are derived from them
//! - FIFO lot tracking per ticker (no shorting, no lot merging)
//! - Realized P&L per SELL, with a per-lot breakdown
//! - Positions, unrealized P&L and snapshots against caller-supplied marks
//! - Decimal arithmetic end to end; binary floating point never enters
//! - Pure deterministic logic (no IO, no clock, no store wiring)

mod checked;
mod error;
mod lots;
mod metrics;
mod processor;
mod summary;
mod types;

pub use error::TradeError;
pub use lots::LotTracker;
pub use metrics::{build_snapshot, compute_positions, compute_unrealized_pnl, position_from_tracker};
pub use processor::{FifoTradeProcessor, StagedTrade};
pub use summary::{summarize_disposals, RealizedPnlSummary};
pub use types::{
    Lot, LotSlice, MarkMap, NewTrade, PortfolioPosition, PortfolioSnapshot, RealizedDisposal,
    Trade, TradeAction, TradeId,
};

pub use rust_decimal::Decimal;

/// Helper to build a MarkMap with minimal boilerplate.
pub fn marks<I, S>(items: I) -> MarkMap
where
    I: IntoIterator<Item = (S, Decimal)>,
    S: Into<String>,
{
    let mut m = MarkMap::new();
    for (ticker, px) in items {
        m.insert(ticker.into(), px);
    }
    m
}
