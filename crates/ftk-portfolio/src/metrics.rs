use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::checked;
use crate::error::TradeError;
use crate::lots::LotTracker;
use crate::types::{MarkMap, PortfolioPosition, PortfolioSnapshot};

/// Derive a position view from one tracker.
///
/// unrealized = Σ (mark - unit_cost) * shares_remaining over the open lots,
/// which equals market_value - cost_basis. A mark too large to value the
/// position is a validation error on `mark`.
pub fn position_from_tracker(
    tracker: &LotTracker,
    mark: Option<Decimal>,
) -> Result<PortfolioPosition, TradeError> {
    let shares = tracker.total_remaining_shares();
    let cost_basis = tracker.total_cost_basis();
    let market_value = mark.map(|px| checked::mul("mark", px, shares)).transpose()?;
    let unrealized_pnl = market_value
        .map(|mv| checked::sub("mark", mv, cost_basis))
        .transpose()?;

    Ok(PortfolioPosition {
        ticker: tracker.ticker().to_string(),
        shares,
        avg_cost: tracker.average_cost(),
        cost_basis,
        current_price: mark,
        market_value,
        unrealized_pnl,
    })
}

/// Open positions in ticker order. Flat trackers are skipped.
pub fn compute_positions(
    trackers: &BTreeMap<String, LotTracker>,
    marks: &MarkMap,
) -> Result<Vec<PortfolioPosition>, TradeError> {
    trackers
        .values()
        .filter(|t| !t.is_empty())
        .map(|t| position_from_tracker(t, marks.get(t.ticker()).copied()))
        .collect()
}

/// Unrealized P&L over every marked open position. Unmarked tickers contribute 0.
pub fn compute_unrealized_pnl(
    trackers: &BTreeMap<String, LotTracker>,
    marks: &MarkMap,
) -> Result<Decimal, TradeError> {
    let positions = compute_positions(trackers, marks)?;
    checked::sum("mark", positions.iter().filter_map(|p| p.unrealized_pnl))
}

/// Assemble a snapshot from positions and the realized total.
pub fn build_snapshot(
    positions: Vec<PortfolioPosition>,
    total_realized_pnl: Decimal,
    as_of: DateTime<Utc>,
) -> Result<PortfolioSnapshot, TradeError> {
    let total_cost_basis = checked::sum("notional", positions.iter().map(|p| p.cost_basis))?;
    let total_market_value = checked::sum("mark", positions.iter().filter_map(|p| p.market_value))?;
    let total_unrealized_pnl =
        checked::sum("mark", positions.iter().filter_map(|p| p.unrealized_pnl))?;

    Ok(PortfolioSnapshot {
        snapshot_id: Uuid::new_v4(),
        as_of,
        positions,
        total_cost_basis,
        total_market_value,
        total_unrealized_pnl,
        total_realized_pnl,
    })
}
