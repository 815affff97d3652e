use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::checked;
use crate::error::TradeError;
use crate::types::RealizedDisposal;

/// Realized P&L aggregated over one ticker or the whole ledger.
///
/// Always derived from stored disposals, never kept as an independent
/// accumulator, so it cannot drift from the history it summarizes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealizedPnlSummary {
    pub total_realized_pnl: Decimal,
    pub total_shares_sold: Decimal,
    pub total_proceeds: Decimal,
    /// `total_proceeds / total_shares_sold`, 0 when nothing was sold.
    pub average_sell_price: Decimal,
    pub number_of_sales: usize,
}

/// Aggregate disposals, optionally filtered by ticker.
///
/// Sums run in history order. The processor refuses any SELL whose running
/// totals would leave the `Decimal` range, so on a ledger it produced the
/// saturating adds here never engage.
pub fn summarize_disposals(
    disposals: &[RealizedDisposal],
    ticker: Option<&str>,
) -> RealizedPnlSummary {
    accumulate(disposals, ticker, |_, a, b| Ok(a.saturating_add(b))).unwrap_or_default()
}

/// `summarize_disposals` that reports overflow instead of saturating.
pub(crate) fn try_summarize_disposals<'a, I>(
    disposals: I,
    ticker: Option<&str>,
) -> Result<RealizedPnlSummary, TradeError>
where
    I: IntoIterator<Item = &'a RealizedDisposal>,
{
    accumulate(disposals, ticker, checked::add)
}

fn accumulate<'a, I, F>(
    disposals: I,
    ticker: Option<&str>,
    add: F,
) -> Result<RealizedPnlSummary, TradeError>
where
    I: IntoIterator<Item = &'a RealizedDisposal>,
    F: Fn(&'static str, Decimal, Decimal) -> Result<Decimal, TradeError>,
{
    let mut out = RealizedPnlSummary::default();

    for d in disposals
        .into_iter()
        .filter(|d| ticker.map_or(true, |t| d.ticker == t))
    {
        out.total_realized_pnl = add("realized_pnl", out.total_realized_pnl, d.realized_pnl)?;
        out.total_shares_sold = add("shares", out.total_shares_sold, d.matched_shares)?;
        out.total_proceeds = add("notional", out.total_proceeds, d.proceeds)?;
        out.number_of_sales += 1;
    }

    if !out.total_shares_sold.is_zero() {
        out.average_sell_price = out
            .total_proceeds
            .checked_div(out.total_shares_sold)
            .unwrap_or(Decimal::ZERO);
    }
    Ok(out)
}
