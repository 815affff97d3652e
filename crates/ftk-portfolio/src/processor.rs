//! FIFO trade processor: the single authority that turns trades into lot
//! mutations and realized P&L.
//!
//! # Staging
//! Every trade goes through two steps:
//!
//! 1. [`FifoTradeProcessor::stage`] validates the trade and matches it against a
//!    *clone* of the ticker's tracker. Nothing owned by the processor changes.
//! 2. [`FifoTradeProcessor::commit`] installs the staged tracker and records the
//!    disposal.
//!
//! Callers that must persist before mutating (the dual-write repository) stage,
//! write, then commit. In-memory callers use `execute_buy` / `execute_sell`,
//! which do both at once.
//!
//! # Determinism
//! Pure and deterministic: no IO, no clock. Two processors fed the same trades
//! in the same order hold identical state.

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::checked;
use crate::error::TradeError;
use crate::lots::LotTracker;
use crate::metrics::{build_snapshot, compute_positions, compute_unrealized_pnl};
use crate::summary::{summarize_disposals, try_summarize_disposals, RealizedPnlSummary};
use crate::types::{
    MarkMap, NewTrade, PortfolioPosition, PortfolioSnapshot, RealizedDisposal, Trade, TradeAction,
    TradeId,
};

/// A validated trade whose effect has been computed but not applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedTrade {
    trade: Trade,
    tracker_after: LotTracker,
    disposal: Option<RealizedDisposal>,
}

impl StagedTrade {
    pub fn trade(&self) -> &Trade {
        &self.trade
    }

    /// Present for SELL trades only.
    pub fn disposal(&self) -> Option<&RealizedDisposal> {
        self.disposal.as_ref()
    }

    /// Open shares the ticker will hold once committed.
    pub fn shares_after(&self) -> Decimal {
        self.tracker_after.total_remaining_shares()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FifoTradeProcessor {
    trackers: BTreeMap<String, LotTracker>,
    disposals: Vec<RealizedDisposal>,
}

impl FifoTradeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from a stored trade history, in the given order.
    ///
    /// Stops at the first trade the accounting rules reject; a history that
    /// cannot be replayed is corrupt and must not be silently truncated.
    pub fn replay<'a, I>(trades: I) -> Result<Self, TradeError>
    where
        I: IntoIterator<Item = &'a Trade>,
    {
        let mut p = Self::new();
        for trade in trades {
            let staged = p.stage(trade.to_new_trade(), trade.trade_id)?;
            p.commit(staged);
        }
        Ok(p)
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Validate and match a trade without mutating the processor.
    pub fn stage(&self, new: NewTrade, trade_id: TradeId) -> Result<StagedTrade, TradeError> {
        let new = Self::validate(new)?;
        let trade = new.into_trade(trade_id);

        match trade.action {
            TradeAction::Buy => {
                let mut tracker = self
                    .trackers
                    .get(&trade.ticker)
                    .cloned()
                    .unwrap_or_else(|| LotTracker::new(trade.ticker.clone()));
                tracker.add_lot(trade.shares, trade.price, trade.timestamp)?;
                self.check_open_cost(&tracker)?;
                Ok(StagedTrade {
                    trade,
                    tracker_after: tracker,
                    disposal: None,
                })
            }
            TradeAction::Sell => {
                let mut tracker = match self.trackers.get(&trade.ticker) {
                    Some(t) if !t.is_empty() => t.clone(),
                    _ => {
                        return Err(TradeError::NoOpenPosition {
                            ticker: trade.ticker,
                        })
                    }
                };
                let slices = tracker.consume(trade.shares)?;

                let mut matched_cost = Decimal::ZERO;
                let mut realized_pnl = Decimal::ZERO;
                for s in &slices {
                    let cost = checked::mul("notional", s.unit_cost, s.shares_taken)?;
                    let pnl = checked::mul("notional", trade.price - s.unit_cost, s.shares_taken)?;
                    matched_cost = checked::add("notional", matched_cost, cost)?;
                    realized_pnl = checked::add("realized_pnl", realized_pnl, pnl)?;
                }

                let disposal = RealizedDisposal {
                    trade_id: trade.trade_id,
                    ticker: trade.ticker.clone(),
                    sold_at: trade.timestamp,
                    sell_price: trade.price,
                    matched_shares: trade.shares,
                    matched_cost,
                    proceeds: checked::mul("notional", trade.price, trade.shares)?,
                    realized_pnl,
                    slices,
                };
                self.check_realized_totals(&disposal)?;
                Ok(StagedTrade {
                    trade,
                    tracker_after: tracker,
                    disposal: Some(disposal),
                })
            }
        }
    }

    /// Apply a staged trade.
    ///
    /// Staged trades must be committed in the order they were staged; staging
    /// two trades on the same ticker and committing both loses the first.
    pub fn commit(&mut self, staged: StagedTrade) -> (Trade, Option<RealizedDisposal>) {
        let StagedTrade {
            trade,
            tracker_after,
            disposal,
        } = staged;

        self.trackers.insert(trade.ticker.clone(), tracker_after);
        if let Some(d) = &disposal {
            self.disposals.push(d.clone());
        }
        (trade, disposal)
    }

    pub fn execute_buy(
        &mut self,
        ticker: &str,
        shares: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Trade, TradeError> {
        let staged = self.stage(
            NewTrade::buy(ticker, shares, price, timestamp),
            Uuid::new_v4(),
        )?;
        Ok(self.commit(staged).0)
    }

    pub fn execute_sell(
        &mut self,
        ticker: &str,
        shares: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<(Trade, RealizedDisposal), TradeError> {
        let staged = self.stage(
            NewTrade::sell(ticker, shares, price, timestamp),
            Uuid::new_v4(),
        )?;
        match self.commit(staged) {
            (trade, Some(disposal)) => Ok((trade, disposal)),
            // stage() always attaches a disposal to a SELL.
            (trade, None) => Err(TradeError::NoOpenPosition {
                ticker: trade.ticker,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    pub fn tracker(&self, ticker: &str) -> Option<&LotTracker> {
        self.trackers.get(ticker)
    }

    pub fn trackers(&self) -> &BTreeMap<String, LotTracker> {
        &self.trackers
    }

    pub fn disposals(&self) -> &[RealizedDisposal] {
        &self.disposals
    }

    /// Open shares for a ticker (0 if unknown or flat).
    pub fn open_shares(&self, ticker: &str) -> Decimal {
        self.trackers
            .get(ticker)
            .map(LotTracker::total_remaining_shares)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn get_realized_pnl_summary(&self, ticker: Option<&str>) -> RealizedPnlSummary {
        summarize_disposals(&self.disposals, ticker)
    }

    /// Fails only when a mark is too large to value its position.
    pub fn positions(&self, marks: &MarkMap) -> Result<Vec<PortfolioPosition>, TradeError> {
        compute_positions(&self.trackers, marks)
    }

    pub fn unrealized_pnl(&self, marks: &MarkMap) -> Result<Decimal, TradeError> {
        compute_unrealized_pnl(&self.trackers, marks)
    }

    pub fn snapshot(
        &self,
        marks: &MarkMap,
        as_of: DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, TradeError> {
        build_snapshot(
            self.positions(marks)?,
            self.get_realized_pnl_summary(None).total_realized_pnl,
            as_of,
        )
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn validate(mut new: NewTrade) -> Result<NewTrade, TradeError> {
        new.ticker = new.ticker.trim().to_ascii_uppercase();
        if new.ticker.is_empty() {
            return Err(TradeError::validation("ticker", "must not be empty"));
        }
        if new.shares <= Decimal::ZERO {
            return Err(TradeError::validation(
                "shares",
                format!("must be > 0, got {}", new.shares),
            ));
        }
        if new.price < Decimal::ZERO {
            return Err(TradeError::validation(
                "price",
                format!("must be >= 0, got {}", new.price),
            ));
        }
        if new.currency.trim().is_empty() {
            return Err(TradeError::validation("currency", "must not be empty"));
        }
        checked::mul("notional", new.shares, new.price)?;
        // Microsecond precision is what every store can hold.
        new.timestamp = new.timestamp.trunc_subsecs(6);
        Ok(new)
    }

    /// Portfolio-wide open cost basis must stay representable with
    /// `tracker_after` installed.
    fn check_open_cost(&self, tracker_after: &LotTracker) -> Result<(), TradeError> {
        let others = self
            .trackers
            .values()
            .filter(|t| t.ticker() != tracker_after.ticker())
            .map(LotTracker::total_cost_basis);
        checked::sum(
            "notional",
            others.chain(std::iter::once(tracker_after.total_cost_basis())),
        )?;
        Ok(())
    }

    /// Realized totals, per ticker and overall, must stay representable with
    /// `disposal` appended.
    fn check_realized_totals(&self, disposal: &RealizedDisposal) -> Result<(), TradeError> {
        let all = || self.disposals.iter().chain(std::iter::once(disposal));
        try_summarize_disposals(all(), Some(disposal.ticker.as_str()))?;
        try_summarize_disposals(all(), None)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, day, 14, 0, 0).unwrap()
    }

    // --- Validation ---

    #[test]
    fn rejects_empty_ticker() {
        let mut p = FifoTradeProcessor::new();
        let err = p.execute_buy("  ", dec!(1), dec!(1), t(1)).unwrap_err();
        assert!(matches!(err, TradeError::Validation { field: "ticker", .. }));
        assert!(p.trackers().is_empty());
    }

    #[test]
    fn rejects_zero_shares() {
        let mut p = FifoTradeProcessor::new();
        let err = p.execute_buy("AAPL", dec!(0), dec!(1), t(1)).unwrap_err();
        assert!(matches!(err, TradeError::Validation { field: "shares", .. }));
    }

    #[test]
    fn rejects_negative_price() {
        let mut p = FifoTradeProcessor::new();
        let err = p.execute_buy("AAPL", dec!(1), dec!(-1), t(1)).unwrap_err();
        assert!(matches!(err, TradeError::Validation { field: "price", .. }));
    }

    #[test]
    fn rejects_empty_currency() {
        let p = FifoTradeProcessor::new();
        let new = NewTrade::buy("AAPL", dec!(1), dec!(1), t(1)).with_currency("");
        let err = p.stage(new, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, TradeError::Validation { field: "currency", .. }));
    }

    #[test]
    fn invalid_sell_is_validation_not_position_error() {
        let mut p = FifoTradeProcessor::new();
        let err = p.execute_sell("AAPL", dec!(-5), dec!(1), t(1)).unwrap_err();
        assert!(matches!(err, TradeError::Validation { field: "shares", .. }));
    }

    #[test]
    fn ticker_is_normalized() {
        let mut p = FifoTradeProcessor::new();
        let trade = p.execute_buy(" aapl ", dec!(1), dec!(1), t(1)).unwrap();
        assert_eq!(trade.ticker, "AAPL");
        assert_eq!(p.open_shares("AAPL"), dec!(1));
    }

    // --- Staging ---

    #[test]
    fn stage_does_not_mutate() {
        let mut p = FifoTradeProcessor::new();
        p.execute_buy("AAPL", dec!(10), dec!(100), t(1)).unwrap();
        let before = p.clone();

        let staged = p
            .stage(NewTrade::sell("AAPL", dec!(4), dec!(110), t(2)), Uuid::new_v4())
            .unwrap();
        assert_eq!(staged.shares_after(), dec!(6));
        assert_eq!(staged.disposal().unwrap().realized_pnl, dec!(40));
        assert_eq!(p, before);

        p.commit(staged);
        assert_eq!(p.open_shares("AAPL"), dec!(6));
        assert_eq!(p.disposals().len(), 1);
    }

    #[test]
    fn staged_trade_keeps_supplied_id() {
        let p = FifoTradeProcessor::new();
        let id = Uuid::new_v4();
        let staged = p
            .stage(NewTrade::buy("AAPL", dec!(1), dec!(1), t(1)), id)
            .unwrap();
        assert_eq!(staged.trade().trade_id, id);
        assert!(staged.disposal().is_none());
    }

    // --- Sell semantics ---

    #[test]
    fn sell_after_full_close_is_no_open_position() {
        let mut p = FifoTradeProcessor::new();
        p.execute_buy("TSLA", dec!(10), dec!(200), t(1)).unwrap();
        p.execute_sell("TSLA", dec!(10), dec!(210), t(2)).unwrap();

        let err = p.execute_sell("TSLA", dec!(1), dec!(210), t(3)).unwrap_err();
        assert_eq!(
            err,
            TradeError::NoOpenPosition {
                ticker: "TSLA".to_string()
            }
        );
    }

    #[test]
    fn loss_is_negative_realized() {
        let mut p = FifoTradeProcessor::new();
        p.execute_buy("AAPL", dec!(10), dec!(100), t(1)).unwrap();
        let (_, d) = p.execute_sell("AAPL", dec!(10), dec!(90), t(2)).unwrap();
        assert_eq!(d.realized_pnl, dec!(-100));
        assert_eq!(d.matched_cost, dec!(1000));
        assert_eq!(d.proceeds, dec!(900));
    }

    #[test]
    fn disposal_breakdown_lists_lots_oldest_first() {
        let mut p = FifoTradeProcessor::new();
        p.execute_buy("AAPL", dec!(3), dec!(10), t(1)).unwrap();
        p.execute_buy("AAPL", dec!(3), dec!(20), t(2)).unwrap();
        let (_, d) = p.execute_sell("AAPL", dec!(4), dec!(30), t(3)).unwrap();

        assert_eq!(d.slices.len(), 2);
        assert_eq!(d.slices[0].unit_cost, dec!(10));
        assert_eq!(d.slices[0].shares_taken, dec!(3));
        assert_eq!(d.slices[1].unit_cost, dec!(20));
        assert_eq!(d.slices[1].shares_taken, dec!(1));
        // (30-10)*3 + (30-20)*1 = 70
        assert_eq!(d.realized_pnl, dec!(70));
    }

    // --- Replay ---

    #[test]
    fn replay_matches_incremental_state() {
        let mut p = FifoTradeProcessor::new();
        let mut history = Vec::new();
        history.push(p.execute_buy("AAPL", dec!(10), dec!(100), t(1)).unwrap());
        history.push(p.execute_buy("MSFT", dec!(4), dec!(300), t(2)).unwrap());
        history.push(p.execute_buy("AAPL", dec!(10), dec!(110), t(3)).unwrap());
        history.push(p.execute_sell("AAPL", dec!(15), dec!(120), t(4)).unwrap().0);

        let replayed = FifoTradeProcessor::replay(&history).unwrap();
        assert_eq!(replayed, p);
    }

    #[test]
    fn replay_rejects_corrupt_history() {
        let mut p = FifoTradeProcessor::new();
        let (sell, _) = {
            p.execute_buy("AAPL", dec!(1), dec!(1), t(1)).unwrap();
            p.execute_sell("AAPL", dec!(1), dec!(1), t(2)).unwrap()
        };
        // A history holding only the SELL cannot be replayed.
        let err = FifoTradeProcessor::replay([&sell]).unwrap_err();
        assert!(matches!(err, TradeError::NoOpenPosition { .. }));
    }

    // --- Read surface ---

    #[test]
    fn summary_is_idempotent() {
        let mut p = FifoTradeProcessor::new();
        p.execute_buy("AAPL", dec!(10), dec!(100), t(1)).unwrap();
        p.execute_sell("AAPL", dec!(5), dec!(120), t(2)).unwrap();

        let a = p.get_realized_pnl_summary(None);
        let b = p.get_realized_pnl_summary(None);
        assert_eq!(a, b);
        assert_eq!(a.average_sell_price, dec!(120));
    }

    #[test]
    fn snapshot_carries_realized_total() {
        let mut p = FifoTradeProcessor::new();
        p.execute_buy("AAPL", dec!(10), dec!(100), t(1)).unwrap();
        p.execute_sell("AAPL", dec!(5), dec!(120), t(2)).unwrap();

        let marks = crate::marks([("AAPL", dec!(110))]);
        let snap = p.snapshot(&marks, t(3)).unwrap();
        assert_eq!(snap.total_realized_pnl, dec!(100));
        assert_eq!(snap.total_unrealized_pnl, dec!(50));
        assert_eq!(snap.position("AAPL").unwrap().shares, dec!(5));
    }

    // --- Overflow ---

    #[test]
    fn buys_that_overflow_open_shares_are_rejected() {
        let big = dec!(50000000000000000000000000000);
        let mut p = FifoTradeProcessor::new();
        p.execute_buy("AAPL", big, dec!(0), t(1)).unwrap();
        let before = p.clone();

        let err = p.execute_buy("AAPL", big, dec!(0), t(2)).unwrap_err();
        assert!(matches!(err, TradeError::Validation { field: "shares", .. }));
        assert_eq!(p, before);

        let (_, d) = p.execute_sell("AAPL", dec!(1), dec!(0), t(3)).unwrap();
        assert_eq!(d.realized_pnl, dec!(0));
        assert!(p.positions(&MarkMap::new()).is_ok());
    }

    #[test]
    fn open_cost_across_tickers_must_fit() {
        let big = dec!(50000000000000000000000000000);
        let mut p = FifoTradeProcessor::new();
        p.execute_buy("AAPL", dec!(1), big, t(1)).unwrap();

        let err = p.execute_buy("MSFT", dec!(1), big, t(2)).unwrap_err();
        assert!(matches!(err, TradeError::Validation { field: "notional", .. }));
        assert!(p.tracker("MSFT").is_none());
        assert!(p.snapshot(&MarkMap::new(), t(3)).is_ok());
    }

    #[test]
    fn sell_that_overflows_realized_total_is_rejected() {
        let big = dec!(50000000000000000000000000000);
        let mut p = FifoTradeProcessor::new();
        p.execute_buy("AAPL", dec!(1), dec!(0), t(1)).unwrap();
        p.execute_sell("AAPL", dec!(1), big, t(2)).unwrap();
        p.execute_buy("AAPL", dec!(1), dec!(0), t(3)).unwrap();
        let before = p.clone();

        let err = p.execute_sell("AAPL", dec!(1), big, t(4)).unwrap_err();
        assert!(matches!(err, TradeError::Validation { .. }));
        assert_eq!(p, before);
        assert_eq!(p.get_realized_pnl_summary(None).total_realized_pnl, big);
    }
}
