//! Per-ticker FIFO lot queue.
//!
//! Rules:
//! - BUY appends a lot; lots are never merged, even at identical prices, so each
//!   acquisition timestamp survives for audit.
//! - SELL drains lots head-to-tail; a fully drained lot is popped, a partially
//!   drained lot stays as the new head.
//! - Availability is checked before anything is touched: a failed `consume`
//!   leaves the queue exactly as it was.
//! - Open shares and open cost basis always fit in a `Decimal`; `add_lot`
//!   rejects a lot that would push either past the representable range.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::checked;
use crate::error::TradeError;
use crate::types::{Lot, LotSlice};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotTracker {
    ticker: String,
    /// Oldest acquisition first.
    lots: VecDeque<Lot>,
}

impl LotTracker {
    pub fn new<S: Into<String>>(ticker: S) -> Self {
        Self {
            ticker: ticker.into(),
            lots: VecDeque::new(),
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    /// Open a new lot.
    ///
    /// A lot timestamped at or after the current tail is appended. A backdated
    /// lot is placed after every lot acquired at or before its timestamp, so the
    /// queue stays in acquisition order.
    pub fn add_lot(
        &mut self,
        shares: Decimal,
        unit_cost: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<(), TradeError> {
        if shares <= Decimal::ZERO {
            return Err(TradeError::validation(
                "shares",
                format!("must be > 0, got {shares}"),
            ));
        }
        if unit_cost < Decimal::ZERO {
            return Err(TradeError::validation(
                "price",
                format!("must be >= 0, got {unit_cost}"),
            ));
        }

        // Open totals are summed with plain `+` on every read; they must fit now.
        let cost = checked::mul("notional", shares, unit_cost)?;
        checked::add("shares", self.total_remaining_shares(), shares)?;
        checked::add("notional", self.total_cost_basis(), cost)?;

        let lot = Lot::new(shares, unit_cost, timestamp);
        match self.lots.back() {
            Some(tail) if tail.acquired_at > timestamp => {
                let at = self
                    .lots
                    .iter()
                    .position(|l| l.acquired_at > timestamp)
                    .unwrap_or(self.lots.len());
                self.lots.insert(at, lot);
            }
            _ => self.lots.push_back(lot),
        }
        Ok(())
    }

    /// Match `shares_to_sell` against the open lots without mutating anything.
    pub fn preview_consume(&self, shares_to_sell: Decimal) -> Result<Vec<LotSlice>, TradeError> {
        self.check_available(shares_to_sell)?;

        let mut remaining = shares_to_sell;
        let mut slices = Vec::new();
        for lot in &self.lots {
            if remaining.is_zero() {
                break;
            }
            let taken = lot.shares_remaining.min(remaining);
            slices.push(LotSlice {
                unit_cost: lot.unit_cost,
                shares_taken: taken,
                acquired_at: lot.acquired_at,
            });
            remaining -= taken;
        }
        Ok(slices)
    }

    /// Consume shares FIFO and return the slices taken, oldest lot first.
    pub fn consume(&mut self, shares_to_sell: Decimal) -> Result<Vec<LotSlice>, TradeError> {
        let slices = self.preview_consume(shares_to_sell)?;

        for slice in &slices {
            // preview_consume walked the same queue, so a head always exists here.
            let Some(head) = self.lots.front_mut() else {
                break;
            };
            head.shares_remaining -= slice.shares_taken;
            if head.shares_remaining.is_zero() {
                self.lots.pop_front();
            }
        }
        Ok(slices)
    }

    pub fn total_remaining_shares(&self) -> Decimal {
        self.lots.iter().map(|l| l.shares_remaining).sum()
    }

    pub fn total_cost_basis(&self) -> Decimal {
        self.lots.iter().map(Lot::cost_basis).sum()
    }

    /// Weighted average unit cost of the open lots (0 when flat).
    pub fn average_cost(&self) -> Decimal {
        let shares = self.total_remaining_shares();
        if shares.is_zero() {
            return Decimal::ZERO;
        }
        self.total_cost_basis() / shares
    }

    pub fn lots(&self) -> impl ExactSizeIterator<Item = &Lot> {
        self.lots.iter()
    }

    pub fn lot_count(&self) -> usize {
        self.lots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    fn check_available(&self, shares_to_sell: Decimal) -> Result<(), TradeError> {
        if shares_to_sell <= Decimal::ZERO {
            return Err(TradeError::validation(
                "shares",
                format!("must be > 0, got {shares_to_sell}"),
            ));
        }
        let available = self.total_remaining_shares();
        if shares_to_sell > available {
            return Err(TradeError::InsufficientShares {
                ticker: self.ticker.clone(),
                requested: shares_to_sell,
                available,
            });
        }
        Ok(())
    }
}
