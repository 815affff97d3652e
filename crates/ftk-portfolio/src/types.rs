use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to a trade once, by the write path, and shared by every store.
pub type TradeId = Uuid;

/// Canonical mark map type (ticker -> current price).
pub type MarkMap = BTreeMap<String, Decimal>;

/// BUY or SELL.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(TradeAction::Buy),
            "SELL" => Some(TradeAction::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied trade input. The id is assigned when the trade is recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTrade {
    pub ticker: String,
    pub action: TradeAction,
    pub shares: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub currency: String,
    pub notes: String,
}

impl NewTrade {
    pub fn buy<S: Into<String>>(
        ticker: S,
        shares: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(ticker, TradeAction::Buy, shares, price, timestamp)
    }

    pub fn sell<S: Into<String>>(
        ticker: S,
        shares: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(ticker, TradeAction::Sell, shares, price, timestamp)
    }

    pub fn new<S: Into<String>>(
        ticker: S,
        action: TradeAction,
        shares: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            action,
            shares,
            price,
            timestamp,
            currency: "USD".to_string(),
            notes: String::new(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn into_trade(self, trade_id: TradeId) -> Trade {
        Trade {
            trade_id,
            ticker: self.ticker,
            action: self.action,
            shares: self.shares,
            price: self.price,
            timestamp: self.timestamp,
            currency: self.currency,
            notes: self.notes,
        }
    }
}

/// A recorded trade (the ledger atom). Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub ticker: String,
    pub action: TradeAction,
    pub shares: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub currency: String,
    pub notes: String,
}

impl Trade {
    /// Strip the id, e.g. to replay a stored trade through the staging path.
    pub fn to_new_trade(&self) -> NewTrade {
        NewTrade {
            ticker: self.ticker.clone(),
            action: self.action,
            shares: self.shares,
            price: self.price,
            timestamp: self.timestamp,
            currency: self.currency.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// A FIFO lot: shares from one BUY, with their own unit cost and acquisition time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub shares_remaining: Decimal,
    pub unit_cost: Decimal,
    pub acquired_at: DateTime<Utc>,
}

impl Lot {
    pub fn new(shares: Decimal, unit_cost: Decimal, acquired_at: DateTime<Utc>) -> Self {
        debug_assert!(shares > Decimal::ZERO, "Lot.shares must be > 0");
        debug_assert!(unit_cost >= Decimal::ZERO, "Lot.unit_cost must be >= 0");
        Self {
            shares_remaining: shares,
            unit_cost,
            acquired_at,
        }
    }

    pub fn cost_basis(&self) -> Decimal {
        self.shares_remaining * self.unit_cost
    }
}

/// One piece of a SELL matched against one lot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSlice {
    pub unit_cost: Decimal,
    pub shares_taken: Decimal,
    pub acquired_at: DateTime<Utc>,
}

impl LotSlice {
    pub fn cost(&self) -> Decimal {
        self.unit_cost * self.shares_taken
    }
}

/// Result of matching one SELL against the open lots. Persisted as realized P&L history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealizedDisposal {
    pub trade_id: TradeId,
    pub ticker: String,
    pub sold_at: DateTime<Utc>,
    pub sell_price: Decimal,
    pub matched_shares: Decimal,
    pub matched_cost: Decimal,
    pub proceeds: Decimal,
    pub realized_pnl: Decimal,
    /// Per-lot breakdown, oldest lot first.
    pub slices: Vec<LotSlice>,
}

/// Position view derived from one ticker's open lots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub ticker: String,
    pub shares: Decimal,
    pub avg_cost: Decimal,
    pub cost_basis: Decimal,
    /// External input; `None` when no mark was supplied.
    pub current_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
}

/// Point-in-time portfolio view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub snapshot_id: Uuid,
    pub as_of: DateTime<Utc>,
    /// Sorted by ticker.
    pub positions: Vec<PortfolioPosition>,
    pub total_cost_basis: Decimal,
    /// Sum over marked positions only.
    pub total_market_value: Decimal,
    /// Sum over marked positions only.
    pub total_unrealized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
}

impl PortfolioSnapshot {
    pub fn position(&self, ticker: &str) -> Option<&PortfolioPosition> {
        self.positions.iter().find(|p| p.ticker == ticker)
    }
}
