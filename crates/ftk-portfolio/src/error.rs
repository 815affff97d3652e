use rust_decimal::Decimal;
use thiserror::Error;

/// Rejections raised by the accounting core. Every variant is raised before any
/// tracker is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradeError {
    /// Malformed trade input.
    #[error("invalid trade: {field} {reason}")]
    Validation { field: &'static str, reason: String },

    /// A SELL asks for more shares than the open lots hold.
    #[error("insufficient shares for {ticker}: requested {requested}, available {available}")]
    InsufficientShares {
        ticker: String,
        requested: Decimal,
        available: Decimal,
    },

    /// A SELL on a ticker that was never bought or is fully closed.
    #[error("no open position for {ticker}")]
    NoOpenPosition { ticker: String },
}

impl TradeError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        TradeError::Validation {
            field,
            reason: reason.into(),
        }
    }
}
