use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ftk_portfolio::{MarkMap, NewTrade, PortfolioSnapshot, RealizedPnlSummary, Trade, TradeId};

use crate::error::RepoError;

/// Caller-facing ledger contract.
///
/// One implementation exists, [`crate::DualWriteRepository`]; callers hold it
/// as `Arc<dyn RepositoryPort>` so tests and binaries can swap the wiring
/// without touching call sites.
#[async_trait]
pub trait RepositoryPort: Send + Sync {
    /// Validate, apply and persist a trade. Returns the id assigned to it.
    async fn record_trade(&self, trade: NewTrade) -> Result<TradeId, RepoError>;

    async fn get_trade_history(&self, ticker: Option<&str>) -> Result<Vec<Trade>, RepoError>;

    async fn get_realized_pnl_summary(
        &self,
        ticker: Option<&str>,
    ) -> Result<RealizedPnlSummary, RepoError>;

    /// Derive a snapshot at `marks` and persist it.
    async fn save_portfolio_snapshot(
        &self,
        marks: &MarkMap,
        as_of: DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, RepoError>;

    async fn get_portfolio_data(&self) -> Result<Vec<PortfolioSnapshot>, RepoError>;

    async fn get_latest_portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>, RepoError>;

    /// Health of the secondary store.
    async fn test_connection(&self) -> bool;
}
