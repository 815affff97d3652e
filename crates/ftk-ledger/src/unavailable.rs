//! Stand-in for a configured store that could not be opened.
//!
//! Lets the repository open with the secondary slot filled, so a mirror that
//! fails at construction degrades to single-store mode exactly like one that
//! fails its startup probe.

use anyhow::{bail, Result};
use async_trait::async_trait;
use ftk_portfolio::{PortfolioSnapshot, RealizedDisposal, Trade};
use uuid::Uuid;

use crate::store::{LedgerStore, MirrorKind, WriteSkewMarker};

pub struct UnavailableStore {
    name: &'static str,
    reason: String,
}

impl UnavailableStore {
    pub fn new(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn refuse<T>(&self) -> Result<T> {
        bail!("store '{}' is unavailable: {}", self.name, self.reason)
    }
}

#[async_trait]
impl LedgerStore for UnavailableStore {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn record_trade(&self, _: &Trade, _: Option<&RealizedDisposal>) -> Result<()> {
        self.refuse()
    }

    async fn get_trade_history(&self, _: Option<&str>) -> Result<Vec<Trade>> {
        self.refuse()
    }

    async fn get_realized_disposals(&self, _: Option<&str>) -> Result<Vec<RealizedDisposal>> {
        self.refuse()
    }

    async fn save_portfolio_snapshot(&self, _: &PortfolioSnapshot) -> Result<()> {
        self.refuse()
    }

    async fn get_portfolio_data(&self) -> Result<Vec<PortfolioSnapshot>> {
        self.refuse()
    }

    async fn record_write_skew(&self, _: &WriteSkewMarker) -> Result<()> {
        self.refuse()
    }

    async fn resolve_write_skew(&self, _: Uuid, _: MirrorKind) -> Result<()> {
        self.refuse()
    }

    async fn get_write_skew_markers(&self) -> Result<Vec<WriteSkewMarker>> {
        self.refuse()
    }

    async fn test_connection(&self) -> bool {
        false
    }
}
