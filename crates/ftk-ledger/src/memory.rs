//! In-process [`LedgerStore`] backed by vectors.
//!
//! Used as the store for ephemeral sessions and as the fault-injecting double
//! in repository tests: it can be switched offline, set to fail writes or a
//! single trade, or made slow enough to trip the secondary timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ftk_portfolio::{PortfolioSnapshot, RealizedDisposal, Trade};
use uuid::Uuid;

use crate::store::{normalize_ticker, LedgerStore, MirrorKind, WriteSkewMarker};

#[derive(Default)]
struct MemoryInner {
    trades: Vec<Trade>,
    disposals: Vec<RealizedDisposal>,
    snapshots: Vec<PortfolioSnapshot>,
    markers: Vec<WriteSkewMarker>,
}

pub struct MemoryStore {
    name: &'static str,
    inner: Mutex<MemoryInner>,
    online: AtomicBool,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
    refused_trade: Mutex<Option<Uuid>>,
}

impl MemoryStore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(MemoryInner::default()),
            online: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            write_delay_ms: AtomicU64::new(0),
            refused_trade: Mutex::new(None),
        }
    }

    /// Offline: every operation fails and `test_connection` reports `false`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Reachable, but writes are refused.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay applied before every write.
    pub fn set_write_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.write_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Refuse writes of one trade id only.
    pub fn refuse_trade(&self, trade_id: Option<Uuid>) {
        if let Ok(mut g) = self.refused_trade.lock() {
            *g = trade_id;
        }
    }

    pub fn trade_count(&self) -> usize {
        self.inner.lock().map(|g| g.trades.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store '{}' lock poisoned", self.name))
    }

    fn ensure_online(&self) -> Result<()> {
        if !self.online.load(Ordering::SeqCst) {
            bail!("memory store '{}' is offline", self.name);
        }
        Ok(())
    }

    async fn before_write(&self) -> Result<()> {
        let ms = self.write_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        self.ensure_online()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store '{}' refused the write", self.name);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn record_trade(
        &self,
        trade: &Trade,
        disposal: Option<&RealizedDisposal>,
    ) -> Result<()> {
        self.before_write().await?;
        let refused = self.refused_trade.lock().map(|g| *g).unwrap_or(None);
        if refused == Some(trade.trade_id) {
            bail!("memory store '{}' refused trade {}", self.name, trade.trade_id);
        }
        let mut g = self.lock()?;
        if g.trades.iter().any(|t| t.trade_id == trade.trade_id) {
            return Ok(());
        }
        g.trades.push(trade.clone());
        if let Some(d) = disposal {
            g.disposals.push(d.clone());
        }
        Ok(())
    }

    async fn get_trade_history(&self, ticker: Option<&str>) -> Result<Vec<Trade>> {
        self.ensure_online()?;
        let want = ticker.map(normalize_ticker);
        let g = self.lock()?;
        Ok(g.trades
            .iter()
            .filter(|t| want.as_deref().map_or(true, |w| t.ticker == w))
            .cloned()
            .collect())
    }

    async fn get_realized_disposals(&self, ticker: Option<&str>) -> Result<Vec<RealizedDisposal>> {
        self.ensure_online()?;
        let want = ticker.map(normalize_ticker);
        let g = self.lock()?;
        Ok(g.disposals
            .iter()
            .filter(|d| want.as_deref().map_or(true, |w| d.ticker == w))
            .cloned()
            .collect())
    }

    async fn save_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        self.before_write().await?;
        let mut g = self.lock()?;
        if !g.snapshots.iter().any(|s| s.snapshot_id == snapshot.snapshot_id) {
            g.snapshots.push(snapshot.clone());
        }
        Ok(())
    }

    async fn get_portfolio_data(&self) -> Result<Vec<PortfolioSnapshot>> {
        self.ensure_online()?;
        Ok(self.lock()?.snapshots.clone())
    }

    async fn record_write_skew(&self, marker: &WriteSkewMarker) -> Result<()> {
        self.before_write().await?;
        self.lock()?.markers.push(marker.clone());
        Ok(())
    }

    async fn resolve_write_skew(&self, row_id: Uuid, kind: MirrorKind) -> Result<()> {
        self.before_write().await?;
        self.lock()?
            .markers
            .retain(|m| !(m.row_id == row_id && m.kind == kind));
        Ok(())
    }

    async fn get_write_skew_markers(&self) -> Result<Vec<WriteSkewMarker>> {
        self.ensure_online()?;
        Ok(self.lock()?.markers.clone())
    }

    async fn test_connection(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
