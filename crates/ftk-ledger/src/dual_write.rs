//! Dual-write repository: write both, read one.
//!
//! # Write protocol
//! Every write runs under one async mutex, so trades are applied one at a
//! time in call order:
//!
//! 1. Stage the trade through the FIFO processor (validation; nothing written).
//! 2. Write to the primary. Failure fails the call and discards the staged state.
//! 3. Commit the staged state in memory.
//! 4. Mirror to the secondary under a timeout. Failure never fails the call;
//!    it is logged at WARN and recorded on the primary as a write-skew marker.
//!
//! # Reads
//! Reads go to the primary only. The secondary is a follower and is never
//! consulted for state.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ftk_portfolio::{
    summarize_disposals, Decimal, FifoTradeProcessor, MarkMap, NewTrade, PortfolioPosition,
    PortfolioSnapshot, RealizedDisposal, RealizedPnlSummary, Trade, TradeError, TradeId,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::RepoError;
use crate::port::RepositoryPort;
use crate::reconcile::{reconcile_ledgers, ReconcileReport};
use crate::store::{normalize_ticker, LedgerStore, MirrorKind, WriteSkewMarker};

/// Default bound on a single secondary write or probe.
pub const DEFAULT_SECONDARY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct DualWriteOptions {
    pub secondary_timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for DualWriteOptions {
    fn default() -> Self {
        Self {
            secondary_timeout: DEFAULT_SECONDARY_TIMEOUT,
            probe_timeout: DEFAULT_SECONDARY_TIMEOUT,
        }
    }
}

impl DualWriteOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            secondary_timeout: timeout,
            probe_timeout: timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// Status values
// ---------------------------------------------------------------------------

/// How writes are replicated, decided once when the repository opens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMode {
    DualWrite { secondary: &'static str },
    SingleStore { reason: SingleStoreReason },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SingleStoreReason {
    NotConfigured,
    /// The startup probe failed; writes are not mirrored until the next open.
    SecondaryUnreachable { store: &'static str },
}

impl ReplicationMode {
    pub fn is_dual_write(&self) -> bool {
        matches!(self, ReplicationMode::DualWrite { .. })
    }
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationMode::DualWrite { secondary } => write!(f, "dual-write (secondary={secondary})"),
            ReplicationMode::SingleStore {
                reason: SingleStoreReason::NotConfigured,
            } => f.write_str("single-store (no secondary configured)"),
            ReplicationMode::SingleStore {
                reason: SingleStoreReason::SecondaryUnreachable { store },
            } => write!(f, "single-store (secondary {store} unreachable at startup)"),
        }
    }
}

/// What happened to the mirrored copy of one write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecondaryOutcome {
    Mirrored,
    NotConfigured,
    /// Degraded at startup; the gap was recorded as a marker.
    Skipped { store: &'static str },
    /// Write failed or timed out; the gap was recorded as a marker.
    Failed { store: &'static str, error: String },
}

impl SecondaryOutcome {
    /// True when the secondary is now behind the primary for this row.
    pub fn is_skew(&self) -> bool {
        matches!(
            self,
            SecondaryOutcome::Skipped { .. } | SecondaryOutcome::Failed { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TradeReceipt {
    pub trade: Trade,
    pub disposal: Option<RealizedDisposal>,
    pub secondary: SecondaryOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SnapshotReceipt {
    pub snapshot: PortfolioSnapshot,
    pub secondary: SecondaryOutcome,
}

/// Result of an explicit write-skew replay.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SkewReplayReport {
    pub replayed: Vec<Uuid>,
    /// Marker rows the primary no longer holds. Resolved, since nothing can be sent.
    pub orphaned: Vec<Uuid>,
    /// Trades held back because an earlier trade on the same ticker failed.
    /// Their markers stay open.
    pub deferred: Vec<Uuid>,
    pub still_failing: Vec<SkewReplayFailure>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkewReplayFailure {
    pub row_id: Uuid,
    pub kind: MirrorKind,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    pub store: &'static str,
    pub reachable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerHealth {
    pub mode: ReplicationMode,
    pub primary: StoreHealth,
    pub secondary: Option<StoreHealth>,
    /// `None` when the primary could not be asked.
    pub open_write_skew: Option<usize>,
}

/// Identifies the row a mirrored write carried, for logs and markers.
struct MirrorRow<'a> {
    kind: MirrorKind,
    row_id: Uuid,
    ticker: Option<&'a str>,
    at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

pub struct DualWriteRepository {
    primary: Arc<dyn LedgerStore>,
    secondary: Option<Arc<dyn LedgerStore>>,
    mode: ReplicationMode,
    options: DualWriteOptions,
    processor: Mutex<FifoTradeProcessor>,
}

impl DualWriteRepository {
    /// Replay the primary's history, then probe the secondary.
    ///
    /// An unreachable secondary degrades the repository to single-store mode;
    /// only a primary that cannot be read or replayed is an error.
    pub async fn open(
        primary: Arc<dyn LedgerStore>,
        secondary: Option<Arc<dyn LedgerStore>>,
        options: DualWriteOptions,
    ) -> Result<Self, RepoError> {
        let history = primary
            .get_trade_history(None)
            .await
            .map_err(|e| RepoError::read(primary.name(), e))?;

        let mut processor = FifoTradeProcessor::new();
        for trade in &history {
            let staged = processor
                .stage(trade.to_new_trade(), trade.trade_id)
                .map_err(|source| RepoError::Replay {
                    trade_id: trade.trade_id,
                    source,
                })?;
            processor.commit(staged);
        }

        let stored = primary
            .get_realized_disposals(None)
            .await
            .map_err(|e| RepoError::read(primary.name(), e))?;
        if stored.len() != processor.disposals().len() {
            warn!(
                store = primary.name(),
                stored = stored.len(),
                replayed = processor.disposals().len(),
                "stored disposals disagree with replayed history"
            );
        }

        let mode = match &secondary {
            None => ReplicationMode::SingleStore {
                reason: SingleStoreReason::NotConfigured,
            },
            Some(s) => {
                let reachable = tokio::time::timeout(options.probe_timeout, s.test_connection())
                    .await
                    .unwrap_or(false);
                if reachable {
                    ReplicationMode::DualWrite {
                        secondary: s.name(),
                    }
                } else {
                    warn!(
                        store = s.name(),
                        "secondary store unreachable at startup; continuing single-store"
                    );
                    ReplicationMode::SingleStore {
                        reason: SingleStoreReason::SecondaryUnreachable { store: s.name() },
                    }
                }
            }
        };

        info!(
            primary = primary.name(),
            trades = history.len(),
            mode = %mode,
            "ledger opened"
        );

        Ok(Self {
            primary,
            secondary,
            mode,
            options,
            processor: Mutex::new(processor),
        })
    }

    pub fn replication_mode(&self) -> &ReplicationMode {
        &self.mode
    }

    pub fn primary_name(&self) -> &'static str {
        self.primary.name()
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    pub async fn record_trade(&self, new: NewTrade) -> Result<TradeId, RepoError> {
        Ok(self.record(new).await?.trade.trade_id)
    }

    /// `record_trade` with the full receipt, including the secondary outcome.
    pub async fn record(&self, new: NewTrade) -> Result<TradeReceipt, RepoError> {
        let mut processor = self.processor.lock().await;

        let staged = processor.stage(new, Uuid::new_v4())?;
        debug!(
            ticker = %staged.trade().ticker,
            trade_id = %staged.trade().trade_id,
            action = %staged.trade().action,
            shares = %staged.trade().shares,
            price = %staged.trade().price,
            "trade staged"
        );

        if let Err(source) = self
            .primary
            .record_trade(staged.trade(), staged.disposal())
            .await
        {
            error!(
                store = self.primary.name(),
                ticker = %staged.trade().ticker,
                trade_id = %staged.trade().trade_id,
                error = %format!("{source:#}"),
                "primary write failed; trade discarded"
            );
            return Err(RepoError::PrimaryWriteFailure {
                store: self.primary.name(),
                source,
            });
        }

        let (trade, disposal) = processor.commit(staged);
        info!(
            ticker = %trade.ticker,
            trade_id = %trade.trade_id,
            action = %trade.action,
            shares = %trade.shares,
            price = %trade.price,
            realized_pnl = %disposal.as_ref().map_or(Decimal::ZERO, |d| d.realized_pnl),
            "trade committed"
        );

        let row = MirrorRow {
            kind: MirrorKind::Trade,
            row_id: trade.trade_id,
            ticker: Some(&trade.ticker),
            at: trade.timestamp,
        };
        let secondary = self
            .mirror(row, |s| s.record_trade(&trade, disposal.as_ref()))
            .await;

        Ok(TradeReceipt {
            trade,
            disposal,
            secondary,
        })
    }

    pub async fn execute_buy(
        &self,
        ticker: &str,
        shares: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Trade, RepoError> {
        let receipt = self
            .record(NewTrade::buy(ticker, shares, price, timestamp))
            .await?;
        Ok(receipt.trade)
    }

    pub async fn execute_sell(
        &self,
        ticker: &str,
        shares: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<(Trade, RealizedDisposal), RepoError> {
        let receipt = self
            .record(NewTrade::sell(ticker, shares, price, timestamp))
            .await?;
        match receipt.disposal {
            Some(d) => Ok((receipt.trade, d)),
            // The processor attaches a disposal to every SELL it accepts.
            None => Err(TradeError::NoOpenPosition {
                ticker: receipt.trade.ticker,
            }
            .into()),
        }
    }

    /// Derive a snapshot from current lots at `marks` and persist it.
    pub async fn snapshot(
        &self,
        marks: &MarkMap,
        as_of: DateTime<Utc>,
    ) -> Result<SnapshotReceipt, RepoError> {
        let processor = self.processor.lock().await;
        let snapshot = processor.snapshot(marks, as_of)?;

        if let Err(source) = self.primary.save_portfolio_snapshot(&snapshot).await {
            error!(
                store = self.primary.name(),
                snapshot_id = %snapshot.snapshot_id,
                error = %format!("{source:#}"),
                "primary snapshot write failed"
            );
            return Err(RepoError::PrimaryWriteFailure {
                store: self.primary.name(),
                source,
            });
        }
        info!(
            snapshot_id = %snapshot.snapshot_id,
            positions = snapshot.positions.len(),
            "snapshot saved"
        );

        let row = MirrorRow {
            kind: MirrorKind::Snapshot,
            row_id: snapshot.snapshot_id,
            ticker: None,
            at: snapshot.as_of,
        };
        let secondary = self
            .mirror(row, |s| s.save_portfolio_snapshot(&snapshot))
            .await;
        drop(processor);

        Ok(SnapshotReceipt {
            snapshot,
            secondary,
        })
    }

    // -----------------------------------------------------------------------
    // Read path (primary only)
    // -----------------------------------------------------------------------

    pub async fn get_trade_history(&self, ticker: Option<&str>) -> Result<Vec<Trade>, RepoError> {
        self.primary
            .get_trade_history(ticker)
            .await
            .map_err(|e| RepoError::read(self.primary.name(), e))
    }

    pub async fn get_realized_disposals(
        &self,
        ticker: Option<&str>,
    ) -> Result<Vec<RealizedDisposal>, RepoError> {
        self.primary
            .get_realized_disposals(ticker)
            .await
            .map_err(|e| RepoError::read(self.primary.name(), e))
    }

    /// Recomputed from the primary's stored disposals on every call.
    pub async fn get_realized_pnl_summary(
        &self,
        ticker: Option<&str>,
    ) -> Result<RealizedPnlSummary, RepoError> {
        let ticker = ticker.map(normalize_ticker);
        let disposals = self.get_realized_disposals(ticker.as_deref()).await?;
        Ok(summarize_disposals(&disposals, ticker.as_deref()))
    }

    pub async fn get_portfolio_data(&self) -> Result<Vec<PortfolioSnapshot>, RepoError> {
        self.primary
            .get_portfolio_data()
            .await
            .map_err(|e| RepoError::read(self.primary.name(), e))
    }

    pub async fn get_latest_portfolio_snapshot(
        &self,
    ) -> Result<Option<PortfolioSnapshot>, RepoError> {
        self.primary
            .get_latest_portfolio_snapshot()
            .await
            .map_err(|e| RepoError::read(self.primary.name(), e))
    }

    /// Open positions derived from the replayed lots.
    pub async fn positions(&self, marks: &MarkMap) -> Result<Vec<PortfolioPosition>, RepoError> {
        Ok(self.processor.lock().await.positions(marks)?)
    }

    pub async fn open_shares(&self, ticker: &str) -> Decimal {
        self.processor
            .lock()
            .await
            .open_shares(&normalize_ticker(ticker))
    }

    pub async fn write_skew_markers(&self) -> Result<Vec<WriteSkewMarker>, RepoError> {
        self.primary
            .get_write_skew_markers()
            .await
            .map_err(|e| RepoError::read(self.primary.name(), e))
    }

    /// Probe the secondary. `false` when none is configured.
    pub async fn test_connection(&self) -> bool {
        match &self.secondary {
            None => false,
            Some(s) => tokio::time::timeout(self.options.probe_timeout, s.test_connection())
                .await
                .unwrap_or(false),
        }
    }

    /// Probe both stores and count open markers.
    pub async fn health(&self) -> LedgerHealth {
        let primary_ok =
            tokio::time::timeout(self.options.probe_timeout, self.primary.test_connection())
                .await
                .unwrap_or(false);
        let open_write_skew = if primary_ok {
            self.primary
                .get_write_skew_markers()
                .await
                .map(|m| m.len())
                .ok()
        } else {
            None
        };
        let secondary = match &self.secondary {
            None => None,
            Some(s) => Some(StoreHealth {
                store: s.name(),
                reachable: self.test_connection().await,
            }),
        };
        LedgerHealth {
            mode: self.mode.clone(),
            primary: StoreHealth {
                store: self.primary.name(),
                reachable: primary_ok,
            },
            secondary,
            open_write_skew,
        }
    }

    // -----------------------------------------------------------------------
    // Repair
    // -----------------------------------------------------------------------

    /// Re-send every row named by an open marker to the secondary.
    ///
    /// Runs regardless of the replication mode: this is the operator's way of
    /// catching a secondary up after an outage. Holds the write lock so no
    /// new marker appears mid-replay.
    ///
    /// Rows are sent in primary order, and once a trade for a ticker fails,
    /// later trades for that ticker are deferred to the next replay, so a SELL
    /// never reaches the secondary ahead of the BUY it matched. Replayed rows
    /// still land after whatever the secondary took in while they were
    /// missing; `reconcile` compares by id, not position.
    pub async fn replay_write_skew(&self) -> Result<SkewReplayReport, RepoError> {
        let secondary = self.require_secondary()?;
        let _writes = self.processor.lock().await;

        let mut markers = self.write_skew_markers().await?;
        let mut report = SkewReplayReport::default();
        if markers.is_empty() {
            return Ok(report);
        }

        let trades = self.get_trade_history(None).await?;
        let disposals = self.get_realized_disposals(None).await?;
        let snapshots = self.get_portfolio_data().await?;

        // Primary order: trades, then snapshots, then rows the primary lost.
        markers.sort_by_key(|m| match m.kind {
            MirrorKind::Trade => trades
                .iter()
                .position(|t| t.trade_id == m.row_id)
                .map_or((2, 0), |i| (0, i)),
            MirrorKind::Snapshot => snapshots
                .iter()
                .position(|s| s.snapshot_id == m.row_id)
                .map_or((2, 0), |i| (1, i)),
        });

        let mut seen = HashSet::new();
        let mut blocked: HashSet<&str> = HashSet::new();
        for m in markers {
            if !seen.insert((m.row_id, m.kind)) {
                continue;
            }

            let write = match m.kind {
                MirrorKind::Trade => match trades.iter().find(|t| t.trade_id == m.row_id) {
                    Some(t) if blocked.contains(t.ticker.as_str()) => {
                        report.deferred.push(m.row_id);
                        continue;
                    }
                    Some(t) => {
                        let d = disposals.iter().find(|d| d.trade_id == t.trade_id);
                        let r = self.bounded(secondary.record_trade(t, d)).await;
                        if r.is_err() {
                            blocked.insert(t.ticker.as_str());
                        }
                        Some(r)
                    }
                    None => None,
                },
                MirrorKind::Snapshot => {
                    match snapshots.iter().find(|s| s.snapshot_id == m.row_id) {
                        Some(s) => Some(self.bounded(secondary.save_portfolio_snapshot(s)).await),
                        None => None,
                    }
                }
            };

            match write {
                Some(Err(e)) => {
                    warn!(
                        store = secondary.name(),
                        row_id = %m.row_id,
                        kind = %m.kind,
                        error = %format!("{e:#}"),
                        "write skew replay failed"
                    );
                    report.still_failing.push(SkewReplayFailure {
                        row_id: m.row_id,
                        kind: m.kind,
                        error: format!("{e:#}"),
                    });
                    continue;
                }
                Some(Ok(())) => report.replayed.push(m.row_id),
                None => report.orphaned.push(m.row_id),
            }

            self.primary
                .resolve_write_skew(m.row_id, m.kind)
                .await
                .map_err(|source| RepoError::PrimaryWriteFailure {
                    store: self.primary.name(),
                    source,
                })?;
        }

        info!(
            store = secondary.name(),
            replayed = report.replayed.len(),
            orphaned = report.orphaned.len(),
            deferred = report.deferred.len(),
            still_failing = report.still_failing.len(),
            "write skew replay finished"
        );
        Ok(report)
    }

    /// Compare primary and secondary trade histories.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RepoError> {
        let secondary = self.require_secondary()?;

        let primary_trades = self.get_trade_history(None).await?;
        let secondary_trades = self
            .bounded(secondary.get_trade_history(None))
            .await
            .map_err(|e| RepoError::Connection {
                store: secondary.name(),
                reason: format!("{e:#}"),
            })?;
        let markers = self.write_skew_markers().await?;

        Ok(reconcile_ledgers(&primary_trades, &secondary_trades, &markers))
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn require_secondary(&self) -> Result<&Arc<dyn LedgerStore>, RepoError> {
        self.secondary.as_ref().ok_or_else(|| RepoError::Connection {
            store: "secondary",
            reason: "no secondary store configured".to_string(),
        })
    }

    /// Bound a secondary call by the configured timeout.
    async fn bounded<T, F>(&self, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.options.secondary_timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(anyhow!(
                "timed out after {} ms",
                self.options.secondary_timeout.as_millis()
            )),
        }
    }

    async fn mirror<'s, W, F>(&'s self, row: MirrorRow<'_>, write: W) -> SecondaryOutcome
    where
        W: FnOnce(&'s dyn LedgerStore) -> F,
        F: Future<Output = anyhow::Result<()>>,
    {
        let Some(secondary) = self.secondary.as_ref() else {
            return SecondaryOutcome::NotConfigured;
        };
        let store = secondary.name();

        if !self.mode.is_dual_write() {
            self.record_skew(&row, store, "secondary disabled since startup probe failed")
                .await;
            return SecondaryOutcome::Skipped { store };
        }

        match self.bounded(write(secondary.as_ref())).await {
            Ok(()) => SecondaryOutcome::Mirrored,
            Err(source) => {
                let err = RepoError::SecondaryWriteFailure {
                    store,
                    row_id: row.row_id,
                    source,
                };
                warn!(
                    store,
                    kind = %row.kind,
                    ticker = row.ticker.unwrap_or("-"),
                    trade_id = %row.row_id,
                    timestamp = %row.at,
                    error = %err,
                    "secondary write failed; primary committed, recording write skew"
                );
                let error = err.to_string();
                self.record_skew(&row, store, &error).await;
                SecondaryOutcome::Failed { store, error }
            }
        }
    }

    /// Marker bookkeeping never fails the write it describes.
    async fn record_skew(&self, row: &MirrorRow<'_>, store: &'static str, error: &str) {
        let marker = WriteSkewMarker {
            row_id: row.row_id,
            kind: row.kind,
            ticker: row.ticker.map(str::to_string),
            store: store.to_string(),
            recorded_at: Utc::now(),
            error: error.to_string(),
        };
        if let Err(e) = self.primary.record_write_skew(&marker).await {
            error!(
                store = self.primary.name(),
                row_id = %row.row_id,
                error = %format!("{e:#}"),
                "could not record write skew marker"
            );
        }
    }
}

#[async_trait]
impl RepositoryPort for DualWriteRepository {
    async fn record_trade(&self, trade: NewTrade) -> Result<TradeId, RepoError> {
        DualWriteRepository::record_trade(self, trade).await
    }

    async fn get_trade_history(&self, ticker: Option<&str>) -> Result<Vec<Trade>, RepoError> {
        DualWriteRepository::get_trade_history(self, ticker).await
    }

    async fn get_realized_pnl_summary(
        &self,
        ticker: Option<&str>,
    ) -> Result<RealizedPnlSummary, RepoError> {
        DualWriteRepository::get_realized_pnl_summary(self, ticker).await
    }

    async fn save_portfolio_snapshot(
        &self,
        marks: &MarkMap,
        as_of: DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, RepoError> {
        Ok(self.snapshot(marks, as_of).await?.snapshot)
    }

    async fn get_portfolio_data(&self) -> Result<Vec<PortfolioSnapshot>, RepoError> {
        DualWriteRepository::get_portfolio_data(self).await
    }

    async fn get_latest_portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>, RepoError> {
        DualWriteRepository::get_latest_portfolio_snapshot(self).await
    }

    async fn test_connection(&self) -> bool {
        DualWriteRepository::test_connection(self).await
    }
}
