use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ftk_ledger::{normalize_ticker, LedgerStore, MirrorKind, WriteSkewMarker};
use ftk_portfolio::{PortfolioSnapshot, RealizedDisposal, Trade};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chain::{canonical_json_line, verify_trade_log, TradeRecord, VerifyResult};

pub const TRADES_FILE: &str = "trades.jsonl";
pub const SNAPSHOTS_FILE: &str = "snapshots.jsonl";
pub const WRITE_SKEW_FILE: &str = "write_skew.jsonl";

/// Marker journal line. Markers are never rewritten in place; resolving
/// appends a `RESOLVED` line that cancels earlier `OPEN` lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
enum SkewEntry {
    Open {
        marker: WriteSkewMarker,
    },
    Resolved {
        row_id: Uuid,
        kind: MirrorKind,
        at: DateTime<Utc>,
    },
}

/// Writes one encoded line to an open ledger file and makes it durable.
type WriteLine = fn(&mut File, &[u8]) -> io::Result<()>;

struct ChainState {
    next_seq: u64,
    last_hash: Option<String>,
    trade_ids: HashSet<Uuid>,
    snapshot_ids: HashSet<Uuid>,
}

/// Append-only JSON-lines ledger under `<root>/<fund>/`.
///
/// - `trades.jsonl`: one hash-chained [`TradeRecord`] per trade
/// - `snapshots.jsonl`: one snapshot per line
/// - `write_skew.jsonl`: marker journal
///
/// Every append is flushed with `sync_data` before it is acknowledged. An
/// append that fails part way is cut back to the file's previous length, so
/// the files only ever hold acknowledged lines.
/// Single-process only: concurrent writers from other processes are not
/// excluded.
pub struct LocalFileStore {
    dir: PathBuf,
    state: Mutex<ChainState>,
    write_line: WriteLine,
}

impl LocalFileStore {
    /// Open (creating if needed) the ledger for `fund` under `root`.
    ///
    /// Refuses a trade log whose hash chain does not verify.
    pub fn open(root: impl AsRef<Path>, fund: &str) -> Result<Self> {
        validate_fund(fund)?;
        let dir = root.as_ref().join(fund);
        fs::create_dir_all(&dir).with_context(|| format!("create_dir_all {:?}", dir))?;

        let trades_path = dir.join(TRADES_FILE);
        match verify_trade_log(&trades_path)? {
            VerifyResult::Valid { .. } => {}
            VerifyResult::Broken { line, reason } => {
                bail!("trade log {:?} failed verification at line {line}: {reason}", trades_path)
            }
        }

        let records: Vec<TradeRecord> = read_lines(&trades_path)?;
        let snapshots: Vec<PortfolioSnapshot> = read_lines(&dir.join(SNAPSHOTS_FILE))?;

        let state = ChainState {
            next_seq: records.len() as u64,
            last_hash: records.last().and_then(|r| r.hash_self.clone()),
            trade_ids: records.iter().map(|r| r.trade.trade_id).collect(),
            snapshot_ids: snapshots.iter().map(|s| s.snapshot_id).collect(),
        };
        debug!(dir = ?dir, trades = records.len(), snapshots = snapshots.len(), "local store opened");

        Ok(Self {
            dir,
            state: Mutex::new(state),
            write_line: write_and_sync,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn trades_path(&self) -> PathBuf {
        self.dir.join(TRADES_FILE)
    }

    /// Re-verify the trade log as it is on disk now.
    pub fn verify(&self) -> Result<VerifyResult> {
        verify_trade_log(self.trades_path())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChainState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("local store {:?} lock poisoned", self.dir))
    }

    fn append(&self, path: &Path, line: &str) -> Result<()> {
        append_line(path, line, self.write_line)
    }

    fn records(&self) -> Result<Vec<TradeRecord>> {
        read_lines(&self.trades_path())
    }

    fn open_markers(&self) -> Result<Vec<WriteSkewMarker>> {
        let entries: Vec<SkewEntry> = read_lines(&self.dir.join(WRITE_SKEW_FILE))?;
        let mut open: Vec<WriteSkewMarker> = Vec::new();
        for e in entries {
            match e {
                SkewEntry::Open { marker } => open.push(marker),
                SkewEntry::Resolved { row_id, kind, .. } => {
                    open.retain(|m| !(m.row_id == row_id && m.kind == kind))
                }
            }
        }
        Ok(open)
    }
}

#[async_trait]
impl LedgerStore for LocalFileStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn record_trade(
        &self,
        trade: &Trade,
        disposal: Option<&RealizedDisposal>,
    ) -> Result<()> {
        let mut st = self.lock()?;
        if st.trade_ids.contains(&trade.trade_id) {
            return Ok(());
        }

        let rec = TradeRecord::sealed(
            st.next_seq,
            trade.clone(),
            disposal.cloned(),
            st.last_hash.clone(),
        )?;
        self.append(&self.trades_path(), &canonical_json_line(&rec)?)?;

        st.next_seq += 1;
        st.last_hash = rec.hash_self;
        st.trade_ids.insert(trade.trade_id);
        Ok(())
    }

    async fn get_trade_history(&self, ticker: Option<&str>) -> Result<Vec<Trade>> {
        let want = ticker.map(normalize_ticker);
        Ok(self
            .records()?
            .into_iter()
            .map(|r| r.trade)
            .filter(|t| want.as_deref().map_or(true, |w| t.ticker == w))
            .collect())
    }

    async fn get_realized_disposals(&self, ticker: Option<&str>) -> Result<Vec<RealizedDisposal>> {
        let want = ticker.map(normalize_ticker);
        Ok(self
            .records()?
            .into_iter()
            .filter_map(|r| r.disposal)
            .filter(|d| want.as_deref().map_or(true, |w| d.ticker == w))
            .collect())
    }

    async fn save_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        let mut st = self.lock()?;
        if st.snapshot_ids.contains(&snapshot.snapshot_id) {
            return Ok(());
        }
        self.append(
            &self.dir.join(SNAPSHOTS_FILE),
            &canonical_json_line(snapshot)?,
        )?;
        st.snapshot_ids.insert(snapshot.snapshot_id);
        Ok(())
    }

    async fn get_portfolio_data(&self) -> Result<Vec<PortfolioSnapshot>> {
        read_lines(&self.dir.join(SNAPSHOTS_FILE))
    }

    async fn record_write_skew(&self, marker: &WriteSkewMarker) -> Result<()> {
        let _guard = self.lock()?;
        let entry = SkewEntry::Open {
            marker: marker.clone(),
        };
        self.append(&self.dir.join(WRITE_SKEW_FILE), &canonical_json_line(&entry)?)
    }

    async fn resolve_write_skew(&self, row_id: Uuid, kind: MirrorKind) -> Result<()> {
        let _guard = self.lock()?;
        let entry = SkewEntry::Resolved {
            row_id,
            kind,
            at: Utc::now(),
        };
        self.append(&self.dir.join(WRITE_SKEW_FILE), &canonical_json_line(&entry)?)
    }

    async fn get_write_skew_markers(&self) -> Result<Vec<WriteSkewMarker>> {
        self.open_markers()
    }

    async fn test_connection(&self) -> bool {
        fs::metadata(&self.dir)
            .map(|m| m.is_dir() && !m.permissions().readonly())
            .unwrap_or(false)
    }
}

/// Fund names become directory names: one path segment, no traversal.
fn validate_fund(fund: &str) -> Result<()> {
    let ok = !fund.is_empty()
        && fund != "."
        && fund != ".."
        && fund
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok {
        bail!("invalid fund name {fund:?}: use ASCII letters, digits, '-', '_' or '.'");
    }
    Ok(())
}

/// Append `line` plus a newline with `write`. On failure the file is cut back
/// to its length before the call.
fn append_line(path: &Path, line: &str, write: WriteLine) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open ledger file {:?}", path))?;
    let len_before = f
        .metadata()
        .with_context(|| format!("stat {:?}", path))?
        .len();

    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');

    let Err(err) = write(&mut f, buf.as_bytes()) else {
        return Ok(());
    };
    match f.set_len(len_before).and_then(|()| f.sync_data()) {
        Ok(()) => {
            warn!(path = ?path, len = len_before, error = %err, "append failed; file rolled back");
            Err(anyhow::Error::new(err).context(format!("append to {:?}", path)))
        }
        Err(rollback) => Err(anyhow::Error::new(err).context(format!(
            "append to {:?} failed and rollback to {len_before} bytes also failed: {rollback}",
            path
        ))),
    }
}

fn write_and_sync(f: &mut File, bytes: &[u8]) -> io::Result<()> {
    f.write_all(bytes)?;
    f.sync_data()
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l).with_context(|| format!("parse {:?} line {}", path, i + 1))
        })
        .collect()
}
