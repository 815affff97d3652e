//! Ledger commands: each opens the repository from config, does one thing,
//! and prints JSON on stdout.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use ftk_ledger::{DualWriteRepository, LedgerHealth, ReconcileReport, SkewReplayReport};
use ftk_local::{verify_trade_log, VerifyResult, TRADES_FILE};
use ftk_portfolio::{Decimal, NewTrade, TradeAction};
use serde::Serialize;
use tracing::warn;

use super::{parse_marks, print_json, ConfigArgs};
use crate::wiring::{self, Loaded};

pub struct TradeInput {
    pub ticker: String,
    pub shares: Decimal,
    pub price: Decimal,
    pub currency: String,
    pub notes: String,
    pub at: DateTime<Utc>,
}

async fn open(config: &ConfigArgs) -> Result<(Loaded, DualWriteRepository)> {
    let loaded = wiring::load_config(&config.paths, config.strict)?;
    let repo = wiring::open_repository(&loaded.ledger).await?;
    Ok((loaded, repo))
}

pub async fn record(config: &ConfigArgs, action: TradeAction, input: TradeInput) -> Result<()> {
    let (_, repo) = open(config).await?;
    let new = NewTrade::new(input.ticker, action, input.shares, input.price, input.at)
        .with_currency(input.currency)
        .with_notes(input.notes);

    let receipt = repo.record(new).await?;
    print_json(&receipt)
}

pub async fn history(config: &ConfigArgs, ticker: Option<String>) -> Result<()> {
    let (_, repo) = open(config).await?;
    print_json(&repo.get_trade_history(ticker.as_deref()).await?)
}

pub async fn pnl(config: &ConfigArgs, ticker: Option<String>) -> Result<()> {
    let (_, repo) = open(config).await?;
    print_json(&repo.get_realized_pnl_summary(ticker.as_deref()).await?)
}

pub async fn positions(config: &ConfigArgs, raw_marks: &[String]) -> Result<()> {
    let marks = parse_marks(raw_marks)?;
    let (_, repo) = open(config).await?;
    print_json(&repo.positions(&marks).await?)
}

pub async fn snapshot(config: &ConfigArgs, raw_marks: &[String], at: DateTime<Utc>) -> Result<()> {
    let marks = parse_marks(raw_marks)?;
    let (_, repo) = open(config).await?;
    print_json(&repo.snapshot(&marks, at).await?)
}

#[derive(Serialize)]
struct HealthOutput<'a> {
    fund: &'a str,
    config_hash: &'a str,
    #[serde(flatten)]
    health: LedgerHealth,
}

pub async fn health(config: &ConfigArgs) -> Result<()> {
    let (loaded, repo) = open(config).await?;
    let health = repo.health().await;
    let primary_ok = health.primary.reachable;

    print_json(&HealthOutput {
        fund: &loaded.ledger.fund,
        config_hash: &loaded.loaded.config_hash,
        health,
    })?;

    if !primary_ok {
        bail!("primary store {} is unreachable", repo.primary_name());
    }
    Ok(())
}

#[derive(Serialize)]
struct ReconcileOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    replay: Option<&'a SkewReplayReport>,
    report: &'a ReconcileReport,
}

/// Exits non-zero when the stores still disagree.
pub async fn reconcile(config: &ConfigArgs, replay: bool) -> Result<()> {
    let (_, repo) = open(config).await?;

    let replayed = if replay {
        let r = repo.replay_write_skew().await?;
        if !r.still_failing.is_empty() || !r.deferred.is_empty() {
            warn!(
                failing = r.still_failing.len(),
                deferred = r.deferred.len(),
                "write-skew replay incomplete"
            );
        }
        Some(r)
    } else {
        None
    };
    let report = repo.reconcile().await?;

    print_json(&ReconcileOutput {
        replay: replayed.as_ref(),
        report: &report,
    })?;

    if !report.is_clean() {
        let unexplained = report.unexplained().count();
        bail!(
            "RECONCILE_DRIFT: {} diff(s), {} not covered by a write-skew marker",
            report.diffs.len(),
            unexplained
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct VerifyOutput<'a> {
    path: String,
    result: &'a VerifyResult,
}

/// Checks the file directly; opening the store would refuse a broken chain.
pub fn verify_local(config: &ConfigArgs) -> Result<()> {
    let loaded = wiring::load_config(&config.paths, config.strict)?;
    let Some(dir) = wiring::local_dir(&loaded.ledger) else {
        bail!("storage backend has no local trade log");
    };
    let path = dir.join(TRADES_FILE);
    let result = verify_trade_log(&path)?;

    print_json(&VerifyOutput {
        path: path.display().to_string(),
        result: &result,
    })?;

    if let VerifyResult::Broken { line, reason } = &result {
        bail!("TRADE_LOG_BROKEN at line {line}: {reason}");
    }
    Ok(())
}
