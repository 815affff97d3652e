//! Local store as the authoritative primary.
//!
//! GREEN when: trades, disposals, snapshots and write-skew markers written
//! through the dual-write repository survive a process restart (a fresh
//! `LocalFileStore::open`), the chain keeps extending after reopen, and
//! duplicate ids are not appended twice.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use ftk_ledger::{DualWriteOptions, DualWriteRepository, LedgerStore, MemoryStore, MirrorKind};
use ftk_local::{LocalFileStore, VerifyResult};
use ftk_portfolio::marks;
use rust_decimal_macros::dec;

#[tokio::test]
async fn ledger_survives_restart() -> Result<()> {
    let root = tempfile::tempdir()?;
    let t0 = Utc.with_ymd_and_hms(2024, 1, 8, 15, 0, 0).unwrap();

    let sell_id = {
        let local = Arc::new(LocalFileStore::open(root.path(), "main")?);
        let remote = Arc::new(MemoryStore::new("remote"));
        let repo =
            DualWriteRepository::open(local.clone(), Some(remote.clone()), DualWriteOptions::default())
                .await?;

        repo.execute_buy("AAPL", dec!(50), dec!(10), t0).await?;
        remote.set_online(false);
        let (sell, disposal) = repo
            .execute_sell("AAPL", dec!(30), dec!(15), t0 + Duration::days(1))
            .await?;
        assert_eq!(disposal.realized_pnl, dec!(150));
        repo.snapshot(&marks([("AAPL", dec!(14))]), t0 + Duration::days(2))
            .await?;
        sell.trade_id
    };

    let local = Arc::new(LocalFileStore::open(root.path(), "main")?);
    let markers = local.get_write_skew_markers().await?;
    assert_eq!(markers.len(), 2);
    assert!(markers
        .iter()
        .any(|m| m.row_id == sell_id && m.kind == MirrorKind::Trade));

    let repo = DualWriteRepository::open(local.clone(), None, DualWriteOptions::default()).await?;
    assert_eq!(repo.open_shares("AAPL").await, dec!(20));
    let pnl = repo.get_realized_pnl_summary(Some("aapl")).await?;
    assert_eq!(pnl.total_realized_pnl, dec!(150));
    assert_eq!(pnl.number_of_sales, 1);

    let latest = repo.get_latest_portfolio_snapshot().await?.expect("snapshot");
    assert_eq!(latest.total_unrealized_pnl, dec!(80));

    repo.execute_buy("MSFT", dec!(1), dec!(400), t0 + Duration::days(3))
        .await?;
    assert_eq!(local.verify()?, VerifyResult::Valid { lines: 3 });

    local.resolve_write_skew(sell_id, MirrorKind::Trade).await?;
    assert_eq!(local.get_write_skew_markers().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_ids_are_not_appended() -> Result<()> {
    let root = tempfile::tempdir()?;
    let local = LocalFileStore::open(root.path(), "main")?;
    let trade = ftk_portfolio::NewTrade::buy("AAPL", dec!(1), dec!(1), Utc::now())
        .into_trade(uuid::Uuid::new_v4());

    local.record_trade(&trade, None).await?;
    local.record_trade(&trade, None).await?;
    assert_eq!(local.get_trade_history(None).await?.len(), 1);

    // Dedupe also holds across a reopen.
    let local = LocalFileStore::open(root.path(), "main")?;
    local.record_trade(&trade, None).await?;
    assert_eq!(local.get_trade_history(None).await?.len(), 1);
    assert!(local.test_connection().await);
    Ok(())
}

#[tokio::test]
async fn funds_are_isolated() -> Result<()> {
    let root = tempfile::tempdir()?;
    let a = LocalFileStore::open(root.path(), "alpha")?;
    let b = LocalFileStore::open(root.path(), "beta")?;

    let trade = ftk_portfolio::NewTrade::buy("AAPL", dec!(1), dec!(1), Utc::now())
        .into_trade(uuid::Uuid::new_v4());
    a.record_trade(&trade, None).await?;

    assert_eq!(a.get_trade_history(None).await?.len(), 1);
    assert!(b.get_trade_history(None).await?.is_empty());
    Ok(())
}
