//! Postgres ledger store round trip.
//!
//! GREEN when:
//! - Trades come back in insertion order with exact decimals.
//! - A SELL's disposal (with lot slices) is stored with it and filtered by ticker.
//! - Re-recording a trade id is a no-op.
//! - Funds never see each other's rows.
//! - Write-skew markers open and resolve.
//!
//! Skips (prints SKIP) when FTK_DATABASE_URL is unset.

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use ftk_db::PgStore;
use ftk_ledger::{LedgerStore, MirrorKind, WriteSkewMarker};
use ftk_portfolio::{marks, FifoTradeProcessor, NewTrade};
use rust_decimal_macros::dec;
use uuid::Uuid;

fn unique_fund(tag: &str) -> String {
    format!("test_{tag}_{}", Uuid::new_v4().as_simple())
}

#[tokio::test]
async fn trades_and_disposals_roundtrip() -> Result<()> {
    if std::env::var(ftk_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: FTK_DATABASE_URL not set");
        return Ok(());
    }

    let pool = ftk_db::testkit_db_pool().await?;
    let store = PgStore::new(pool.clone(), unique_fund("roundtrip"));
    let other = PgStore::new(pool, unique_fund("other"));

    let t0 = Utc.with_ymd_and_hms(2024, 4, 1, 14, 30, 0).unwrap();
    let mut p = FifoTradeProcessor::new();
    let steps = [
        NewTrade::buy("AAPL", dec!(100), dec!(100.10), t0),
        NewTrade::buy("AAPL", dec!(100), dec!(120), t0 + Duration::days(1)),
        NewTrade::sell("AAPL", dec!(150.5), dec!(130), t0 + Duration::days(2)),
        NewTrade::buy("MSFT", dec!(0.125), dec!(410), t0 + Duration::days(3)),
    ];
    let mut written = Vec::new();
    for new in steps {
        let staged = p.stage(new, Uuid::new_v4())?;
        store.record_trade(staged.trade(), staged.disposal()).await?;
        written.push(p.commit(staged));
    }

    let history = store.get_trade_history(None).await?;
    assert_eq!(
        history,
        written.iter().map(|(t, _)| t.clone()).collect::<Vec<_>>()
    );
    assert_eq!(store.get_trade_history(Some("msft")).await?.len(), 1);
    assert!(other.get_trade_history(None).await?.is_empty());

    let disposals = store.get_realized_disposals(Some("AAPL")).await?;
    assert_eq!(disposals.len(), 1);
    assert_eq!(Some(&disposals[0]), written[2].1.as_ref());
    assert_eq!(disposals[0].slices.len(), 2);

    // Idempotent by id.
    let (sell, sell_disposal) = &written[2];
    store.record_trade(sell, sell_disposal.as_ref()).await?;
    assert_eq!(store.get_trade_history(None).await?.len(), 4);
    assert_eq!(store.get_realized_disposals(None).await?.len(), 1);

    // Replay from the stored history reproduces the processor.
    let replayed = FifoTradeProcessor::replay(&history)?;
    assert_eq!(replayed, p);
    Ok(())
}

#[tokio::test]
async fn snapshots_and_markers() -> Result<()> {
    if std::env::var(ftk_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: FTK_DATABASE_URL not set");
        return Ok(());
    }

    let pool = ftk_db::testkit_db_pool().await?;
    let store = PgStore::new(pool, unique_fund("snap"));
    assert!(store.test_connection().await);
    assert!(store.get_latest_portfolio_snapshot().await?.is_none());

    let mut p = FifoTradeProcessor::new();
    p.execute_buy("AAPL", dec!(10), dec!(100), Utc::now())?;
    let first = p.snapshot(&marks([("AAPL", dec!(110))]), Utc::now())?;
    let second = p.snapshot(&marks([("AAPL", dec!(90))]), Utc::now())?;
    store.save_portfolio_snapshot(&first).await?;
    store.save_portfolio_snapshot(&second).await?;
    store.save_portfolio_snapshot(&first).await?;

    let all = store.get_portfolio_data().await?;
    assert_eq!(all.len(), 2);
    let latest = store.get_latest_portfolio_snapshot().await?.expect("latest");
    assert_eq!(latest.snapshot_id, second.snapshot_id);
    assert_eq!(latest.total_unrealized_pnl, dec!(-100));
    assert_eq!(latest.positions, second.positions);

    let marker = WriteSkewMarker {
        row_id: second.snapshot_id,
        kind: MirrorKind::Snapshot,
        ticker: None,
        store: "local".to_string(),
        recorded_at: Utc::now(),
        error: "disk full".to_string(),
    };
    store.record_write_skew(&marker).await?;
    let open = store.get_write_skew_markers().await?;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].row_id, second.snapshot_id);

    store
        .resolve_write_skew(second.snapshot_id, MirrorKind::Snapshot)
        .await?;
    assert!(store.get_write_skew_markers().await?.is_empty());
    Ok(())
}
