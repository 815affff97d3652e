//! Secondary outage never fails a write.
//!
//! GREEN when: with the secondary offline, `record_trade` succeeds, the
//! primary holds the trade, `test_connection()` is false, and an open
//! write-skew marker names the trade and the store that missed it.

use std::sync::Arc;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use ftk_ledger::{
    DualWriteOptions, DualWriteRepository, LedgerStore, MemoryStore, MirrorKind, ReplicationMode,
    SecondaryOutcome, StoreHealth,
};
use ftk_portfolio::NewTrade;
use rust_decimal_macros::dec;

#[tokio::test]
async fn secondary_offline_after_open_records_skew() -> Result<()> {
    let primary = Arc::new(MemoryStore::new("local"));
    let secondary = Arc::new(MemoryStore::new("remote"));
    let repo = DualWriteRepository::open(
        primary.clone(),
        Some(secondary.clone()),
        DualWriteOptions::default(),
    )
    .await?;
    assert!(repo.replication_mode().is_dual_write());

    secondary.set_online(false);

    let at = Utc.with_ymd_and_hms(2024, 5, 1, 14, 30, 0).unwrap();
    let receipt = repo
        .record(NewTrade::buy("AAPL", dec!(10), dec!(150), at))
        .await?;

    assert!(matches!(
        receipt.secondary,
        SecondaryOutcome::Failed { store: "remote", .. }
    ));
    assert!(!repo.test_connection().await);

    let history = repo.get_trade_history(None).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].trade_id, receipt.trade.trade_id);
    assert_eq!(secondary.trade_count(), 0);

    let markers = repo.write_skew_markers().await?;
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].row_id, receipt.trade.trade_id);
    assert_eq!(markers[0].kind, MirrorKind::Trade);
    assert_eq!(markers[0].ticker.as_deref(), Some("AAPL"));
    assert_eq!(markers[0].store, "remote");

    assert_eq!(repo.open_shares("aapl").await, dec!(10));

    let health = repo.health().await;
    assert!(health.primary.reachable);
    assert_eq!(
        health.secondary,
        Some(StoreHealth {
            store: "remote",
            reachable: false,
        })
    );
    assert_eq!(health.open_write_skew, Some(1));
    Ok(())
}

#[tokio::test]
async fn secondary_unreachable_at_open_degrades_to_single_store() -> Result<()> {
    let primary = Arc::new(MemoryStore::new("local"));
    let secondary = Arc::new(MemoryStore::new("remote"));
    secondary.set_online(false);

    let repo = DualWriteRepository::open(
        primary.clone(),
        Some(secondary.clone()),
        DualWriteOptions::default(),
    )
    .await?;

    assert!(matches!(
        repo.replication_mode(),
        ReplicationMode::SingleStore { .. }
    ));

    let receipt = repo
        .record(NewTrade::buy("MSFT", dec!(3), dec!(400), Utc::now()))
        .await?;
    assert_eq!(
        receipt.secondary,
        SecondaryOutcome::Skipped { store: "remote" }
    );
    assert_eq!(primary.get_write_skew_markers().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn slow_secondary_is_cut_off_by_timeout() -> Result<()> {
    let primary = Arc::new(MemoryStore::new("local"));
    let secondary = Arc::new(MemoryStore::new("remote"));
    let repo = DualWriteRepository::open(
        primary.clone(),
        Some(secondary.clone()),
        DualWriteOptions::with_timeout(std::time::Duration::from_millis(50)),
    )
    .await?;

    secondary.set_write_delay(std::time::Duration::from_millis(500));

    let receipt = repo
        .record(NewTrade::buy("AAPL", dec!(1), dec!(1), Utc::now()))
        .await?;

    match &receipt.secondary {
        SecondaryOutcome::Failed { error, .. } => assert!(error.contains("timed out"), "{error}"),
        other => panic!("expected timeout failure, got {other:?}"),
    }
    assert_eq!(primary.trade_count(), 1);
    Ok(())
}

#[tokio::test]
async fn no_secondary_is_not_skew() -> Result<()> {
    let primary = Arc::new(MemoryStore::new("local"));
    let repo = DualWriteRepository::open(primary.clone(), None, DualWriteOptions::default()).await?;

    let receipt = repo
        .record(NewTrade::buy("AAPL", dec!(1), dec!(1), Utc::now()))
        .await?;

    assert_eq!(receipt.secondary, SecondaryOutcome::NotConfigured);
    assert!(!receipt.secondary.is_skew());
    assert!(!repo.test_connection().await);
    assert!(primary.get_write_skew_markers().await?.is_empty());
    Ok(())
}
