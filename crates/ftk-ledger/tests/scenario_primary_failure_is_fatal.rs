//! The primary is authoritative.
//!
//! GREEN when: a refused primary write fails the call with
//! `PrimaryWriteFailure`, leaves the in-memory lots untouched, and never
//! reaches the secondary. Rejected trades write nothing anywhere, including
//! trades whose running totals would leave the Decimal range.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use ftk_ledger::{DualWriteOptions, DualWriteRepository, MemoryStore, RepoError};
use ftk_portfolio::{MarkMap, NewTrade, TradeError};
use rust_decimal_macros::dec;

async fn open() -> Result<(Arc<MemoryStore>, Arc<MemoryStore>, DualWriteRepository)> {
    let primary = Arc::new(MemoryStore::new("local"));
    let secondary = Arc::new(MemoryStore::new("remote"));
    let repo = DualWriteRepository::open(
        primary.clone(),
        Some(secondary.clone()),
        DualWriteOptions::default(),
    )
    .await?;
    Ok((primary, secondary, repo))
}

#[tokio::test]
async fn primary_refusal_fails_without_mutation() -> Result<()> {
    let (primary, secondary, repo) = open().await?;
    repo.execute_buy("AAPL", dec!(10), dec!(100), Utc::now())
        .await?;

    primary.set_fail_writes(true);
    let err = repo
        .execute_sell("AAPL", dec!(4), dec!(120), Utc::now())
        .await
        .unwrap_err();
    assert!(
        matches!(err, RepoError::PrimaryWriteFailure { store: "local", .. }),
        "{err}"
    );

    assert_eq!(repo.open_shares("AAPL").await, dec!(10));
    assert_eq!(primary.trade_count(), 1);
    assert_eq!(secondary.trade_count(), 1);

    // Once the primary recovers the same sell goes through against the untouched lots.
    primary.set_fail_writes(false);
    let (_, disposal) = repo
        .execute_sell("AAPL", dec!(4), dec!(120), Utc::now())
        .await?;
    assert_eq!(disposal.realized_pnl, dec!(80));
    assert_eq!(repo.open_shares("AAPL").await, dec!(6));
    Ok(())
}

#[tokio::test]
async fn rejected_trades_write_nothing() -> Result<()> {
    let (primary, secondary, repo) = open().await?;

    let err = repo
        .record_trade(NewTrade::sell("TSLA", dec!(1), dec!(1), Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Trade(TradeError::NoOpenPosition { .. })
    ));
    assert!(err.is_rejection());

    repo.execute_buy("AAPL", dec!(10), dec!(5), Utc::now())
        .await?;
    let err = repo
        .execute_sell("AAPL", dec!(20), dec!(6), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Trade(TradeError::InsufficientShares { .. })
    ));

    assert_eq!(primary.trade_count(), 1);
    assert_eq!(secondary.trade_count(), 1);
    assert_eq!(repo.open_shares("AAPL").await, dec!(10));
    Ok(())
}

#[tokio::test]
async fn oversized_totals_are_rejected_and_ledger_stays_usable() -> Result<()> {
    let (primary, secondary, repo) = open().await?;
    let big = dec!(50000000000000000000000000000);

    repo.execute_buy("AAPL", big, dec!(0), Utc::now()).await?;
    let err = repo
        .execute_buy("AAPL", big, dec!(0), Utc::now())
        .await
        .unwrap_err();
    assert!(
        matches!(err, RepoError::Trade(TradeError::Validation { field: "shares", .. })),
        "{err}"
    );
    assert_eq!(primary.trade_count(), 1);
    assert_eq!(secondary.trade_count(), 1);

    // Later calls still go through.
    let (_, disposal) = repo
        .execute_sell("AAPL", dec!(1), dec!(0), Utc::now())
        .await?;
    assert_eq!(disposal.realized_pnl, dec!(0));
    assert_eq!(repo.positions(&MarkMap::new()).await?.len(), 1);
    assert_eq!(repo.open_shares("AAPL").await, big - dec!(1));
    Ok(())
}
