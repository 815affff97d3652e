use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ftk_ledger::{normalize_ticker, LedgerStore, MirrorKind, WriteSkewMarker};
use ftk_portfolio::{
    LotSlice, PortfolioPosition, PortfolioSnapshot, RealizedDisposal, Trade, TradeAction,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

/// Ledger store over a Postgres pool, scoped to one fund.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    fund: String,
}

impl PgStore {
    pub fn new(pool: PgPool, fund: impl Into<String>) -> Self {
        Self {
            pool,
            fund: fund.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn fund(&self) -> &str {
        &self.fund
    }
}

fn trade_from_row(row: &PgRow) -> Result<Trade> {
    let action: String = row.try_get("action")?;
    Ok(Trade {
        trade_id: row.try_get("trade_id")?,
        ticker: row.try_get("ticker")?,
        action: TradeAction::parse(&action)
            .ok_or_else(|| anyhow!("unknown trade action {action:?}"))?,
        shares: row.try_get("shares")?,
        price: row.try_get("price")?,
        timestamp: row.try_get("executed_at")?,
        currency: row.try_get("currency")?,
        notes: row.try_get("notes")?,
    })
}

fn disposal_from_row(row: &PgRow) -> Result<RealizedDisposal> {
    let Json(slices): Json<Vec<LotSlice>> = row.try_get("slices")?;
    Ok(RealizedDisposal {
        trade_id: row.try_get("trade_id")?,
        ticker: row.try_get("ticker")?,
        sold_at: row.try_get("sold_at")?,
        sell_price: row.try_get("sell_price")?,
        matched_shares: row.try_get("matched_shares")?,
        matched_cost: row.try_get("matched_cost")?,
        proceeds: row.try_get("proceeds")?,
        realized_pnl: row.try_get("realized_pnl")?,
        slices,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<PortfolioSnapshot> {
    let Json(positions): Json<Vec<PortfolioPosition>> = row.try_get("positions")?;
    Ok(PortfolioSnapshot {
        snapshot_id: row.try_get("snapshot_id")?,
        as_of: row.try_get("as_of")?,
        positions,
        total_cost_basis: row.try_get("total_cost_basis")?,
        total_market_value: row.try_get("total_market_value")?,
        total_unrealized_pnl: row.try_get("total_unrealized_pnl")?,
        total_realized_pnl: row.try_get("total_realized_pnl")?,
    })
}

fn marker_from_row(row: &PgRow) -> Result<WriteSkewMarker> {
    let kind: String = row.try_get("kind")?;
    Ok(WriteSkewMarker {
        row_id: row.try_get("row_id")?,
        kind: MirrorKind::parse(&kind).ok_or_else(|| anyhow!("unknown marker kind {kind:?}"))?,
        ticker: row.try_get("ticker")?,
        store: row.try_get("store")?,
        recorded_at: row.try_get::<DateTime<Utc>, _>("recorded_at")?,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl LedgerStore for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn record_trade(
        &self,
        trade: &Trade,
        disposal: Option<&RealizedDisposal>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin record_trade failed")?;

        let inserted = sqlx::query(
            r#"
            insert into ledger_trades (
              fund, trade_id, ticker, action, shares, price, executed_at, currency, notes
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9
            )
            on conflict (trade_id) do nothing
            "#,
        )
        .bind(&self.fund)
        .bind(trade.trade_id)
        .bind(&trade.ticker)
        .bind(trade.action.as_str())
        .bind(trade.shares)
        .bind(trade.price)
        .bind(trade.timestamp)
        .bind(&trade.currency)
        .bind(&trade.notes)
        .execute(&mut *tx)
        .await
        .context("insert ledger_trades failed")?
        .rows_affected();

        if inserted == 0 {
            debug!(trade_id = %trade.trade_id, "trade already stored");
            tx.commit().await.context("commit record_trade failed")?;
            return Ok(());
        }

        if let Some(d) = disposal {
            sqlx::query(
                r#"
                insert into ledger_disposals (
                  trade_id, fund, ticker, sold_at, sell_price, matched_shares,
                  matched_cost, proceeds, realized_pnl, slices
                ) values (
                  $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
                )
                "#,
            )
            .bind(d.trade_id)
            .bind(&self.fund)
            .bind(&d.ticker)
            .bind(d.sold_at)
            .bind(d.sell_price)
            .bind(d.matched_shares)
            .bind(d.matched_cost)
            .bind(d.proceeds)
            .bind(d.realized_pnl)
            .bind(Json(&d.slices))
            .execute(&mut *tx)
            .await
            .context("insert ledger_disposals failed")?;
        }

        tx.commit().await.context("commit record_trade failed")?;
        Ok(())
    }

    async fn get_trade_history(&self, ticker: Option<&str>) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            select trade_id, ticker, action, shares, price, executed_at, currency, notes
            from ledger_trades
            where fund = $1
              and ($2::text is null or ticker = $2)
            order by seq asc
            "#,
        )
        .bind(&self.fund)
        .bind(ticker.map(normalize_ticker))
        .fetch_all(&self.pool)
        .await
        .context("select ledger_trades failed")?;

        rows.iter().map(trade_from_row).collect()
    }

    async fn get_realized_disposals(&self, ticker: Option<&str>) -> Result<Vec<RealizedDisposal>> {
        let rows = sqlx::query(
            r#"
            select d.trade_id, d.ticker, d.sold_at, d.sell_price, d.matched_shares,
                   d.matched_cost, d.proceeds, d.realized_pnl, d.slices
            from ledger_disposals d
            join ledger_trades t on t.trade_id = d.trade_id
            where d.fund = $1
              and ($2::text is null or d.ticker = $2)
            order by t.seq asc
            "#,
        )
        .bind(&self.fund)
        .bind(ticker.map(normalize_ticker))
        .fetch_all(&self.pool)
        .await
        .context("select ledger_disposals failed")?;

        rows.iter().map(disposal_from_row).collect()
    }

    async fn save_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            insert into portfolio_snapshots (
              fund, snapshot_id, as_of, total_cost_basis, total_market_value,
              total_unrealized_pnl, total_realized_pnl, positions
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8
            )
            on conflict (snapshot_id) do nothing
            "#,
        )
        .bind(&self.fund)
        .bind(snapshot.snapshot_id)
        .bind(snapshot.as_of)
        .bind(snapshot.total_cost_basis)
        .bind(snapshot.total_market_value)
        .bind(snapshot.total_unrealized_pnl)
        .bind(snapshot.total_realized_pnl)
        .bind(Json(&snapshot.positions))
        .execute(&self.pool)
        .await
        .context("insert portfolio_snapshots failed")?;
        Ok(())
    }

    async fn get_portfolio_data(&self) -> Result<Vec<PortfolioSnapshot>> {
        let rows = sqlx::query(
            r#"
            select snapshot_id, as_of, total_cost_basis, total_market_value,
                   total_unrealized_pnl, total_realized_pnl, positions
            from portfolio_snapshots
            where fund = $1
            order by seq asc
            "#,
        )
        .bind(&self.fund)
        .fetch_all(&self.pool)
        .await
        .context("select portfolio_snapshots failed")?;

        rows.iter().map(snapshot_from_row).collect()
    }

    async fn get_latest_portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>> {
        let row = sqlx::query(
            r#"
            select snapshot_id, as_of, total_cost_basis, total_market_value,
                   total_unrealized_pnl, total_realized_pnl, positions
            from portfolio_snapshots
            where fund = $1
            order by seq desc
            limit 1
            "#,
        )
        .bind(&self.fund)
        .fetch_optional(&self.pool)
        .await
        .context("select latest portfolio_snapshot failed")?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn record_write_skew(&self, marker: &WriteSkewMarker) -> Result<()> {
        sqlx::query(
            r#"
            insert into write_skew_markers (
              fund, row_id, kind, ticker, store, recorded_at, error
            ) values (
              $1, $2, $3, $4, $5, $6, $7
            )
            "#,
        )
        .bind(&self.fund)
        .bind(marker.row_id)
        .bind(marker.kind.as_str())
        .bind(marker.ticker.as_deref())
        .bind(&marker.store)
        .bind(marker.recorded_at)
        .bind(&marker.error)
        .execute(&self.pool)
        .await
        .context("insert write_skew_markers failed")?;
        Ok(())
    }

    async fn resolve_write_skew(&self, row_id: Uuid, kind: MirrorKind) -> Result<()> {
        sqlx::query(
            r#"
            update write_skew_markers
               set resolved_at = now()
             where fund = $1
               and row_id = $2
               and kind = $3
               and resolved_at is null
            "#,
        )
        .bind(&self.fund)
        .bind(row_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await
        .context("resolve write_skew_markers failed")?;
        Ok(())
    }

    async fn get_write_skew_markers(&self) -> Result<Vec<WriteSkewMarker>> {
        let rows = sqlx::query(
            r#"
            select row_id, kind, ticker, store, recorded_at, error
            from write_skew_markers
            where fund = $1
              and resolved_at is null
            order by marker_id asc
            "#,
        )
        .bind(&self.fund)
        .fetch_all(&self.pool)
        .await
        .context("select write_skew_markers failed")?;

        rows.iter().map(marker_from_row).collect()
    }

    async fn test_connection(&self) -> bool {
        sqlx::query_as::<_, (i32,)>("select 1")
            .fetch_one(&self.pool)
            .await
            .map(|(one,)| one == 1)
            .unwrap_or(false)
    }
}
