//! Primary/secondary ledger comparison.
//!
//! Deterministic, pure logic. No IO. The primary is authoritative; every
//! difference is reported from the secondary's point of view.

use std::collections::{BTreeMap, BTreeSet};

use ftk_portfolio::{Trade, TradeId};
use serde::Serialize;

use crate::store::{MirrorKind, WriteSkewMarker};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileAction {
    Clean,
    Drift,
}

/// Why a report is not clean. Stable ordering enforced by the engine.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileReason {
    MissingOnSecondary,
    UnknownOnSecondary,
    FieldMismatch,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileDiff {
    /// On the primary, absent from the secondary. `marked` when an open
    /// write-skew marker already accounts for it.
    MissingOnSecondary {
        trade_id: TradeId,
        ticker: String,
        marked: bool,
    },

    /// On the secondary only. The secondary never originates trades, so
    /// this always needs an operator.
    UnknownOnSecondary { trade_id: TradeId, ticker: String },

    FieldMismatch {
        trade_id: TradeId,
        field: String,
        primary: String,
        secondary: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub action: ReconcileAction,
    pub reasons: Vec<ReconcileReason>,
    pub diffs: Vec<ReconcileDiff>,
    pub primary_trades: usize,
    pub secondary_trades: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.action == ReconcileAction::Clean
    }

    /// Diffs no open marker explains.
    pub fn unexplained(&self) -> impl Iterator<Item = &ReconcileDiff> {
        self.diffs
            .iter()
            .filter(|d| !matches!(d, ReconcileDiff::MissingOnSecondary { marked: true, .. }))
    }
}

fn push_reason_once(reasons: &mut Vec<ReconcileReason>, r: ReconcileReason) {
    if !reasons.contains(&r) {
        reasons.push(r);
    }
}

fn compare_trades(
    primary: &Trade,
    secondary: &Trade,
    diffs: &mut Vec<ReconcileDiff>,
    reasons: &mut Vec<ReconcileReason>,
) {
    let fields: [(&str, String, String); 7] = [
        ("ticker", primary.ticker.clone(), secondary.ticker.clone()),
        (
            "action",
            primary.action.to_string(),
            secondary.action.to_string(),
        ),
        (
            "shares",
            primary.shares.normalize().to_string(),
            secondary.shares.normalize().to_string(),
        ),
        (
            "price",
            primary.price.normalize().to_string(),
            secondary.price.normalize().to_string(),
        ),
        (
            "timestamp",
            primary.timestamp.to_rfc3339(),
            secondary.timestamp.to_rfc3339(),
        ),
        (
            "currency",
            primary.currency.clone(),
            secondary.currency.clone(),
        ),
        ("notes", primary.notes.clone(), secondary.notes.clone()),
    ];

    for (field, p, s) in fields {
        if p != s {
            diffs.push(ReconcileDiff::FieldMismatch {
                trade_id: primary.trade_id,
                field: field.to_string(),
                primary: p,
                secondary: s,
            });
            push_reason_once(reasons, ReconcileReason::FieldMismatch);
        }
    }
}

/// Compare two trade histories by trade id.
///
/// Decimal fields compare by value (`1.50` equals `1.5`), since a database
/// column may rescale what a JSON line kept verbatim.
pub fn reconcile_ledgers(
    primary: &[Trade],
    secondary: &[Trade],
    open_markers: &[WriteSkewMarker],
) -> ReconcileReport {
    let mut reasons = Vec::new();
    let mut diffs = Vec::new();

    let marked: BTreeSet<TradeId> = open_markers
        .iter()
        .filter(|m| m.kind == MirrorKind::Trade)
        .map(|m| m.row_id)
        .collect();
    let primary_by_id: BTreeMap<TradeId, &Trade> =
        primary.iter().map(|t| (t.trade_id, t)).collect();
    let secondary_by_id: BTreeMap<TradeId, &Trade> =
        secondary.iter().map(|t| (t.trade_id, t)).collect();

    // 1) Rows the secondary never received, or that drifted.
    for (id, p) in &primary_by_id {
        match secondary_by_id.get(id) {
            None => {
                diffs.push(ReconcileDiff::MissingOnSecondary {
                    trade_id: *id,
                    ticker: p.ticker.clone(),
                    marked: marked.contains(id),
                });
                push_reason_once(&mut reasons, ReconcileReason::MissingOnSecondary);
            }
            Some(s) => compare_trades(p, s, &mut diffs, &mut reasons),
        }
    }

    // 2) Rows only the secondary has.
    for (id, s) in &secondary_by_id {
        if !primary_by_id.contains_key(id) {
            diffs.push(ReconcileDiff::UnknownOnSecondary {
                trade_id: *id,
                ticker: s.ticker.clone(),
            });
            push_reason_once(&mut reasons, ReconcileReason::UnknownOnSecondary);
        }
    }

    reasons.sort();
    diffs.sort();

    ReconcileReport {
        action: if reasons.is_empty() {
            ReconcileAction::Clean
        } else {
            ReconcileAction::Drift
        },
        reasons,
        diffs,
        primary_trades: primary.len(),
        secondary_trades: secondary.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ftk_portfolio::NewTrade;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn buy(ticker: &str) -> Trade {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
        NewTrade::buy(ticker, dec!(10), dec!(100), at).into_trade(Uuid::new_v4())
    }

    #[test]
    fn identical_ledgers_are_clean() {
        let a = vec![buy("AAPL"), buy("MSFT")];
        let r = reconcile_ledgers(&a, &a, &[]);
        assert!(r.is_clean());
        assert_eq!(r.primary_trades, 2);
        assert_eq!(r.secondary_trades, 2);
    }

    #[test]
    fn rescaled_decimal_is_not_drift() {
        let p = buy("AAPL");
        let mut s = p.clone();
        s.price = dec!(100.0000);
        assert!(reconcile_ledgers(&[p], &[s], &[]).is_clean());
    }

    #[test]
    fn every_kind_of_drift_is_reported_in_stable_order() {
        let missing = buy("AAPL");
        let shared = buy("MSFT");
        let mut drifted = shared.clone();
        drifted.shares = dec!(11);
        let stray = buy("TSLA");

        let r = reconcile_ledgers(
            &[missing.clone(), shared.clone()],
            &[drifted, stray.clone()],
            &[],
        );

        assert_eq!(r.action, ReconcileAction::Drift);
        assert_eq!(
            r.reasons,
            vec![
                ReconcileReason::MissingOnSecondary,
                ReconcileReason::UnknownOnSecondary,
                ReconcileReason::FieldMismatch,
            ]
        );
        assert!(r.diffs.contains(&ReconcileDiff::MissingOnSecondary {
            trade_id: missing.trade_id,
            ticker: "AAPL".to_string(),
            marked: false,
        }));
        assert!(r.diffs.contains(&ReconcileDiff::UnknownOnSecondary {
            trade_id: stray.trade_id,
            ticker: "TSLA".to_string(),
        }));
        assert!(r.diffs.contains(&ReconcileDiff::FieldMismatch {
            trade_id: shared.trade_id,
            field: "shares".to_string(),
            primary: "10".to_string(),
            secondary: "11".to_string(),
        }));
    }

    #[test]
    fn marked_gap_is_explained() {
        let t = buy("AAPL");
        let marker = WriteSkewMarker {
            row_id: t.trade_id,
            kind: MirrorKind::Trade,
            ticker: Some("AAPL".to_string()),
            store: "postgres".to_string(),
            recorded_at: Utc::now(),
            error: "timed out".to_string(),
        };

        let r = reconcile_ledgers(&[t], &[], &[marker]);
        assert!(!r.is_clean());
        assert_eq!(r.unexplained().count(), 0);
    }
}
