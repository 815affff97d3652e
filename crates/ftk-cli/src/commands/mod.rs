//! Command handlers for the `ftk` binary.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod db;
pub mod ledger;

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use ftk_ledger::normalize_ticker;
use ftk_portfolio::{Decimal, MarkMap};
use serde::Serialize;

/// Global config flags, passed to every handler that needs a ledger.
pub struct ConfigArgs {
    pub paths: Vec<PathBuf>,
    pub strict: bool,
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Parse repeated `--mark TICKER=PRICE` values. A later mark for the same
/// ticker overrides an earlier one.
pub fn parse_marks(raw: &[String]) -> Result<MarkMap> {
    let mut marks = MarkMap::new();
    for item in raw {
        let (ticker, price) = item
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --mark '{item}'. expected TICKER=PRICE"))?;
        let ticker = normalize_ticker(ticker);
        if ticker.is_empty() {
            bail!("invalid --mark '{item}': empty ticker");
        }
        let price: Decimal = price
            .trim()
            .parse()
            .with_context(|| format!("invalid --mark '{item}': price is not a decimal"))?;
        if price.is_sign_negative() {
            bail!("invalid --mark '{item}': price must be >= 0");
        }
        marks.insert(ticker, price);
    }
    Ok(marks)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output failed")?;
    println!("{out}");
    Ok(())
}
