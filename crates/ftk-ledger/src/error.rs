use ftk_portfolio::{TradeError, TradeId};
use thiserror::Error;

/// Failures surfaced by the dual-write repository.
///
/// Secondary-store failures are deliberately absent from the `Result` of a
/// write: they are reported through [`crate::SecondaryOutcome`] and a
/// write-skew marker instead. [`RepoError::SecondaryWriteFailure`] only
/// escapes from explicit secondary operations such as replaying skew.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The trade was rejected by the accounting rules; nothing was written.
    #[error(transparent)]
    Trade(#[from] TradeError),

    /// The authoritative store did not acknowledge the write; nothing was committed.
    #[error("primary store '{store}' write failed: {source:#}")]
    PrimaryWriteFailure {
        store: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("secondary store '{store}' write failed for {row_id}: {source:#}")]
    SecondaryWriteFailure {
        store: &'static str,
        row_id: TradeId,
        #[source]
        source: anyhow::Error,
    },

    #[error("store '{store}' is unreachable: {reason}")]
    Connection { store: &'static str, reason: String },

    #[error("store '{store}' read failed: {source:#}")]
    Read {
        store: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Stored history could not be replayed through the FIFO rules.
    #[error("ledger replay rejected trade {trade_id}: {source}")]
    Replay {
        trade_id: TradeId,
        #[source]
        source: TradeError,
    },
}

impl RepoError {
    pub(crate) fn read(store: &'static str, source: anyhow::Error) -> Self {
        RepoError::Read { store, source }
    }

    /// True when the caller's input, not a store, caused the failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RepoError::Trade(_))
    }
}
