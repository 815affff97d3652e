//! ftk-ledger
//!
//! Persistence and replication for the trade ledger:
//! - `LedgerStore`: object-safe async persistence contract every backend implements
//! - `RepositoryPort`: caller-facing contract (`record_trade` → trade id, primary-only reads)
//! - `DualWriteRepository`: primary is authoritative and fatal on failure,
//!   secondary is a best-effort mirror under a timeout
//! - Secondary gaps are recorded as write-skew markers on the primary and
//!   repaired only by an explicit replay
//! - Reconciliation of primary vs secondary by trade id
//! - `MemoryStore`: in-process backend with fault injection for tests
//! - `UnavailableStore`: placeholder for a configured mirror that failed to open

mod dual_write;
mod error;
mod memory;
mod port;
mod reconcile;
mod store;
mod unavailable;

pub use dual_write::{
    DualWriteOptions, DualWriteRepository, LedgerHealth, ReplicationMode, SecondaryOutcome,
    SingleStoreReason, SkewReplayFailure, SkewReplayReport, SnapshotReceipt, StoreHealth,
    TradeReceipt, DEFAULT_SECONDARY_TIMEOUT,
};
pub use error::RepoError;
pub use memory::MemoryStore;
pub use port::RepositoryPort;
pub use reconcile::{
    reconcile_ledgers, ReconcileAction, ReconcileDiff, ReconcileReason, ReconcileReport,
};
pub use store::{normalize_ticker, LedgerStore, MirrorKind, WriteSkewMarker};
pub use unavailable::UnavailableStore;
