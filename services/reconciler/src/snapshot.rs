//! Snapshot store records
//!
//! A snapshot is the complete, self-consistent state of one feed for a
//! symbol, tagged with the sequence identifier of the last update it
//! includes. Snapshots are replaced, never edited: every applied delta
//! yields a new one.

use serde::{Deserialize, Serialize};

use feed_types::ids::Symbol;
use feed_types::time::now_nanos;

/// What a snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    OrderBook,
    Ticker,
    Trades,
    Ohlcv,
    Generic,
}

/// A versioned container for feed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub kind: SnapshotKind,
    pub symbol: Symbol,
    pub data: T,
    /// Unix nanoseconds when this snapshot was produced.
    pub timestamp: i64,
    /// Sequence identifier of the last update folded into `data`.
    /// `None` for unordered feeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
}

impl<T> Snapshot<T> {
    /// Create a snapshot stamped with the current time.
    pub fn new(kind: SnapshotKind, symbol: Symbol, data: T, sequence_id: Option<u64>) -> Self {
        Self {
            kind,
            symbol,
            data,
            timestamp: now_nanos(),
            sequence_id,
        }
    }

    /// Override the creation timestamp (exchange time, replay time).
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Successor snapshot carrying `data`, stamped now.
    ///
    /// The sequence identifier advances to `sequence_id` when given and is
    /// kept otherwise.
    pub fn succeed(&self, data: T, sequence_id: Option<u64>) -> Self {
        Self {
            kind: self.kind,
            symbol: self.symbol.clone(),
            data,
            timestamp: now_nanos(),
            sequence_id: sequence_id.or(self.sequence_id),
        }
    }

    /// Whether an update with `sequence_id` is already included in this
    /// snapshot and can be discarded.
    pub fn supersedes(&self, sequence_id: u64) -> bool {
        self.sequence_id.is_some_and(|current| sequence_id <= current)
    }
}

/// Build a snapshot from borrowed data, cloning it so later mutation of the
/// caller's copy cannot leak into the stored state.
pub fn create_snapshot<T: Clone>(
    data: &T,
    kind: SnapshotKind,
    symbol: impl Into<Symbol>,
) -> Snapshot<T> {
    Snapshot::new(kind, symbol.into(), data.clone(), None)
}
