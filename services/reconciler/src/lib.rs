//! Feed Reconciliation Engine
//!
//! Keeps a local replica of exchange feed state (order books, tickers,
//! trades) consistent by combining periodic full-state snapshots with an
//! ordered stream of incremental deltas:
//! - Delta validation against the current snapshot
//! - Path-addressed delta application over a tagged value tree
//! - Order-book price-level semantics (sorted sides, upsert, zero-amount removal)
//! - Sequence gap detection with severity classification
//! - A per-feed state machine with buffering, replay, resync and checksums
//!
//! # Architecture
//!
//! ```text
//!   snapshots        deltas        checksums
//!       │               │               │
//!   ┌───▼───────────────▼───────────────▼───┐
//!   │        ReconciliationManager          │
//!   │  reduce(state, event) → effects       │
//!   └───┬───────────────┬───────────────┬───┘
//!       │               │               │
//!  ┌────▼─────┐   ┌─────▼─────┐   ┌─────▼─────┐
//!  │ Validate │   │   Apply   │   │   Gaps    │
//!  └────┬─────┘   └─────┬─────┘   └───────────┘
//!       │               │
//!       └──────┬────────┘
//!        ┌─────▼──────┐
//!        │ DeltaTarget│  ← Value tree / OrderBookData
//!        └────────────┘
//! ```
//!
//! The manager does no I/O. The optional [`driver`] serialises calls from
//! several transports onto one tokio task.

pub mod value;
pub mod path;
pub mod snapshot;
pub mod delta;
pub mod validate;
pub mod apply;
pub mod order_book;
pub mod gaps;
pub mod buffer;
pub mod rules;
pub mod checksum;
pub mod state;
pub mod stats;
pub mod manager;
pub mod driver;

pub use apply::{apply, apply_deltas, apply_deltas_with, ApplyResult, DeltaTarget};
pub use delta::{merge_delta, sort_deltas_by_sequence, ConflictResolution, Delta, DeltaKind};
pub use gaps::{find_gaps, Gap, GapSeverity, GapThresholds};
pub use manager::{Outcome, ReconciliationManager, ResyncSink};
pub use order_book::{merge_order_book_levels, sort_order_book, BookSide, OrderBookData, PriceLevel};
pub use rules::{MismatchPolicy, ReconciliationRules, StalePolicy};
pub use snapshot::{create_snapshot, Snapshot, SnapshotKind};
pub use state::{ResyncReason, ResyncRequest};
pub use stats::ReconcileStats;
pub use validate::{validate, ValidationResult};
pub use value::Value;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
