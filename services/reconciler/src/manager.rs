//! Reconciliation manager
//!
//! Owns one feed's state machine for a (symbol, feed) key. Inbound calls
//! are turned into [`FeedEvent`]s, run through the reducer, and the
//! resulting effects are counted, logged, and forwarded:
//!
//! ```text
//! handle_snapshot ─┐
//! handle_delta ────┼──▶ reduce(state, event) ──▶ effects ──┬──▶ stats
//! validate_checksum┤                                       ├──▶ tracing
//! request_resync ──┘                                       └──▶ resync sink
//! ```
//!
//! Malformed deltas are absorbed and counted. Only apply and checksum
//! failures under `on_mismatch = error` come back as `Err`.

use std::mem;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use feed_types::errors::{ConfigError, ReconcileError};
use feed_types::ids::FeedKey;

use crate::apply::DeltaTarget;
use crate::checksum::{checksum_fn, ChecksumFn};
use crate::delta::Delta;
use crate::order_book::{OrderBookData, PriceLevel};
use crate::rules::ReconciliationRules;
use crate::snapshot::{Snapshot, SnapshotKind};
use crate::state::{
    reduce, Effect, FeedEvent, FeedState, ReducerContext, ResyncReason, ResyncRequest,
};
use crate::stats::ReconcileStats;

/// Receives resync requests as they are raised.
pub trait ResyncSink: Send {
    fn resync_requested(&self, request: &ResyncRequest);
}

impl<F> ResyncSink for F
where
    F: Fn(&ResyncRequest) + Send,
{
    fn resync_requested(&self, request: &ResyncRequest) {
        self(request)
    }
}

/// Effects produced by one inbound call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub effects: Vec<Effect>,
}

impl Outcome {
    pub fn resync_requested(&self) -> Option<&ResyncRequest> {
        self.effects.iter().find_map(|e| match e {
            Effect::ResyncRequested(request) => Some(request),
            _ => None,
        })
    }

    /// Whether the delta landed in the snapshot.
    pub fn applied(&self) -> bool {
        self.effects.iter().any(|e| matches!(e, Effect::Applied { .. }))
    }

    pub fn dropped(&self) -> bool {
        self.effects.iter().any(|e| matches!(e, Effect::Dropped { .. }))
    }

    pub fn buffered(&self) -> bool {
        self.effects.iter().any(|e| matches!(e, Effect::Buffered { .. }))
    }
}

pub struct ReconciliationManager<T> {
    key: FeedKey,
    kind: SnapshotKind,
    rules: ReconciliationRules,
    checksum: ChecksumFn<T>,
    state: FeedState<T>,
    stats: ReconcileStats,
    pending_resync: Option<ResyncRequest>,
    sink: Option<Box<dyn ResyncSink>>,
}

impl<T: DeltaTarget + 'static> ReconciliationManager<T> {
    /// Create a manager awaiting its first snapshot.
    pub fn new(
        key: FeedKey,
        kind: SnapshotKind,
        rules: ReconciliationRules,
    ) -> Result<Self, ConfigError> {
        rules.validate()?;

        info!(
            feed = %key,
            kind = ?kind,
            max_buffer_size = rules.max_buffer_size,
            max_gap_before_resync = rules.max_gap_before_resync,
            on_mismatch = ?rules.on_mismatch,
            "ReconciliationManager initialized"
        );

        Ok(Self::build(key, kind, rules))
    }

    /// Create a manager with default rules.
    pub fn with_defaults(key: FeedKey, kind: SnapshotKind) -> Self {
        Self::build(key, kind, ReconciliationRules::default())
    }

    fn build(key: FeedKey, kind: SnapshotKind, rules: ReconciliationRules) -> Self {
        Self {
            state: FeedState::awaiting(&rules),
            checksum: checksum_fn(|data: &T| data.default_checksum()),
            key,
            kind,
            rules,
            stats: ReconcileStats::default(),
            pending_resync: None,
            sink: None,
        }
    }
}

impl<T: DeltaTarget> ReconciliationManager<T> {
    /// Replace the checksum function (venue-specific formats).
    pub fn with_checksum(mut self, checksum: ChecksumFn<T>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_resync_sink(mut self, sink: impl ResyncSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Adopt a full-state snapshot and replay buffered deltas.
    pub fn handle_snapshot(&mut self, data: T, sequence_id: Option<u64>) -> Outcome {
        let snapshot = Snapshot::new(self.kind, self.key.symbol.clone(), data, sequence_id);
        self.adopt(snapshot)
    }

    /// Same as [`handle_snapshot`](Self::handle_snapshot) with an explicit
    /// venue timestamp.
    pub fn handle_snapshot_at(
        &mut self,
        data: T,
        sequence_id: Option<u64>,
        timestamp: i64,
    ) -> Outcome {
        let snapshot = Snapshot::new(self.kind, self.key.symbol.clone(), data, sequence_id)
            .with_timestamp(timestamp);
        self.adopt(snapshot)
    }

    fn adopt(&mut self, snapshot: Snapshot<T>) -> Outcome {
        // Adoption and replay never raise a fatal effect
        match self.dispatch(FeedEvent::Snapshot(snapshot)) {
            Ok(outcome) => outcome,
            Err(_) => Outcome::default(),
        }
    }

    /// Buffer, apply or drop one delta.
    pub fn handle_delta(&mut self, delta: Delta) -> Result<Outcome, ReconcileError> {
        self.dispatch(FeedEvent::Delta(delta))
    }

    /// Compare `expected` against the checksum of the current data.
    pub fn validate_checksum(&mut self, expected: &str) -> Result<Outcome, ReconcileError> {
        self.dispatch(FeedEvent::Checksum {
            expected: expected.to_string(),
        })
    }

    /// Drop local state and ask for a fresh snapshot.
    pub fn request_resync(&mut self) -> Outcome {
        match self.dispatch(FeedEvent::Resync {
            reason: ResyncReason::Manual,
        }) {
            Ok(outcome) => outcome,
            Err(_) => Outcome::default(),
        }
    }

    /// Drop local state without counting a resync.
    pub fn reset(&mut self) {
        self.pending_resync = None;
        let _ = self.dispatch(FeedEvent::Reset);
    }

    /// The latest unconsumed resync request.
    pub fn take_resync_request(&mut self) -> Option<ResyncRequest> {
        self.pending_resync.take()
    }

    fn dispatch(&mut self, event: FeedEvent<T>) -> Result<Outcome, ReconcileError> {
        let state = mem::replace(&mut self.state, FeedState::awaiting(&self.rules));
        let ctx = ReducerContext {
            key: &self.key,
            rules: &self.rules,
            checksum: &self.checksum,
        };
        let (next, effects) = reduce(state, event, &ctx);
        self.state = next;
        self.stats.record_all(&effects);

        let mut fatal = None;
        for effect in &effects {
            self.log_effect(effect);
            match effect {
                Effect::ResyncRequested(request) => {
                    if let Some(sink) = &self.sink {
                        sink.resync_requested(request);
                    }
                    self.pending_resync = Some(request.clone());
                }
                Effect::Fatal(e) => fatal = Some(e.clone()),
                _ => {}
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(Outcome { effects }),
        }
    }

    fn log_effect(&self, effect: &Effect) {
        let feed = &self.key;
        match effect {
            Effect::Buffered { sequence_id, buffered } => {
                debug!(
                    feed = %feed,
                    sequence = ?sequence_id,
                    buffer_size = buffered,
                    "Delta buffered awaiting snapshot"
                );
            }
            Effect::Evicted { sequence_id } => {
                warn!(
                    feed = %feed,
                    sequence = ?sequence_id,
                    capacity = self.rules.max_buffer_size,
                    "Delta buffer full, evicted oldest"
                );
            }
            Effect::Dropped { sequence_id, reason } => {
                warn!(
                    feed = %feed,
                    sequence = ?sequence_id,
                    reason = reason.label(),
                    detail = ?reason,
                    "Delta dropped"
                );
            }
            Effect::SnapshotAdopted { sequence_id } => {
                info!(feed = %feed, sequence = ?sequence_id, "Snapshot adopted");
            }
            Effect::Replayed { applied } => {
                info!(feed = %feed, applied = applied, "Buffered deltas replayed");
            }
            Effect::GapDetected(gap) => {
                warn!(
                    feed = %feed,
                    from_sequence = gap.first_missing(),
                    to_sequence = gap.last_missing(),
                    gap_size = gap.size,
                    severity = ?gap.severity,
                    "Sequence gap detected"
                );
            }
            Effect::Warned { sequence_id, message } => {
                warn!(feed = %feed, sequence = ?sequence_id, "{}", message);
            }
            Effect::Applied { sequence_id, stale } => {
                debug!(feed = %feed, sequence = ?sequence_id, stale = stale, "Delta applied");
            }
            Effect::ApplyFailed { sequence_id, error } => {
                warn!(
                    feed = %feed,
                    sequence = ?sequence_id,
                    error = %error,
                    kind = error.label(),
                    "Delta failed to apply"
                );
            }
            Effect::ChecksumVerified => debug!(feed = %feed, "Checksum verified"),
            Effect::ChecksumMismatch { expected, actual } => {
                warn!(feed = %feed, expected = %expected, actual = %actual, "Checksum mismatch");
            }
            Effect::ChecksumSkipped => debug!(feed = %feed, "Checksum validation skipped"),
            Effect::ResyncRequested(request) => {
                info!(
                    feed = %feed,
                    request_id = %request.id,
                    reason = ?request.reason,
                    last_sequence = ?request.last_sequence,
                    "Resync requested"
                );
            }
            Effect::Reset => info!(feed = %feed, "Feed state reset"),
            Effect::Fatal(e) => error!(feed = %feed, error = %e, "Reconciliation failed"),
        }
    }

    pub fn key(&self) -> &FeedKey {
        &self.key
    }

    pub fn kind(&self) -> SnapshotKind {
        self.kind
    }

    pub fn rules(&self) -> &ReconciliationRules {
        &self.rules
    }

    /// Clone of the current snapshot, if live.
    pub fn snapshot(&self) -> Option<Snapshot<T>> {
        self.state.snapshot().cloned()
    }

    /// Checksum of the current data, if live.
    pub fn current_checksum(&self) -> Option<String> {
        self.state.snapshot().map(|s| (self.checksum)(&s.data))
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, FeedState::Live { .. })
    }

    pub fn state_label(&self) -> &'static str {
        self.state.label()
    }

    pub fn buffered_len(&self) -> usize {
        self.state.buffered_len()
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }
}

impl ReconciliationManager<OrderBookData> {
    /// Best bid and best ask of the live book.
    pub fn best_bid_ask(&self) -> (Option<PriceLevel>, Option<PriceLevel>) {
        self.state
            .snapshot()
            .map(|s| s.data.best_bid_ask())
            .unwrap_or((None, None))
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        self.state.snapshot().and_then(|s| s.data.mid_price())
    }

    pub fn spread(&self) -> Option<Decimal> {
        self.state.snapshot().and_then(|s| s.data.spread())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MismatchPolicy;
    use crate::value::Value;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn make_manager(rules: ReconciliationRules) -> ReconciliationManager<OrderBookData> {
        let key = FeedKey::new("BTC/USDT", "orderbook");
        ReconciliationManager::new(key, SnapshotKind::OrderBook, rules).unwrap()
    }

    fn book(json: serde_json::Value) -> OrderBookData {
        serde_json::from_value(json).unwrap()
    }

    fn data(json: serde_json::Value) -> Value {
        Value::from_json(json).unwrap()
    }

    #[test]
    fn test_rejects_invalid_rules() {
        let result = ReconciliationManager::<Value>::new(
            FeedKey::new("BTC/USD", "ticker"),
            SnapshotKind::Ticker,
            ReconciliationRules {
                max_buffer_size: 0,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(ConfigError::ZeroBufferSize)));
    }

    #[test]
    fn test_starts_awaiting_snapshot() {
        let manager = make_manager(ReconciliationRules::default());
        assert!(!manager.is_live());
        assert_eq!(manager.state_label(), "awaiting_snapshot");
        assert!(manager.snapshot().is_none());
        assert_eq!(manager.best_bid_ask(), (None, None));
        assert_eq!(manager.stats(), ReconcileStats::default());
    }

    #[test]
    fn test_snapshot_then_delta() {
        let mut manager = make_manager(ReconciliationRules::default());
        manager.handle_snapshot(book(json!({"bids": [[100, 1]], "asks": [[101, 1]]})), Some(1));

        let outcome = manager
            .handle_delta(Delta::update("bids", data(json!([[100.5, 2]]))).with_sequence(2))
            .unwrap();

        assert!(outcome.applied());
        let best_bid = PriceLevel::new("100.5".parse().unwrap(), Decimal::from(2));
        assert_eq!(manager.best_bid_ask().0, Some(best_bid));
        assert_eq!(manager.mid_price(), Some("100.75".parse().unwrap()));
        assert_eq!(manager.spread(), Some("0.5".parse().unwrap()));
        assert_eq!(manager.stats().deltas_applied, 1);
        assert_eq!(manager.stats().snapshots_received, 1);
    }

    #[test]
    fn test_snapshot_is_a_clone() {
        let mut manager = make_manager(ReconciliationRules::default());
        manager.handle_snapshot(book(json!({"bids": [[100, 1]]})), Some(1));

        let mut copy = manager.snapshot().unwrap();
        copy.data.clear_side(crate::order_book::BookSide::Bid);

        assert_eq!(manager.snapshot().unwrap().data.bid_depth(), 1);
    }

    #[test]
    fn test_resync_sink_receives_requests() {
        let seen: Arc<Mutex<Vec<ResyncRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |request: &ResyncRequest| seen.lock().unwrap().push(request.clone())
        };
        let mut manager = make_manager(ReconciliationRules::default()).with_resync_sink(sink);
        manager.handle_snapshot(OrderBookData::new(), Some(5));

        let outcome = manager.request_resync();

        let received = seen.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].reason, ResyncReason::Manual);
        assert_eq!(received[0].last_sequence, Some(5));
        assert_eq!(outcome.resync_requested(), Some(&received[0]));
        assert_eq!(manager.take_resync_request().as_ref(), Some(&received[0]));
        assert!(manager.take_resync_request().is_none());
        assert_eq!(manager.stats().resyncs, 1);
    }

    #[test]
    fn test_reset_does_not_count_resync() {
        let mut manager = make_manager(ReconciliationRules::default());
        manager.handle_snapshot(OrderBookData::new(), Some(5));

        manager.reset();

        assert!(!manager.is_live());
        assert_eq!(manager.stats().resyncs, 0);
        assert!(manager.take_resync_request().is_none());
    }

    #[test]
    fn test_checksum_error_policy_propagates() {
        let mut manager = make_manager(ReconciliationRules {
            on_mismatch: MismatchPolicy::Error,
            ..Default::default()
        });
        manager.handle_snapshot(book(json!({"bids": [[100, 1]]})), Some(1));

        let err = manager.validate_checksum("deadbeef").unwrap_err();

        assert!(matches!(err, ReconcileError::ChecksumMismatch { .. }));
        assert!(manager.is_live());
        assert_eq!(manager.stats().checksum_failures, 1);
    }

    #[test]
    fn test_current_checksum_matches_validation() {
        let mut manager = make_manager(ReconciliationRules::default());
        manager.handle_snapshot(book(json!({"asks": [[101, 1]]})), Some(1));

        let checksum = manager.current_checksum().unwrap();
        let outcome = manager.validate_checksum(&checksum).unwrap();

        assert_eq!(outcome.effects, vec![Effect::ChecksumVerified]);
        assert_eq!(manager.stats().checksum_validations, 1);
    }

    #[test]
    fn test_custom_checksum() {
        let mut manager = make_manager(ReconciliationRules::default())
            .with_checksum(checksum_fn(|b: &OrderBookData| {
                format!("{}:{}", b.bid_depth(), b.ask_depth())
            }));
        manager.handle_snapshot(
            book(json!({"bids": [[100, 1]], "asks": [[101, 1], [102, 1]]})),
            None,
        );

        let outcome = manager.validate_checksum("1:2").unwrap();
        assert!(outcome.effects.contains(&Effect::ChecksumVerified));
    }

    #[test]
    fn test_checksum_compare_is_case_sensitive() {
        let mut manager = make_manager(ReconciliationRules::default())
            .with_checksum(checksum_fn(|_: &OrderBookData| "AbC".to_string()));
        manager.handle_snapshot(OrderBookData::new(), Some(1));

        assert!(manager.validate_checksum(" AbC\n").unwrap().resync_requested().is_none());

        let outcome = manager.validate_checksum("abc").unwrap();

        assert!(outcome.resync_requested().is_some());
        assert_eq!(manager.stats().checksum_failures, 1);
        assert!(!manager.is_live());
    }
}
