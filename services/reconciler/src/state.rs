//! Feed state machine
//!
//! ```text
//!            delta (buffered)                 delta (applied)
//!              ┌──────┐                          ┌──────┐
//!              ▼      │        snapshot          ▼      │
//!     ┌──────────────────┐  ───────────────▶  ┌──────────────┐
//!     │ AwaitingSnapshot │                    │     Live     │
//!     └──────────────────┘  ◀───────────────  └──────────────┘
//!                            resync / reset
//! ```
//!
//! All transitions go through [`reduce`], which consumes the current state
//! and an event and returns the next state plus the effects the caller
//! must observe (statistics, logging, resync notifications). The reducer
//! does no I/O.

use serde::Serialize;

use feed_types::errors::{ApplyError, ReconcileError};
use feed_types::ids::{FeedKey, RequestId};
use feed_types::time::now_nanos;

use crate::apply::{apply, apply_deltas_with, DeltaTarget, FailureCause};
use crate::buffer::DeltaBuffer;
use crate::checksum::ChecksumFn;
use crate::delta::Delta;
use crate::gaps::{max_severity, Gap, GapSeverity};
use crate::rules::{MismatchPolicy, ReconciliationRules, StalePolicy};
use crate::snapshot::Snapshot;
use crate::validate::{is_stale, validate};

#[derive(Debug, Clone)]
pub enum FeedState<T> {
    AwaitingSnapshot { buffer: DeltaBuffer },
    Live { snapshot: Snapshot<T> },
}

impl<T> FeedState<T> {
    pub fn awaiting(rules: &ReconciliationRules) -> Self {
        FeedState::AwaitingSnapshot {
            buffer: DeltaBuffer::new(rules.max_buffer_size),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FeedState::AwaitingSnapshot { .. } => "awaiting_snapshot",
            FeedState::Live { .. } => "live",
        }
    }

    pub fn snapshot(&self) -> Option<&Snapshot<T>> {
        match self {
            FeedState::Live { snapshot } => Some(snapshot),
            FeedState::AwaitingSnapshot { .. } => None,
        }
    }

    pub fn buffered_len(&self) -> usize {
        match self {
            FeedState::AwaitingSnapshot { buffer } => buffer.len(),
            FeedState::Live { .. } => 0,
        }
    }

    fn last_sequence(&self) -> Option<u64> {
        self.snapshot().and_then(|s| s.sequence_id)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone)]
pub enum FeedEvent<T> {
    Snapshot(Snapshot<T>),
    Delta(Delta),
    Checksum { expected: String },
    Resync { reason: ResyncReason },
    Reset,
}

/// Why a resync was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ResyncReason {
    /// A live delta jumped too far past the expected sequence identifier.
    SequenceGap { expected: u64, received: u64 },
    /// Replaying buffered deltas left a hole of this severity.
    ReplayGap { severity: GapSeverity },
    ApplyFailure { error: String },
    ChecksumMismatch,
    Manual,
}

/// Outbound pull signal: the collaborator should fetch a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResyncRequest {
    pub id: RequestId,
    pub key: FeedKey,
    #[serde(flatten)]
    pub reason: ResyncReason,
    /// Sequence identifier of the snapshot being discarded.
    pub last_sequence: Option<u64>,
    /// Unix nanoseconds.
    pub requested_at: i64,
}

/// Why a delta was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No snapshot yet and buffering is disabled.
    NoSnapshot,
    Invalid(String),
    /// Already included in the adopted snapshot.
    Superseded,
    Stale,
    GapTooLarge,
    ApplyFailed(String),
}

impl DropReason {
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::NoSnapshot => "no_snapshot",
            DropReason::Invalid(_) => "invalid",
            DropReason::Superseded => "superseded",
            DropReason::Stale => "stale",
            DropReason::GapTooLarge => "gap_too_large",
            DropReason::ApplyFailed(_) => "apply_failed",
        }
    }
}

/// Observable consequences of a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Buffered { sequence_id: Option<u64>, buffered: usize },
    /// Oldest buffered delta evicted to make room.
    Evicted { sequence_id: Option<u64> },
    Dropped { sequence_id: Option<u64>, reason: DropReason },
    SnapshotAdopted { sequence_id: Option<u64> },
    Replayed { applied: usize },
    GapDetected(Gap),
    Warned { sequence_id: Option<u64>, message: String },
    Applied { sequence_id: Option<u64>, stale: bool },
    ApplyFailed { sequence_id: Option<u64>, error: ApplyError },
    ChecksumVerified,
    ChecksumMismatch { expected: String, actual: String },
    /// No snapshot to check, or checksum validation is disabled.
    ChecksumSkipped,
    ResyncRequested(ResyncRequest),
    Reset,
    /// Failure the caller must see (`on_mismatch = error`).
    Fatal(ReconcileError),
}

/// Everything the reducer reads besides state and event.
pub struct ReducerContext<'a, T> {
    pub key: &'a FeedKey,
    pub rules: &'a ReconciliationRules,
    pub checksum: &'a ChecksumFn<T>,
}

impl<'a, T> ReducerContext<'a, T> {
    fn resync(&self, reason: ResyncReason, last_sequence: Option<u64>) -> (FeedState<T>, Effect) {
        let request = ResyncRequest {
            id: RequestId::new(),
            key: self.key.clone(),
            reason,
            last_sequence,
            requested_at: now_nanos(),
        };
        (FeedState::awaiting(self.rules), Effect::ResyncRequested(request))
    }
}

/// Advance the state machine by one event.
pub fn reduce<T: DeltaTarget>(
    state: FeedState<T>,
    event: FeedEvent<T>,
    ctx: &ReducerContext<'_, T>,
) -> (FeedState<T>, Vec<Effect>) {
    let mut effects = Vec::new();
    let next = match event {
        FeedEvent::Snapshot(snapshot) => adopt_snapshot(state, snapshot, ctx, &mut effects),
        FeedEvent::Delta(delta) => match state {
            FeedState::AwaitingSnapshot { buffer } => {
                buffer_delta(buffer, delta, ctx, &mut effects)
            }
            FeedState::Live { snapshot } => apply_live(snapshot, delta, ctx, &mut effects),
        },
        FeedEvent::Checksum { expected } => check_checksum(state, expected, ctx, &mut effects),
        FeedEvent::Resync { reason } => {
            let (next, effect) = ctx.resync(reason, state.last_sequence());
            effects.push(effect);
            next
        }
        FeedEvent::Reset => {
            effects.push(Effect::Reset);
            FeedState::awaiting(ctx.rules)
        }
    };
    (next, effects)
}

fn buffer_delta<T>(
    mut buffer: DeltaBuffer,
    delta: Delta,
    ctx: &ReducerContext<'_, T>,
    effects: &mut Vec<Effect>,
) -> FeedState<T> {
    let sequence_id = delta.sequence_id;
    if !ctx.rules.buffer_deltas {
        effects.push(Effect::Dropped {
            sequence_id,
            reason: DropReason::NoSnapshot,
        });
        return FeedState::AwaitingSnapshot { buffer };
    }

    if let Some(evicted) = buffer.push(delta) {
        effects.push(Effect::Evicted {
            sequence_id: evicted.sequence_id,
        });
    }
    // Zero capacity hands the incoming delta straight back
    if buffer.capacity() > 0 {
        effects.push(Effect::Buffered {
            sequence_id,
            buffered: buffer.len(),
        });
    }
    FeedState::AwaitingSnapshot { buffer }
}

fn adopt_snapshot<T: DeltaTarget>(
    state: FeedState<T>,
    snapshot: Snapshot<T>,
    ctx: &ReducerContext<'_, T>,
    effects: &mut Vec<Effect>,
) -> FeedState<T> {
    let buffered = match state {
        FeedState::AwaitingSnapshot { mut buffer } => buffer.drain(),
        FeedState::Live { .. } => Vec::new(),
    };
    effects.push(Effect::SnapshotAdopted {
        sequence_id: snapshot.sequence_id,
    });

    let (superseded, replay): (Vec<Delta>, Vec<Delta>) = buffered
        .into_iter()
        .partition(|d| d.sequence_id.is_some_and(|seq| snapshot.supersedes(seq)));
    for delta in &superseded {
        effects.push(Effect::Dropped {
            sequence_id: delta.sequence_id,
            reason: DropReason::Superseded,
        });
    }
    if replay.is_empty() {
        return FeedState::Live { snapshot };
    }

    let thresholds = &ctx.rules.gap_thresholds;
    let result = apply_deltas_with(&snapshot, &replay, thresholds);

    let mut gaps = Vec::with_capacity(result.gaps.len() + 1);
    let first_replayed = replay.iter().filter_map(|d| d.sequence_id).min();
    if let (Some(base), Some(first)) = (snapshot.sequence_id, first_replayed) {
        gaps.extend(Gap::between(base, first, thresholds));
    }
    gaps.extend(result.gaps.iter().copied());

    effects.push(Effect::Replayed {
        applied: result.applied_count,
    });
    effects.extend(result.warnings.iter().map(|w| Effect::Warned {
        sequence_id: None,
        message: w.clone(),
    }));
    for failure in &result.failures {
        let reason = match &failure.cause {
            FailureCause::Invalid(reason) => DropReason::Invalid(reason.clone()),
            FailureCause::Apply(reason) => DropReason::ApplyFailed(reason.clone()),
        };
        effects.push(Effect::Dropped {
            sequence_id: failure.sequence_id,
            reason,
        });
    }
    effects.extend(gaps.iter().copied().map(Effect::GapDetected));

    match max_severity(&gaps) {
        Some(severity) if severity >= ctx.rules.replay_resync_severity => {
            let reason = ResyncReason::ReplayGap { severity };
            let (next, effect) = ctx.resync(reason, result.snapshot.sequence_id);
            effects.push(effect);
            next
        }
        _ => FeedState::Live {
            snapshot: result.snapshot,
        },
    }
}

fn apply_live<T: DeltaTarget>(
    snapshot: Snapshot<T>,
    delta: Delta,
    ctx: &ReducerContext<'_, T>,
    effects: &mut Vec<Effect>,
) -> FeedState<T> {
    let rules = ctx.rules;
    let sequence_id = delta.sequence_id;

    let validation = validate(&delta, &snapshot);
    effects.extend(
        validation
            .warnings
            .into_iter()
            .map(|message| Effect::Warned { sequence_id, message }),
    );
    if !validation.valid {
        effects.push(Effect::Dropped {
            sequence_id,
            reason: DropReason::Invalid(validation.error.unwrap_or_default()),
        });
        return FeedState::Live { snapshot };
    }

    let stale = is_stale(&delta, &snapshot);
    if stale && rules.stale_deltas == StalePolicy::Drop {
        effects.push(Effect::Dropped {
            sequence_id,
            reason: DropReason::Stale,
        });
        return FeedState::Live { snapshot };
    }

    if let (Some(seq), Some(current)) = (sequence_id, snapshot.sequence_id) {
        let expected = current.saturating_add(1);
        if seq > expected {
            let gap = Gap::between(current, seq, &rules.gap_thresholds);
            effects.extend(gap.map(Effect::GapDetected));
            if seq - expected > rules.max_gap_before_resync {
                effects.push(Effect::Dropped {
                    sequence_id,
                    reason: DropReason::GapTooLarge,
                });
                let (next, effect) = ctx.resync(
                    ResyncReason::SequenceGap {
                        expected,
                        received: seq,
                    },
                    Some(current),
                );
                effects.push(effect);
                return next;
            }
        }
    }

    match apply(&snapshot, &delta) {
        Ok(mut next) => {
            if stale {
                next.sequence_id = snapshot.sequence_id;
            }
            effects.push(Effect::Applied { sequence_id, stale });
            FeedState::Live { snapshot: next }
        }
        Err(error) => {
            effects.push(Effect::ApplyFailed {
                sequence_id,
                error: error.clone(),
            });
            match rules.on_mismatch {
                MismatchPolicy::Warn => FeedState::Live { snapshot },
                MismatchPolicy::Resync => {
                    let (next, effect) = ctx.resync(
                        ResyncReason::ApplyFailure {
                            error: error.to_string(),
                        },
                        snapshot.sequence_id,
                    );
                    effects.push(effect);
                    next
                }
                MismatchPolicy::Error => {
                    effects.push(Effect::Fatal(ReconcileError::Apply(error)));
                    FeedState::Live { snapshot }
                }
            }
        }
    }
}

fn check_checksum<T: DeltaTarget>(
    state: FeedState<T>,
    expected: String,
    ctx: &ReducerContext<'_, T>,
    effects: &mut Vec<Effect>,
) -> FeedState<T> {
    let snapshot = match state {
        FeedState::Live { snapshot } if ctx.rules.checksum_validation => snapshot,
        other => {
            effects.push(Effect::ChecksumSkipped);
            return other;
        }
    };

    let actual = (ctx.checksum)(&snapshot.data);
    if actual == expected.trim() {
        effects.push(Effect::ChecksumVerified);
        return FeedState::Live { snapshot };
    }

    effects.push(Effect::ChecksumMismatch {
        expected: expected.clone(),
        actual: actual.clone(),
    });
    match ctx.rules.on_mismatch {
        MismatchPolicy::Warn => FeedState::Live { snapshot },
        MismatchPolicy::Resync => {
            let (next, effect) = ctx.resync(ResyncReason::ChecksumMismatch, snapshot.sequence_id);
            effects.push(effect);
            next
        }
        MismatchPolicy::Error => {
            effects.push(Effect::Fatal(ReconcileError::ChecksumMismatch { expected, actual }));
            FeedState::Live { snapshot }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum_fn;
    use crate::snapshot::SnapshotKind;
    use crate::value::Value;
    use feed_types::ids::Symbol;
    use serde_json::json;

    fn key() -> FeedKey {
        FeedKey::new("BTC/USD", "ticker")
    }

    fn snapshot(seq: u64) -> Snapshot<Value> {
        Snapshot::new(
            SnapshotKind::Ticker,
            Symbol::new("BTC/USD"),
            Value::from_json(json!({"price": 100})).unwrap(),
            Some(seq),
        )
    }

    /// Checks pass, applies always fail.
    #[derive(Debug, Clone, PartialEq)]
    struct Brittle;

    impl DeltaTarget for Brittle {
        fn check_delta(
            &self,
            _delta: &Delta,
            _path: &crate::path::Path,
        ) -> Result<Vec<String>, ApplyError> {
            Ok(Vec::new())
        }

        fn apply_delta(
            &mut self,
            _delta: &Delta,
            path: &crate::path::Path,
        ) -> Result<(), ApplyError> {
            Err(ApplyError::PathNotFound { path: path.to_string() })
        }

        fn default_checksum(&self) -> String {
            String::new()
        }
    }

    fn run<T: DeltaTarget + 'static>(
        state: FeedState<T>,
        event: FeedEvent<T>,
        rules: &ReconciliationRules,
    ) -> (FeedState<T>, Vec<Effect>) {
        let key = key();
        let checksum = checksum_fn(|data: &T| data.default_checksum());
        let ctx = ReducerContext {
            key: &key,
            rules,
            checksum: &checksum,
        };
        reduce(state, event, &ctx)
    }

    fn price_delta(price: impl Into<Value>, seq: u64) -> FeedEvent<Value> {
        FeedEvent::Delta(Delta::update("price", price).with_sequence(seq))
    }

    fn has_resync(effects: &[Effect]) -> bool {
        effects.iter().any(|e| matches!(e, Effect::ResyncRequested(_)))
    }

    #[test]
    fn test_deltas_buffer_until_snapshot() {
        let rules = ReconciliationRules::default();
        let (state, effects) = run(
            FeedState::awaiting(&rules),
            price_delta(101i64, 11),
            &rules,
        );

        assert_eq!(state.buffered_len(), 1);
        assert_eq!(effects, vec![Effect::Buffered { sequence_id: Some(11), buffered: 1 }]);
    }

    #[test]
    fn test_buffering_disabled_drops() {
        let rules = ReconciliationRules {
            buffer_deltas: false,
            ..Default::default()
        };
        let (state, effects) = run(
            FeedState::awaiting(&rules),
            price_delta(101i64, 11),
            &rules,
        );

        assert_eq!(state.buffered_len(), 0);
        assert!(matches!(effects[0], Effect::Dropped { reason: DropReason::NoSnapshot, .. }));
    }

    #[test]
    fn test_snapshot_replays_newer_deltas() {
        let rules = ReconciliationRules::default();
        let mut state = FeedState::awaiting(&rules);
        for seq in [9, 10, 11, 12] {
            let (next, _) = run(state, price_delta(seq, seq), &rules);
            state = next;
        }

        let (state, effects) = run(state, FeedEvent::Snapshot(snapshot(10)), &rules);

        let live = state.snapshot().unwrap();
        assert_eq!(live.sequence_id, Some(12));
        assert_eq!(live.data, Value::from_json(json!({"price": 12})).unwrap());
        let superseded = effects
            .iter()
            .filter(|e| matches!(e, Effect::Dropped { reason: DropReason::Superseded, .. }))
            .count();
        assert_eq!(superseded, 2);
        assert!(effects.contains(&Effect::Replayed { applied: 2 }));
    }

    #[test]
    fn test_replay_with_leading_hole_resyncs() {
        let rules = ReconciliationRules::default();
        let (state, _) = run(
            FeedState::awaiting(&rules),
            price_delta(1i64, 20),
            &rules,
        );

        // 11..=19 missing: size 9, high
        let (state, effects) = run(state, FeedEvent::Snapshot(snapshot(10)), &rules);

        assert_eq!(state.label(), "awaiting_snapshot");
        assert!(has_resync(&effects));
    }

    #[test]
    fn test_replay_with_inner_gap_resyncs() {
        let rules = ReconciliationRules::default();
        let mut state = FeedState::awaiting(&rules);
        for seq in [11, 30] {
            state = run(state, price_delta(1i64, seq), &rules).0;
        }

        // 12..=29 missing: size 18, high
        let (state, effects) = run(state, FeedEvent::Snapshot(snapshot(10)), &rules);

        assert_eq!(state.label(), "awaiting_snapshot");
        let gap = effects.iter().find_map(|e| match e {
            Effect::GapDetected(g) if g.before == 11 => Some(*g),
            _ => None,
        });
        assert_eq!(gap.map(|g| (g.after, g.severity)), Some((30, GapSeverity::High)));
        let high = ResyncReason::ReplayGap {
            severity: GapSeverity::High,
        };
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ResyncRequested(r) if r.reason == high)));
    }

    #[test]
    fn test_replay_with_medium_inner_gap_goes_live() {
        let rules = ReconciliationRules::default();
        let mut state = FeedState::awaiting(&rules);
        for seq in [11, 14] {
            state = run(state, price_delta(1i64, seq), &rules).0;
        }

        let (state, effects) = run(state, FeedEvent::Snapshot(snapshot(10)), &rules);

        assert_eq!(state.label(), "live");
        assert_eq!(state.snapshot().unwrap().sequence_id, Some(14));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::GapDetected(g) if g.severity == GapSeverity::Medium)));
        assert!(!has_resync(&effects));
    }

    #[test]
    fn test_small_live_gap_is_tolerated() {
        let rules = ReconciliationRules::default();
        let state = FeedState::Live { snapshot: snapshot(10) };

        let (state, effects) = run(state, price_delta(1i64, 13), &rules);

        assert_eq!(state.snapshot().unwrap().sequence_id, Some(13));
        assert!(effects.iter().any(|e| matches!(e, Effect::GapDetected(g) if g.size == 2)));
        assert!(!has_resync(&effects));
    }

    #[test]
    fn test_large_live_gap_resyncs() {
        let rules = ReconciliationRules {
            max_gap_before_resync: 3,
            ..Default::default()
        };
        let state = FeedState::Live { snapshot: snapshot(100) };

        let (state, effects) = run(state, price_delta(1i64, 107), &rules);

        assert_eq!(state.label(), "awaiting_snapshot");
        let request = effects
            .iter()
            .find_map(|e| match e {
                Effect::ResyncRequested(r) => Some(r.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(request.reason, ResyncReason::SequenceGap { expected: 101, received: 107 });
        assert_eq!(request.last_sequence, Some(100));
    }

    #[test]
    fn test_stale_delta_applied_without_regressing_sequence() {
        let rules = ReconciliationRules::default();
        let state = FeedState::Live { snapshot: snapshot(10) };

        let (state, effects) = run(state, price_delta(99i64, 8), &rules);

        let live = state.snapshot().unwrap();
        assert_eq!(live.sequence_id, Some(10));
        assert_eq!(live.data, Value::from_json(json!({"price": 99})).unwrap());
        assert!(effects.contains(&Effect::Applied { sequence_id: Some(8), stale: true }));
    }

    #[test]
    fn test_stale_delta_dropped_by_policy() {
        let rules = ReconciliationRules {
            stale_deltas: StalePolicy::Drop,
            ..Default::default()
        };
        let state = FeedState::Live { snapshot: snapshot(10) };

        let (state, effects) = run(state, price_delta(99i64, 8), &rules);

        assert_eq!(state.snapshot().unwrap().data, snapshot(10).data);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Dropped { reason: DropReason::Stale, .. })));
    }

    #[test]
    fn test_invalid_delta_dropped_in_live() {
        let rules = ReconciliationRules::default();
        let state = FeedState::Live { snapshot: snapshot(10) };

        let pathless = FeedEvent::Delta(Delta::update("", 1i64).with_sequence(11));
        let (state, effects) = run(state, pathless, &rules);

        assert_eq!(state.snapshot().unwrap().sequence_id, Some(10));
        assert!(matches!(
            effects.last(),
            Some(Effect::Dropped { reason: DropReason::Invalid(_), .. })
        ));
    }

    #[test]
    fn test_checksum_mismatch_policies() {
        for (policy, expect_live, expect_fatal) in [
            (MismatchPolicy::Warn, true, false),
            (MismatchPolicy::Resync, false, false),
            (MismatchPolicy::Error, true, true),
        ] {
            let rules = ReconciliationRules {
                on_mismatch: policy,
                ..Default::default()
            };
            let state = FeedState::Live { snapshot: snapshot(10) };

            let bogus = FeedEvent::Checksum {
                expected: "bogus".to_string(),
            };
            let (state, effects) = run(state, bogus, &rules);

            assert_eq!(state.label() == "live", expect_live, "{:?}", policy);
            assert_eq!(effects.iter().any(|e| matches!(e, Effect::Fatal(_))), expect_fatal);
            assert!(matches!(effects[0], Effect::ChecksumMismatch { .. }));
        }
    }

    #[test]
    fn test_checksum_match() {
        let rules = ReconciliationRules::default();
        let snap = snapshot(10);
        let expected = crate::checksum::sha256_value(&snap.data);

        let live = FeedState::Live { snapshot: snap };
        let (_, effects) = run(live, FeedEvent::Checksum { expected }, &rules);
        assert_eq!(effects, vec![Effect::ChecksumVerified]);
    }

    #[test]
    fn test_checksum_skipped_without_snapshot() {
        let rules = ReconciliationRules::default();
        let check: FeedEvent<Value> = FeedEvent::Checksum {
            expected: "x".to_string(),
        };
        let (_, effects) = run(FeedState::awaiting(&rules), check, &rules);
        assert_eq!(effects, vec![Effect::ChecksumSkipped]);
    }

    #[test]
    fn test_manual_resync_is_idempotent_in_state() {
        let rules = ReconciliationRules::default();
        let (state, first) = run(
            FeedState::Live { snapshot: snapshot(10) },
            FeedEvent::Resync { reason: ResyncReason::Manual },
            &rules,
        );
        let manual = FeedEvent::Resync {
            reason: ResyncReason::Manual,
        };
        let (state, second) = run(state, manual, &rules);

        assert_eq!(state.label(), "awaiting_snapshot");
        assert!(has_resync(&first));
        assert!(has_resync(&second));
    }

    #[test]
    fn test_apply_failure_policies() {
        for (policy, expect_live, expect_fatal) in [
            (MismatchPolicy::Warn, true, false),
            (MismatchPolicy::Resync, false, false),
            (MismatchPolicy::Error, true, true),
        ] {
            let rules = ReconciliationRules {
                on_mismatch: policy,
                ..Default::default()
            };
            let base =
                Snapshot::new(SnapshotKind::Generic, Symbol::new("BTC/USD"), Brittle, Some(1));
            let delta = Delta::update("anything", 1i64).with_sequence(2);

            let live = FeedState::Live { snapshot: base };
            let (state, effects) = run(live, FeedEvent::Delta(delta), &rules);

            assert_eq!(state.label() == "live", expect_live, "{:?}", policy);
            assert_eq!(state.snapshot().map(|s| s.sequence_id), expect_live.then_some(Some(1)));
            assert!(effects.iter().any(|e| matches!(e, Effect::ApplyFailed { .. })));
            assert_eq!(effects.iter().any(|e| matches!(e, Effect::Fatal(_))), expect_fatal);
            assert_eq!(has_resync(&effects), !expect_live);
        }
    }

    #[test]
    fn test_reset_clears_without_resync() {
        let rules = ReconciliationRules::default();
        let live = FeedState::Live {
            snapshot: snapshot(10),
        };
        let (state, effects) = run(live, FeedEvent::Reset, &rules);

        assert_eq!(state.label(), "awaiting_snapshot");
        assert_eq!(effects, vec![Effect::Reset]);
    }
}
