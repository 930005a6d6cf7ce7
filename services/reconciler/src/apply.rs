//! Delta application
//!
//! `apply` folds one delta into a snapshot and returns the successor;
//! `apply_deltas` sorts a batch, reports sequence gaps and folds every
//! delta it can, skipping (and recording) the ones it cannot. Neither
//! touches its inputs.
//!
//! Data types opt in through [`DeltaTarget`]. The generic [`Value`] tree
//! gets path semantics here; the order book adds price-level semantics on
//! top in `order_book`.

use std::fmt;

use serde::Serialize;

use feed_types::errors::{ApplyError, PathError};

use crate::delta::{sort_deltas_by_sequence, Delta, DeltaKind};
use crate::gaps::{find_gaps, Gap, GapThresholds};
use crate::path::{mismatch, resolve, resolve_mut, Path, Segment};
use crate::snapshot::Snapshot;
use crate::validate::validate;
use crate::value::Value;

/// Snapshot payloads that deltas can be applied to.
pub trait DeltaTarget: Clone + fmt::Debug {
    /// Check that `delta` addresses a valid location for its kind without
    /// changing anything. Returns non-fatal warnings.
    fn check_delta(&self, delta: &Delta, path: &Path) -> Result<Vec<String>, ApplyError>;

    /// Apply `delta` in place. Callers work on a clone.
    fn apply_delta(&mut self, delta: &Delta, path: &Path) -> Result<(), ApplyError>;

    /// Checksum used when no exchange-specific function is injected.
    fn default_checksum(&self) -> String;
}

/// Parse a delta's path. An empty path is the root, allowed only for
/// whole-data replacement.
pub fn delta_path(delta: &Delta) -> Result<Path, ApplyError> {
    if delta.path.trim().is_empty() {
        return match delta.kind {
            DeltaKind::Snapshot => Ok(Path::root()),
            _ => Err(ApplyError::InvalidPath(PathError::Empty)),
        };
    }
    Ok(Path::parse(&delta.path)?)
}

/// Apply one delta, producing the successor snapshot.
///
/// The successor's sequence identifier is the delta's when present.
pub fn apply<T: DeltaTarget>(
    snapshot: &Snapshot<T>,
    delta: &Delta,
) -> Result<Snapshot<T>, ApplyError> {
    if delta.kind == DeltaKind::Unknown {
        return Err(ApplyError::UnknownKind {
            kind: delta.kind.label().to_string(),
        });
    }
    let path = delta_path(delta)?;
    let mut data = snapshot.data.clone();
    data.apply_delta(delta, &path)?;
    Ok(snapshot.succeed(data, delta.sequence_id))
}

/// Why a delta in a batch was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cause", content = "detail", rename_all = "snake_case")]
pub enum FailureCause {
    Invalid(String),
    Apply(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub sequence_id: Option<u64>,
    pub path: String,
    pub cause: FailureCause,
    #[serde(skip)]
    pub error: Option<ApplyError>,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seq = self
            .sequence_id
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &self.cause {
            FailureCause::Invalid(reason) => {
                write!(f, "delta {} at '{}' invalid: {}", seq, self.path, reason)
            }
            FailureCause::Apply(reason) => {
                write!(f, "delta {} at '{}' failed: {}", seq, self.path, reason)
            }
        }
    }
}

/// Outcome of folding a batch of deltas into a snapshot.
#[derive(Debug, Clone)]
pub struct ApplyResult<T> {
    /// No delta failed.
    pub success: bool,
    pub applied_count: usize,
    pub failed_count: usize,
    /// Gaps among the sequence identifiers present in the batch.
    pub gaps: Vec<Gap>,
    pub failures: Vec<BatchFailure>,
    /// Validator warnings collected from applied deltas.
    pub warnings: Vec<String>,
    pub snapshot: Snapshot<T>,
}

impl<T> ApplyResult<T> {
    /// Human-readable failure lines.
    pub fn errors(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.to_string()).collect()
    }

    /// First structured apply error, if any delta failed to apply.
    pub fn first_apply_error(&self) -> Option<&ApplyError> {
        self.failures.iter().find_map(|f| f.error.as_ref())
    }
}

/// Fold `deltas` into `snapshot` with default gap thresholds.
pub fn apply_deltas<T: DeltaTarget>(snapshot: &Snapshot<T>, deltas: &[Delta]) -> ApplyResult<T> {
    apply_deltas_with(snapshot, deltas, &GapThresholds::default())
}

/// Fold `deltas` into `snapshot`.
///
/// 1. stable-sort by sequence identifier
/// 2. detect gaps among the identifiers present
/// 3. validate and apply each delta; failures are skipped, not fatal
pub fn apply_deltas_with<T: DeltaTarget>(
    snapshot: &Snapshot<T>,
    deltas: &[Delta],
    thresholds: &GapThresholds,
) -> ApplyResult<T> {
    let sorted = sort_deltas_by_sequence(deltas);
    let ids: Vec<u64> = sorted.iter().filter_map(|d| d.sequence_id).collect();
    let gaps = find_gaps(&ids, thresholds);

    let mut current = snapshot.clone();
    let mut applied_count = 0;
    let mut failures = Vec::new();
    let mut warnings = Vec::new();

    for delta in &sorted {
        let validation = validate(delta, &current);
        if !validation.valid {
            failures.push(BatchFailure {
                sequence_id: delta.sequence_id,
                path: delta.path.clone(),
                cause: FailureCause::Invalid(validation.error.unwrap_or_default()),
                error: None,
            });
            continue;
        }

        match apply(&current, delta) {
            Ok(next) => {
                current = next;
                applied_count += 1;
                warnings.extend(validation.warnings);
            }
            Err(e) => failures.push(BatchFailure {
                sequence_id: delta.sequence_id,
                path: delta.path.clone(),
                cause: FailureCause::Apply(e.to_string()),
                error: Some(e),
            }),
        }
    }

    ApplyResult {
        success: failures.is_empty(),
        applied_count,
        failed_count: failures.len(),
        gaps,
        failures,
        warnings,
        snapshot: current,
    }
}

impl DeltaTarget for Value {
    fn check_delta(&self, delta: &Delta, path: &Path) -> Result<Vec<String>, ApplyError> {
        check_value_delta(self, delta, path)
    }

    fn apply_delta(&mut self, delta: &Delta, path: &Path) -> Result<(), ApplyError> {
        apply_value_delta(self, delta, path)
    }

    fn default_checksum(&self) -> String {
        crate::checksum::sha256_value(self)
    }
}

pub(crate) fn check_value_delta(
    root: &Value,
    delta: &Delta,
    path: &Path,
) -> Result<Vec<String>, ApplyError> {
    if delta.kind == DeltaKind::Unknown {
        return Err(ApplyError::UnknownKind {
            kind: delta.kind.label().to_string(),
        });
    }

    let mut warnings = Vec::new();
    let Some((parent_segments, last)) = path.split_last() else {
        return match delta.kind {
            DeltaKind::Snapshot => Ok(warnings),
            _ => Err(ApplyError::InvalidPath(PathError::Empty)),
        };
    };

    let parent = resolve(root, parent_segments, path)?;
    let target = match (parent, last) {
        (Value::Record(map), Segment::Field(name)) => map.get(name),
        (Value::Sequence(items), Segment::Index(i)) => {
            if delta.kind == DeltaKind::Insert {
                if *i > items.len() {
                    return Err(ApplyError::PathNotFound { path: path.to_string() });
                }
                None
            } else {
                Some(items.get(*i).ok_or_else(|| ApplyError::PathNotFound {
                    path: path.to_string(),
                })?)
            }
        }
        (other, segment) => return Err(mismatch(other, segment, path)),
    };

    match delta.kind {
        DeltaKind::Update => {
            if let (Some(existing), Some(data)) = (target, delta.data.as_ref()) {
                let comparable =
                    existing.is_scalar() && data.is_scalar() && *existing != Value::Null;
                if comparable && existing.kind_name() != data.kind_name() {
                    warnings.push(format!(
                        "Type mismatch at {}: existing {} replaced by {}",
                        path,
                        existing.kind_name(),
                        data.kind_name()
                    ));
                }
            }
        }
        DeltaKind::Delete => {
            if target.is_none() {
                warnings.push(format!("Delete targets non-existent path {}", path));
            }
        }
        DeltaKind::Insert => {
            if target.is_some() {
                warnings.push(format!("Insert overwrites existing value at {}", path));
            }
        }
        DeltaKind::Snapshot | DeltaKind::Unknown => {}
    }

    Ok(warnings)
}

pub(crate) fn apply_value_delta(
    root: &mut Value,
    delta: &Delta,
    path: &Path,
) -> Result<(), ApplyError> {
    let kind = delta.kind;
    if kind == DeltaKind::Unknown {
        return Err(ApplyError::UnknownKind {
            kind: kind.label().to_string(),
        });
    }

    let data = match (&delta.data, kind) {
        (Some(data), _) => data.clone(),
        (None, DeltaKind::Delete) => Value::Null,
        (None, _) => {
            return Err(ApplyError::MissingData {
                path: path.to_string(),
            })
        }
    };

    let Some((parent_segments, last)) = path.split_last() else {
        return match kind {
            DeltaKind::Snapshot => {
                *root = data;
                Ok(())
            }
            _ => Err(ApplyError::InvalidPath(PathError::Empty)),
        };
    };

    let not_found = || ApplyError::PathNotFound { path: path.to_string() };
    let parent = resolve_mut(root, parent_segments, path)?;

    match (parent, last) {
        (Value::Record(map), Segment::Field(name)) => match kind {
            DeltaKind::Update => match map.get_mut(name) {
                Some(existing) if existing.is_record() && data.is_record() => {
                    existing.merge_top_level(&data);
                }
                Some(existing) => *existing = data,
                None => {
                    map.insert(name.clone(), data);
                }
            },
            DeltaKind::Insert | DeltaKind::Snapshot => {
                map.insert(name.clone(), data);
            }
            DeltaKind::Delete => {
                map.remove(name);
            }
            DeltaKind::Unknown => unreachable!("rejected above"),
        },
        (Value::Sequence(items), Segment::Index(i)) => {
            let i = *i;
            match kind {
                DeltaKind::Insert => {
                    if i > items.len() {
                        return Err(not_found());
                    }
                    items.insert(i, data);
                }
                DeltaKind::Delete => {
                    if i >= items.len() {
                        return Err(not_found());
                    }
                    items.remove(i);
                }
                DeltaKind::Update | DeltaKind::Snapshot => {
                    let slot = items.get_mut(i).ok_or_else(not_found)?;
                    if kind == DeltaKind::Update && slot.is_record() && data.is_record() {
                        slot.merge_top_level(&data);
                    } else {
                        *slot = data;
                    }
                }
                DeltaKind::Unknown => unreachable!("rejected above"),
            }
        }
        (other, segment) => return Err(mismatch(other, segment, path)),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaps::GapSeverity;
    use crate::snapshot::{create_snapshot, SnapshotKind};
    use feed_types::ids::Symbol;
    use serde_json::json;

    fn value(json: serde_json::Value) -> Value {
        Value::from_json(json).unwrap()
    }

    fn ticker(json: serde_json::Value) -> Snapshot<Value> {
        create_snapshot(&value(json), SnapshotKind::Ticker, "BTC/USD")
    }

    #[test]
    fn test_insert_at_root_level() {
        let snap = ticker(json!({}));
        let result = apply(&snap, &Delta::insert("price", 100i64).with_sequence(1)).unwrap();

        assert_eq!(result.data, value(json!({"price": 100})));
        assert_eq!(result.sequence_id, Some(1));
    }

    #[test]
    fn test_update_existing_field() {
        let snap = ticker(json!({"price": 100}));
        let result = apply(&snap, &Delta::update("price", 150i64).with_sequence(2)).unwrap();
        assert_eq!(result.data, value(json!({"price": 150})));
    }

    #[test]
    fn test_update_merges_records() {
        let snap = ticker(json!({"market": {"bid": 99, "ask": 101}}));
        let result = apply(&snap, &Delta::update("market", value(json!({"bid": 100})))).unwrap();
        assert_eq!(result.data, value(json!({"market": {"bid": 100, "ask": 101}})));
    }

    #[test]
    fn test_delete_field() {
        let snap = ticker(json!({"price": 100, "volume": 50}));
        let result = apply(&snap, &Delta::delete("volume", Value::Null).with_sequence(3)).unwrap();
        assert_eq!(result.data, value(json!({"price": 100})));
    }

    #[test]
    fn test_snapshot_replacement() {
        let snap = ticker(json!({"old": "data"}));
        let replacement = value(json!({"price": 200, "volume": 100}));
        let delta = Delta::replace("", replacement).with_sequence(4);
        let result = apply(&snap, &delta).unwrap();
        assert_eq!(result.data, value(json!({"price": 200, "volume": 100})));
    }

    #[test]
    fn test_nested_path_update() {
        let snap = ticker(json!({"market": {"bid": 99, "ask": 101}}));
        let result = apply(&snap, &Delta::update("market.bid", value(json!(99.5)))).unwrap();
        assert_eq!(result.data, value(json!({"market": {"bid": 99.5, "ask": 101}})));
    }

    #[test]
    fn test_array_index_update() {
        let snap = ticker(json!({"trades": [{"price": 100}, {"price": 101}]}));
        let result = apply(&snap, &Delta::update("trades[0].price", 102i64)).unwrap();
        assert_eq!(result.data, value(json!({"trades": [{"price": 102}, {"price": 101}]})));
    }

    #[test]
    fn test_sequence_insert_and_delete() {
        let snap = ticker(json!({"trades": [1, 3]}));
        let inserted = apply(&snap, &Delta::insert("trades[1]", 2i64)).unwrap();
        assert_eq!(inserted.data, value(json!({"trades": [1, 2, 3]})));

        let deleted = apply(&inserted, &Delta::delete("trades[0]", Value::Null)).unwrap();
        assert_eq!(deleted.data, value(json!({"trades": [2, 3]})));
    }

    #[test]
    fn test_unknown_kind_fails() {
        let snap = ticker(json!({}));
        let mut delta = Delta::update("price", 100i64);
        delta.kind = DeltaKind::Unknown;
        assert!(matches!(apply(&snap, &delta), Err(ApplyError::UnknownKind { .. })));
    }

    #[test]
    fn test_path_not_found() {
        let snap = ticker(json!({"trades": []}));
        let err = apply(&snap, &Delta::update("trades[2]", 1i64)).unwrap_err();
        assert_eq!(err, ApplyError::PathNotFound { path: "trades[2]".to_string() });

        let err = apply(&snap, &Delta::update("missing.field", 1i64)).unwrap_err();
        assert_eq!(err, ApplyError::PathNotFound { path: "missing".to_string() });
    }

    #[test]
    fn test_delete_through_scalar_is_type_mismatch() {
        let snap = ticker(json!({"price": 100}));
        let err = apply(&snap, &Delta::delete("price.value", Value::Null)).unwrap_err();
        assert!(matches!(err, ApplyError::TypeMismatch { .. }));
    }

    #[test]
    fn test_apply_does_not_mutate_input() {
        let snap = ticker(json!({"price": 100}));
        let _ = apply(&snap, &Delta::update("price", 200i64)).unwrap();
        assert_eq!(snap.data, value(json!({"price": 100})));
    }

    #[test]
    fn test_batch_applies_in_sequence_order() {
        let snap = ticker(json!({}));
        let deltas = vec![
            Delta::update("price", 150i64).with_sequence(3),
            Delta::insert("price", 100i64).with_sequence(1),
            Delta::insert("volume", 50i64).with_sequence(2),
        ];

        let result = apply_deltas(&snap, &deltas);

        assert!(result.success);
        assert_eq!(result.applied_count, 3);
        assert_eq!(result.failed_count, 0);
        assert!(result.gaps.is_empty());
        assert_eq!(result.snapshot.data, value(json!({"price": 150, "volume": 50})));
        assert_eq!(result.snapshot.sequence_id, Some(3));
    }

    #[test]
    fn test_batch_reports_gaps() {
        let snap = ticker(json!({}));
        let deltas = vec![
            Delta::insert("a", 1i64).with_sequence(1),
            Delta::insert("b", 2i64).with_sequence(5),
            Delta::insert("c", 3i64).with_sequence(10),
        ];

        let result = apply_deltas(&snap, &deltas);

        assert_eq!(result.gaps.len(), 2);
        assert_eq!((result.gaps[0].before, result.gaps[0].after, result.gaps[0].size), (1, 5, 3));
        assert_eq!(result.gaps[0].severity, GapSeverity::Medium);
        assert_eq!(result.gaps[1].size, 4);
        assert_eq!(result.applied_count, 3);
    }

    #[test]
    fn test_batch_skips_failed_deltas() {
        let snap = ticker(json!({}));
        let mut bad = Delta::insert("bad", 1i64).with_sequence(2);
        bad.kind = DeltaKind::Unknown;
        let deltas = vec![
            Delta::insert("price", 100i64).with_sequence(1),
            bad,
            Delta::insert("volume", 50i64).with_sequence(3),
        ];

        let result = apply_deltas(&snap, &deltas);

        assert!(!result.success);
        assert_eq!(result.applied_count, 2);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.errors().len(), 1);
        assert!(result.errors()[0].contains("delta 2"));
        assert_eq!(result.snapshot.data, value(json!({"price": 100, "volume": 50})));
    }

    #[test]
    fn test_batch_surfaces_continuity_warning() {
        let snap =
            Snapshot::new(SnapshotKind::Ticker, Symbol::new("BTC/USD"), value(json!({})), Some(5));
        let delta = Delta::update("price", 100i64).with_sequence(10).with_previous(8);

        let result = apply_deltas(&snap, &[delta]);

        assert_eq!(result.applied_count, 1);
        assert!(result.warnings.iter().any(|w| w.contains("Sequence mismatch")));
    }

    #[test]
    fn test_batch_rejects_unresolvable_path_at_validation() {
        let snap = ticker(json!({"trades": []}));
        let result = apply_deltas(&snap, &[Delta::update("trades[0]", 1i64).with_sequence(1)]);

        assert_eq!(result.failed_count, 1);
        assert!(matches!(
            result.failures[0].cause,
            FailureCause::Invalid(ref reason) if reason.contains("trades[0]")
        ));
        assert!(result.first_apply_error().is_none());
        assert_eq!(result.snapshot.sequence_id, None);
    }
}
