//! Delta validation
//!
//! Decides whether a delta may be applied to a snapshot without touching
//! it. Hard failures make the delta invalid; soft findings (staleness,
//! continuity breaks, shape surprises) come back as warnings and the delta
//! stays applicable.

use serde::{Deserialize, Serialize};

use crate::apply::{delta_path, DeltaTarget};
use crate::delta::{Delta, DeltaKind};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn accept(warnings: Vec<String>) -> Self {
        Self {
            valid: true,
            error: None,
            warnings,
        }
    }

    fn reject(error: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            warnings,
        }
    }
}

/// True when `delta` is older than the snapshot it would be applied to.
pub fn is_stale<T>(delta: &Delta, snapshot: &Snapshot<T>) -> bool {
    matches!(
        (delta.sequence_id, snapshot.sequence_id),
        (Some(seq), Some(current)) if seq < current
    )
}

/// Check `delta` against `snapshot`.
pub fn validate<T: DeltaTarget>(delta: &Delta, snapshot: &Snapshot<T>) -> ValidationResult {
    let mut warnings = Vec::new();

    if let (Some(seq), Some(current)) = (delta.sequence_id, snapshot.sequence_id) {
        if seq < current {
            warnings.push(format!(
                "Stale delta: sequence {} is older than snapshot sequence {}",
                seq, current
            ));
        }
    }
    if let (Some(previous), Some(current)) = (delta.previous_sequence_id, snapshot.sequence_id) {
        if previous != current {
            warnings.push(format!(
                "Sequence mismatch: delta follows {} but snapshot is at {}",
                previous, current
            ));
        }
    }

    if delta.kind == DeltaKind::Unknown {
        return ValidationResult::reject("Unknown delta kind", warnings);
    }
    if delta.path.trim().is_empty() && delta.kind != DeltaKind::Snapshot {
        return ValidationResult::reject("Delta path is required", warnings);
    }
    if delta.data.is_none() {
        return ValidationResult::reject("Delta data is required", warnings);
    }

    let path = match delta_path(delta) {
        Ok(path) => path,
        Err(e) => return ValidationResult::reject(e.to_string(), warnings),
    };

    match snapshot.data.check_delta(delta, &path) {
        Ok(found) => {
            warnings.extend(found);
            ValidationResult::accept(warnings)
        }
        Err(e) => ValidationResult::reject(e.to_string(), warnings),
    }
}
