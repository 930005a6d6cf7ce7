//! Incremental update records
//!
//! A delta says how to change a snapshot's data at a path. Deltas arrive
//! out of order and get re-sorted by sequence identifier before they are
//! folded into a snapshot; unsequenced deltas stay pinned behind the
//! sequenced delta they followed on the wire.

use serde::{Deserialize, Deserializer, Serialize};

use crate::value::Value;

/// What a delta does at its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    /// Merge into a record, upsert price levels, or replace a value.
    Update,
    /// Remove a field, an index, or price levels.
    Delete,
    /// Set a field or insert into a sequence at an index.
    Insert,
    /// Replace the addressed subtree (the whole data for an empty path).
    Snapshot,
    /// Any kind this engine does not recognise. Always rejected.
    #[serde(other)]
    Unknown,
}

impl DeltaKind {
    pub fn label(&self) -> &'static str {
        match self {
            DeltaKind::Update => "update",
            DeltaKind::Delete => "delete",
            DeltaKind::Insert => "insert",
            DeltaKind::Snapshot => "snapshot",
            DeltaKind::Unknown => "unknown",
        }
    }
}

/// An incremental instruction against snapshot data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub kind: DeltaKind,
    #[serde(default)]
    pub path: String,
    /// `None` means the field was absent; an explicit JSON `null` is
    /// `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
    /// Sequence identifier the sender believes the receiver is at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_sequence_id: Option<u64>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Delta {
    pub fn new(kind: DeltaKind, path: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            kind,
            path: path.into(),
            data: Some(data.into()),
            sequence_id: None,
            previous_sequence_id: None,
        }
    }

    pub fn update(path: impl Into<String>, data: impl Into<Value>) -> Self {
        Self::new(DeltaKind::Update, path, data)
    }

    pub fn delete(path: impl Into<String>, data: impl Into<Value>) -> Self {
        Self::new(DeltaKind::Delete, path, data)
    }

    pub fn insert(path: impl Into<String>, data: impl Into<Value>) -> Self {
        Self::new(DeltaKind::Insert, path, data)
    }

    /// Whole-data (empty path) or subtree replacement.
    pub fn replace(path: impl Into<String>, data: impl Into<Value>) -> Self {
        Self::new(DeltaKind::Snapshot, path, data)
    }

    pub fn with_sequence(mut self, sequence_id: u64) -> Self {
        self.sequence_id = Some(sequence_id);
        self
    }

    pub fn with_previous(mut self, previous_sequence_id: u64) -> Self {
        self.previous_sequence_id = Some(previous_sequence_id);
        self
    }
}

/// Sort deltas ascending by sequence identifier without mutating the input.
///
/// The sort is stable. A delta without a sequence identifier keeps its slot
/// directly behind the sequenced delta that preceded it in the input;
/// unsequenced deltas at the head of the input sort first.
pub fn sort_deltas_by_sequence(deltas: &[Delta]) -> Vec<Delta> {
    let mut anchor: Option<u64> = None;
    let mut keyed: Vec<(Option<u64>, &Delta)> = deltas
        .iter()
        .map(|delta| {
            if let Some(seq) = delta.sequence_id {
                anchor = Some(seq);
            }
            (anchor, delta)
        })
        .collect();

    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, delta)| delta.clone()).collect()
}

/// How to resolve two deltas that target the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    LastWriteWins,
    FirstWriteWins,
    /// Deep-merge record data; non-record data falls back to last-write-wins.
    Merge,
    Error,
}

/// Errors from [`merge_delta`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("cannot merge deltas for different paths: {existing} vs {incoming}")]
    DifferentPaths { existing: String, incoming: String },

    #[error("delta conflict detected at {path}")]
    Conflict { path: String },
}

/// Collapse two deltas for the same path into one.
pub fn merge_delta(
    existing: &Delta,
    incoming: &Delta,
    strategy: ConflictResolution,
) -> Result<Delta, MergeError> {
    if existing.path != incoming.path {
        return Err(MergeError::DifferentPaths {
            existing: existing.path.clone(),
            incoming: incoming.path.clone(),
        });
    }

    match strategy {
        ConflictResolution::LastWriteWins => Ok(incoming.clone()),
        ConflictResolution::FirstWriteWins => Ok(existing.clone()),
        ConflictResolution::Merge => {
            let data = match (&existing.data, &incoming.data) {
                (Some(old), Some(new)) if old.is_record() && new.is_record() => {
                    let mut merged = old.clone();
                    merged.deep_merge(new);
                    Some(merged)
                }
                (old, new) => new.clone().or_else(|| old.clone()),
            };
            Ok(Delta {
                kind: incoming.kind,
                path: incoming.path.clone(),
                data,
                sequence_id: existing.sequence_id.max(incoming.sequence_id),
                previous_sequence_id: existing.previous_sequence_id,
            })
        }
        ConflictResolution::Error => Err(MergeError::Conflict {
            path: incoming.path.clone(),
        }),
    }
}
