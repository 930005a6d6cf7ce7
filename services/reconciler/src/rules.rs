//! Reconciliation rules
//!
//! Per-feed policy knobs. Every field has a default, so a rules document
//! only needs to name what it changes:
//!
//! ```json
//! { "max_gap_before_resync": 3, "on_mismatch": "warn" }
//! ```

use serde::{Deserialize, Serialize};

use feed_types::errors::ConfigError;

use crate::gaps::{GapSeverity, GapThresholds};

/// What to do when a delta fails to apply or a checksum does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Log and keep the current snapshot.
    Warn,
    /// Discard local state and request a fresh snapshot.
    Resync,
    /// Surface the failure to the caller.
    Error,
}

/// What to do with a delta older than the current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Apply with a warning; the snapshot sequence does not move back.
    Apply,
    /// Drop and count.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationRules {
    /// Largest tolerated jump past the expected next sequence identifier.
    pub max_gap_before_resync: u64,
    pub checksum_validation: bool,
    pub on_mismatch: MismatchPolicy,
    /// Buffer deltas while waiting for a snapshot (discard otherwise).
    pub buffer_deltas: bool,
    pub max_buffer_size: usize,
    pub stale_deltas: StalePolicy,
    pub gap_thresholds: GapThresholds,
    /// Replay gaps at or above this severity trigger a resync.
    pub replay_resync_severity: GapSeverity,
}

impl Default for ReconciliationRules {
    fn default() -> Self {
        Self {
            max_gap_before_resync: 10,
            checksum_validation: true,
            on_mismatch: MismatchPolicy::Resync,
            buffer_deltas: true,
            max_buffer_size: 1000,
            stale_deltas: StalePolicy::Apply,
            gap_thresholds: GapThresholds::default(),
            replay_resync_severity: GapSeverity::High,
        }
    }
}

impl ReconciliationRules {
    /// Parse and validate a JSON rules document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let rules: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_deltas && self.max_buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if !self.gap_thresholds.is_valid() {
            let t = self.gap_thresholds;
            return Err(ConfigError::InvalidGapThresholds {
                medium: t.medium,
                high: t.high,
                critical: t.critical,
            });
        }
        Ok(())
    }
}
