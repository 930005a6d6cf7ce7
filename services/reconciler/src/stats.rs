//! Reconciliation statistics
//!
//! Counters are the observability signal for a feed: every drop, gap,
//! checksum check and resync is counted here. The manager is a single
//! actor, so plain integers are enough.

use serde::{Deserialize, Serialize};

use crate::state::Effect;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub snapshots_received: u64,
    pub deltas_applied: u64,
    pub deltas_dropped: u64,
    pub deltas_buffered: u64,
    pub buffer_evictions: u64,
    /// Deltas older than the snapshot, applied or dropped.
    pub stale_deltas: u64,
    pub gaps_detected: u64,
    pub checksum_validations: u64,
    pub checksum_failures: u64,
    pub resyncs: u64,
}

impl ReconcileStats {
    /// Fold one effect into the counters.
    pub fn record(&mut self, effect: &Effect) {
        match effect {
            Effect::Buffered { .. } => self.deltas_buffered += 1,
            Effect::Evicted { .. } => self.buffer_evictions += 1,
            Effect::Dropped { reason, .. } => {
                self.deltas_dropped += 1;
                if *reason == crate::state::DropReason::Stale {
                    self.stale_deltas += 1;
                }
            }
            Effect::SnapshotAdopted { .. } => self.snapshots_received += 1,
            Effect::Replayed { applied } => self.deltas_applied += *applied as u64,
            Effect::GapDetected(_) => self.gaps_detected += 1,
            Effect::Applied { stale, .. } => {
                self.deltas_applied += 1;
                if *stale {
                    self.stale_deltas += 1;
                }
            }
            // The failed delta is lost either way
            Effect::ApplyFailed { .. } => self.deltas_dropped += 1,
            Effect::ChecksumVerified => self.checksum_validations += 1,
            Effect::ChecksumMismatch { .. } => {
                self.checksum_validations += 1;
                self.checksum_failures += 1;
            }
            Effect::ResyncRequested(_) => self.resyncs += 1,
            Effect::Warned { .. } | Effect::ChecksumSkipped | Effect::Reset | Effect::Fatal(_) => {}
        }
    }

    pub fn record_all<'a>(&mut self, effects: impl IntoIterator<Item = &'a Effect>) {
        for effect in effects {
            self.record(effect);
        }
    }
}
