//! Sequence gap detection
//!
//! Pure and stateless: callers hand in identifiers already sorted
//! ascending and get back every missing range with a severity.

use serde::{Deserialize, Serialize};

/// How bad a gap is. Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Minimum gap size for each severity above `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapThresholds {
    pub medium: u64,
    pub high: u64,
    pub critical: u64,
}

impl Default for GapThresholds {
    fn default() -> Self {
        Self {
            medium: 2,
            high: 5,
            critical: 20,
        }
    }
}

impl GapThresholds {
    /// Monotonic size → severity mapping.
    pub fn classify(&self, size: u64) -> GapSeverity {
        if size >= self.critical {
            GapSeverity::Critical
        } else if size >= self.high {
            GapSeverity::High
        } else if size >= self.medium {
            GapSeverity::Medium
        } else {
            GapSeverity::Low
        }
    }

    pub fn is_valid(&self) -> bool {
        1 < self.medium && self.medium <= self.high && self.high <= self.critical
    }
}

/// A run of missing sequence identifiers strictly between `before` and `after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub before: u64,
    pub after: u64,
    pub size: u64,
    pub severity: GapSeverity,
}

impl Gap {
    /// The gap between two observed identifiers, if any.
    pub fn between(before: u64, after: u64, thresholds: &GapThresholds) -> Option<Self> {
        let distance = after.checked_sub(before)?;
        if distance <= 1 {
            return None;
        }
        let size = distance - 1;
        Some(Self {
            before,
            after,
            size,
            severity: thresholds.classify(size),
        })
    }

    /// First missing identifier (inclusive).
    pub fn first_missing(&self) -> u64 {
        self.before + 1
    }

    /// Last missing identifier (inclusive).
    pub fn last_missing(&self) -> u64 {
        self.after - 1
    }
}

/// Find every gap in an ascending list of sequence identifiers.
///
/// Duplicates never produce a gap. O(n).
pub fn find_gaps(sorted_ids: &[u64], thresholds: &GapThresholds) -> Vec<Gap> {
    sorted_ids
        .windows(2)
        .filter_map(|pair| Gap::between(pair[0], pair[1], thresholds))
        .collect()
}

/// Highest severity among `gaps`.
pub fn max_severity(gaps: &[Gap]) -> Option<GapSeverity> {
    gaps.iter().map(|gap| gap.severity).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_gaps() {
        let gaps = find_gaps(&[100, 101, 104, 105, 116], &GapThresholds::default());

        assert_eq!(
            gaps,
            vec![
                Gap { before: 101, after: 104, size: 2, severity: GapSeverity::Medium },
                Gap { before: 105, after: 116, size: 10, severity: GapSeverity::High },
            ]
        );
    }

    #[test]
    fn test_default_severity_bands() {
        let t = GapThresholds::default();
        assert_eq!(t.classify(1), GapSeverity::Low);
        assert_eq!(t.classify(2), GapSeverity::Medium);
        assert_eq!(t.classify(4), GapSeverity::Medium);
        assert_eq!(t.classify(5), GapSeverity::High);
        assert_eq!(t.classify(19), GapSeverity::High);
        assert_eq!(t.classify(20), GapSeverity::Critical);
    }

    #[test]
    fn test_custom_thresholds() {
        let t = GapThresholds { medium: 2, high: 4, critical: 11 };
        let gaps = find_gaps(&[1, 3, 7, 13, 25], &t);
        let severities: Vec<GapSeverity> = gaps.iter().map(|g| g.severity).collect();

        assert_eq!(
            severities,
            vec![GapSeverity::Low, GapSeverity::Medium, GapSeverity::High, GapSeverity::Critical]
        );
    }

    #[test]
    fn test_continuous_and_duplicate_ids() {
        let t = GapThresholds::default();
        assert!(find_gaps(&[1, 2, 3], &t).is_empty());
        assert!(find_gaps(&[7, 7, 8, 8], &t).is_empty());
        assert!(find_gaps(&[], &t).is_empty());
        assert!(find_gaps(&[42], &t).is_empty());
    }

    #[test]
    fn test_missing_range_bounds() {
        let gap = Gap::between(10, 16, &GapThresholds::default()).unwrap();
        assert_eq!(gap.first_missing(), 11);
        assert_eq!(gap.last_missing(), 15);
        assert_eq!(gap.size, 5);
    }

    #[test]
    fn test_unsorted_pair_yields_no_gap() {
        assert!(Gap::between(10, 3, &GapThresholds::default()).is_none());
    }

    #[test]
    fn test_max_severity() {
        let gaps = find_gaps(&[1, 3, 30], &GapThresholds::default());
        assert_eq!(max_severity(&gaps), Some(GapSeverity::Critical));
        assert_eq!(max_severity(&[]), None);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(GapThresholds::default().is_valid());
        assert!(!GapThresholds { medium: 1, high: 5, critical: 20 }.is_valid());
        assert!(!GapThresholds { medium: 6, high: 5, critical: 20 }.is_valid());
    }
}
