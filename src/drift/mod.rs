//! Scope-drift detection.
//!
//! Compares the files an issue declared it would touch against the files
//! its branch actually changed. Drift feeds two decisions: the per-issue
//! revert/halt policy, and the sprint-wide incident counter that aborts the
//! sprint once it exceeds its maximum.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Result of one per-issue drift check. Produced fresh per check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub total_files_changed: usize,
    /// Changed files that were declared in the expected set.
    pub planned_changes: usize,
    /// Changed files outside the expected set, in change order.
    pub unplanned_changes: Vec<String>,
    /// |unplanned| / total, in 0.0..=1.0; 0 when nothing changed.
    pub drift_percentage: f64,
}

impl DriftReport {
    pub fn unplanned_count(&self) -> usize {
        self.unplanned_changes.len()
    }
}

/// Computes drift reports against a fixed threshold.
#[derive(Debug, Clone)]
pub struct DriftDetector {
    threshold: f64,
}

impl DriftDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compare declared expected files against actually changed files.
    pub fn analyze(&self, expected_files: &[String], changed_files: &[String]) -> DriftReport {
        let expected: HashSet<&str> = expected_files.iter().map(String::as_str).collect();

        let unplanned_changes: Vec<String> = changed_files
            .iter()
            .filter(|f| !expected.contains(f.as_str()))
            .cloned()
            .collect();

        let total = changed_files.len();
        let drift_percentage = if total == 0 {
            0.0
        } else {
            unplanned_changes.len() as f64 / total as f64
        };

        DriftReport {
            total_files_changed: total,
            planned_changes: total - unplanned_changes.len(),
            unplanned_changes,
            drift_percentage,
        }
    }

    /// Whether a report breaches the configured threshold.
    pub fn exceeds(&self, report: &DriftReport) -> bool {
        report.drift_percentage > self.threshold
    }
}
