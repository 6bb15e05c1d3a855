//! Lineage thresholds

use serde::{Deserialize, Serialize};

/// `[lineage]` section of the project config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    /// Minimum similarity for a single near match to count as Modified
    pub modified_threshold: f64,
    /// Minimum accumulated coverage for a Split
    pub split_threshold: f64,
    /// Near matches considered when accumulating split coverage
    pub split_candidates: usize,
    /// Minimum similarity for a near match to be a split candidate
    pub split_floor: f64,
    /// Candidates adding less coverage than this are skipped
    pub min_contribution: f64,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            modified_threshold: 0.85,
            split_threshold: 0.9,
            split_candidates: 5,
            split_floor: 0.2,
            min_contribution: 0.05,
        }
    }
}
