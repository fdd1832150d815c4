//! Fixed-grid timer histograms
//!
//! A histogram rule gives a `(min_val, max_val, bin_width)` grid for all
//! metric names sharing a configured prefix. Recorded values land in a
//! floor bucket (below `min_val`), one of the linear bins, or a ceiling
//! bucket (at or above `max_val`).

use crate::error::{Result, RustyStatsError};
use serde::{Deserialize, Serialize};

/// Configured histogram grid, matched against metric names by prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramRule {
    /// Metric name prefix this rule applies to; empty matches everything
    #[serde(default)]
    pub prefix: String,
    pub min_val: f64,
    pub max_val: f64,
    pub bin_width: f64,
}

impl HistogramRule {
    /// Total bucket count: floor + linear bins + ceiling
    pub fn num_bins(&self) -> usize {
        ((self.max_val - self.min_val) / self.bin_width).ceil() as usize + 2
    }

    /// A usable grid needs a positive width, a non-empty range, and at
    /// least one linear bin between the floor and ceiling buckets.
    pub fn validate(&self) -> Result<()> {
        if !self.bin_width.is_finite() || self.bin_width <= 0.0 {
            return Err(invalid(self, "bin_width must be positive"));
        }
        if !self.min_val.is_finite() || !self.max_val.is_finite() || self.max_val <= self.min_val {
            return Err(invalid(self, "max_val must be greater than min_val"));
        }
        if self.num_bins() < 3 {
            return Err(invalid(self, "grid must produce at least one linear bin"));
        }
        Ok(())
    }
}

fn invalid(rule: &HistogramRule, message: &str) -> RustyStatsError {
    RustyStatsError::ConfigError {
        message: format!("histogram rule for prefix '{}': {}", rule.prefix, message),
        config_key: Some("metrics.histograms".to_string()),
    }
}

/// Resolves a metric name to its histogram rule by longest matching prefix
#[derive(Debug, Clone, Default)]
pub struct HistogramResolver {
    rules: Vec<HistogramRule>,
}

impl HistogramResolver {
    pub fn new(rules: &[HistogramRule]) -> Self {
        let mut rules = rules.to_vec();
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { rules }
    }

    pub fn resolve(&self, name: &str) -> Option<&HistogramRule> {
        self.rules.iter().find(|rule| name.starts_with(&rule.prefix))
    }
}

/// Per-timer bucket counters laid out on a rule's grid
#[derive(Debug, Clone)]
pub struct HistogramBins {
    min_val: f64,
    max_val: f64,
    bin_width: f64,
    counts: Vec<u32>,
}

impl HistogramBins {
    pub fn new(rule: &HistogramRule) -> Self {
        Self {
            min_val: rule.min_val,
            max_val: rule.max_val,
            bin_width: rule.bin_width,
            counts: vec![0u32; rule.num_bins()],
        }
    }

    /// Count one value into its bucket
    pub fn record(&mut self, value: f64) {
        let idx = if value < self.min_val {
            0
        } else if value >= self.max_val {
            self.counts.len() - 1
        } else {
            let linear = ((value - self.min_val) / self.bin_width) as usize;
            // Float division can land exactly on the bin count at the top edge.
            (linear + 1).min(self.counts.len() - 2)
        };
        self.counts[idx] += 1;
    }

    pub fn min_val(&self) -> f64 {
        self.min_val
    }

    pub fn max_val(&self) -> f64 {
        self.max_val
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    /// Count of values below `min_val`
    pub fn floor_count(&self) -> u32 {
        self.counts[0]
    }

    /// Count of values at or above `max_val`
    pub fn ceil_count(&self) -> u32 {
        self.counts[self.counts.len() - 1]
    }

    /// Linear bins as `(lower_edge, count)` pairs
    pub fn linear_bins(&self) -> impl Iterator<Item = (f64, u32)> + '_ {
        self.counts[1..self.counts.len() - 1]
            .iter()
            .enumerate()
            .map(move |(i, &count)| (self.min_val + self.bin_width * i as f64, count))
    }
}
