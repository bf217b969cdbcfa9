//! Per-feature distribution profiles
//!
//! A profile stores quantile bin edges and the share of training rows in each
//! bin. It is captured alongside a trained model and becomes the reference
//! snapshot the drift monitor compares live traffic against.

use crate::transform::FeatureMatrix;
use serde::{Deserialize, Serialize};

/// Number of quantile bins used when none is configured
pub const DEFAULT_BINS: usize = 10;

/// Bin layout and expected proportions for one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBins {
    pub name: String,

    /// Ascending interior cut points. Bin `i` holds values in
    /// `(edges[i-1], edges[i]]`; the last bin is open above.
    pub edges: Vec<f64>,

    /// Share of reference rows per bin, `edges.len() + 1` entries
    pub proportions: Vec<f64>,

    /// Number of finite reference values
    pub count: usize,
}

impl FeatureBins {
    /// Build quantile bins over the finite values
    pub fn from_values(name: impl Into<String>, values: &[f64], bins: usize) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);

        let mut edges: Vec<f64> = Vec::new();
        if !sorted.is_empty() {
            let bins = bins.max(1);
            for k in 1..bins {
                let pos = (k * sorted.len()) / bins;
                let edge = sorted[pos.min(sorted.len() - 1)];
                if edges.last().map_or(true, |last| edge > *last) {
                    edges.push(edge);
                }
            }
        }

        let mut bins = Self {
            name: name.into(),
            edges,
            proportions: Vec::new(),
            count: 0,
        };
        let (proportions, count) = bins.proportions_of(&sorted);
        bins.proportions = proportions;
        bins.count = count;
        bins
    }

    /// Index of the bin a value falls in
    pub fn bucket(&self, value: f64) -> usize {
        self.edges.partition_point(|e| *e < value)
    }

    pub fn bin_count(&self) -> usize {
        self.edges.len() + 1
    }

    /// Proportions of `values` over this layout, ignoring non-finite values.
    /// Returns the proportions and the number of values counted.
    pub fn proportions_of(&self, values: &[f64]) -> (Vec<f64>, usize) {
        let mut counts = vec![0usize; self.bin_count()];
        let mut total = 0;
        for v in values.iter().copied().filter(|v| v.is_finite()) {
            counts[self.bucket(v)] += 1;
            total += 1;
        }
        let proportions = counts
            .into_iter()
            .map(|c| if total == 0 { 0.0 } else { c as f64 / total as f64 })
            .collect();
        (proportions, total)
    }
}

/// Bins for every column of a feature matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProfile {
    pub features: Vec<FeatureBins>,
}

impl FeatureProfile {
    pub fn from_matrix(matrix: &FeatureMatrix, bins: usize) -> Self {
        let features = matrix
            .feature_names()
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let column: Vec<f64> = matrix.rows().iter().map(|r| r[idx]).collect();
                FeatureBins::from_values(name.clone(), &column, bins)
            })
            .collect();
        Self { features }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureBins> {
        self.features.iter().find(|f| f.name == name)
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_edges_split_evenly() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        let bins = FeatureBins::from_values("x", &values, 4);
        assert_eq!(bins.edges, vec![26.0, 51.0, 76.0]);
        assert_eq!(bins.count, 100);
        assert_eq!(bins.proportions, vec![0.26, 0.25, 0.25, 0.24]);
        let total: f64 = bins.proportions.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_binary_feature_collapses_duplicate_edges() {
        let values: Vec<f64> = (0..10).map(|i| if i < 7 { 0.0 } else { 1.0 }).collect();
        let bins = FeatureBins::from_values("flag", &values, 10);
        assert_eq!(bins.edges, vec![0.0, 1.0]);
        assert_eq!(bins.proportions, vec![0.7, 0.3, 0.0]);
    }

    #[test]
    fn test_bucket_is_right_inclusive() {
        let bins = FeatureBins {
            name: "x".into(),
            edges: vec![1.0, 2.0],
            proportions: vec![0.0; 3],
            count: 0,
        };
        assert_eq!(bins.bucket(1.0), 0);
        assert_eq!(bins.bucket(1.5), 1);
        assert_eq!(bins.bucket(2.0), 1);
        assert_eq!(bins.bucket(9.0), 2);
    }

    #[test]
    fn test_non_finite_values_are_ignored() {
        let bins = FeatureBins::from_values("x", &[f64::NAN, 1.0, f64::INFINITY], 2);
        assert_eq!(bins.count, 1);
        let (props, n) = bins.proportions_of(&[f64::NAN]);
        assert_eq!(n, 0);
        assert!(props.iter().all(|p| *p == 0.0));
    }
}
