//! Deterministic train/holdout split

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Row indices for training and evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldoutSplit {
    pub train: Vec<usize>,
    pub holdout: Vec<usize>,
}

impl HoldoutSplit {
    /// Split rows into train and holdout sets, stratified by label so both
    /// sides keep the class balance. Each class contributes
    /// `round(len * fraction)` rows to the holdout, keeping at least one row of
    /// every class with two or more rows on each side. Index order inside each
    /// set is ascending.
    pub fn stratified(labels: &[f64], fraction: f64, seed: u64) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut negatives: Vec<usize> = Vec::new();
        let mut positives: Vec<usize> = Vec::new();
        for (i, label) in labels.iter().enumerate() {
            if *label > 0.0 {
                positives.push(i);
            } else {
                negatives.push(i);
            }
        }

        let mut train = Vec::with_capacity(labels.len());
        let mut holdout = Vec::new();
        for mut class in [negatives, positives] {
            class.shuffle(&mut rng);
            let mut take = (class.len() as f64 * fraction).round() as usize;
            if class.len() >= 2 && fraction > 0.0 {
                take = take.clamp(1, class.len() - 1);
            }
            holdout.extend_from_slice(&class[..take]);
            train.extend_from_slice(&class[take..]);
        }

        train.sort_unstable();
        holdout.sort_unstable();
        Self { train, holdout }
    }
}
