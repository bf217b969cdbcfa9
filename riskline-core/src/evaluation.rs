//! Model evaluation metrics

use serde::{Deserialize, Serialize};

/// Probabilities are clamped to `[EPS, 1 - EPS]` before taking logs
const EPS: f64 = 1e-15;

/// Number of equal-width bins used for calibration error
pub const CALIBRATION_BINS: usize = 10;

/// Metrics recorded on a model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Area under the ROC curve on the holdout set; `None` when the holdout
    /// contains a single class
    pub auc: Option<f64>,
    /// Expected calibration error on the holdout set
    pub calibration_error: f64,
    pub log_loss: f64,
    pub train_rows: usize,
    pub holdout_rows: usize,
    /// Share of positive labels in the holdout set
    pub positive_rate: f64,
}

impl MetricSnapshot {
    /// Compute every metric from holdout predictions
    pub fn compute(labels: &[f64], scores: &[f64], train_rows: usize) -> Self {
        let positives = labels.iter().filter(|l| **l > 0.0).count();
        Self {
            auc: roc_auc(labels, scores),
            calibration_error: expected_calibration_error(labels, scores, CALIBRATION_BINS),
            log_loss: log_loss(labels, scores),
            train_rows,
            holdout_rows: labels.len(),
            positive_rate: if labels.is_empty() {
                0.0
            } else {
                positives as f64 / labels.len() as f64
            },
        }
    }
}

/// Rank-based ROC AUC with average ranks for tied scores
pub fn roc_auc(labels: &[f64], scores: &[f64]) -> Option<f64> {
    let n = labels.len().min(scores.len());
    let positives = labels[..n].iter().filter(|l| **l > 0.0).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; ties share the average rank
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for k in &order[i..=j] {
            if labels[*k] > 0.0 {
                rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let q = negatives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * q))
}

/// Expected calibration error over equal-width probability bins
pub fn expected_calibration_error(labels: &[f64], scores: &[f64], bins: usize) -> f64 {
    let n = labels.len().min(scores.len());
    if n == 0 || bins == 0 {
        return 0.0;
    }
    let mut count = vec![0usize; bins];
    let mut score_sum = vec![0.0; bins];
    let mut label_sum = vec![0.0; bins];
    for i in 0..n {
        let s = scores[i].clamp(0.0, 1.0);
        let b = ((s * bins as f64) as usize).min(bins - 1);
        count[b] += 1;
        score_sum[b] += s;
        label_sum[b] += if labels[i] > 0.0 { 1.0 } else { 0.0 };
    }
    (0..bins)
        .filter(|b| count[*b] > 0)
        .map(|b| {
            let c = count[b] as f64;
            (c / n as f64) * (score_sum[b] / c - label_sum[b] / c).abs()
        })
        .sum()
}

/// Mean binary cross-entropy
pub fn log_loss(labels: &[f64], scores: &[f64]) -> f64 {
    let n = labels.len().min(scores.len());
    if n == 0 {
        return 0.0;
    }
    let total: f64 = (0..n)
        .map(|i| {
            let p = scores[i].clamp(EPS, 1.0 - EPS);
            if labels[i] > 0.0 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / n as f64
}
