//! Promotion thresholds

use riskline_core::MetricSnapshot;
use serde::{Deserialize, Serialize};

/// Metric gates a version must pass before entering production.
/// Unset gates always pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PromotionPolicy {
    /// Minimum holdout AUC (inclusive)
    #[serde(default)]
    pub min_auc: Option<f64>,

    /// Maximum expected calibration error (inclusive)
    #[serde(default)]
    pub max_calibration_error: Option<f64>,
}

impl PromotionPolicy {
    pub fn new(min_auc: Option<f64>, max_calibration_error: Option<f64>) -> Self {
        Self {
            min_auc,
            max_calibration_error,
        }
    }

    /// Reasons the metrics fail the policy; empty when they pass
    pub fn evaluate(&self, metrics: &MetricSnapshot) -> Vec<String> {
        let mut failures = Vec::new();
        if let Some(min) = self.min_auc {
            match metrics.auc {
                Some(auc) if auc >= min => {}
                Some(auc) => failures.push(format!("auc {auc:.4} < minimum {min:.4}")),
                None => failures.push("auc undefined on holdout".to_string()),
            }
        }
        if let Some(max) = self.max_calibration_error {
            if !(metrics.calibration_error <= max) {
                failures.push(format!(
                    "calibration error {:.4} > maximum {max:.4}",
                    metrics.calibration_error
                ));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(auc: Option<f64>, ece: f64) -> MetricSnapshot {
        MetricSnapshot {
            auc,
            calibration_error: ece,
            log_loss: 0.5,
            train_rows: 80,
            holdout_rows: 20,
            positive_rate: 0.2,
        }
    }

    #[test]
    fn test_gates_are_inclusive() {
        let policy = PromotionPolicy::new(Some(0.7), Some(0.1));
        assert!(policy.evaluate(&metrics(Some(0.7), 0.1)).is_empty());
        assert_eq!(policy.evaluate(&metrics(Some(0.69), 0.1)).len(), 1);
        assert_eq!(policy.evaluate(&metrics(Some(0.5), 0.3)).len(), 2);
    }

    #[test]
    fn test_undefined_auc_fails_auc_gate_only() {
        assert_eq!(
            PromotionPolicy::new(Some(0.5), None)
                .evaluate(&metrics(None, 0.0))
                .len(),
            1
        );
        assert!(PromotionPolicy::default()
            .evaluate(&metrics(None, 0.9))
            .is_empty());
    }
}
