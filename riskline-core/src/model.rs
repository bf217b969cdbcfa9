//! Pluggable model contracts
//!
//! Training algorithms are a capability the pipeline invokes through the
//! [`Trainer`] trait; the registry only ever sees an opaque payload plus the
//! model kind needed to decode it again. A small logistic-regression trainer
//! is provided as the reference implementation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Kind tag of the built-in trainer
pub const LOGISTIC_REGRESSION: &str = "logistic_regression";

/// Errors from training, scoring or decoding models
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid labels: {0}")]
    InvalidLabels(String),

    #[error("invalid training parameters: {0}")]
    InvalidParams(String),

    #[error("unknown model kind: {0}")]
    UnknownKind(String),

    #[error("model payload error: {0}")]
    Payload(String),
}

/// Hyper-parameters shared by trainers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainParams {
    pub seed: u64,
    pub epochs: usize,
    pub learning_rate: f64,
    /// L2 penalty on the weights
    pub l2: f64,
    /// Share of rows held out for evaluation
    pub holdout_fraction: f64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            seed: 42,
            epochs: 300,
            learning_rate: 0.1,
            l2: 1e-3,
            holdout_fraction: 0.2,
        }
    }
}

impl TrainParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.epochs == 0 {
            return Err(ModelError::InvalidParams("epochs must be > 0".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ModelError::InvalidParams(
                "learning_rate must be > 0".to_string(),
            ));
        }
        if self.l2 < 0.0 {
            return Err(ModelError::InvalidParams("l2 must be >= 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.holdout_fraction) {
            return Err(ModelError::InvalidParams(
                "holdout_fraction must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// A trained model able to score feature rows
pub trait ScoringModel: Send + Sync + fmt::Debug {
    /// Kind tag used to decode the payload
    fn kind(&self) -> &str;

    /// Number of features expected per row
    fn feature_count(&self) -> usize;

    /// Probability of the positive class for each row
    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError>;

    /// Serialized payload stored in the registry
    fn to_payload(&self) -> Result<Vec<u8>, ModelError>;
}

/// A training algorithm
pub trait Trainer: Send + Sync {
    fn kind(&self) -> &str;

    /// Fit a model. Must be deterministic for identical inputs and params.
    fn fit(
        &self,
        rows: &[Vec<f64>],
        labels: &[f64],
        params: &TrainParams,
    ) -> Result<Box<dyn ScoringModel>, ModelError>;
}

/// Decode a registry payload back into a scoring model
pub fn decode_model(kind: &str, payload: &[u8]) -> Result<Box<dyn ScoringModel>, ModelError> {
    match kind {
        LOGISTIC_REGRESSION => {
            let model: LogisticRegressionModel = serde_json::from_slice(payload)
                .map_err(|e| ModelError::Payload(e.to_string()))?;
            Ok(Box::new(model))
        }
        other => Err(ModelError::UnknownKind(other.to_string())),
    }
}

/// Look up a built-in trainer by kind
pub fn trainer_for(kind: &str) -> Result<Box<dyn Trainer>, ModelError> {
    match kind {
        LOGISTIC_REGRESSION => Ok(Box::new(LogisticRegressionTrainer)),
        other => Err(ModelError::UnknownKind(other.to_string())),
    }
}

/// Logistic regression on internally standardized features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegressionModel {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LogisticRegressionModel {
    fn logit(&self, row: &[f64]) -> f64 {
        row.iter()
            .zip(&self.means)
            .zip(&self.scales)
            .zip(&self.weights)
            .map(|(((v, m), s), w)| (v - m) / s * w)
            .sum::<f64>()
            + self.bias
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl ScoringModel for LogisticRegressionModel {
    fn kind(&self) -> &str {
        LOGISTIC_REGRESSION
    }

    fn feature_count(&self) -> usize {
        self.weights.len()
    }

    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        rows.iter()
            .map(|row| {
                if row.len() != self.weights.len() {
                    return Err(ModelError::DimensionMismatch {
                        expected: self.weights.len(),
                        actual: row.len(),
                    });
                }
                Ok(sigmoid(self.logit(row)))
            })
            .collect()
    }

    fn to_payload(&self) -> Result<Vec<u8>, ModelError> {
        serde_json::to_vec(self).map_err(|e| ModelError::Payload(e.to_string()))
    }
}

/// Full-batch gradient descent logistic regression
#[derive(Debug, Clone, Copy, Default)]
pub struct LogisticRegressionTrainer;

impl Trainer for LogisticRegressionTrainer {
    fn kind(&self) -> &str {
        LOGISTIC_REGRESSION
    }

    fn fit(
        &self,
        rows: &[Vec<f64>],
        labels: &[f64],
        params: &TrainParams,
    ) -> Result<Box<dyn ScoringModel>, ModelError> {
        params.validate()?;
        let n = rows.len();
        if n == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }
        if labels.len() != n {
            return Err(ModelError::InvalidLabels(format!(
                "{} labels for {} rows",
                labels.len(),
                n
            )));
        }
        if let Some(bad) = labels.iter().find(|l| **l != 0.0 && **l != 1.0) {
            return Err(ModelError::InvalidLabels(format!(
                "labels must be 0 or 1, found {bad}"
            )));
        }
        let dim = rows[0].len();
        if let Some(row) = rows.iter().find(|r| r.len() != dim) {
            return Err(ModelError::DimensionMismatch {
                expected: dim,
                actual: row.len(),
            });
        }

        let nf = n as f64;
        let means: Vec<f64> = (0..dim)
            .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / nf)
            .collect();
        let scales: Vec<f64> = (0..dim)
            .map(|j| {
                let var = rows.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / nf;
                if var > 0.0 {
                    var.sqrt()
                } else {
                    1.0
                }
            })
            .collect();
        let x: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| (0..dim).map(|j| (r[j] - means[j]) / scales[j]).collect())
            .collect();

        let mut weights = vec![0.0; dim];
        let mut bias = 0.0;
        for _ in 0..params.epochs {
            let mut grad_w = vec![0.0; dim];
            let mut grad_b = 0.0;
            for (row, y) in x.iter().zip(labels) {
                let z: f64 = row.iter().zip(&weights).map(|(a, w)| a * w).sum::<f64>() + bias;
                let err = sigmoid(z) - y;
                for (g, a) in grad_w.iter_mut().zip(row) {
                    *g += err * a;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= params.learning_rate * (g / nf + params.l2 * *w);
            }
            bias -= params.learning_rate * grad_b / nf;
        }

        debug!(rows = n, features = dim, epochs = params.epochs, "Fitted logistic regression");

        Ok(Box::new(LogisticRegressionModel {
            means,
            scales,
            weights,
            bias,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::roc_auc;

    fn separable() -> (Vec<Vec<f64>>, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, 100.0 - i as f64]).collect();
        let labels = (0..40).map(|i| if i >= 20 { 1.0 } else { 0.0 }).collect();
        (rows, labels)
    }

    #[test]
    fn test_fit_separates_classes() {
        let (rows, labels) = separable();
        let model = LogisticRegressionTrainer
            .fit(&rows, &labels, &TrainParams::default())
            .unwrap();
        let scores = model.predict_proba(&rows).unwrap();
        assert_eq!(roc_auc(&labels, &scores), Some(1.0));
        assert!(scores[0] < 0.5);
        assert!(scores[39] > 0.5);
    }

    #[test]
    fn test_training_is_deterministic() {
        let (rows, labels) = separable();
        let params = TrainParams::default();
        let a = LogisticRegressionTrainer.fit(&rows, &labels, &params).unwrap();
        let b = LogisticRegressionTrainer.fit(&rows, &labels, &params).unwrap();
        assert_eq!(a.to_payload().unwrap(), b.to_payload().unwrap());
    }

    #[test]
    fn test_payload_decodes_to_same_predictions() {
        let (rows, labels) = separable();
        let model = LogisticRegressionTrainer
            .fit(&rows, &labels, &TrainParams::default())
            .unwrap();
        let decoded = decode_model(model.kind(), &model.to_payload().unwrap()).unwrap();
        assert_eq!(
            decoded.predict_proba(&rows).unwrap(),
            model.predict_proba(&rows).unwrap()
        );
        assert!(matches!(
            decode_model("gbm", b"{}"),
            Err(ModelError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let trainer = LogisticRegressionTrainer;
        let params = TrainParams::default();
        assert_eq!(
            trainer.fit(&[], &[], &params).unwrap_err(),
            ModelError::EmptyTrainingSet
        );
        assert!(matches!(
            trainer.fit(&[vec![1.0]], &[2.0], &params),
            Err(ModelError::InvalidLabels(_))
        ));
        assert!(matches!(
            trainer.fit(&[vec![1.0], vec![1.0, 2.0]], &[0.0, 1.0], &params),
            Err(ModelError::DimensionMismatch { .. })
        ));

        let bad = TrainParams {
            epochs: 0,
            ..TrainParams::default()
        };
        assert!(matches!(
            trainer.fit(&[vec![1.0]], &[1.0], &bad),
            Err(ModelError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_predict_checks_dimension() {
        let (rows, labels) = separable();
        let model = LogisticRegressionTrainer
            .fit(&rows, &labels, &TrainParams::default())
            .unwrap();
        assert!(matches!(
            model.predict_proba(&[vec![1.0]]),
            Err(ModelError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }
}
