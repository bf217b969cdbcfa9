//! Stage artifacts

use riskline_core::{
    Dataset, DatasetSummary, FeatureMatrix, Fingerprint, Fingerprinter, HoldoutSplit,
    MetricSnapshot, TrainParams,
};
use riskline_registry::{PromotionOutcome, VersionId};
use serde::{Deserialize, Serialize};

/// A trained but not yet registered model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub kind: String,
    pub payload: Vec<u8>,
    pub params: TrainParams,
    /// Row indices of the feature matrix used for fitting and for evaluation
    pub split: HoldoutSplit,
}

/// Holdout evaluation of a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub payload_fingerprint: Fingerprint,
    pub metrics: MetricSnapshot,
}

/// What a stage produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "artifact", rename_all = "snake_case")]
pub enum Artifact {
    /// Ingested raw dataset
    Dataset {
        dataset: Dataset,
        summary: DatasetSummary,
    },
    /// Dataset that passed schema validation
    Validated { dataset: Dataset },
    Features { matrix: FeatureMatrix },
    Trained { model: TrainedModel },
    Evaluated { evaluation: Evaluation },
    Registered { model: String, version: VersionId },
    Promoted { outcome: PromotionOutcome },
}

impl Artifact {
    /// Content fingerprint of the artifact
    pub fn fingerprint(&self) -> Fingerprint {
        let mut fp = Fingerprinter::new("riskline.artifact.v1");
        match self {
            Artifact::Dataset { dataset, .. } => {
                fp.tag(1).fingerprint(&dataset.fingerprint());
            }
            Artifact::Validated { dataset } => {
                fp.tag(2).fingerprint(&dataset.fingerprint());
            }
            Artifact::Features { matrix } => {
                fp.tag(3).fingerprint(&matrix.fingerprint());
            }
            Artifact::Trained { model } => {
                fp.tag(4).str(&model.kind).bytes(&model.payload);
            }
            Artifact::Evaluated { evaluation } => {
                let m = &evaluation.metrics;
                fp.tag(5)
                    .fingerprint(&evaluation.payload_fingerprint)
                    .f64(m.auc.unwrap_or(f64::NAN))
                    .f64(m.calibration_error)
                    .f64(m.log_loss)
                    .u64(m.train_rows as u64)
                    .u64(m.holdout_rows as u64);
            }
            Artifact::Registered { model, version } => {
                fp.tag(6).str(model).u64(u64::from(version.number()));
            }
            Artifact::Promoted { outcome } => {
                fp.tag(7)
                    .str(&outcome.model)
                    .u64(u64::from(outcome.version.number()))
                    .str(&outcome.to.to_string());
            }
        }
        fp.finish()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Dataset { .. } => "dataset",
            Artifact::Validated { .. } => "validated",
            Artifact::Features { .. } => "features",
            Artifact::Trained { .. } => "trained",
            Artifact::Evaluated { .. } => "evaluated",
            Artifact::Registered { .. } => "registered",
            Artifact::Promoted { .. } => "promoted",
        }
    }

    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            Artifact::Dataset { dataset, .. } => Some(dataset),
            _ => None,
        }
    }

    pub fn as_validated(&self) -> Option<&Dataset> {
        match self {
            Artifact::Validated { dataset } => Some(dataset),
            _ => None,
        }
    }

    pub fn as_features(&self) -> Option<&FeatureMatrix> {
        match self {
            Artifact::Features { matrix } => Some(matrix),
            _ => None,
        }
    }

    pub fn as_trained(&self) -> Option<&TrainedModel> {
        match self {
            Artifact::Trained { model } => Some(model),
            _ => None,
        }
    }

    pub fn as_evaluation(&self) -> Option<&Evaluation> {
        match self {
            Artifact::Evaluated { evaluation } => Some(evaluation),
            _ => None,
        }
    }

    pub fn as_registered(&self) -> Option<(&str, VersionId)> {
        match self {
            Artifact::Registered { model, version } => Some((model.as_str(), *version)),
            _ => None,
        }
    }
}

/// Materialized output of a stage, shared immutably with dependents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub artifact: Artifact,
    pub fingerprint: Fingerprint,
}

impl StageOutput {
    pub fn new(artifact: Artifact) -> Self {
        let fingerprint = artifact.fingerprint();
        Self {
            artifact,
            fingerprint,
        }
    }
}
