//! Train stage: fits a model on the training rows of a stratified split

use super::config_fingerprint;
use crate::artifact::{Artifact, TrainedModel};
use crate::stage::{Stage, StageContext, StageError, StageInputs};
use riskline_core::{trainer_for, Fingerprint, Fingerprinter, HoldoutSplit, TrainParams};
use tracing::info;

#[derive(Debug, Clone)]
pub struct TrainStage {
    kind: String,
    params: TrainParams,
}

impl TrainStage {
    pub fn new(kind: impl Into<String>, params: TrainParams) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }
}

impl Stage for TrainStage {
    fn kind(&self) -> &'static str {
        "train"
    }

    fn config_fingerprint(&self) -> Result<Fingerprint, StageError> {
        let mut fp = Fingerprinter::new("riskline.stage.train.v1");
        fp.str(&self.kind)
            .fingerprint(&config_fingerprint(&self.params)?);
        Ok(fp.finish())
    }

    fn run(&self, _ctx: &StageContext, inputs: &StageInputs) -> Result<Artifact, StageError> {
        self.params.validate()?;
        let trainer = trainer_for(&self.kind)?;

        let matrix = inputs.find("feature matrix", Artifact::as_features)?;
        let labels = matrix
            .labels()
            .ok_or_else(|| StageError::internal("feature matrix carries no labels; set a target"))?;

        let split =
            HoldoutSplit::stratified(labels, self.params.holdout_fraction, self.params.seed);
        if split.train.is_empty() {
            return Err(StageError::validation("no rows left for training"));
        }

        let rows: Vec<Vec<f64>> = split.train.iter().map(|&i| matrix.rows()[i].clone()).collect();
        let train_labels: Vec<f64> = split.train.iter().map(|&i| labels[i]).collect();
        let model = trainer.fit(&rows, &train_labels, &self.params)?;
        let payload = model.to_payload()?;

        info!(
            kind = %self.kind,
            train_rows = split.train.len(),
            holdout_rows = split.holdout.len(),
            "Trained model"
        );
        Ok(Artifact::Trained {
            model: TrainedModel {
                kind: self.kind.clone(),
                payload,
                params: self.params.clone(),
                split,
            },
        })
    }
}
