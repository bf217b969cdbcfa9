//! Evaluate stage: scores the holdout rows and computes metrics

use crate::artifact::{Artifact, Evaluation};
use crate::stage::{Stage, StageContext, StageError, StageInputs};
use riskline_core::evaluation::CALIBRATION_BINS;
use riskline_core::{decode_model, Fingerprint, Fingerprinter, MetricSnapshot};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct EvaluateStage;

impl EvaluateStage {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for EvaluateStage {
    fn kind(&self) -> &'static str {
        "evaluate"
    }

    fn config_fingerprint(&self) -> Result<Fingerprint, StageError> {
        let mut fp = Fingerprinter::new("riskline.stage.evaluate.v1");
        fp.u64(CALIBRATION_BINS as u64);
        Ok(fp.finish())
    }

    fn run(&self, _ctx: &StageContext, inputs: &StageInputs) -> Result<Artifact, StageError> {
        let matrix = inputs.find("feature matrix", Artifact::as_features)?;
        let trained = inputs.find("trained model", Artifact::as_trained)?;
        let labels = matrix
            .labels()
            .ok_or_else(|| StageError::internal("feature matrix carries no labels"))?;
        let model = decode_model(&trained.kind, &trained.payload)?;

        // no holdout configured: report in-sample metrics
        let rows_idx = if trained.split.holdout.is_empty() {
            warn!("Holdout set is empty; evaluating on training rows");
            &trained.split.train
        } else {
            &trained.split.holdout
        };

        let rows: Vec<Vec<f64>> = rows_idx.iter().map(|&i| matrix.rows()[i].clone()).collect();
        let eval_labels: Vec<f64> = rows_idx.iter().map(|&i| labels[i]).collect();
        let scores = model.predict_proba(&rows)?;
        let metrics = MetricSnapshot::compute(&eval_labels, &scores, trained.split.train.len());

        info!(
            auc = ?metrics.auc,
            calibration_error = metrics.calibration_error,
            log_loss = metrics.log_loss,
            holdout_rows = metrics.holdout_rows,
            "Evaluated model"
        );
        Ok(Artifact::Evaluated {
            evaluation: Evaluation {
                payload_fingerprint: Fingerprint::of_bytes(&trained.payload),
                metrics,
            },
        })
    }
}
