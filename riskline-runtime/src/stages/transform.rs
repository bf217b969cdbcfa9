//! Transform stage: encodes the validated dataset into a feature matrix

use crate::artifact::Artifact;
use crate::stage::{Stage, StageContext, StageError, StageInputs};
use riskline_core::{transform_checked, Fingerprint, SchemaRegistry, TransformConfig};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct TransformStage {
    schemas: Arc<SchemaRegistry>,
    config: TransformConfig,
}

impl TransformStage {
    pub fn new(schemas: Arc<SchemaRegistry>, config: TransformConfig) -> Self {
        Self { schemas, config }
    }
}

impl Stage for TransformStage {
    fn kind(&self) -> &'static str {
        "transform"
    }

    fn config_fingerprint(&self) -> Result<Fingerprint, StageError> {
        Ok(self.config.fingerprint()?)
    }

    fn run(&self, _ctx: &StageContext, inputs: &StageInputs) -> Result<Artifact, StageError> {
        let dataset = inputs.find("validated dataset", Artifact::as_validated)?;
        let matrix = transform_checked(&self.schemas, dataset, &self.config)?;

        let meta = matrix.metadata();
        info!(
            rows = matrix.row_count(),
            features = matrix.column_count(),
            duplicates_removed = meta.duplicates_removed,
            imputed_cells = meta.imputed_cells,
            fingerprint = %matrix.fingerprint().short(),
            "Built feature matrix"
        );
        Ok(Artifact::Features { matrix })
    }
}
