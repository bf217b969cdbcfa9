//! Validate stage: checks the ingested dataset against its schema

use super::config_fingerprint;
use crate::artifact::Artifact;
use crate::stage::{Stage, StageContext, StageError, StageInputs};
use riskline_core::{Fingerprint, SchemaId, SchemaRegistry};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ValidateStage {
    schemas: Arc<SchemaRegistry>,
    expected: SchemaId,
}

impl ValidateStage {
    /// Validate against `expected`, which must be registered in `schemas`
    pub fn new(schemas: Arc<SchemaRegistry>, expected: SchemaId) -> Self {
        Self { schemas, expected }
    }
}

impl Stage for ValidateStage {
    fn kind(&self) -> &'static str {
        "validate"
    }

    fn config_fingerprint(&self) -> Result<Fingerprint, StageError> {
        let schema = self.schemas.get(&self.expected)?;
        config_fingerprint(schema.as_ref())
    }

    fn run(&self, _ctx: &StageContext, inputs: &StageInputs) -> Result<Artifact, StageError> {
        let dataset = inputs.find("dataset", Artifact::as_dataset)?;
        if dataset.schema() != &self.expected {
            return Err(StageError::validation(format!(
                "dataset claims schema {} but the pipeline expects {}",
                dataset.schema(),
                self.expected
            )));
        }

        let validated = self.schemas.validate(dataset)?;
        debug!(schema = %self.expected, rows = dataset.row_count(), "Dataset passed validation");
        Ok(Artifact::Validated {
            dataset: validated.into_dataset(),
        })
    }
}
