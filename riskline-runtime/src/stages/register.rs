//! Register stage: records the evaluated model in the registry

use crate::artifact::Artifact;
use crate::stage::{Stage, StageContext, StageError, StageInputs};
use riskline_core::{FeatureProfile, Fingerprint, Fingerprinter, DEFAULT_BINS};
use riskline_registry::{ModelCandidate, ModelLineage, ModelRegistry};

#[derive(Debug, Clone)]
pub struct RegisterStage {
    registry: ModelRegistry,
    model_name: String,
}

impl RegisterStage {
    pub fn new(registry: ModelRegistry, model_name: impl Into<String>) -> Self {
        Self {
            registry,
            model_name: model_name.into(),
        }
    }
}

impl Stage for RegisterStage {
    fn kind(&self) -> &'static str {
        "register"
    }

    fn config_fingerprint(&self) -> Result<Fingerprint, StageError> {
        let mut fp = Fingerprinter::new("riskline.stage.register.v1");
        fp.str(&self.model_name).u64(DEFAULT_BINS as u64);
        Ok(fp.finish())
    }

    fn run(&self, ctx: &StageContext, inputs: &StageInputs) -> Result<Artifact, StageError> {
        let matrix = inputs.find("feature matrix", Artifact::as_features)?;
        let trained = inputs.find("trained model", Artifact::as_trained)?;
        let evaluation = inputs.find("evaluation", Artifact::as_evaluation)?;

        if evaluation.payload_fingerprint != Fingerprint::of_bytes(&trained.payload) {
            return Err(StageError::internal(
                "evaluation does not belong to the trained model",
            ));
        }

        let candidate = ModelCandidate {
            model_name: self.model_name.clone(),
            kind: trained.kind.clone(),
            payload: trained.payload.clone(),
            lineage: ModelLineage {
                run_id: ctx.run_id,
                dataset_fingerprint: matrix.dataset_fingerprint(),
                feature_fingerprint: matrix.fingerprint(),
                transform_fingerprint: matrix.config_fingerprint(),
            },
            metrics: evaluation.metrics.clone(),
            encoder: matrix.encoder().clone(),
            profile: FeatureProfile::from_matrix(matrix, DEFAULT_BINS),
        };
        let version = self.registry.register(candidate)?;

        Ok(Artifact::Registered {
            model: self.model_name.clone(),
            version,
        })
    }

    /// A cached registration holds only while the registry still has that
    /// version with the same payload and features
    fn is_current(&self, inputs: &StageInputs, output: &Artifact) -> bool {
        let Some((model, version)) = output.as_registered() else {
            return false;
        };
        let (Ok(matrix), Ok(trained)) = (
            inputs.find("feature matrix", Artifact::as_features),
            inputs.find("trained model", Artifact::as_trained),
        ) else {
            return false;
        };
        match self.registry.get(model, version) {
            Ok(stored) => {
                model == self.model_name
                    && stored.payload_fingerprint == Fingerprint::of_bytes(&trained.payload)
                    && stored.lineage.feature_fingerprint == matrix.fingerprint()
            }
            Err(_) => false,
        }
    }
}
