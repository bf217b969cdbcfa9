//! Promote stage: moves the registered version to a target state

use super::config_fingerprint;
use crate::artifact::Artifact;
use crate::stage::{Stage, StageContext, StageError, StageInputs};
use riskline_core::{Fingerprint, Fingerprinter};
use riskline_registry::{ModelRegistry, PromotionState};
use tracing::info;

#[derive(Debug, Clone)]
pub struct PromoteStage {
    registry: ModelRegistry,
    target: PromotionState,
}

impl PromoteStage {
    pub fn new(registry: ModelRegistry, target: PromotionState) -> Self {
        Self { registry, target }
    }
}

impl Stage for PromoteStage {
    fn kind(&self) -> &'static str {
        "promote"
    }

    /// Thresholds are part of the config: tightening them re-runs the gate
    fn config_fingerprint(&self) -> Result<Fingerprint, StageError> {
        let mut fp = Fingerprinter::new("riskline.stage.promote.v1");
        fp.str(&self.target.to_string())
            .fingerprint(&config_fingerprint(self.registry.policy())?);
        Ok(fp.finish())
    }

    fn run(&self, _ctx: &StageContext, inputs: &StageInputs) -> Result<Artifact, StageError> {
        let (model, version) = inputs.find("registered model", Artifact::as_registered)?;
        let outcome = self.registry.promote(model, version, self.target)?;
        info!(
            model = %outcome.model,
            version = %outcome.version,
            from = %outcome.from,
            to = %outcome.to,
            archived = ?outcome.archived,
            "Promoted model version"
        );
        Ok(Artifact::Promoted { outcome })
    }

    /// A cached promotion is void once the registry no longer records it,
    /// e.g. after the version was registered afresh
    fn is_current(&self, _inputs: &StageInputs, output: &Artifact) -> bool {
        let Artifact::Promoted { outcome } = output else {
            return false;
        };
        match self.registry.get(&outcome.model, outcome.version) {
            Ok(stored) => stored.state != PromotionState::Staging || outcome.to == stored.state,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::FailureClass;
    use crate::stages::fixtures::{ctx, inputs};
    use riskline_registry::{PromotionPolicy, VersionId};

    fn registered(version: u32) -> StageInputs {
        inputs(vec![(
            "register",
            Artifact::Registered {
                model: "loans".into(),
                version: VersionId::new(version),
            },
        )])
    }

    #[test]
    fn test_unknown_version_fails() {
        let stage = PromoteStage::new(ModelRegistry::default(), PromotionState::Production);
        let err = stage.run(&ctx("promote"), &registered(9)).unwrap_err();
        assert_eq!(err.class, FailureClass::Internal);
    }

    #[test]
    fn test_policy_is_part_of_the_config() {
        let lax = PromoteStage::new(ModelRegistry::default(), PromotionState::Production);
        let strict = PromoteStage::new(
            ModelRegistry::new(PromotionPolicy::new(Some(0.8), None)),
            PromotionState::Production,
        );
        assert_ne!(
            lax.config_fingerprint().unwrap(),
            strict.config_fingerprint().unwrap()
        );
    }
}
