//! Promote command

use super::{load_registry, open_store, save_registry, EXIT_OK};
use crate::config::RuntimeConfig;
use anyhow::{Context, Result};
use riskline_registry::{PromotionPolicy, PromotionState, RegistryError, VersionId};
use riskline_runtime::FailureClass;
use tracing::error;

/// Move a model version to `target`; returns the exit code
pub async fn execute(
    model: &str,
    version: VersionId,
    target: PromotionState,
    policy: PromotionPolicy,
    runtime: &RuntimeConfig,
) -> Result<i32> {
    let store = open_store(runtime).await?;
    let registry = load_registry(store.as_ref(), policy).await?;

    let outcome = match registry.promote(model, version, target) {
        Ok(outcome) => outcome,
        Err(e) => {
            let Some(code) = exit_code(&e) else {
                return Err(e).context(format!("cannot promote {model}:{version}"));
            };
            error!(model, version = %version, error = %e, "Promotion rejected");
            println!("Promotion rejected: {}", e);
            return Ok(code);
        }
    };

    if let Some(code) = save_registry(&registry, store.as_ref()).await? {
        return Ok(code);
    }

    if outcome.noop {
        println!("{}:{} is already {}", outcome.model, outcome.version, outcome.to);
        return Ok(EXIT_OK);
    }
    println!(
        "{}:{} {} -> {}",
        outcome.model, outcome.version, outcome.from, outcome.to
    );
    if let Some(archived) = outcome.archived {
        println!("Archived previous production version {}", archived);
    }
    if let Some(snapshot) = outcome.snapshot_id {
        println!("Reference snapshot: {}", snapshot);
    }
    Ok(EXIT_OK)
}

/// Exit code for rejections that are reported rather than raised
fn exit_code(error: &RegistryError) -> Option<i32> {
    match error {
        RegistryError::ThresholdNotMet { .. } => Some(FailureClass::Threshold.exit_code()),
        RegistryError::Conflict(_) => Some(FailureClass::Conflict.exit_code()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_exit_codes() {
        let threshold = RegistryError::ThresholdNotMet {
            model: "credit".into(),
            version: VersionId::new(2),
            failures: vec!["auc 0.6 < minimum 0.7".into()],
        };
        assert_eq!(exit_code(&threshold), Some(6));
        assert_eq!(exit_code(&RegistryError::Conflict("credit".into())), Some(5));
        assert_eq!(exit_code(&RegistryError::UnknownModel("credit".into())), None);
    }
}
