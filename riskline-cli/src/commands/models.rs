//! Models command: list registered models and their versions

use super::{load_registry, open_store};
use crate::config::RuntimeConfig;
use anyhow::Result;
use riskline_registry::{ModelArtifact, ModelRegistry, PromotionPolicy, RegistryError};

pub async fn execute(model: Option<&str>, runtime: &RuntimeConfig) -> Result<()> {
    let store = open_store(runtime).await?;
    let registry = load_registry(store.as_ref(), PromotionPolicy::default()).await?;

    match model {
        Some(name) => print_versions(&registry.list(name)?),
        None => print_models(&registry)?,
    }
    Ok(())
}

fn print_models(registry: &ModelRegistry) -> Result<()> {
    let names = registry.models()?;
    if names.is_empty() {
        println!("No models registered");
        return Ok(());
    }
    println!("{:<32} {:>8} {:>12}", "MODEL", "VERSIONS", "PRODUCTION");
    for name in names {
        let versions = registry.list(&name)?.len();
        let production = match registry.get_production(&name) {
            Ok(artifact) => artifact.version.to_string(),
            Err(RegistryError::NoProduction(_)) => "-".to_string(),
            Err(e) => return Err(e.into()),
        };
        println!("{:<32} {:>8} {:>12}", name, versions, production);
    }
    Ok(())
}

fn print_versions(versions: &[ModelArtifact]) {
    println!(
        "{:<8} {:<11} {:>7} {:>8} {:>9} {:<18} CREATED",
        "VERSION", "STATE", "AUC", "ECE", "LOG_LOSS", "DATASET"
    );
    for artifact in versions {
        let auc = artifact
            .metrics
            .auc
            .map(|auc| format!("{auc:.4}"))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "{:<8} {:<11} {:>7} {:>8.4} {:>9.4} {:<18} {}",
            artifact.version.to_string(),
            artifact.state.to_string(),
            auc,
            artifact.metrics.calibration_error,
            artifact.metrics.log_loss,
            artifact.lineage.dataset_fingerprint.short(),
            artifact.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}
