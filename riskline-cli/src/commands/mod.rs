//! CLI command implementations

pub mod audit;
pub mod lineage;
pub mod models;
pub mod promote;
pub mod run;
pub mod runs;

use crate::config::RuntimeConfig;
use anyhow::{Context, Result};
use riskline_registry::{ModelRegistry, PromotionPolicy, RegistryError};
use riskline_runtime::FailureClass;
use riskline_storage::{FsStore, ObjectStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Exit status for a command that completed normally
pub const EXIT_OK: i32 = 0;

/// Open the filesystem store named by the runtime config
pub async fn open_store(runtime: &RuntimeConfig) -> Result<Arc<dyn ObjectStore>> {
    let store = FsStore::open(runtime.store_dir.clone())
        .await
        .with_context(|| format!("cannot open store at {}", runtime.store_dir.display()))?;
    debug!(dir = %runtime.store_dir.display(), "Opened object store");
    Ok(Arc::new(store))
}

/// Load the persisted registry, or start an empty one
pub async fn load_registry(
    store: &dyn ObjectStore,
    policy: PromotionPolicy,
) -> Result<ModelRegistry> {
    let registry = ModelRegistry::load_from(store, policy.clone())
        .await
        .context("cannot load model registry")?;
    Ok(registry.unwrap_or_else(|| ModelRegistry::new(policy)))
}

/// Persist the registry. A concurrent change to the same model is reported
/// with the conflict exit code instead of an error.
pub async fn save_registry(
    registry: &ModelRegistry,
    store: &dyn ObjectStore,
) -> Result<Option<i32>> {
    match registry.save_to(store).await {
        Ok(()) => Ok(None),
        Err(e @ RegistryError::Conflict(_)) => {
            warn!(error = %e, "Registry changed concurrently, not saved");
            println!("Registry not saved: {}", e);
            Ok(Some(FailureClass::Conflict.exit_code()))
        }
        Err(e) => Err(e).context("cannot save model registry"),
    }
}
