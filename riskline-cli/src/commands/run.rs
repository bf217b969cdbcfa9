//! Run command: execute the credit pipeline once

use super::{load_registry, open_store, save_registry};
use crate::config::RuntimeConfig;
use anyhow::{bail, Context, Result};
use riskline_core::{Schema, SchemaRegistry};
use riskline_registry::PromotionState;
use riskline_runtime::stages::{DataFormat, DatasetSource};
use riskline_runtime::{
    ArtifactCache, CancellationFlag, PipelineConfig, RunLedger, RunOptions, RunReport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Inputs of a pipeline run
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub config: PathBuf,
    pub schemas: Vec<PathBuf>,
    pub data: PathBuf,
    pub format: Option<DataFormat>,
    pub promote: Option<PromotionState>,
    /// `key=value` compute parameters; values are parsed as JSON when possible
    pub compute: Vec<String>,
}

/// Run the pipeline and return its exit code
pub async fn execute(args: RunArgs, runtime: &RuntimeConfig) -> Result<i32> {
    let mut config = PipelineConfig::load(&args.config)
        .with_context(|| format!("cannot load pipeline config {}", args.config.display()))?;
    runtime.apply(&mut config.executor);
    if args.promote.is_some() {
        config.promote_to = args.promote;
    }
    for entry in &args.compute {
        let (key, value) = parse_compute(entry)?;
        config.compute.insert(key, value);
    }

    let schemas = Arc::new(load_schemas(&args.schemas)?);
    if !schemas.ids().contains(&config.schema) {
        bail!("schema {} is not among the loaded schema files", config.schema);
    }

    let store = open_store(runtime).await?;
    let registry = load_registry(store.as_ref(), config.promotion.clone()).await?;
    let cache = Arc::new(ArtifactCache::with_store(store.clone()));

    let cancel = CancellationFlag::new();
    let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    info!(
        model = %config.model_name,
        data = %args.data.display(),
        "Starting pipeline run"
    );
    let source = DatasetSource::File {
        path: args.data.clone(),
        schema: config.schema.clone(),
        format: args.format,
    };
    let run = config
        .run(
            source,
            schemas,
            registry.clone(),
            cache,
            RunOptions {
                cancel,
                ..Default::default()
            },
        )
        .await
        .context("pipeline could not start")?;
    watcher.abort();

    let conflict = save_registry(&registry, store.as_ref()).await?;

    let report = RunReport::from_run(&run);
    let mut ledger = RunLedger::load_from(store.as_ref())
        .await
        .context("cannot load run ledger")?;
    ledger.record(run);
    ledger
        .save_to(store.as_ref())
        .await
        .context("cannot save run ledger")?;

    println!("{}", report);
    Ok(conflict.unwrap_or_else(|| report.exit_code()))
}

async fn cancel_on_ctrl_c(cancel: CancellationFlag) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received; cancelling after running stages finish");
        cancel.cancel();
    }
}

/// Read one JSON schema per file
pub fn load_schemas(paths: &[PathBuf]) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    for path in paths {
        let schema = read_schema(path)?;
        registry
            .register(schema)
            .with_context(|| format!("invalid schema in {}", path.display()))?;
    }
    Ok(registry)
}

fn read_schema(path: &Path) -> Result<Schema> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read schema {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("cannot parse schema {}", path.display()))
}

fn parse_compute(entry: &str) -> Result<(String, serde_json::Value)> {
    let Some((key, raw)) = entry.split_once('=') else {
        bail!("compute parameter '{entry}' must look like key=value");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("compute parameter '{entry}' has an empty key");
    }
    let value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskline_core::{ColumnSpec, SchemaId};
    use serde_json::json;

    #[test]
    fn test_parse_compute() {
        assert_eq!(
            parse_compute("target=gpu").unwrap(),
            ("target".to_string(), json!("gpu"))
        );
        assert_eq!(
            parse_compute("workers=4").unwrap(),
            ("workers".to_string(), json!(4))
        );
        assert!(parse_compute("novalue").is_err());
        assert!(parse_compute("=1").is_err());
    }

    #[test]
    fn test_load_schemas_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Schema::builder("loans", 2)
            .column("id", ColumnSpec::integer())
            .column("default", ColumnSpec::integer().one_of([0, 1]))
            .build();
        let path = dir.path().join("loans.json");
        std::fs::write(&path, serde_json::to_string(&schema).unwrap()).unwrap();

        let registry = load_schemas(&[path]).unwrap();
        assert_eq!(registry.ids(), vec![SchemaId::new("loans", 2)]);

        let missing = dir.path().join("missing.json");
        assert!(load_schemas(&[missing]).is_err());
    }
}
