//! Credit-risk pipeline configuration and assembly
//!
//! A [`PipelineConfig`] is read from a JSON file and turned into the standard
//! stage graph:
//!
//! ```text
//! ingest -> validate -> transform -> train -> evaluate -> register [-> promote]
//! ```
//!
//! `evaluate` and `register` also read the feature matrix directly.

use crate::cache::ArtifactCache;
use crate::compiler::{PipelineCompiler, PipelineDefinition};
use crate::executor::{ExecutorConfig, PipelineExecutor, RunOptions};
use crate::run::PipelineRun;
use crate::stages::{
    DatasetSource, EvaluateStage, IngestStage, PromoteStage, RegisterStage, TrainStage,
    TransformStage, ValidateStage,
};
use crate::{Error, Result};
use riskline_core::presets::credit_default_transform;
use riskline_core::{
    trainer_for, SchemaId, SchemaRegistry, TrainParams, TransformConfig, LOGISTIC_REGRESSION,
};
use riskline_registry::{ModelRegistry, PromotionPolicy, PromotionState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

pub const STAGE_INGEST: &str = "ingest";
pub const STAGE_VALIDATE: &str = "validate";
pub const STAGE_TRANSFORM: &str = "transform";
pub const STAGE_TRAIN: &str = "train";
pub const STAGE_EVALUATE: &str = "evaluate";
pub const STAGE_REGISTER: &str = "register";
pub const STAGE_PROMOTE: &str = "promote";

fn default_trainer() -> String {
    LOGISTIC_REGRESSION.to_string()
}

/// Trainer selection plus its hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    #[serde(default = "default_trainer")]
    pub trainer: String,

    #[serde(flatten)]
    pub params: TrainParams,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            trainer: default_trainer(),
            params: TrainParams::default(),
        }
    }
}

/// Everything needed to run the credit pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Registry name of the trained model
    pub model_name: String,

    /// Schema the raw dataset must satisfy
    pub schema: SchemaId,

    #[serde(default = "credit_default_transform")]
    pub transform: TransformConfig,

    #[serde(default)]
    pub train: TrainConfig,

    /// Thresholds for entering production
    #[serde(default)]
    pub promotion: PromotionPolicy,

    /// Promote the new version at the end of the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promote_to: Option<PromotionState>,

    #[serde(flatten)]
    pub executor: ExecutorConfig,

    /// Opaque compute parameters recorded on the run
    #[serde(default)]
    pub compute: BTreeMap<String, serde_json::Value>,
}

impl PipelineConfig {
    pub fn new(model_name: impl Into<String>, schema: SchemaId) -> Self {
        Self {
            model_name: model_name.into(),
            schema,
            transform: credit_default_transform(),
            train: TrainConfig::default(),
            promotion: PromotionPolicy::default(),
            promote_to: None,
            executor: ExecutorConfig::default(),
            compute: BTreeMap::new(),
        }
    }

    /// Read and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(Error::InvalidConfig("model_name must not be empty".to_string()));
        }
        self.transform.validate()?;
        self.train.params.validate()?;
        trainer_for(&self.train.trainer)?;
        self.executor.validate()
    }

    /// Stage graph of the pipeline
    pub fn build_pipeline(
        &self,
        source: DatasetSource,
        schemas: Arc<SchemaRegistry>,
        registry: ModelRegistry,
    ) -> PipelineDefinition {
        let mut ingest = IngestStage::new(source);
        if let Some(target) = &self.transform.target {
            ingest = ingest.with_target(target.clone());
        }

        let definition = PipelineDefinition::new(self.model_name.clone())
            .stage(STAGE_INGEST, &[], ingest)
            .stage(
                STAGE_VALIDATE,
                &[STAGE_INGEST],
                ValidateStage::new(Arc::clone(&schemas), self.schema.clone()),
            )
            .stage(
                STAGE_TRANSFORM,
                &[STAGE_VALIDATE],
                TransformStage::new(schemas, self.transform.clone()),
            )
            .stage(
                STAGE_TRAIN,
                &[STAGE_TRANSFORM],
                TrainStage::new(self.train.trainer.clone(), self.train.params.clone()),
            )
            .stage(STAGE_EVALUATE, &[STAGE_TRANSFORM, STAGE_TRAIN], EvaluateStage::new())
            .stage(
                STAGE_REGISTER,
                &[STAGE_TRANSFORM, STAGE_TRAIN, STAGE_EVALUATE],
                RegisterStage::new(registry.clone(), self.model_name.clone()),
            );

        match self.promote_to {
            Some(target) => definition.stage(
                STAGE_PROMOTE,
                &[STAGE_REGISTER],
                PromoteStage::new(registry, target),
            ),
            None => definition,
        }
    }

    /// Compile and execute the pipeline once
    #[instrument(skip_all, fields(model = %self.model_name))]
    pub async fn run(
        &self,
        source: DatasetSource,
        schemas: Arc<SchemaRegistry>,
        registry: ModelRegistry,
        cache: Arc<ArtifactCache>,
        options: RunOptions,
    ) -> Result<PipelineRun> {
        self.validate()?;
        let pipeline = self.build_pipeline(source, schemas, registry);
        let plan = PipelineCompiler::new().compile(&pipeline)?;
        let executor = PipelineExecutor::new(self.executor.clone(), cache)?;

        let mut options = options;
        for (key, value) in &self.compute {
            options
                .compute
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        executor.execute(&plan, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskline_core::presets::CREDIT_TARGET;

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "model_name": "credit_default",
                "schema": {"name": "credit_default", "version": 1},
                "train": {"epochs": 50},
                "stage_timeout_secs": 30,
                "promote_to": "production",
                "promotion": {"min_auc": 0.7},
                "compute": {"target": "cpu-cluster"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.train.trainer, LOGISTIC_REGRESSION);
        assert_eq!(config.train.params.epochs, 50);
        assert_eq!(config.train.params.seed, TrainParams::default().seed);
        assert_eq!(config.executor.stage_timeout_secs, 30);
        assert_eq!(config.promote_to, Some(PromotionState::Production));
        assert_eq!(config.promotion.min_auc, Some(0.7));
        assert_eq!(config.transform.target.as_deref(), Some(CREDIT_TARGET));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PipelineConfig::new("credit", SchemaId::new("credit_default", 1));
        config.train.trainer = "unknown".into();
        assert!(matches!(config.validate(), Err(Error::Model(_))));

        let mut config = PipelineConfig::new(" ", SchemaId::new("credit_default", 1));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.model_name = "credit".into();
        config.executor.stage_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_shape() {
        let mut config = PipelineConfig::new("credit", SchemaId::new("credit_default", 1));
        let registry = ModelRegistry::default();
        let schemas = Arc::new(SchemaRegistry::new());
        let source = || {
            DatasetSource::Inline(riskline_core::Dataset::new(
                SchemaId::new("credit_default", 1),
                vec![],
            ))
        };

        let plan = PipelineCompiler::new()
            .compile(&config.build_pipeline(source(), schemas.clone(), registry.clone()))
            .unwrap();
        assert_eq!(
            plan.order(),
            [
                STAGE_INGEST,
                STAGE_VALIDATE,
                STAGE_TRANSFORM,
                STAGE_TRAIN,
                STAGE_EVALUATE,
                STAGE_REGISTER
            ]
        );

        config.promote_to = Some(PromotionState::Production);
        let plan = PipelineCompiler::new()
            .compile(&config.build_pipeline(source(), schemas, registry))
            .unwrap();
        assert_eq!(plan.order().last().map(String::as_str), Some(STAGE_PROMOTE));
    }
}
