//! Fluent builders for constructing test objects

use crate::fixtures::credit;
use riskline_core::{CellValue, Record, TransformConfig};
use riskline_registry::{PromotionPolicy, PromotionState};
use riskline_runtime::{PipelineConfig, RetryPolicy, RetryStrategy};
use std::time::Duration;

/// Builder for raw records
#[derive(Debug, Clone, Default)]
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int(self, column: &str, value: i64) -> Self {
        self.cell(column, CellValue::Int(value))
    }

    pub fn float(self, column: &str, value: f64) -> Self {
        self.cell(column, CellValue::Float(value))
    }

    pub fn text(self, column: &str, value: &str) -> Self {
        self.cell(column, CellValue::Str(value.to_string()))
    }

    pub fn null(self, column: &str) -> Self {
        self.cell(column, CellValue::Null)
    }

    pub fn cell(mut self, column: &str, value: CellValue) -> Self {
        self.record.insert(column.to_string(), value);
        self
    }

    pub fn build(self) -> Record {
        self.record
    }
}

/// Builder for pipeline configs over the credit fixture.
///
/// Defaults keep tests fast: fewer epochs and millisecond retry delays.
#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new(model_name: &str) -> Self {
        let mut config = PipelineConfig::new(model_name, credit::schema_id());
        config.transform = credit::transform();
        config.train.params.epochs = 150;
        config.executor.stage_timeout_secs = 60;
        config.executor.retry = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            strategy: RetryStrategy::Fixed,
            ..Default::default()
        };
        Self { config }
    }

    pub fn transform(mut self, transform: TransformConfig) -> Self {
        self.config.transform = transform;
        self
    }

    pub fn epochs(mut self, epochs: usize) -> Self {
        self.config.train.params.epochs = epochs;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.train.params.seed = seed;
        self
    }

    pub fn promote_to(mut self, state: PromotionState) -> Self {
        self.config.promote_to = Some(state);
        self
    }

    pub fn min_auc(mut self, min_auc: f64) -> Self {
        let max_calibration_error = self.config.promotion.max_calibration_error;
        self.config.promotion = PromotionPolicy::new(Some(min_auc), max_calibration_error);
        self
    }

    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.config.executor.max_parallel = Some(max_parallel);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.config.executor.retry.max_attempts = attempts;
        self
    }

    pub fn compute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.config.compute.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}
