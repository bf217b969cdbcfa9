//! # Riskline Core
//!
//! Data model and pure building blocks for the Riskline credit-risk pipeline:
//! typed records and datasets, content fingerprints, the schema registry,
//! the feature transform, distribution profiles, evaluation metrics and the
//! pluggable model contracts.

pub mod dataset;
pub mod evaluation;
pub mod fingerprint;
pub mod model;
pub mod presets;
pub mod profile;
pub mod records;
pub mod schema;
pub mod split;
pub mod transform;
pub mod value;

// Re-export commonly used types
pub use dataset::{Dataset, DatasetSummary};
pub use evaluation::{expected_calibration_error, log_loss, roc_auc, MetricSnapshot};
pub use fingerprint::{Fingerprint, FingerprintParseError, Fingerprinter};
pub use model::{
    decode_model, trainer_for, LogisticRegressionModel, LogisticRegressionTrainer, ModelError,
    ScoringModel, TrainParams, Trainer, LOGISTIC_REGRESSION,
};
pub use profile::{FeatureBins, FeatureProfile, DEFAULT_BINS};
pub use records::{read_csv_records, read_json_records};
pub use schema::{
    ColumnSpec, ColumnType, Schema, SchemaBuilder, SchemaError, SchemaId, SchemaRegistry,
    ValidatedDataset, ValidationError, Violation, ViolationReason,
};
pub use split::HoldoutSplit;
pub use transform::{
    transform, transform_checked, FeatureEncoder, FeatureKind, FeatureMatrix, FeatureSpec,
    FittedParams, ImputeStrategy, Scaling, TransformCause, TransformConfig, TransformError,
    TransformMetadata,
};
pub use value::{CellValue, Record};

/// Result type for Riskline core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Riskline core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Invalid fingerprint: {0}")]
    Fingerprint(#[from] FingerprintParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
