//! # Riskline Runtime
//!
//! Pipeline execution for Riskline: the stage contract, the pipeline
//! compiler, the DAG executor with its content-addressed artifact cache,
//! retry and concurrency control, the run ledger, the built-in credit
//! pipeline stages and the serving facade.

pub mod artifact;
pub mod cache;
pub mod compiler;
pub mod concurrency;
pub mod executor;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod run;
pub mod serving;
pub mod stage;
pub mod stages;
pub mod state_machine;

// Re-export commonly used types
pub use artifact::{Artifact, Evaluation, StageOutput, TrainedModel};
pub use cache::{ArtifactCache, CacheKey};
pub use compiler::{CompileError, ExecutionPlan, PipelineCompiler, PipelineDefinition};
pub use concurrency::ConcurrencyLimiter;
pub use executor::{ExecutorConfig, PipelineExecutor, RunOptions};
pub use pipeline::{PipelineConfig, TrainConfig};
pub use report::RunReport;
pub use retry::{RetryPolicy, RetryStrategy};
pub use run::{PipelineRun, RetentionPolicy, RunLedger, StageRecord};
pub use serving::{ScoreResponse, ServingFacade};
pub use stage::{
    CancellationFlag, FailureClass, Stage, StageContext, StageError, StageInputs,
};
pub use state_machine::{RunState, StageState, StateMachine};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No model loaded for {0}")]
    NoModelLoaded(String),

    #[error("Registry error: {0}")]
    Registry(#[from] riskline_registry::RegistryError),

    #[error("Storage error: {0}")]
    Storage(#[from] riskline_storage::Error),

    #[error("Transform error: {0}")]
    Transform(#[from] riskline_core::TransformError),

    #[error("Model error: {0}")]
    Model(#[from] riskline_core::ModelError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
