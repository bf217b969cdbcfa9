//! Stage contract and stage failures

use crate::artifact::{Artifact, StageOutput};
use riskline_core::{Fingerprint, ModelError, SchemaError, TransformCause, TransformError};
use riskline_registry::RegistryError;
use riskline_storage::is_transient_io;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Failure taxonomy used for retry decisions and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Input violated its schema or ingestion checks
    Validation,
    /// Feature transform rejected its input or config
    Transform,
    /// I/O failure that may succeed on retry
    Transient,
    /// Stage exceeded its time budget
    Timeout,
    /// Registry promotion lost a race twice
    Conflict,
    /// Promotion thresholds were not met
    Threshold,
    /// Run was cancelled before the stage started
    Cancelled,
    /// A dependency failed
    UpstreamFailed,
    /// Configuration or internal error
    Internal,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::Transient | FailureClass::Timeout)
    }

    /// Process exit status for a run whose first failure has this class
    pub fn exit_code(&self) -> i32 {
        match self {
            FailureClass::Validation => 2,
            FailureClass::Transform => 3,
            FailureClass::Transient | FailureClass::Timeout => 4,
            FailureClass::Conflict => 5,
            FailureClass::Threshold => 6,
            FailureClass::Cancelled => 7,
            FailureClass::UpstreamFailed | FailureClass::Internal => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Validation => "validation",
            FailureClass::Transform => "transform",
            FailureClass::Transient => "transient",
            FailureClass::Timeout => "timeout",
            FailureClass::Conflict => "conflict",
            FailureClass::Threshold => "threshold",
            FailureClass::Cancelled => "cancelled",
            FailureClass::UpstreamFailed => "upstream_failed",
            FailureClass::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a stage
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{class}: {message}")]
pub struct StageError {
    pub class: FailureClass,
    pub message: String,
}

impl StageError {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Validation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Transient, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Internal, message)
    }

    pub fn timeout(stage: &str, limit: std::time::Duration) -> Self {
        Self::new(
            FailureClass::Timeout,
            format!("stage '{}' exceeded {:?}", stage, limit),
        )
    }

    pub fn upstream(failed: &str) -> Self {
        Self::new(
            FailureClass::UpstreamFailed,
            format!("upstream stage '{}' failed", failed),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(FailureClass::Cancelled, "run cancelled before stage started")
    }

    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

impl From<SchemaError> for StageError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Validation(_) | SchemaError::UnknownSchema(_) => {
                Self::validation(err.to_string())
            }
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<TransformError> for StageError {
    fn from(err: TransformError) -> Self {
        match err.cause {
            TransformCause::Validation(_) => Self::validation(err.to_string()),
            _ => Self::new(FailureClass::Transform, err.to_string()),
        }
    }
}

impl From<ModelError> for StageError {
    fn from(err: ModelError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<RegistryError> for StageError {
    fn from(err: RegistryError) -> Self {
        match &err {
            RegistryError::ThresholdNotMet { .. } => {
                Self::new(FailureClass::Threshold, err.to_string())
            }
            RegistryError::Conflict(_) => Self::new(FailureClass::Conflict, err.to_string()),
            RegistryError::Storage(inner) if inner.is_transient() => {
                Self::transient(err.to_string())
            }
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<riskline_storage::Error> for StageError {
    fn from(err: riskline_storage::Error) -> Self {
        if err.is_transient() {
            Self::transient(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

/// Only interruptions are retried. A missing or malformed input is the
/// caller's to fix; anything else is an environment failure.
impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        if is_transient_io(err.kind()) {
            return Self::transient(err.to_string());
        }
        match err.kind() {
            ErrorKind::NotFound | ErrorKind::InvalidData | ErrorKind::InvalidInput => {
                Self::validation(err.to_string())
            }
            _ => Self::internal(err.to_string()),
        }
    }
}

/// Cooperative cancellation shared by a run and its stages
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-attempt information handed to a stage
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: Uuid,
    pub stage: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub cancel: CancellationFlag,
}

/// Outputs of a stage's dependencies, keyed by dependency name
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    outputs: BTreeMap<String, Arc<StageOutput>>,
}

impl StageInputs {
    pub fn new(outputs: BTreeMap<String, Arc<StageOutput>>) -> Self {
        Self { outputs }
    }

    pub fn get(&self, name: &str) -> Option<&StageOutput> {
        self.outputs.get(name).map(Arc::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// `(dependency name, output fingerprint)` in name order
    pub fn fingerprints(&self) -> impl Iterator<Item = (&str, Fingerprint)> {
        self.outputs
            .iter()
            .map(|(name, out)| (name.as_str(), out.fingerprint))
    }

    /// First dependency output the selector accepts
    pub fn find<'a, T: 'a>(
        &'a self,
        what: &str,
        select: impl Fn(&'a Artifact) -> Option<T>,
    ) -> Result<T, StageError> {
        self.outputs
            .values()
            .find_map(|out| select(&out.artifact))
            .ok_or_else(|| StageError::internal(format!("missing {} input", what)))
    }
}

/// A pipeline step: a synchronous, deterministic function of its
/// dependencies' outputs plus its own configuration.
pub trait Stage: Send + Sync {
    /// Short kind tag used in logs and metrics, e.g. `transform`
    fn kind(&self) -> &'static str;

    /// Fingerprint of everything besides inputs that affects the output.
    /// Part of the cache key.
    fn config_fingerprint(&self) -> Result<Fingerprint, StageError>;

    fn run(&self, ctx: &StageContext, inputs: &StageInputs) -> Result<Artifact, StageError>;

    /// Whether a cached output still describes the outside world. A stale
    /// output is recomputed even though its cache key matches.
    fn is_current(&self, _inputs: &StageInputs, _output: &Artifact) -> bool {
        true
    }
}
