//! Built-in stages of the credit-risk pipeline
//!
//! `ingest -> validate -> transform -> train -> evaluate -> register -> promote`

pub mod evaluate;
pub mod ingest;
pub mod promote;
pub mod register;
pub mod train;
pub mod transform;
pub mod validate;

pub use evaluate::EvaluateStage;
pub use ingest::{DataFormat, DatasetSource, IngestStage};
pub use promote::PromoteStage;
pub use register::RegisterStage;
pub use train::TrainStage;
pub use transform::TransformStage;
pub use validate::ValidateStage;

use crate::stage::StageError;
use riskline_core::Fingerprint;
use serde::Serialize;

/// Fingerprint of a serializable stage config
pub(crate) fn config_fingerprint<T: Serialize + ?Sized>(
    value: &T,
) -> Result<Fingerprint, StageError> {
    Fingerprint::of_json(value)
        .map_err(|e| StageError::internal(format!("cannot fingerprint stage config: {}", e)))
}
