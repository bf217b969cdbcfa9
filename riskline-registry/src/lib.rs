//! # Riskline Registry
//!
//! Versioned storage of trained models. Every registered artifact gets an
//! immutable, monotonic version (`v1`, `v2`, ...) and starts in `staging`.
//! Promotion to `production` is gated by metric thresholds and is atomic: the
//! previous production version is archived in the same operation, so a model
//! never has two production versions.

pub mod artifact;
pub mod metrics;
pub mod persistence;
pub mod policy;
pub mod registry;
pub mod snapshot;
pub mod version;

// Re-export commonly used types
pub use artifact::{ModelArtifact, ModelCandidate, ModelLineage};
pub use persistence::{revision_key, ModelSnapshot, RegistrySnapshot, REVISIONS_PREFIX};
pub use policy::PromotionPolicy;
pub use registry::{ModelRegistry, PromotionOutcome};
pub use snapshot::ReferenceSnapshot;
pub use version::{PromotionState, VersionId};

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur in the model registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unknown version {version} of model {model}")]
    UnknownVersion { model: String, version: VersionId },

    #[error("No production version for model {0}")]
    NoProduction(String),

    #[error("Invalid transition for {model}:{version}: {from} -> {to}")]
    InvalidTransition {
        model: String,
        version: VersionId,
        from: PromotionState,
        to: PromotionState,
    },

    #[error("Thresholds not met for {model}:{version}: {}", .failures.join("; "))]
    ThresholdNotMet {
        model: String,
        version: VersionId,
        failures: Vec<String>,
    },

    #[error("Concurrent modification of model {0}; abandoned after retry")]
    Conflict(String),

    #[error("Stored payload {key} does not belong to {label}")]
    PayloadMismatch { key: String, label: String },

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Invalid registry snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Storage error: {0}")]
    Storage(#[from] riskline_storage::Error),

    #[error("Registry lock poisoned")]
    LockPoisoned,
}
