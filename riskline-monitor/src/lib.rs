//! # Riskline Monitor
//!
//! Compares live scoring-time feature distributions against the reference
//! snapshot of the production model using the population stability index.
//! The monitor only reports: it raises [`DriftAlert`]s into an append-only
//! [`AlertLog`] and never touches serving behaviour.

pub mod alert;
pub mod metrics;
pub mod monitor;
pub mod psi;

// Re-export commonly used types
pub use alert::{AlertLog, DriftAlert};
pub use monitor::{audit, DriftConfig, DriftMonitor, FeatureBatch};
pub use psi::population_stability_index;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for monitor operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid drift configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(#[from] riskline_storage::Error),

    #[error("Alert log lock poisoned")]
    LockPoisoned,
}
