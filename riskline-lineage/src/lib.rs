//! # Riskline Lineage
//!
//! Tracks which dataset produced which feature set, which run consumed it and
//! which model version the run produced. Supports upstream traces, downstream
//! impact analysis and a report grouped by data stage.

pub mod graph;
pub mod impact;
pub mod queries;
pub mod report;

// Re-export commonly used types
pub use graph::{DataStage, LineageEdge, LineageGraph, LineageNode, NodeKey};
pub use impact::{ChangeImpact, ImpactAnalysis};
pub use queries::{LineageInfo, LineageQuery};
pub use report::LineageReport;

/// Result type for lineage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for lineage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Circular dependency detected")]
    CircularDependency,

    #[error("Registry error: {0}")]
    Registry(#[from] riskline_registry::RegistryError),
}
