//! Shared test utilities for Riskline crates
//!
//! This crate provides:
//! - **Fixtures**: a deterministic credit dataset generator and its schema
//! - **Builders**: fluent builders for records and pipeline configs
//! - **Mocks**: object stores that fail on demand
//! - **Assertions**: checks over runs and registries with readable failures
//!
//! # Example
//!
//! ```ignore
//! use riskline_tests::{assertions, builders::PipelineConfigBuilder, fixtures::credit};
//!
//! #[tokio::test]
//! async fn test_training_run() {
//!     let config = PipelineConfigBuilder::new("credit").epochs(100).build();
//!     let run = config
//!         .run(credit::source(1000, 7), credit::schemas(), registry, cache, Default::default())
//!         .await
//!         .unwrap();
//!     assertions::assert_run_succeeded(&run);
//! }
//! ```

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod mocks;

// Re-export commonly used items
pub use builders::{PipelineConfigBuilder, RecordBuilder};
pub use fixtures::credit;
pub use mocks::FlakyStore;
