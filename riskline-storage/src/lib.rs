//! # Riskline Storage
//!
//! Key-value persistence for datasets, cache entries, model artifacts,
//! reference snapshots and the drift alert log. Every backend implements
//! [`ObjectStore`]: `get`, `put`, `put_if_absent`, `list` and `delete` by key.
//!
//! Keys are `/`-separated relative paths (see [`validate_key`]).

pub mod fs;
pub mod json;
pub mod key;
pub mod memory;
pub mod metrics;

use async_trait::async_trait;

// Re-export commonly used types
pub use fs::FsStore;
pub use json::{get_json, put_json, put_json_if_absent};
pub use key::validate_key;
pub use memory::MemoryStore;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Serialization error on '{key}': {message}")]
    Serialization { key: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        Error::Io {
            key: key.to_string(),
            source,
        }
    }

    /// Whether retrying the operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io { source, .. } => is_transient_io(source.kind()),
            _ => false,
        }
    }
}

/// I/O failures that can clear up on their own. A missing file or a
/// permission problem stays the same on every retry.
pub fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        kind,
        TimedOut | Interrupted | WouldBlock | ConnectionReset | ConnectionAborted | UnexpectedEof
    )
}

/// Key-value object storage
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Short backend name used in logs and metrics
    fn backend(&self) -> &'static str;

    /// Read a value; `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any existing one
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Write a value only if the key does not exist yet. Returns `true` when
    /// this call created the key. Concurrent callers race on the key and
    /// exactly one of them wins.
    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove a key. Returns `true` when it existed.
    async fn delete(&self, key: &str) -> Result<bool>;
}
