//! Mock implementations for external collaborators
//!
//! [`FlakyStore`] wraps an in-memory store and fails a configurable number of
//! operations with a transient I/O error before recovering.

use async_trait::async_trait;
use riskline_storage::{Error, MemoryStore, ObjectStore, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Object store that fails the next `n` operations
///
/// # Example
///
/// ```ignore
/// use riskline_tests::mocks::FlakyStore;
///
/// let store = FlakyStore::new();
/// store.fail_next(2);
/// assert!(store.put("a", b"x".to_vec()).await.is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pending_failures: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` operations, whatever they are
    pub fn fail_next(&self, n: usize) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Operations that failed so far
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Operations attempted so far, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Io {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "injected failure"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check(key)?;
        self.inner.put(key, value).await
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        self.check(key)?;
        self.inner.put_if_absent(key, value).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.check(prefix)?;
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check(key)?;
        self.inner.delete(key).await
    }
}
