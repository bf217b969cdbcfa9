//! Bounded parallelism for stage compute

use crate::metrics::STAGE_QUEUE_WAIT;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, Instrument};

/// Caps the number of stages computing at once across a run
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    /// Zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// One slot per available core
    pub fn from_available_parallelism() -> Self {
        Self::new(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
    }

    /// Wait for a compute slot for `stage`; the slot is released when the
    /// returned permit drops
    pub async fn acquire_for(&self, stage: &str) -> crate::Result<OwnedSemaphorePermit> {
        let span = tracing::debug_span!("stage.queue", stage, capacity = self.capacity);
        let start = Instant::now();
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .instrument(span)
            .await
            .map_err(|_| crate::Error::Internal("concurrency limiter closed".to_string()))?;

        let waited = start.elapsed();
        STAGE_QUEUE_WAIT
            .with_label_values(&[stage])
            .observe(waited.as_secs_f64());
        debug!(stage, waited_ms = waited.as_millis() as u64, "Acquired compute slot");
        Ok(permit)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}
