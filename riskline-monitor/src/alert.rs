//! Drift alerts and the append-only alert log

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use riskline_registry::VersionId;
use riskline_storage::{put_json_if_absent, ObjectStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// A feature whose live distribution diverged from its reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub model_name: String,
    pub version: VersionId,
    pub feature: String,
    /// Population stability index of the live batch
    pub divergence: f64,
    /// Threshold that was exceeded
    pub threshold: f64,
    /// Non-missing live samples the divergence was computed from
    pub sample_count: usize,
}

impl DriftAlert {
    /// Storage key of this alert
    pub fn key(&self) -> String {
        format!(
            "alerts/{}/{}-{}.json",
            self.model_name,
            self.timestamp.format("%Y%m%dT%H%M%S%.6fZ"),
            self.id
        )
    }
}

#[derive(Default)]
struct LogInner {
    active: Vec<DriftAlert>,
    archived: Vec<DriftAlert>,
    persisted: HashSet<Uuid>,
}

/// Append-only alert log. Entries are never modified; archiving moves old
/// entries out of the active list unchanged. Clones share the same log.
#[derive(Clone, Default)]
pub struct AlertLog {
    inner: Arc<Mutex<LogInner>>,
}

impl std::fmt::Debug for AlertLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertLog").finish_non_exhaustive()
    }
}

impl AlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogInner>> {
        self.inner.lock().map_err(|_| Error::LockPoisoned)
    }

    pub fn append(&self, alerts: impl IntoIterator<Item = DriftAlert>) -> Result<()> {
        self.lock()?.active.extend(alerts);
        Ok(())
    }

    /// Active (non-archived) alerts, oldest first
    pub fn active(&self) -> Result<Vec<DriftAlert>> {
        Ok(self.lock()?.active.clone())
    }

    pub fn archived(&self) -> Result<Vec<DriftAlert>> {
        Ok(self.lock()?.archived.clone())
    }

    /// Total number of alerts ever appended
    pub fn len(&self) -> Result<usize> {
        let inner = self.lock()?;
        Ok(inner.active.len() + inner.archived.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Move active alerts older than `cutoff` to the archive; returns how many moved
    pub fn archive_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.lock()?;
        let (old, keep): (Vec<_>, Vec<_>) = inner
            .active
            .drain(..)
            .partition(|a| a.timestamp < cutoff);
        let moved = old.len();
        inner.active = keep;
        inner.archived.extend(old);
        Ok(moved)
    }

    /// Write every alert not yet persisted; returns how many were written
    pub async fn persist_new(&self, store: &dyn ObjectStore) -> Result<usize> {
        let pending: Vec<DriftAlert> = {
            let inner = self.lock()?;
            inner
                .archived
                .iter()
                .chain(&inner.active)
                .filter(|a| !inner.persisted.contains(&a.id))
                .cloned()
                .collect()
        };

        let mut written = 0;
        for alert in &pending {
            put_json_if_absent(store, &alert.key(), alert).await?;
            self.lock()?.persisted.insert(alert.id);
            written += 1;
        }
        if written > 0 {
            debug!(written, backend = store.backend(), "Persisted drift alerts");
        }
        Ok(written)
    }
}
