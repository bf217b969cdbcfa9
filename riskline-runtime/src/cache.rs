//! Content-addressed stage output cache
//!
//! Outputs are keyed by the stage name, the fingerprints of every dependency
//! output and the stage's config fingerprint. The first writer of a key wins,
//! both in memory and in the backing store.

use crate::artifact::StageOutput;
use crate::metrics::CACHE_LOOKUPS_TOTAL;
use crate::stage::StageInputs;
use dashmap::DashMap;
use riskline_core::{Fingerprint, Fingerprinter};
use riskline_storage::{get_json, put_json, put_json_if_absent, ObjectStore};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Prefix of persisted cache entries
pub const CACHE_PREFIX: &str = "cache/";

/// Cache key of one stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(Fingerprint);

impl CacheKey {
    pub fn compute(stage: &str, inputs: &StageInputs, config: &Fingerprint) -> Self {
        let mut fp = Fingerprinter::new("riskline.cache.v1");
        fp.str(stage);
        for (name, output) in inputs.fingerprints() {
            fp.tag(1).str(name).fingerprint(&output);
        }
        fp.tag(0).fingerprint(config);
        Self(fp.finish())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.0
    }

    /// Object store key of the persisted entry
    pub fn storage_key(&self) -> String {
        format!("{}{}.json", CACHE_PREFIX, self.0.to_hex())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.short())
    }
}

/// Stage output cache, optionally persisted to an object store
#[derive(Default)]
pub struct ArtifactCache {
    entries: DashMap<CacheKey, Arc<StageOutput>>,
    store: Option<Arc<dyn ObjectStore>>,
}

impl fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("entries", &self.entries.len())
            .field("backend", &self.store.as_ref().map(|s| s.backend()))
            .finish()
    }
}

impl ArtifactCache {
    /// Cache that lives only as long as the process
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache persisted under `cache/` in `store`
    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            entries: DashMap::new(),
            store: Some(store),
        }
    }

    /// Look a key up in memory, then in the store
    pub async fn lookup(
        &self,
        key: &CacheKey,
    ) -> riskline_storage::Result<Option<Arc<StageOutput>>> {
        let hit = self.entries.get(key).map(|e| Arc::clone(e.value()));
        if let Some(hit) = hit {
            CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
            return Ok(Some(hit));
        }

        if let Some(store) = &self.store {
            let stored = get_json::<StageOutput>(store.as_ref(), &key.storage_key()).await?;
            if let Some(stored) = stored {
                debug!(key = %key, "Loaded cache entry from store");
                let output = Arc::clone(
                    self.entries
                        .entry(*key)
                        .or_insert_with(|| Arc::new(stored))
                        .value(),
                );
                CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
                return Ok(Some(output));
            }
        }

        CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
        Ok(None)
    }

    /// Insert an output unless the key is already taken. Returns the output
    /// that owns the key afterwards, which is the earlier one on a lost race.
    pub async fn insert(
        &self,
        key: CacheKey,
        output: StageOutput,
    ) -> riskline_storage::Result<Arc<StageOutput>> {
        let existing = self.entries.get(&key).map(|e| Arc::clone(e.value()));
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let mut output = output;
        if let Some(store) = &self.store {
            let storage_key = key.storage_key();
            let created = put_json_if_absent(store.as_ref(), &storage_key, &output).await?;
            if !created {
                if let Some(stored) = get_json::<StageOutput>(store.as_ref(), &storage_key).await? {
                    debug!(key = %key, "Cache key already persisted; keeping stored entry");
                    output = stored;
                }
            }
        }

        Ok(Arc::clone(
            self.entries
                .entry(key)
                .or_insert_with(|| Arc::new(output))
                .value(),
        ))
    }

    /// Overwrite the entry of a key whose cached output no longer holds
    pub async fn replace(
        &self,
        key: CacheKey,
        output: StageOutput,
    ) -> riskline_storage::Result<Arc<StageOutput>> {
        if let Some(store) = &self.store {
            put_json(store.as_ref(), &key.storage_key(), &output).await?;
        }
        let output = Arc::new(output);
        self.entries.insert(key, Arc::clone(&output));
        debug!(key = %key, "Replaced stale cache entry");
        Ok(output)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
