//! Registry persistence through an [`ObjectStore`]
//!
//! Layout:
//! - `registry/revisions/{revision}.json`: full registry state, one write-once
//!   document per save; the highest revision is current
//! - `models/{model}/{version}.payload`: raw model payloads, written once
//! - `snapshots/{model}/{id}.json`: reference snapshots, written once
//!
//! A save claims the next revision with `put_if_absent`, so two writers that
//! loaded the same revision cannot both commit. The loser re-reads the store
//! and rebases once: models only one side changed are merged, a model both
//! sides changed is a [`RegistryError::Conflict`].

use crate::artifact::ModelArtifact;
use crate::policy::PromotionPolicy;
use crate::registry::{ModelEntry, ModelRegistry, Persisted, RegistryInner};
use crate::snapshot::ReferenceSnapshot;
use crate::version::{PromotionState, VersionId};
use crate::{RegistryError, Result};
use futures::future::try_join_all;
use riskline_core::Fingerprint;
use riskline_storage::{get_json, put_json_if_absent, ObjectStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Prefix of the registry state documents
pub const REVISIONS_PREFIX: &str = "registry/revisions/";

/// Revisions kept in the store besides the current one
const KEEP_REVISIONS: usize = 8;

/// Store key of one registry revision
pub fn revision_key(revision: u64) -> String {
    format!("{REVISIONS_PREFIX}{revision:012}.json")
}

fn payload_key(model: &str, version: VersionId) -> String {
    format!("models/{model}/{version}.payload")
}

/// Persisted state of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub generation: u64,
    pub versions: Vec<ModelArtifact>,
    pub reference_snapshots: Vec<ReferenceSnapshot>,
}

/// Persisted state of the whole registry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Store revision this state was loaded from or saved as
    #[serde(default)]
    pub revision: u64,
    pub models: BTreeMap<String, ModelSnapshot>,
}

impl ModelRegistry {
    /// Capture the full registry state
    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        let inner = self.read()?;
        let models = inner
            .models
            .iter()
            .map(|(name, entry)| (name.clone(), model_snapshot(entry)))
            .collect();
        Ok(RegistrySnapshot {
            revision: inner.persisted.revision,
            models,
        })
    }

    /// Rebuild a registry from a snapshot, checking its invariants
    pub fn restore(snapshot: RegistrySnapshot, policy: PromotionPolicy) -> Result<Self> {
        let mut inner = RegistryInner {
            persisted: Persisted {
                revision: snapshot.revision,
                generations: BTreeMap::new(),
            },
            ..RegistryInner::default()
        };
        for (name, model) in snapshot.models {
            inner
                .persisted
                .generations
                .insert(name.clone(), model.generation);
            let entry = model_entry(&name, model)?;
            inner.models.insert(name, entry);
        }
        Ok(ModelRegistry::from_inner(inner, policy))
    }

    /// Commit the registry state as the next store revision, then write
    /// payloads and reference snapshots.
    ///
    /// Fails with [`RegistryError::Conflict`] when another writer changed a
    /// model this registry also changed since it was loaded.
    pub async fn save_to(&self, store: &dyn ObjectStore) -> Result<()> {
        for attempt in 0..2 {
            let local = self.snapshot()?;
            let base = self.read()?.persisted.clone();
            let (listed, stored) = latest_revision(store).await?;

            let merged = match &stored {
                Some(current) if current.revision != base.revision => {
                    debug!(
                        loaded = base.revision,
                        current = current.revision,
                        "Registry changed in the store, rebasing"
                    );
                    rebase(&local, &base, current)?
                }
                _ => local.clone(),
            };
            let document = RegistrySnapshot {
                revision: stored.as_ref().map_or(0, |s| s.revision) + 1,
                models: merged.models,
            };

            if !put_json_if_absent(store, &revision_key(document.revision), &document).await? {
                warn!(
                    revision = document.revision,
                    attempt, "Registry revision taken by another writer, retrying"
                );
                continue;
            }

            self.adopt(&local, &document)?;
            write_payloads(store, &document, stored.as_ref()).await?;
            write_reference_snapshots(store, &document).await?;
            prune_revisions(store, &listed).await;

            info!(
                backend = store.backend(),
                revision = document.revision,
                models = document.models.len(),
                "Saved model registry"
            );
            return Ok(());
        }
        Err(RegistryError::Conflict("registry".to_string()))
    }

    /// Load the latest revision saved with [`ModelRegistry::save_to`]; `None`
    /// when the store holds no registry yet
    pub async fn load_from(
        store: &dyn ObjectStore,
        policy: PromotionPolicy,
    ) -> Result<Option<Self>> {
        match latest_revision(store).await?.1 {
            Some(snapshot) => {
                debug!(
                    revision = snapshot.revision,
                    models = snapshot.models.len(),
                    "Loaded registry snapshot"
                );
                Ok(Some(Self::restore(snapshot, policy)?))
            }
            None => Ok(None),
        }
    }

    /// Take over a committed document. Models mutated in memory since
    /// `saved_from` was captured keep their in-memory state.
    fn adopt(&self, saved_from: &RegistrySnapshot, document: &RegistrySnapshot) -> Result<()> {
        let mut inner = self.write()?;
        for (name, model) in &document.models {
            let captured = saved_from.models.get(name).map_or(0, |m| m.generation);
            let current = inner.models.get(name).map_or(0, |e| e.generation);
            if current == captured {
                let entry = model_entry(name, model.clone())?;
                inner.models.insert(name.clone(), entry);
                inner
                    .persisted
                    .generations
                    .insert(name.clone(), model.generation);
            } else if model.generation == captured {
                // committed our own state; later in-memory changes stay pending
                inner
                    .persisted
                    .generations
                    .insert(name.clone(), model.generation);
            }
        }
        inner.persisted.revision = document.revision;
        Ok(())
    }
}

fn model_snapshot(entry: &ModelEntry) -> ModelSnapshot {
    ModelSnapshot {
        generation: entry.generation,
        versions: entry.versions.values().cloned().collect(),
        reference_snapshots: entry.snapshots.clone(),
    }
}

fn model_entry(name: &str, model: ModelSnapshot) -> Result<ModelEntry> {
    let mut entry = ModelEntry {
        generation: model.generation,
        ..ModelEntry::default()
    };
    let mut production = 0;
    for artifact in model.versions {
        if artifact.model_name != name {
            return Err(RegistryError::InvalidSnapshot(format!(
                "{} filed under model {name}",
                artifact.label()
            )));
        }
        if artifact.state == PromotionState::Production {
            production += 1;
        }
        if entry.versions.insert(artifact.version, artifact).is_some() {
            return Err(RegistryError::InvalidSnapshot(format!(
                "duplicate version in model {name}"
            )));
        }
    }
    if production > 1 {
        return Err(RegistryError::InvalidSnapshot(format!(
            "model {name} has {production} production versions"
        )));
    }
    let mut ids = HashSet::new();
    for s in &model.reference_snapshots {
        if !ids.insert(s.id) || !entry.versions.contains_key(&s.version) {
            return Err(RegistryError::InvalidSnapshot(format!(
                "bad reference snapshot {} for model {name}",
                s.id
            )));
        }
    }
    entry.snapshots = model.reference_snapshots;
    Ok(entry)
}

/// Revision keys in ascending order and the decoded latest revision
async fn latest_revision(
    store: &dyn ObjectStore,
) -> Result<(Vec<String>, Option<RegistrySnapshot>)> {
    let listed = store.list(REVISIONS_PREFIX).await?;
    let latest = match listed.last() {
        Some(key) => get_json::<RegistrySnapshot>(store, key).await?,
        None => None,
    };
    Ok((listed, latest))
}

/// Merge local changes onto a newer stored state, per model
fn rebase(
    local: &RegistrySnapshot,
    base: &Persisted,
    stored: &RegistrySnapshot,
) -> Result<RegistrySnapshot> {
    let names: BTreeSet<&String> = local.models.keys().chain(stored.models.keys()).collect();
    let mut models = BTreeMap::new();
    for name in names {
        let loaded = base.generations.get(name).copied().unwrap_or(0);
        let ours = local.models.get(name);
        let theirs = stored.models.get(name);
        let ours_changed = ours.map_or(0, |m| m.generation) != loaded;
        let theirs_changed = theirs.map_or(0, |m| m.generation) != loaded;

        let keep = match (ours_changed, theirs_changed) {
            (true, true) => return Err(RegistryError::Conflict(name.clone())),
            (true, false) => ours,
            (false, _) => theirs,
        };
        if let Some(model) = keep {
            models.insert(name.clone(), model.clone());
        }
    }
    Ok(RegistrySnapshot {
        revision: stored.revision,
        models,
    })
}

/// Write missing payload files. A payload file that already exists for a
/// version first committed by this save must hold exactly that payload.
async fn write_payloads(
    store: &dyn ObjectStore,
    document: &RegistrySnapshot,
    previous: Option<&RegistrySnapshot>,
) -> Result<()> {
    for (name, model) in &document.models {
        let existing: HashSet<String> = store
            .list(&format!("models/{name}/"))
            .await?
            .into_iter()
            .collect();
        let committed_before: HashSet<VersionId> = previous
            .and_then(|p| p.models.get(name))
            .map(|m| m.versions.iter().map(|v| v.version).collect())
            .unwrap_or_default();

        let writes = model.versions.iter().map(|artifact| {
            let key = payload_key(name, artifact.version);
            let present = existing.contains(&key);
            let verified = committed_before.contains(&artifact.version);
            async move {
                if present && verified {
                    return Ok(());
                }
                if !present && store.put_if_absent(&key, artifact.payload.clone()).await? {
                    return Ok(());
                }
                verify_payload(store, &key, artifact).await
            }
        });
        try_join_all(writes).await?;
    }
    Ok(())
}

async fn verify_payload(
    store: &dyn ObjectStore,
    key: &str,
    artifact: &ModelArtifact,
) -> Result<()> {
    match store.get(key).await? {
        Some(bytes) if Fingerprint::of_bytes(&bytes) == artifact.payload_fingerprint => Ok(()),
        _ => Err(RegistryError::PayloadMismatch {
            key: key.to_string(),
            label: artifact.label(),
        }),
    }
}

async fn write_reference_snapshots(
    store: &dyn ObjectStore,
    document: &RegistrySnapshot,
) -> Result<()> {
    let references = document.models.iter().flat_map(|(name, model)| {
        model.reference_snapshots.iter().map(move |reference| {
            let key = format!("snapshots/{name}/{}.json", reference.id);
            async move { put_json_if_absent(store, &key, reference).await }
        })
    });
    try_join_all(references).await?;
    Ok(())
}

/// Drop revisions older than the retained window. Failures only cost space.
async fn prune_revisions(store: &dyn ObjectStore, listed: &[String]) {
    let stale = listed.len().saturating_sub(KEEP_REVISIONS);
    for key in &listed[..stale] {
        if let Err(e) = store.delete(key).await {
            warn!(key = %key, error = %e, "Cannot prune registry revision");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::candidate;
    use riskline_storage::MemoryStore;

    fn candidate_with_payload(payload: &[u8]) -> crate::ModelCandidate {
        let mut candidate = candidate("credit", 0.8);
        candidate.payload = payload.to_vec();
        candidate
    }

    async fn load(store: &MemoryStore) -> ModelRegistry {
        ModelRegistry::load_from(store, PromotionPolicy::default())
            .await
            .unwrap()
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let store = MemoryStore::new();
        let registry = ModelRegistry::new(PromotionPolicy::default());
        let v1 = registry.register(candidate("credit", 0.8)).unwrap();
        registry.register(candidate("credit", 0.8)).unwrap();
        registry
            .promote("credit", v1, PromotionState::Production)
            .unwrap();

        registry.save_to(&store).await.unwrap();
        assert!(store
            .get("models/credit/v1.payload")
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.list("snapshots/credit/").await.unwrap().len(), 1);
        assert_eq!(
            store.list(REVISIONS_PREFIX).await.unwrap(),
            vec![revision_key(1)]
        );

        let loaded = ModelRegistry::load_from(&store, PromotionPolicy::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.snapshot().unwrap(), registry.snapshot().unwrap());
        assert_eq!(loaded.get_production("credit").unwrap().version, v1);
        assert_eq!(
            loaded.reference_snapshot("credit").unwrap(),
            registry.reference_snapshot("credit").unwrap()
        );
    }

    #[tokio::test]
    async fn test_load_from_empty_store() {
        let store = MemoryStore::new();
        assert!(ModelRegistry::load_from(&store, PromotionPolicy::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_concurrent_registrations_of_one_model_conflict() {
        let store = MemoryStore::new();
        let first = load(&store).await;
        let second = load(&store).await;

        let a = first.register(candidate_with_payload(b"model-A")).unwrap();
        let b = second.register(candidate_with_payload(b"model-B")).unwrap();
        assert_eq!(a, VersionId::new(1));
        assert_eq!(b, VersionId::new(1));

        first.save_to(&store).await.unwrap();
        let err = second.save_to(&store).await.unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(ref model) if model == "credit"));

        // the committed v1 and its payload file agree
        let stored = load(&store).await.get("credit", VersionId::new(1)).unwrap();
        assert_eq!(stored.payload, b"model-A");
        assert_eq!(
            store.get("models/credit/v1.payload").await.unwrap(),
            Some(b"model-A".to_vec())
        );
        assert_eq!(store.list(REVISIONS_PREFIX).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_changes_to_different_models_are_merged() {
        let store = MemoryStore::new();
        let first = load(&store).await;
        let second = load(&store).await;

        first.register(candidate("credit", 0.8)).unwrap();
        second.register(candidate("fraud", 0.8)).unwrap();
        first.save_to(&store).await.unwrap();
        second.save_to(&store).await.unwrap();

        let merged = load(&store).await;
        assert_eq!(merged.models().unwrap(), vec!["credit", "fraud"]);
        assert_eq!(merged.snapshot().unwrap().revision, 2);
        // the rebased writer now sees both models
        assert_eq!(second.models().unwrap(), vec!["credit", "fraud"]);

        // and can keep saving on top of the merged revision
        second.register(candidate("credit", 0.8)).unwrap();
        second.save_to(&store).await.unwrap();
        assert_eq!(load(&store).await.list("credit").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mismatched_payload_file_is_rejected() {
        let store = MemoryStore::new();
        store
            .put("models/credit/v1.payload", b"stray".to_vec())
            .await
            .unwrap();
        let registry = ModelRegistry::default();
        registry.register(candidate_with_payload(b"model-A")).unwrap();

        assert!(matches!(
            registry.save_to(&store).await,
            Err(RegistryError::PayloadMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_old_revisions_are_pruned() {
        let store = MemoryStore::new();
        let registry = ModelRegistry::default();
        for _ in 0..(KEEP_REVISIONS + 3) {
            registry.register(candidate("credit", 0.8)).unwrap();
            registry.save_to(&store).await.unwrap();
        }
        let listed = store.list(REVISIONS_PREFIX).await.unwrap();
        assert!(listed.len() <= KEEP_REVISIONS + 1);
        assert_eq!(listed.last(), Some(&revision_key(KEEP_REVISIONS as u64 + 3)));
        let loaded = load(&store).await;
        assert_eq!(loaded.list("credit").unwrap().len(), KEEP_REVISIONS + 3);
    }

    #[test]
    fn test_restore_rejects_two_production_versions() {
        let registry = ModelRegistry::default();
        let v1 = registry.register(candidate("credit", 0.8)).unwrap();
        registry.register(candidate("credit", 0.8)).unwrap();
        registry
            .promote("credit", v1, PromotionState::Production)
            .unwrap();

        let mut snapshot = registry.snapshot().unwrap();
        let model = snapshot.models.get_mut("credit").unwrap();
        for v in &mut model.versions {
            v.state = PromotionState::Production;
        }
        assert!(matches!(
            ModelRegistry::restore(snapshot, PromotionPolicy::default()),
            Err(RegistryError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_versions_continue_after_restore() {
        let registry = ModelRegistry::default();
        registry.register(candidate("credit", 0.8)).unwrap();
        let restored =
            ModelRegistry::restore(registry.snapshot().unwrap(), PromotionPolicy::default())
                .unwrap();
        assert_eq!(
            restored.register(candidate("credit", 0.8)).unwrap().to_string(),
            "v2"
        );
    }
}
