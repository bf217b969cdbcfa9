//! Model registry
//!
//! Thread-safe catalog of model versions. Blocking locks are used; do not hold
//! a registry call across async await points.
//!
//! Promotion is optimistic: the transition is planned and policy-checked under
//! a read lock, then committed under the write lock only if the model's
//! generation is unchanged. A lost race is retried once against fresh state
//! and then surfaced as [`RegistryError::Conflict`].

use crate::artifact::{ModelArtifact, ModelCandidate};
use crate::metrics::{MODEL_VERSIONS_REGISTERED_TOTAL, PROMOTIONS_TOTAL};
use crate::policy::PromotionPolicy;
use crate::snapshot::ReferenceSnapshot;
use crate::version::{PromotionState, VersionId};
use crate::{RegistryError, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, instrument, warn};
use uuid::Uuid;

static MODEL_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").expect("model name pattern is valid")
});

/// Result of a successful (or no-op) promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionOutcome {
    pub model: String,
    pub version: VersionId,
    pub from: PromotionState,
    pub to: PromotionState,
    /// Previous production version archived by this promotion
    pub archived: Option<VersionId>,
    /// Reference snapshot captured when entering production
    pub snapshot_id: Option<Uuid>,
    /// True when the version was already in the target state
    pub noop: bool,
}

/// Per-model state
#[derive(Debug, Clone, Default)]
pub(crate) struct ModelEntry {
    /// Bumped on every mutation; used for optimistic promotion
    pub(crate) generation: u64,
    pub(crate) versions: BTreeMap<VersionId, ModelArtifact>,
    /// Oldest first
    pub(crate) snapshots: Vec<ReferenceSnapshot>,
}

impl ModelEntry {
    fn production(&self) -> Option<&ModelArtifact> {
        self.versions
            .values()
            .find(|a| a.state == PromotionState::Production)
    }
}

/// What the backing store held when this registry last loaded or saved
#[derive(Debug, Clone, Default)]
pub(crate) struct Persisted {
    pub(crate) revision: u64,
    pub(crate) generations: BTreeMap<String, u64>,
}

#[derive(Default)]
pub(crate) struct RegistryInner {
    pub(crate) models: BTreeMap<String, ModelEntry>,
    pub(crate) persisted: Persisted,
}

/// A transition checked against a specific generation
struct PromotionPlan {
    model: String,
    version: VersionId,
    from: PromotionState,
    to: PromotionState,
    generation: u64,
}

/// Registry of model versions with atomic promotion
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    policy: PromotionPolicy,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(PromotionPolicy::default())
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ModelRegistry {
    /// Create an empty registry enforcing `policy` on production promotions
    pub fn new(policy: PromotionPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            policy,
        }
    }

    pub(crate) fn from_inner(inner: RegistryInner, policy: PromotionPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(inner)),
            policy,
        }
    }

    pub fn policy(&self) -> &PromotionPolicy {
        &self.policy
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, RegistryInner>> {
        self.inner.read().map_err(|_| RegistryError::LockPoisoned)
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryInner>> {
        self.inner.write().map_err(|_| RegistryError::LockPoisoned)
    }

    /// Register a trained model. Assigns the next version in `staging`.
    #[instrument(skip(self, candidate), fields(model = %candidate.model_name))]
    pub fn register(&self, candidate: ModelCandidate) -> Result<VersionId> {
        validate_candidate(&candidate)?;

        let mut inner = self.write()?;
        let entry = inner
            .models
            .entry(candidate.model_name.clone())
            .or_default();
        let version = entry
            .versions
            .keys()
            .next_back()
            .map_or(VersionId::FIRST, VersionId::next);
        let model = candidate.model_name.clone();
        entry
            .versions
            .insert(version, ModelArtifact::from_candidate(candidate, version));
        entry.generation += 1;

        MODEL_VERSIONS_REGISTERED_TOTAL
            .with_label_values(&[model.as_str()])
            .inc();
        info!(model = %model, version = %version, "Registered model version");
        Ok(version)
    }

    /// Fetch one version
    pub fn get(&self, model: &str, version: VersionId) -> Result<ModelArtifact> {
        let inner = self.read()?;
        let entry = inner
            .models
            .get(model)
            .ok_or_else(|| RegistryError::UnknownModel(model.to_string()))?;
        entry
            .versions
            .get(&version)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownVersion {
                model: model.to_string(),
                version,
            })
    }

    /// The version currently in production
    pub fn get_production(&self, model: &str) -> Result<ModelArtifact> {
        let inner = self.read()?;
        inner
            .models
            .get(model)
            .and_then(ModelEntry::production)
            .cloned()
            .ok_or_else(|| RegistryError::NoProduction(model.to_string()))
    }

    /// All versions of a model, oldest first
    pub fn list(&self, model: &str) -> Result<Vec<ModelArtifact>> {
        let inner = self.read()?;
        inner
            .models
            .get(model)
            .map(|e| e.versions.values().cloned().collect())
            .ok_or_else(|| RegistryError::UnknownModel(model.to_string()))
    }

    /// Names of every registered model
    pub fn models(&self) -> Result<Vec<String>> {
        Ok(self.read()?.models.keys().cloned().collect())
    }

    /// Reference snapshot of the current production version
    pub fn reference_snapshot(&self, model: &str) -> Result<ReferenceSnapshot> {
        let inner = self.read()?;
        let entry = inner
            .models
            .get(model)
            .ok_or_else(|| RegistryError::NoProduction(model.to_string()))?;
        let production = entry
            .production()
            .ok_or_else(|| RegistryError::NoProduction(model.to_string()))?;
        entry
            .snapshots
            .iter()
            .rev()
            .find(|s| s.version == production.version)
            .cloned()
            .ok_or_else(|| RegistryError::NoProduction(model.to_string()))
    }

    /// Every snapshot ever captured for a model, oldest first
    pub fn snapshot_history(&self, model: &str) -> Result<Vec<ReferenceSnapshot>> {
        let inner = self.read()?;
        Ok(inner
            .models
            .get(model)
            .map(|e| e.snapshots.clone())
            .unwrap_or_default())
    }

    /// Move a version to `target`.
    ///
    /// Entering production requires the policy thresholds to pass and archives
    /// the previous production version atomically. Promoting a version to the
    /// state it is already in is a no-op.
    #[instrument(skip(self))]
    pub fn promote(
        &self,
        model: &str,
        version: VersionId,
        target: PromotionState,
    ) -> Result<PromotionOutcome> {
        self.promote_with(model, version, target, || {})
    }

    /// Promotion with a hook that runs between planning and commit
    pub(crate) fn promote_with(
        &self,
        model: &str,
        version: VersionId,
        target: PromotionState,
        mut between: impl FnMut(),
    ) -> Result<PromotionOutcome> {
        let target_label = target.to_string();
        let count = |outcome: &str| {
            PROMOTIONS_TOTAL
                .with_label_values(&[model, target_label.as_str(), outcome])
                .inc();
        };

        for attempt in 0..2 {
            let plan = match self.plan(model, version, target) {
                Ok(Some(plan)) => plan,
                Ok(None) => {
                    count("noop");
                    return Ok(PromotionOutcome {
                        model: model.to_string(),
                        version,
                        from: target,
                        to: target,
                        archived: None,
                        snapshot_id: None,
                        noop: true,
                    });
                }
                Err(e) => {
                    count("rejected");
                    return Err(e);
                }
            };

            between();

            if let Some(outcome) = self.commit(&plan)? {
                count("promoted");
                info!(
                    model = %model,
                    version = %version,
                    from = %outcome.from,
                    to = %outcome.to,
                    archived = ?outcome.archived,
                    "Promoted model version"
                );
                return Ok(outcome);
            }
            warn!(model = %model, version = %version, attempt, "Promotion lost a race, retrying");
        }

        count("conflict");
        Err(RegistryError::Conflict(model.to_string()))
    }

    /// Validate the transition against current state. `None` means no-op.
    fn plan(
        &self,
        model: &str,
        version: VersionId,
        target: PromotionState,
    ) -> Result<Option<PromotionPlan>> {
        let inner = self.read()?;
        let entry = inner
            .models
            .get(model)
            .ok_or_else(|| RegistryError::UnknownModel(model.to_string()))?;
        let artifact = entry
            .versions
            .get(&version)
            .ok_or_else(|| RegistryError::UnknownVersion {
                model: model.to_string(),
                version,
            })?;

        if artifact.state == target {
            return Ok(None);
        }
        if !artifact.state.can_transition_to(target) {
            return Err(RegistryError::InvalidTransition {
                model: model.to_string(),
                version,
                from: artifact.state,
                to: target,
            });
        }
        if target == PromotionState::Production {
            let failures = self.policy.evaluate(&artifact.metrics);
            if !failures.is_empty() {
                return Err(RegistryError::ThresholdNotMet {
                    model: model.to_string(),
                    version,
                    failures,
                });
            }
        }

        Ok(Some(PromotionPlan {
            model: model.to_string(),
            version,
            from: artifact.state,
            to: target,
            generation: entry.generation,
        }))
    }

    /// Apply a plan if the model is unchanged since planning. `None` means
    /// the plan went stale.
    fn commit(&self, plan: &PromotionPlan) -> Result<Option<PromotionOutcome>> {
        let mut inner = self.write()?;
        let entry = inner
            .models
            .get_mut(&plan.model)
            .ok_or_else(|| RegistryError::UnknownModel(plan.model.clone()))?;
        if entry.generation != plan.generation {
            return Ok(None);
        }

        let now = Utc::now();
        let mut archived = None;
        let mut snapshot_id = None;

        if plan.to == PromotionState::Production {
            if let Some(previous) = entry
                .versions
                .values_mut()
                .find(|a| a.state == PromotionState::Production)
            {
                previous.state = PromotionState::Archived;
                previous.state_changed_at = now;
                archived = Some(previous.version);
            }
        }

        let artifact = entry
            .versions
            .get_mut(&plan.version)
            .ok_or_else(|| RegistryError::UnknownVersion {
                model: plan.model.clone(),
                version: plan.version,
            })?;
        artifact.state = plan.to;
        artifact.state_changed_at = now;

        if plan.to == PromotionState::Production {
            let snapshot =
                ReferenceSnapshot::capture(&plan.model, plan.version, artifact.profile.clone());
            snapshot_id = Some(snapshot.id);
            entry.snapshots.push(snapshot);
        }
        entry.generation += 1;

        Ok(Some(PromotionOutcome {
            model: plan.model.clone(),
            version: plan.version,
            from: plan.from,
            to: plan.to,
            archived,
            snapshot_id,
            noop: false,
        }))
    }
}

fn validate_candidate(candidate: &ModelCandidate) -> Result<()> {
    if !MODEL_NAME.is_match(&candidate.model_name) {
        return Err(RegistryError::InvalidArtifact(format!(
            "invalid model name '{}'",
            candidate.model_name
        )));
    }
    if candidate.kind.trim().is_empty() {
        return Err(RegistryError::InvalidArtifact("model kind is empty".to_string()));
    }
    if candidate.payload.is_empty() {
        return Err(RegistryError::InvalidArtifact("payload is empty".to_string()));
    }
    let profiled: Vec<&str> = candidate.profile.feature_names().collect();
    let encoded: Vec<&str> = candidate
        .encoder
        .feature_names
        .iter()
        .map(String::as_str)
        .collect();
    if profiled != encoded {
        return Err(RegistryError::InvalidArtifact(
            "profile features do not match encoder features".to_string(),
        ));
    }
    let m = &candidate.metrics;
    if !m.calibration_error.is_finite() || !m.log_loss.is_finite() {
        return Err(RegistryError::InvalidArtifact(
            "metrics must be finite".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::artifact::ModelLineage;
    use riskline_core::{
        FeatureBins, FeatureEncoder, FeatureKind, FeatureProfile, FeatureSpec, Fingerprint,
        FittedParams, MetricSnapshot, TransformConfig,
    };

    pub(crate) fn candidate(model: &str, auc: f64) -> ModelCandidate {
        let config = TransformConfig::new(vec![FeatureSpec::new(
            "x",
            FeatureKind::Raw { column: "x".into() },
        )]);
        ModelCandidate {
            model_name: model.to_string(),
            kind: "logistic_regression".to_string(),
            payload: b"{}".to_vec(),
            lineage: ModelLineage {
                run_id: Uuid::new_v4(),
                dataset_fingerprint: Fingerprint::of_bytes(b"data"),
                feature_fingerprint: Fingerprint::of_bytes(b"features"),
                transform_fingerprint: Fingerprint::of_bytes(b"config"),
            },
            metrics: MetricSnapshot {
                auc: Some(auc),
                calibration_error: 0.05,
                log_loss: 0.4,
                train_rows: 800,
                holdout_rows: 200,
                positive_rate: 0.22,
            },
            encoder: FeatureEncoder {
                config,
                fitted: FittedParams::default(),
                feature_names: vec!["x".into()],
            },
            profile: FeatureProfile {
                features: vec![FeatureBins::from_values("x", &[1.0, 2.0, 3.0], 2)],
            },
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new(PromotionPolicy::new(Some(0.7), Some(0.1)))
    }

    #[test]
    fn test_register_assigns_monotonic_versions() {
        let registry = registry();
        assert_eq!(registry.register(candidate("credit", 0.8)).unwrap(), VersionId::new(1));
        assert_eq!(registry.register(candidate("credit", 0.8)).unwrap(), VersionId::new(2));
        assert_eq!(registry.register(candidate("other", 0.8)).unwrap(), VersionId::new(1));

        let v1 = registry.get("credit", VersionId::new(1)).unwrap();
        assert_eq!(v1.state, PromotionState::Staging);
        assert_eq!(v1.payload_fingerprint, Fingerprint::of_bytes(b"{}"));
        assert_eq!(registry.list("credit").unwrap().len(), 2);
        assert_eq!(registry.models().unwrap(), vec!["credit", "other"]);
    }

    #[test]
    fn test_register_rejects_malformed_candidates() {
        let registry = registry();
        let mut bad = candidate("credit default", 0.8);
        assert!(matches!(
            registry.register(bad.clone()),
            Err(RegistryError::InvalidArtifact(_))
        ));
        bad.model_name = "credit".into();
        bad.payload.clear();
        assert!(registry.register(bad).is_err());
        assert!(registry.list("credit").is_err());
    }

    #[test]
    fn test_promotion_archives_previous_production() {
        let registry = registry();
        let v1 = registry.register(candidate("credit", 0.8)).unwrap();
        let v2 = registry.register(candidate("credit", 0.9)).unwrap();

        let first = registry.promote("credit", v1, PromotionState::Production).unwrap();
        assert_eq!(first.archived, None);
        assert!(first.snapshot_id.is_some());

        let second = registry.promote("credit", v2, PromotionState::Production).unwrap();
        assert_eq!(second.archived, Some(v1));

        assert_eq!(registry.get_production("credit").unwrap().version, v2);
        assert_eq!(
            registry.get("credit", v1).unwrap().state,
            PromotionState::Archived
        );
        assert_eq!(registry.reference_snapshot("credit").unwrap().version, v2);
        assert_eq!(registry.snapshot_history("credit").unwrap().len(), 2);
    }

    #[test]
    fn test_promoting_current_production_is_noop() {
        let registry = registry();
        let v1 = registry.register(candidate("credit", 0.8)).unwrap();
        registry.promote("credit", v1, PromotionState::Production).unwrap();
        let again = registry.promote("credit", v1, PromotionState::Production).unwrap();
        assert!(again.noop);
        assert_eq!(registry.snapshot_history("credit").unwrap().len(), 1);
    }

    #[test]
    fn test_threshold_gate() {
        let registry = registry();
        let weak = registry.register(candidate("credit", 0.6)).unwrap();
        match registry.promote("credit", weak, PromotionState::Production) {
            Err(RegistryError::ThresholdNotMet { failures, .. }) => assert_eq!(failures.len(), 1),
            other => panic!("expected threshold failure, got {other:?}"),
        }
        // archiving is not gated
        registry.promote("credit", weak, PromotionState::Archived).unwrap();
        assert!(matches!(
            registry.get_production("credit"),
            Err(RegistryError::NoProduction(_))
        ));
    }

    #[test]
    fn test_invalid_transitions_and_unknown_versions() {
        let registry = registry();
        let v1 = registry.register(candidate("credit", 0.8)).unwrap();
        registry.promote("credit", v1, PromotionState::Production).unwrap();
        assert!(matches!(
            registry.promote("credit", v1, PromotionState::Archived),
            Err(RegistryError::InvalidTransition { .. })
        ));
        assert!(matches!(
            registry.promote("credit", VersionId::new(9), PromotionState::Production),
            Err(RegistryError::UnknownVersion { .. })
        ));
        assert!(matches!(
            registry.promote("nope", v1, PromotionState::Production),
            Err(RegistryError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_lost_race_is_retried_once() {
        let registry = registry();
        let v1 = registry.register(candidate("credit", 0.8)).unwrap();
        let v2 = registry.register(candidate("credit", 0.8)).unwrap();

        // First attempt goes stale; the retry sees fresh state and succeeds.
        let mut interfered = false;
        let outcome = registry
            .promote_with("credit", v2, PromotionState::Production, || {
                if !interfered {
                    interfered = true;
                    registry.register(candidate("credit", 0.8)).unwrap();
                }
            })
            .unwrap();
        assert_eq!(outcome.version, v2);

        // Both attempts go stale: surfaced as a conflict, state untouched.
        let err = registry
            .promote_with("credit", v1, PromotionState::Production, || {
                registry.register(candidate("credit", 0.8)).unwrap();
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
        assert_eq!(registry.get_production("credit").unwrap().version, v2);
    }

    #[test]
    fn test_concurrent_promotions_leave_one_production() {
        let registry = registry();
        let versions: Vec<VersionId> = (0..8)
            .map(|_| registry.register(candidate("credit", 0.8)).unwrap())
            .collect();

        let handles: Vec<_> = versions
            .iter()
            .map(|v| {
                let registry = registry.clone();
                let v = *v;
                std::thread::spawn(move || {
                    let _ = registry.promote("credit", v, PromotionState::Production);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let production = registry
            .list("credit")
            .unwrap()
            .into_iter()
            .filter(|a| a.state == PromotionState::Production)
            .count();
        assert_eq!(production, 1);
    }
}
