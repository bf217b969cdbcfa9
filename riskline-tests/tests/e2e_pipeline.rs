//! End-to-end pipeline tests
//!
//! These tests drive the full credit pipeline over the generated loan book:
//! - 1,000 rows through validation, transform, training and registration
//! - Promotion and production lookup
//! - Idempotent reruns served entirely from the cache
//! - Persistence of registry, cache and run ledger across restarts
//! - Cached registrations rechecked against the registry they name
//! - Retry of transient storage failures

use riskline_core::transform_checked;
use riskline_lineage::{LineageGraph, LineageQuery, NodeKey};
use riskline_registry::{ModelRegistry, PromotionPolicy, PromotionState, VersionId};
use riskline_runtime::{
    ArtifactCache, FailureClass, RunLedger, RunOptions, RunReport, StageState,
};
use riskline_storage::{FsStore, MemoryStore, ObjectStore};
use riskline_tests::assertions::{
    assert_all_cached, assert_run_succeeded, assert_single_production, assert_stage_failed_with,
    assert_stage_state, assert_version_count,
};
use riskline_tests::{credit, FlakyStore, PipelineConfigBuilder};
use serde_json::json;
use std::sync::Arc;

const MODEL: &str = "credit";

#[tokio::test]
async fn test_train_promote_and_rerun_thousand_rows() {
    let dataset = credit::dataset(1000, 7);
    let schemas = credit::schemas();

    // validation and transform on their own
    assert!(schemas.validate(&dataset).is_ok());
    let matrix = transform_checked(&schemas, &dataset, &credit::transform()).unwrap();
    assert_eq!(matrix.row_count(), 1000);
    assert_eq!(matrix.column_count(), credit::FEATURES.len());
    assert_eq!(matrix.feature_names(), credit::FEATURES);

    let config = PipelineConfigBuilder::new(MODEL).build();
    let registry = ModelRegistry::new(config.promotion.clone());
    let cache = Arc::new(ArtifactCache::in_memory());

    let first = config
        .run(
            credit::source(1000, 7),
            schemas.clone(),
            registry.clone(),
            cache.clone(),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_run_succeeded(&first);
    assert_eq!(first.count(StageState::Succeeded), 6);

    let versions = registry.list(MODEL).unwrap();
    assert_eq!(versions.len(), 1);
    let v1 = versions[0].version;
    assert_eq!(v1, VersionId::new(1));
    assert_eq!(versions[0].state, PromotionState::Staging);
    assert_eq!(versions[0].lineage.dataset_fingerprint, dataset.fingerprint());
    assert_eq!(versions[0].lineage.feature_fingerprint, matrix.fingerprint());
    assert!(versions[0].metrics.auc.unwrap() > 0.75);

    registry
        .promote(MODEL, v1, PromotionState::Production)
        .unwrap();
    assert_eq!(registry.get_production(MODEL).unwrap().version, v1);

    let second = config
        .run(
            credit::source(1000, 7),
            schemas,
            registry.clone(),
            cache,
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_all_cached(&second);
    assert_version_count(&registry, MODEL, 1);
    assert_single_production(&registry, MODEL, v1);
    assert_eq!(
        first.stage("register").unwrap().output_fingerprint,
        second.stage("register").unwrap().output_fingerprint
    );
    assert_eq!(RunReport::from_run(&second).exit_code(), 0);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfigBuilder::new(MODEL)
        .promote_to(PromotionState::Production)
        .min_auc(0.7)
        .build();

    // first process: train, promote, persist
    let first_id = {
        let store: Arc<dyn ObjectStore> = Arc::new(FsStore::open(dir.path()).await.unwrap());
        let registry = ModelRegistry::new(config.promotion.clone());
        let run = config
            .run(
                credit::source(600, 21),
                credit::schemas(),
                registry.clone(),
                Arc::new(ArtifactCache::with_store(store.clone())),
                RunOptions::default(),
            )
            .await
            .unwrap();
        assert_run_succeeded(&run);
        registry.save_to(store.as_ref()).await.unwrap();

        let mut ledger = RunLedger::load_from(store.as_ref()).await.unwrap();
        let id = run.id;
        ledger.record(run);
        ledger.save_to(store.as_ref()).await.unwrap();
        id
    };

    // second process: everything comes back from the store
    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::open(dir.path()).await.unwrap());
    let registry = ModelRegistry::load_from(store.as_ref(), config.promotion.clone())
        .await
        .unwrap()
        .unwrap();
    assert_single_production(&registry, MODEL, VersionId::new(1));
    assert_eq!(
        registry.get_production(MODEL).unwrap().lineage.run_id,
        first_id
    );

    let ledger = RunLedger::load_from(store.as_ref()).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert!(ledger.get(&first_id).is_some());

    let rerun = config
        .run(
            credit::source(600, 21),
            credit::schemas(),
            registry.clone(),
            Arc::new(ArtifactCache::with_store(store.clone())),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_all_cached(&rerun);
    assert_version_count(&registry, MODEL, 1);

    // lineage links the production version back to its training data
    let graph = LineageGraph::from_registry(&registry).unwrap();
    let model = NodeKey::model(MODEL, VersionId::new(1));
    let upstream: Vec<NodeKey> = LineageQuery::new(&graph)
        .ancestors_with_depth(&model, None)
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert!(upstream.contains(&NodeKey::Dataset {
        fingerprint: credit::dataset(600, 21).fingerprint()
    }));
    assert!(upstream.contains(&NodeKey::Run { id: first_id }));
}

#[tokio::test]
async fn test_cached_registration_without_saved_registry_is_redone() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    let config = PipelineConfigBuilder::new(MODEL)
        .promote_to(PromotionState::Production)
        .build();

    // first process persists its cache but never saves the registry
    let first = config
        .run(
            credit::source(400, 3),
            credit::schemas(),
            ModelRegistry::new(config.promotion.clone()),
            Arc::new(ArtifactCache::with_store(store.clone())),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_run_succeeded(&first);

    let registry = ModelRegistry::new(config.promotion.clone());
    let second = config
        .run(
            credit::source(400, 3),
            credit::schemas(),
            registry.clone(),
            Arc::new(ArtifactCache::with_store(store)),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_run_succeeded(&second);
    assert_stage_state(&second, "train", StageState::Cached);
    assert_stage_state(&second, "register", StageState::Succeeded);
    assert_stage_state(&second, "promote", StageState::Succeeded);
    assert_single_production(&registry, MODEL, VersionId::new(1));
}

#[tokio::test]
async fn test_new_data_promotes_new_version_and_archives_old() {
    let config = PipelineConfigBuilder::new(MODEL)
        .promote_to(PromotionState::Production)
        .build();
    let registry = ModelRegistry::new(config.promotion.clone());
    let cache = Arc::new(ArtifactCache::in_memory());

    for seed in [1, 2] {
        let run = config
            .run(
                credit::source(500, seed),
                credit::schemas(),
                registry.clone(),
                cache.clone(),
                RunOptions::default(),
            )
            .await
            .unwrap();
        assert_run_succeeded(&run);
    }

    assert_version_count(&registry, MODEL, 2);
    assert_single_production(&registry, MODEL, VersionId::new(2));
    assert_eq!(
        registry.get(MODEL, VersionId::new(1)).unwrap().state,
        PromotionState::Archived
    );
}

#[tokio::test]
async fn test_unreachable_threshold_blocks_production() {
    let config = PipelineConfigBuilder::new(MODEL)
        .promote_to(PromotionState::Production)
        .min_auc(0.999)
        .build();
    let registry = ModelRegistry::new(config.promotion.clone());

    let run = config
        .run(
            credit::source(400, 5),
            credit::schemas(),
            registry.clone(),
            Arc::new(ArtifactCache::in_memory()),
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_stage_state(&run, "register", StageState::Succeeded);
    assert_stage_failed_with(&run, "promote", FailureClass::Threshold);
    assert_eq!(RunReport::from_run(&run).exit_code(), 6);
    assert!(registry.get_production(MODEL).is_err());
    assert_eq!(
        registry.list(MODEL).unwrap()[0].state,
        PromotionState::Staging
    );
}

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let store = FlakyStore::new();
    store.fail_next(2);
    let config = PipelineConfigBuilder::new(MODEL).build();
    let registry = ModelRegistry::default();

    let run = config
        .run(
            credit::source(300, 9),
            credit::schemas(),
            registry.clone(),
            Arc::new(ArtifactCache::with_store(Arc::new(store.clone()))),
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_run_succeeded(&run);
    assert_eq!(store.failures(), 2);
    assert_eq!(run.stage("ingest").unwrap().attempts, 3);
    assert_version_count(&registry, MODEL, 1);
}

#[tokio::test]
async fn test_exhausted_retries_fail_with_io_exit_code() {
    let store = FlakyStore::new();
    store.fail_next(usize::MAX);
    let config = PipelineConfigBuilder::new(MODEL).retry_attempts(2).build();

    let run = config
        .run(
            credit::source(300, 9),
            credit::schemas(),
            ModelRegistry::default(),
            Arc::new(ArtifactCache::with_store(Arc::new(store.clone()))),
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_stage_failed_with(&run, "ingest", FailureClass::Transient);
    assert_eq!(run.stage("ingest").unwrap().attempts, 2);
    assert_stage_failed_with(&run, "register", FailureClass::UpstreamFailed);
    assert_eq!(RunReport::from_run(&run).exit_code(), 4);
}

#[tokio::test]
async fn test_compute_parameters_do_not_invalidate_cache() {
    let cache = Arc::new(ArtifactCache::in_memory());
    let registry = ModelRegistry::default();

    let cpu = PipelineConfigBuilder::new(MODEL)
        .compute("target", json!("cpu"))
        .build();
    let first = cpu
        .run(
            credit::source(300, 4),
            credit::schemas(),
            registry.clone(),
            cache.clone(),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_run_succeeded(&first);
    assert_eq!(first.compute.get("target"), Some(&json!("cpu")));

    let gpu = PipelineConfigBuilder::new(MODEL)
        .compute("target", json!("gpu"))
        .build();
    let second = gpu
        .run(
            credit::source(300, 4),
            credit::schemas(),
            registry.clone(),
            cache,
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_all_cached(&second);
    assert_eq!(second.compute.get("target"), Some(&json!("gpu")));
    assert_version_count(&registry, MODEL, 1);
}

#[tokio::test]
async fn test_parallelism_does_not_change_artifacts() {
    let mut fingerprints = Vec::new();
    for max_parallel in [1, 4] {
        let config = PipelineConfigBuilder::new(MODEL)
            .max_parallel(max_parallel)
            .build();
        let run = config
            .run(
                credit::source(300, 12),
                credit::schemas(),
                ModelRegistry::new(PromotionPolicy::default()),
                Arc::new(ArtifactCache::in_memory()),
                RunOptions::default(),
            )
            .await
            .unwrap();
        assert_run_succeeded(&run);
        fingerprints.push((
            run.stage("transform").unwrap().output_fingerprint,
            run.stage("evaluate").unwrap().output_fingerprint,
        ));
    }
    assert_eq!(fingerprints[0], fingerprints[1]);
}
