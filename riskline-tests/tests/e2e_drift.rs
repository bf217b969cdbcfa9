//! End-to-end drift monitoring tests
//!
//! Train and promote a model, then send live traffic through the serving
//! facade and the drift monitor:
//! - Traffic from the training distribution raises no alerts
//! - Shifted repayment status raises alerts for the affected features only
//! - The threshold boundary and the minimum sample gate
//! - Alerts persist to the store and archive without being modified
//! - The facade follows production on refresh

use chrono::{Duration, Utc};
use riskline_monitor::{
    audit, population_stability_index, AlertLog, DriftConfig, DriftMonitor, FeatureBatch,
};
use riskline_registry::{ModelRegistry, PromotionState, VersionId};
use riskline_runtime::{ArtifactCache, RunOptions, ServingFacade};
use riskline_storage::{MemoryStore, ObjectStore};
use riskline_tests::assertions::assert_run_succeeded;
use riskline_tests::fixtures::unlabelled;
use riskline_tests::{credit, PipelineConfigBuilder};
use std::sync::Arc;

const MODEL: &str = "credit";

async fn production_registry(seed: u64) -> ModelRegistry {
    let config = PipelineConfigBuilder::new(MODEL)
        .promote_to(PromotionState::Production)
        .build();
    let registry = ModelRegistry::new(config.promotion.clone());
    let run = config
        .run(
            credit::source(1000, seed),
            credit::schemas(),
            registry.clone(),
            Arc::new(ArtifactCache::in_memory()),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_run_succeeded(&run);
    registry
}

fn monitor(log: &AlertLog) -> DriftMonitor {
    DriftMonitor::new(DriftConfig::default(), log.clone()).unwrap()
}

/// Encode raw records the way the serving path does
fn live_batch(registry: &ModelRegistry, records: &[riskline_core::Record]) -> FeatureBatch {
    let encoder = registry.get_production(MODEL).unwrap().encoder;
    let rows = encoder.encode(&unlabelled(records)).unwrap();
    FeatureBatch::new(encoder.feature_names.clone(), rows)
}

#[tokio::test]
async fn test_stable_traffic_raises_no_alerts() {
    let registry = production_registry(7).await;
    let log = AlertLog::new();
    let (facade, worker) = ServingFacade::start(registry, MODEL, monitor(&log), 4).unwrap();

    let response = facade
        .score(&unlabelled(&credit::records(600, 99)))
        .unwrap();
    assert_eq!(response.version, VersionId::new(1));
    assert_eq!(response.scores.len(), 600);

    drop(facade);
    worker.await.unwrap();
    assert!(log.is_empty().unwrap(), "{:?}", log.active().unwrap());
}

#[tokio::test]
async fn test_shifted_traffic_alerts_on_affected_features() {
    let registry = production_registry(7).await;
    let log = AlertLog::new();
    let (facade, worker) = ServingFacade::start(registry, MODEL, monitor(&log), 4).unwrap();

    let response = facade
        .score(&unlabelled(&credit::delayed_records(600, 5)))
        .unwrap();
    let mean = response.scores.iter().sum::<f64>() / response.scores.len() as f64;
    assert!(mean > 0.5, "delayed applicants should score as risky, mean {mean}");

    drop(facade);
    worker.await.unwrap();

    let mut features: Vec<String> = log
        .active()
        .unwrap()
        .into_iter()
        .map(|a| a.feature)
        .collect();
    features.sort();
    assert_eq!(features, vec!["delayed".to_string(), "pay_0".to_string()]);
    assert!(log
        .active()
        .unwrap()
        .iter()
        .all(|a| a.version == VersionId::new(1) && a.sample_count == 600));
}

#[tokio::test]
async fn test_threshold_boundary_and_sample_gate() {
    let registry = production_registry(3).await;
    let reference = registry.reference_snapshot(MODEL).unwrap();
    let batch = live_batch(&registry, &credit::delayed_records(300, 8));

    let bins = reference
        .profile
        .features
        .iter()
        .find(|b| b.name == "pay_0")
        .unwrap();
    let (actual, _) = bins.proportions_of(&batch.column("pay_0").unwrap());
    let epsilon = DriftConfig::default().epsilon;
    let psi = population_stability_index(&bins.proportions, &actual, epsilon);
    assert!(psi > 0.0);

    // divergence equal to the threshold does not alert
    let at = DriftConfig {
        threshold: psi,
        min_samples: 10,
        epsilon,
    };
    assert!(audit(&batch, &reference, &at)
        .iter()
        .all(|a| a.feature != "pay_0"));

    // anything above it does
    let below = DriftConfig {
        threshold: psi - 1e-9,
        ..at.clone()
    };
    assert!(audit(&batch, &reference, &below)
        .iter()
        .any(|a| a.feature == "pay_0"));

    // too few samples: every feature is skipped
    let small = live_batch(&registry, &credit::delayed_records(50, 8));
    let gated = DriftConfig {
        min_samples: 100,
        ..DriftConfig::default()
    };
    assert!(audit(&small, &reference, &gated).is_empty());

    // features missing from the batch are skipped
    let partial = FeatureBatch::new(vec!["age_group".to_string()], vec![vec![2.0]; 200]);
    assert!(audit(&partial, &reference, &gated)
        .iter()
        .all(|a| a.feature == "age_group"));
}

#[tokio::test]
async fn test_alerts_persist_and_archive_unchanged() {
    let registry = production_registry(7).await;
    let reference = registry.reference_snapshot(MODEL).unwrap();
    let log = AlertLog::new();
    let monitor = monitor(&log);

    let raised = monitor
        .audit(&live_batch(&registry, &credit::delayed_records(400, 2)), &reference)
        .unwrap();
    assert!(!raised.is_empty());

    let store = MemoryStore::new();
    assert_eq!(log.persist_new(&store).await.unwrap(), raised.len());
    assert_eq!(log.persist_new(&store).await.unwrap(), 0);
    assert_eq!(
        store.list(&format!("alerts/{MODEL}/")).await.unwrap().len(),
        raised.len()
    );

    let moved = log.archive_before(Utc::now() + Duration::seconds(1)).unwrap();
    assert_eq!(moved, raised.len());
    assert!(log.active().unwrap().is_empty());
    assert_eq!(log.archived().unwrap(), raised);
    assert_eq!(log.len().unwrap(), raised.len());
}

#[tokio::test]
async fn test_facade_follows_production_on_refresh() {
    let registry = production_registry(7).await;
    let (facade, _worker) =
        ServingFacade::start(registry.clone(), MODEL, monitor(&AlertLog::new()), 4).unwrap();
    assert_eq!(facade.current().unwrap().version, VersionId::new(1));

    // a second training run on new data takes over production
    let config = PipelineConfigBuilder::new(MODEL)
        .promote_to(PromotionState::Production)
        .build();
    let run = config
        .run(
            credit::source(800, 8),
            credit::schemas(),
            registry.clone(),
            Arc::new(ArtifactCache::in_memory()),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_run_succeeded(&run);

    // serving stays on v1 until refreshed
    let records = unlabelled(&credit::records(10, 1));
    assert_eq!(facade.score(&records).unwrap().version, VersionId::new(1));
    assert_eq!(facade.refresh().unwrap(), VersionId::new(2));
    assert_eq!(facade.score(&records).unwrap().version, VersionId::new(2));
    assert_eq!(
        registry.get(MODEL, VersionId::new(1)).unwrap().state,
        PromotionState::Archived
    );
}
