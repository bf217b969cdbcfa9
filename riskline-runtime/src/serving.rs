//! Serving facade over the production model
//!
//! The facade loads the production version through
//! [`ModelRegistry::get_production`] at start and on [`ServingFacade::refresh`].
//! Every scored batch is handed to a background drift audit through a bounded
//! channel. When the channel is full the batch is dropped from auditing and
//! scoring carries on.

use crate::metrics::SERVING_BATCHES_TOTAL;
use crate::{Error, Result};
use riskline_core::{decode_model, FeatureEncoder, Record, ScoringModel};
use riskline_monitor::{DriftMonitor, FeatureBatch};
use riskline_registry::{ModelRegistry, ReferenceSnapshot, VersionId};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The production version currently served
#[derive(Debug)]
pub struct LoadedModel {
    pub version: VersionId,
    pub model: Box<dyn ScoringModel>,
    pub encoder: FeatureEncoder,
    pub reference: ReferenceSnapshot,
}

/// Scores of one request
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResponse {
    pub model: String,
    pub version: VersionId,
    /// Default probability per record
    pub scores: Vec<f64>,
}

struct AuditRequest {
    batch: FeatureBatch,
    model: Arc<LoadedModel>,
}

pub struct ServingFacade {
    registry: ModelRegistry,
    model_name: String,
    current: RwLock<Option<Arc<LoadedModel>>>,
    audits: mpsc::Sender<AuditRequest>,
}

impl std::fmt::Debug for ServingFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingFacade")
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

impl ServingFacade {
    /// Start the facade and its audit worker. The production model is loaded
    /// immediately. The worker stops once the facade is dropped.
    pub fn start(
        registry: ModelRegistry,
        model_name: impl Into<String>,
        monitor: DriftMonitor,
        audit_capacity: usize,
    ) -> Result<(Self, JoinHandle<()>)> {
        let (tx, rx) = mpsc::channel(audit_capacity.max(1));
        let facade = Self {
            registry,
            model_name: model_name.into(),
            current: RwLock::new(None),
            audits: tx,
        };
        facade.refresh()?;
        let worker = tokio::spawn(audit_worker(monitor, rx));
        Ok((facade, worker))
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Reload the production version; returns the version now served
    pub fn refresh(&self) -> Result<VersionId> {
        let artifact = self.registry.get_production(&self.model_name)?;
        let reference = self.registry.reference_snapshot(&self.model_name)?;
        let model = decode_model(&artifact.kind, &artifact.payload)?;

        let loaded = Arc::new(LoadedModel {
            version: artifact.version,
            model,
            encoder: artifact.encoder,
            reference,
        });

        let mut current = self
            .current
            .write()
            .map_err(|_| Error::Internal("serving lock poisoned".to_string()))?;
        let previous = current.as_ref().map(|m| m.version);
        *current = Some(loaded);

        if previous != Some(artifact.version) {
            info!(
                model = %self.model_name,
                version = %artifact.version,
                previous = ?previous,
                "Serving production model"
            );
        }
        Ok(artifact.version)
    }

    /// The model currently served
    pub fn current(&self) -> Result<Arc<LoadedModel>> {
        self.current
            .read()
            .map_err(|_| Error::Internal("serving lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| Error::NoModelLoaded(self.model_name.clone()))
    }

    /// Score raw records with the production model
    pub fn score(&self, records: &[Record]) -> Result<ScoreResponse> {
        let loaded = self.current()?;
        let rows = loaded.encoder.encode(records)?;
        let scores = loaded.model.predict_proba(&rows)?;

        let request = AuditRequest {
            batch: FeatureBatch::new(loaded.encoder.feature_names.clone(), rows),
            model: Arc::clone(&loaded),
        };
        let audit = match self.audits.try_send(request) {
            Ok(()) => "queued",
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(model = %self.model_name, "Audit queue full; batch not audited");
                "dropped"
            }
            Err(mpsc::error::TrySendError::Closed(_)) => "dropped",
        };
        SERVING_BATCHES_TOTAL
            .with_label_values(&[self.model_name.as_str(), audit])
            .inc();

        Ok(ScoreResponse {
            model: self.model_name.clone(),
            version: loaded.version,
            scores,
        })
    }
}

async fn audit_worker(monitor: DriftMonitor, mut rx: mpsc::Receiver<AuditRequest>) {
    while let Some(request) = rx.recv().await {
        if let Err(e) = monitor.audit(&request.batch, &request.model.reference) {
            warn!(error = %e, "Drift audit failed");
        }
    }
    debug!("Audit worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskline_core::{
        transform, CellValue, ColumnSpec, Dataset, FeatureKind, FeatureProfile, FeatureSpec,
        LogisticRegressionTrainer, MetricSnapshot, Schema, SchemaRegistry, TrainParams, Trainer,
        TransformConfig,
    };
    use riskline_core::Fingerprint;
    use riskline_monitor::{AlertLog, DriftConfig};
    use riskline_registry::{ModelCandidate, ModelLineage, PromotionState};
    use uuid::Uuid;

    fn record(x: f64) -> Record {
        let mut r = Record::new();
        r.insert("x".into(), CellValue::Float(x));
        r
    }

    fn registry_with_production() -> ModelRegistry {
        let schema = Schema::builder("live", 1)
            .column("x", ColumnSpec::float())
            .column("y", ColumnSpec::integer())
            .build();
        let mut schemas = SchemaRegistry::new();
        schemas.register(schema.clone()).unwrap();

        let records = (0..400)
            .map(|i| {
                let mut r = record((i % 20) as f64);
                r.insert("y".into(), CellValue::Int(i64::from(i % 20 >= 10)));
                r
            })
            .collect();
        let dataset = Dataset::new(schema.id(), records);
        let config = TransformConfig::new(vec![FeatureSpec::new(
            "x",
            FeatureKind::Raw { column: "x".into() },
        )])
        .with_target("y");
        let matrix = transform(&schemas.validate(&dataset).unwrap(), &config).unwrap();
        let labels = matrix.labels().unwrap().to_vec();
        let model = LogisticRegressionTrainer
            .fit(matrix.rows(), &labels, &TrainParams::default())
            .unwrap();

        let registry = ModelRegistry::default();
        let version = registry
            .register(ModelCandidate {
                model_name: "live".into(),
                kind: model.kind().to_string(),
                payload: model.to_payload().unwrap(),
                lineage: ModelLineage {
                    run_id: Uuid::new_v4(),
                    dataset_fingerprint: matrix.dataset_fingerprint(),
                    feature_fingerprint: matrix.fingerprint(),
                    transform_fingerprint: Fingerprint::of_bytes(b"t"),
                },
                metrics: MetricSnapshot::compute(
                    &labels,
                    &model.predict_proba(matrix.rows()).unwrap(),
                    400,
                ),
                encoder: matrix.encoder().clone(),
                profile: FeatureProfile::from_matrix(&matrix, 10),
            })
            .unwrap();
        registry
            .promote("live", version, PromotionState::Production)
            .unwrap();
        registry
    }

    fn monitor(log: AlertLog) -> DriftMonitor {
        DriftMonitor::new(
            DriftConfig {
                min_samples: 50,
                ..Default::default()
            },
            log,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_scores_and_audits_in_background() {
        let log = AlertLog::new();
        let (facade, worker) =
            ServingFacade::start(registry_with_production(), "live", monitor(log.clone()), 8)
                .unwrap();

        let shifted: Vec<Record> = (0..200).map(|_| record(19.0)).collect();
        let response = facade.score(&shifted).unwrap();
        assert_eq!(response.version, VersionId::new(1));
        assert_eq!(response.scores.len(), 200);
        assert!(response.scores.iter().all(|p| (0.0..=1.0).contains(p)));

        drop(facade);
        worker.await.unwrap();
        let alerts = log.active().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].feature, "x");
    }

    #[tokio::test]
    async fn test_start_without_production_fails() {
        let result = ServingFacade::start(
            ModelRegistry::default(),
            "missing",
            monitor(AlertLog::new()),
            1,
        );
        assert!(matches!(result, Err(Error::Registry(_))));
    }

    #[tokio::test]
    async fn test_full_queue_never_blocks_scoring() {
        let (facade, _worker) = ServingFacade::start(
            registry_with_production(),
            "live",
            monitor(AlertLog::new()),
            1,
        )
        .unwrap();
        for _ in 0..20 {
            assert!(facade.score(&[record(3.0)]).is_ok());
        }
        assert_eq!(facade.refresh().unwrap(), VersionId::new(1));
    }
}
