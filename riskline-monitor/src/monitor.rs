//! Drift auditing

use crate::alert::{AlertLog, DriftAlert};
use crate::metrics::{DRIFT_ALERTS_TOTAL, DRIFT_AUDITS_TOTAL, FEATURE_PSI};
use crate::psi::population_stability_index;
use crate::{Error, Result};
use chrono::Utc;
use riskline_registry::ReferenceSnapshot;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Drift detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Alert when PSI is strictly greater than this
    pub threshold: f64,
    /// Features with fewer non-missing live samples are skipped
    pub min_samples: usize,
    /// Floor applied to bin proportions before taking logs
    pub epsilon: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            min_samples: 100,
            epsilon: 1e-4,
        }
    }
}

impl DriftConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "threshold must be finite and >= 0, got {}",
                self.threshold
            )));
        }
        if !(self.epsilon > 0.0 && self.epsilon < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "epsilon must be in (0, 1), got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// Live feature rows as seen by the serving path. `NaN` marks a missing value
/// and rows may be shorter than `feature_names`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureBatch {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureBatch {
    pub fn new(feature_names: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self {
            feature_names,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one feature; `None` when the batch does not carry it
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.feature_names.iter().position(|n| n == name)?;
        Some(
            self.rows
                .iter()
                .map(|r| r.get(idx).copied().unwrap_or(f64::NAN))
                .collect(),
        )
    }
}

/// Compare a live batch against a reference snapshot.
///
/// Features missing from the batch, and features with fewer than
/// `config.min_samples` non-missing values, are skipped. An alert is produced
/// only when PSI is strictly greater than `config.threshold`.
pub fn audit(
    batch: &FeatureBatch,
    reference: &ReferenceSnapshot,
    config: &DriftConfig,
) -> Vec<DriftAlert> {
    let now = Utc::now();
    let mut alerts = Vec::new();

    for bins in &reference.profile.features {
        let Some(values) = batch.column(&bins.name) else {
            continue;
        };
        let (actual, samples) = bins.proportions_of(&values);
        if samples < config.min_samples || bins.count == 0 {
            debug!(
                feature = %bins.name,
                samples,
                min_samples = config.min_samples,
                "Skipping feature below sample gate"
            );
            continue;
        }

        let psi = population_stability_index(&bins.proportions, &actual, config.epsilon);
        FEATURE_PSI
            .with_label_values(&[reference.model_name.as_str(), bins.name.as_str()])
            .set(psi);

        if psi > config.threshold {
            alerts.push(DriftAlert {
                id: Uuid::new_v4(),
                timestamp: now,
                model_name: reference.model_name.clone(),
                version: reference.version,
                feature: bins.name.clone(),
                divergence: psi,
                threshold: config.threshold,
                sample_count: samples,
            });
        }
    }
    alerts
}

/// Audits live batches and appends alerts to a shared log
#[derive(Debug, Clone)]
pub struct DriftMonitor {
    config: DriftConfig,
    log: AlertLog,
}

impl DriftMonitor {
    pub fn new(config: DriftConfig, log: AlertLog) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, log })
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    pub fn log(&self) -> &AlertLog {
        &self.log
    }

    /// Audit a batch, record the alerts and return them
    #[instrument(
        skip_all,
        fields(
            model = %reference.model_name,
            version = %reference.version,
            rows = batch.len()
        )
    )]
    pub fn audit(
        &self,
        batch: &FeatureBatch,
        reference: &ReferenceSnapshot,
    ) -> Result<Vec<DriftAlert>> {
        DRIFT_AUDITS_TOTAL
            .with_label_values(&[reference.model_name.as_str()])
            .inc();

        let alerts = audit(batch, reference, &self.config);
        for alert in &alerts {
            DRIFT_ALERTS_TOTAL
                .with_label_values(&[alert.model_name.as_str(), alert.feature.as_str()])
                .inc();
            warn!(
                feature = %alert.feature,
                psi = alert.divergence,
                threshold = alert.threshold,
                samples = alert.sample_count,
                "Feature drift detected"
            );
        }
        self.log.append(alerts.iter().cloned())?;
        Ok(alerts)
    }
}
