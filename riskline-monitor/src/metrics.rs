//! Prometheus metrics for drift monitoring

use lazy_static::lazy_static;
use prometheus::{register_gauge_vec, register_int_counter_vec, GaugeVec, IntCounterVec};

lazy_static! {
    /// Drift alerts raised
    ///
    /// Labels:
    /// - model: Model name
    /// - feature: Feature that breached the threshold
    pub static ref DRIFT_ALERTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "riskline_drift_alerts_total",
        "Total number of drift alerts raised",
        &["model", "feature"]
    )
    .expect("riskline_drift_alerts_total metric registration");

    /// Audits performed
    ///
    /// Labels:
    /// - model: Model name
    pub static ref DRIFT_AUDITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "riskline_drift_audits_total",
        "Total number of live batches audited",
        &["model"]
    )
    .expect("riskline_drift_audits_total metric registration");

    /// Most recent PSI per feature
    pub static ref FEATURE_PSI: GaugeVec = register_gauge_vec!(
        "riskline_feature_psi",
        "Population stability index of the last audited batch",
        &["model", "feature"]
    )
    .expect("riskline_feature_psi metric registration");
}
