//! Prometheus metrics for the model registry

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Registered model versions
    ///
    /// Labels:
    /// - model: Model name
    pub static ref MODEL_VERSIONS_REGISTERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "riskline_model_versions_registered_total",
        "Total number of registered model versions",
        &["model"]
    )
    .expect("riskline_model_versions_registered_total metric registration");

    /// Promotion attempts by outcome
    ///
    /// Labels:
    /// - model: Model name
    /// - target: Target state
    /// - outcome: promoted, noop, rejected, conflict
    pub static ref PROMOTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "riskline_promotions_total",
        "Total number of promotion attempts",
        &["model", "target", "outcome"]
    )
    .expect("riskline_promotions_total metric registration");
}
