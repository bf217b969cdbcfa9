//! Prometheus metrics for Riskline runtime operations
//!
//! This module defines metrics for tracking stage execution, caching and serving.

use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

lazy_static! {
    /// Stage executions by final outcome
    ///
    /// Labels:
    /// - stage: Stage name
    /// - outcome: "succeeded", "cached", "failed"
    pub static ref STAGE_EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "riskline_stage_executions_total",
        "Total number of stage executions by outcome",
        &["stage", "outcome"]
    )
    .expect("riskline_stage_executions_total metric registration");

    /// Wall-clock duration of a stage, including retries
    ///
    /// Buckets: 1ms to 5min
    pub static ref STAGE_DURATION: HistogramVec = register_histogram_vec!(
        "riskline_stage_duration_seconds",
        "Duration of stage executions",
        &["stage"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
    )
    .expect("riskline_stage_duration_seconds metric registration");

    /// Time a stage waited for a compute slot
    pub static ref STAGE_QUEUE_WAIT: HistogramVec = register_histogram_vec!(
        "riskline_stage_queue_wait_seconds",
        "Time stages spent waiting for a compute slot",
        &["stage"],
        vec![0.0001, 0.001, 0.01, 0.1, 1.0, 10.0, 60.0]
    )
    .expect("riskline_stage_queue_wait_seconds metric registration");

    /// Artifact cache lookups
    ///
    /// Labels:
    /// - result: "hit", "miss"
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "riskline_cache_lookups_total",
        "Total number of artifact cache lookups",
        &["result"]
    )
    .expect("riskline_cache_lookups_total metric registration");

    /// Retries of transient stage failures
    pub static ref STAGE_RETRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "riskline_stage_retries_total",
        "Total number of stage retries after transient failures",
        &["stage", "class"]
    )
    .expect("riskline_stage_retries_total metric registration");

    /// Completed pipeline runs
    ///
    /// Labels:
    /// - state: "succeeded", "failed", "cancelled"
    pub static ref RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "riskline_runs_total",
        "Total number of completed pipeline runs",
        &["state"]
    )
    .expect("riskline_runs_total metric registration");

    /// Batches scored by the serving facade
    ///
    /// Labels:
    /// - model: Model name
    /// - audit: "queued", "dropped"
    pub static ref SERVING_BATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "riskline_serving_batches_total",
        "Total number of scored batches and whether they were queued for drift audit",
        &["model", "audit"]
    )
    .expect("riskline_serving_batches_total metric registration");
}
