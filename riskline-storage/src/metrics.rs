//! Prometheus metrics for storage operations
//!
//! This module defines metrics for:
//! - Operation counts by backend, operation and outcome
//! - Operation latency

use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};
use std::time::Instant;

lazy_static! {
    /// Storage operations counter
    ///
    /// Labels:
    /// - backend: "memory" or "fs"
    /// - operation: get, put, put_if_absent, list, delete
    /// - outcome: "ok" or "error"
    pub static ref STORAGE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "riskline_storage_operations_total",
        "Total number of storage operations",
        &["backend", "operation", "outcome"]
    )
    .expect("riskline_storage_operations_total metric registration");

    /// Storage operation duration histogram
    pub static ref STORAGE_OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "riskline_storage_operation_duration_seconds",
        "Storage operation duration in seconds",
        &["backend", "operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    )
    .expect("riskline_storage_operation_duration_seconds metric registration");
}

/// Record one completed operation
pub(crate) fn observe<T>(
    backend: &str,
    operation: &str,
    started: Instant,
    result: &crate::Result<T>,
) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    STORAGE_OPERATIONS_TOTAL
        .with_label_values(&[backend, operation, outcome])
        .inc();
    STORAGE_OPERATION_DURATION
        .with_label_values(&[backend, operation])
        .observe(started.elapsed().as_secs_f64());
}
