//! Custom assertions for common verification patterns
//!
//! Failures print the full run report so the failing stage is visible.

use riskline_registry::{ModelRegistry, PromotionState, VersionId};
use riskline_runtime::{FailureClass, PipelineRun, RunReport, RunState, StageState};

/// Assert the run succeeded
pub fn assert_run_succeeded(run: &PipelineRun) {
    assert_eq!(
        run.state,
        RunState::Succeeded,
        "Expected a successful run:\n{}",
        RunReport::from_run(run)
    );
}

/// Assert every stage was served from the cache
pub fn assert_all_cached(run: &PipelineRun) {
    let uncached: Vec<&str> = run
        .ordered()
        .filter(|(_, record)| record.state() != StageState::Cached)
        .map(|(name, _)| name)
        .collect();
    assert!(
        uncached.is_empty(),
        "Expected every stage cached, not cached: {:?}\n{}",
        uncached,
        RunReport::from_run(run)
    );
}

/// Assert a stage ended in `expected`
pub fn assert_stage_state(run: &PipelineRun, stage: &str, expected: StageState) {
    assert_eq!(
        run.stage_state(stage),
        Some(expected),
        "Unexpected state for stage '{}':\n{}",
        stage,
        RunReport::from_run(run)
    );
}

/// Assert a stage failed with the given failure class
pub fn assert_stage_failed_with(run: &PipelineRun, stage: &str, class: FailureClass) {
    let record = run
        .stage(stage)
        .unwrap_or_else(|| panic!("Stage '{}' not in run", stage));
    assert_eq!(
        record.error.as_ref().map(|e| e.class),
        Some(class),
        "Unexpected failure for stage '{}':\n{}",
        stage,
        RunReport::from_run(run)
    );
}

/// Assert exactly one production version exists and it is `expected`
pub fn assert_single_production(registry: &ModelRegistry, model: &str, expected: VersionId) {
    let versions = registry
        .list(model)
        .unwrap_or_else(|e| panic!("Cannot list model '{}': {}", model, e));
    let production: Vec<VersionId> = versions
        .iter()
        .filter(|v| v.state == PromotionState::Production)
        .map(|v| v.version)
        .collect();
    assert_eq!(
        production,
        vec![expected],
        "Expected {} as the only production version of '{}'",
        expected,
        model
    );
}

/// Assert the number of registered versions of a model
pub fn assert_version_count(registry: &ModelRegistry, model: &str, expected: usize) {
    let count = registry.list(model).map(|v| v.len()).unwrap_or(0);
    assert_eq!(
        count, expected,
        "Expected {} versions of '{}', found {}",
        expected, model, count
    );
}
