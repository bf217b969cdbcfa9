//! Runs command: inspect and clean up the run ledger

use super::open_store;
use crate::config::RuntimeConfig;
use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use riskline_runtime::{RetentionPolicy, RunLedger, RunReport, StageState};
use uuid::Uuid;

pub async fn list(limit: usize, runtime: &RuntimeConfig) -> Result<()> {
    let store = open_store(runtime).await?;
    let ledger = RunLedger::load_from(store.as_ref()).await?;
    if ledger.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }

    println!(
        "{:<36} {:<20} {:<10} {:>7} {:<20}",
        "RUN", "PIPELINE", "STATE", "CACHED", "STARTED"
    );
    for run in ledger.list().into_iter().take(limit) {
        println!(
            "{:<36} {:<20} {:<10} {:>7} {:<20}",
            run.id,
            run.pipeline,
            run.state.to_string(),
            format!("{}/{}", run.count(StageState::Cached), run.stages.len()),
            run.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn show(id: &str, runtime: &RuntimeConfig) -> Result<i32> {
    let id = Uuid::parse_str(id).with_context(|| format!("invalid run id '{id}'"))?;
    let store = open_store(runtime).await?;
    let ledger = RunLedger::load_from(store.as_ref()).await?;
    let Some(run) = ledger.get(&id) else {
        bail!("run {id} not found");
    };
    let report = RunReport::from_run(run);
    println!("{}", report);
    Ok(report.exit_code())
}

/// Apply the retention policy and persist the trimmed ledger
pub async fn cleanup(
    keep_last: usize,
    max_age_days: Option<i64>,
    runtime: &RuntimeConfig,
) -> Result<()> {
    if max_age_days.is_some_and(|d| d < 0) {
        bail!("--max-age-days must not be negative");
    }
    let policy = RetentionPolicy {
        keep_last,
        max_age: max_age_days.map(Duration::days),
    };

    let store = open_store(runtime).await?;
    let mut ledger = RunLedger::load_from(store.as_ref()).await?;
    let removed = ledger.cleanup(&policy, Utc::now());
    ledger
        .save_to(store.as_ref())
        .await
        .context("cannot save run ledger")?;

    println!("Removed {} runs, {} kept", removed.len(), ledger.len());
    for id in removed {
        println!("  {}", id);
    }
    Ok(())
}
