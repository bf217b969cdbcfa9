//! Audit command: score a batch with the production model and check it for drift
//!
//! The batch goes through the serving facade, so it is audited exactly as
//! live traffic would be. Alerts are persisted to the store's alert log.

use super::{load_registry, open_store};
use crate::config::RuntimeConfig;
use anyhow::{Context, Result};
use riskline_core::{read_csv_records, read_json_records, Record};
use riskline_monitor::{AlertLog, DriftMonitor};
use riskline_registry::PromotionPolicy;
use riskline_runtime::ServingFacade;
use std::path::Path;
use tracing::info;

/// Score and audit `batch`; returns the number of drift alerts raised
pub async fn execute(model: &str, batch: &Path, runtime: &RuntimeConfig) -> Result<usize> {
    let records = read_records(batch)?;
    let store = open_store(runtime).await?;
    let registry = load_registry(store.as_ref(), PromotionPolicy::default()).await?;

    let log = AlertLog::new();
    let monitor = DriftMonitor::new(runtime.drift.clone(), log.clone())
        .context("invalid drift settings")?;
    let (facade, worker) = ServingFacade::start(registry, model, monitor, 1)
        .with_context(|| format!("cannot load production model for {model}"))?;

    let response = facade.score(&records)?;
    // Dropping the facade closes the audit queue; the worker drains it and stops
    drop(facade);
    worker.await.context("audit worker failed")?;

    let mean = if response.scores.is_empty() {
        0.0
    } else {
        response.scores.iter().sum::<f64>() / response.scores.len() as f64
    };
    println!(
        "Scored {} records with {}:{} (mean default probability {:.4})",
        response.scores.len(),
        response.model,
        response.version,
        mean
    );

    let alerts = log.active()?;
    let written = log.persist_new(store.as_ref()).await?;
    info!(alerts = alerts.len(), written, "Drift audit finished");

    if alerts.is_empty() {
        println!("No drift detected (threshold {})", runtime.drift.threshold);
    }
    for alert in &alerts {
        println!(
            "DRIFT {:<24} psi={:.4} threshold={} samples={}",
            alert.feature, alert.divergence, alert.threshold, alert.sample_count
        );
    }
    Ok(alerts.len())
}

/// Records from a CSV file, a JSON array or newline-delimited JSON objects
fn read_records(path: &Path) -> Result<Vec<Record>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read batch {}", path.display()))?;
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let records = if is_csv {
        read_csv_records(text.as_bytes())
    } else {
        read_json_records(&text)
    };
    records.with_context(|| format!("cannot parse batch {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskline_core::CellValue;

    #[test]
    fn test_reads_array_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let array = dir.path().join("batch.json");
        std::fs::write(&array, r#"[{"age": 31, "limit": 2000.5}, {"age": null}]"#).unwrap();
        let records = read_records(&array).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("age"), Some(&CellValue::Int(31)));
        assert_eq!(records[1].get("age"), Some(&CellValue::Null));

        let lines = dir.path().join("batch.ndjson");
        std::fs::write(&lines, "{\"age\": 31}\n\n{\"age\": 40}\n").unwrap();
        assert_eq!(read_records(&lines).unwrap().len(), 2);

        let csv = dir.path().join("batch.csv");
        std::fs::write(&csv, "age,limit\n31,2000.5\n,100\n").unwrap();
        let records = read_records(&csv).unwrap();
        assert_eq!(records[0].get("age"), Some(&CellValue::Int(31)));
        assert_eq!(records[1].get("age"), Some(&CellValue::Null));
        assert_eq!(records[1].get("limit"), Some(&CellValue::Float(100.0)));
    }
}
