//! Lineage command

use super::{load_registry, open_store};
use crate::config::RuntimeConfig;
use anyhow::{bail, Result};
use riskline_lineage::{ImpactAnalysis, LineageGraph, LineageQuery, LineageReport, NodeKey};
use riskline_registry::{PromotionPolicy, VersionId};

/// Show the lineage report, or the trace of one model version
pub async fn execute(
    model: Option<&str>,
    version: Option<VersionId>,
    runtime: &RuntimeConfig,
) -> Result<()> {
    let store = open_store(runtime).await?;
    let registry = load_registry(store.as_ref(), PromotionPolicy::default()).await?;
    let graph = LineageGraph::from_registry(&registry)?;

    match (model, version) {
        (Some(model), Some(version)) => trace(&graph, NodeKey::model(model, version)),
        (Some(model), None) => {
            print_report(&LineageReport::for_model(&graph, model));
            Ok(())
        }
        (None, None) => {
            print_report(&LineageReport::build(&graph));
            Ok(())
        }
        (None, Some(_)) => bail!("--version requires --model"),
    }
}

fn print_report(report: &LineageReport) {
    if report.is_empty() {
        println!("No lineage recorded");
    } else {
        print!("{}", report);
    }
}

/// Upstream chain of a version plus every model sharing its training data
fn trace(graph: &LineageGraph, key: NodeKey) -> Result<()> {
    if !graph.contains(&key) {
        bail!("{} is not registered", key);
    }
    let info = LineageQuery::new(graph).full_lineage(&key);

    println!("{}", key);
    for (node, depth) in &info.upstream {
        println!("{}<- {}", "  ".repeat(*depth), node);
    }

    for (node, _) in &info.upstream {
        if !matches!(node, NodeKey::Dataset { .. }) {
            continue;
        }
        let impact = ImpactAnalysis::new(graph).analyze_change(node)?;
        println!();
        println!(
            "Models trained on {} ({} affected nodes{}):",
            node,
            impact.affected_count,
            if impact.production_affected {
                ", production affected"
            } else {
                ""
            }
        );
        for (name, version) in &impact.affected_models {
            println!("  {}:{}", name, version);
        }
    }
    Ok(())
}
