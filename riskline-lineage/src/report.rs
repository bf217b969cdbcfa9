//! Lineage report grouped by data stage

use crate::graph::{DataStage, LineageGraph, LineageNode, NodeKey};
use crate::queries::LineageQuery;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Nodes grouped into raw, processed and model stages
#[derive(Debug, Clone, Default, Serialize)]
pub struct LineageReport {
    pub stages: BTreeMap<DataStage, Vec<LineageNode>>,
}

impl LineageReport {
    /// Report over the whole graph
    pub fn build(graph: &LineageGraph) -> Self {
        Self::from_nodes(graph.nodes().into_iter().cloned())
    }

    /// Report restricted to the versions of one model and everything upstream of them
    pub fn for_model(graph: &LineageGraph, model: &str) -> Self {
        let query = LineageQuery::new(graph);
        let mut keys = BTreeSet::new();
        for node in graph.nodes() {
            if matches!(&node.key, NodeKey::Model { name, .. } if name == model) {
                keys.extend(
                    query
                        .ancestors_with_depth(&node.key, None)
                        .into_iter()
                        .map(|(k, _)| k),
                );
                keys.insert(node.key.clone());
            }
        }
        Self::from_nodes(keys.iter().filter_map(|k| graph.get_node(k)).cloned())
    }

    fn from_nodes(nodes: impl IntoIterator<Item = LineageNode>) -> Self {
        let mut stages: BTreeMap<DataStage, Vec<LineageNode>> = BTreeMap::new();
        for node in nodes {
            stages.entry(node.stage()).or_default().push(node);
        }
        Self { stages }
    }

    pub fn stage(&self, stage: DataStage) -> &[LineageNode] {
        self.stages.get(&stage).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.values().all(Vec::is_empty)
    }
}

impl fmt::Display for LineageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (stage, nodes) in &self.stages {
            writeln!(f, "{} ({})", stage, nodes.len())?;
            for node in nodes {
                write!(f, "  {}", node.key)?;
                for (k, v) in &node.tags {
                    write!(f, " {}={}", k, v)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::lineage;
    use riskline_registry::{PromotionState, VersionId};

    fn graph() -> LineageGraph {
        let mut graph = LineageGraph::new();
        graph
            .record(
                "credit",
                VersionId::new(1),
                PromotionState::Production,
                &lineage("raw", "feat"),
            )
            .unwrap();
        graph
            .record(
                "other",
                VersionId::new(1),
                PromotionState::Staging,
                &lineage("raw-2", "feat-2"),
            )
            .unwrap();
        graph
    }

    #[test]
    fn test_report_groups_by_stage() {
        let report = LineageReport::build(&graph());
        assert_eq!(report.stage(DataStage::Raw).len(), 2);
        assert_eq!(report.stage(DataStage::Processed).len(), 2);
        // runs and model versions
        assert_eq!(report.stage(DataStage::Model).len(), 4);
    }

    #[test]
    fn test_model_report_only_includes_its_upstream() {
        let report = LineageReport::for_model(&graph(), "credit");
        assert_eq!(report.stage(DataStage::Raw).len(), 1);
        assert_eq!(report.stage(DataStage::Processed).len(), 1);
        assert_eq!(report.stage(DataStage::Model).len(), 2);

        let text = report.to_string();
        assert!(text.contains("raw (1)"));
        assert!(text.contains("model:credit:v1 state=production"));
    }

    #[test]
    fn test_unknown_model_gives_empty_report() {
        assert!(LineageReport::for_model(&graph(), "missing").is_empty());
    }
}
