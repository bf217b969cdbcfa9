//! Impact analysis for lineage changes

use crate::graph::{LineageGraph, NodeKey};
use crate::queries::LineageQuery;
use riskline_registry::VersionId;
use serde::Serialize;
use uuid::Uuid;

/// Impact analysis for lineage changes
pub struct ImpactAnalysis<'a> {
    graph: &'a LineageGraph,
}

impl<'a> ImpactAnalysis<'a> {
    pub fn new(graph: &'a LineageGraph) -> Self {
        Self { graph }
    }

    /// Everything downstream of `key`, e.g. the models that must be retrained
    /// when a dataset turns out to be bad
    pub fn analyze_change(&self, key: &NodeKey) -> crate::Result<ChangeImpact> {
        if !self.graph.contains(key) {
            return Err(crate::Error::NodeNotFound(key.to_string()));
        }

        let affected: Vec<NodeKey> = LineageQuery::new(self.graph)
            .descendants_with_depth(key, None)
            .into_iter()
            .map(|(k, _)| k)
            .collect();

        let mut affected_runs = Vec::new();
        let mut affected_models = Vec::new();
        let mut production_affected = false;
        for k in &affected {
            match k {
                NodeKey::Run { id } => affected_runs.push(*id),
                NodeKey::Model { name, version } => {
                    affected_models.push((name.clone(), *version));
                    production_affected |= self
                        .graph
                        .get_node(k)
                        .and_then(|n| n.tags.get("state"))
                        .is_some_and(|s| s == "production");
                }
                _ => {}
            }
        }
        affected_models.sort();
        affected_runs.sort();

        Ok(ChangeImpact {
            source: key.clone(),
            affected_count: affected.len(),
            affected,
            affected_runs,
            affected_models,
            production_affected,
        })
    }
}

/// Result of an impact analysis
#[derive(Debug, Clone, Serialize)]
pub struct ChangeImpact {
    /// The node that changed
    pub source: NodeKey,

    /// Number of downstream nodes
    pub affected_count: usize,

    /// Downstream nodes, closest first
    pub affected: Vec<NodeKey>,

    pub affected_runs: Vec<Uuid>,

    pub affected_models: Vec<(String, VersionId)>,

    /// Whether a production version is downstream
    pub production_affected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::lineage;
    use riskline_registry::PromotionState;

    #[test]
    fn test_dataset_change_reaches_every_model() {
        let mut graph = LineageGraph::new();
        let first = lineage("raw", "feat-a");
        graph
            .record("credit", VersionId::new(1), PromotionState::Archived, &first)
            .unwrap();
        graph
            .record(
                "credit",
                VersionId::new(2),
                PromotionState::Production,
                &lineage("raw", "feat-b"),
            )
            .unwrap();
        graph
            .record(
                "other",
                VersionId::new(1),
                PromotionState::Staging,
                &lineage("other-raw", "feat-c"),
            )
            .unwrap();

        let impact = ImpactAnalysis::new(&graph)
            .analyze_change(&NodeKey::Dataset {
                fingerprint: first.dataset_fingerprint,
            })
            .unwrap();

        assert_eq!(impact.affected_count, 6);
        assert_eq!(impact.affected_runs.len(), 2);
        assert_eq!(
            impact.affected_models,
            vec![
                ("credit".to_string(), VersionId::new(1)),
                ("credit".to_string(), VersionId::new(2)),
            ]
        );
        assert!(impact.production_affected);
    }

    #[test]
    fn test_leaf_change_has_no_impact() {
        let mut graph = LineageGraph::new();
        graph
            .record("credit", VersionId::new(1), PromotionState::Staging, &lineage("raw", "feat"))
            .unwrap();
        let impact = ImpactAnalysis::new(&graph)
            .analyze_change(&NodeKey::model("credit", VersionId::new(1)))
            .unwrap();
        assert_eq!(impact.affected_count, 0);
        assert!(!impact.production_affected);
    }

    #[test]
    fn test_unknown_node_is_an_error() {
        let graph = LineageGraph::new();
        let err = ImpactAnalysis::new(&graph)
            .analyze_change(&NodeKey::model("credit", VersionId::new(1)))
            .unwrap_err();
        assert!(matches!(err, crate::Error::NodeNotFound(_)));
    }
}
