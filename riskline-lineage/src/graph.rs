//! Lineage graph data structure

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use riskline_core::Fingerprint;
use riskline_registry::{ModelArtifact, ModelLineage, ModelRegistry, PromotionState, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Identity of a node in the lineage graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKey {
    /// Raw dataset, by content fingerprint
    Dataset { fingerprint: Fingerprint },
    /// Encoded feature matrix, by content fingerprint
    Features { fingerprint: Fingerprint },
    /// Pipeline run
    Run { id: Uuid },
    /// Registered model version
    Model { name: String, version: VersionId },
}

impl NodeKey {
    pub fn model(name: impl Into<String>, version: VersionId) -> Self {
        NodeKey::Model {
            name: name.into(),
            version,
        }
    }

    /// Data stage this kind of node belongs to
    pub fn stage(&self) -> DataStage {
        match self {
            NodeKey::Dataset { .. } => DataStage::Raw,
            NodeKey::Features { .. } => DataStage::Processed,
            NodeKey::Run { .. } | NodeKey::Model { .. } => DataStage::Model,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Dataset { fingerprint } => write!(f, "dataset:{}", fingerprint.short()),
            NodeKey::Features { fingerprint } => write!(f, "features:{}", fingerprint.short()),
            NodeKey::Run { id } => write!(f, "run:{}", id),
            NodeKey::Model { name, version } => write!(f, "model:{}:{}", name, version),
        }
    }
}

/// Coarse grouping used by lineage reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStage {
    Raw,
    Processed,
    Model,
}

impl fmt::Display for DataStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataStage::Raw => "raw",
            DataStage::Processed => "processed",
            DataStage::Model => "model",
        };
        f.write_str(s)
    }
}

/// Node in the lineage graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageNode {
    pub key: NodeKey,
    /// Free-form annotations, e.g. the promotion state of a model node
    pub tags: BTreeMap<String, String>,
}

impl LineageNode {
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn stage(&self) -> DataStage {
        self.key.stage()
    }
}

/// Relationship between two lineage nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageEdge {
    /// Features were derived from a dataset
    Derived,
    /// A run consumed a feature set
    Consumed,
    /// A run produced a model version
    Produced,
}

/// Lineage graph for tracking dataset, feature, run and model dependencies
#[derive(Debug, Clone)]
pub struct LineageGraph {
    graph: DiGraph<LineageNode, LineageEdge>,
    key_to_node: HashMap<NodeKey, NodeIndex>,
}

impl LineageGraph {
    /// Create a new empty lineage graph
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            key_to_node: HashMap::new(),
        }
    }

    /// Build the graph of every version held by a registry
    pub fn from_registry(registry: &ModelRegistry) -> crate::Result<Self> {
        let mut graph = Self::new();
        for model in registry.models()? {
            for artifact in registry.list(&model)? {
                graph.record_artifact(&artifact)?;
            }
        }
        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built lineage graph from registry"
        );
        Ok(graph)
    }

    /// Add a node, or merge its tags into the existing node with the same key
    pub fn add_node(&mut self, node: LineageNode) -> NodeIndex {
        if let Some(&idx) = self.key_to_node.get(&node.key) {
            self.graph[idx].tags.extend(node.tags);
            return idx;
        }
        let key = node.key.clone();
        let idx = self.graph.add_node(node);
        self.key_to_node.insert(key, idx);
        idx
    }

    /// Add an edge between two existing nodes. Repeated edges are ignored and
    /// edges that would close a cycle are rejected.
    pub fn add_edge(
        &mut self,
        from: &NodeKey,
        to: &NodeKey,
        edge: LineageEdge,
    ) -> crate::Result<()> {
        let from_idx = self.require(from)?;
        let to_idx = self.require(to)?;

        if self.graph.find_edge(from_idx, to_idx).is_some() {
            return Ok(());
        }
        if from_idx == to_idx || has_path_connecting(&self.graph, to_idx, from_idx, None) {
            return Err(crate::Error::CircularDependency);
        }
        self.graph.add_edge(from_idx, to_idx, edge);
        Ok(())
    }

    /// Record the chain dataset -> features -> run -> model for one version
    pub fn record(
        &mut self,
        model: &str,
        version: VersionId,
        state: PromotionState,
        lineage: &ModelLineage,
    ) -> crate::Result<()> {
        let dataset = NodeKey::Dataset {
            fingerprint: lineage.dataset_fingerprint,
        };
        let features = NodeKey::Features {
            fingerprint: lineage.feature_fingerprint,
        };
        let run = NodeKey::Run { id: lineage.run_id };
        let model = NodeKey::model(model, version);

        self.add_node(LineageNode::new(dataset.clone()));
        self.add_node(
            LineageNode::new(features.clone())
                .with_tag("transform", lineage.transform_fingerprint.short()),
        );
        self.add_node(LineageNode::new(run.clone()));
        self.add_node(LineageNode::new(model.clone()).with_tag("state", state.to_string()));

        self.add_edge(&dataset, &features, LineageEdge::Derived)?;
        self.add_edge(&features, &run, LineageEdge::Consumed)?;
        self.add_edge(&run, &model, LineageEdge::Produced)
    }

    pub fn record_artifact(&mut self, artifact: &ModelArtifact) -> crate::Result<()> {
        self.record(
            &artifact.model_name,
            artifact.version,
            artifact.state,
            &artifact.lineage,
        )
    }

    pub fn get_node(&self, key: &NodeKey) -> Option<&LineageNode> {
        self.key_to_node.get(key).map(|&idx| &self.graph[idx])
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.key_to_node.contains_key(key)
    }

    /// Direct upstream nodes
    pub fn get_upstream(&self, key: &NodeKey) -> Vec<&LineageNode> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Direct downstream nodes
    pub fn get_downstream(&self, key: &NodeKey) -> Vec<&LineageNode> {
        self.neighbors(key, Direction::Outgoing)
    }

    fn neighbors(&self, key: &NodeKey, direction: Direction) -> Vec<&LineageNode> {
        let Some(&idx) = self.key_to_node.get(key) else {
            return Vec::new();
        };
        let mut nodes: Vec<&LineageNode> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| &self.graph[n])
            .collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        nodes
    }

    /// All nodes, ordered by key
    pub fn nodes(&self) -> Vec<&LineageNode> {
        let mut nodes: Vec<&LineageNode> = self.graph.node_weights().collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        nodes
    }

    /// Nodes with no upstream
    pub fn roots(&self) -> Vec<NodeKey> {
        self.endpoints(Direction::Incoming)
    }

    /// Nodes with no downstream
    pub fn leaves(&self) -> Vec<NodeKey> {
        self.endpoints(Direction::Outgoing)
    }

    fn endpoints(&self, direction: Direction) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph.neighbors_directed(idx, direction).next().is_none())
            .map(|idx| self.graph[idx].key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Check if the graph has cycles
    pub fn has_cycles(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub(crate) fn node_index(&self, key: &NodeKey) -> Option<NodeIndex> {
        self.key_to_node.get(key).copied()
    }

    pub(crate) fn inner_graph(&self) -> &DiGraph<LineageNode, LineageEdge> {
        &self.graph
    }

    fn require(&self, key: &NodeKey) -> crate::Result<NodeIndex> {
        self.node_index(key)
            .ok_or_else(|| crate::Error::NodeNotFound(key.to_string()))
    }
}

impl Default for LineageGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn lineage(dataset: &str, features: &str) -> ModelLineage {
        ModelLineage {
            run_id: Uuid::new_v4(),
            dataset_fingerprint: Fingerprint::of_bytes(dataset.as_bytes()),
            feature_fingerprint: Fingerprint::of_bytes(features.as_bytes()),
            transform_fingerprint: Fingerprint::of_bytes(b"transform"),
        }
    }

    #[test]
    fn test_graph_creation() {
        let graph = LineageGraph::new();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_record_builds_chain() {
        let mut graph = LineageGraph::new();
        let lineage = lineage("raw", "feat");
        graph
            .record("credit", VersionId::new(1), PromotionState::Staging, &lineage)
            .unwrap();

        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 3);
        assert!(!graph.has_cycles());

        let model = NodeKey::model("credit", VersionId::new(1));
        let upstream = graph.get_upstream(&model);
        assert_eq!(upstream.len(), 1);
        assert_eq!(upstream[0].key, NodeKey::Run { id: lineage.run_id });
        assert_eq!(
            graph.get_node(&model).unwrap().tags.get("state").map(String::as_str),
            Some("staging")
        );
    }

    #[test]
    fn test_shared_dataset_is_one_node() {
        let mut graph = LineageGraph::new();
        graph
            .record("credit", VersionId::new(1), PromotionState::Archived, &lineage("raw", "feat"))
            .unwrap();
        graph
            .record(
                "credit",
                VersionId::new(2),
                PromotionState::Production,
                &lineage("raw", "feat"),
            )
            .unwrap();

        // one dataset, one feature set, two runs, two models
        assert_eq!(graph.node_count(), 6);
        assert_eq!(graph.roots().len(), 1);
        assert_eq!(graph.leaves().len(), 2);

        let features = NodeKey::Features {
            fingerprint: Fingerprint::of_bytes(b"feat"),
        };
        assert_eq!(graph.get_downstream(&features).len(), 2);
    }

    #[test]
    fn test_re_recording_updates_state_tag() {
        let mut graph = LineageGraph::new();
        let lineage = lineage("raw", "feat");
        graph
            .record("credit", VersionId::new(1), PromotionState::Staging, &lineage)
            .unwrap();
        graph
            .record("credit", VersionId::new(1), PromotionState::Production, &lineage)
            .unwrap();

        let node = graph.get_node(&NodeKey::model("credit", VersionId::new(1))).unwrap();
        assert_eq!(node.tags["state"], "production");
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut graph = LineageGraph::new();
        let lineage = lineage("raw", "feat");
        graph
            .record("credit", VersionId::new(1), PromotionState::Staging, &lineage)
            .unwrap();

        let dataset = NodeKey::Dataset {
            fingerprint: lineage.dataset_fingerprint,
        };
        let model = NodeKey::model("credit", VersionId::new(1));
        let err = graph.add_edge(&model, &dataset, LineageEdge::Derived).unwrap_err();
        assert!(matches!(err, crate::Error::CircularDependency));
        assert!(!graph.has_cycles());
    }

    #[test]
    fn test_edge_to_unknown_node() {
        let mut graph = LineageGraph::new();
        let run = NodeKey::Run { id: Uuid::new_v4() };
        graph.add_node(LineageNode::new(run.clone()));
        let err = graph
            .add_edge(&run, &NodeKey::model("credit", VersionId::new(1)), LineageEdge::Produced)
            .unwrap_err();
        assert!(matches!(err, crate::Error::NodeNotFound(_)));
    }

    #[test]
    fn test_node_key_serializes_with_kind_tag() {
        let key = NodeKey::model("credit", VersionId::new(3));
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["kind"], "model");
        assert_eq!(json["version"], "v3");
        assert_eq!(key.to_string(), "model:credit:v3");
    }
}
