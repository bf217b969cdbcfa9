//! Lineage traversals
//!
//! Upstream traces answer "what produced this model"; downstream traversals
//! answer "what was built from this dataset". Results are ordered by depth,
//! closest first, with ties broken by key.

use crate::graph::{LineageGraph, NodeKey};
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// Query builder for lineage operations
pub struct LineageQuery<'a> {
    graph: &'a LineageGraph,
}

impl<'a> LineageQuery<'a> {
    pub fn new(graph: &'a LineageGraph) -> Self {
        Self { graph }
    }

    /// Every upstream node with its distance, up to `max_depth` (None for unlimited)
    pub fn ancestors_with_depth(
        &self,
        key: &NodeKey,
        max_depth: Option<usize>,
    ) -> Vec<(NodeKey, usize)> {
        self.traverse_with_depth(key, Direction::Incoming, max_depth)
    }

    /// Every downstream node with its distance, up to `max_depth` (None for unlimited)
    pub fn descendants_with_depth(
        &self,
        key: &NodeKey,
        max_depth: Option<usize>,
    ) -> Vec<(NodeKey, usize)> {
        self.traverse_with_depth(key, Direction::Outgoing, max_depth)
    }

    /// Both directions at once
    pub fn full_lineage(&self, key: &NodeKey) -> LineageInfo {
        let upstream = self.ancestors_with_depth(key, None);
        let downstream = self.descendants_with_depth(key, None);

        LineageInfo {
            key: key.clone(),
            max_upstream_depth: upstream.iter().map(|(_, d)| *d).max().unwrap_or(0),
            max_downstream_depth: downstream.iter().map(|(_, d)| *d).max().unwrap_or(0),
            upstream,
            downstream,
        }
    }

    /// Shortest downstream path from `from` to `to`, both inclusive
    pub fn path(&self, from: &NodeKey, to: &NodeKey) -> Option<Vec<NodeKey>> {
        let graph = self.graph.inner_graph();
        let from_idx = self.graph.node_index(from)?;
        let to_idx = self.graph.node_index(to)?;

        let mut visited: HashSet<NodeIndex> = HashSet::from([from_idx]);
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([from_idx]);

        while let Some(current) = queue.pop_front() {
            if current == to_idx {
                let mut path = vec![graph[to_idx].key.clone()];
                let mut curr = to_idx;
                while let Some(&prev) = parent.get(&curr) {
                    path.push(graph[prev].key.clone());
                    curr = prev;
                }
                path.reverse();
                return Some(path);
            }
            for neighbor in graph.neighbors_directed(current, Direction::Outgoing) {
                if visited.insert(neighbor) {
                    parent.insert(neighbor, current);
                    queue.push_back(neighbor);
                }
            }
        }
        None
    }

    pub fn is_reachable(&self, from: &NodeKey, to: &NodeKey) -> bool {
        self.path(from, to).is_some()
    }

    fn traverse_with_depth(
        &self,
        start: &NodeKey,
        direction: Direction,
        max_depth: Option<usize>,
    ) -> Vec<(NodeKey, usize)> {
        let graph = self.graph.inner_graph();
        let Some(start_idx) = self.graph.node_index(start) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        let mut visited = HashSet::from([start_idx]);
        let mut queue: VecDeque<(NodeIndex, usize)> = graph
            .neighbors_directed(start_idx, direction)
            .filter(|n| visited.insert(*n))
            .map(|n| (n, 1))
            .collect();

        while let Some((idx, depth)) = queue.pop_front() {
            if max_depth.is_some_and(|max| depth > max) {
                continue;
            }
            result.push((graph[idx].key.clone(), depth));

            if max_depth.map_or(true, |max| depth < max) {
                for neighbor in graph.neighbors_directed(idx, direction) {
                    if visited.insert(neighbor) {
                        queue.push_back((neighbor, depth + 1));
                    }
                }
            }
        }

        result.sort_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)));
        result
    }
}

/// Upstream and downstream view of one node
#[derive(Debug, Clone, Serialize)]
pub struct LineageInfo {
    pub key: NodeKey,
    pub upstream: Vec<(NodeKey, usize)>,
    pub downstream: Vec<(NodeKey, usize)>,
    pub max_upstream_depth: usize,
    pub max_downstream_depth: usize,
}
