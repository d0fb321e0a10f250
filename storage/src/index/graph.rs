use crate::node::ChunkNode;
use chunkgraph_core::model::{ChunkId, DocumentId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Which rule produced an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Consecutive chunks of the same document.
    Adjacent,
    /// Pair whose embedding similarity cleared the threshold.
    Similar,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeData {
    pub weight: f64,
    pub kind: EdgeKind,
}

/// Undirected edge; `source`/`target` carry no direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub source: ChunkId,
    pub target: ChunkId,
    pub weight: f64,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn new(
        source: impl Into<ChunkId>,
        target: impl Into<ChunkId>,
        weight: f64,
        kind: EdgeKind,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            weight,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub document_count: usize,
}

/// Undirected weighted chunk graph.
///
/// Each edge is stored under both endpoints so neighbour lookup is a single
/// map access. Nodes are reference-counted so graph versions can share them
/// (and their embedding caches).
#[derive(Debug, Clone, Default)]
pub struct ChunkGraph {
    nodes: HashMap<ChunkId, Arc<ChunkNode>>,
    adjacency: HashMap<ChunkId, HashMap<ChunkId, EdgeData>>,
    documents: HashMap<DocumentId, BTreeSet<ChunkId>>,
}

impl ChunkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, replacing (and disconnecting) any node with the same id.
    pub fn insert_node(&mut self, node: Arc<ChunkNode>) -> Option<Arc<ChunkNode>> {
        let previous = self.remove_node(node.id());
        self.documents
            .entry(node.document_id().to_string())
            .or_default()
            .insert(node.id().to_string());
        self.adjacency.entry(node.id().to_string()).or_default();
        self.nodes.insert(node.id().to_string(), node);
        previous
    }

    /// Add or overwrite the edge between `a` and `b`. Self-loops and edges
    /// with a missing endpoint are refused.
    pub fn add_edge(&mut self, a: &str, b: &str, weight: f64, kind: EdgeKind) -> bool {
        if a == b || !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return false;
        }
        let data = EdgeData { weight, kind };
        self.adjacency
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string(), data);
        self.adjacency
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string(), data);
        true
    }

    pub fn remove_node(&mut self, id: &str) -> Option<Arc<ChunkNode>> {
        let node = self.nodes.remove(id)?;

        if let Some(neighbors) = self.adjacency.remove(id) {
            for neighbor in neighbors.keys() {
                if let Some(edges) = self.adjacency.get_mut(neighbor) {
                    edges.remove(id);
                }
            }
        }

        if let Some(members) = self.documents.get_mut(node.document_id()) {
            members.remove(id);
            if members.is_empty() {
                self.documents.remove(node.document_id());
            }
        }

        Some(node)
    }

    /// Remove every node of `document_id` together with all edges touching them.
    pub fn remove_document(&mut self, document_id: &str) -> Vec<Arc<ChunkNode>> {
        let ids: Vec<ChunkId> = self
            .documents
            .get(document_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        ids.iter().filter_map(|id| self.remove_node(id)).collect()
    }

    pub fn node(&self, id: &str) -> Option<&Arc<ChunkNode>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<ChunkNode>> {
        self.nodes.values()
    }

    /// Nodes of one document ordered by position.
    pub fn document_nodes(&self, document_id: &str) -> Vec<&Arc<ChunkNode>> {
        let mut nodes: Vec<&Arc<ChunkNode>> = self
            .documents
            .get(document_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
            .collect();
        nodes.sort_by_key(|node| node.position());
        nodes
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &DocumentId> {
        self.documents.keys()
    }

    /// 1-hop neighbours of `id` with the connecting edge.
    pub fn neighbors(&self, id: &str) -> Vec<(&Arc<ChunkNode>, EdgeData)> {
        self.adjacency
            .get(id)
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|(target, data)| self.nodes.get(target).map(|n| (n, *data)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<EdgeData> {
        self.adjacency.get(a).and_then(|edges| edges.get(b)).copied()
    }

    /// Every edge once, with `source < target`, sorted.
    pub fn edges(&self) -> Vec<Edge> {
        let mut out: Vec<Edge> = self
            .adjacency
            .iter()
            .flat_map(|(source, edges)| {
                edges
                    .iter()
                    .filter(move |(target, _)| source < *target)
                    .map(move |(target, data)| {
                        Edge::new(source.clone(), target.clone(), data.weight, data.kind)
                    })
            })
            .collect();
        out.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
        out
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(|edges| edges.len()).sum::<usize>() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            document_count: self.documents.len(),
        }
    }
}
