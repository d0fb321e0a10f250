use crate::index::{ChunkGraph, Edge, GraphStats};
use crate::node::ChunkNode;
use chunkgraph_core::error::{ChunkGraphError, ErrorCode};
use chunkgraph_core::model::DocumentId;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("invalid graph update: {0}")]
    InvalidUpdate(String),
}

impl ChunkGraphError for StoreError {
    fn error_code(&self) -> ErrorCode {
        match self {
            StoreError::InvalidUpdate(_) => ErrorCode::FailedPrecondition,
        }
    }
}

/// A unit of change applied atomically to the graph.
#[derive(Debug, Clone)]
pub enum GraphUpdate {
    /// Discard the whole graph and install the given nodes and edges.
    ReplaceAll {
        nodes: Vec<Arc<ChunkNode>>,
        edges: Vec<Edge>,
    },
    /// Drop `document_id`'s nodes (and their edges), then install the given
    /// nodes and edges. Edges may reference any node present afterwards.
    ReplaceDocument {
        document_id: DocumentId,
        nodes: Vec<Arc<ChunkNode>>,
        edges: Vec<Edge>,
    },
    RemoveDocument { document_id: DocumentId },
}

/// Shared home of the chunk graph.
///
/// Readers take an `Arc` of the current version and work on it lock-free.
/// Writers build the next version from a private copy and swap it in under
/// the write lock, so a reader sees either the old or the new version of a
/// document, never a mix. Writers are serialized by `tx_lock`.
pub struct GraphStore {
    current: RwLock<Arc<ChunkGraph>>,
    tx_lock: Mutex<()>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(ChunkGraph::new())),
            tx_lock: Mutex::new(()),
        }
    }

    /// The current graph version.
    pub async fn snapshot(&self) -> Arc<ChunkGraph> {
        self.current.read().await.clone()
    }

    pub async fn stats(&self) -> GraphStats {
        self.current.read().await.stats()
    }

    /// Begin an exclusive write. Other writers wait until the returned guard
    /// commits or is dropped; readers are unaffected.
    pub async fn writer(&self) -> GraphWriter<'_> {
        let guard = self.tx_lock.lock().await;
        let base = self.snapshot().await;
        GraphWriter {
            store: self,
            base,
            _guard: guard,
        }
    }

    pub async fn apply(&self, update: GraphUpdate) -> Result<GraphStats, StoreError> {
        self.writer().await.commit(update).await
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GraphWriter<'a> {
    store: &'a GraphStore,
    base: Arc<ChunkGraph>,
    _guard: MutexGuard<'a, ()>,
}

impl GraphWriter<'_> {
    /// The version this write starts from. It stays current until `commit`,
    /// since no other writer can run meanwhile.
    pub fn base(&self) -> &Arc<ChunkGraph> {
        &self.base
    }

    /// Validate `update` against the base version and publish the result.
    /// If validation fails nothing is published.
    pub async fn commit(self, update: GraphUpdate) -> Result<GraphStats, StoreError> {
        let next = apply_update(&self.base, update)?;
        let stats = next.stats();

        *self.store.current.write().await = Arc::new(next);
        debug!(
            nodes = stats.node_count,
            edges = stats.edge_count,
            "graph version published"
        );
        Ok(stats)
    }
}

fn apply_update(base: &ChunkGraph, update: GraphUpdate) -> Result<ChunkGraph, StoreError> {
    match update {
        GraphUpdate::ReplaceAll { nodes, edges } => {
            let mut graph = ChunkGraph::new();
            insert_nodes(&mut graph, nodes, None)?;
            insert_edges(&mut graph, edges)?;
            Ok(graph)
        }
        GraphUpdate::ReplaceDocument {
            document_id,
            nodes,
            edges,
        } => {
            let mut graph = base.clone();
            graph.remove_document(&document_id);
            insert_nodes(&mut graph, nodes, Some(&document_id))?;
            insert_edges(&mut graph, edges)?;
            Ok(graph)
        }
        GraphUpdate::RemoveDocument { document_id } => {
            let mut graph = base.clone();
            graph.remove_document(&document_id);
            Ok(graph)
        }
    }
}

fn insert_nodes(
    graph: &mut ChunkGraph,
    nodes: Vec<Arc<ChunkNode>>,
    document_id: Option<&str>,
) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for node in nodes {
        if let Some(expected) = document_id {
            if node.document_id() != expected {
                return Err(StoreError::InvalidUpdate(format!(
                    "chunk {} belongs to document {}, not {}",
                    node.id(),
                    node.document_id(),
                    expected
                )));
            }
        }
        if !seen.insert(node.id().to_string()) {
            return Err(StoreError::InvalidUpdate(format!(
                "chunk {} appears more than once",
                node.id()
            )));
        }
        if let Some(existing) = graph.node(node.id()) {
            return Err(StoreError::InvalidUpdate(format!(
                "chunk {} already belongs to document {}",
                node.id(),
                existing.document_id()
            )));
        }
        graph.insert_node(node);
    }
    Ok(())
}

fn insert_edges(graph: &mut ChunkGraph, edges: Vec<Edge>) -> Result<(), StoreError> {
    for edge in edges {
        if !edge.weight.is_finite() || !(0.0..=1.0).contains(&edge.weight) {
            return Err(StoreError::InvalidUpdate(format!(
                "edge {} - {} has weight {} outside [0, 1]",
                edge.source, edge.target, edge.weight
            )));
        }
        if edge.source == edge.target {
            return Err(StoreError::InvalidUpdate(format!(
                "self-loop on chunk {}",
                edge.source
            )));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !graph.contains(endpoint) {
                return Err(StoreError::InvalidUpdate(format!(
                    "edge endpoint {} does not exist",
                    endpoint
                )));
            }
        }
        graph.add_edge(&edge.source, &edge.target, edge.weight, edge.kind);
    }
    Ok(())
}
